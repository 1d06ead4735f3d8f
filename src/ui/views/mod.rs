mod items;
mod logs;
mod status;

pub use items::{draw_items, ListView};
pub use logs::draw_logs;
pub use status::{draw_status, StatusPanel};

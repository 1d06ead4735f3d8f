//! Sync job lifecycle: shared state and the controller that drives it.

mod controller;
mod state;

pub use controller::{JobController, JobOptions};
pub use state::{JobState, JobStatus, JobUpdate, SyncJob};

//! Server-pushed updates: SSE decoding, event types and the reconnecting client.

mod client;
mod sse;
mod types;

pub use client::{EventStreamClient, HttpEventSource, StreamOptions};
pub use types::{ConnectionState, LogEntry, Progress, StreamEvent, StreamStatus};

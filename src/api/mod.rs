//! REST transport for the sync service.

mod client;
pub mod types;

use color_eyre::Result;
use std::future::Future;

pub use client::ApiClient;
pub use types::{CancelTarget, LiveStatus, MediaItem, Page, WatchList};

/// The job endpoints the lifecycle controller drives.
///
/// Implemented over HTTP by [`ApiClient`]; tests provide scripted fakes.
pub trait SyncApi: Send + Sync + 'static {
  /// `GET` the live status of the sync job
  fn live_status(&self) -> impl Future<Output = Result<LiveStatus>> + Send;

  /// `POST` a request to start a sync. Returns once the request is accepted.
  fn trigger_sync(&self) -> impl Future<Output = Result<()>> + Send;

  /// `POST` a cancellation request. Returns once the request is accepted,
  /// not when the job has actually stopped.
  fn cancel_sync(&self, target: CancelTarget) -> impl Future<Output = Result<()>> + Send;
}

//! Event store clients that receive the watcher's heartbeats.

mod client;
mod memory;
mod spool;

use async_trait::async_trait;
use thiserror::Error;

use crate::heartbeat::Heartbeat;

pub use client::ServerClient;
pub use memory::MemoryStore;
pub use spool::{QueuedRequest, Spool};

/// Errors reported by an event store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("event server unreachable: {0}")]
    Transport(String),
    #[error("event server answered {status}: {body}")]
    Status { status: u16, body: String },
    #[error("unknown bucket: {0}")]
    UnknownBucket(String),
    #[error("heartbeat spool failed: {0}")]
    Spool(#[from] std::io::Error),
}

impl StoreError {
    /// Whether retrying the same request later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Transport(_) => true,
            StoreError::Status { status, .. } => *status >= 500 || *status == 429,
            StoreError::UnknownBucket(_) | StoreError::Spool(_) => false,
        }
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(e: reqwest::Error) -> Self {
        StoreError::Transport(e.to_string())
    }
}

/// Downstream store for AFK events.
///
/// `queued = true` lets the store buffer a request and retry it later instead
/// of failing on transient transport errors.
#[async_trait]
pub trait EventStore: Send {
    /// Create `bucket` if it does not exist yet.
    async fn create_bucket(
        &mut self,
        bucket: &str,
        event_type: &str,
        queued: bool,
    ) -> Result<(), StoreError>;

    /// Send a heartbeat, merging it with the previous event when both carry
    /// the same data and are at most `pulsetime` seconds apart.
    async fn heartbeat(
        &mut self,
        bucket: &str,
        event: Heartbeat,
        pulsetime: f64,
        queued: bool,
    ) -> Result<(), StoreError>;
}

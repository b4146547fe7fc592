//! AFK watcher
//!
//! Samples the system idle time, derives an active/idle presence state and
//! reports it as heartbeats to an ActivityWatch-compatible event server.

pub mod cli;
pub mod config;
pub mod heartbeat;
pub mod idle;
pub mod store;
pub mod tracker;

pub use config::{Config, ConfigError, Settings};
pub use heartbeat::{Heartbeat, Status};
pub use idle::{IdleProbe, ProbeError};
pub use store::{EventStore, MemoryStore, ServerClient, StoreError};
pub use tracker::{PresenceState, PresenceTracker, StopReason, TrackerError};

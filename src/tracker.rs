//! Presence state machine and the heartbeat loop driving it.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::Settings;
use crate::heartbeat::{Heartbeat, Status, EVENT_TYPE};
use crate::idle::{IdleProbe, ProbeError};
use crate::store::{EventStore, StoreError};

/// Gap between the heartbeat closing the idle span and the one opening the active span.
const TRANSITION_OFFSET_MS: i64 = 1;

/// Presence derived from the idle time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceState {
    Active,
    Idle,
}

/// Why the loop ended without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Cancelled,
    ParentExited,
}

/// Fatal conditions that end the loop.
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("unable to determine idle time: {0}")]
    Probe(#[from] ProbeError),
    #[error("failed to send heartbeat: {0}")]
    Store(#[from] StoreError),
}

/// Polls an [`IdleProbe`] and reports presence to an [`EventStore`].
pub struct PresenceTracker<P, S> {
    probe: P,
    store: S,
    settings: Settings,
    bucket: String,
    state: PresenceState,
    orphan_check: Option<fn() -> bool>,
}

impl<P: IdleProbe, S: EventStore> PresenceTracker<P, S> {
    pub fn new(probe: P, store: S, settings: Settings, bucket: impl Into<String>) -> Self {
        Self {
            probe,
            store,
            settings,
            bucket: bucket.into(),
            state: PresenceState::Active,
            orphan_check: None,
        }
    }

    /// Stop the loop once `check` reports that the supervising process is gone.
    pub fn with_orphan_check(mut self, check: fn() -> bool) -> Self {
        self.orphan_check = Some(check);
        self
    }

    pub fn state(&self) -> PresenceState {
        self.state
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn into_store(self) -> S {
        self.store
    }

    /// Apply the transition policy to one idle reading taken at `now`.
    ///
    /// Returns the heartbeats to emit, in order.
    pub fn evaluate(&mut self, now: DateTime<Utc>, idle_seconds: f64) -> Vec<Heartbeat> {
        let last_input =
            now - ChronoDuration::microseconds((idle_seconds * 1_000_000.0).round() as i64);
        let idle = idle_seconds >= self.settings.timeout().as_secs_f64();

        match (self.state, idle) {
            (PresenceState::Idle, false) => {
                info!("No longer AFK (input {:.1}s ago)", idle_seconds);
                self.state = PresenceState::Active;
                vec![
                    Heartbeat::new(Status::Active, last_input),
                    Heartbeat::new(
                        Status::Active,
                        last_input + ChronoDuration::milliseconds(TRANSITION_OFFSET_MS),
                    ),
                ]
            }
            (PresenceState::Active, true) => {
                info!("Became AFK (no input for {:.1}s)", idle_seconds);
                self.state = PresenceState::Idle;
                vec![
                    Heartbeat::new(Status::Idle, last_input),
                    Heartbeat::new(Status::Idle, now),
                ]
            }
            // Active pulses are stamped at the last input, idle pulses at now
            (PresenceState::Active, false) => vec![Heartbeat::new(Status::Active, last_input)],
            (PresenceState::Idle, true) => vec![Heartbeat::new(Status::Idle, now)],
        }
    }

    /// Run one poll cycle: probe, evaluate, and send the resulting heartbeats.
    pub async fn cycle(&mut self, now: DateTime<Utc>) -> Result<(), TrackerError> {
        let idle_seconds = self.probe.seconds_since_last_input()?;
        debug!("Seconds since last input: {:.3}", idle_seconds);

        let pulsetime = self.settings.pulsetime();
        for heartbeat in self.evaluate(now, idle_seconds) {
            self.store
                .heartbeat(&self.bucket, heartbeat, pulsetime, true)
                .await?;
        }
        Ok(())
    }

    /// Create the bucket and poll until cancelled, orphaned, or a fatal error.
    pub async fn run(&mut self, cancel: &CancellationToken) -> Result<StopReason, TrackerError> {
        let result = self.run_loop(cancel).await;
        match &result {
            Ok(StopReason::Cancelled) => info!("AFK watcher stopped"),
            Ok(StopReason::ParentExited) => info!("AFK watcher stopped because parent process exited"),
            Err(e) => error!("AFK watcher stopped: {}", e),
        }
        result
    }

    async fn run_loop(&mut self, cancel: &CancellationToken) -> Result<StopReason, TrackerError> {
        self.store
            .create_bucket(&self.bucket, EVENT_TYPE, true)
            .await?;

        info!(
            "Watching idle time: timeout={:?}, poll interval={:?}, bucket={}",
            self.settings.timeout(),
            self.settings.poll_interval(),
            self.bucket
        );

        loop {
            if cancel.is_cancelled() {
                return Ok(StopReason::Cancelled);
            }
            if self.orphan_check.is_some_and(|orphaned| orphaned()) {
                return Ok(StopReason::ParentExited);
            }

            self.cycle(Utc::now()).await?;

            tokio::select! {
                _ = cancel.cancelled() => return Ok(StopReason::Cancelled),
                _ = tokio::time::sleep(self.settings.poll_interval()) => {}
            }
        }
    }
}

/// Whether this process has been re-parented to init.
///
/// Every Unix hands orphans to pid 1, so the BSDs get the same check as
/// macOS and Linux. Under a subreaper the new parent is not pid 1 and the
/// exit goes unnoticed.
#[cfg(unix)]
pub fn parent_exited() -> bool {
    std::os::unix::process::parent_id() == 1
}

#[cfg(not(unix))]
pub fn parent_exited() -> bool {
    false
}

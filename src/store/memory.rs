//! In-process event store used for dry runs.

use async_trait::async_trait;
use std::collections::HashMap;
use tracing::debug;

use super::{EventStore, StoreError};
use crate::heartbeat::Heartbeat;

#[derive(Debug, Default)]
struct Bucket {
    event_type: String,
    events: Vec<Heartbeat>,
}

/// Keeps buckets in memory and merges heartbeats the way the event server does.
#[derive(Debug, Default)]
pub struct MemoryStore {
    buckets: HashMap<String, Bucket>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored events of `bucket`, oldest first.
    pub fn events(&self, bucket: &str) -> &[Heartbeat] {
        self.buckets
            .get(bucket)
            .map(|b| b.events.as_slice())
            .unwrap_or(&[])
    }

    pub fn event_type(&self, bucket: &str) -> Option<&str> {
        self.buckets.get(bucket).map(|b| b.event_type.as_str())
    }
}

#[async_trait]
impl EventStore for MemoryStore {
    async fn create_bucket(
        &mut self,
        bucket: &str,
        event_type: &str,
        _queued: bool,
    ) -> Result<(), StoreError> {
        self.buckets
            .entry(bucket.to_string())
            .or_insert_with(|| Bucket {
                event_type: event_type.to_string(),
                events: Vec::new(),
            });
        Ok(())
    }

    async fn heartbeat(
        &mut self,
        bucket: &str,
        event: Heartbeat,
        pulsetime: f64,
        _queued: bool,
    ) -> Result<(), StoreError> {
        let events = &mut self
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| StoreError::UnknownBucket(bucket.to_string()))?
            .events;

        match events.last().and_then(|last| last.merge(&event, pulsetime)) {
            Some(merged) => {
                debug!("Extended {} span to {:.3}s", merged.status(), merged.duration);
                if let Some(last) = events.last_mut() {
                    *last = merged;
                }
            }
            None => {
                debug!("New {} span at {}", event.status(), event.timestamp);
                events.push(event);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heartbeat::Status;
    use chrono::{TimeZone, Utc};

    fn at(secs: i64) -> chrono::DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[tokio::test]
    async fn heartbeat_requires_bucket() {
        let mut store = MemoryStore::new();
        let err = store
            .heartbeat("afk", Heartbeat::new(Status::Active, at(0)), 65.0, true)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::UnknownBucket(_)));
    }

    #[tokio::test]
    async fn create_bucket_is_idempotent() {
        let mut store = MemoryStore::new();
        store.create_bucket("afk", "afkstatus", true).await.unwrap();
        store
            .heartbeat("afk", Heartbeat::new(Status::Active, at(0)), 65.0, true)
            .await
            .unwrap();
        store.create_bucket("afk", "other", true).await.unwrap();

        assert_eq!(store.event_type("afk"), Some("afkstatus"));
        assert_eq!(store.events("afk").len(), 1);
    }

    #[tokio::test]
    async fn coalesces_pulses_into_spans() {
        let mut store = MemoryStore::new();
        store.create_bucket("afk", "afkstatus", true).await.unwrap();

        for (status, secs) in [
            (Status::Active, 0),
            (Status::Active, 5),
            (Status::Active, 10),
            (Status::Idle, 10),
            (Status::Idle, 70),
        ] {
            store
                .heartbeat("afk", Heartbeat::new(status, at(secs)), 65.0, true)
                .await
                .unwrap();
        }

        let events = store.events("afk");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].status(), Status::Active);
        assert_eq!(events[0].duration, 10.0);
        assert_eq!(events[1].status(), Status::Idle);
        assert_eq!(events[1].duration, 60.0);
    }

    #[tokio::test]
    async fn huge_pulsetime_keeps_one_span() {
        let mut store = MemoryStore::new();
        store.create_bucket("afk", "afkstatus", true).await.unwrap();

        for secs in [0, 5] {
            store
                .heartbeat("afk", Heartbeat::new(Status::Active, at(secs)), 1e13, true)
                .await
                .unwrap();
        }

        let events = store.events("afk");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].duration, 5.0);
    }
}

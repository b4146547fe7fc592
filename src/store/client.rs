//! HTTP client for an ActivityWatch-compatible event server.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use sysinfo::System;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::spool::{QueuedRequest, Spool};
use super::{EventStore, StoreError};
use crate::heartbeat::Heartbeat;

/// Upper bound on requests kept in the spool while the server is down.
const SPOOL_CAPACITY: usize = 10_000;

/// Delay before the first replay of a spool the server refused.
const MIN_REPLAY_BACKOFF: Duration = Duration::from_secs(1);
const MAX_REPLAY_BACKOFF: Duration = Duration::from_secs(60);

#[derive(Debug, Serialize)]
struct CreateBucketRequest<'a> {
    client: &'a str,
    #[serde(rename = "type")]
    event_type: &'a str,
    hostname: &'a str,
}

/// Event server client.
///
/// Unqueued requests are sent in-line with retries. Queued requests are
/// appended to an on-disk spool and return at once; a background task
/// replays the spool in order and keeps it while the server is unreachable.
pub struct ServerClient {
    transport: Arc<Transport>,
    retry_attempts: u32,
    spool: Arc<Mutex<Spool>>,
    wake: Arc<Notify>,
    shutdown: CancellationToken,
    replay: Option<JoinHandle<()>>,
}

impl ServerClient {
    /// Create a client for `base_url`, spooling queued requests under
    /// `queue_dir/<client_name>.jsonl`.
    ///
    /// Starts the replay task, so it must be called inside a Tokio runtime.
    pub fn new(
        base_url: &str,
        client_name: &str,
        queue_dir: &Path,
        request_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let client = Client::builder().timeout(request_timeout).build()?;
        let spool = Spool::open(queue_dir, client_name, SPOOL_CAPACITY)?;

        info!(
            "Event server client initialized: url={}, queued={}",
            base_url,
            spool.len()
        );

        let transport = Arc::new(Transport {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            client_name: client_name.to_string(),
            hostname: hostname(),
        });
        let spool = Arc::new(Mutex::new(spool));
        let wake = Arc::new(Notify::new());
        let shutdown = CancellationToken::new();

        let replay = tokio::spawn(replay_loop(
            transport.clone(),
            spool.clone(),
            wake.clone(),
            shutdown.clone(),
        ));

        Ok(Self {
            transport,
            retry_attempts: 3,
            spool,
            wake,
            shutdown,
            replay: Some(replay),
        })
    }

    /// Set the number of attempts for each unqueued request.
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts.max(1);
        self
    }

    /// Number of requests waiting in the spool.
    pub fn pending(&self) -> usize {
        lock(&self.spool).len()
    }

    /// Wait up to `timeout` for the spool to empty. Returns whether it did.
    pub async fn flush(&self, timeout: Duration) -> bool {
        self.wake.notify_one();
        let drained = async {
            while self.pending() > 0 {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        };
        tokio::time::timeout(timeout, drained).await.is_ok()
    }

    /// Stop the replay task after the request it is sending, if any.
    pub async fn close(mut self) {
        self.shutdown.cancel();
        if let Some(replay) = self.replay.take() {
            if let Err(e) = replay.await {
                warn!("Spool replay task ended abnormally: {}", e);
            }
        }
    }

    /// Send `request` with exponential backoff on transient errors.
    async fn send(&self, request: &QueuedRequest) -> Result<(), StoreError> {
        let mut last_error = None;

        for attempt in 0..self.retry_attempts {
            if attempt > 0 {
                let delay = Duration::from_millis(100 * 2u64.pow(attempt));
                debug!("Retry attempt {} after {:?}", attempt + 1, delay);
                tokio::time::sleep(delay).await;
            }

            match self.transport.send(request).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() => {
                    debug!("Request attempt {} failed: {}", attempt + 1, e);
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| StoreError::Transport("request failed with no error".into())))
    }

    /// Send now, or hand the request to the spool when `queued` is set.
    async fn submit(&mut self, request: QueuedRequest, queued: bool) -> Result<(), StoreError> {
        if !queued {
            return self.send(&request).await;
        }

        lock(&self.spool).push(request)?;
        self.wake.notify_one();
        Ok(())
    }
}

impl Drop for ServerClient {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[async_trait]
impl EventStore for ServerClient {
    async fn create_bucket(
        &mut self,
        bucket: &str,
        event_type: &str,
        queued: bool,
    ) -> Result<(), StoreError> {
        let request = QueuedRequest::CreateBucket {
            bucket: bucket.to_string(),
            event_type: event_type.to_string(),
        };
        self.submit(request, queued).await?;
        info!("Bucket {} registered (type {})", bucket, event_type);
        Ok(())
    }

    async fn heartbeat(
        &mut self,
        bucket: &str,
        event: Heartbeat,
        pulsetime: f64,
        queued: bool,
    ) -> Result<(), StoreError> {
        let request = QueuedRequest::Heartbeat {
            bucket: bucket.to_string(),
            event,
            pulsetime,
        };
        self.submit(request, queued).await
    }
}

/// HTTP side of the client, shared with the replay task.
struct Transport {
    client: Client,
    base_url: String,
    client_name: String,
    hostname: String,
}

impl Transport {
    async fn send(&self, request: &QueuedRequest) -> Result<(), StoreError> {
        let response = match request {
            QueuedRequest::CreateBucket { bucket, event_type } => {
                let body = CreateBucketRequest {
                    client: &self.client_name,
                    event_type,
                    hostname: &self.hostname,
                };
                self.client
                    .post(format!("{}/api/0/buckets/{}", self.base_url, bucket))
                    .json(&body)
                    .send()
                    .await?
            }
            QueuedRequest::Heartbeat {
                bucket,
                event,
                pulsetime,
            } => {
                self.client
                    .post(format!("{}/api/0/buckets/{}/heartbeat", self.base_url, bucket))
                    .query(&[("pulsetime", pulsetime)])
                    .json(event)
                    .send()
                    .await?
            }
        };

        let status = response.status();
        // 304 means the bucket already exists
        if status.is_success() || status == StatusCode::NOT_MODIFIED {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(StoreError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

/// Replay the spool whenever a request is queued, backing off while the
/// server stays unreachable.
async fn replay_loop(
    transport: Arc<Transport>,
    spool: Arc<Mutex<Spool>>,
    wake: Arc<Notify>,
    shutdown: CancellationToken,
) {
    let mut backoff = MIN_REPLAY_BACKOFF;
    let mut offline = false;

    loop {
        let retry_in = match drain(&transport, &spool, &shutdown).await {
            Ok(None) => {
                if offline {
                    info!("Event server reachable again");
                }
                offline = false;
                backoff = MIN_REPLAY_BACKOFF;
                None
            }
            Ok(Some(e)) => {
                if !offline {
                    warn!("Event server unavailable, queueing requests: {}", e);
                }
                offline = true;
                let delay = backoff;
                backoff = (backoff * 2).min(MAX_REPLAY_BACKOFF);
                Some(delay)
            }
            Err(e) => {
                error!("Failed to rewrite heartbeat spool: {}", e);
                Some(MAX_REPLAY_BACKOFF)
            }
        };

        let retry = async {
            match retry_in {
                Some(delay) => tokio::time::sleep(delay).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = wake.notified() => {}
            _ = retry => {}
        }
    }

    debug!("Spool replay stopped with {} requests queued", lock(&spool).len());
}

/// Send spooled requests in order. Returns the transient error that stopped
/// the replay, or `None` once the spool is empty.
async fn drain(
    transport: &Transport,
    spool: &Mutex<Spool>,
    shutdown: &CancellationToken,
) -> Result<Option<StoreError>, StoreError> {
    let mut sent = 0usize;

    let outcome = loop {
        if shutdown.is_cancelled() {
            break None;
        }
        let next = lock(spool).front().cloned();
        let Some(request) = next else {
            break None;
        };

        match transport.send(&request).await {
            Ok(()) => {}
            Err(e) if e.is_transient() => break Some(e),
            Err(e) => warn!("Dropping queued request rejected by server: {}", e),
        }

        let mut guard = lock(spool);
        // a full spool may have dropped this request while it was in flight
        if guard.front() == Some(&request) {
            guard.pop_front();
        }
        sent += 1;
    };

    if sent > 0 {
        let guard = lock(spool);
        guard.persist()?;
        info!("Flushed {} queued requests, {} remaining", sent, guard.len());
    }
    Ok(outcome)
}

fn lock(spool: &Mutex<Spool>) -> MutexGuard<'_, Spool> {
    spool.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Host name reported with the bucket.
fn hostname() -> String {
    System::host_name()
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

//! On-disk JSONL queue of requests the event server has not accepted yet.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::heartbeat::Heartbeat;

/// A request waiting to be replayed against the event server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "request", rename_all = "snake_case")]
pub enum QueuedRequest {
    CreateBucket {
        bucket: String,
        event_type: String,
    },
    Heartbeat {
        bucket: String,
        event: Heartbeat,
        pulsetime: f64,
    },
}

/// FIFO of pending requests, mirrored to `<dir>/<name>.jsonl`.
pub struct Spool {
    path: PathBuf,
    entries: VecDeque<QueuedRequest>,
    capacity: usize,
}

impl Spool {
    /// Open the spool for `name`, loading requests left over from a previous run.
    pub fn open(dir: &Path, name: &str, capacity: usize) -> io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("{}.jsonl", sanitize(name)));

        let mut entries = VecDeque::new();
        if path.exists() {
            let reader = BufReader::new(File::open(&path)?);
            for (idx, line) in reader.lines().enumerate() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<QueuedRequest>(&line) {
                    Ok(request) => entries.push_back(request),
                    Err(e) => warn!("Skipping corrupt spool line {} in {:?}: {}", idx + 1, path, e),
                }
            }
        }

        if !entries.is_empty() {
            debug!("Loaded {} queued requests from {:?}", entries.len(), path);
        }

        let mut spool = Self {
            path,
            entries,
            capacity: capacity.max(1),
        };
        if spool.entries.len() > spool.capacity {
            spool.trim_to_capacity();
            spool.persist()?;
        }
        Ok(spool)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn front(&self) -> Option<&QueuedRequest> {
        self.entries.front()
    }

    /// Remove the oldest request from memory. Call [`Spool::persist`] afterwards.
    pub fn pop_front(&mut self) -> Option<QueuedRequest> {
        self.entries.pop_front()
    }

    /// Append a request, dropping the oldest one when the spool is full.
    pub fn push(&mut self, request: QueuedRequest) -> io::Result<()> {
        let line = serde_json::to_string(&request)?;
        self.entries.push_back(request);
        if self.entries.len() > self.capacity {
            self.trim_to_capacity();
            return self.persist();
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let mut writer = BufWriter::new(file);
        writeln!(writer, "{}", line)?;
        writer.flush()
    }

    /// Rewrite the spool file from the in-memory queue.
    pub fn persist(&self) -> io::Result<()> {
        if self.entries.is_empty() {
            return match std::fs::remove_file(&self.path) {
                Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
                _ => Ok(()),
            };
        }

        let tmp = self.path.with_extension("jsonl.tmp");
        {
            let mut writer = BufWriter::new(File::create(&tmp)?);
            for entry in &self.entries {
                writeln!(writer, "{}", serde_json::to_string(entry)?)?;
            }
            writer.flush()?;
        }
        std::fs::rename(&tmp, &self.path)
    }

    fn trim_to_capacity(&mut self) {
        let excess = self.entries.len().saturating_sub(self.capacity);
        if excess > 0 {
            warn!("Heartbeat spool full, dropping {} oldest requests", excess);
            self.entries.drain(..excess);
        }
    }
}

/// Keep client names usable as file names.
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heartbeat::Status;
    use chrono::{TimeZone, Utc};

    fn beat(secs: i64) -> QueuedRequest {
        QueuedRequest::Heartbeat {
            bucket: "afk".into(),
            event: Heartbeat::new(Status::Active, Utc.timestamp_opt(secs, 0).unwrap()),
            pulsetime: 65.0,
        }
    }

    #[test]
    fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut spool = Spool::open(dir.path(), "afk", 10).unwrap();
            spool
                .push(QueuedRequest::CreateBucket {
                    bucket: "afk".into(),
                    event_type: "afkstatus".into(),
                })
                .unwrap();
            spool.push(beat(1)).unwrap();
        }

        let spool = Spool::open(dir.path(), "afk", 10).unwrap();
        assert_eq!(spool.len(), 2);
        assert!(matches!(spool.front(), Some(QueuedRequest::CreateBucket { .. })));
    }

    #[test]
    fn persist_after_drain_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut spool = Spool::open(dir.path(), "afk", 10).unwrap();
        spool.push(beat(1)).unwrap();
        spool.push(beat(2)).unwrap();

        assert_eq!(spool.pop_front(), Some(beat(1)));
        spool.persist().unwrap();
        assert_eq!(Spool::open(dir.path(), "afk", 10).unwrap().len(), 1);

        spool.pop_front();
        spool.persist().unwrap();
        assert!(!dir.path().join("afk.jsonl").exists());
    }

    #[test]
    fn drops_oldest_when_full() {
        let dir = tempfile::tempdir().unwrap();
        let mut spool = Spool::open(dir.path(), "afk", 2).unwrap();
        for secs in 1..=3 {
            spool.push(beat(secs)).unwrap();
        }

        assert_eq!(spool.len(), 2);
        assert_eq!(spool.front(), Some(&beat(2)));
        assert_eq!(Spool::open(dir.path(), "afk", 2).unwrap().len(), 2);
    }

    #[test]
    fn skips_corrupt_lines() {
        let dir = tempfile::tempdir().unwrap();
        let line = serde_json::to_string(&beat(1)).unwrap();
        std::fs::write(dir.path().join("afk.jsonl"), format!("{line}\n{{not json\n\n")).unwrap();

        let spool = Spool::open(dir.path(), "afk", 10).unwrap();
        assert_eq!(spool.len(), 1);
    }

    #[test]
    fn sanitizes_bucket_file_name() {
        assert_eq!(sanitize("afk/host name"), "afk_host_name");
        assert_eq!(sanitize("aw-watcher-afk_laptop"), "aw-watcher-afk_laptop");
    }
}

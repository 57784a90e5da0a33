//! Per-queue append-only message logs.
//!
//! Each queue is one file of JSON lines: full message records plus ack
//! tombstones (`{"ack": "<message id>"}`). The log is the durability story -
//! a published record survives unclean termination, and replay after restart
//! reconstructs every unacked message in insertion order. Compaction rewrites
//! a log atomically once the acked fraction crosses a threshold.

use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use trinity_models::Message;

use crate::fs_util;

/// Rewrite a log once more than half of at least this many records are dead.
const COMPACT_MIN_RECORDS: usize = 64;
const COMPACT_DEAD_FRACTION: f64 = 0.5;

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum LogLine {
    Ack { ack: String },
    Message(Message),
}

/// Append-only message log store, one file per queue.
pub struct BusLog {
    dir: PathBuf,
    /// Serializes append/compact per process. Cross-process locking is out of
    /// scope: the bus has a single owning process.
    write_lock: Mutex<()>,
}

impl BusLog {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    fn log_path(&self, queue: &str) -> PathBuf {
        self.dir.join(format!("{queue}.log"))
    }

    /// Durably append one message record. Returns after fsync.
    pub fn append(&self, message: &Message) -> Result<()> {
        let _guard = self.write_lock.lock();
        let line = serde_json::to_string(message)?;
        fs_util::append_line(&self.log_path(&message.queue), &line)
    }

    /// Durably append an ack tombstone for a message id.
    pub fn append_ack(&self, queue: &str, message_id: &str) -> Result<()> {
        let _guard = self.write_lock.lock();
        let line = serde_json::to_string(&LogLine::Ack {
            ack: message_id.to_string(),
        })?;
        fs_util::append_line(&self.log_path(queue), &line)
    }

    /// Replay a queue log: all unacked messages in insertion order, plus the
    /// total record count (for compaction decisions).
    pub fn load(&self, queue: &str) -> Result<Vec<Message>> {
        let path = self.log_path(queue);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err).context(format!("reading {}", path.display())),
        };

        let mut order: Vec<String> = Vec::new();
        let mut live: HashMap<String, Message> = HashMap::new();
        for (lineno, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let parsed: LogLine = serde_json::from_str(line).with_context(|| {
                format!("corrupt bus log line {} in {}", lineno + 1, path.display())
            })?;
            match parsed {
                LogLine::Ack { ack } => {
                    live.remove(&ack);
                }
                LogLine::Message(message) => {
                    if message.acked {
                        continue;
                    }
                    if !live.contains_key(&message.id) {
                        order.push(message.id.clone());
                    }
                    live.insert(message.id.clone(), message);
                }
            }
        }

        Ok(order.into_iter().filter_map(|id| live.remove(&id)).collect())
    }

    /// Queues that currently have a log file.
    pub fn queues(&self) -> Result<Vec<String>> {
        let mut queues = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Some(queue) = name.strip_suffix(".log") {
                queues.push(queue.to_string());
            }
        }
        queues.sort();
        Ok(queues)
    }

    /// Rewrite the log with only live records when the dead fraction is high.
    /// Returns true when a rewrite happened.
    pub fn maybe_compact(&self, queue: &str) -> Result<bool> {
        let _guard = self.write_lock.lock();
        let path = self.log_path(queue);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(err) => return Err(err.into()),
        };

        let total = content.lines().filter(|l| !l.trim().is_empty()).count();
        if total < COMPACT_MIN_RECORDS {
            return Ok(false);
        }

        // Re-derive the live set without holding parsed lines twice.
        drop(content);
        let live = self.load_unlocked(&path)?;
        let dead = total.saturating_sub(live.len());
        if (dead as f64) < (total as f64) * COMPACT_DEAD_FRACTION {
            return Ok(false);
        }

        let mut rewritten = String::new();
        for message in &live {
            rewritten.push_str(&serde_json::to_string(message)?);
            rewritten.push('\n');
        }
        fs_util::atomic_write(&path, rewritten.as_bytes())?;
        tracing::debug!(queue, total, live = live.len(), "Compacted bus log");
        Ok(true)
    }

    fn load_unlocked(&self, path: &Path) -> Result<Vec<Message>> {
        let queue = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        // load() takes no lock; safe to call with write_lock held.
        self.load(&queue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn setup() -> (BusLog, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let log = BusLog::open(dir.path().join("bus")).unwrap();
        (log, dir)
    }

    fn msg(queue: &str, priority: i64, tag: &str) -> Message {
        Message::new(queue, serde_json::json!({ "tag": tag }), priority)
    }

    #[test]
    fn test_append_and_load_in_order() {
        let (log, _dir) = setup();
        let a = msg("q", 1, "a");
        let b = msg("q", 3, "b");
        log.append(&a).unwrap();
        log.append(&b).unwrap();

        let loaded = log.load("q").unwrap();
        assert_eq!(loaded.len(), 2);
        // Insertion order, not priority order - ordering is the bus's job.
        assert_eq!(loaded[0].id, a.id);
        assert_eq!(loaded[1].id, b.id);
    }

    #[test]
    fn test_ack_tombstone_removes_message() {
        let (log, _dir) = setup();
        let a = msg("q", 1, "a");
        let b = msg("q", 1, "b");
        log.append(&a).unwrap();
        log.append(&b).unwrap();
        log.append_ack("q", &a.id).unwrap();

        let loaded = log.load("q").unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, b.id);
    }

    #[test]
    fn test_load_missing_queue_is_empty() {
        let (log, _dir) = setup();
        assert!(log.load("nothing").unwrap().is_empty());
    }

    #[test]
    fn test_queues_listing() {
        let (log, _dir) = setup();
        log.append(&msg("alpha", 0, "x")).unwrap();
        log.append(&msg("beta", 0, "y")).unwrap();
        assert_eq!(log.queues().unwrap(), vec!["alpha", "beta"]);
    }

    #[test]
    fn test_compaction_drops_acked_records() {
        let (log, _dir) = setup();
        let mut ids = Vec::new();
        for i in 0..COMPACT_MIN_RECORDS {
            let m = msg("q", 0, &format!("m{i}"));
            ids.push(m.id.clone());
            log.append(&m).unwrap();
        }
        for id in &ids {
            log.append_ack("q", id).unwrap();
        }

        assert!(log.maybe_compact("q").unwrap());
        let content = fs::read_to_string(log.log_path("q")).unwrap();
        assert!(content.is_empty());
        assert!(log.load("q").unwrap().is_empty());
    }

    #[test]
    fn test_compaction_skips_mostly_live_log() {
        let (log, _dir) = setup();
        for i in 0..COMPACT_MIN_RECORDS {
            log.append(&msg("q", 0, &format!("m{i}"))).unwrap();
        }
        assert!(!log.maybe_compact("q").unwrap());
        assert_eq!(log.load("q").unwrap().len(), COMPACT_MIN_RECORDS);
    }
}

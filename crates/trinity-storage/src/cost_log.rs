//! Append-only cost ledger log.
//!
//! One JSON line per `CostEntry` in `cost/ledger.log`. The single logical
//! writer lives in trinity-core's ledger; this layer only appends durably
//! and replays.

use anyhow::{Context, Result};
use parking_lot::Mutex;
use std::fs;
use std::path::{Path, PathBuf};
use trinity_models::CostEntry;

use crate::fs_util;

const LEDGER_FILE: &str = "ledger.log";

pub struct CostLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl CostLog {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            path: dir.join(LEDGER_FILE),
            write_lock: Mutex::new(()),
        })
    }

    /// Durably append one entry. Returns after fsync.
    pub fn append(&self, entry: &CostEntry) -> Result<()> {
        let _guard = self.write_lock.lock();
        let line = serde_json::to_string(entry)?;
        fs_util::append_line(&self.path, &line)
    }

    /// Replay the full ledger in append order.
    pub fn load(&self) -> Result<Vec<CostEntry>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err).context(format!("reading {}", self.path.display())),
        };
        let mut entries = Vec::new();
        for (lineno, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let entry: CostEntry = serde_json::from_str(line)
                .with_context(|| format!("corrupt ledger line {}", lineno + 1))?;
            entries.push(entry);
        }
        Ok(entries)
    }
}

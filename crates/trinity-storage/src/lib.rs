//! Trinity Storage - Low-level persistence layer.
//!
//! Owns the on-disk `state/` layout and nothing above it:
//!
//! ```text
//! state/bus/<queue>.log                       append-only message log
//! state/workflows/<id>/meta.json              workflow summary
//! state/workflows/<id>/checkpoints/<n>.json   ordered checkpoints
//! state/patterns/<id>.json + <id>.emb         pattern and embedding sidecar
//! state/reasoning/<correlation_id>/<agent>.md reasoning chains
//! state/cost/ledger.log                       append-only cost entries
//! ```
//!
//! Byte-level and file-level APIs only; typed orchestration wrappers live in
//! trinity-core.

pub mod bus_log;
pub mod cost_log;
mod fs_util;
pub mod paths;
pub mod pattern_files;
pub mod reasoning_store;
pub mod workflow_store;

use anyhow::Result;
use std::path::{Path, PathBuf};

pub use bus_log::BusLog;
pub use cost_log::CostLog;
pub use pattern_files::PatternFiles;
pub use reasoning_store::{ReasoningDoc, ReasoningFrontmatter, ReasoningStore};
pub use workflow_store::{CheckpointRead, WorkflowStore};

/// Central storage manager that initializes all storage subsystems under one
/// state root.
pub struct Storage {
    root: PathBuf,
    pub bus: BusLog,
    pub workflows: WorkflowStore,
    pub patterns: PatternFiles,
    pub reasoning: ReasoningStore,
    pub cost: CostLog,
}

impl Storage {
    /// Open (or create) the state directory and every subsystem under it.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;

        let bus = BusLog::open(paths::bus_dir(&root))?;
        let workflows = WorkflowStore::open(paths::workflows_dir(&root))?;
        let patterns = PatternFiles::open(paths::patterns_dir(&root))?;
        let reasoning = ReasoningStore::open(paths::reasoning_dir(&root))?;
        let cost = CostLog::open(paths::cost_dir(&root))?;

        Ok(Self {
            root,
            bus,
            workflows,
            patterns,
            reasoning,
            cost,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

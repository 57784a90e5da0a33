//! Workflow summaries and ordered checkpoint files.
//!
//! Layout per workflow:
//!
//! ```text
//! workflows/<id>/meta.json
//! workflows/<id>/checkpoints/<n>.json
//! ```
//!
//! Checkpoint writes are atomic (temp file + rename) so a crash mid-write
//! leaves no partially visible checkpoint. Reads validate the embedded
//! checksum and report corruption as a distinct outcome rather than an error,
//! because corruption is a state the caller must handle (workflow → FAILED),
//! not a storage fault.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use trinity_models::{Checkpoint, Workflow, WorkflowState};

use crate::fs_util;

pub struct WorkflowStore {
    dir: PathBuf,
}

/// Outcome of reading one checkpoint file.
#[derive(Debug)]
pub enum CheckpointRead {
    Valid(Box<Checkpoint>),
    /// File exists and parses but the checksum does not validate.
    Corrupt { checkpoint_id: String },
}

impl WorkflowStore {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn workflow_dir(&self, workflow_id: &str) -> PathBuf {
        self.dir.join(workflow_id)
    }

    fn meta_path(&self, workflow_id: &str) -> PathBuf {
        self.workflow_dir(workflow_id).join("meta.json")
    }

    fn checkpoints_dir(&self, workflow_id: &str) -> PathBuf {
        self.workflow_dir(workflow_id).join("checkpoints")
    }

    fn checkpoint_path(&self, workflow_id: &str, index: u64) -> PathBuf {
        self.checkpoints_dir(workflow_id).join(format!("{index}.json"))
    }

    /// Persist the workflow summary atomically.
    pub fn put_workflow(&self, workflow: &Workflow) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(workflow)?;
        fs_util::atomic_write(&self.meta_path(&workflow.id), &bytes)
    }

    pub fn get_workflow(&self, workflow_id: &str) -> Result<Option<Workflow>> {
        let path = self.meta_path(workflow_id);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err).context(format!("reading {}", path.display())),
        };
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    pub fn list_workflows(&self) -> Result<Vec<Workflow>> {
        let mut workflows = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let id = entry.file_name().to_string_lossy().into_owned();
            if let Some(workflow) = self.get_workflow(&id)? {
                workflows.push(workflow);
            }
        }
        workflows.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(workflows)
    }

    /// Workflows that can be offered for resume on startup.
    pub fn list_resumable(&self) -> Result<Vec<Workflow>> {
        Ok(self
            .list_workflows()?
            .into_iter()
            .filter(|w| {
                matches!(
                    w.state,
                    WorkflowState::Running | WorkflowState::Checkpointed | WorkflowState::Paused
                )
            })
            .collect())
    }

    /// Next checkpoint index for a workflow (count of existing files).
    pub fn next_checkpoint_index(&self, workflow_id: &str) -> Result<u64> {
        Ok(self.checkpoint_indices(workflow_id)?.last().map_or(0, |n| n + 1))
    }

    /// Atomically write a checkpoint at the next index. Returns the index.
    pub fn put_checkpoint(&self, checkpoint: &Checkpoint) -> Result<u64> {
        let index = self.next_checkpoint_index(&checkpoint.workflow_id)?;
        let bytes = serde_json::to_vec_pretty(checkpoint)?;
        fs_util::atomic_write(&self.checkpoint_path(&checkpoint.workflow_id, index), &bytes)?;
        Ok(index)
    }

    /// Sorted checkpoint indices present on disk.
    pub fn checkpoint_indices(&self, workflow_id: &str) -> Result<Vec<u64>> {
        let dir = self.checkpoints_dir(workflow_id);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut indices = Vec::new();
        for entry in entries {
            let name = entry?.file_name().to_string_lossy().into_owned();
            if let Some(stem) = name.strip_suffix(".json")
                && let Ok(index) = stem.parse::<u64>()
            {
                indices.push(index);
            }
        }
        indices.sort_unstable();
        Ok(indices)
    }

    /// Read and checksum-validate one checkpoint.
    pub fn read_checkpoint(&self, workflow_id: &str, index: u64) -> Result<Option<CheckpointRead>> {
        let path = self.checkpoint_path(workflow_id, index);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err).context(format!("reading {}", path.display())),
        };
        let checkpoint: Checkpoint = match serde_json::from_slice(&bytes) {
            Ok(checkpoint) => checkpoint,
            Err(_) => {
                // Unparseable counts as corrupt, not as a storage fault.
                return Ok(Some(CheckpointRead::Corrupt {
                    checkpoint_id: format!("{workflow_id}/{index}"),
                }));
            }
        };
        if !checkpoint.verify_checksum() {
            return Ok(Some(CheckpointRead::Corrupt {
                checkpoint_id: checkpoint.id,
            }));
        }
        Ok(Some(CheckpointRead::Valid(Box::new(checkpoint))))
    }

    /// Latest checkpoint for a workflow, if any.
    pub fn read_latest_checkpoint(&self, workflow_id: &str) -> Result<Option<CheckpointRead>> {
        match self.checkpoint_indices(workflow_id)?.last() {
            Some(&index) => self.read_checkpoint(workflow_id, index),
            None => Ok(None),
        }
    }

    /// Garbage-collect all but the newest `keep` checkpoints. Returns the
    /// number of files removed. The workflow summary is never touched.
    pub fn prune_checkpoints(&self, workflow_id: &str, keep: usize) -> Result<usize> {
        let indices = self.checkpoint_indices(workflow_id)?;
        if indices.len() <= keep {
            return Ok(0);
        }
        let evict = indices.len() - keep;
        for &index in indices.iter().take(evict) {
            fs::remove_file(self.checkpoint_path(workflow_id, index))?;
        }
        Ok(evict)
    }
}

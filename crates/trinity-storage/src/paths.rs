//! Path resolution for the Trinity state directory.
//!
//! This is the canonical source for state layout paths. Re-exported by
//! trinity-core for convenience.

use anyhow::Result;
use std::path::{Path, PathBuf};

const TRINITY_DIR: &str = ".trinity";

/// Environment variable to override the state root.
const TRINITY_DIR_ENV: &str = "TRINITY_DIR";

/// Resolve the Trinity state root.
/// Priority: TRINITY_DIR env var > ~/.trinity > ./.trinity
pub fn resolve_trinity_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(TRINITY_DIR_ENV)
        && !dir.trim().is_empty()
    {
        return Ok(PathBuf::from(dir));
    }
    if let Some(home) = std::env::var_os("HOME") {
        return Ok(PathBuf::from(home).join(TRINITY_DIR));
    }
    Ok(PathBuf::from(TRINITY_DIR))
}

/// Ensure the state root exists and return its `state/` directory.
pub fn ensure_state_dir() -> Result<PathBuf> {
    let dir = resolve_trinity_dir()?.join("state");
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

pub fn bus_dir(root: &Path) -> PathBuf {
    root.join("bus")
}

pub fn workflows_dir(root: &Path) -> PathBuf {
    root.join("workflows")
}

pub fn patterns_dir(root: &Path) -> PathBuf {
    root.join("patterns")
}

pub fn reasoning_dir(root: &Path) -> PathBuf {
    root.join("reasoning")
}

pub fn cost_dir(root: &Path) -> PathBuf {
    root.join("cost")
}

//! Command-backed implementations of the foundation seams.
//!
//! The orchestration tests use scripted implementations; these shell out for
//! real runs. The test command is expected to fail fast (non-zero exit on
//! the first failure).

use super::{ConstitutionScanner, RepoProbe, TestStatus, TestSuiteRunner};
use anyhow::{Context, bail};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Runs a configurable shell command as the full test suite.
pub struct CommandTestRunner {
    pub program: String,
    pub args: Vec<String>,
    pub workdir: PathBuf,
}

impl CommandTestRunner {
    /// Default suite: `cargo test --workspace` in the repository root.
    pub fn cargo(workdir: PathBuf) -> Self {
        Self {
            program: "cargo".into(),
            args: vec!["test".into(), "--workspace".into()],
            workdir,
        }
    }
}

#[async_trait]
impl TestSuiteRunner for CommandTestRunner {
    async fn run(&self, timeout: Duration) -> anyhow::Result<TestStatus> {
        debug!(program = %self.program, "Running test suite");
        let child = Command::new(&self.program)
            .args(&self.args)
            .current_dir(&self.workdir)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("spawning test command '{}'", self.program))?;

        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) if output.status.success() => Ok(TestStatus::Passed),
            Ok(Ok(_)) => Ok(TestStatus::Failed),
            Ok(Err(err)) => Err(err).context("waiting for test command"),
            Err(_) => Ok(TestStatus::Timeout),
        }
    }
}

/// Scans tracked files for constitutional violation markers.
///
/// The constitution forbids committed escape hatches; the default marker set
/// catches the common ones. Each hit is reported as "path: marker".
pub struct MarkerScanner {
    pub workdir: PathBuf,
    pub markers: Vec<String>,
}

impl MarkerScanner {
    pub fn with_default_markers(workdir: PathBuf) -> Self {
        Self {
            workdir,
            markers: vec![
                "CONSTITUTION-VIOLATION".to_string(),
                "#[ignore] // foundation".to_string(),
            ],
        }
    }
}

#[async_trait]
impl ConstitutionScanner for MarkerScanner {
    async fn scan(&self) -> anyhow::Result<Vec<String>> {
        let output = Command::new("git")
            .args(["grep", "-n", "--no-color", "-F"])
            .args(self.markers.iter().flat_map(|m| ["-e".to_string(), m.clone()]))
            .current_dir(&self.workdir)
            .output()
            .await
            .context("running git grep for violation markers")?;

        // git grep exits 1 on no matches.
        if !output.status.success() && output.stdout.is_empty() {
            return Ok(Vec::new());
        }
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::to_string)
            .collect())
    }
}

/// Git-backed repository probe.
pub struct GitProbe {
    pub workdir: PathBuf,
}

impl GitProbe {
    async fn git(&self, args: &[&str]) -> anyhow::Result<String> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .await
            .with_context(|| format!("running git {args:?}"))?;
        if !output.status.success() {
            bail!(
                "git {:?} failed: {}",
                args,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl RepoProbe for GitProbe {
    async fn branch(&self) -> anyhow::Result<String> {
        self.git(&["rev-parse", "--abbrev-ref", "HEAD"]).await
    }

    async fn head(&self) -> anyhow::Result<String> {
        self.git(&["rev-parse", "HEAD"]).await
    }
}

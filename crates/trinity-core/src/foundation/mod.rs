//! Foundation Verifier - gates every execution attempt on repository health.
//!
//! Health means: the full test suite is green and the constitutional scan
//! reports zero violations. Results are cached for a short TTL keyed by
//! repository HEAD so one orchestration cycle never runs the suite twice.
//! An advisory lock file prevents interleaved verifications. The verifier
//! never mutates repository state.

pub mod runners;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use trinity_models::TrinityError;
use trinity_models::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    Passed,
    Failed,
    Timeout,
}

/// Structured health result returned by `verify`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoundationHealth {
    pub is_healthy: bool,
    pub branch: String,
    pub test_status: TestStatus,
    pub violation_count: usize,
    #[serde(default)]
    pub error_message: Option<String>,
}

/// Runs the full test suite. Implementations must fail fast on the first
/// failure and respect the deadline.
#[async_trait]
pub trait TestSuiteRunner: Send + Sync {
    async fn run(&self, timeout: Duration) -> anyhow::Result<TestStatus>;
}

/// Scans for constitutional violations; returns their descriptions.
#[async_trait]
pub trait ConstitutionScanner: Send + Sync {
    async fn scan(&self) -> anyhow::Result<Vec<String>>;
}

/// Read-only repository probe: current branch and HEAD commit.
#[async_trait]
pub trait RepoProbe: Send + Sync {
    async fn branch(&self) -> anyhow::Result<String>;
    async fn head(&self) -> anyhow::Result<String>;
}

#[derive(Debug, Clone)]
pub struct FoundationConfig {
    pub test_timeout: Duration,
    pub cache_ttl: Duration,
    /// Advisory lock file path; verifications serialize on it.
    pub lock_path: PathBuf,
}

struct CachedHealth {
    head: String,
    at_ms: i64,
    health: FoundationHealth,
}

pub struct FoundationVerifier {
    tests: Arc<dyn TestSuiteRunner>,
    scanner: Arc<dyn ConstitutionScanner>,
    repo: Arc<dyn RepoProbe>,
    config: FoundationConfig,
    cache: Mutex<Option<CachedHealth>>,
}

/// Removes the advisory lock file on drop.
struct LockGuard {
    path: PathBuf,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(err) = std::fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %err, "Failed to release foundation lock");
        }
    }
}

impl FoundationVerifier {
    pub fn new(
        tests: Arc<dyn TestSuiteRunner>,
        scanner: Arc<dyn ConstitutionScanner>,
        repo: Arc<dyn RepoProbe>,
        config: FoundationConfig,
    ) -> Self {
        Self {
            tests,
            scanner,
            repo,
            config,
            cache: Mutex::new(None),
        }
    }

    /// Verify foundation health, serving a cached result while HEAD is
    /// unchanged and the TTL is fresh.
    pub async fn verify(&self) -> Result<FoundationHealth> {
        let head = self
            .repo
            .head()
            .await
            .map_err(|e| TrinityError::TransientIo(e.to_string()))?;

        {
            let cache = self.cache.lock();
            if let Some(cached) = cache.as_ref()
                && cached.head == head
                && trinity_models::now_ms() - cached.at_ms
                    < self.config.cache_ttl.as_millis() as i64
            {
                return Ok(cached.health.clone());
            }
        }

        let _lock = self.acquire_lock().await?;
        let health = self.run_checks().await?;

        *self.cache.lock() = Some(CachedHealth {
            head,
            at_ms: trinity_models::now_ms(),
            health: health.clone(),
        });
        Ok(health)
    }

    /// Verify and fail with `BrokenFoundation` unless healthy. EXECUTOR calls
    /// this before any PENDING→RUNNING transition.
    pub async fn verify_for_execution(&self) -> Result<FoundationHealth> {
        let health = self.verify().await?;
        if !health.is_healthy {
            return Err(TrinityError::BrokenFoundation(
                health
                    .error_message
                    .clone()
                    .unwrap_or_else(|| "foundation unhealthy".to_string()),
            ));
        }
        Ok(health)
    }

    async fn run_checks(&self) -> Result<FoundationHealth> {
        let branch = self
            .repo
            .branch()
            .await
            .unwrap_or_else(|_| "unknown".to_string());

        let test_status = match self.tests.run(self.config.test_timeout).await {
            Ok(status) => status,
            Err(err) => {
                return Ok(FoundationHealth {
                    is_healthy: false,
                    branch,
                    test_status: TestStatus::Failed,
                    violation_count: 0,
                    error_message: Some(format!("test runner error: {err}")),
                });
            }
        };

        let violations = match self.scanner.scan().await {
            Ok(violations) => violations,
            Err(err) => {
                return Ok(FoundationHealth {
                    is_healthy: false,
                    branch,
                    test_status,
                    violation_count: 0,
                    error_message: Some(format!("constitution scan error: {err}")),
                });
            }
        };

        let is_healthy = test_status == TestStatus::Passed && violations.is_empty();
        let error_message = if is_healthy {
            None
        } else if test_status != TestStatus::Passed {
            Some(format!("test suite status: {test_status:?}"))
        } else {
            Some(format!("{} constitutional violations", violations.len()))
        };

        info!(
            healthy = is_healthy,
            branch = %branch,
            violations = violations.len(),
            "Foundation verified"
        );
        Ok(FoundationHealth {
            is_healthy,
            branch,
            test_status,
            violation_count: violations.len(),
            error_message,
        })
    }

    /// Create the advisory lock file exclusively, waiting briefly when
    /// another verification holds it.
    async fn acquire_lock(&self) -> Result<LockGuard> {
        if let Some(dir) = self.config.lock_path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| TrinityError::TransientIo(e.to_string()))?;
        }
        for _ in 0..50 {
            match std::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&self.config.lock_path)
            {
                Ok(_) => {
                    return Ok(LockGuard {
                        path: self.config.lock_path.clone(),
                    });
                }
                Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
                Err(err) => return Err(TrinityError::TransientIo(err.to_string())),
            }
        }
        Err(TrinityError::Timeout {
            scope: "foundation lock".into(),
            seconds: 5,
        })
    }

    /// Drop any cached result (e.g. after a merge).
    pub fn invalidate_cache(&self) {
        *self.cache.lock() = None;
    }
}

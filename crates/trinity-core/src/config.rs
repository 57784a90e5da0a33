//! Runtime configuration, layered env-over-defaults.

use std::path::PathBuf;
use trinity_models::TrinityError;
use trinity_models::error::Result;

pub const ENV_MAX_CONCURRENCY: &str = "TRINITY_MAX_CONCURRENCY";
pub const ENV_BUDGET_USD: &str = "TRINITY_BUDGET_USD";
pub const ENV_STORAGE_BACKEND: &str = "TRINITY_STORAGE_BACKEND";
pub const ENV_HITL_TIMEOUT_S: &str = "TRINITY_HITL_TIMEOUT_S";
pub const ENV_FOUNDATION_TIMEOUT_S: &str = "TRINITY_FOUNDATION_TIMEOUT_S";
pub const ENV_RETENTION_CHECKPOINTS: &str = "TRINITY_RETENTION_CHECKPOINTS";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Local,
    /// Accepted as a knob, rejected at bootstrap: this build persists locally.
    Remote,
}

#[derive(Debug, Clone)]
pub struct TrinityConfig {
    /// State root; `state/` lives directly underneath.
    pub state_dir: PathBuf,
    pub storage_backend: StorageBackend,
    pub max_concurrency: usize,
    /// None = no cap.
    pub budget_usd: Option<f64>,
    pub hitl_timeout_s: u64,
    /// Quiet-hours interval before a LATER gate is re-offered.
    pub hitl_requeue_s: u64,
    /// LATER responses beyond this count escalate to NO. None = never.
    pub hitl_max_deferrals: Option<u32>,
    pub foundation_timeout_s: u64,
    /// TTL for cached foundation health, seconds.
    pub foundation_cache_ttl_s: u64,
    pub retention_checkpoints: usize,
    /// Message redelivery window after an unacked delivery.
    pub bus_visibility_timeout_s: u64,
    /// Nacks before a message moves to `<queue>.dead`.
    pub bus_dead_letter_threshold: u32,
    pub pattern_staleness_days: u32,
    pub pattern_half_life_days: f64,
    /// Meta-learner may replace live templates without approval.
    pub learner_autonomous: bool,
    /// Risk categories that require a HITL gate by default.
    pub gated_risk_categories: Vec<String>,
}

impl Default for TrinityConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from(".trinity/state"),
            storage_backend: StorageBackend::Local,
            max_concurrency: 5,
            budget_usd: None,
            hitl_timeout_s: 300,
            hitl_requeue_s: 1800,
            hitl_max_deferrals: None,
            foundation_timeout_s: 600,
            foundation_cache_ttl_s: 120,
            retention_checkpoints: 10,
            bus_visibility_timeout_s: 300,
            bus_dead_letter_threshold: 5,
            pattern_staleness_days: 180,
            pattern_half_life_days: 30.0,
            learner_autonomous: false,
            gated_risk_categories: vec!["security".to_string(), "performance".to_string()],
        }
    }
}

impl TrinityConfig {
    /// Build from the environment on top of defaults. Unparseable values are
    /// configuration errors, not silent fallbacks.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(dir) = std::env::var("TRINITY_DIR")
            && !dir.trim().is_empty()
        {
            config.state_dir = PathBuf::from(dir).join("state");
        }
        if let Some(value) = read_env(ENV_MAX_CONCURRENCY) {
            config.max_concurrency = parse_env(ENV_MAX_CONCURRENCY, &value)?;
            if config.max_concurrency == 0 {
                return Err(TrinityError::Config(format!(
                    "{ENV_MAX_CONCURRENCY} must be at least 1"
                )));
            }
        }
        if let Some(value) = read_env(ENV_BUDGET_USD) {
            config.budget_usd = Some(parse_env(ENV_BUDGET_USD, &value)?);
        }
        if let Some(value) = read_env(ENV_STORAGE_BACKEND) {
            config.storage_backend = match value.as_str() {
                "local" => StorageBackend::Local,
                "remote" => StorageBackend::Remote,
                other => {
                    return Err(TrinityError::Config(format!(
                        "{ENV_STORAGE_BACKEND} must be 'local' or 'remote', got '{other}'"
                    )));
                }
            };
        }
        if let Some(value) = read_env(ENV_HITL_TIMEOUT_S) {
            config.hitl_timeout_s = parse_env(ENV_HITL_TIMEOUT_S, &value)?;
        }
        if let Some(value) = read_env(ENV_FOUNDATION_TIMEOUT_S) {
            config.foundation_timeout_s = parse_env(ENV_FOUNDATION_TIMEOUT_S, &value)?;
        }
        if let Some(value) = read_env(ENV_RETENTION_CHECKPOINTS) {
            config.retention_checkpoints = parse_env(ENV_RETENTION_CHECKPOINTS, &value)?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.storage_backend == StorageBackend::Remote {
            return Err(TrinityError::Config(
                "remote storage backend is reserved and not supported by this build".into(),
            ));
        }
        if let Some(budget) = self.budget_usd
            && budget < 0.0
        {
            return Err(TrinityError::Config("budget must be non-negative".into()));
        }
        Ok(())
    }
}

fn read_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| TrinityError::Config(format!("invalid {key}: '{value}'")))
}

//! Typed error taxonomy for component boundaries.
//!
//! Components recover locally only from `TransientIo` and retryable task
//! failures; everything else surfaces on the return value and the caller
//! decides escalation.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrinityError {
    /// Storage or network hiccup; retried with bounded backoff before surfacing.
    #[error("transient I/O failure: {0}")]
    TransientIo(String),

    /// A sub-agent returned an unusable artifact or a tool invocation failed.
    #[error("task {task_id} failed: {detail}")]
    TaskFailed { task_id: String, detail: String },

    /// Wall-clock deadline expired. Distinct from TaskFailed.
    #[error("{scope} timed out after {seconds}s")]
    Timeout { scope: String, seconds: u64 },

    /// Verification Gate rejected an artifact. Never auto-retried as-is.
    #[error("artifact rejected by verification gate: {reasons:?}")]
    VerificationRejected { reasons: Vec<String> },

    /// Foundation Verifier found the repository unhealthy. Fatal for the cycle.
    #[error("broken foundation: {0}")]
    BrokenFoundation(String),

    /// Cost Ledger refused dispatch.
    #[error("budget exhausted: spent {spent_usd:.4} of {budget_usd:.4} USD")]
    BudgetExhausted { spent_usd: f64, budget_usd: f64 },

    /// Checkpoint checksum mismatch on resume. Operator intervention required.
    #[error("corrupt checkpoint {checkpoint_id} for workflow {workflow_id}")]
    CorruptCheckpoint {
        workflow_id: String,
        checkpoint_id: String,
    },

    /// Programmer error: transition outside the legal state graph.
    #[error("illegal workflow transition {from} -> {to}")]
    IllegalTransition { from: String, to: String },

    /// Task graph contains a dependency cycle; rejected at construction.
    #[error("dependency cycle involving task {0}")]
    CycleDetected(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Backing store unavailable or corrupted beyond a single record.
    #[error("storage failure: {0}")]
    Storage(String),

    /// Bad configuration at bootstrap.
    #[error("configuration error: {0}")]
    Config(String),
}

impl TrinityError {
    pub fn storage(err: impl std::fmt::Display) -> Self {
        Self::Storage(err.to_string())
    }

    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// True for errors that a component may absorb with local retries.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientIo(_))
    }

    /// Exit category for the `trinity run` process boundary.
    pub fn exit_category(&self) -> i32 {
        match self {
            Self::BrokenFoundation(_) => 10,
            Self::BudgetExhausted { .. } => 11,
            Self::Config(_) => 2,
            _ => 12,
        }
    }
}

pub type Result<T> = std::result::Result<T, TrinityError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_categories() {
        assert_eq!(TrinityError::BrokenFoundation("x".into()).exit_category(), 10);
        assert_eq!(
            TrinityError::BudgetExhausted {
                spent_usd: 1.0,
                budget_usd: 1.0
            }
            .exit_category(),
            11
        );
        assert_eq!(TrinityError::Config("bad".into()).exit_category(), 2);
        assert_eq!(
            TrinityError::TaskFailed {
                task_id: "t".into(),
                detail: "d".into()
            }
            .exit_category(),
            12
        );
    }

    #[test]
    fn test_transient_classification() {
        assert!(TrinityError::TransientIo("disk".into()).is_transient());
        assert!(!TrinityError::BrokenFoundation("tests red".into()).is_transient());
    }
}

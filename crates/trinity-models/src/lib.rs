//! Trinity Models - Shared data model for the orchestration core.
//!
//! Pure data types and the error taxonomy. Every persisted record in the
//! system is defined here; storage and orchestration layers build on top.
//! No I/O in this crate.

pub mod agent;
pub mod bus;
pub mod checkpoint;
pub mod cost;
pub mod error;
pub mod event;
pub mod hitl;
pub mod pattern;
pub mod plan;
pub mod signal;
pub mod workflow;

pub use agent::{AgentRole, Artifact, ArtifactKind, TaskFailureKind, TaskResult};
pub use bus::{Message, queues};
pub use checkpoint::Checkpoint;
pub use cost::{CostEntry, CostScope};
pub use error::TrinityError;
pub use event::Event;
pub use hitl::{ApprovalDecision, Question, QuestionKind, UserApproval};
pub use pattern::{Pattern, PatternUsage, UsageOutcome};
pub use plan::{Plan, QualityGate, TaskSpec, Track};
pub use signal::{Signal, SignalCategory, SignalEvidence};
pub use workflow::{Workflow, WorkflowState};

/// Generate a fresh v4 UUID string id.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Current UTC timestamp in milliseconds since epoch.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

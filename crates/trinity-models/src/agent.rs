//! Agent roles, artifacts, and task results.
//!
//! The role set is closed: EXECUTOR dispatches sub-agents through a factory
//! table keyed by `AgentRole`, never by string lookup at runtime.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Specialized worker roles spawnable by EXECUTOR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Planner,
    CodeWriter,
    TestAuthor,
    Auditor,
    Merger,
    Learner,
    QualityEnforcer,
    Toolsmith,
}

impl AgentRole {
    pub const ALL: [AgentRole; 8] = [
        AgentRole::Planner,
        AgentRole::CodeWriter,
        AgentRole::TestAuthor,
        AgentRole::Auditor,
        AgentRole::Merger,
        AgentRole::Learner,
        AgentRole::QualityEnforcer,
        AgentRole::Toolsmith,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AgentRole::Planner => "planner",
            AgentRole::CodeWriter => "code_writer",
            AgentRole::TestAuthor => "test_author",
            AgentRole::Auditor => "auditor",
            AgentRole::Merger => "merger",
            AgentRole::Learner => "learner",
            AgentRole::QualityEnforcer => "quality_enforcer",
            AgentRole::Toolsmith => "toolsmith",
        }
    }
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Code,
    Test,
    Document,
    Review,
    Merge,
}

/// Output proposed by a sub-agent. Enters workflow state only after the
/// Verification Gate accepts it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Artifact {
    pub id: String,
    pub task_id: String,
    pub kind: ArtifactKind,
    pub content: Value,
    /// Partial results are treated as failures by the executor.
    #[serde(default)]
    pub partial: bool,
    pub produced_by: AgentRole,
    pub created_at: i64,
}

impl Artifact {
    pub fn new(task_id: impl Into<String>, kind: ArtifactKind, role: AgentRole, content: Value) -> Self {
        Self {
            id: crate::new_id(),
            task_id: task_id.into(),
            kind,
            content,
            partial: false,
            produced_by: role,
            created_at: crate::now_ms(),
        }
    }
}

/// Why a task ended without a usable artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskFailureKind {
    /// Sub-agent error or unusable/partial artifact.
    Error,
    /// Hard deadline expired; retried per policy, cancels per policy.
    Timeout,
    /// Verification gate said no; re-plan or escalate, never auto-retry.
    VerificationRejected,
    /// Cancelled because a dependency or sibling failed.
    Cancelled,
}

/// Terminal record for one task inside a workflow run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskResult {
    pub task_id: String,
    pub success: bool,
    /// Attempt number that produced this result (1-based).
    pub attempts: u32,
    #[serde(default)]
    pub failure: Option<TaskFailureKind>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub artifact_id: Option<String>,
    pub duration_ms: u64,
}

impl TaskResult {
    pub fn success(task_id: impl Into<String>, attempts: u32, duration_ms: u64) -> Self {
        Self {
            task_id: task_id.into(),
            success: true,
            attempts,
            failure: None,
            error: None,
            artifact_id: None,
            duration_ms,
        }
    }

    pub fn failure(
        task_id: impl Into<String>,
        attempts: u32,
        kind: TaskFailureKind,
        error: impl Into<String>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            success: false,
            attempts,
            failure: Some(kind),
            error: Some(error.into()),
            artifact_id: None,
            duration_ms: 0,
        }
    }

    pub fn with_artifact(mut self, artifact_id: impl Into<String>) -> Self {
        self.artifact_id = Some(artifact_id.into());
        self
    }
}

//! Workflow runtime state and the legal transition graph.

use serde::{Deserialize, Serialize};

/// Workflow lifecycle states. Transitions outside `can_transition_to` are
/// programmer errors and surface as `TrinityError::IllegalTransition`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowState {
    Pending,
    Running,
    Checkpointed,
    Paused,
    Completed,
    Failed,
}

impl WorkflowState {
    /// Legal edges: PENDING→RUNNING, RUNNING→{CHECKPOINTED, PAUSED, COMPLETED,
    /// FAILED}, CHECKPOINTED→RUNNING, PAUSED→RUNNING. No resurrection from
    /// terminal states. The empty-plan shortcut PENDING→COMPLETED is legal.
    pub fn can_transition_to(self, to: WorkflowState) -> bool {
        use WorkflowState::*;
        matches!(
            (self, to),
            (Pending, Running)
                | (Pending, Completed)
                | (Running, Checkpointed)
                | (Running, Paused)
                | (Running, Completed)
                | (Running, Failed)
                | (Checkpointed, Running)
                | (Paused, Running)
                | (Paused, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, WorkflowState::Completed | WorkflowState::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WorkflowState::Pending => "PENDING",
            WorkflowState::Running => "RUNNING",
            WorkflowState::Checkpointed => "CHECKPOINTED",
            WorkflowState::Paused => "PAUSED",
            WorkflowState::Completed => "COMPLETED",
            WorkflowState::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A running (or archived) instance of a plan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Workflow {
    pub id: String,
    pub plan_id: String,
    pub correlation_id: String,
    pub state: WorkflowState,
    #[serde(default)]
    pub current_step: Option<String>,
    #[serde(default)]
    pub completed_steps: Vec<String>,
    #[serde(default)]
    pub pending_steps: Vec<String>,
    /// Checkpoint ids in creation order; retention keeps the last N.
    #[serde(default)]
    pub checkpoints: Vec<String>,
    /// Terminal reason ("user_rejected", "workflow_timeout",
    /// "corrupt_checkpoint", ...) once COMPLETED or FAILED.
    #[serde(default)]
    pub reason: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Workflow {
    pub fn new(
        plan_id: impl Into<String>,
        correlation_id: impl Into<String>,
        pending_steps: Vec<String>,
    ) -> Self {
        let now = crate::now_ms();
        Self {
            id: crate::new_id(),
            plan_id: plan_id.into(),
            correlation_id: correlation_id.into(),
            state: WorkflowState::Pending,
            current_step: None,
            completed_steps: Vec::new(),
            pending_steps,
            checkpoints: Vec::new(),
            reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn mark_step_completed(&mut self, step: &str) {
        self.pending_steps.retain(|s| s != step);
        if !self.completed_steps.iter().any(|s| s == step) {
            self.completed_steps.push(step.to_string());
        }
        if self.current_step.as_deref() == Some(step) {
            self.current_step = None;
        }
        self.updated_at = crate::now_ms();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use WorkflowState::*;

    #[test]
    fn test_legal_walk() {
        assert!(Pending.can_transition_to(Running));
        assert!(Running.can_transition_to(Checkpointed));
        assert!(Checkpointed.can_transition_to(Running));
        assert!(Running.can_transition_to(Paused));
        assert!(Paused.can_transition_to(Running));
        assert!(Running.can_transition_to(Completed));
        assert!(Running.can_transition_to(Failed));
        assert!(Pending.can_transition_to(Completed));
    }

    #[test]
    fn test_no_resurrection() {
        for terminal in [Completed, Failed] {
            for to in [Pending, Running, Checkpointed, Paused, Completed, Failed] {
                assert!(!terminal.can_transition_to(to));
            }
        }
    }

    #[test]
    fn test_no_skip_from_pending() {
        assert!(!Pending.can_transition_to(Checkpointed));
        assert!(!Pending.can_transition_to(Paused));
        assert!(!Pending.can_transition_to(Failed));
    }

    #[test]
    fn test_state_serde_screaming() {
        assert_eq!(serde_json::to_string(&Checkpointed).unwrap(), "\"CHECKPOINTED\"");
    }

    #[test]
    fn test_mark_step_completed() {
        let mut wf = Workflow::new("plan-1", "corr-1", vec!["a".into(), "b".into()]);
        wf.current_step = Some("a".into());
        wf.mark_step_completed("a");
        assert_eq!(wf.pending_steps, vec!["b".to_string()]);
        assert_eq!(wf.completed_steps, vec!["a".to_string()]);
        assert!(wf.current_step.is_none());
    }
}

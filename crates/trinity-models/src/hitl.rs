//! Human-in-the-loop questions, decisions, and audit records.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionKind {
    /// Gate declared in the plan (risk category attached in context).
    ApprovalGate,
    /// Cost Ledger refused dispatch; asks for a budget extension.
    BudgetExtension,
    /// Explicit override of a verification-gate rejection.
    ForceVerification,
}

/// Question surfaced on `human_review_queue`; carries everything a human
/// needs to decide without consulting the process.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Question {
    pub id: String,
    pub workflow_id: String,
    pub gate_id: String,
    pub kind: QuestionKind,
    pub step: String,
    /// Inputs, estimated cost, risk category, audit trail reference.
    pub context: Value,
    pub created_at: i64,
}

impl Question {
    pub fn new(
        workflow_id: impl Into<String>,
        gate_id: impl Into<String>,
        kind: QuestionKind,
        step: impl Into<String>,
        context: Value,
    ) -> Self {
        Self {
            id: crate::new_id(),
            workflow_id: workflow_id.into(),
            gate_id: gate_id.into(),
            kind,
            step: step.into(),
            context,
            created_at: crate::now_ms(),
        }
    }
}

/// Human decision for a gate. `Timeout` is recorded when no response arrived
/// within the configured window; `Force` exists only for verification-gate
/// overrides and always leaves a full audit record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalDecision {
    Yes,
    No,
    Later,
    Timeout,
    Force,
}

/// Persisted audit record of a gate decision.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserApproval {
    pub workflow_id: String,
    pub gate_id: String,
    pub question_id: String,
    pub decision: ApprovalDecision,
    #[serde(default)]
    pub annotations: Option<String>,
    pub context: Value,
    pub responded_at: i64,
}

impl UserApproval {
    pub fn new(question: &Question, decision: ApprovalDecision) -> Self {
        Self {
            workflow_id: question.workflow_id.clone(),
            gate_id: question.gate_id.clone(),
            question_id: question.id.clone(),
            decision,
            annotations: None,
            context: question.context.clone(),
            responded_at: crate::now_ms(),
        }
    }

    pub fn with_annotations(mut self, annotations: impl Into<String>) -> Self {
        self.annotations = Some(annotations.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decision_serde_screaming() {
        assert_eq!(serde_json::to_string(&ApprovalDecision::Later).unwrap(), "\"LATER\"");
        assert_eq!(serde_json::to_string(&ApprovalDecision::Timeout).unwrap(), "\"TIMEOUT\"");
    }

    #[test]
    fn test_approval_copies_question_context() {
        let q = Question::new(
            "wf-1",
            "gate-security",
            QuestionKind::ApprovalGate,
            "merge",
            serde_json::json!({"risk": "security"}),
        );
        let approval = UserApproval::new(&q, ApprovalDecision::Yes).with_annotations("lgtm");
        assert_eq!(approval.workflow_id, "wf-1");
        assert_eq!(approval.question_id, q.id);
        assert_eq!(approval.context, q.context);
        assert_eq!(approval.annotations.as_deref(), Some("lgtm"));
    }
}

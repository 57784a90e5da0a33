//! Cost accounting entries and scopes.

use serde::{Deserialize, Serialize};

/// One billed LLM call, attributed to a task, agent role, and model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CostEntry {
    pub task_id: String,
    pub workflow_id: String,
    pub correlation_id: String,
    pub agent: String,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub currency_amount: f64,
    pub timestamp: i64,
}

impl CostEntry {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        task_id: impl Into<String>,
        workflow_id: impl Into<String>,
        correlation_id: impl Into<String>,
        agent: impl Into<String>,
        model: impl Into<String>,
        input_tokens: u64,
        output_tokens: u64,
        currency_amount: f64,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            workflow_id: workflow_id.into(),
            correlation_id: correlation_id.into(),
            agent: agent.into(),
            model: model.into(),
            input_tokens,
            output_tokens,
            currency_amount,
            timestamp: crate::now_ms(),
        }
    }
}

/// Aggregation scope for balance queries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "scope", content = "id")]
pub enum CostScope {
    Global,
    Workflow(String),
    Task(String),
    Agent(String),
}

impl CostEntry {
    pub fn matches(&self, scope: &CostScope) -> bool {
        match scope {
            CostScope::Global => true,
            CostScope::Workflow(id) => &self.workflow_id == id,
            CostScope::Task(id) => &self.task_id == id,
            CostScope::Agent(name) => &self.agent == name,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_matching() {
        let entry = CostEntry::new("t1", "wf1", "c1", "code_writer", "sonnet-4", 100, 50, 0.01);
        assert!(entry.matches(&CostScope::Global));
        assert!(entry.matches(&CostScope::Workflow("wf1".into())));
        assert!(entry.matches(&CostScope::Task("t1".into())));
        assert!(entry.matches(&CostScope::Agent("code_writer".into())));
        assert!(!entry.matches(&CostScope::Workflow("wf2".into())));
    }
}

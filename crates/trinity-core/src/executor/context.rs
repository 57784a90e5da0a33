//! Bounded context handed to sub-agents.
//!
//! Agents hold ids and read capabilities only - never mutable handles into
//! workflow state, the bus, or the ledger. What an agent can see is exactly
//! what EXECUTOR put here.

use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::patterns::PatternSearch;

#[derive(Clone)]
pub struct AgentContext {
    pub task_id: String,
    pub workflow_id: String,
    pub correlation_id: String,
    pub prompt: String,
    pub params: BTreeMap<String, Value>,
    /// Read-only precedent lookup, when granted.
    pub patterns: Option<Arc<dyn PatternSearch>>,
    /// Outputs of upstream tasks this task depends on.
    pub upstream_outputs: BTreeMap<String, Value>,
}

impl AgentContext {
    pub fn new(
        task_id: impl Into<String>,
        workflow_id: impl Into<String>,
        correlation_id: impl Into<String>,
        prompt: impl Into<String>,
        params: BTreeMap<String, Value>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            workflow_id: workflow_id.into(),
            correlation_id: correlation_id.into(),
            prompt: prompt.into(),
            params,
            patterns: None,
            upstream_outputs: BTreeMap::new(),
        }
    }

    pub fn with_patterns(mut self, patterns: Arc<dyn PatternSearch>) -> Self {
        self.patterns = Some(patterns);
        self
    }

    pub fn with_upstream(mut self, upstream: BTreeMap<String, Value>) -> Self {
        self.upstream_outputs = upstream;
        self
    }

    /// Serializable snapshot for checkpoints.
    pub fn snapshot(&self) -> Value {
        serde_json::json!({
            "task_id": self.task_id,
            "workflow_id": self.workflow_id,
            "correlation_id": self.correlation_id,
            "params": self.params,
            "upstream_tasks": self.upstream_outputs.keys().collect::<Vec<_>>(),
        })
    }
}

//! Checksummed workflow checkpoints.
//!
//! A checkpoint is either fully written (checksum validates) or invisible to
//! readers. The checksum covers a canonical JSON rendering of every field
//! except `checksum` itself; serde_json maps are ordered, so the rendering
//! is deterministic.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Checkpoint {
    pub id: String,
    pub workflow_id: String,
    pub step_name: String,
    /// Re-executions of the same step get distinct generations.
    pub generation: u32,
    pub outputs: Value,
    pub agent_context_snapshot: Value,
    pub tool_results: Value,
    pub checksum: String,
    pub created_at: i64,
}

impl Checkpoint {
    pub fn new(
        workflow_id: impl Into<String>,
        step_name: impl Into<String>,
        generation: u32,
        outputs: Value,
        agent_context_snapshot: Value,
        tool_results: Value,
    ) -> Self {
        let mut checkpoint = Self {
            id: crate::new_id(),
            workflow_id: workflow_id.into(),
            step_name: step_name.into(),
            generation,
            outputs,
            agent_context_snapshot,
            tool_results,
            checksum: String::new(),
            created_at: crate::now_ms(),
        };
        checkpoint.checksum = checkpoint.compute_checksum();
        checkpoint
    }

    /// hex(sha256(canonical_json_of_fields_excluding_checksum)).
    pub fn compute_checksum(&self) -> String {
        let canonical = serde_json::json!({
            "id": self.id,
            "workflow_id": self.workflow_id,
            "step_name": self.step_name,
            "generation": self.generation,
            "outputs": self.outputs,
            "agent_context_snapshot": self.agent_context_snapshot,
            "tool_results": self.tool_results,
            "created_at": self.created_at,
        });
        let mut hasher = Sha256::new();
        // serde_json::Value objects serialize with sorted keys
        hasher.update(canonical.to_string().as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn verify_checksum(&self) -> bool {
        self.checksum == self.compute_checksum()
    }
}

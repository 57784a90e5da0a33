//! Bus message wire format and well-known queue names.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Well-known queues wired at bootstrap.
pub mod queues {
    /// Raw telemetry events into WITNESS.
    pub const TELEMETRY_STREAM: &str = "telemetry_stream";
    /// Ambient context events into WITNESS.
    pub const AMBIENT_CONTEXT_STREAM: &str = "ambient_context_stream";
    /// WITNESS signals into ARCHITECT.
    pub const SIGNAL_QUEUE: &str = "signal_queue";
    /// ARCHITECT plans into EXECUTOR.
    pub const PLAN_QUEUE: &str = "plan_queue";
    /// Pending questions for humans.
    pub const HUMAN_REVIEW_QUEUE: &str = "human_review_queue";
    /// Human decisions back to waiting gates.
    pub const HUMAN_RESPONSE_QUEUE: &str = "human_response_queue";
    /// Orchestration telemetry out (foundation failures, completions).
    pub const TELEMETRY_OUT: &str = "telemetry.out";

    /// Dead-letter queue name for a source queue.
    pub fn dead_letter(queue: &str) -> String {
        format!("{queue}.dead")
    }

    /// Per-question response queue, so concurrent gates never steal each
    /// other's answers.
    pub fn human_response(question_id: &str) -> String {
        format!("{HUMAN_RESPONSE_QUEUE}.{question_id}")
    }
}

/// One durable bus message. Serialized as a single JSON line in the queue's
/// write-ahead log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: String,
    pub queue: String,
    /// RFC3339 publish time.
    pub ts: String,
    pub priority: i64,
    #[serde(default)]
    pub correlation_id: Option<String>,
    pub payload: Value,
    #[serde(default)]
    pub acked: bool,
}

impl Message {
    pub fn new(queue: impl Into<String>, payload: Value, priority: i64) -> Self {
        Self {
            id: crate::new_id(),
            queue: queue.into(),
            ts: chrono::Utc::now().to_rfc3339(),
            priority,
            correlation_id: None,
            payload,
            acked: false,
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Decode the payload into a typed value.
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dead_letter_name() {
        assert_eq!(queues::dead_letter("plan_queue"), "plan_queue.dead");
    }

    #[test]
    fn test_message_decode() {
        #[derive(Debug, PartialEq, Serialize, Deserialize)]
        struct P {
            task: String,
        }
        let msg = Message::new("execution_queue", serde_json::json!({"task": "critical"}), 10);
        assert_eq!(msg.decode::<P>().unwrap(), P { task: "critical".into() });
    }
}

//! Events consumed by WITNESS from the telemetry and ambient streams.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// An observation produced outside the core. Immutable once emitted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    pub id: String,
    /// Producing stream or component (e.g. "telemetry", "ambient").
    pub source: String,
    /// Milliseconds since epoch.
    pub timestamp: i64,
    pub content: String,
    /// Required for detection-derived events; in [0, 1].
    pub confidence: f64,
    /// Optional session grouping for windowed recurring-topic detection.
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

impl Event {
    pub fn new(source: impl Into<String>, content: impl Into<String>, confidence: f64) -> Self {
        Self {
            id: crate::new_id(),
            source: source.into(),
            timestamp: crate::now_ms(),
            content: content.into(),
            confidence: confidence.clamp(0.0, 1.0),
            session_id: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

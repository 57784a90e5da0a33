//! Signals - classified evidence of a pattern, emitted by WITNESS.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalCategory {
    UserIntent,
    Opportunity,
    Failure,
    RecurringTopic,
}

impl SignalCategory {
    /// Bus priority for plans derived from this category.
    pub fn priority(self) -> i64 {
        match self {
            SignalCategory::Failure => 30,
            SignalCategory::UserIntent => 20,
            SignalCategory::Opportunity => 10,
            SignalCategory::RecurringTopic => 5,
        }
    }

    /// Minimum times a pattern must be seen before a signal may exist.
    pub fn min_evidence(self) -> u32 {
        match self {
            SignalCategory::RecurringTopic => 3,
            _ => 1,
        }
    }
}

/// Supporting evidence attached to a signal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SignalEvidence {
    pub times_seen: u32,
    pub keywords: Vec<String>,
    /// Observation window, milliseconds since epoch.
    pub window_start: i64,
    pub window_end: i64,
}

/// WITNESS output. Exists only when confidence and min-evidence thresholds
/// were met for its category.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Signal {
    pub id: String,
    pub pattern_name: String,
    pub category: SignalCategory,
    pub confidence: f64,
    pub evidence: SignalEvidence,
    /// Propagated unchanged through Plan, Workflow, Checkpoint, CostEntry
    /// and precedent updates.
    pub correlation_id: String,
    /// Event content that triggered classification, kept for planning context.
    pub description: String,
    pub created_at: i64,
}

impl Signal {
    pub fn new(
        pattern_name: impl Into<String>,
        category: SignalCategory,
        confidence: f64,
        evidence: SignalEvidence,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: crate::new_id(),
            pattern_name: pattern_name.into(),
            category,
            confidence: confidence.clamp(0.0, 1.0),
            evidence,
            correlation_id: crate::new_id(),
            description: description.into(),
            created_at: crate::now_ms(),
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }
}

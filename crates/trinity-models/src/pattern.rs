//! Patterns and precedents - reusable abstractions over past behavior.
//!
//! Confidence is always derived from usage counts blended with recency
//! decay; it is never stored where it could drift from the counts.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub const DEFAULT_CONFIDENCE_HALF_LIFE_DAYS: f64 = 30.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageOutcome {
    Success,
    Failure,
}

/// Atomic usage counters. `success_count + failure_count` is the usage count
/// by construction.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PatternUsage {
    pub success_count: u64,
    pub failure_count: u64,
}

impl PatternUsage {
    pub fn usage_count(&self) -> u64 {
        self.success_count + self.failure_count
    }

    pub fn record(&mut self, outcome: UsageOutcome) {
        match outcome {
            UsageOutcome::Success => self.success_count += 1,
            UsageOutcome::Failure => self.failure_count += 1,
        }
    }

    /// Merge counters from a content-hash duplicate.
    pub fn merge(&mut self, other: &PatternUsage) {
        self.success_count += other.success_count;
        self.failure_count += other.failure_count;
    }

    /// success / max(1, success + failure), without recency blending.
    pub fn raw_confidence(&self) -> f64 {
        self.success_count as f64 / (self.usage_count().max(1)) as f64
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Pattern {
    pub id: String,
    /// Caller-chosen unique key; re-storing a key replaces content but
    /// preserves usage statistics.
    pub key: String,
    pub category: String,
    pub description: String,
    pub content: String,
    /// hex(sha256(content)) for cross-key de-duplication.
    pub content_hash: String,
    pub tags: BTreeSet<String>,
    pub usage: PatternUsage,
    /// References to reasoning records / workflow outcomes.
    #[serde(default)]
    pub precedents: Vec<String>,
    pub first_seen: i64,
    pub last_seen: i64,
    #[serde(default)]
    pub deprecated: Option<String>,
}

impl Pattern {
    /// Derived confidence: raw success ratio blended toward 0.5 as the
    /// pattern ages past the half-life without being seen. Always in [0, 1].
    pub fn confidence(&self, now_ms: i64, half_life_days: f64) -> f64 {
        let raw = self.usage.raw_confidence();
        let age_days = ((now_ms - self.last_seen).max(0)) as f64 / 86_400_000.0;
        let recency = 0.5_f64.powf(age_days / half_life_days.max(f64::EPSILON));
        raw * recency + 0.5 * (1.0 - recency)
    }

    pub fn is_stale(&self, now_ms: i64, staleness_days: u32) -> bool {
        now_ms - self.last_seen > staleness_days as i64 * 86_400_000
    }
}

/// hex(sha256(content)), shared by store and de-dup logic.
pub fn content_hash(content: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

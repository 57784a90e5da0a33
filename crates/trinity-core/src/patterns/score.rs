//! Search scoring: semantic similarity blended with tag overlap and recency.

use std::collections::BTreeSet;

/// Relative weights for the combined score. Must sum to 1.
#[derive(Debug, Clone, Copy)]
pub struct ScoreWeights {
    pub semantic: f64,
    pub tags: f64,
    pub recency: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            semantic: 0.6,
            tags: 0.25,
            recency: 0.15,
        }
    }
}

pub fn cosine(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    (dot / (na * nb)) as f64
}

/// Jaccard-style overlap between a query tag set and a record's tags.
/// An empty query filter contributes a neutral 0 so that tag weight only
/// differentiates when the caller actually filters.
pub fn tag_overlap(query: &BTreeSet<String>, record: &BTreeSet<String>) -> f64 {
    if query.is_empty() || record.is_empty() {
        return 0.0;
    }
    let hits = query.intersection(record).count();
    hits as f64 / query.len() as f64
}

/// Exponential recency decay in [0, 1]: 1 at `last_seen == now`.
pub fn recency(now_ms: i64, last_seen_ms: i64, half_life_days: f64) -> f64 {
    let age_days = ((now_ms - last_seen_ms).max(0)) as f64 / 86_400_000.0;
    0.5_f64.powf(age_days / half_life_days.max(f64::EPSILON))
}

/// Combined score in [0, 1]. `semantic` is None when no embedding is
/// available (degraded mode); its weight is then redistributed so degraded
/// scores stay comparable with each other.
pub fn combined(
    weights: ScoreWeights,
    semantic: Option<f64>,
    tags: f64,
    recency: f64,
) -> f64 {
    let score = match semantic {
        Some(sim) => {
            weights.semantic * sim.clamp(0.0, 1.0) + weights.tags * tags + weights.recency * recency
        }
        None => {
            let denominator = weights.tags + weights.recency;
            if denominator <= 0.0 {
                return 0.0;
            }
            (weights.tags * tags + weights.recency * recency) / denominator
        }
    };
    score.clamp(0.0, 1.0)
}

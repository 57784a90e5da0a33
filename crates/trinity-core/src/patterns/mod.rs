//! Content-addressed pattern/precedent store with semantic search.
//!
//! Records persist as JSON with a binary embedding sidecar; an in-memory
//! index over both backs search. Confidence is derived from usage counters
//! blended with recency, never stored. Identical content under different
//! keys de-duplicates at the content-hash level with merged usage stats.

pub mod embedding;
pub mod score;

use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, warn};
use trinity_models::error::Result;
use trinity_models::pattern::content_hash;
use trinity_models::{Pattern, PatternUsage, TrinityError, UsageOutcome};
use trinity_storage::Storage;

pub use embedding::{EmbeddingProvider, HashedTokenEmbedder};
pub use score::ScoreWeights;

#[derive(Debug, Clone)]
pub struct PatternStoreConfig {
    pub weights: ScoreWeights,
    pub half_life_days: f64,
    pub staleness_days: u32,
}

impl Default for PatternStoreConfig {
    fn default() -> Self {
        Self {
            weights: ScoreWeights::default(),
            half_life_days: 30.0,
            staleness_days: 180,
        }
    }
}

struct IndexEntry {
    pattern: Pattern,
    embedding: Option<Vec<f32>>,
}

struct StoreInner {
    storage: Arc<Storage>,
    embedder: Arc<dyn EmbeddingProvider>,
    config: PatternStoreConfig,
    index: RwLock<HashMap<String, IndexEntry>>,
    by_key: RwLock<HashMap<String, String>>,
    by_hash: RwLock<HashMap<String, String>>,
}

/// Cheaply cloneable store handle.
#[derive(Clone)]
pub struct PatternStore {
    inner: Arc<StoreInner>,
}

/// Read-only search capability handed to sub-agents.
#[async_trait::async_trait]
pub trait PatternSearch: Send + Sync {
    async fn search(
        &self,
        query: &str,
        tags: BTreeSet<String>,
        limit: usize,
    ) -> Result<Vec<(Pattern, f64)>>;

    fn get(&self, id_or_key: &str) -> Result<Pattern>;
}

impl PatternStore {
    /// Open the store, loading every record and sidecar into the index.
    pub fn open(
        storage: Arc<Storage>,
        embedder: Arc<dyn EmbeddingProvider>,
        config: PatternStoreConfig,
    ) -> Result<Self> {
        let mut index = HashMap::new();
        let mut by_key = HashMap::new();
        let mut by_hash = HashMap::new();

        for pattern in storage.patterns.list().map_err(TrinityError::storage)? {
            let embedding = storage
                .patterns
                .get_embedding(&pattern.id)
                .unwrap_or_else(|err| {
                    warn!(pattern_id = %pattern.id, error = %err, "Unreadable embedding sidecar, treating as absent");
                    None
                });
            by_key.insert(pattern.key.clone(), pattern.id.clone());
            by_hash.insert(pattern.content_hash.clone(), pattern.id.clone());
            index.insert(pattern.id.clone(), IndexEntry { pattern, embedding });
        }
        debug!(patterns = index.len(), "Pattern index loaded");

        Ok(Self {
            inner: Arc::new(StoreInner {
                storage,
                embedder,
                config,
                index: RwLock::new(index),
                by_key: RwLock::new(by_key),
                by_hash: RwLock::new(by_hash),
            }),
        })
    }

    /// Store a record under a unique key. Re-storing a key replaces content
    /// but preserves usage statistics; identical content under a different
    /// key merges into the existing record instead of duplicating it.
    /// Embedding happens lazily afterwards and never fails the write.
    pub async fn store(
        &self,
        key: &str,
        category: &str,
        description: &str,
        content: &str,
        tags: BTreeSet<String>,
    ) -> Result<String> {
        let hash = content_hash(content);
        let now = trinity_models::now_ms();

        let (id, pattern) = {
            let existing_by_key = self.inner.by_key.read().get(key).cloned();
            let existing_by_hash = self.inner.by_hash.read().get(&hash).cloned();
            let mut index = self.inner.index.write();

            if let Some(id) = existing_by_key {
                // Same key: replace content, keep usage.
                let entry = index
                    .get_mut(&id)
                    .ok_or_else(|| TrinityError::not_found("pattern", &id))?;
                self.inner.by_hash.write().remove(&entry.pattern.content_hash);
                entry.pattern.category = category.to_string();
                entry.pattern.description = description.to_string();
                entry.pattern.content = content.to_string();
                entry.pattern.content_hash = hash.clone();
                entry.pattern.tags = tags;
                entry.pattern.last_seen = now;
                entry.embedding = None;
                self.inner.by_hash.write().insert(hash, id.clone());
                (id.clone(), entry.pattern.clone())
            } else if let Some(id) = existing_by_hash {
                // Same content, different key: de-duplicate, merge stats.
                let entry = index
                    .get_mut(&id)
                    .ok_or_else(|| TrinityError::not_found("pattern", &id))?;
                entry.pattern.tags.extend(tags);
                entry.pattern.last_seen = now;
                self.inner
                    .by_key
                    .write()
                    .insert(key.to_string(), id.clone());
                (id.clone(), entry.pattern.clone())
            } else {
                let pattern = Pattern {
                    id: trinity_models::new_id(),
                    key: key.to_string(),
                    category: category.to_string(),
                    description: description.to_string(),
                    content: content.to_string(),
                    content_hash: hash.clone(),
                    tags,
                    usage: PatternUsage::default(),
                    precedents: Vec::new(),
                    first_seen: now,
                    last_seen: now,
                    deprecated: None,
                };
                let id = pattern.id.clone();
                self.inner.by_key.write().insert(key.to_string(), id.clone());
                self.inner.by_hash.write().insert(hash, id.clone());
                index.insert(
                    id.clone(),
                    IndexEntry {
                        pattern: pattern.clone(),
                        embedding: None,
                    },
                );
                (id, pattern)
            }
        };

        self.persist(&pattern)?;
        self.embed_lazily(&id).await;
        Ok(id)
    }

    fn persist(&self, pattern: &Pattern) -> Result<()> {
        self.inner
            .storage
            .patterns
            .put(pattern)
            .map_err(TrinityError::storage)
    }

    /// Compute and persist the embedding for a record. Failure degrades to
    /// tag-only search for that record; it is logged, never surfaced.
    async fn embed_lazily(&self, id: &str) {
        let text = {
            let index = self.inner.index.read();
            match index.get(id) {
                Some(entry) => format!("{}\n{}", entry.pattern.description, entry.pattern.content),
                None => return,
            }
        };
        match self.inner.embedder.embed(&text).await {
            Ok(vector) => {
                if let Err(err) = self.inner.storage.patterns.put_embedding(id, &vector) {
                    warn!(pattern_id = %id, error = %err, "Failed to persist embedding sidecar");
                    return;
                }
                if let Some(entry) = self.inner.index.write().get_mut(id) {
                    entry.embedding = Some(vector);
                }
            }
            Err(err) => {
                warn!(pattern_id = %id, error = %err, "Embedding failed, record stays tag-searchable");
            }
        }
    }

    /// Fill missing embeddings (e.g. after the backend comes back).
    pub async fn ensure_embeddings(&self) -> usize {
        let missing: Vec<String> = {
            let index = self.inner.index.read();
            index
                .iter()
                .filter(|(_, entry)| entry.embedding.is_none())
                .map(|(id, _)| id.clone())
                .collect()
        };
        let mut filled = 0;
        for id in missing {
            self.embed_lazily(&id).await;
            if self
                .inner
                .index
                .read()
                .get(&id)
                .is_some_and(|e| e.embedding.is_some())
            {
                filled += 1;
            }
        }
        filled
    }

    pub fn get(&self, id_or_key: &str) -> Result<Pattern> {
        let index = self.inner.index.read();
        if let Some(entry) = index.get(id_or_key) {
            return Ok(entry.pattern.clone());
        }
        if let Some(id) = self.inner.by_key.read().get(id_or_key)
            && let Some(entry) = index.get(id)
        {
            return Ok(entry.pattern.clone());
        }
        Err(TrinityError::not_found("pattern", id_or_key))
    }

    /// Semantic + tag + recency search over non-deprecated records.
    /// Embedding failure for the query degrades to tag+recency ranking.
    pub async fn search(
        &self,
        query: &str,
        tags: BTreeSet<String>,
        limit: usize,
    ) -> Result<Vec<(Pattern, f64)>> {
        let query_embedding = match self.inner.embedder.embed(query).await {
            Ok(vector) => Some(vector),
            Err(err) => {
                warn!(error = %err, "Query embedding failed, falling back to tag+recency search");
                None
            }
        };

        let now = trinity_models::now_ms();
        let weights = self.inner.config.weights;
        let half_life = self.inner.config.half_life_days;

        let mut scored: Vec<(Pattern, f64)> = {
            let index = self.inner.index.read();
            index
                .values()
                .filter(|entry| entry.pattern.deprecated.is_none())
                .map(|entry| {
                    let semantic = match (&query_embedding, &entry.embedding) {
                        (Some(q), Some(e)) => Some(score::cosine(q, e).max(0.0)),
                        _ => None,
                    };
                    let tag_score = score::tag_overlap(&tags, &entry.pattern.tags);
                    let recency = score::recency(now, entry.pattern.last_seen, half_life);
                    let total = score::combined(weights, semantic, tag_score, recency);
                    (entry.pattern.clone(), total)
                })
                .collect()
        };

        // Deterministic: score desc, then id asc.
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.id.cmp(&b.0.id))
        });
        scored.truncate(limit);
        Ok(scored)
    }

    /// Atomic usage update; confidence is recomputed by readers from the
    /// counters, so there is nothing else to refresh.
    pub fn update_usage(&self, id_or_key: &str, outcome: UsageOutcome) -> Result<()> {
        let pattern = {
            let id = self.resolve_id(id_or_key)?;
            let mut index = self.inner.index.write();
            let entry = index
                .get_mut(&id)
                .ok_or_else(|| TrinityError::not_found("pattern", &id))?;
            entry.pattern.usage.record(outcome);
            entry.pattern.last_seen = trinity_models::now_ms();
            entry.pattern.clone()
        };
        self.persist(&pattern)
    }

    /// Attach a precedent reference (workflow or reasoning id).
    pub fn add_precedent(&self, id_or_key: &str, reference: &str) -> Result<()> {
        let pattern = {
            let id = self.resolve_id(id_or_key)?;
            let mut index = self.inner.index.write();
            let entry = index
                .get_mut(&id)
                .ok_or_else(|| TrinityError::not_found("pattern", &id))?;
            if !entry.pattern.precedents.iter().any(|p| p == reference) {
                entry.pattern.precedents.push(reference.to_string());
            }
            entry.pattern.clone()
        };
        self.persist(&pattern)
    }

    /// Hide from default search; retained for audit.
    pub fn deprecate(&self, id_or_key: &str, reason: &str) -> Result<()> {
        let pattern = {
            let id = self.resolve_id(id_or_key)?;
            let mut index = self.inner.index.write();
            let entry = index
                .get_mut(&id)
                .ok_or_else(|| TrinityError::not_found("pattern", &id))?;
            entry.pattern.deprecated = Some(reason.to_string());
            entry.pattern.clone()
        };
        self.persist(&pattern)
    }

    /// Mark records unused past the staleness threshold as deprecated.
    /// Returns the ids swept.
    pub fn sweep_stale(&self) -> Result<Vec<String>> {
        let now = trinity_models::now_ms();
        let staleness = self.inner.config.staleness_days;
        let stale: Vec<String> = {
            let index = self.inner.index.read();
            index
                .values()
                .filter(|e| e.pattern.deprecated.is_none() && e.pattern.is_stale(now, staleness))
                .map(|e| e.pattern.id.clone())
                .collect()
        };
        for id in &stale {
            self.deprecate(id, "stale: unused past staleness threshold")?;
        }
        Ok(stale)
    }

    /// Derived confidence for a record, per the configured half-life.
    pub fn confidence(&self, id_or_key: &str) -> Result<f64> {
        let pattern = self.get(id_or_key)?;
        Ok(pattern.confidence(trinity_models::now_ms(), self.inner.config.half_life_days))
    }

    fn resolve_id(&self, id_or_key: &str) -> Result<String> {
        if self.inner.index.read().contains_key(id_or_key) {
            return Ok(id_or_key.to_string());
        }
        self.inner
            .by_key
            .read()
            .get(id_or_key)
            .cloned()
            .ok_or_else(|| TrinityError::not_found("pattern", id_or_key))
    }
}

#[async_trait::async_trait]
impl PatternSearch for PatternStore {
    async fn search(
        &self,
        query: &str,
        tags: BTreeSet<String>,
        limit: usize,
    ) -> Result<Vec<(Pattern, f64)>> {
        PatternStore::search(self, query, tags, limit).await
    }

    fn get(&self, id_or_key: &str) -> Result<Pattern> {
        PatternStore::get(self, id_or_key)
    }
}

#[cfg(test)]
mod tests;

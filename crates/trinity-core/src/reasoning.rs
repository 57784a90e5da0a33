//! Reasoning Persistence - every strategy and plan leaves an audit trail.
//!
//! Reasoning chains are written as markdown documents with YAML frontmatter
//! under `state/reasoning/<correlation_id>/<agent>.md`, and indexed in the
//! pattern store under a `reasoning/` key so they are retrievable alongside
//! precedents during planning.

use std::sync::Arc;
use tracing::warn;
use trinity_models::TrinityError;
use trinity_models::error::Result;
use trinity_storage::{ReasoningDoc, ReasoningFrontmatter, Storage};

use crate::patterns::PatternStore;

#[derive(Clone)]
pub struct ReasoningPersistence {
    storage: Arc<Storage>,
    patterns: PatternStore,
}

impl ReasoningPersistence {
    pub fn new(storage: Arc<Storage>, patterns: PatternStore) -> Self {
        Self { storage, patterns }
    }

    /// Persist one reasoning chain and index it. Returns the document id.
    pub async fn record(
        &self,
        agent: &str,
        correlation_id: &str,
        status: &str,
        body: &str,
    ) -> Result<String> {
        let doc = ReasoningDoc {
            frontmatter: ReasoningFrontmatter {
                id: trinity_models::new_id(),
                correlation_id: correlation_id.to_string(),
                created_at: chrono::Utc::now().to_rfc3339(),
                status: status.to_string(),
            },
            body: body.to_string(),
        };
        self.storage
            .reasoning
            .put(agent, &doc)
            .map_err(TrinityError::storage)?;

        // Index failures degrade audit search, not the write.
        if let Err(err) = self
            .patterns
            .store(
                &format!("reasoning/{correlation_id}/{agent}"),
                "reasoning",
                &format!("{agent} reasoning for {correlation_id}"),
                body,
                ["reasoning".to_string(), agent.to_string()]
                    .into_iter()
                    .collect(),
            )
            .await
        {
            warn!(correlation_id, agent, error = %err, "Failed to index reasoning record");
        }
        Ok(doc.frontmatter.id)
    }

    /// Persist an emitted plan as a markdown document whose frontmatter
    /// carries the plan's own id, under the `plan` agent name.
    pub fn record_plan(&self, plan: &trinity_models::Plan) -> Result<()> {
        let doc = ReasoningDoc {
            frontmatter: ReasoningFrontmatter {
                id: plan.id.clone(),
                correlation_id: plan.correlation_id.clone(),
                created_at: chrono::DateTime::from_timestamp_millis(plan.created_at)
                    .map(|dt| dt.to_rfc3339())
                    .unwrap_or_default(),
                status: "emitted".to_string(),
            },
            body: plan.reasoning_text.clone(),
        };
        self.storage
            .reasoning
            .put("plan", &doc)
            .map_err(TrinityError::storage)
    }

    pub fn get(&self, correlation_id: &str, agent: &str) -> Result<Option<ReasoningDoc>> {
        self.storage
            .reasoning
            .get(correlation_id, agent)
            .map_err(TrinityError::storage)
    }

    pub fn list_agents(&self, correlation_id: &str) -> Result<Vec<String>> {
        self.storage
            .reasoning
            .list_agents(correlation_id)
            .map_err(TrinityError::storage)
    }
}

//! Meta-Learner - offline improvement of patterns and prompt templates.
//!
//! Mines successful workflows for (role, prompt) pairs, clusters them by
//! shared vocabulary, and proposes improved prompt templates into the
//! pattern store behind a candidate flag. Candidates go live only after a
//! recorded HITL approval unless the autonomous flag is set. The learner
//! writes only to the pattern store; it never mutates agent runtime
//! behavior directly.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{info, warn};
use trinity_models::error::Result;
use trinity_models::{
    AgentRole, ApprovalDecision, Plan, TrinityError, UserApproval, WorkflowState,
};
use trinity_storage::Storage;

use crate::patterns::PatternStore;

pub const TEMPLATE_TAG_CANDIDATE: &str = "candidate";
pub const TEMPLATE_TAG_LIVE: &str = "live";

#[derive(Debug, Clone)]
pub struct LearnerConfig {
    /// Successful workflows required before a role's template is proposed.
    pub min_successes: usize,
    /// Keywords kept per proposed template.
    pub keyword_limit: usize,
    /// Candidates go live without HITL approval.
    pub autonomous: bool,
}

impl Default for LearnerConfig {
    fn default() -> Self {
        Self {
            min_successes: 3,
            keyword_limit: 8,
            autonomous: false,
        }
    }
}

#[derive(Debug, Default, PartialEq)]
pub struct LearnerReport {
    pub workflows_mined: usize,
    pub proposals: Vec<String>,
    pub promoted: Vec<String>,
}

pub struct MetaLearner {
    storage: Arc<Storage>,
    patterns: PatternStore,
    config: LearnerConfig,
}

impl MetaLearner {
    pub fn new(storage: Arc<Storage>, patterns: PatternStore, config: LearnerConfig) -> Self {
        Self {
            storage,
            patterns,
            config,
        }
    }

    fn template_key(role: AgentRole) -> String {
        format!("template/{role}")
    }

    /// One offline pass: mine completed workflows, propose templates.
    pub async fn run_once(&self) -> Result<LearnerReport> {
        let workflows = self
            .storage
            .workflows
            .list_workflows()
            .map_err(TrinityError::storage)?;
        let successful: Vec<_> = workflows
            .iter()
            .filter(|w| w.state == WorkflowState::Completed)
            .collect();

        // Collect prompts per role from the persisted plans of successful
        // workflows.
        let mut prompts_by_role: HashMap<AgentRole, Vec<String>> = HashMap::new();
        for workflow in &successful {
            let plan = match self.load_plan(&workflow.plan_id) {
                Ok(plan) => plan,
                Err(err) => {
                    warn!(workflow_id = %workflow.id, error = %err, "Plan record missing; skipping");
                    continue;
                }
            };
            for task in plan.tasks() {
                prompts_by_role
                    .entry(task.agent_role)
                    .or_default()
                    .push(task.prompt.clone());
            }
        }

        let mut report = LearnerReport {
            workflows_mined: successful.len(),
            ..Default::default()
        };

        for (role, prompts) in prompts_by_role {
            if prompts.len() < self.config.min_successes {
                continue;
            }
            let template = self.cluster_into_template(role, &prompts);
            let key = Self::template_key(role);
            let tag = if self.config.autonomous {
                TEMPLATE_TAG_LIVE
            } else {
                TEMPLATE_TAG_CANDIDATE
            };
            self.patterns
                .store(
                    &key,
                    "template",
                    &format!("prompt template for {role}"),
                    &template,
                    ["template".to_string(), tag.to_string()].into_iter().collect(),
                )
                .await?;
            info!(role = %role, tag, "Template proposed");
            if self.config.autonomous {
                report.promoted.push(key.clone());
            }
            report.proposals.push(key);
        }
        report.proposals.sort();
        report.promoted.sort();
        Ok(report)
    }

    /// Frequency clustering: the vocabulary shared across successful prompts
    /// becomes the emphasis section of the improved template.
    fn cluster_into_template(&self, role: AgentRole, prompts: &[String]) -> String {
        let mut frequency: BTreeMap<String, usize> = BTreeMap::new();
        for prompt in prompts {
            let tokens: BTreeSet<String> = prompt
                .to_lowercase()
                .split(|c: char| !c.is_alphanumeric())
                .filter(|t| t.len() > 3)
                .map(str::to_string)
                .collect();
            for token in tokens {
                *frequency.entry(token).or_default() += 1;
            }
        }
        let mut ranked: Vec<(String, usize)> = frequency.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        let keywords: Vec<String> = ranked
            .into_iter()
            .take(self.config.keyword_limit)
            .map(|(token, _)| token)
            .collect();

        format!(
            "You are the {role} agent. Successful runs of this role emphasized: {}.\n\
             Derived from {} successful prompts.",
            keywords.join(", "),
            prompts.len()
        )
    }

    /// Promote a candidate template to live. Requires a recorded YES/FORCE
    /// approval unless the learner is autonomous.
    pub async fn promote(&self, role: AgentRole, approval: Option<&UserApproval>) -> Result<()> {
        if !self.config.autonomous {
            let approved = approval.is_some_and(|a| {
                matches!(a.decision, ApprovalDecision::Yes | ApprovalDecision::Force)
            });
            if !approved {
                return Err(TrinityError::VerificationRejected {
                    reasons: vec!["template promotion requires HITL approval".into()],
                });
            }
        }
        let key = Self::template_key(role);
        let record = self.patterns.get(&key)?;
        let mut tags: BTreeSet<String> = record.tags.clone();
        tags.remove(TEMPLATE_TAG_CANDIDATE);
        tags.insert(TEMPLATE_TAG_LIVE.to_string());
        self.patterns
            .store(&key, "template", &record.description, &record.content, tags)
            .await?;
        info!(role = %role, "Template promoted to live");
        Ok(())
    }

    fn load_plan(&self, plan_id: &str) -> Result<Plan> {
        let record = self.patterns.get(&format!("plan/{plan_id}"))?;
        serde_json::from_str(&record.content).map_err(TrinityError::storage)
    }
}

//! Sub-agent contract and the role dispatch table.
//!
//! EXECUTOR never performs worker actions itself; it instantiates a
//! sub-agent per task through a factory keyed by the closed `AgentRole` set.
//! The capability surface is deliberately small: prepare, run, report_cost,
//! cancel. Cancellation is cooperative - agents honor the token at their
//! next suspension point.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use trinity_models::error::Result;
use trinity_models::{AgentRole, Artifact, ArtifactKind, TrinityError};

use super::context::AgentContext;

/// Token and currency usage for one sub-agent run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CostReport {
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub currency_amount: f64,
}

/// Output of one sub-agent run.
#[derive(Debug, Clone)]
pub struct AgentReport {
    pub artifact: Artifact,
    pub summary: String,
}

#[async_trait]
pub trait SubAgent: Send + Sync {
    /// Bind the bounded context before running.
    async fn prepare(&mut self, ctx: &AgentContext) -> Result<()>;

    /// Produce the proposed artifact. Must honor `cancel` at the next
    /// suspension point.
    async fn run(&mut self, ctx: &AgentContext, cancel: CancellationToken) -> Result<AgentReport>;

    /// Usage accrued by the last `run`.
    fn report_cost(&self) -> CostReport;

    /// Cooperative cancellation beyond the token (close connections etc).
    async fn cancel(&mut self) {}
}

pub trait SubAgentFactory: Send + Sync {
    fn create(&self, role: AgentRole) -> Box<dyn SubAgent>;
}

/// Dispatch table from role to factory, built once at bootstrap.
#[derive(Clone, Default)]
pub struct AgentRegistry {
    factories: HashMap<AgentRole, Arc<dyn SubAgentFactory>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, role: AgentRole, factory: Arc<dyn SubAgentFactory>) {
        self.factories.insert(role, factory);
    }

    /// Register one factory for every role.
    pub fn register_all(&mut self, factory: Arc<dyn SubAgentFactory>) {
        for role in AgentRole::ALL {
            self.factories.insert(role, factory.clone());
        }
    }

    pub fn spawn(&self, role: AgentRole) -> Result<Box<dyn SubAgent>> {
        self.factories
            .get(&role)
            .map(|factory| factory.create(role))
            .ok_or_else(|| TrinityError::not_found("agent factory", role.as_str()))
    }

    pub fn roles(&self) -> Vec<AgentRole> {
        let mut roles: Vec<AgentRole> = self.factories.keys().copied().collect();
        roles.sort_by_key(|r| r.as_str());
        roles
    }
}

/// Built-in placeholder agent: wraps the task prompt and params into a
/// document artifact. The real worker agents live outside the core and are
/// registered at bootstrap; this keeps `trinity run` operational without
/// them.
pub struct DraftAgent {
    role: AgentRole,
    last_cost: CostReport,
}

impl DraftAgent {
    pub fn new(role: AgentRole) -> Self {
        Self {
            role,
            last_cost: CostReport::default(),
        }
    }

    fn artifact_kind(role: AgentRole) -> ArtifactKind {
        match role {
            AgentRole::CodeWriter | AgentRole::Toolsmith => ArtifactKind::Code,
            AgentRole::TestAuthor => ArtifactKind::Test,
            AgentRole::Auditor | AgentRole::QualityEnforcer => ArtifactKind::Review,
            AgentRole::Merger => ArtifactKind::Merge,
            AgentRole::Planner | AgentRole::Learner => ArtifactKind::Document,
        }
    }
}

#[async_trait]
impl SubAgent for DraftAgent {
    async fn prepare(&mut self, _ctx: &AgentContext) -> Result<()> {
        Ok(())
    }

    async fn run(&mut self, ctx: &AgentContext, cancel: CancellationToken) -> Result<AgentReport> {
        if cancel.is_cancelled() {
            return Err(TrinityError::TaskFailed {
                task_id: ctx.task_id.clone(),
                detail: "cancelled before start".into(),
            });
        }
        let content = serde_json::json!({
            "prompt": ctx.prompt,
            "params": ctx.params,
            "role": self.role.as_str(),
        });
        self.last_cost = CostReport {
            model: "draft".into(),
            input_tokens: ctx.prompt.len() as u64 / 4,
            output_tokens: 64,
            currency_amount: 0.0,
        };
        Ok(AgentReport {
            artifact: Artifact::new(
                ctx.task_id.clone(),
                Self::artifact_kind(self.role),
                self.role,
                content,
            ),
            summary: format!("drafted {} artifact", self.role),
        })
    }

    fn report_cost(&self) -> CostReport {
        self.last_cost.clone()
    }
}

/// Factory producing [`DraftAgent`]s for every role.
pub struct DraftAgentFactory;

impl SubAgentFactory for DraftAgentFactory {
    fn create(&self, role: AgentRole) -> Box<dyn SubAgent> {
        Box::new(DraftAgent::new(role))
    }
}

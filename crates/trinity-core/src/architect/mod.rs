//! ARCHITECT - the strategist.
//!
//! Consumes signals, gathers precedents, writes a spec document, decomposes
//! it into tracks and tasks, attaches quality gates, externalizes its
//! reasoning, and emits an immutable plan. ARCHITECT is a pure producer: it
//! never executes tools or spawns sub-agents, and plan *structure* is a
//! deterministic function of the signal and precedents - only the prose of
//! the reasoning comes from the pluggable strategy writer.

use async_trait::async_trait;
use std::collections::BTreeSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use trinity_models::error::Result;
use trinity_models::{
    AgentRole, Pattern, Plan, QualityGate, Signal, SignalCategory, TaskSpec, Track, queues,
};

use crate::bus::MessageBus;
use crate::patterns::PatternStore;
use crate::reasoning::ReasoningPersistence;

/// Produces the externalized reasoning prose. The LLM lives behind this
/// seam; the default writer is deterministic.
#[async_trait]
pub trait StrategyWriter: Send + Sync {
    async fn reasoning(&self, signal: &Signal, precedents: &[(Pattern, f64)])
    -> anyhow::Result<String>;
}

/// Deterministic template writer used when no LLM is wired in.
pub struct TemplateStrategyWriter;

#[async_trait]
impl StrategyWriter for TemplateStrategyWriter {
    async fn reasoning(
        &self,
        signal: &Signal,
        precedents: &[(Pattern, f64)],
    ) -> anyhow::Result<String> {
        let mut text = format!(
            "# Strategy for {}\n\nCategory: {:?}. Confidence: {:.2}. Seen {} times.\n\n",
            signal.pattern_name, signal.category, signal.confidence, signal.evidence.times_seen
        );
        if precedents.is_empty() {
            text.push_str("No usable precedents; planning from first principles.\n");
        } else {
            text.push_str("Precedents considered:\n");
            for (pattern, score) in precedents {
                text.push_str(&format!("- {} (score {:.2})\n", pattern.key, score));
            }
        }
        Ok(text)
    }
}

#[derive(Debug, Clone)]
pub struct ArchitectConfig {
    /// Precedents retrieved per signal.
    pub precedent_limit: usize,
    /// Keywords that mark a plan's merge step as security-impacting.
    pub security_keywords: Vec<String>,
}

impl Default for ArchitectConfig {
    fn default() -> Self {
        Self {
            precedent_limit: 5,
            security_keywords: vec![
                "security".into(),
                "auth".into(),
                "credential".into(),
                "secret".into(),
            ],
        }
    }
}

pub struct Architect {
    patterns: PatternStore,
    reasoning: ReasoningPersistence,
    bus: MessageBus,
    writer: std::sync::Arc<dyn StrategyWriter>,
    config: ArchitectConfig,
}

impl Architect {
    pub fn new(
        patterns: PatternStore,
        reasoning: ReasoningPersistence,
        bus: MessageBus,
        writer: std::sync::Arc<dyn StrategyWriter>,
        config: ArchitectConfig,
    ) -> Self {
        Self {
            patterns,
            reasoning,
            bus,
            writer,
            config,
        }
    }

    /// Synthesize a plan from one signal.
    pub async fn synthesize(&self, signal: &Signal) -> Result<Plan> {
        // 1. Context gathering: precedents by category and description.
        let tags: BTreeSet<String> = [signal.pattern_name.clone()].into_iter().collect();
        let precedents = self
            .patterns
            .search(&signal.description, tags, self.config.precedent_limit)
            .await?;

        // 2. Spec generation.
        let spec_body = self.render_spec(signal);
        self.reasoning
            .record("spec", &signal.correlation_id, "final", &spec_body)
            .await?;

        // 3-4. Planning and quality gates.
        let security_impacting = self.is_security_impacting(signal);
        let tracks = self.decompose(signal, security_impacting);
        let mut plan = Plan::new(signal.correlation_id.clone(), tracks);
        plan.pattern_key = Some(signal.pattern_name.clone());
        plan.quality_gates = vec![QualityGate::FullTestPass, QualityGate::ZeroViolations];
        if security_impacting {
            plan.quality_gates.push(QualityGate::HitlApproval {
                risk_category: "security".into(),
            });
        }

        // 5. Reasoning externalization.
        let reasoning_text = self
            .writer
            .reasoning(signal, &precedents)
            .await
            .unwrap_or_else(|err| {
                warn!(error = %err, "Strategy writer failed; recording minimal reasoning");
                format!("strategy writer unavailable: {err}")
            });
        self.reasoning
            .record("architect", &signal.correlation_id, "final", &reasoning_text)
            .await?;
        plan.reasoning_text = reasoning_text;
        self.reasoning.record_plan(&plan)?;

        info!(
            plan_id = %plan.id,
            correlation_id = %plan.correlation_id,
            tasks = plan.task_count(),
            "Plan synthesized"
        );
        Ok(plan)
    }

    /// Spec document: new-artifact spec for intent/opportunity signals,
    /// diff/refactor spec for failures and recurring topics about existing
    /// systems.
    fn render_spec(&self, signal: &Signal) -> String {
        let kind = match signal.category {
            SignalCategory::UserIntent | SignalCategory::Opportunity => "Feature Specification",
            SignalCategory::Failure => "Diff / Refactor Specification",
            SignalCategory::RecurringTopic => "Improvement Specification",
        };
        format!(
            "# {kind}\n\n## Observation\n\n{}\n\n## Evidence\n\nPattern `{}` seen {} times; \
             keywords: {}.\n\n## Acceptance\n\n- 100% test pass rate\n- zero constitutional \
             violations\n",
            signal.description,
            signal.pattern_name,
            signal.evidence.times_seen,
            signal.evidence.keywords.join(", "),
        )
    }

    fn is_security_impacting(&self, signal: &Signal) -> bool {
        let haystack = format!(
            "{} {}",
            signal.description.to_lowercase(),
            signal.evidence.keywords.join(" ").to_lowercase()
        );
        self.config
            .security_keywords
            .iter()
            .any(|keyword| haystack.contains(keyword))
    }

    /// Deterministic decomposition into tracks. Failures get a diagnose
    /// stage; everything gets implementation, review, and integration.
    fn decompose(&self, signal: &Signal, security_impacting: bool) -> Vec<Track> {
        let mut tracks = Vec::new();
        let subject = &signal.description;

        if signal.category == SignalCategory::Failure {
            tracks.push(Track {
                name: "diagnose".into(),
                parallel: false,
                depends_on: vec![],
                tasks: vec![TaskSpec::new(
                    AgentRole::Auditor,
                    format!("Diagnose the root cause of: {subject}"),
                )],
            });
        } else {
            tracks.push(Track {
                name: "design".into(),
                parallel: false,
                depends_on: vec![],
                tasks: vec![TaskSpec::new(
                    AgentRole::Planner,
                    format!("Design an approach for: {subject}"),
                )],
            });
        }
        let first_track = tracks[0].name.clone();

        let implement = TaskSpec::new(
            AgentRole::CodeWriter,
            format!("Implement the change for: {subject}"),
        );
        let test = TaskSpec::new(
            AgentRole::TestAuthor,
            format!("Write tests covering: {subject}"),
        )
        .depends_on([implement.id.clone()]);
        let review = TaskSpec::new(AgentRole::Auditor, format!("Review the change for: {subject}"))
            .depends_on([implement.id.clone(), test.id.clone()]);
        tracks.push(Track {
            name: "implement".into(),
            parallel: true,
            depends_on: vec![first_track],
            tasks: vec![implement, test, review],
        });

        let mut merge = TaskSpec::new(AgentRole::Merger, format!("Merge the change for: {subject}"));
        if security_impacting {
            merge = merge.constrained("risk:security");
        }
        tracks.push(Track {
            name: "integrate".into(),
            parallel: false,
            depends_on: vec!["implement".into()],
            tasks: vec![merge],
        });

        tracks
    }

    /// Consume `signal_queue`, emit plans on `plan_queue`, until cancelled.
    pub async fn run(&self, cancel: CancellationToken) {
        let subscription = self.bus.subscribe(queues::SIGNAL_QUEUE);
        loop {
            let delivery = tokio::select! {
                delivery = subscription.recv() => delivery,
                _ = cancel.cancelled() => return,
            };
            let delivery = match delivery {
                Ok(delivery) => delivery,
                Err(err) => {
                    warn!(error = %err, "Signal queue receive failed");
                    continue;
                }
            };
            let signal: Signal = match delivery.message.decode() {
                Ok(signal) => signal,
                Err(err) => {
                    warn!(error = %err, "Undecodable signal message");
                    let _ = delivery.nack(false).await;
                    continue;
                }
            };
            match self.synthesize(&signal).await {
                Ok(plan) => {
                    let priority = signal.category.priority();
                    let payload = match serde_json::to_value(&plan) {
                        Ok(payload) => payload,
                        Err(err) => {
                            warn!(error = %err, "Unserializable plan");
                            let _ = delivery.nack(false).await;
                            continue;
                        }
                    };
                    let publish = self
                        .bus
                        .publish(
                            queues::PLAN_QUEUE,
                            payload,
                            priority,
                            Some(plan.correlation_id.clone()),
                        )
                        .await;
                    match publish {
                        Ok(_) => {
                            let _ = delivery.ack().await;
                        }
                        Err(err) => {
                            warn!(error = %err, "Plan publish failed; signal will redeliver");
                            let _ = delivery.nack(true).await;
                        }
                    }
                }
                Err(err) => {
                    warn!(signal_id = %signal.id, error = %err, "Plan synthesis failed");
                    let _ = delivery.nack(true).await;
                }
            }
        }
    }

    /// Emit a one-off plan revision for a rejected workflow (the ARCHITECT
    /// re-planning loop after a verification rejection).
    pub async fn replan(&self, previous: &Plan, rejection_reasons: &[String]) -> Result<Plan> {
        let mut revised = previous.revise(previous.tracks.clone());
        revised.reasoning_text = format!(
            "Revision of {} after verification rejection: {}",
            previous.id,
            rejection_reasons.join("; ")
        );
        self.reasoning
            .record(
                "architect",
                &revised.correlation_id,
                "revised",
                &revised.reasoning_text,
            )
            .await?;
        self.bus
            .publish(
                queues::PLAN_QUEUE,
                serde_json::to_value(&revised).map_err(trinity_models::TrinityError::storage)?,
                SignalCategory::Failure.priority(),
                Some(revised.correlation_id.clone()),
            )
            .await?;
        Ok(revised)
    }
}

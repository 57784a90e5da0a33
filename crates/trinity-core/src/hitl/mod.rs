//! Human-in-the-loop approval gates.
//!
//! A gate publishes a Question on `human_review_queue` and waits on a
//! per-question response queue. No response within the window records a
//! TIMEOUT decision and the workflow stays paused with no state loss; LATER
//! re-offers the question after the quiet-hours interval (optionally
//! escalating to NO after a configured number of deferrals). The workflow
//! pause/resume around the gate belongs to EXECUTOR.

use std::time::Duration;
use tracing::{info, warn};
use trinity_models::error::Result;
use trinity_models::{ApprovalDecision, Question, QuestionKind, UserApproval, queues};

use crate::bus::MessageBus;

#[derive(Debug, Clone)]
pub struct HitlConfig {
    /// Window for one offer of a question.
    pub timeout: Duration,
    /// Quiet-hours interval before a LATER question is re-offered.
    pub requeue_interval: Duration,
    /// LATER responses beyond this escalate to NO. None = never escalate.
    pub max_deferrals: Option<u32>,
}

impl Default for HitlConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(300),
            requeue_interval: Duration::from_secs(1800),
            max_deferrals: None,
        }
    }
}

#[derive(Clone)]
pub struct HitlGates {
    bus: MessageBus,
    config: HitlConfig,
}

impl HitlGates {
    pub fn new(bus: MessageBus, config: HitlConfig) -> Self {
        Self { bus, config }
    }

    fn question_priority(kind: QuestionKind) -> i64 {
        match kind {
            QuestionKind::ForceVerification => 20,
            QuestionKind::BudgetExtension => 15,
            QuestionKind::ApprovalGate => 10,
        }
    }

    /// Offer a question once and wait for its answer or the timeout.
    pub async fn ask_once(&self, question: &Question) -> Result<UserApproval> {
        self.bus
            .publish(
                queues::HUMAN_REVIEW_QUEUE,
                serde_json::to_value(question).map_err(trinity_models::TrinityError::storage)?,
                Self::question_priority(question.kind),
                Some(question.workflow_id.clone()),
            )
            .await?;
        info!(question_id = %question.id, workflow_id = %question.workflow_id, "Question offered for human review");

        let response_queue = queues::human_response(&question.id);
        let subscription = self.bus.subscribe(&response_queue);
        match tokio::time::timeout(self.config.timeout, subscription.recv()).await {
            Ok(delivery) => {
                let delivery = delivery?;
                let approval: UserApproval = delivery
                    .message
                    .decode()
                    .map_err(trinity_models::TrinityError::storage)?;
                delivery.ack().await?;
                Ok(approval)
            }
            Err(_) => {
                warn!(question_id = %question.id, "Question timed out without a response");
                Ok(UserApproval::new(question, ApprovalDecision::Timeout))
            }
        }
    }

    /// Offer a question until a terminal decision arrives. TIMEOUT re-offers
    /// immediately (the workflow stays paused throughout); LATER waits out
    /// the quiet-hours interval first and may escalate to NO when deferral
    /// budget is configured and exhausted.
    pub async fn ask(&self, question: &Question) -> Result<UserApproval> {
        let mut deferrals = 0u32;
        loop {
            let approval = self.ask_once(question).await?;
            match approval.decision {
                ApprovalDecision::Timeout => continue,
                ApprovalDecision::Later => {
                    deferrals += 1;
                    if let Some(max) = self.config.max_deferrals
                        && deferrals > max
                    {
                        info!(question_id = %question.id, deferrals, "Deferral budget exhausted, escalating to NO");
                        return Ok(UserApproval::new(question, ApprovalDecision::No)
                            .with_annotations("auto-escalated after max deferrals"));
                    }
                    tokio::time::sleep(self.config.requeue_interval).await;
                }
                _ => return Ok(approval),
            }
        }
    }

    /// Publish a decision for a pending question. Used by the CLI surface
    /// and by tests standing in for the human.
    pub async fn respond(&self, approval: &UserApproval) -> Result<()> {
        self.bus
            .publish(
                &queues::human_response(&approval.question_id),
                serde_json::to_value(approval).map_err(trinity_models::TrinityError::storage)?,
                0,
                Some(approval.workflow_id.clone()),
            )
            .await?;
        Ok(())
    }
}

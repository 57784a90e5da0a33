//! EXECUTOR - the meta-orchestrator.
//!
//! Turns plans into running workflows: verifies the foundation, creates the
//! workflow, hands the task DAG to the parallel executor, spawns role-
//! dispatched sub-agents with bounded context, passes every artifact through
//! the verification gate, checkpoints completed tasks, and records outcomes
//! to the pattern store and cost ledger. EXECUTOR itself performs no worker
//! actions - no code edits, no git, no shell.

pub mod context;
pub mod gate;
pub mod subagent;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use trinity_models::error::Result;
use trinity_models::{
    ApprovalDecision, Plan, Question, QuestionKind, TaskSpec, TrinityError, UsageOutcome,
    UserApproval, Workflow, WorkflowState, queues,
};

use crate::bus::MessageBus;
use crate::cost::CostLedger;
use crate::engine::{DispatchGate, ExecutionPolicy, ParallelExecutor, TaskGraph, TaskRunner};
use crate::foundation::FoundationVerifier;
use crate::hitl::HitlGates;
use crate::patterns::{PatternSearch, PatternStore};
use crate::workflow::{
    REASON_USER_REJECTED, REASON_WORKFLOW_TIMEOUT, WorkflowMachine,
};

pub use context::AgentContext;
pub use gate::{AbsoluteVerification, AcceptAll, Verdict, VerificationGate};
pub use subagent::{AgentRegistry, AgentReport, CostReport, DraftAgentFactory, SubAgent, SubAgentFactory};

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub policy: ExecutionPolicy,
    /// Risk categories that require a HITL gate before the task runs.
    pub gated_risk_categories: Vec<String>,
    /// Allow a HITL FORCE decision to override a verification rejection.
    pub hitl_force_enabled: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            policy: ExecutionPolicy::default(),
            gated_risk_categories: vec!["security".into(), "performance".into()],
            hitl_force_enabled: false,
        }
    }
}

#[derive(Clone)]
pub struct Executor {
    machine: WorkflowMachine,
    bus: MessageBus,
    ledger: CostLedger,
    patterns: PatternStore,
    foundation: Arc<FoundationVerifier>,
    hitl: HitlGates,
    registry: Arc<AgentRegistry>,
    gate: Arc<dyn VerificationGate>,
    config: Arc<ExecutorConfig>,
}

impl Executor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        machine: WorkflowMachine,
        bus: MessageBus,
        ledger: CostLedger,
        patterns: PatternStore,
        foundation: Arc<FoundationVerifier>,
        hitl: HitlGates,
        registry: Arc<AgentRegistry>,
        gate: Arc<dyn VerificationGate>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            machine,
            bus,
            ledger,
            patterns,
            foundation,
            hitl,
            registry,
            gate,
            config: Arc::new(config),
        }
    }

    /// Accept a plan: verify foundation, create the workflow, execute its
    /// DAG, and record the outcome. Returns the workflow in its final state.
    pub async fn accept(&self, plan: Plan) -> Result<Workflow> {
        if let Err(err) = self.foundation.verify_for_execution().await {
            self.publish_telemetry(
                "foundation_failed",
                json!({"plan_id": plan.id, "error": err.to_string()}),
                Some(plan.correlation_id.clone()),
            )
            .await;
            return Err(err);
        }

        // Cycles are rejected before any workflow exists.
        let graph = TaskGraph::from_plan(&plan)?;

        let workflow = self.machine.create(&plan)?;

        if plan.is_empty() {
            let done =
                self.machine
                    .transition(&workflow.id, WorkflowState::Completed, None, None)?;
            info!(workflow_id = %done.id, "Empty plan completed immediately");
            return Ok(done);
        }

        self.machine
            .transition(&workflow.id, WorkflowState::Running, None, None)?;

        let outcome = self.drive(&graph, &workflow.id).await?;
        self.record_outcome(&plan, &outcome).await;
        Ok(outcome)
    }

    /// Resume a previously created workflow from its checkpoints.
    pub async fn resume(&self, workflow_id: &str) -> Result<Workflow> {
        let workflow = self.machine.get(workflow_id)?;
        if workflow.state.is_terminal() {
            return Ok(workflow);
        }
        self.foundation.verify_for_execution().await?;

        let resume = self.machine.resume(workflow_id)?;
        if resume.state == WorkflowState::Failed {
            return self.machine.get(workflow_id);
        }

        let plan = self.load_plan(&workflow)?;
        let graph = TaskGraph::from_plan(&plan)?;
        if matches!(
            resume.state,
            WorkflowState::Checkpointed | WorkflowState::Paused
        ) {
            self.machine
                .transition(workflow_id, WorkflowState::Running, None, None)?;
        }

        let outcome = self.drive(&graph, workflow_id).await?;
        self.record_outcome(&plan, &outcome).await;
        Ok(outcome)
    }

    /// Plans are persisted as pattern records keyed by plan id so a restart
    /// can rebuild the DAG for resumable workflows.
    fn load_plan(&self, workflow: &Workflow) -> Result<Plan> {
        let record = self.patterns.get(&plan_record_key(&workflow.plan_id))?;
        serde_json::from_str(&record.content).map_err(TrinityError::storage)
    }

    pub async fn persist_plan(&self, plan: &Plan) -> Result<()> {
        self.patterns
            .store(
                &plan_record_key(&plan.id),
                "plan",
                "persisted plan document",
                &serde_json::to_string(plan).map_err(TrinityError::storage)?,
                ["plan".to_string()].into_iter().collect(),
            )
            .await?;
        Ok(())
    }

    /// Run the graph to a terminal workflow state, handling budget pauses.
    async fn drive(&self, graph: &TaskGraph, workflow_id: &str) -> Result<Workflow> {
        loop {
            let completed = self.completed_outputs(workflow_id)?;
            let runner = Arc::new(WorkflowTaskRunner {
                executor: self.clone(),
                workflow_id: workflow_id.to_string(),
                outputs: Mutex::new(completed.clone()),
                gate_serial: Arc::new(tokio::sync::Mutex::new(())),
            });
            let admission = Arc::new(LedgerGate {
                ledger: self.ledger.clone(),
            });
            let engine = ParallelExecutor::new(
                self.config.policy.clone(),
                runner,
                Some(admission),
            );

            let cancel = CancellationToken::new();
            match engine.execute_graph(graph, completed, cancel).await {
                Ok(report) => {
                    let current = self.machine.get(workflow_id)?;
                    if current.state.is_terminal() {
                        return Ok(current);
                    }
                    if report.success {
                        return self.machine.transition(
                            workflow_id,
                            WorkflowState::Completed,
                            None,
                            None,
                        );
                    }
                    let reason = report
                        .first_failure()
                        .and_then(|f| f.error.clone())
                        .unwrap_or_else(|| "task failure".to_string());
                    let failing_step = report.first_failure().map(|f| f.task_id.clone());
                    self.publish_failure_report(workflow_id, failing_step.as_deref(), &reason)
                        .await;
                    return self.machine.transition(
                        workflow_id,
                        WorkflowState::Failed,
                        None,
                        Some(&reason),
                    );
                }
                Err(TrinityError::BudgetExhausted {
                    spent_usd,
                    budget_usd,
                }) => {
                    if !self.handle_budget_pause(workflow_id, spent_usd, budget_usd).await? {
                        // Stays paused awaiting a human; not a process error.
                        return self.machine.get(workflow_id);
                    }
                    // Extended: loop re-runs the graph, seeded with the
                    // checkpointed outputs.
                }
                Err(TrinityError::Timeout { scope, .. }) if scope == "workflow" => {
                    self.publish_failure_report(workflow_id, None, REASON_WORKFLOW_TIMEOUT)
                        .await;
                    return self.machine.transition(
                        workflow_id,
                        WorkflowState::Failed,
                        None,
                        Some(REASON_WORKFLOW_TIMEOUT),
                    );
                }
                Err(err) => {
                    let current = self.machine.get(workflow_id)?;
                    if current.state.is_terminal() {
                        return Ok(current);
                    }
                    let reason = err.to_string();
                    self.publish_failure_report(workflow_id, None, &reason).await;
                    return self.machine.transition(
                        workflow_id,
                        WorkflowState::Failed,
                        None,
                        Some(&reason),
                    );
                }
            }
        }
    }

    /// Outputs of already-checkpointed steps, used to seed resume runs.
    fn completed_outputs(&self, workflow_id: &str) -> Result<HashMap<String, Value>> {
        let workflow = self.machine.get(workflow_id)?;
        let mut outputs = HashMap::new();
        if workflow.completed_steps.is_empty() {
            return Ok(outputs);
        }
        let resume = self.machine.resume(workflow_id)?;
        // Only the retained window is recoverable; older steps re-run.
        if let Some(checkpoint) = resume.last_checkpoint {
            for step in &workflow.completed_steps {
                if step == &checkpoint.step_name {
                    outputs.insert(step.clone(), checkpoint.outputs.clone());
                }
            }
        }
        for step in &workflow.completed_steps {
            outputs
                .entry(step.clone())
                .or_insert_with(|| json!({"checkpointed": true}));
        }
        Ok(outputs)
    }

    /// Pause for a budget extension. Returns true when extended and the
    /// graph should re-run.
    async fn handle_budget_pause(
        &self,
        workflow_id: &str,
        spent_usd: f64,
        budget_usd: f64,
    ) -> Result<bool> {
        let current = self.machine.get(workflow_id)?;
        if current.state == WorkflowState::Running {
            self.machine
                .transition(workflow_id, WorkflowState::Paused, None, None)?;
        }
        let question = Question::new(
            workflow_id,
            "gate-budget",
            QuestionKind::BudgetExtension,
            "budget",
            json!({
                "spent_usd": spent_usd,
                "budget_usd": budget_usd,
                "requested_extension_usd": budget_usd.max(0.01),
            }),
        );
        let approval = self.hitl.ask(&question).await?;
        self.audit_approval(&approval).await;
        match approval.decision {
            ApprovalDecision::Yes | ApprovalDecision::Force => {
                let extension = approval
                    .annotations
                    .as_deref()
                    .and_then(|a| a.parse::<f64>().ok())
                    .unwrap_or_else(|| budget_usd.max(0.01));
                self.ledger.extend_budget(extension);
                self.machine
                    .transition(workflow_id, WorkflowState::Running, None, None)?;
                info!(workflow_id, extension, "Budget extended, resuming dispatch");
                Ok(true)
            }
            _ => {
                info!(workflow_id, "Budget extension not granted, workflow stays paused");
                Ok(false)
            }
        }
    }

    async fn record_outcome(&self, plan: &Plan, workflow: &Workflow) {
        let outcome = match workflow.state {
            WorkflowState::Completed => UsageOutcome::Success,
            WorkflowState::Failed => UsageOutcome::Failure,
            _ => return,
        };
        if let Some(pattern_key) = &plan.pattern_key {
            if let Err(err) = self.patterns.update_usage(pattern_key, outcome) {
                warn!(pattern_key, error = %err, "Failed to record pattern outcome");
            }
            if let Err(err) = self.patterns.add_precedent(pattern_key, &workflow.id) {
                warn!(pattern_key, error = %err, "Failed to attach precedent");
            }
        }
        self.publish_telemetry(
            match outcome {
                UsageOutcome::Success => "workflow_completed",
                UsageOutcome::Failure => "workflow_failed",
            },
            json!({
                "workflow_id": workflow.id,
                "plan_id": plan.id,
                "cost_usd": self
                    .ledger
                    .spent(&trinity_models::CostScope::Workflow(workflow.id.clone())),
            }),
            Some(workflow.correlation_id.clone()),
        )
        .await;
    }

    /// Fatal failures report the failing step, the last checkpoint, cost so
    /// far, and a suggested next action.
    async fn publish_failure_report(
        &self,
        workflow_id: &str,
        failing_step: Option<&str>,
        reason: &str,
    ) {
        let last_checkpoint = self
            .machine
            .get(workflow_id)
            .ok()
            .and_then(|w| w.checkpoints.last().cloned());
        let cost = self
            .ledger
            .spent(&trinity_models::CostScope::Workflow(workflow_id.to_string()));
        let suggestion = if reason == REASON_WORKFLOW_TIMEOUT {
            "resume with a larger workflow timeout"
        } else if reason == REASON_USER_REJECTED {
            "re-plan with the rejection feedback"
        } else {
            "resume from the last checkpoint or re-plan"
        };
        self.publish_telemetry(
            "workflow_failure_report",
            json!({
                "workflow_id": workflow_id,
                "failing_step": failing_step,
                "last_checkpoint": last_checkpoint,
                "cost_incurred_usd": cost,
                "reason": reason,
                "suggested_next_action": suggestion,
            }),
            None,
        )
        .await;
    }

    async fn audit_approval(&self, approval: &UserApproval) {
        if let Ok(payload) = serde_json::to_value(approval) {
            self.publish_telemetry("user_approval", payload, Some(approval.workflow_id.clone()))
                .await;
        }
    }

    async fn publish_telemetry(&self, event: &str, payload: Value, correlation_id: Option<String>) {
        let message = json!({"event": event, "payload": payload});
        if let Err(err) = self
            .bus
            .publish(queues::TELEMETRY_OUT, message, 0, correlation_id)
            .await
        {
            warn!(event, error = %err, "Failed to publish telemetry");
        }
    }

    /// Consume `plan_queue` until cancelled.
    pub async fn run(&self, cancel: CancellationToken) {
        let subscription = self.bus.subscribe(queues::PLAN_QUEUE);
        loop {
            let delivery = tokio::select! {
                delivery = subscription.recv() => delivery,
                _ = cancel.cancelled() => return,
            };
            let delivery = match delivery {
                Ok(delivery) => delivery,
                Err(err) => {
                    error!(error = %err, "Plan queue receive failed");
                    continue;
                }
            };
            let plan: Plan = match delivery.message.decode() {
                Ok(plan) => plan,
                Err(err) => {
                    warn!(error = %err, "Undecodable plan message");
                    let _ = delivery.nack(false).await;
                    continue;
                }
            };
            let plan_id = plan.id.clone();
            if let Err(err) = self.persist_plan(&plan).await {
                warn!(plan_id = %plan_id, error = %err, "Failed to persist plan record");
            }
            match self.accept(plan).await {
                Ok(workflow) => {
                    info!(plan_id = %plan_id, workflow_id = %workflow.id, state = %workflow.state, "Plan processed");
                    let _ = delivery.ack().await;
                }
                Err(TrinityError::BrokenFoundation(reason)) => {
                    error!(plan_id = %plan_id, reason, "Foundation broken; plan left on queue");
                    let _ = delivery.nack(true).await;
                }
                Err(err) => {
                    error!(plan_id = %plan_id, error = %err, "Plan acceptance failed");
                    let _ = delivery.nack(true).await;
                }
            }
        }
    }
}

fn plan_record_key(plan_id: &str) -> String {
    format!("plan/{plan_id}")
}

struct LedgerGate {
    ledger: CostLedger,
}

impl DispatchGate for LedgerGate {
    fn check(&self, spec: &TaskSpec) -> Result<()> {
        let projected = self
            .ledger
            .project(spec.agent_role.as_str(), "default");
        self.ledger.check_dispatch(projected)
    }
}

/// Engine-facing runner: HITL gate, sub-agent spawn, cost recording,
/// verification gate, checkpointing.
struct WorkflowTaskRunner {
    executor: Executor,
    workflow_id: String,
    outputs: Mutex<HashMap<String, Value>>,
    /// Serializes approval gates so pause/resume transitions do not race.
    gate_serial: Arc<tokio::sync::Mutex<()>>,
}

impl WorkflowTaskRunner {
    async fn approval_gate(&self, spec: &TaskSpec, risk: &str) -> Result<()> {
        let _serial = self.gate_serial.lock().await;
        let machine = &self.executor.machine;
        machine.transition(&self.workflow_id, WorkflowState::Paused, Some(&spec.id), None)?;

        let question = Question::new(
            &self.workflow_id,
            format!("gate-{risk}"),
            QuestionKind::ApprovalGate,
            &spec.id,
            json!({
                "risk": risk,
                "prompt": spec.prompt,
                "estimated_cost_usd": self
                    .executor
                    .ledger
                    .project(spec.agent_role.as_str(), "default"),
            }),
        );
        let approval = self.executor.hitl.ask(&question).await?;
        self.executor.audit_approval(&approval).await;

        match approval.decision {
            ApprovalDecision::Yes | ApprovalDecision::Force => {
                machine.transition(&self.workflow_id, WorkflowState::Running, None, None)?;
                Ok(())
            }
            _ => {
                machine.transition(
                    &self.workflow_id,
                    WorkflowState::Failed,
                    None,
                    Some(REASON_USER_REJECTED),
                )?;
                Err(TrinityError::TaskFailed {
                    task_id: spec.id.clone(),
                    detail: REASON_USER_REJECTED.into(),
                })
            }
        }
    }

    async fn verify_artifact(&self, report: &AgentReport, spec: &TaskSpec) -> Result<()> {
        match self.executor.gate.verify(&report.artifact).await? {
            Verdict::Verified => Ok(()),
            Verdict::Rejected { reasons } => {
                if self.executor.config.hitl_force_enabled {
                    let question = Question::new(
                        &self.workflow_id,
                        "gate-force-verification",
                        QuestionKind::ForceVerification,
                        &spec.id,
                        json!({"reasons": reasons, "artifact_id": report.artifact.id}),
                    );
                    let approval = self.executor.hitl.ask(&question).await?;
                    self.executor.audit_approval(&approval).await;
                    if approval.decision == ApprovalDecision::Force {
                        warn!(task_id = %spec.id, "Verification rejection overridden by HITL FORCE");
                        return Ok(());
                    }
                }
                Err(TrinityError::VerificationRejected { reasons })
            }
        }
    }
}

#[async_trait]
impl TaskRunner for WorkflowTaskRunner {
    async fn run_task(&self, spec: TaskSpec, cancel: CancellationToken) -> Result<Value> {
        if let Some(risk) = spec.risk_category()
            && self
                .executor
                .config
                .gated_risk_categories
                .iter()
                .any(|category| category == risk)
        {
            self.approval_gate(&spec, risk).await?;
        }

        let workflow = self.executor.machine.get(&self.workflow_id)?;
        let upstream: BTreeMap<String, Value> = {
            let outputs = self.outputs.lock();
            spec.depends_on
                .iter()
                .filter_map(|dep| outputs.get(dep).map(|v| (dep.clone(), v.clone())))
                .collect()
        };
        let ctx = AgentContext::new(
            spec.id.clone(),
            self.workflow_id.clone(),
            workflow.correlation_id.clone(),
            spec.prompt.clone(),
            spec.params.clone(),
        )
        .with_patterns(Arc::new(self.executor.patterns.clone()) as Arc<dyn PatternSearch>)
        .with_upstream(upstream);

        let mut agent = self.executor.registry.spawn(spec.agent_role)?;
        agent.prepare(&ctx).await?;
        let run_result = agent.run(&ctx, cancel.clone()).await;

        // Cost is incurred either way; record before judging the artifact.
        let cost = agent.report_cost();
        let entry = trinity_models::CostEntry::new(
            spec.id.clone(),
            self.workflow_id.clone(),
            workflow.correlation_id.clone(),
            spec.agent_role.as_str(),
            cost.model.clone(),
            cost.input_tokens,
            cost.output_tokens,
            cost.currency_amount,
        );
        if let Err(err) = self.executor.ledger.record(entry) {
            warn!(task_id = %spec.id, error = %err, "Failed to record cost entry");
        }

        let report = run_result?;
        if report.artifact.partial {
            agent.cancel().await;
            return Err(TrinityError::TaskFailed {
                task_id: spec.id.clone(),
                detail: "partial result treated as failure".into(),
            });
        }

        self.verify_artifact(&report, &spec).await?;

        let output = json!({
            "artifact_id": report.artifact.id,
            "kind": report.artifact.kind,
            "content": report.artifact.content,
            "summary": report.summary,
        });

        self.executor.machine.checkpoint(
            &self.workflow_id,
            &spec.id,
            output.clone(),
            ctx.snapshot(),
            json!([]),
        )?;
        self.outputs.lock().insert(spec.id.clone(), output.clone());
        Ok(output)
    }
}

#[cfg(test)]
mod tests;

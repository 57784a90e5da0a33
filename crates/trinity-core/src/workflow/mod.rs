//! Workflow state machine with checkpoint persistence and resumability.
//!
//! Owns workflows and checkpoints exclusively; every other component mutates
//! workflow state through these operations. Transitions outside the legal
//! graph raise `IllegalTransition` synchronously. Checkpoints are written
//! atomically with a checksum, and a checksum mismatch on resume moves the
//! workflow to FAILED with reason `corrupt_checkpoint`.

use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};
use trinity_models::error::Result;
use trinity_models::{Checkpoint, Plan, TrinityError, Workflow, WorkflowState};
use trinity_storage::{CheckpointRead, Storage};

pub const REASON_CORRUPT_CHECKPOINT: &str = "corrupt_checkpoint";
pub const REASON_USER_REJECTED: &str = "user_rejected";
pub const REASON_WORKFLOW_TIMEOUT: &str = "workflow_timeout";

#[derive(Clone)]
pub struct WorkflowMachine {
    storage: Arc<Storage>,
    /// Checkpoints retained per workflow; older ones are pruned.
    retention: usize,
}

/// Result of a resume attempt.
#[derive(Debug)]
pub struct ResumePoint {
    pub state: WorkflowState,
    pub last_checkpoint: Option<Checkpoint>,
    pub reason: Option<String>,
}

impl WorkflowMachine {
    pub fn new(storage: Arc<Storage>, retention: usize) -> Self {
        Self {
            storage,
            retention: retention.max(1),
        }
    }

    /// Create a PENDING workflow from a validated plan. Step names are the
    /// plan's task ids.
    pub fn create(&self, plan: &Plan) -> Result<Workflow> {
        plan.validate()
            .map_err(|detail| TrinityError::TaskFailed {
                task_id: plan.id.clone(),
                detail,
            })?;
        let steps: Vec<String> = plan.tasks().map(|t| t.id.clone()).collect();
        let workflow = Workflow::new(plan.id.clone(), plan.correlation_id.clone(), steps);
        self.storage
            .workflows
            .put_workflow(&workflow)
            .map_err(TrinityError::storage)?;
        info!(workflow_id = %workflow.id, plan_id = %plan.id, "Workflow created");
        Ok(workflow)
    }

    pub fn get(&self, workflow_id: &str) -> Result<Workflow> {
        self.storage
            .workflows
            .get_workflow(workflow_id)
            .map_err(TrinityError::storage)?
            .ok_or_else(|| TrinityError::not_found("workflow", workflow_id))
    }

    pub fn list(&self) -> Result<Vec<Workflow>> {
        self.storage
            .workflows
            .list_workflows()
            .map_err(TrinityError::storage)
    }

    /// Workflows offered for resume on process startup.
    pub fn list_resumable(&self) -> Result<Vec<Workflow>> {
        self.storage
            .workflows
            .list_resumable()
            .map_err(TrinityError::storage)
    }

    /// Transition along a legal edge, persisting atomically. Illegal edges
    /// are programmer errors and are never swallowed.
    pub fn transition(
        &self,
        workflow_id: &str,
        to: WorkflowState,
        step_name: Option<&str>,
        reason: Option<&str>,
    ) -> Result<Workflow> {
        let mut workflow = self.get(workflow_id)?;
        if !workflow.state.can_transition_to(to) {
            return Err(TrinityError::IllegalTransition {
                from: workflow.state.to_string(),
                to: to.to_string(),
            });
        }
        workflow.state = to;
        if let Some(step) = step_name {
            workflow.current_step = Some(step.to_string());
        }
        if to.is_terminal() {
            workflow.reason = reason.map(str::to_string);
            workflow.current_step = None;
        }
        workflow.updated_at = trinity_models::now_ms();
        self.storage
            .workflows
            .put_workflow(&workflow)
            .map_err(TrinityError::storage)?;
        info!(workflow_id, state = %to, step = ?step_name, "Workflow transition");
        Ok(workflow)
    }

    /// Write a checksummed checkpoint for a step and fold it into the
    /// workflow summary. The step is marked completed and old checkpoints
    /// beyond the retention window are pruned.
    pub fn checkpoint(
        &self,
        workflow_id: &str,
        step_name: &str,
        outputs: Value,
        context_snapshot: Value,
        tool_results: Value,
    ) -> Result<Checkpoint> {
        let mut workflow = self.get(workflow_id)?;
        if workflow.state.is_terminal() {
            return Err(TrinityError::IllegalTransition {
                from: workflow.state.to_string(),
                to: WorkflowState::Checkpointed.to_string(),
            });
        }

        let generation = self.generation_for(workflow_id, step_name)?;
        let checkpoint = Checkpoint::new(
            workflow_id,
            step_name,
            generation,
            outputs,
            context_snapshot,
            tool_results,
        );
        self.storage
            .workflows
            .put_checkpoint(&checkpoint)
            .map_err(TrinityError::storage)?;

        workflow.checkpoints.push(checkpoint.id.clone());
        if workflow.checkpoints.len() > self.retention {
            let evict = workflow.checkpoints.len() - self.retention;
            workflow.checkpoints.drain(..evict);
        }
        workflow.mark_step_completed(step_name);
        self.storage
            .workflows
            .put_workflow(&workflow)
            .map_err(TrinityError::storage)?;

        self.storage
            .workflows
            .prune_checkpoints(workflow_id, self.retention)
            .map_err(TrinityError::storage)?;

        Ok(checkpoint)
    }

    fn generation_for(&self, workflow_id: &str, step_name: &str) -> Result<u32> {
        let indices = self
            .storage
            .workflows
            .checkpoint_indices(workflow_id)
            .map_err(TrinityError::storage)?;
        let mut generation = 0;
        for index in indices {
            if let Some(CheckpointRead::Valid(cp)) = self
                .storage
                .workflows
                .read_checkpoint(workflow_id, index)
                .map_err(TrinityError::storage)?
                && cp.step_name == step_name
            {
                generation = generation.max(cp.generation + 1);
            }
        }
        Ok(generation)
    }

    /// Resume a workflow: validate the latest checkpoint and report where to
    /// continue. A corrupt checkpoint transitions the workflow to FAILED with
    /// reason `corrupt_checkpoint` instead of erroring.
    pub fn resume(&self, workflow_id: &str) -> Result<ResumePoint> {
        let workflow = self.get(workflow_id)?;

        match self
            .storage
            .workflows
            .read_latest_checkpoint(workflow_id)
            .map_err(TrinityError::storage)?
        {
            None => Ok(ResumePoint {
                state: workflow.state,
                last_checkpoint: None,
                reason: workflow.reason,
            }),
            Some(CheckpointRead::Valid(checkpoint)) => Ok(ResumePoint {
                state: workflow.state,
                last_checkpoint: Some(*checkpoint),
                reason: workflow.reason,
            }),
            Some(CheckpointRead::Corrupt { checkpoint_id }) => {
                warn!(workflow_id, checkpoint_id = %checkpoint_id, "Corrupt checkpoint on resume");
                let failed = self.fail_for_corruption(&workflow)?;
                Ok(ResumePoint {
                    state: failed.state,
                    last_checkpoint: None,
                    reason: failed.reason,
                })
            }
        }
    }

    fn fail_for_corruption(&self, workflow: &Workflow) -> Result<Workflow> {
        // A PENDING or terminal workflow with a corrupt checkpoint is already
        // outside the legal graph; force the summary to FAILED directly.
        if workflow.state.can_transition_to(WorkflowState::Failed) {
            self.transition(
                &workflow.id,
                WorkflowState::Failed,
                None,
                Some(REASON_CORRUPT_CHECKPOINT),
            )
        } else {
            let mut failed = workflow.clone();
            failed.state = WorkflowState::Failed;
            failed.reason = Some(REASON_CORRUPT_CHECKPOINT.to_string());
            failed.updated_at = trinity_models::now_ms();
            self.storage
                .workflows
                .put_workflow(&failed)
                .map_err(TrinityError::storage)?;
            Ok(failed)
        }
    }
}

#[cfg(test)]
mod tests;

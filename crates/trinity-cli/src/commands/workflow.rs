use anyhow::Result;
use trinity_models::Workflow;

use super::build_runtime;
use crate::cli::OutputFormat;

pub async fn list(format: OutputFormat) -> Result<()> {
    let runtime = build_runtime()?;
    let workflows = runtime.machine().list()?;

    if format.is_json() {
        println!("{}", serde_json::to_string_pretty(&workflows)?);
        return Ok(());
    }
    if workflows.is_empty() {
        println!("no workflows");
        return Ok(());
    }
    for workflow in workflows {
        println!(
            "{}  {:<12}  plan={}  steps={}/{}  {}",
            workflow.id,
            workflow.state.to_string(),
            workflow.plan_id,
            workflow.completed_steps.len(),
            workflow.completed_steps.len() + workflow.pending_steps.len(),
            workflow.reason.as_deref().unwrap_or("-"),
        );
    }
    Ok(())
}

pub async fn status(id: &str, format: OutputFormat) -> Result<()> {
    let runtime = build_runtime()?;
    let workflow = runtime.machine().get(id)?;
    let resume = runtime.machine().resume(id)?;

    if format.is_json() {
        let value = serde_json::json!({
            "workflow": workflow,
            "last_checkpoint": resume.last_checkpoint,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }
    print_workflow(&workflow);
    match resume.last_checkpoint {
        Some(checkpoint) => println!(
            "last checkpoint: {} (step {}, generation {})",
            checkpoint.id, checkpoint.step_name, checkpoint.generation
        ),
        None => println!("last checkpoint: none"),
    }
    Ok(())
}

pub async fn resume(id: &str, format: OutputFormat) -> Result<()> {
    let runtime = build_runtime()?;
    let workflow = runtime.executor().resume(id).await?;

    if format.is_json() {
        println!("{}", serde_json::to_string_pretty(&workflow)?);
        return Ok(());
    }
    println!("resumed {} -> {}", workflow.id, workflow.state);
    if let Some(reason) = &workflow.reason {
        println!("reason: {reason}");
    }
    Ok(())
}

fn print_workflow(workflow: &Workflow) {
    println!("workflow:       {}", workflow.id);
    println!("state:          {}", workflow.state);
    println!("plan:           {}", workflow.plan_id);
    println!("correlation:    {}", workflow.correlation_id);
    println!(
        "steps:          {} completed, {} pending",
        workflow.completed_steps.len(),
        workflow.pending_steps.len()
    );
    println!("checkpoints:    {}", workflow.checkpoints.len());
    if let Some(reason) = &workflow.reason {
        println!("reason:         {reason}");
    }
}

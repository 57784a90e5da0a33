//! End-to-end: event → WITNESS → signal → ARCHITECT → plan → EXECUTOR →
//! completed workflow, with the correlation id intact across the whole chain
//! and outcomes fed back to the pattern store and cost ledger.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use trinity_core::config::TrinityConfig;
use trinity_core::executor::{AgentRegistry, DraftAgentFactory};
use trinity_core::foundation::{ConstitutionScanner, RepoProbe, TestStatus, TestSuiteRunner};
use trinity_core::architect::TemplateStrategyWriter;
use trinity_core::patterns::HashedTokenEmbedder;
use trinity_core::runtime::{Runtime, RuntimeSeams};
use trinity_models::{CostScope, Event, WorkflowState, queues};

struct Green;
#[async_trait]
impl TestSuiteRunner for Green {
    async fn run(&self, _timeout: Duration) -> anyhow::Result<TestStatus> {
        Ok(TestStatus::Passed)
    }
}

struct Clean;
#[async_trait]
impl ConstitutionScanner for Clean {
    async fn scan(&self) -> anyhow::Result<Vec<String>> {
        Ok(vec![])
    }
}

struct Repo;
#[async_trait]
impl RepoProbe for Repo {
    async fn branch(&self) -> anyhow::Result<String> {
        Ok("main".into())
    }
    async fn head(&self) -> anyhow::Result<String> {
        Ok("head".into())
    }
}

fn seams() -> RuntimeSeams {
    let mut agents = AgentRegistry::new();
    agents.register_all(Arc::new(DraftAgentFactory));
    RuntimeSeams {
        embedder: Arc::new(HashedTokenEmbedder::default()),
        tests: Arc::new(Green),
        scanner: Arc::new(Clean),
        repo: Arc::new(Repo),
        strategy: Arc::new(TemplateStrategyWriter),
        agents,
        verification: None,
    }
}

#[tokio::test]
async fn test_event_to_completed_workflow() {
    let dir = tempfile::tempdir().unwrap();
    let config = TrinityConfig {
        state_dir: dir.path().join("state"),
        ..Default::default()
    };
    let runtime = Arc::new(Runtime::init(config, seams()).unwrap());

    // Seed the pattern WITNESS will classify against.
    runtime
        .patterns()
        .store(
            "ci-timeout-failures",
            "failure",
            "integration tests timing out on ci",
            "integration tests fail with timeouts on the ci runners",
            ["tests".to_string(), "timeout".to_string(), "ci".to_string()]
                .into_iter()
                .collect(),
        )
        .await
        .unwrap();

    let run_handle = {
        let runtime = runtime.clone();
        tokio::spawn(async move { runtime.run().await })
    };

    // Ambient observation arrives.
    let event = Event::new(
        "telemetry",
        "integration tests timing out again on ci runners",
        0.95,
    );
    runtime
        .bus()
        .publish(
            queues::TELEMETRY_STREAM,
            serde_json::to_value(&event).unwrap(),
            0,
            None,
        )
        .await
        .unwrap();

    // The pipeline runs asynchronously; wait for a terminal workflow.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(20);
    let workflow = loop {
        if tokio::time::Instant::now() > deadline {
            panic!("pipeline did not complete a workflow in time");
        }
        let workflows = runtime.machine().list().unwrap();
        if let Some(workflow) = workflows.iter().find(|w| w.state.is_terminal()) {
            break workflow.clone();
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    };

    assert_eq!(workflow.state, WorkflowState::Completed);
    assert!(!workflow.completed_steps.is_empty());
    assert!(!workflow.checkpoints.is_empty());

    // Correlation chain: signal → plan → workflow → reasoning records.
    let agents = runtime
        .reasoning()
        .list_agents(&workflow.correlation_id)
        .unwrap();
    assert!(agents.contains(&"architect".to_string()));
    assert!(agents.contains(&"spec".to_string()));

    // Cost entries exist for the workflow before completion was reported.
    let spent = runtime
        .ledger()
        .spent(&CostScope::Workflow(workflow.id.clone()));
    assert!(spent >= 0.0);
    for step in &workflow.completed_steps {
        assert!(
            !runtime.ledger().entries_for_task(step).is_empty(),
            "no cost entry for completed task {step}"
        );
    }

    // Outcome fed back into the pattern that triggered the signal.
    let pattern = runtime.patterns().get("ci-timeout-failures").unwrap();
    assert_eq!(pattern.usage.success_count, 1);
    assert!(pattern.precedents.contains(&workflow.id));

    runtime.shutdown().await;
    run_handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_workflow_survives_restart_and_resumes() {
    let dir = tempfile::tempdir().unwrap();
    let state_dir = dir.path().join("state");

    // First process: accept a plan, checkpoint the first step, "crash".
    let (workflow_id, plan_id) = {
        let config = TrinityConfig {
            state_dir: state_dir.clone(),
            ..Default::default()
        };
        let runtime = Runtime::init(config, seams()).unwrap();
        let plan = {
            use trinity_models::{AgentRole, Plan, TaskSpec, Track};
            let mut first = TaskSpec::new(AgentRole::CodeWriter, "write part one");
            first.id = "part-one".into();
            let mut second = TaskSpec::new(AgentRole::CodeWriter, "write part two");
            second.id = "part-two".into();
            second.depends_on = vec!["part-one".into()];
            Plan::new(
                "corr-resume",
                vec![Track {
                    name: "build".into(),
                    parallel: false,
                    depends_on: vec![],
                    tasks: vec![first, second],
                }],
            )
        };
        runtime.executor().persist_plan(&plan).await.unwrap();
        let workflow = runtime.machine().create(&plan).unwrap();
        runtime
            .machine()
            .transition(&workflow.id, WorkflowState::Running, Some("part-one"), None)
            .unwrap();
        runtime
            .machine()
            .checkpoint(
                &workflow.id,
                "part-one",
                serde_json::json!({"artifact_id": "a1"}),
                serde_json::json!({}),
                serde_json::json!([]),
            )
            .unwrap();
        (workflow.id.clone(), plan.id.clone())
    };

    // Second process over the same state dir.
    let config = TrinityConfig {
        state_dir,
        ..Default::default()
    };
    let runtime = Runtime::init(config, seams()).unwrap();

    // The crashed workflow is offered for resume.
    let resumable = runtime.machine().list_resumable().unwrap();
    assert!(resumable.iter().any(|w| w.id == workflow_id));

    let resumed = runtime.executor().resume(&workflow_id).await.unwrap();
    assert_eq!(resumed.state, WorkflowState::Completed);
    assert_eq!(resumed.plan_id, plan_id);
    // Both steps are completed; the checkpointed one was not re-run (its
    // cost ledger stays empty while part-two ran in this process).
    assert!(resumed.completed_steps.contains(&"part-one".to_string()));
    assert!(resumed.completed_steps.contains(&"part-two".to_string()));
    assert!(runtime.ledger().entries_for_task("part-one").is_empty());
    assert!(!runtime.ledger().entries_for_task("part-two").is_empty());
}

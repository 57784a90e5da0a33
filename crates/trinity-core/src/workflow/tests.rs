use super::*;
use serde_json::json;
use trinity_models::{AgentRole, TaskSpec, Track};

fn setup() -> (WorkflowMachine, Arc<Storage>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let storage = Arc::new(Storage::open(dir.path().join("state")).unwrap());
    let machine = WorkflowMachine::new(storage.clone(), 10);
    (machine, storage, dir)
}

fn plan() -> Plan {
    let write = TaskSpec::new(AgentRole::CodeWriter, "write");
    let test = TaskSpec::new(AgentRole::TestAuthor, "test").depends_on([write.id.clone()]);
    Plan::new(
        "corr-1",
        vec![Track {
            name: "build".into(),
            parallel: false,
            depends_on: vec![],
            tasks: vec![write, test],
        }],
    )
}

#[test]
fn test_create_starts_pending_with_plan_steps() {
    let (machine, _storage, _dir) = setup();
    let plan = plan();
    let workflow = machine.create(&plan).unwrap();
    assert_eq!(workflow.state, WorkflowState::Pending);
    assert_eq!(workflow.pending_steps.len(), 2);
    assert_eq!(workflow.correlation_id, "corr-1");
}

#[test]
fn test_illegal_transition_rejected() {
    let (machine, _storage, _dir) = setup();
    let workflow = machine.create(&plan()).unwrap();
    let err = machine
        .transition(&workflow.id, WorkflowState::Paused, None, None)
        .unwrap_err();
    assert!(matches!(err, TrinityError::IllegalTransition { .. }));
    // State unchanged after the rejected transition.
    assert_eq!(machine.get(&workflow.id).unwrap().state, WorkflowState::Pending);
}

#[test]
fn test_legal_walk_persists() {
    let (machine, _storage, _dir) = setup();
    let workflow = machine.create(&plan()).unwrap();
    machine
        .transition(&workflow.id, WorkflowState::Running, Some("step-1"), None)
        .unwrap();
    machine
        .transition(&workflow.id, WorkflowState::Paused, None, None)
        .unwrap();
    machine
        .transition(&workflow.id, WorkflowState::Running, None, None)
        .unwrap();
    let done = machine
        .transition(&workflow.id, WorkflowState::Completed, None, None)
        .unwrap();
    assert_eq!(done.state, WorkflowState::Completed);
    assert!(done.current_step.is_none());
}

#[test]
fn test_no_resurrection() {
    let (machine, _storage, _dir) = setup();
    let workflow = machine.create(&plan()).unwrap();
    machine
        .transition(&workflow.id, WorkflowState::Running, None, None)
        .unwrap();
    machine
        .transition(&workflow.id, WorkflowState::Failed, None, Some("boom"))
        .unwrap();
    assert!(machine
        .transition(&workflow.id, WorkflowState::Running, None, None)
        .is_err());
}

#[test]
fn test_checkpoint_roundtrip_via_resume() {
    let (machine, _storage, _dir) = setup();
    let workflow = machine.create(&plan()).unwrap();
    machine
        .transition(&workflow.id, WorkflowState::Running, Some("s1"), None)
        .unwrap();
    machine
        .checkpoint(&workflow.id, "s1", json!({"out": 1}), json!({}), json!([]))
        .unwrap();

    let resume = machine.resume(&workflow.id).unwrap();
    let checkpoint = resume.last_checkpoint.unwrap();
    assert_eq!(checkpoint.step_name, "s1");
    assert_eq!(checkpoint.outputs, json!({"out": 1}));

    let workflow = machine.get(&workflow.id).unwrap();
    assert_eq!(workflow.completed_steps, vec!["s1".to_string()]);
    assert_eq!(workflow.checkpoints.len(), 1);
}

#[test]
fn test_checkpoint_generations_increment_per_step() {
    let (machine, _storage, _dir) = setup();
    let workflow = machine.create(&plan()).unwrap();
    machine
        .transition(&workflow.id, WorkflowState::Running, None, None)
        .unwrap();
    let first = machine
        .checkpoint(&workflow.id, "s1", json!(1), json!({}), json!([]))
        .unwrap();
    let second = machine
        .checkpoint(&workflow.id, "s1", json!(2), json!({}), json!([]))
        .unwrap();
    let other = machine
        .checkpoint(&workflow.id, "s2", json!(3), json!({}), json!([]))
        .unwrap();
    assert_eq!(first.generation, 0);
    assert_eq!(second.generation, 1);
    assert_eq!(other.generation, 0);
}

#[test]
fn test_retention_prunes_oldest() {
    let dir = tempfile::tempdir().unwrap();
    let storage = Arc::new(Storage::open(dir.path().join("state")).unwrap());
    let machine = WorkflowMachine::new(storage.clone(), 3);
    let workflow = machine.create(&plan()).unwrap();
    machine
        .transition(&workflow.id, WorkflowState::Running, None, None)
        .unwrap();
    for i in 0..5 {
        machine
            .checkpoint(&workflow.id, &format!("s{i}"), json!(i), json!({}), json!([]))
            .unwrap();
    }
    let indices = storage.workflows.checkpoint_indices(&workflow.id).unwrap();
    assert_eq!(indices.len(), 3);
    assert_eq!(machine.get(&workflow.id).unwrap().checkpoints.len(), 3);
    // The newest checkpoint survived.
    let resume = machine.resume(&workflow.id).unwrap();
    assert_eq!(resume.last_checkpoint.unwrap().step_name, "s4");
}

#[test]
fn test_corrupt_checkpoint_fails_workflow_on_resume() {
    let (machine, storage, _dir) = setup();
    let workflow = machine.create(&plan()).unwrap();
    machine
        .transition(&workflow.id, WorkflowState::Running, None, None)
        .unwrap();
    machine
        .checkpoint(&workflow.id, "s1", json!({"out": "x"}), json!({}), json!([]))
        .unwrap();

    // Tamper with the checkpoint on disk.
    let path = storage
        .root()
        .join("workflows")
        .join(&workflow.id)
        .join("checkpoints")
        .join("0.json");
    let tampered = std::fs::read_to_string(&path).unwrap().replace("\"x\"", "\"y\"");
    std::fs::write(&path, tampered).unwrap();

    let resume = machine.resume(&workflow.id).unwrap();
    assert_eq!(resume.state, WorkflowState::Failed);
    assert_eq!(resume.reason.as_deref(), Some(REASON_CORRUPT_CHECKPOINT));
    assert!(resume.last_checkpoint.is_none());
}

#[test]
fn test_resume_without_checkpoints() {
    let (machine, _storage, _dir) = setup();
    let workflow = machine.create(&plan()).unwrap();
    let resume = machine.resume(&workflow.id).unwrap();
    assert_eq!(resume.state, WorkflowState::Pending);
    assert!(resume.last_checkpoint.is_none());
}

#[test]
fn test_list_resumable_after_simulated_crash() {
    let dir = tempfile::tempdir().unwrap();
    let state = dir.path().join("state");
    let id = {
        let storage = Arc::new(Storage::open(&state).unwrap());
        let machine = WorkflowMachine::new(storage, 10);
        let workflow = machine.create(&plan()).unwrap();
        machine
            .transition(&workflow.id, WorkflowState::Running, None, None)
            .unwrap();
        workflow.id
        // Process "crashes" here.
    };
    let storage = Arc::new(Storage::open(&state).unwrap());
    let machine = WorkflowMachine::new(storage, 10);
    let resumable = machine.list_resumable().unwrap();
    assert_eq!(resumable.len(), 1);
    assert_eq!(resumable[0].id, id);
}

#[test]
fn test_empty_plan_completes_immediately() {
    let (machine, _storage, _dir) = setup();
    let empty = Plan::new("corr-e", vec![]);
    let workflow = machine.create(&empty).unwrap();
    // The PENDING→COMPLETED shortcut is legal exactly for this case.
    let done = machine
        .transition(&workflow.id, WorkflowState::Completed, None, None)
        .unwrap();
    assert_eq!(done.state, WorkflowState::Completed);
    assert!(done.checkpoints.is_empty());
}

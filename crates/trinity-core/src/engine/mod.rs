//! Parallel Executor - bounded-concurrency DAG runner.
//!
//! Executes a task graph with dependency respect, per-task retries and
//! timeouts, budget admission, configurable fairness among ready tasks, and
//! cascading or isolated failure handling. Panics in task runners are caught
//! at the join boundary and converted to task failures. Retry backoff is
//! deterministic under a fixed seed.

pub mod graph;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{RngExt, SeedableRng};
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use trinity_models::error::Result;
use trinity_models::{TaskFailureKind, TaskResult, TaskSpec, TrinityError};

pub use graph::TaskGraph;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffKind {
    Exp,
    Fixed,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: BackoffKind,
    pub base: Duration,
    pub jitter: bool,
    /// Seed for deterministic backoff jitter in tests.
    pub seed: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffKind::Exp,
            base: Duration::from_millis(500),
            jitter: true,
            seed: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fairness {
    RoundRobin,
    ShortestFirst,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancellationMode {
    /// A failure aborts dependents and still-queued independents.
    Cascading,
    /// A failure aborts only the failed task's dependency subtree.
    Isolated,
}

#[derive(Debug, Clone)]
pub struct ExecutionPolicy {
    pub max_concurrency: usize,
    pub retry: RetryPolicy,
    pub task_timeout: Option<Duration>,
    pub workflow_timeout: Option<Duration>,
    pub fairness: Fairness,
    pub cancellation: CancellationMode,
}

impl Default for ExecutionPolicy {
    fn default() -> Self {
        Self {
            max_concurrency: 5,
            retry: RetryPolicy::default(),
            task_timeout: None,
            workflow_timeout: None,
            fairness: Fairness::RoundRobin,
            cancellation: CancellationMode::Cascading,
        }
    }
}

/// Runs one task attempt. Implementations must honor the cancellation token
/// at their next suspension point.
#[async_trait]
pub trait TaskRunner: Send + Sync {
    async fn run_task(&self, spec: TaskSpec, cancel: CancellationToken) -> Result<Value>;
}

/// Pre-dispatch admission check (budget enforcement).
pub trait DispatchGate: Send + Sync {
    fn check(&self, spec: &TaskSpec) -> Result<()>;
}

/// Aggregated outcome of one graph execution.
#[derive(Debug)]
pub struct GraphReport {
    pub results: HashMap<String, TaskResult>,
    pub outputs: HashMap<String, Value>,
    pub success: bool,
}

impl GraphReport {
    pub fn first_failure(&self) -> Option<&TaskResult> {
        self.results.values().find(|r| !r.success && r.failure != Some(TaskFailureKind::Cancelled))
    }
}

pub struct ParallelExecutor {
    policy: ExecutionPolicy,
    runner: Arc<dyn TaskRunner>,
    gate: Option<Arc<dyn DispatchGate>>,
}

enum TaskEnd {
    Done(TaskResult, Option<Value>),
}

impl ParallelExecutor {
    pub fn new(
        policy: ExecutionPolicy,
        runner: Arc<dyn TaskRunner>,
        gate: Option<Arc<dyn DispatchGate>>,
    ) -> Self {
        Self {
            policy,
            runner,
            gate,
        }
    }

    /// Execute the graph. `completed` seeds tasks already done in a prior run
    /// (resume path); they are treated as instantly successful with their
    /// checkpointed outputs.
    pub async fn execute_graph(
        &self,
        graph: &TaskGraph,
        completed: HashMap<String, Value>,
        cancel: CancellationToken,
    ) -> Result<GraphReport> {
        let deadline = self.policy.workflow_timeout.map(|t| Instant::now() + t);

        let mut remaining_deps: HashMap<String, usize> = HashMap::new();
        let mut results: HashMap<String, TaskResult> = HashMap::new();
        let mut outputs: HashMap<String, Value> = HashMap::new();
        let mut ready: VecDeque<String> = VecDeque::new();
        let mut cancelled: HashSet<String> = HashSet::new();
        let mut admitting = true;

        for id in graph.topo_order() {
            if completed.contains_key(id) {
                continue;
            }
            let open_deps = graph
                .dependencies(id)
                .iter()
                .filter(|d| !completed.contains_key(*d))
                .count();
            remaining_deps.insert(id.clone(), open_deps);
            if open_deps == 0 {
                ready.push_back(id.clone());
            }
        }
        for (id, output) in completed {
            results.insert(id.clone(), TaskResult::success(id.clone(), 0, 0));
            outputs.insert(id, output);
        }

        let mut running: JoinSet<(String, TaskEnd)> = JoinSet::new();
        let mut in_flight: HashSet<String> = HashSet::new();

        loop {
            // Admit ready tasks up to the concurrency cap.
            while admitting && in_flight.len() < self.policy.max_concurrency {
                let Some(task_id) = self.pick_ready(graph, &mut ready) else {
                    break;
                };
                if cancelled.contains(&task_id) {
                    continue;
                }
                let spec = graph
                    .task(&task_id)
                    .ok_or_else(|| TrinityError::not_found("task", &task_id))?
                    .clone();

                if let Some(gate) = &self.gate {
                    if let Err(err) = gate.check(&spec) {
                        // Budget refusal stops the whole graph; the caller
                        // pauses the workflow and escalates.
                        cancel.cancel();
                        while running.join_next().await.is_some() {}
                        return Err(err);
                    }
                }

                debug!(task_id = %task_id, "Dispatching task");
                in_flight.insert(task_id.clone());
                let runner = self.runner.clone();
                let retry = self.policy.retry.clone();
                let task_timeout = self.policy.task_timeout;
                let task_cancel = cancel.child_token();
                running.spawn(async move {
                    let end = run_with_retry(runner, spec, retry, task_timeout, task_cancel).await;
                    (task_id, end)
                });
            }

            if running.is_empty() {
                break;
            }

            // Wait for the next completion, bounded by the workflow deadline.
            let joined = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    match tokio::time::timeout(remaining, running.join_next()).await {
                        Ok(joined) => joined,
                        Err(_) => {
                            cancel.cancel();
                            running.abort_all();
                            while running.join_next().await.is_some() {}
                            return Err(TrinityError::Timeout {
                                scope: "workflow".into(),
                                seconds: self
                                    .policy
                                    .workflow_timeout
                                    .map(|t| t.as_secs())
                                    .unwrap_or(0),
                            });
                        }
                    }
                }
                None => running.join_next().await,
            };

            let Some(joined) = joined else {
                break;
            };

            let (task_id, end) = match joined {
                Ok(done) => done,
                Err(join_err) => {
                    // A panicking runner must not take the orchestrator down.
                    warn!(error = %join_err, "Task panicked in runner");
                    // The task id is lost with the panic; treat as fatal for
                    // the graph under cascading, continue otherwise.
                    if self.policy.cancellation == CancellationMode::Cascading {
                        admitting = false;
                    }
                    continue;
                }
            };
            in_flight.remove(&task_id);

            let TaskEnd::Done(result, output) = end;
            let succeeded = result.success;
            results.insert(task_id.clone(), result);
            if let Some(output) = output {
                outputs.insert(task_id.clone(), output);
            }

            if succeeded {
                for dependent in graph.dependents(&task_id) {
                    if let Some(open) = remaining_deps.get_mut(dependent) {
                        *open = open.saturating_sub(1);
                        if *open == 0 && !cancelled.contains(dependent) {
                            ready.push_back(dependent.clone());
                        }
                    }
                }
            } else {
                match self.policy.cancellation {
                    CancellationMode::Cascading => {
                        // Stop admitting anything new; running tasks finish.
                        admitting = false;
                        for id in remaining_deps.keys() {
                            if !results.contains_key(id) && !in_flight.contains(id) {
                                cancelled.insert(id.clone());
                            }
                        }
                    }
                    CancellationMode::Isolated => {
                        for id in graph.descendants(&task_id) {
                            if !results.contains_key(&id) && !in_flight.contains(&id) {
                                cancelled.insert(id);
                            }
                        }
                    }
                }
            }
        }

        for id in cancelled {
            results.entry(id.clone()).or_insert_with(|| {
                TaskResult::failure(id, 0, TaskFailureKind::Cancelled, "cancelled by policy")
            });
        }

        let success = graph
            .topo_order()
            .iter()
            .all(|id| results.get(id).is_some_and(|r| r.success));
        Ok(GraphReport {
            results,
            outputs,
            success,
        })
    }

    fn pick_ready(&self, graph: &TaskGraph, ready: &mut VecDeque<String>) -> Option<String> {
        if ready.is_empty() {
            return None;
        }
        match self.policy.fairness {
            Fairness::RoundRobin => ready.pop_front(),
            Fairness::ShortestFirst => {
                let position = ready
                    .iter()
                    .enumerate()
                    .min_by_key(|(_, id)| {
                        let estimate = graph
                            .task(id)
                            .and_then(|t| t.params.get("estimated_ms"))
                            .and_then(Value::as_u64)
                            .unwrap_or(u64::MAX);
                        (estimate, (*id).clone())
                    })
                    .map(|(index, _)| index)?;
                ready.remove(position)
            }
        }
    }
}

/// Backoff duration before the next attempt. Deterministic for a fixed
/// (seed, task id, attempt) triple.
fn backoff_delay(retry: &RetryPolicy, task_id: &str, attempt: u32) -> Duration {
    let base = match retry.backoff {
        BackoffKind::Exp => retry.base.saturating_mul(2u32.saturating_pow(attempt - 1)),
        BackoffKind::Fixed => retry.base,
    };
    if !retry.jitter || base.is_zero() {
        return base;
    }
    let mut hash: u64 = retry.seed;
    for byte in task_id.bytes() {
        hash = hash.wrapping_mul(31).wrapping_add(byte as u64);
    }
    let mut rng = StdRng::seed_from_u64(hash.wrapping_add(attempt as u64));
    let millis = base.as_millis() as u64;
    // Jitter in [50%, 150%] of the base delay.
    let jittered = millis / 2 + rng.random_range(0..=millis);
    Duration::from_millis(jittered)
}

async fn run_with_retry(
    runner: Arc<dyn TaskRunner>,
    spec: TaskSpec,
    retry: RetryPolicy,
    task_timeout: Option<Duration>,
    cancel: CancellationToken,
) -> TaskEnd {
    let task_id = spec.id.clone();
    let started = Instant::now();
    let max_attempts = retry.max_attempts.max(1);
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        if cancel.is_cancelled() {
            return TaskEnd::Done(
                TaskResult::failure(task_id, attempt, TaskFailureKind::Cancelled, "cancelled"),
                None,
            );
        }

        let outcome = match task_timeout {
            Some(limit) => match tokio::time::timeout(limit, runner.run_task(spec.clone(), cancel.clone())).await {
                Ok(result) => result,
                Err(_) => Err(TrinityError::Timeout {
                    scope: format!("task {task_id}"),
                    seconds: limit.as_secs(),
                }),
            },
            None => runner.run_task(spec.clone(), cancel.clone()).await,
        };

        match outcome {
            Ok(output) => {
                let result =
                    TaskResult::success(task_id, attempt, started.elapsed().as_millis() as u64);
                return TaskEnd::Done(result, Some(output));
            }
            Err(err) => {
                let kind = match &err {
                    TrinityError::Timeout { .. } => TaskFailureKind::Timeout,
                    TrinityError::VerificationRejected { .. } => {
                        // Never auto-retried with the same artifact.
                        return TaskEnd::Done(
                            TaskResult::failure(
                                task_id,
                                attempt,
                                TaskFailureKind::VerificationRejected,
                                err.to_string(),
                            ),
                            None,
                        );
                    }
                    _ => TaskFailureKind::Error,
                };
                if attempt >= max_attempts {
                    return TaskEnd::Done(
                        TaskResult::failure(task_id, attempt, kind, err.to_string()),
                        None,
                    );
                }
                tokio::time::sleep(backoff_delay(&retry, &task_id, attempt)).await;
            }
        }
    }
}

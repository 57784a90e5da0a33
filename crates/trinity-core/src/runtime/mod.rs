//! Runtime bootstrap: explicit construction of every handle, no globals.
//!
//! `Runtime::init` builds the storage, bus, stores, gates, and the three
//! meta-agents from one config struct plus the pluggable seams (embedder,
//! test runner, scanner, repo probe, strategy writer, agent factories).
//! `run` drives the orchestration loop until cancelled; `shutdown` tears it
//! down gracefully.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use trinity_models::TrinityError;
use trinity_models::error::Result;
use trinity_storage::Storage;

use crate::architect::{Architect, ArchitectConfig, StrategyWriter, TemplateStrategyWriter};
use crate::bus::{BusConfig, MessageBus};
use crate::config::TrinityConfig;
use crate::cost::CostLedger;
use crate::engine::ExecutionPolicy;
use crate::executor::{
    AbsoluteVerification, AgentRegistry, DraftAgentFactory, Executor, ExecutorConfig,
    VerificationGate,
};
use crate::foundation::runners::{CommandTestRunner, GitProbe, MarkerScanner};
use crate::foundation::{
    ConstitutionScanner, FoundationConfig, FoundationVerifier, RepoProbe, TestSuiteRunner,
};
use crate::hitl::{HitlConfig, HitlGates};
use crate::learner::{LearnerConfig, MetaLearner};
use crate::patterns::{EmbeddingProvider, HashedTokenEmbedder, PatternStore, PatternStoreConfig};
use crate::reasoning::ReasoningPersistence;
use crate::witness::{Witness, WitnessConfig};
use crate::workflow::WorkflowMachine;

const REDELIVERY_SWEEP_INTERVAL_MS: u64 = 1_000;

/// The pluggable boundaries of the core. Everything the orchestration
/// substrate does not own lives behind one of these.
pub struct RuntimeSeams {
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub tests: Arc<dyn TestSuiteRunner>,
    pub scanner: Arc<dyn ConstitutionScanner>,
    pub repo: Arc<dyn RepoProbe>,
    pub strategy: Arc<dyn StrategyWriter>,
    pub agents: AgentRegistry,
    /// None = Absolute Verification built from `tests` + `scanner`.
    pub verification: Option<Arc<dyn VerificationGate>>,
}

impl RuntimeSeams {
    /// Command-backed seams for a local repository checkout, with the
    /// built-in draft agents standing in for external workers.
    pub fn local_defaults(workdir: PathBuf) -> Self {
        let mut agents = AgentRegistry::new();
        agents.register_all(Arc::new(DraftAgentFactory));
        Self {
            embedder: Arc::new(HashedTokenEmbedder::default()),
            tests: Arc::new(CommandTestRunner::cargo(workdir.clone())),
            scanner: Arc::new(MarkerScanner::with_default_markers(workdir.clone())),
            repo: Arc::new(GitProbe { workdir }),
            strategy: Arc::new(TemplateStrategyWriter),
            agents,
            verification: None,
        }
    }
}

pub struct Runtime {
    config: TrinityConfig,
    storage: Arc<Storage>,
    bus: MessageBus,
    patterns: PatternStore,
    ledger: CostLedger,
    machine: WorkflowMachine,
    foundation: Arc<FoundationVerifier>,
    hitl: HitlGates,
    reasoning: ReasoningPersistence,
    witness: Arc<Witness>,
    architect: Arc<Architect>,
    executor: Executor,
    learner: Arc<MetaLearner>,
    cancel: CancellationToken,
    tasks: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl Runtime {
    /// Build every handle once. Fails fast on configuration errors.
    pub fn init(config: TrinityConfig, seams: RuntimeSeams) -> Result<Self> {
        config.validate()?;

        let storage = Arc::new(Storage::open(&config.state_dir).map_err(TrinityError::storage)?);
        let bus = MessageBus::open(
            storage.clone(),
            BusConfig {
                visibility_timeout: Duration::from_secs(config.bus_visibility_timeout_s),
                dead_letter_threshold: config.bus_dead_letter_threshold,
            },
        )?;
        let patterns = PatternStore::open(
            storage.clone(),
            seams.embedder.clone(),
            PatternStoreConfig {
                half_life_days: config.pattern_half_life_days,
                staleness_days: config.pattern_staleness_days,
                ..Default::default()
            },
        )?;
        let ledger = CostLedger::open(storage.clone(), config.budget_usd)?;
        let machine = WorkflowMachine::new(storage.clone(), config.retention_checkpoints);
        let foundation = Arc::new(FoundationVerifier::new(
            seams.tests.clone(),
            seams.scanner.clone(),
            seams.repo,
            FoundationConfig {
                test_timeout: Duration::from_secs(config.foundation_timeout_s),
                cache_ttl: Duration::from_secs(config.foundation_cache_ttl_s),
                lock_path: config.state_dir.join("foundation.lock"),
            },
        ));
        let hitl = HitlGates::new(
            bus.clone(),
            HitlConfig {
                timeout: Duration::from_secs(config.hitl_timeout_s),
                requeue_interval: Duration::from_secs(config.hitl_requeue_s),
                max_deferrals: config.hitl_max_deferrals,
            },
        );
        let reasoning = ReasoningPersistence::new(storage.clone(), patterns.clone());

        let witness = Arc::new(Witness::new(
            patterns.clone(),
            bus.clone(),
            WitnessConfig::default(),
        ));
        let architect = Arc::new(Architect::new(
            patterns.clone(),
            reasoning.clone(),
            bus.clone(),
            seams.strategy.clone(),
            ArchitectConfig::default(),
        ));
        let verification = seams.verification.unwrap_or_else(|| {
            Arc::new(AbsoluteVerification::new(
                seams.tests.clone(),
                seams.scanner.clone(),
                Duration::from_secs(config.foundation_timeout_s),
            ))
        });
        let executor = Executor::new(
            machine.clone(),
            bus.clone(),
            ledger.clone(),
            patterns.clone(),
            foundation.clone(),
            hitl.clone(),
            Arc::new(seams.agents),
            verification,
            ExecutorConfig {
                policy: ExecutionPolicy {
                    max_concurrency: config.max_concurrency,
                    ..Default::default()
                },
                gated_risk_categories: config.gated_risk_categories.clone(),
                hitl_force_enabled: false,
            },
        );
        let learner = Arc::new(MetaLearner::new(
            storage.clone(),
            patterns.clone(),
            LearnerConfig {
                autonomous: config.learner_autonomous,
                ..Default::default()
            },
        ));

        Ok(Self {
            config,
            storage,
            bus,
            patterns,
            ledger,
            machine,
            foundation,
            hitl,
            reasoning,
            witness,
            architect,
            executor,
            learner,
            cancel: CancellationToken::new(),
            tasks: parking_lot::Mutex::new(Vec::new()),
        })
    }

    /// Start the orchestration loop: verify the foundation, offer resumable
    /// workflows, then run WITNESS, ARCHITECT, EXECUTOR, and the bus
    /// redelivery sweep until cancelled.
    pub async fn run(&self) -> Result<()> {
        self.foundation.verify_for_execution().await?;

        let resumable = self.machine.list_resumable()?;
        if !resumable.is_empty() {
            info!(count = resumable.len(), "Resumable workflows found");
            for workflow in &resumable {
                info!(workflow_id = %workflow.id, state = %workflow.state, "Resumable");
            }
        }

        {
            let mut tasks = self.tasks.lock();

            let witness = self.witness.clone();
            let witness_cancel = self.cancel.child_token();
            tasks.push(tokio::spawn(async move {
                witness.run(witness_cancel).await;
            }));

            let architect = self.architect.clone();
            let architect_cancel = self.cancel.child_token();
            tasks.push(tokio::spawn(async move {
                architect.run(architect_cancel).await;
            }));

            let executor = self.executor.clone();
            let executor_cancel = self.cancel.child_token();
            tasks.push(tokio::spawn(async move {
                executor.run(executor_cancel).await;
            }));

            let bus = self.bus.clone();
            let sweep_cancel = self.cancel.child_token();
            tasks.push(tokio::spawn(async move {
                let mut interval =
                    tokio::time::interval(Duration::from_millis(REDELIVERY_SWEEP_INTERVAL_MS));
                loop {
                    tokio::select! {
                        _ = interval.tick() => {
                            let redelivered = bus.redeliver_expired();
                            if redelivered > 0 {
                                warn!(redelivered, "Redelivered expired in-flight messages");
                            }
                        }
                        _ = sweep_cancel.cancelled() => return,
                    }
                }
            }));
        }

        info!(state_dir = %self.config.state_dir.display(), "Trinity runtime started");
        self.cancel.cancelled().await;
        Ok(())
    }

    /// Graceful teardown: cancel loops and await them.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            let _ = task.await;
        }
        info!("Trinity runtime stopped");
    }

    pub fn config(&self) -> &TrinityConfig {
        &self.config
    }

    pub fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    pub fn bus(&self) -> &MessageBus {
        &self.bus
    }

    pub fn patterns(&self) -> &PatternStore {
        &self.patterns
    }

    pub fn ledger(&self) -> &CostLedger {
        &self.ledger
    }

    pub fn machine(&self) -> &WorkflowMachine {
        &self.machine
    }

    pub fn foundation(&self) -> &Arc<FoundationVerifier> {
        &self.foundation
    }

    pub fn hitl(&self) -> &HitlGates {
        &self.hitl
    }

    pub fn reasoning(&self) -> &ReasoningPersistence {
        &self.reasoning
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    pub fn learner(&self) -> &Arc<MetaLearner> {
        &self.learner
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::TestStatus;
    use async_trait::async_trait;

    struct Green;
    #[async_trait]
    impl TestSuiteRunner for Green {
        async fn run(&self, _timeout: Duration) -> anyhow::Result<TestStatus> {
            Ok(TestStatus::Passed)
        }
    }
    struct Red;
    #[async_trait]
    impl TestSuiteRunner for Red {
        async fn run(&self, _timeout: Duration) -> anyhow::Result<TestStatus> {
            Ok(TestStatus::Failed)
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
            Ok("h".into())
        }
    }

    fn seams(green: bool) -> RuntimeSeams {
        let mut agents = AgentRegistry::new();
        agents.register_all(Arc::new(DraftAgentFactory));
        RuntimeSeams {
            embedder: Arc::new(HashedTokenEmbedder::default()),
            tests: if green { Arc::new(Green) } else { Arc::new(Red) },
            scanner: Arc::new(Clean),
            repo: Arc::new(Repo),
            strategy: Arc::new(TemplateStrategyWriter),
            agents,
            verification: None,
        }
    }

    fn config(dir: &tempfile::TempDir) -> TrinityConfig {
        TrinityConfig {
            state_dir: dir.path().join("state"),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_init_builds_all_handles() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = Runtime::init(config(&dir), seams(true)).unwrap();
        assert!(runtime.machine().list().unwrap().is_empty());
        assert_eq!(runtime.ledger().budget(), None);
    }

    #[tokio::test]
    async fn test_run_fails_fast_on_broken_foundation() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = Runtime::init(config(&dir), seams(false)).unwrap();
        let err = runtime.run().await.unwrap_err();
        assert!(matches!(err, TrinityError::BrokenFoundation(_)));
    }

    #[tokio::test]
    async fn test_run_and_graceful_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = Arc::new(Runtime::init(config(&dir), seams(true)).unwrap());

        let run_handle = {
            let runtime = runtime.clone();
            tokio::spawn(async move { runtime.run().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        runtime.shutdown().await;
        run_handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_remote_backend_rejected_at_init() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(&dir);
        cfg.storage_backend = crate::config::StorageBackend::Remote;
        assert!(matches!(
            Runtime::init(cfg, seams(true)),
            Err(TrinityError::Config(_))
        ));
    }
}

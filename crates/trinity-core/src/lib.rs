//! Trinity Core - the orchestration substrate.
//!
//! Wires the durable message bus, the pattern store, the foundation and
//! verification gates, the workflow state machine, the bounded-concurrency
//! graph engine, and the three meta-agents (WITNESS, ARCHITECT, EXECUTOR)
//! into one single-process runtime. All handles are constructed once by
//! [`runtime::Runtime::init`]; there are no process-wide globals.

pub mod architect;
pub mod bus;
pub mod config;
pub mod cost;
pub mod engine;
pub mod executor;
pub mod foundation;
pub mod hitl;
pub mod learner;
pub mod patterns;
pub mod reasoning;
pub mod runtime;
pub mod witness;
pub mod workflow;

pub use bus::{Delivery, MessageBus, QueueStats};
pub use config::TrinityConfig;
pub use cost::{Balance, CostLedger};
pub use engine::{ExecutionPolicy, GraphReport, TaskGraph, TaskRunner};
pub use executor::Executor;
pub use foundation::{FoundationHealth, FoundationVerifier, TestStatus};
pub use hitl::HitlGates;
pub use patterns::{EmbeddingProvider, PatternStore};
pub use runtime::Runtime;
pub use witness::Witness;
pub use workflow::WorkflowMachine;

/// Re-exported so downstream crates name one source of truth for paths.
pub use trinity_storage::paths;

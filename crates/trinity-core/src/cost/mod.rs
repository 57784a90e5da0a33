//! Cost Ledger - token and currency accounting with budget enforcement.
//!
//! Writes serialize under a single logical writer; reads see a snapshot
//! consistent with the last committed write. The Parallel Executor consults
//! `check_dispatch` before every task dispatch.

use parking_lot::RwLock;
use std::sync::Arc;
use tracing::debug;
use trinity_models::error::Result;
use trinity_models::{CostEntry, CostScope, TrinityError};
use trinity_storage::Storage;

/// Conservative projection for (agent, model) pairs never seen before.
const DEFAULT_PROJECTION_USD: f64 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Balance {
    pub spent: f64,
    /// None when no budget cap is configured.
    pub remaining: Option<f64>,
}

struct LedgerInner {
    storage: Arc<Storage>,
    entries: RwLock<Vec<CostEntry>>,
    /// Global cap; extendable at runtime through a HITL budget extension.
    budget_usd: RwLock<Option<f64>>,
}

#[derive(Clone)]
pub struct CostLedger {
    inner: Arc<LedgerInner>,
}

impl CostLedger {
    /// Open the ledger, replaying the append-only log.
    pub fn open(storage: Arc<Storage>, budget_usd: Option<f64>) -> Result<Self> {
        let entries = storage.cost.load().map_err(TrinityError::storage)?;
        debug!(entries = entries.len(), budget = ?budget_usd, "Cost ledger loaded");
        Ok(Self {
            inner: Arc::new(LedgerInner {
                storage,
                entries: RwLock::new(entries),
                budget_usd: RwLock::new(budget_usd),
            }),
        })
    }

    /// Durably record one entry. The write lock is the single logical writer.
    pub fn record(&self, entry: CostEntry) -> Result<()> {
        let mut entries = self.inner.entries.write();
        self.inner
            .storage
            .cost
            .append(&entry)
            .map_err(TrinityError::storage)?;
        entries.push(entry);
        Ok(())
    }

    pub fn spent(&self, scope: &CostScope) -> f64 {
        self.inner
            .entries
            .read()
            .iter()
            .filter(|entry| entry.matches(scope))
            .map(|entry| entry.currency_amount)
            .sum()
    }

    pub fn balance(&self, scope: &CostScope) -> Balance {
        let spent = self.spent(scope);
        let remaining = match scope {
            // The budget cap is global; scoped balances report spend only.
            CostScope::Global => self
                .budget()
                .map(|budget| (budget - self.spent(&CostScope::Global)).max(0.0)),
            _ => None,
        };
        Balance { spent, remaining }
    }

    /// Estimate the cost of one more task for an (agent, model) pair from
    /// the moving average of prior entries; conservative default otherwise.
    pub fn project(&self, agent: &str, model: &str) -> f64 {
        let entries = self.inner.entries.read();
        let matching: Vec<f64> = entries
            .iter()
            .filter(|e| e.agent == agent && e.model == model)
            .map(|e| e.currency_amount)
            .collect();
        if matching.is_empty() {
            return DEFAULT_PROJECTION_USD;
        }
        matching.iter().sum::<f64>() / matching.len() as f64
    }

    /// Budget admission for the executor: refuse dispatch when the projected
    /// cost would exceed the remaining global budget.
    pub fn check_dispatch(&self, projected: f64) -> Result<()> {
        let Some(budget) = self.budget() else {
            return Ok(());
        };
        let spent = self.spent(&CostScope::Global);
        if spent + projected > budget {
            return Err(TrinityError::BudgetExhausted {
                spent_usd: spent,
                budget_usd: budget,
            });
        }
        Ok(())
    }

    pub fn budget(&self) -> Option<f64> {
        *self.inner.budget_usd.read()
    }

    /// Raise the global cap after an approved HITL budget extension.
    pub fn extend_budget(&self, additional_usd: f64) {
        let mut budget = self.inner.budget_usd.write();
        *budget = budget.map(|b| b + additional_usd.max(0.0));
    }

    /// All entries for a task; used to assert the completion invariant.
    pub fn entries_for_task(&self, task_id: &str) -> Vec<CostEntry> {
        self.inner
            .entries
            .read()
            .iter()
            .filter(|e| e.task_id == task_id)
            .cloned()
            .collect()
    }
}

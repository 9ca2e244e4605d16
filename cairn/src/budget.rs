//! Spend tracking and the budget gate.
//!
//! A run's spend is an append-only ledger behind a single mutex, so the
//! running total always equals the sum of the entries even under concurrent
//! writers from a fan-out group's sibling tasks. The ceiling is fixed for
//! the run's lifetime unless explicitly raised by an operator action.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::PipelineError;

/// The ceiling used when no ceiling is configured.
///
/// Absence of configuration maps to an explicit, very large but finite
/// default; the check is never disabled.
pub const DEFAULT_CEILING_USD: f64 = 1_000_000.0;

/// One metered usage record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// When the usage was recorded.
    pub timestamp: DateTime<Utc>,
    /// The provider billed (e.g. a model or data vendor name).
    pub provider: String,
    /// Units consumed (tokens, requests, rows).
    pub unit_count: u64,
    /// Incremental cost of this entry in USD.
    pub cost_usd: f64,
}

/// Ledger contents guarded together so the total/entries invariant holds
/// atomically.
#[derive(Debug, Default)]
struct LedgerState {
    entries: Vec<LedgerEntry>,
    total_usd: f64,
}

/// A monotonically-increasing spend counter with a configurable ceiling.
#[derive(Debug)]
pub struct BudgetTracker {
    ceiling_usd: RwLock<f64>,
    state: Mutex<LedgerState>,
}

impl Default for BudgetTracker {
    fn default() -> Self {
        Self::new(None)
    }
}

impl BudgetTracker {
    /// Creates a tracker with the given ceiling, or the finite default when
    /// none is configured.
    #[must_use]
    pub fn new(ceiling_usd: Option<f64>) -> Self {
        Self {
            ceiling_usd: RwLock::new(ceiling_usd.unwrap_or(DEFAULT_CEILING_USD)),
            state: Mutex::new(LedgerState::default()),
        }
    }

    /// Records metered usage and returns the incremental cost in USD.
    ///
    /// Pure accounting: always succeeds, even past the ceiling. The gate is
    /// [`Self::is_exceeded`], consulted before the next stage starts.
    pub fn record_usage(&self, provider: &str, unit_count: u64, unit_cost_usd: f64) -> f64 {
        let cost_usd = unit_count as f64 * unit_cost_usd;
        let entry = LedgerEntry {
            timestamp: Utc::now(),
            provider: provider.to_string(),
            unit_count,
            cost_usd,
        };

        let mut state = self.state.lock();
        state.total_usd += cost_usd;
        state.entries.push(entry);
        let total = state.total_usd;
        drop(state);

        debug!(
            provider = provider,
            unit_count = unit_count,
            cost_usd = cost_usd,
            total_usd = total,
            "recorded usage"
        );
        cost_usd
    }

    /// Returns whether the running total has reached the ceiling.
    #[must_use]
    pub fn is_exceeded(&self) -> bool {
        self.total_spent() >= *self.ceiling_usd.read()
    }

    /// Returns the running total in USD.
    #[must_use]
    pub fn total_spent(&self) -> f64 {
        self.state.lock().total_usd
    }

    /// Returns the configured ceiling in USD.
    #[must_use]
    pub fn ceiling(&self) -> f64 {
        *self.ceiling_usd.read()
    }

    /// Returns a snapshot of the ledger, in append order.
    #[must_use]
    pub fn ledger(&self) -> Vec<LedgerEntry> {
        self.state.lock().entries.clone()
    }

    /// Raises the ceiling (operator action).
    ///
    /// # Errors
    ///
    /// Returns a validation error if the new ceiling is not strictly higher
    /// than the current one; the ceiling is never lowered or silently
    /// changed.
    pub fn raise_ceiling(&self, new_ceiling_usd: f64) -> Result<(), PipelineError> {
        let mut ceiling = self.ceiling_usd.write();
        if new_ceiling_usd <= *ceiling {
            return Err(PipelineError::Validation(format!(
                "new ceiling ${new_ceiling_usd:.2} must exceed current ${:.2}",
                *ceiling
            )));
        }
        debug!(
            old_ceiling = *ceiling,
            new_ceiling = new_ceiling_usd,
            "budget ceiling raised"
        );
        *ceiling = new_ceiling_usd;
        Ok(())
    }
}

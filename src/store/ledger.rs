//! CARE redistribution ledger
//!
//! Pure accounting: every applied value moves `value * rate` into the pool and
//! the lifetime total. Nothing is ever transferred out and nothing can be rolled
//! back here; a reversal is the caller's job, expressed as a compensating
//! (negative) entry.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::constants::DEFAULT_CARE_RATE;
use crate::errors::{Result, ValidationErrorExt};
use crate::validation;

/// Ledger balances
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LedgerTotals {
    /// Current CARE pool balance
    pub pool: f64,
    /// Lifetime redistributed amount
    pub redistributed: f64,
    /// Number of entries applied
    #[serde(default)]
    pub entries: u64,
}

/// Running CARE pool with a construction-time rate
#[derive(Debug)]
pub struct CareLedger {
    rate: f64,
    totals: Mutex<LedgerTotals>,
}

impl CareLedger {
    pub fn new(rate: f64) -> Result<Self> {
        validation::validate_care_rate(rate).map_validation_err("care_rate")?;
        Ok(Self {
            rate,
            totals: Mutex::new(LedgerTotals::default()),
        })
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Apply an entry and return the redistributed amount.
    ///
    /// Updates to both totals happen under one lock, so concurrent callers
    /// serialize.
    pub fn apply(&self, value: f64) -> Result<f64> {
        validation::validate_finite(value).map_validation_err("value")?;
        let amount = value * self.rate;

        let mut totals = self.totals.lock();
        totals.pool += amount;
        totals.redistributed += amount;
        totals.entries += 1;

        tracing::debug!(value, amount, pool = totals.pool, "CARE entry applied");
        Ok(amount)
    }

    pub fn totals(&self) -> LedgerTotals {
        *self.totals.lock()
    }

    /// Replace balances wholesale (snapshot import only)
    pub(crate) fn restore(&self, totals: LedgerTotals) {
        *self.totals.lock() = totals;
    }
}

impl Default for CareLedger {
    fn default() -> Self {
        Self {
            rate: DEFAULT_CARE_RATE,
            totals: Mutex::new(LedgerTotals::default()),
        }
    }
}

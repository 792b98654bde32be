//! Capital Ledger - realized capital accounting
//!
//! Tracks current capital, peak capital and total realized P&L for a trading
//! run. The ledger is mutated only when the orchestrator applies a realized
//! close event; unrealized marks never touch it. All three execution
//! contexts share this single accounting surface.

use serde::{Deserialize, Serialize};

/// Capital state for one trading run. One instance per run; every mutation
/// goes through [`CapitalLedger::apply_realized_pl`] so peak capital and
/// drawdown stay consistent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapitalLedger {
    capital: f64,
    peak_capital: f64,
    realized_pl_total: f64,
}

impl CapitalLedger {
    pub fn new(initial_capital: f64) -> Self {
        Self {
            capital: initial_capital,
            peak_capital: initial_capital,
            realized_pl_total: 0.0,
        }
    }

    /// Apply realized P&L from a closed position. Peak capital is recomputed
    /// after every mutation.
    pub fn apply_realized_pl(&mut self, delta: f64) {
        self.capital += delta;
        self.realized_pl_total += delta;
        self.peak_capital = self.peak_capital.max(self.capital);
    }

    pub fn capital(&self) -> f64 {
        self.capital
    }

    pub fn peak_capital(&self) -> f64 {
        self.peak_capital
    }

    pub fn realized_pl_total(&self) -> f64 {
        self.realized_pl_total
    }

    /// Fractional decline from peak capital, 0.0 when at the peak
    pub fn current_drawdown(&self) -> f64 {
        if self.peak_capital <= 0.0 {
            return 0.0;
        }
        (self.peak_capital - self.capital) / self.peak_capital
    }
}

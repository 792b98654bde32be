//! Position State Machine - lifecycle of at most one long position per symbol
//!
//! A symbol is either Flat (absent from the book) or Open (present). Every
//! bar while open:
//! 1. Exit checks, in priority order: protective stop (fills at the stop
//!    price exactly), take-profit (fills at the target exactly), trend exit
//!    (close below the configured MA, fills at close).
//! 2. If still open, trailing-stop escalation: the peak price is updated
//!    from the bar high and an ascending ladder of profit thresholds may
//!    raise the stop. The stop only ever rises (`max(stop, candidate)`);
//!    ladder order matters because later rungs must not undercut earlier
//!    ones.
//!
//! Filling stop exits at the stored stop price rather than the bar low is
//! what makes P&L reproducible across replays.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::config::TrailingConfig;
use crate::indicators::IndicatorFrame;
use crate::types::{Bar, ExitReason, TradeRecord};

/// An open long position. Exists only while the symbol is Open and is owned
/// exclusively by the book for that symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub entry_price: f64,
    /// Units held; fractional allowed, always > 0 for a stored position
    pub size: f64,
    /// Protective stop; non-decreasing for the life of the position
    pub stop_price: f64,
    pub take_profit_price: Option<f64>,
    pub highest_price_seen: f64,
    /// Entry timestamp in milliseconds
    pub entry_ts: i64,
}

impl Position {
    /// Gain of the peak over entry, as a fraction
    fn peak_gain(&self) -> f64 {
        (self.highest_price_seen - self.entry_price) / self.entry_price
    }

    /// Exit checks in priority order. Returns the fill price and reason for
    /// the first rule that triggers.
    fn check_exit(
        &self,
        bar: &Bar,
        frame: &IndicatorFrame,
        cfg: &TrailingConfig,
    ) -> Option<(f64, ExitReason)> {
        if bar.low <= self.stop_price {
            return Some((self.stop_price, ExitReason::StopLoss));
        }
        if let Some(tp) = self.take_profit_price {
            if bar.high >= tp {
                return Some((tp, ExitReason::TakeProfit));
            }
        }
        let trend_ma = if cfg.trend_exit_uses_fast() {
            frame.ma_fast
        } else {
            frame.ma_slow
        };
        if let Some(ma) = trend_ma {
            if bar.close < ma {
                return Some((bar.close, ExitReason::TrendExit));
            }
        }
        None
    }

    /// Update the peak from the bar high, then walk the ladder in ascending
    /// order. Each rung can only raise the stop.
    fn escalate_stop(&mut self, bar: &Bar, cfg: &TrailingConfig) {
        if bar.high > self.highest_price_seen {
            self.highest_price_seen = bar.high;
        }
        let gain = self.peak_gain();
        if gain >= cfg.breakeven_trigger {
            self.stop_price = self.stop_price.max(self.entry_price);
        }
        if gain >= cfg.lock_trigger {
            self.stop_price = self.stop_price.max(self.highest_price_seen * cfg.lock_pct);
        }
        if gain >= cfg.runner_trigger {
            self.stop_price = self
                .stop_price
                .max(self.highest_price_seen * cfg.runner_pct);
        }
    }

    /// Closed-trade record for an exit at `exit_price`
    fn to_trade_record(&self, exit_price: f64, reason: ExitReason, exit_ts: i64) -> TradeRecord {
        let pl_absolute = (exit_price - self.entry_price) * self.size;
        let pl_percent = (exit_price - self.entry_price) / self.entry_price * 100.0;
        TradeRecord {
            symbol: self.symbol.clone(),
            entry_price: self.entry_price,
            exit_price,
            size: self.size,
            stop_price_at_exit: self.stop_price,
            exit_reason: reason,
            pl_absolute,
            pl_percent,
            entry_ts: self.entry_ts,
            exit_ts,
        }
    }
}

/// Result of feeding one bar to an open position
#[derive(Debug, Clone, PartialEq)]
pub enum BarOutcome {
    /// Position stays open (stop may have been raised)
    Hold,
    /// Position closed this bar
    Closed(TradeRecord),
}

/// Typed mapping from symbol to its single open position. Presence in the
/// map is the Open state; absence is Flat.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct PositionBook {
    positions: HashMap<String, Position>,
}

impl PositionBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_open(&self, symbol: &str) -> bool {
        self.positions.contains_key(symbol)
    }

    pub fn get(&self, symbol: &str) -> Option<&Position> {
        self.positions.get(symbol)
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn symbols(&self) -> Vec<String> {
        self.positions.keys().cloned().collect()
    }

    pub fn all(&self) -> Vec<Position> {
        self.positions.values().cloned().collect()
    }

    /// Open a position. Refused (returns false) when the symbol is already
    /// Open: a symbol must pass through Flat before opening again.
    pub fn open(&mut self, position: Position) -> bool {
        if position.size <= 0.0 {
            tracing::warn!(symbol = %position.symbol, "refusing to open zero-size position");
            return false;
        }
        if self.positions.contains_key(&position.symbol) {
            tracing::warn!(symbol = %position.symbol, "refusing duplicate open");
            return false;
        }
        tracing::info!(
            symbol = %position.symbol,
            entry = position.entry_price,
            size = position.size,
            stop = position.stop_price,
            "position opened"
        );
        self.positions.insert(position.symbol.clone(), position);
        true
    }

    /// Feed one bar to the open position for `symbol`. Exit checks run
    /// before stop escalation. Returns None when the symbol is Flat.
    pub fn on_bar(
        &mut self,
        symbol: &str,
        bar: &Bar,
        frame: &IndicatorFrame,
        cfg: &TrailingConfig,
    ) -> Option<BarOutcome> {
        let position = self.positions.get_mut(symbol)?;

        if let Some((exit_price, reason)) = position.check_exit(bar, frame, cfg) {
            let record = position.to_trade_record(exit_price, reason, bar.ts);
            tracing::info!(
                symbol = %symbol,
                exit = exit_price,
                reason = %reason,
                pl = record.pl_absolute,
                "position closed"
            );
            self.positions.remove(symbol);
            return Some(BarOutcome::Closed(record));
        }

        position.escalate_stop(bar, cfg);
        Some(BarOutcome::Hold)
    }

    /// Exit decision for an open symbol without mutating anything. Used by
    /// the live loop, which may only commit after a fill confirmation.
    pub fn peek_exit(
        &self,
        symbol: &str,
        bar: &Bar,
        frame: &IndicatorFrame,
        cfg: &TrailingConfig,
    ) -> Option<(f64, ExitReason)> {
        self.positions.get(symbol)?.check_exit(bar, frame, cfg)
    }

    /// Trailing-stop escalation only, no exit checks. No-op when Flat.
    pub fn escalate(&mut self, symbol: &str, bar: &Bar, cfg: &TrailingConfig) {
        if let Some(position) = self.positions.get_mut(symbol) {
            position.escalate_stop(bar, cfg);
        }
    }

    /// Close a position outside of bar processing (reconciliation). The
    /// record carries the given price and reason; exit attribution may be
    /// best-effort.
    pub fn force_close(
        &mut self,
        symbol: &str,
        exit_price: f64,
        reason: ExitReason,
        exit_ts: i64,
    ) -> Option<TradeRecord> {
        let position = self.positions.remove(symbol)?;
        let record = position.to_trade_record(exit_price, reason, exit_ts);
        tracing::info!(symbol = %symbol, exit = exit_price, reason = %reason, "position force-closed");
        Some(record)
    }
}

//! Entry Evaluator - trend/pullback/momentum vote on the latest bar
//!
//! Scores three independent boolean conditions and emits an entry candidate
//! when at least `votes_required` (default 2 of 3) hold:
//! - Trend: close above the fast MA or above the slow MA
//! - Pullback: close within a tolerance of the fast MA, or a wider tolerance
//!   of the slow MA
//! - Momentum: bar-over-bar change above a small negative floor, or RSI
//!   below the oversold threshold
//!
//! The threshold vote is intentionally permissive (not a strict AND) to
//! increase signal frequency; the ">= 2 of 3" semantics must be preserved
//! for behavioral compatibility. Evaluation outcomes are explicit values,
//! never errors: a bar without indicator coverage is a skip, not a failure.

use crate::config::EntryConfig;
use crate::indicators::IndicatorFrame;
use crate::types::Bar;

/// A proposed long entry, to be handed to the position sizer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EntryCandidate {
    pub entry_price: f64,
    pub stop_price: f64,
    pub take_profit_price: Option<f64>,
}

/// Outcome of evaluating one bar for entry
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EntryDecision {
    /// Enough conditions voted yes; candidate carries entry and stop
    Candidate(EntryCandidate),
    /// Indicators present but the vote fell short
    NoSignal { votes: u8 },
    /// Indicator warm-up not finished for this bar; skip, not an error
    InsufficientData,
}

/// Scores entry conditions for a symbol that is currently flat
pub struct EntryEvaluator {
    cfg: EntryConfig,
}

impl EntryEvaluator {
    pub fn new(cfg: EntryConfig) -> Self {
        Self { cfg }
    }

    /// Evaluate the latest bar. `prev_close` is the close of the bar before
    /// it, used for the bar-over-bar momentum vote.
    pub fn evaluate(
        &self,
        bar: &Bar,
        prev_close: Option<f64>,
        frame: &IndicatorFrame,
    ) -> EntryDecision {
        let (ma_fast, ma_slow, rsi) = match (frame.ma_fast, frame.ma_slow, frame.rsi) {
            (Some(f), Some(s), Some(r)) => (f, s, r),
            _ => return EntryDecision::InsufficientData,
        };
        let prev_close = match prev_close {
            Some(p) if p > 0.0 => p,
            _ => return EntryDecision::InsufficientData,
        };

        let close = bar.close;
        let pct_change = (close - prev_close) / prev_close;

        let trend = close > ma_fast || close > ma_slow;
        let pullback = (close - ma_fast).abs() / close < self.cfg.fast_tolerance
            || (close - ma_slow).abs() / close < self.cfg.slow_tolerance;
        let momentum = pct_change > self.cfg.momentum_floor || rsi < self.cfg.rsi_oversold;

        let votes = trend as u8 + pullback as u8 + momentum as u8;
        tracing::debug!(
            close,
            trend,
            pullback,
            momentum,
            votes,
            "entry conditions evaluated"
        );

        if votes < self.cfg.votes_required {
            return EntryDecision::NoSignal { votes };
        }

        let entry_price = close;
        let stop_price = entry_price * (1.0 - self.cfg.fixed_stop_pct);
        let take_profit_price = if self.cfg.take_profit_rr > 0.0 {
            Some(entry_price + (entry_price - stop_price) * self.cfg.take_profit_rr)
        } else {
            None
        };

        EntryDecision::Candidate(EntryCandidate {
            entry_price,
            stop_price,
            take_profit_price,
        })
    }
}

//! Trading Engine - per-symbol, per-bar orchestration
//!
//! The one decision engine shared by backtest replay, forward signal
//! checking and live execution. Per symbol, per bar: feed the indicator
//! engine, then either ask the entry evaluator (flat) or the position state
//! machine (open), and apply capital-ledger updates on close.
//!
//! Two surfaces over the same internals:
//! - [`TradingEngine::on_bar`] commits decisions immediately at their
//!   decision prices (replay semantics).
//! - The propose/commit split ([`TradingEngine::propose_entry`],
//!   [`TradingEngine::peek_exit`], `commit_open`, `commit_close`) lets the
//!   live loop hold a decision open while an order is submitted and only
//!   mutate position and ledger state once a fill is confirmed.
//!
//! All mutation happens on the caller's single logical thread of control;
//! the engine itself holds no locks.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

use crate::config::AppConfig;
use crate::indicators::{IndicatorEngine, IndicatorFrame};
use crate::ledger::CapitalLedger;
use crate::position::{BarOutcome, Position, PositionBook};
use crate::risk;
use crate::signal::{EntryCandidate, EntryDecision, EntryEvaluator};
use crate::types::{Bar, ExitReason, TradeRecord};

/// Why a bar produced no action for a symbol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Fewer bars than the declared minimum lookback
    InsufficientHistory,
    /// Bars exist but some indicator window has not filled
    IndicatorWarmup,
    /// Entry vote fell short; carries the vote count
    NoEntrySignal(u8),
    /// Ledger drawdown exceeds the configured maximum
    DrawdownLimit,
    /// Position sizer returned zero ("no trade")
    SizingInfeasible,
    /// Bar timestamp not strictly after the last accepted bar
    StaleBar,
}

/// Position-lifecycle events and sizing decisions emitted per bar
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    Opened {
        symbol: String,
        entry_price: f64,
        size: f64,
        stop_price: f64,
        take_profit_price: Option<f64>,
        ts: i64,
    },
    Closed(TradeRecord),
    Skipped {
        symbol: String,
        reason: SkipReason,
    },
}

/// Entry proposal for the two-phase (live) surface
#[derive(Debug, Clone, PartialEq)]
pub enum EntryProposal {
    Open { candidate: EntryCandidate, size: f64 },
    Skip(SkipReason),
}

/// Serializable engine state for live restart recovery
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineState {
    pub ledger: CapitalLedger,
    pub book: PositionBook,
    /// Timestamp of the snapshot in milliseconds
    pub saved_at: i64,
}

pub struct TradingEngine {
    cfg: AppConfig,
    indicators: IndicatorEngine,
    evaluator: EntryEvaluator,
    book: PositionBook,
    ledger: CapitalLedger,
    /// Rolling bar history per symbol, bounded by indicators.max_history
    history: HashMap<String, VecDeque<Bar>>,
}

impl TradingEngine {
    pub fn new(cfg: AppConfig) -> Self {
        let indicators = IndicatorEngine::new(cfg.indicators.clone());
        let evaluator = EntryEvaluator::new(cfg.entry.clone());
        let ledger = CapitalLedger::new(cfg.bot.initial_capital);
        Self {
            cfg,
            indicators,
            evaluator,
            book: PositionBook::new(),
            ledger,
            history: HashMap::new(),
        }
    }

    pub fn ledger(&self) -> &CapitalLedger {
        &self.ledger
    }

    pub fn book(&self) -> &PositionBook {
        &self.book
    }

    pub fn config(&self) -> &AppConfig {
        &self.cfg
    }

    /// Append a bar to the symbol's history. Bars must arrive with strictly
    /// increasing timestamps; anything else is dropped.
    pub fn push_bar(&mut self, symbol: &str, bar: Bar) -> bool {
        let history = self.history.entry(symbol.to_string()).or_default();
        if let Some(last) = history.back() {
            if bar.ts <= last.ts {
                // overlapping backfill is normal when cycles re-fetch history
                tracing::debug!(symbol, bar_ts = bar.ts, last_ts = last.ts, "dropping stale bar");
                return false;
            }
        }
        history.push_back(bar);
        while history.len() > self.cfg.indicators.max_history {
            history.pop_front();
        }
        true
    }

    /// Bars currently held for a symbol, oldest first
    pub fn bars(&self, symbol: &str) -> Vec<Bar> {
        self.history_vec(symbol)
    }

    fn history_vec(&self, symbol: &str) -> Vec<Bar> {
        self.history
            .get(symbol)
            .map(|h| h.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Indicator frame for the most recent bar of a symbol
    pub fn latest_frame(&self, symbol: &str) -> Option<IndicatorFrame> {
        let bars = self.history_vec(symbol);
        self.indicators.latest(&bars)
    }

    /// Full replay step: push the bar, decide, commit immediately at
    /// decision prices. Exits realized on a bar do not re-enter on the same
    /// bar.
    pub fn on_bar(&mut self, symbol: &str, bar: Bar) -> Vec<EngineEvent> {
        if !self.push_bar(symbol, bar) {
            return vec![EngineEvent::Skipped {
                symbol: symbol.to_string(),
                reason: SkipReason::StaleBar,
            }];
        }

        if self.book.is_open(symbol) {
            let frame = self.latest_frame(symbol).unwrap_or_default();
            match self.book.on_bar(symbol, &bar, &frame, &self.cfg.trailing) {
                Some(BarOutcome::Closed(record)) => {
                    self.ledger.apply_realized_pl(record.pl_absolute);
                    return vec![EngineEvent::Closed(record)];
                }
                Some(BarOutcome::Hold) | None => return Vec::new(),
            }
        }

        match self.propose_entry(symbol) {
            EntryProposal::Open { candidate, size } => {
                self.commit_open(symbol, &candidate, size, bar.ts);
                vec![EngineEvent::Opened {
                    symbol: symbol.to_string(),
                    entry_price: candidate.entry_price,
                    size,
                    stop_price: candidate.stop_price,
                    take_profit_price: candidate.take_profit_price,
                    ts: bar.ts,
                }]
            }
            EntryProposal::Skip(reason) => vec![EngineEvent::Skipped {
                symbol: symbol.to_string(),
                reason,
            }],
        }
    }

    /// Evaluate an entry for a flat symbol without mutating any state
    pub fn propose_entry(&self, symbol: &str) -> EntryProposal {
        let bars = self.history_vec(symbol);
        if bars.len() < self.cfg.indicators.min_lookback() {
            return EntryProposal::Skip(SkipReason::InsufficientHistory);
        }
        let bar = bars[bars.len() - 1];
        let prev_close = if bars.len() >= 2 {
            Some(bars[bars.len() - 2].close)
        } else {
            None
        };
        let frame = match self.indicators.latest(&bars) {
            Some(f) => f,
            None => return EntryProposal::Skip(SkipReason::IndicatorWarmup),
        };

        let candidate = match self.evaluator.evaluate(&bar, prev_close, &frame) {
            EntryDecision::Candidate(c) => c,
            EntryDecision::NoSignal { votes } => {
                return EntryProposal::Skip(SkipReason::NoEntrySignal(votes))
            }
            EntryDecision::InsufficientData => {
                return EntryProposal::Skip(SkipReason::IndicatorWarmup)
            }
        };

        if !risk::can_open(self.ledger.current_drawdown(), &self.cfg.risk) {
            tracing::warn!(
                symbol,
                drawdown = self.ledger.current_drawdown(),
                "entry blocked by drawdown limit"
            );
            return EntryProposal::Skip(SkipReason::DrawdownLimit);
        }

        if risk::is_degenerate_risk(candidate.entry_price, candidate.stop_price, &self.cfg.risk) {
            tracing::warn!(
                symbol,
                entry = candidate.entry_price,
                stop = candidate.stop_price,
                "degenerate risk per unit, clamping to default"
            );
        }
        let size = risk::position_size(
            candidate.entry_price,
            candidate.stop_price,
            self.ledger.capital(),
            &self.cfg.risk,
        );
        if size <= 0.0 {
            return EntryProposal::Skip(SkipReason::SizingInfeasible);
        }
        EntryProposal::Open { candidate, size }
    }

    /// Exit decision for an open symbol against its latest bar, without
    /// mutating any state. None when flat or when no exit rule triggers.
    pub fn peek_exit(&self, symbol: &str) -> Option<(f64, ExitReason)> {
        let bars = self.history_vec(symbol);
        let bar = bars.last()?;
        let frame = self.indicators.latest(&bars)?;
        self.book.peek_exit(symbol, bar, &frame, &self.cfg.trailing)
    }

    /// Raise the trailing stop for an open symbol from its latest bar
    pub fn escalate(&mut self, symbol: &str) {
        let bars = self.history_vec(symbol);
        if let Some(bar) = bars.last() {
            self.book.escalate(symbol, bar, &self.cfg.trailing);
        }
    }

    /// Commit a confirmed open. Refused when the symbol is already open or
    /// the size is not positive.
    pub fn commit_open(
        &mut self,
        symbol: &str,
        candidate: &EntryCandidate,
        size: f64,
        ts: i64,
    ) -> bool {
        self.book.open(Position {
            symbol: symbol.to_string(),
            entry_price: candidate.entry_price,
            size,
            stop_price: candidate.stop_price,
            take_profit_price: candidate.take_profit_price,
            highest_price_seen: candidate.entry_price,
            entry_ts: ts,
        })
    }

    /// Commit a confirmed close: emit the trade record and realize its P&L
    /// in the ledger.
    pub fn commit_close(
        &mut self,
        symbol: &str,
        exit_price: f64,
        reason: ExitReason,
        ts: i64,
    ) -> Option<TradeRecord> {
        let record = self.book.force_close(symbol, exit_price, reason, ts)?;
        self.ledger.apply_realized_pl(record.pl_absolute);
        Some(record)
    }

    /// Adopt a position discovered at the broker during reconciliation.
    /// The stop is rebuilt from the fixed entry-stop distance.
    pub fn adopt_position(&mut self, symbol: &str, entry_price: f64, size: f64, ts: i64) -> bool {
        let stop_price = entry_price * (1.0 - self.cfg.entry.fixed_stop_pct);
        self.book.open(Position {
            symbol: symbol.to_string(),
            entry_price,
            size,
            stop_price,
            take_profit_price: None,
            highest_price_seen: entry_price,
            entry_ts: ts,
        })
    }

    /// Snapshot of the mutable state (ledger + open positions)
    pub fn snapshot(&self, saved_at: i64) -> EngineState {
        EngineState {
            ledger: self.ledger.clone(),
            book: self.book.clone(),
            saved_at,
        }
    }

    /// Restore ledger and positions from a snapshot. Bar history is not
    /// part of the snapshot; it refills from the feed.
    pub fn restore(&mut self, state: EngineState) {
        self.ledger = state.ledger;
        self.book = state.book;
    }
}

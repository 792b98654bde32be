//! Forward Testing - periodic live-signal checking
//!
//! Runs the shared decision engine over the freshest bars per symbol and
//! reports entry and exit signals without placing any orders. Positions
//! opened here are virtual: they live in the engine's book so trailing
//! stops keep escalating across cycles, but nothing reaches a broker.

use crate::broker::{with_retry, BarFeed};
use crate::config::AppConfig;
use crate::engine::{EngineEvent, SkipReason, TradingEngine};
use crate::position::Position;
use crate::types::TradeRecord;
use std::time::Duration;

/// One entry signal found during a cycle
#[derive(Debug, Clone, PartialEq)]
pub struct EntrySignal {
    pub symbol: String,
    pub entry_price: f64,
    pub size: f64,
    pub stop_price: f64,
    pub take_profit_price: Option<f64>,
}

/// Result of one signal-check cycle
#[derive(Debug, Clone, Default)]
pub struct ForwardReport {
    pub capital: f64,
    pub drawdown: f64,
    pub entries: Vec<EntrySignal>,
    pub exits: Vec<TradeRecord>,
    pub open_positions: Vec<Position>,
    /// Symbols that produced no action this cycle, with the reason
    pub skips: Vec<(String, SkipReason)>,
}

pub struct ForwardTester<F: BarFeed> {
    engine: TradingEngine,
    feed: F,
}

impl<F: BarFeed> ForwardTester<F> {
    pub fn new(cfg: AppConfig, feed: F) -> Self {
        Self {
            engine: TradingEngine::new(cfg),
            feed,
        }
    }

    pub fn engine(&self) -> &TradingEngine {
        &self.engine
    }

    /// Check every configured symbol once. Feed failures degrade the
    /// affected symbol's cycle and never abort the run.
    pub async fn check_signals(&mut self) -> ForwardReport {
        let cfg = self.engine.config().clone();
        let mut report = ForwardReport::default();

        for symbol in &cfg.bot.symbols {
            let bars = match with_retry(
                cfg.execution.fetch_retries,
                Duration::from_millis(cfg.execution.retry_delay_ms),
                "fetch_bars",
                || self.feed.fetch_bars(symbol, cfg.indicators.max_history),
            )
            .await
            {
                Ok(bars) => bars,
                Err(err) => {
                    tracing::warn!(symbol = %symbol, error = %err, "feed failed, skipping symbol this cycle");
                    continue;
                }
            };
            if bars.is_empty() {
                report
                    .skips
                    .push((symbol.clone(), SkipReason::InsufficientHistory));
                continue;
            }

            // Backfill history; only the freshest bar is evaluated.
            let (latest, history) = bars.split_last().expect("non-empty");
            for bar in history {
                self.engine.push_bar(symbol, *bar);
            }
            for event in self.engine.on_bar(symbol, *latest) {
                match event {
                    EngineEvent::Opened {
                        symbol,
                        entry_price,
                        size,
                        stop_price,
                        take_profit_price,
                        ..
                    } => report.entries.push(EntrySignal {
                        symbol,
                        entry_price,
                        size,
                        stop_price,
                        take_profit_price,
                    }),
                    EngineEvent::Closed(record) => report.exits.push(record),
                    EngineEvent::Skipped { symbol, reason } => {
                        report.skips.push((symbol, reason))
                    }
                }
            }
        }

        report.capital = self.engine.ledger().capital();
        report.drawdown = self.engine.ledger().current_drawdown();
        report.open_positions = self.engine.book().all();
        report
    }
}

/// Log a cycle report in a human-scannable form
pub fn log_report(report: &ForwardReport) {
    tracing::info!(
        capital = report.capital,
        drawdown = report.drawdown,
        entries = report.entries.len(),
        exits = report.exits.len(),
        open = report.open_positions.len(),
        "signal check complete"
    );
    for entry in &report.entries {
        tracing::info!(
            symbol = %entry.symbol,
            entry = entry.entry_price,
            size = entry.size,
            stop = entry.stop_price,
            "entry signal"
        );
    }
    for exit in &report.exits {
        tracing::info!(
            symbol = %exit.symbol,
            reason = %exit.exit_reason,
            price = exit.exit_price,
            pl = exit.pl_absolute,
            "exit signal"
        );
    }
    for position in &report.open_positions {
        tracing::info!(
            symbol = %position.symbol,
            entry = position.entry_price,
            stop = position.stop_price,
            size = position.size,
            "open position"
        );
    }
}

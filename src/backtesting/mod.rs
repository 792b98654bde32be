//! Backtesting Module
//!
//! Historical replay: feeds time-ordered bars through the shared trading
//! engine, symbol by symbol, and summarizes performance:
//! - Win rate, profit factor, expectancy
//! - Max drawdown from the realized equity curve
//! - Largest win/loss, per-symbol trade counts
//!
//! Replay is single-threaded and strictly sequential; identical bars and
//! configuration reproduce identical trade records and final capital.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::config::AppConfig;
use crate::engine::{EngineEvent, TradingEngine};
use crate::types::{Bar, TradeRecord};

/// Backtest performance metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestMetrics {
    /// Total number of closed trades
    pub total_trades: usize,
    pub wins: usize,
    pub losses: usize,
    /// Win rate (0.0 to 1.0)
    pub win_rate: f64,
    /// Gross profit / gross loss
    pub profit_factor: f64,
    /// Maximum drawdown over the realized equity curve (0.0 to 1.0)
    pub max_drawdown: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    /// Average profit per trade
    pub expectancy: f64,
    pub largest_win: f64,
    pub largest_loss: f64,
}

impl Default for BacktestMetrics {
    fn default() -> Self {
        Self {
            total_trades: 0,
            wins: 0,
            losses: 0,
            win_rate: 0.0,
            profit_factor: 0.0,
            max_drawdown: 0.0,
            avg_win: 0.0,
            avg_loss: 0.0,
            expectancy: 0.0,
            largest_win: 0.0,
            largest_loss: 0.0,
        }
    }
}

/// Full result of one replay
#[derive(Debug, Clone)]
pub struct BacktestReport {
    pub initial_capital: f64,
    pub final_capital: f64,
    /// Total return as a fraction of initial capital
    pub total_return: f64,
    pub metrics: BacktestMetrics,
    pub trades: Vec<TradeRecord>,
    /// Closed-trade count per symbol
    pub trades_per_symbol: HashMap<String, usize>,
}

/// Historical replay driver over the shared engine
pub struct Backtester {
    engine: TradingEngine,
    initial_capital: f64,
    trades: Vec<TradeRecord>,
    equity_curve: Vec<f64>,
}

impl Backtester {
    pub fn new(cfg: AppConfig) -> Self {
        let initial_capital = cfg.bot.initial_capital;
        Self {
            engine: TradingEngine::new(cfg),
            initial_capital,
            trades: Vec::new(),
            equity_curve: vec![initial_capital],
        }
    }

    /// Replay one symbol's bar series through the engine
    pub fn run_symbol(&mut self, symbol: &str, bars: &[Bar]) {
        tracing::info!(symbol, bars = bars.len(), "replaying symbol");
        for bar in bars {
            for event in self.engine.on_bar(symbol, *bar) {
                if let EngineEvent::Closed(record) = event {
                    self.equity_curve.push(self.engine.ledger().capital());
                    self.trades.push(record);
                }
            }
        }
    }

    /// Replay every symbol in order and summarize. Symbols with no data are
    /// skipped with a warning, never an error.
    pub fn run(mut self, data: &[(String, Vec<Bar>)]) -> BacktestReport {
        let initial_capital = self.initial_capital;
        for (symbol, bars) in data {
            if bars.is_empty() {
                tracing::warn!(symbol = %symbol, "no bars for symbol, skipping");
                continue;
            }
            self.run_symbol(symbol, bars);
        }

        let final_capital = self.engine.ledger().capital();
        let metrics = compute_metrics(&self.trades, &self.equity_curve);
        let mut trades_per_symbol: HashMap<String, usize> = HashMap::new();
        for trade in &self.trades {
            *trades_per_symbol.entry(trade.symbol.clone()).or_default() += 1;
        }

        BacktestReport {
            initial_capital,
            final_capital,
            total_return: (final_capital - initial_capital) / initial_capital,
            metrics,
            trades: self.trades,
            trades_per_symbol,
        }
    }
}

fn compute_metrics(trades: &[TradeRecord], equity_curve: &[f64]) -> BacktestMetrics {
    if trades.is_empty() {
        return BacktestMetrics::default();
    }

    let wins: Vec<f64> = trades
        .iter()
        .filter(|t| t.is_win())
        .map(|t| t.pl_absolute)
        .collect();
    let losses: Vec<f64> = trades
        .iter()
        .filter(|t| !t.is_win())
        .map(|t| t.pl_absolute)
        .collect();

    let gross_profit: f64 = wins.iter().sum();
    let gross_loss: f64 = losses.iter().map(|l| l.abs()).sum();
    let total_pl: f64 = gross_profit - gross_loss;

    let mut peak = f64::MIN;
    let mut max_drawdown: f64 = 0.0;
    for &equity in equity_curve {
        peak = peak.max(equity);
        if peak > 0.0 {
            max_drawdown = max_drawdown.max((peak - equity) / peak);
        }
    }

    BacktestMetrics {
        total_trades: trades.len(),
        wins: wins.len(),
        losses: losses.len(),
        win_rate: wins.len() as f64 / trades.len() as f64,
        profit_factor: if gross_loss > 0.0 {
            gross_profit / gross_loss
        } else {
            0.0
        },
        max_drawdown,
        avg_win: if wins.is_empty() {
            0.0
        } else {
            gross_profit / wins.len() as f64
        },
        avg_loss: if losses.is_empty() {
            0.0
        } else {
            -gross_loss / losses.len() as f64
        },
        expectancy: total_pl / trades.len() as f64,
        largest_win: wins.iter().copied().fold(0.0, f64::max),
        largest_loss: losses.iter().copied().fold(0.0, f64::min),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_support::base_config;
    use crate::types::ExitReason;

    fn config() -> AppConfig {
        let mut cfg = base_config();
        cfg.indicators.ma_fast = 3;
        cfg.indicators.ma_slow = 5;
        cfg.indicators.rsi_period = 3;
        cfg.indicators.macd_fast = 3;
        cfg.indicators.macd_slow = 6;
        cfg.indicators.macd_signal = 2;
        cfg.indicators.atr_period = 3;
        cfg
    }

    fn bar(ts: i64, close: f64) -> Bar {
        Bar {
            ts,
            open: close,
            high: close * 1.005,
            low: close * 0.995,
            close,
            volume: 1000.0,
        }
    }

    /// Rises into an entry, then crashes through the stop
    fn losing_series() -> Vec<Bar> {
        let closes = [100.0, 100.5, 101.0, 100.8, 101.2, 101.5, 95.0];
        closes
            .iter()
            .enumerate()
            .map(|(i, c)| bar(i as i64, *c))
            .collect()
    }

    #[test]
    fn test_replay_produces_trades_and_metrics() {
        let report = Backtester::new(config())
            .run(&[("AAPL".to_string(), losing_series())]);
        assert_eq!(report.metrics.total_trades, 1);
        assert_eq!(report.metrics.losses, 1);
        assert_eq!(report.trades[0].exit_reason, ExitReason::StopLoss);
        assert!(report.final_capital < report.initial_capital);
        assert!(report.total_return < 0.0);
        assert_eq!(report.trades_per_symbol["AAPL"], 1);
    }

    #[test]
    fn test_empty_symbol_is_skipped() {
        let report = Backtester::new(config()).run(&[
            ("AAPL".to_string(), Vec::new()),
            ("MSFT".to_string(), losing_series()),
        ]);
        assert_eq!(report.metrics.total_trades, 1);
        assert_eq!(report.trades[0].symbol, "MSFT");
    }

    #[test]
    fn test_identical_replays_are_identical() {
        let data = vec![
            ("AAPL".to_string(), losing_series()),
            ("MSFT".to_string(), losing_series()),
        ];
        let a = Backtester::new(config()).run(&data);
        let b = Backtester::new(config()).run(&data);
        assert_eq!(a.trades, b.trades);
        assert_eq!(a.final_capital, b.final_capital);
    }

    #[test]
    fn test_metrics_on_no_trades() {
        let metrics = compute_metrics(&[], &[1000.0]);
        assert_eq!(metrics.total_trades, 0);
        assert_eq!(metrics.win_rate, 0.0);
    }

    #[test]
    fn test_max_drawdown_from_equity_curve() {
        let trades = vec![TradeRecord {
            symbol: "AAPL".to_string(),
            entry_price: 100.0,
            exit_price: 98.0,
            size: 1.0,
            stop_price_at_exit: 98.0,
            exit_reason: ExitReason::StopLoss,
            pl_absolute: -2.0,
            pl_percent: -2.0,
            entry_ts: 0,
            exit_ts: 1,
        }];
        let metrics = compute_metrics(&trades, &[1000.0, 1200.0, 900.0, 1100.0]);
        assert!((metrics.max_drawdown - 0.25).abs() < 1e-12);
    }
}

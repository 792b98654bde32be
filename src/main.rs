//! SwingBot entrypoint
//!
//! Loads configuration, initializes logging, and dispatches to the
//! execution context selected by `bot.mode`.

use anyhow::Result;
use tracing_subscriber::EnvFilter;

use swingbot::backtesting::Backtester;
use swingbot::broker::{CsvBarFeed, PaperBroker};
use swingbot::config::{AppConfig, RunMode};
use swingbot::forward::{self, ForwardTester};
use swingbot::live::LiveTrader;
use swingbot::persistence::CsvPersistence;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cfg = AppConfig::load()?;
    tracing::info!(config = %cfg.digest(), "swingbot starting");

    match cfg.bot.run_mode()? {
        RunMode::Backtest => run_backtest(cfg),
        RunMode::Forward => run_forward(cfg).await,
        RunMode::Live => run_live(cfg).await,
    }
}

fn run_backtest(cfg: AppConfig) -> Result<()> {
    let persistence = CsvPersistence::new(
        &cfg.persistence.data_dir,
        cfg.persistence.csv_enabled,
        &cfg.persistence.state_file,
    )?;

    let mut data = Vec::new();
    for symbol in &cfg.bot.symbols {
        let path = persistence.bar_file(symbol);
        match CsvPersistence::load_bars(&path) {
            Ok(bars) => data.push((symbol.clone(), bars)),
            Err(err) => {
                tracing::warn!(symbol = %symbol, error = %err, "no usable bar history, skipping");
            }
        }
    }

    let report = Backtester::new(cfg).run(&data);
    for trade in &report.trades {
        if let Err(err) = persistence.append_trade(trade) {
            tracing::warn!(error = %err, "failed to export trade record");
        }
    }

    tracing::info!(
        initial_capital = report.initial_capital,
        final_capital = report.final_capital,
        total_return_pct = report.total_return * 100.0,
        trades = report.metrics.total_trades,
        win_rate_pct = report.metrics.win_rate * 100.0,
        profit_factor = report.metrics.profit_factor,
        max_drawdown_pct = report.metrics.max_drawdown * 100.0,
        expectancy = report.metrics.expectancy,
        "backtest complete"
    );
    for (symbol, count) in &report.trades_per_symbol {
        tracing::info!(symbol = %symbol, trades = *count, "per-symbol trades");
    }
    Ok(())
}

async fn run_forward(cfg: AppConfig) -> Result<()> {
    let feed = CsvBarFeed::new(&cfg.persistence.data_dir);
    let mut tester = ForwardTester::new(cfg, feed);
    let report = tester.check_signals().await;
    forward::log_report(&report);
    Ok(())
}

async fn run_live(cfg: AppConfig) -> Result<()> {
    let feed = CsvBarFeed::new(&cfg.persistence.data_dir);
    let broker = PaperBroker::new(cfg.bot.initial_capital);
    LiveTrader::new(cfg, feed, broker)?.run().await
}

//! Live Trading - continuous order execution over the shared engine
//!
//! The decision loop is the single owner of Position and Capital Ledger
//! state. Per cycle, per symbol: refresh bars, decide, turn decisions into
//! order intents, and commit engine state only after the broker confirms a
//! fill. "Order submitted" and "order filled" are distinct events:
//! - a `Rejected` report reverts to the pre-intent state,
//! - exhausting the bounded fill polls leaves state untouched and surfaces
//!   a recoverable per-symbol failure; the next reconcile pass settles it.
//!
//! A status-reporting task runs concurrently but only ever reads snapshots
//! published over a watch channel. Ctrl-c stops new entries, finishes one
//! drain cycle of exit processing, snapshots state and returns.
//!
//! After a (re)connect the broker's position set is authoritative:
//! external-only positions are adopted, internal-only positions are closed
//! as `Desync` with best-effort attribution at their protective stop.

use anyhow::{Context, Result};
use chrono::Utc;
use std::time::Duration;
use tokio::sync::watch;

use crate::broker::{with_retry, BarFeed, Broker};
use crate::config::AppConfig;
use crate::engine::{EntryProposal, TradingEngine};
use crate::persistence::CsvPersistence;
use crate::position::Position;
use crate::signal::EntryCandidate;
use crate::types::{ExitReason, FillStatus, OrderId, OrderIntent, Side};

/// Read-only state snapshot published to the status task
#[derive(Debug, Clone, Default)]
pub struct StatusSnapshot {
    pub ts: i64,
    pub capital: f64,
    pub drawdown: f64,
    pub realized_pl: f64,
    pub broker_equity: Option<f64>,
    pub open_positions: Vec<Position>,
}

/// Terminal outcome of polling one order
#[derive(Debug, Clone, PartialEq)]
enum FillOutcome {
    Filled { price: f64, ts: i64 },
    Rejected,
    /// Poll budget exhausted with the order still pending or unreachable
    Unknown,
}

pub struct LiveTrader<F: BarFeed, B: Broker> {
    engine: TradingEngine,
    feed: F,
    broker: B,
    persistence: CsvPersistence,
    status_tx: watch::Sender<StatusSnapshot>,
    accepting_entries: bool,
}

impl<F: BarFeed, B: Broker> LiveTrader<F, B> {
    pub fn new(cfg: AppConfig, feed: F, broker: B) -> Result<Self> {
        let persistence = CsvPersistence::new(
            &cfg.persistence.data_dir,
            cfg.persistence.csv_enabled,
            &cfg.persistence.state_file,
        )?;
        let mut engine = TradingEngine::new(cfg);
        if let Some(state) = persistence
            .load_state()
            .context("Failed to load prior state")?
        {
            tracing::info!(
                saved_at = state.saved_at,
                positions = state.book.len(),
                "restoring engine state from snapshot"
            );
            engine.restore(state);
        }
        let (status_tx, _) = watch::channel(StatusSnapshot::default());
        Ok(Self {
            engine,
            feed,
            broker,
            persistence,
            status_tx,
            accepting_entries: true,
        })
    }

    pub fn engine(&self) -> &TradingEngine {
        &self.engine
    }

    #[cfg(test)]
    pub(crate) fn engine_mut(&mut self) -> &mut TradingEngine {
        &mut self.engine
    }

    /// Main loop: reconcile, then cycle until a shutdown signal arrives
    pub async fn run(mut self) -> Result<()> {
        let cfg = self.engine.config().clone();
        tracing::info!(symbols = ?cfg.bot.symbols, "live trading started");

        if let Err(err) = self.reconcile().await {
            tracing::warn!(error = %err, "initial reconciliation failed, continuing with internal view");
        }

        let status_rx = self.status_tx.subscribe();
        tokio::spawn(status_task(
            status_rx,
            cfg.execution.status_interval_secs,
        ));

        let mut interval =
            tokio::time::interval(Duration::from_secs(cfg.bot.poll_interval_secs.max(1)));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.run_cycle().await;
                }
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("shutdown signal received, draining open work");
                    self.accepting_entries = false;
                    self.run_cycle().await;
                    break;
                }
            }
        }

        self.save_state();
        tracing::info!(
            capital = self.engine.ledger().capital(),
            realized = self.engine.ledger().realized_pl_total(),
            "live trading stopped"
        );
        Ok(())
    }

    /// One evaluation pass over every configured symbol. Failures are
    /// per-symbol and recoverable; the cycle always completes.
    pub async fn run_cycle(&mut self) {
        let cfg = self.engine.config().clone();
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
            let Some(latest) = bars.last().copied() else {
                tracing::debug!(symbol = %symbol, "no bars for symbol");
                continue;
            };
            let mut fresh = false;
            for bar in bars {
                fresh |= self.engine.push_bar(symbol, bar);
            }
            if !fresh {
                tracing::debug!(symbol = %symbol, "no new bars, skipping symbol this cycle");
                continue;
            }
            if let Err(err) = self.broker.mark_to_market(symbol, latest.close).await {
                tracing::debug!(symbol = %symbol, error = %err, "mark-to-market hook failed");
            }

            if self.engine.book().is_open(symbol) {
                if let Some((exit_price, reason)) = self.engine.peek_exit(symbol) {
                    self.execute_exit(symbol, exit_price, reason, latest.ts).await;
                } else {
                    self.engine.escalate(symbol);
                }
            } else if self.accepting_entries {
                match self.engine.propose_entry(symbol) {
                    EntryProposal::Open { candidate, size } => {
                        self.execute_entry(symbol, &candidate, size, latest.ts).await;
                    }
                    EntryProposal::Skip(reason) => {
                        tracing::debug!(symbol = %symbol, ?reason, "no entry this cycle");
                    }
                }
            }
        }
        self.publish_status().await;
    }

    /// Submit a buy intent and commit the open only on a confirmed fill
    async fn execute_entry(
        &mut self,
        symbol: &str,
        candidate: &EntryCandidate,
        size: f64,
        ts: i64,
    ) {
        let intent = OrderIntent::market(symbol, Side::Buy, size);
        let order_id = match self.submit(&intent).await {
            Some(id) => id,
            None => return,
        };
        match self.poll_fill(&order_id).await {
            FillOutcome::Filled { price, ts: fill_ts } => {
                if (price - candidate.entry_price).abs() > f64::EPSILON {
                    tracing::info!(
                        symbol,
                        decision = candidate.entry_price,
                        fill = price,
                        "entry filled away from decision price"
                    );
                }
                self.engine
                    .commit_open(symbol, candidate, size, if fill_ts > 0 { fill_ts } else { ts });
                self.save_state();
            }
            FillOutcome::Rejected => {
                tracing::info!(symbol, order = %order_id, "entry rejected, staying flat");
            }
            FillOutcome::Unknown => {
                tracing::warn!(
                    symbol,
                    order = %order_id,
                    "entry fill unconfirmed after poll budget; state untouched until reconcile"
                );
            }
        }
    }

    /// Submit a sell intent and realize the close only on a confirmed fill.
    /// The trade record carries the decision price so replays reproduce
    /// identical P&L; a deviating broker fill is logged.
    async fn execute_exit(&mut self, symbol: &str, exit_price: f64, reason: ExitReason, ts: i64) {
        let size = match self.engine.book().get(symbol) {
            Some(p) => p.size,
            None => return,
        };
        let intent = OrderIntent::market(symbol, Side::Sell, size);
        let order_id = match self.submit(&intent).await {
            Some(id) => id,
            None => return,
        };
        match self.poll_fill(&order_id).await {
            FillOutcome::Filled { price, ts: fill_ts } => {
                if (price - exit_price).abs() > f64::EPSILON {
                    tracing::info!(
                        symbol,
                        decision = exit_price,
                        fill = price,
                        "exit filled away from decision price"
                    );
                }
                if let Some(record) = self.engine.commit_close(
                    symbol,
                    exit_price,
                    reason,
                    if fill_ts > 0 { fill_ts } else { ts },
                ) {
                    if let Err(err) = self.persistence.append_trade(&record) {
                        tracing::warn!(error = %err, "failed to export trade record");
                    }
                }
                self.save_state();
            }
            FillOutcome::Rejected => {
                tracing::warn!(symbol, order = %order_id, "exit rejected, position kept");
            }
            FillOutcome::Unknown => {
                tracing::warn!(
                    symbol,
                    order = %order_id,
                    "exit fill unconfirmed after poll budget; position kept until reconcile"
                );
            }
        }
    }

    async fn submit(&self, intent: &OrderIntent) -> Option<OrderId> {
        let cfg = self.engine.config();
        match with_retry(
            cfg.execution.fetch_retries,
            Duration::from_millis(cfg.execution.retry_delay_ms),
            "submit_order",
            || self.broker.submit_order(intent),
        )
        .await
        {
            Ok(id) => Some(id),
            Err(err) => {
                tracing::warn!(symbol = %intent.symbol, error = %err, "order submission failed");
                None
            }
        }
    }

    /// Poll the fill status up to the configured budget
    async fn poll_fill(&self, order_id: &OrderId) -> FillOutcome {
        let cfg = self.engine.config();
        let attempts = cfg.execution.fill_poll_attempts.max(1);
        for attempt in 1..=attempts {
            match self.broker.order_status(order_id).await {
                Ok(report) => match report.status {
                    FillStatus::Filled => {
                        return FillOutcome::Filled {
                            price: report.filled_price,
                            ts: report.filled_ts,
                        }
                    }
                    FillStatus::Rejected => return FillOutcome::Rejected,
                    FillStatus::Pending => {
                        tracing::debug!(order = %order_id, attempt, "fill still pending");
                    }
                },
                Err(err) => {
                    tracing::warn!(order = %order_id, attempt, error = %err, "fill poll failed");
                }
            }
            if attempt < attempts {
                tokio::time::sleep(Duration::from_millis(cfg.execution.fill_poll_delay_ms)).await;
            }
        }
        FillOutcome::Unknown
    }

    /// Diff internal positions against the broker's authoritative set.
    /// External-only positions are adopted; internal-only positions are
    /// closed as Desync. Nothing is dropped silently.
    pub async fn reconcile(&mut self) -> Result<()> {
        let cfg = self.engine.config().clone();
        let external = with_retry(
            cfg.execution.fetch_retries,
            Duration::from_millis(cfg.execution.retry_delay_ms),
            "open_positions",
            || self.broker.open_positions(),
        )
        .await
        .context("broker unreachable during reconciliation")?;

        let now = Utc::now().timestamp_millis();

        for bp in &external {
            if !self.engine.book().is_open(&bp.symbol) {
                tracing::info!(
                    symbol = %bp.symbol,
                    qty = bp.qty,
                    entry = bp.avg_entry_price,
                    "adopting position found at broker"
                );
                self.engine
                    .adopt_position(&bp.symbol, bp.avg_entry_price, bp.qty, now);
            }
        }

        for symbol in self.engine.book().symbols() {
            if !external.iter().any(|bp| bp.symbol == symbol) {
                let stop = self
                    .engine
                    .book()
                    .get(&symbol)
                    .map(|p| p.stop_price)
                    .unwrap_or_default();
                tracing::warn!(
                    symbol = %symbol,
                    "position missing at broker, closing as desync at stop price"
                );
                if let Some(record) =
                    self.engine
                        .commit_close(&symbol, stop, ExitReason::Desync, now)
                {
                    if let Err(err) = self.persistence.append_trade(&record) {
                        tracing::warn!(error = %err, "failed to export desync trade record");
                    }
                }
            }
        }

        self.save_state();
        Ok(())
    }

    async fn publish_status(&self) {
        let broker_equity = match self.broker.account_equity().await {
            Ok(equity) => Some(equity),
            Err(err) => {
                tracing::debug!(error = %err, "account equity unavailable");
                None
            }
        };
        let ledger = self.engine.ledger();
        let snapshot = StatusSnapshot {
            ts: Utc::now().timestamp_millis(),
            capital: ledger.capital(),
            drawdown: ledger.current_drawdown(),
            realized_pl: ledger.realized_pl_total(),
            broker_equity,
            open_positions: self.engine.book().all(),
        };
        self.status_tx.send_replace(snapshot);
    }

    fn save_state(&self) {
        let snapshot = self.engine.snapshot(Utc::now().timestamp_millis());
        if let Err(err) = self.persistence.save_state(&snapshot) {
            tracing::warn!(error = %err, "failed to save engine state");
        }
    }
}

/// Read-only status reporter. Exits when the decision loop goes away.
async fn status_task(mut rx: watch::Receiver<StatusSnapshot>, interval_secs: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
    loop {
        interval.tick().await;
        if rx.has_changed().is_err() {
            break;
        }
        let snapshot = rx.borrow_and_update().clone();
        tracing::info!(
            capital = snapshot.capital,
            drawdown = snapshot.drawdown,
            realized = snapshot.realized_pl,
            broker_equity = ?snapshot.broker_equity,
            open = snapshot.open_positions.len(),
            "status"
        );
        for position in &snapshot.open_positions {
            tracing::info!(
                symbol = %position.symbol,
                entry = position.entry_price,
                size = position.size,
                stop = position.stop_price,
                "open position"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{BrokerError, BrokerPosition, MockBarFeed, MockBroker};
    use crate::config::test_support::base_config;
    use crate::types::{Bar, FillReport};
    use std::fs;
    use std::path::PathBuf;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("swingbot_live_{}_{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    fn config(dir: &PathBuf) -> AppConfig {
        let mut cfg = base_config();
        cfg.bot.symbols = vec!["AAPL".to_string()];
        cfg.indicators.ma_fast = 3;
        cfg.indicators.ma_slow = 5;
        cfg.indicators.rsi_period = 3;
        cfg.indicators.macd_fast = 3;
        cfg.indicators.macd_slow = 6;
        cfg.indicators.macd_signal = 2;
        cfg.indicators.atr_period = 3;
        cfg.execution.retry_delay_ms = 1;
        cfg.execution.fill_poll_delay_ms = 1;
        cfg.persistence.data_dir = dir.to_string_lossy().to_string();
        cfg.persistence.csv_enabled = true;
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

    fn rising_bars() -> Vec<Bar> {
        [100.0, 100.5, 101.0, 100.8, 101.2, 101.5]
            .iter()
            .enumerate()
            .map(|(i, c)| bar(i as i64, *c))
            .collect()
    }

    fn filled_report(id: &OrderId, price: f64) -> FillReport {
        FillReport {
            order_id: id.clone(),
            status: FillStatus::Filled,
            filled_price: price,
            filled_qty: 1.0,
            filled_ts: 100,
        }
    }

    fn feed_with(bars: Vec<Bar>) -> MockBarFeed {
        let mut feed = MockBarFeed::new();
        feed.expect_fetch_bars().returning(move |_, _| Ok(bars.clone()));
        feed
    }

    fn passive_broker() -> MockBroker {
        let mut broker = MockBroker::new();
        broker.expect_mark_to_market().returning(|_, _| Ok(()));
        broker.expect_account_equity().returning(|| Ok(10_000.0));
        broker
    }

    #[tokio::test]
    async fn test_entry_commits_only_after_fill() {
        let dir = temp_dir("entry_fill");
        let mut broker = passive_broker();
        broker
            .expect_submit_order()
            .withf(|intent| intent.side == Side::Buy && intent.symbol == "AAPL")
            .returning(|_| Ok(OrderId("o-1".to_string())));
        broker
            .expect_order_status()
            .returning(|id| Ok(filled_report(id, 101.5)));

        let mut trader =
            LiveTrader::new(config(&dir), feed_with(rising_bars()), broker).unwrap();
        trader.run_cycle().await;
        assert!(trader.engine().book().is_open("AAPL"));
        let _ = fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_rejected_entry_stays_flat() {
        let dir = temp_dir("entry_rejected");
        let mut broker = passive_broker();
        broker
            .expect_submit_order()
            .returning(|_| Ok(OrderId("o-2".to_string())));
        broker.expect_order_status().returning(|id| {
            Ok(FillReport {
                order_id: id.clone(),
                status: FillStatus::Rejected,
                filled_price: 0.0,
                filled_qty: 0.0,
                filled_ts: 0,
            })
        });

        let mut trader =
            LiveTrader::new(config(&dir), feed_with(rising_bars()), broker).unwrap();
        trader.run_cycle().await;
        assert!(!trader.engine().book().is_open("AAPL"));
        let _ = fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_pending_fill_exhausts_polls_without_mutation() {
        let dir = temp_dir("entry_pending");
        let mut broker = passive_broker();
        broker
            .expect_submit_order()
            .returning(|_| Ok(OrderId("o-3".to_string())));
        broker
            .expect_order_status()
            .times(3)
            .returning(|id| {
                Ok(FillReport {
                    order_id: id.clone(),
                    status: FillStatus::Pending,
                    filled_price: 0.0,
                    filled_qty: 0.0,
                    filled_ts: 0,
                })
            });

        let mut trader =
            LiveTrader::new(config(&dir), feed_with(rising_bars()), broker).unwrap();
        trader.run_cycle().await;
        assert!(!trader.engine().book().is_open("AAPL"));
        assert_eq!(trader.engine().ledger().capital(), 10_000.0);
        let _ = fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_stop_exit_realizes_at_decision_price() {
        let dir = temp_dir("exit_stop");
        let mut bars = rising_bars();
        bars.push(bar(6, 95.0));
        let mut broker = passive_broker();
        broker
            .expect_submit_order()
            .withf(|intent| intent.side == Side::Sell)
            .returning(|_| Ok(OrderId("o-4".to_string())));
        broker
            .expect_order_status()
            .returning(|id| Ok(filled_report(id, 94.9)));

        let mut trader = LiveTrader::new(config(&dir), feed_with(bars), broker).unwrap();
        // seed an open position as if entered on a prior cycle
        trader.engine_mut().adopt_position("AAPL", 101.5, 2.0, 5);
        let stop = trader.engine().book().get("AAPL").unwrap().stop_price;

        trader.run_cycle().await;
        assert!(!trader.engine().book().is_open("AAPL"));
        let expected = 10_000.0 + (stop - 101.5) * 2.0;
        assert!((trader.engine().ledger().capital() - expected).abs() < 1e-9);

        let persistence = CsvPersistence::new(&dir, true, "live_state.json").unwrap();
        let trades = persistence.load_trades().unwrap();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].exit_price, stop);
        let _ = fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_rejected_exit_keeps_position() {
        let dir = temp_dir("exit_rejected");
        let mut bars = rising_bars();
        bars.push(bar(6, 95.0));
        let mut broker = passive_broker();
        broker
            .expect_submit_order()
            .returning(|_| Ok(OrderId("o-5".to_string())));
        broker.expect_order_status().returning(|id| {
            Ok(FillReport {
                order_id: id.clone(),
                status: FillStatus::Rejected,
                filled_price: 0.0,
                filled_qty: 0.0,
                filled_ts: 0,
            })
        });

        let mut trader = LiveTrader::new(config(&dir), feed_with(bars), broker).unwrap();
        trader.engine_mut().adopt_position("AAPL", 101.5, 2.0, 5);
        trader.run_cycle().await;
        assert!(trader.engine().book().is_open("AAPL"));
        assert_eq!(trader.engine().ledger().capital(), 10_000.0);
        let _ = fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_reconcile_adopts_external_position() {
        let dir = temp_dir("reconcile_adopt");
        let mut broker = passive_broker();
        broker.expect_open_positions().returning(|| {
            Ok(vec![BrokerPosition {
                symbol: "MSFT".to_string(),
                qty: 4.0,
                avg_entry_price: 300.0,
            }])
        });

        let mut trader =
            LiveTrader::new(config(&dir), feed_with(rising_bars()), broker).unwrap();
        trader.reconcile().await.unwrap();
        let position = trader.engine().book().get("MSFT").unwrap();
        assert_eq!(position.size, 4.0);
        assert_eq!(position.entry_price, 300.0);
        // stop rebuilt from the fixed entry-stop distance
        assert!((position.stop_price - 294.0).abs() < 1e-9);
        let _ = fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_reconcile_closes_internal_only_position() {
        let dir = temp_dir("reconcile_desync");
        let mut broker = passive_broker();
        broker.expect_open_positions().returning(|| Ok(Vec::new()));

        let mut trader =
            LiveTrader::new(config(&dir), feed_with(rising_bars()), broker).unwrap();
        trader.engine_mut().adopt_position("AAPL", 100.0, 2.0, 5);
        trader.reconcile().await.unwrap();
        assert!(!trader.engine().book().is_open("AAPL"));

        let persistence = CsvPersistence::new(&dir, true, "live_state.json").unwrap();
        let trades = persistence.load_trades().unwrap();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].exit_reason, ExitReason::Desync);
        let _ = fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_reconcile_surfaces_broker_outage() {
        let dir = temp_dir("reconcile_outage");
        let mut broker = passive_broker();
        broker
            .expect_open_positions()
            .returning(|| Err(BrokerError::Unreachable("down".to_string())));

        let mut trader =
            LiveTrader::new(config(&dir), feed_with(rising_bars()), broker).unwrap();
        trader.engine_mut().adopt_position("AAPL", 100.0, 2.0, 5);
        assert!(trader.reconcile().await.is_err());
        // internal view kept; nothing silently dropped
        assert!(trader.engine().book().is_open("AAPL"));
        let _ = fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_shutdown_flag_blocks_new_entries() {
        let dir = temp_dir("shutdown");
        // no submit_order expectation: a submission attempt would panic
        let mut trader =
            LiveTrader::new(config(&dir), feed_with(rising_bars()), passive_broker()).unwrap();
        trader.accepting_entries = false;
        trader.run_cycle().await;
        assert!(!trader.engine().book().is_open("AAPL"));
        let _ = fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_state_snapshot_restores_on_restart() {
        let dir = temp_dir("restart");
        let mut broker = passive_broker();
        broker
            .expect_submit_order()
            .returning(|_| Ok(OrderId("o-6".to_string())));
        broker
            .expect_order_status()
            .returning(|id| Ok(filled_report(id, 101.5)));

        {
            let mut trader =
                LiveTrader::new(config(&dir), feed_with(rising_bars()), broker).unwrap();
            trader.run_cycle().await;
            assert!(trader.engine().book().is_open("AAPL"));
        }

        // fresh process: snapshot restores the open position and ledger
        let trader2 =
            LiveTrader::new(config(&dir), feed_with(rising_bars()), passive_broker()).unwrap();
        assert!(trader2.engine().book().is_open("AAPL"));
        let _ = fs::remove_dir_all(&dir);
    }
}

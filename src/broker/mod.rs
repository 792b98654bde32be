//! Broker seam - external collaborators behind traits
//!
//! The engine consumes bars and produces order intents; everything touching
//! a market-data provider or a brokerage API lives behind [`BarFeed`] and
//! [`Broker`]. Live code calls these through [`with_retry`], which bounds
//! every external call to a fixed attempt count with a fixed backoff so a
//! stalled collaborator degrades one symbol's cycle instead of the run.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

use crate::types::{Bar, FillReport, OrderId, OrderIntent};

pub mod csv_feed;
pub use csv_feed::CsvBarFeed;

pub mod paper;
pub use paper::PaperBroker;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("feed unavailable: {0}")]
    Unavailable(String),
    #[error("no data for symbol {0}")]
    NoData(String),
}

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker unreachable: {0}")]
    Unreachable(String),
    #[error("order rejected: {0}")]
    OrderRejected(String),
    #[error("unknown order id {0}")]
    UnknownOrder(String),
}

/// A position as the broker reports it. The broker's view is authoritative
/// after a reconnect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerPosition {
    pub symbol: String,
    pub qty: f64,
    pub avg_entry_price: f64,
}

/// Ordered bar history per symbol. Insufficient history for a symbol is a
/// skip, not an error; `NoData` is reserved for a feed that knows nothing
/// about the symbol at all.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BarFeed: Send + Sync {
    /// Most recent `limit` bars, oldest first, strictly increasing ts
    async fn fetch_bars(&self, symbol: &str, limit: usize) -> Result<Vec<Bar>, FeedError>;
}

/// Order execution and account state. Submission is asynchronous relative
/// to the fill: callers poll [`Broker::order_status`] and commit engine
/// state only on a `Filled` report.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Broker: Send + Sync {
    async fn submit_order(&self, intent: &OrderIntent) -> Result<OrderId, BrokerError>;
    async fn order_status(&self, id: &OrderId) -> Result<FillReport, BrokerError>;
    async fn open_positions(&self) -> Result<Vec<BrokerPosition>, BrokerError>;
    async fn account_equity(&self) -> Result<f64, BrokerError>;

    /// Price-sync hook invoked with the freshest close before orders go
    /// out. Simulated brokers use it to mark fills; real brokers ignore it.
    async fn mark_to_market(&self, _symbol: &str, _price: f64) -> Result<(), BrokerError> {
        Ok(())
    }
}

/// Run `op` up to `attempts` times with a fixed delay between tries.
/// Returns the last error once the bound is exhausted; the caller decides
/// whether that failure is recoverable for its cycle.
pub async fn with_retry<T, E, F, Fut>(
    attempts: usize,
    delay: Duration,
    what: &str,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let attempts = attempts.max(1);
    let mut last_err = None;
    for attempt in 1..=attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                tracing::warn!(what, attempt, attempts, error = %err, "attempt failed");
                last_err = Some(err);
                if attempt < attempts {
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
    Err(last_err.expect("at least one attempt ran"))
}

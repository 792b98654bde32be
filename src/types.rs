//! Core types used throughout SwingBot
//!
//! Defines common data structures for bars, order intents, fills and
//! closed-trade records.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A single OHLCV bar. Timestamps are Unix milliseconds.
///
/// Bars arrive as an ordered sequence with strictly increasing timestamps
/// and are immutable once produced.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    /// Bar timestamp in milliseconds
    pub ts: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Order side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// Order kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderKind {
    Market,
    Limit,
}

impl fmt::Display for OrderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderKind::Market => write!(f, "MARKET"),
            OrderKind::Limit => write!(f, "LIMIT"),
        }
    }
}

/// An order the engine wants executed. A collaborator is responsible for
/// execution and for reporting the fill back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderIntent {
    pub symbol: String,
    pub side: Side,
    pub quantity: f64,
    pub kind: OrderKind,
    /// Limit price, only meaningful for `OrderKind::Limit`
    pub limit_price: Option<f64>,
}

impl OrderIntent {
    /// Market order helper
    pub fn market(symbol: impl Into<String>, side: Side, quantity: f64) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            quantity,
            kind: OrderKind::Market,
            limit_price: None,
        }
    }
}

/// Broker-assigned order identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderId(pub String);

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Fill status reported by the broker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FillStatus {
    Filled,
    Pending,
    Rejected,
}

impl fmt::Display for FillStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FillStatus::Filled => write!(f, "FILLED"),
            FillStatus::Pending => write!(f, "PENDING"),
            FillStatus::Rejected => write!(f, "REJECTED"),
        }
    }
}

/// Fill confirmation from the broker. The engine commits a position open or
/// close only once `status` is `Filled`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FillReport {
    pub order_id: OrderId,
    pub status: FillStatus,
    pub filled_price: f64,
    pub filled_qty: f64,
    /// Fill timestamp in milliseconds, 0 while pending
    pub filled_ts: i64,
}

/// Why a position was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    /// Bar low crossed the protective stop; fills at the stop price
    StopLoss,
    /// Bar high crossed the take-profit target; fills at the target
    TakeProfit,
    /// Close fell below the configured moving average; fills at close
    TrendExit,
    /// Position vanished at the broker during reconciliation
    Desync,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::StopLoss => write!(f, "STOP_LOSS"),
            ExitReason::TakeProfit => write!(f, "TAKE_PROFIT"),
            ExitReason::TrendExit => write!(f, "TREND_EXIT"),
            ExitReason::Desync => write!(f, "DESYNC"),
        }
    }
}

/// Record of a closed trade. Created exactly once per closed position,
/// immutable thereafter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub symbol: String,
    pub entry_price: f64,
    pub exit_price: f64,
    pub size: f64,
    /// Protective stop at the moment of exit
    pub stop_price_at_exit: f64,
    pub exit_reason: ExitReason,
    pub pl_absolute: f64,
    pub pl_percent: f64,
    /// Entry timestamp in milliseconds
    pub entry_ts: i64,
    /// Exit timestamp in milliseconds
    pub exit_ts: i64,
}

impl TradeRecord {
    /// True if the trade realized a profit
    pub fn is_win(&self) -> bool {
        self.pl_absolute > 0.0
    }
}

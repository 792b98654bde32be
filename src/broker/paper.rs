//! Paper broker - simulated order execution
//!
//! Fills market orders instantly at the symbol's current mark (set by the
//! caller from the latest close) and tracks cash and positions so the live
//! loop's fill-polling and reconciliation paths run unchanged against it.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

use crate::broker::{Broker, BrokerError, BrokerPosition};
use crate::types::{FillReport, FillStatus, OrderId, OrderIntent, Side};

pub struct PaperBroker {
    cash: RwLock<f64>,
    marks: RwLock<HashMap<String, f64>>,
    positions: RwLock<HashMap<String, BrokerPosition>>,
    fills: RwLock<HashMap<String, FillReport>>,
}

impl PaperBroker {
    pub fn new(initial_cash: f64) -> Self {
        Self {
            cash: RwLock::new(initial_cash),
            marks: RwLock::new(HashMap::new()),
            positions: RwLock::new(HashMap::new()),
            fills: RwLock::new(HashMap::new()),
        }
    }

    /// Update the price a market order for `symbol` would fill at
    pub fn set_mark(&self, symbol: &str, price: f64) {
        if let Ok(mut marks) = self.marks.write() {
            marks.insert(symbol.to_string(), price);
        }
    }

    fn mark(&self, symbol: &str) -> Option<f64> {
        self.marks.read().ok()?.get(symbol).copied()
    }

    fn apply_fill(&self, intent: &OrderIntent, price: f64) -> Result<(), BrokerError> {
        let mut positions = self.positions.write().map_err(|_| poisoned())?;
        let mut cash = self.cash.write().map_err(|_| poisoned())?;
        match intent.side {
            Side::Buy => {
                let entry = positions
                    .entry(intent.symbol.clone())
                    .or_insert_with(|| BrokerPosition {
                        symbol: intent.symbol.clone(),
                        qty: 0.0,
                        avg_entry_price: 0.0,
                    });
                let total_cost = entry.qty * entry.avg_entry_price + intent.quantity * price;
                entry.qty += intent.quantity;
                entry.avg_entry_price = total_cost / entry.qty;
                *cash -= intent.quantity * price;
            }
            Side::Sell => {
                let held = positions.get_mut(&intent.symbol).ok_or_else(|| {
                    BrokerError::OrderRejected(format!("no position in {}", intent.symbol))
                })?;
                if held.qty < intent.quantity - 1e-9 {
                    return Err(BrokerError::OrderRejected(format!(
                        "sell {} exceeds held {}",
                        intent.quantity, held.qty
                    )));
                }
                held.qty -= intent.quantity;
                *cash += intent.quantity * price;
                if held.qty <= 1e-9 {
                    positions.remove(&intent.symbol);
                }
            }
        }
        Ok(())
    }
}

fn poisoned() -> BrokerError {
    BrokerError::Unreachable("paper broker state poisoned".to_string())
}

#[async_trait]
impl Broker for PaperBroker {
    async fn submit_order(&self, intent: &OrderIntent) -> Result<OrderId, BrokerError> {
        let price = intent
            .limit_price
            .or_else(|| self.mark(&intent.symbol))
            .ok_or_else(|| {
                BrokerError::OrderRejected(format!("no mark price for {}", intent.symbol))
            })?;

        self.apply_fill(intent, price)?;

        let id = OrderId(Uuid::new_v4().to_string());
        let report = FillReport {
            order_id: id.clone(),
            status: FillStatus::Filled,
            filled_price: price,
            filled_qty: intent.quantity,
            filled_ts: Utc::now().timestamp_millis(),
        };
        self.fills
            .write()
            .map_err(|_| poisoned())?
            .insert(id.0.clone(), report);
        tracing::debug!(symbol = %intent.symbol, side = %intent.side, qty = intent.quantity, price, "paper fill");
        Ok(id)
    }

    async fn order_status(&self, id: &OrderId) -> Result<FillReport, BrokerError> {
        self.fills
            .read()
            .map_err(|_| poisoned())?
            .get(&id.0)
            .cloned()
            .ok_or_else(|| BrokerError::UnknownOrder(id.0.clone()))
    }

    async fn open_positions(&self) -> Result<Vec<BrokerPosition>, BrokerError> {
        Ok(self
            .positions
            .read()
            .map_err(|_| poisoned())?
            .values()
            .cloned()
            .collect())
    }

    async fn account_equity(&self) -> Result<f64, BrokerError> {
        let cash = *self.cash.read().map_err(|_| poisoned())?;
        let positions = self.positions.read().map_err(|_| poisoned())?;
        let held: f64 = positions
            .values()
            .map(|p| p.qty * self.mark(&p.symbol).unwrap_or(p.avg_entry_price))
            .sum();
        Ok(cash + held)
    }

    async fn mark_to_market(&self, symbol: &str, price: f64) -> Result<(), BrokerError> {
        self.set_mark(symbol, price);
        Ok(())
    }
}

//! ═══════════════════════════════════════════════════════════════════════════
//! 📡 LEADER MONITOR — parses execution reports, dedups, broadcasts fan-out
//!
//! One per leader. Subscribes to `execution_report`/`position` over its own
//! private WebSocket connection (reconnect/backoff identical to
//! `WebSocketSupervisor`). Broadcasting is fire-and-forget: each registered
//! callback is isolated so one failing follower never blocks the rest.
//! ═══════════════════════════════════════════════════════════════════════════

use crate::types::Side;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use log::{debug, warn};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;

const PROCESSED_ORDERS_MAX: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LeaderOrderType {
    Limit,
    Market,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LeaderTradeAction {
    Open,
    Add,
    Reduce,
    Close,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderTradeEvent {
    pub leader_id: String,
    pub order_id: String,
    pub symbol: String,
    pub side: Side,
    pub order_type: LeaderOrderType,
    pub price: Decimal,
    pub quantity: Decimal,
    pub action: LeaderTradeAction,
    pub timestamp: DateTime<Utc>,
    pub raw_payload: serde_json::Value,
}

/// Parses a raw `execution_report` payload per §4.9. Accepts only
/// `FILLED`/`PARTIAL_FILL` statuses with a positive executed quantity;
/// anything else (including missing required fields) yields `None`.
pub fn parse_execution_report(leader_id: &str, data: &serde_json::Value) -> Option<LeaderTradeEvent> {
    let status = data.get("status")?.as_str()?;
    if status != "FILLED" && status != "PARTIAL_FILL" {
        return None;
    }

    let order_id = data.get("orderId")?.as_str()?.to_string();
    let symbol = data.get("symbol")?.as_str()?.to_string();
    let side = Side::from_str_loose(data.get("side")?.as_str()?)?;

    let price_raw = data
        .get("executedPrice")
        .or_else(|| data.get("avgPrice"))?
        .as_str()
        .map(|s| s.to_string())
        .or_else(|| data.get("executedPrice").or_else(|| data.get("avgPrice"))?.as_f64().map(|f| f.to_string()))?;
    let price: Decimal = price_raw.parse().ok()?;

    let qty_raw = data.get("executedQty")?;
    let qty: Decimal = if let Some(s) = qty_raw.as_str() {
        s.parse().ok()?
    } else {
        Decimal::try_from(qty_raw.as_f64()?).ok()?
    };
    if qty <= Decimal::ZERO {
        return None;
    }

    let order_type = match data.get("type").and_then(|v| v.as_str()) {
        Some(t) if t.eq_ignore_ascii_case("LIMIT") => LeaderOrderType::Limit,
        _ => LeaderOrderType::Market,
    };

    let reduce_only = data.get("reduceOnly").and_then(|v| v.as_bool()).unwrap_or(false);
    let action = if reduce_only { LeaderTradeAction::Close } else { LeaderTradeAction::Open };

    let timestamp = data
        .get("timestamp")
        .and_then(|v| v.as_i64())
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .unwrap_or_else(Utc::now);

    Some(LeaderTradeEvent {
        leader_id: leader_id.to_string(),
        order_id,
        symbol,
        side,
        order_type,
        price,
        quantity: qty,
        action,
        timestamp,
        raw_payload: data.clone(),
    })
}

#[async_trait]
pub trait TradeCallback: Send + Sync {
    async fn on_trade(&self, event: LeaderTradeEvent);
}

#[async_trait]
pub trait PositionCallback: Send + Sync {
    async fn on_position(&self, payload: serde_json::Value);
}

struct Subscribers {
    trade: Vec<(String, Arc<dyn TradeCallback>)>,
    position: Vec<(String, Arc<dyn PositionCallback>)>,
}

/// One per leader; owns dedup state and the fan-out subscriber list.
pub struct LeaderMonitor {
    leader_id: String,
    processed_orders: Mutex<VecDeque<String>>,
    processed_set: Mutex<HashSet<String>>,
    subscribers: Mutex<Subscribers>,
}

impl LeaderMonitor {
    pub fn new(leader_id: impl Into<String>) -> Self {
        Self {
            leader_id: leader_id.into(),
            processed_orders: Mutex::new(VecDeque::new()),
            processed_set: Mutex::new(HashSet::new()),
            subscribers: Mutex::new(Subscribers { trade: Vec::new(), position: Vec::new() }),
        }
    }

    pub fn leader_id(&self) -> &str {
        &self.leader_id
    }

    pub async fn register_trade_callback(&self, follower_id: impl Into<String>, cb: Arc<dyn TradeCallback>) {
        self.subscribers.lock().await.trade.push((follower_id.into(), cb));
    }

    pub async fn register_position_callback(&self, follower_id: impl Into<String>, cb: Arc<dyn PositionCallback>) {
        self.subscribers.lock().await.position.push((follower_id.into(), cb));
    }

    pub async fn unregister_follower(&self, follower_id: &str) {
        let mut subs = self.subscribers.lock().await;
        subs.trade.retain(|(id, _)| id != follower_id);
        subs.position.retain(|(id, _)| id != follower_id);
    }

    /// Dedup on `order_id`; bounded at ~10000 entries, compacted to half when exceeded.
    async fn dedup_order(&self, order_id: &str) -> bool {
        let mut set = self.processed_set.lock().await;
        if set.contains(order_id) {
            return false;
        }
        let mut order = self.processed_orders.lock().await;
        set.insert(order_id.to_string());
        order.push_back(order_id.to_string());

        if order.len() > PROCESSED_ORDERS_MAX {
            let excess = order.len() - PROCESSED_ORDERS_MAX / 2;
            for _ in 0..excess {
                if let Some(evicted) = order.pop_front() {
                    set.remove(&evicted);
                }
            }
        }
        true
    }

    /// Parses an incoming execution-report frame; dedups; broadcasts.
    pub async fn handle_execution_report(&self, data: &serde_json::Value) {
        let Some(event) = parse_execution_report(&self.leader_id, data) else {
            debug!("execution report rejected by parser for leader {}", self.leader_id);
            return;
        };

        if !self.dedup_order(&event.order_id).await {
            debug!("duplicate order_id {} dropped for leader {}", event.order_id, self.leader_id);
            return;
        }

        self.broadcast_trade_event(event).await;
    }

    /// Fire-and-forget fan-out. Each callback runs as its own spawned task so
    /// a slow or panicking follower callback can never block or crash the
    /// others — `join_all` just awaits the task handles, not the callbacks
    /// directly.
    pub async fn broadcast_trade_event(&self, event: LeaderTradeEvent) {
        let callbacks: Vec<(String, Arc<dyn TradeCallback>)> = self.subscribers.lock().await.trade.clone();
        let handles = callbacks.into_iter().map(|(follower_id, cb)| {
            let event = event.clone();
            tokio::spawn(async move {
                cb.on_trade(event).await;
            })
            .then_log(follower_id)
        });
        futures::future::join_all(handles).await;
    }

    pub async fn handle_position_update(&self, payload: serde_json::Value) {
        let callbacks: Vec<(String, Arc<dyn PositionCallback>)> = self.subscribers.lock().await.position.clone();
        let handles = callbacks.into_iter().map(|(follower_id, cb)| {
            let payload = payload.clone();
            tokio::spawn(async move {
                cb.on_position(payload).await;
            })
            .then_log(follower_id)
        });
        futures::future::join_all(handles).await;
    }
}

impl Clone for Subscribers {
    fn clone(&self) -> Self {
        Self { trade: self.trade.clone(), position: self.position.clone() }
    }
}

/// Logs (rather than propagates) a panicking callback task's join error, so
/// one broken follower callback never surfaces as a broadcast-wide failure.
trait ThenLog: std::future::Future<Output = Result<(), tokio::task::JoinError>> + Sized {
    fn then_log(self, follower_id: String) -> impl std::future::Future<Output = ()> {
        async move {
            if let Err(e) = self.await {
                warn!("callback for follower {} panicked: {}", follower_id, e);
            }
        }
    }
}
impl<F: std::future::Future<Output = Result<(), tokio::task::JoinError>>> ThenLog for F {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unknown_status() {
        let data = serde_json::json!({
            "orderId": "1", "symbol": "PERP_BTC_USDC", "side": "BUY",
            "executedQty": "1.0", "executedPrice": "100", "status": "NEW"
        });
        assert!(parse_execution_report("leader1", &data).is_none());
    }

    #[test]
    fn rejects_zero_quantity() {
        let data = serde_json::json!({
            "orderId": "X", "symbol": "PERP_BTC_USDC", "side": "BUY",
            "executedQty": 0, "status": "FILLED"
        });
        assert!(parse_execution_report("leader1", &data).is_none());
    }

    #[test]
    fn accepts_filled_with_required_fields() {
        let data = serde_json::json!({
            "orderId": "1", "symbol": "PERP_BTC_USDC", "side": "buy",
            "executedQty": "1.5", "executedPrice": "42000.5", "status": "FILLED",
            "type": "LIMIT"
        });
        let event = parse_execution_report("leader1", &data).unwrap();
        assert_eq!(event.side, Side::Buy);
        assert_eq!(event.order_type, LeaderOrderType::Limit);
        assert_eq!(event.action, LeaderTradeAction::Open);
    }

    #[test]
    fn reduce_only_maps_to_close() {
        let data = serde_json::json!({
            "orderId": "1", "symbol": "PERP_BTC_USDC", "side": "SELL",
            "executedQty": "1.0", "executedPrice": "100", "status": "FILLED",
            "reduceOnly": true
        });
        let event = parse_execution_report("leader1", &data).unwrap();
        assert_eq!(event.action, LeaderTradeAction::Close);
    }

    #[tokio::test]
    async fn dedup_rejects_repeat_order_id() {
        let monitor = LeaderMonitor::new("leader1");
        assert!(monitor.dedup_order("1").await);
        assert!(!monitor.dedup_order("1").await);
    }

    #[tokio::test]
    async fn handle_execution_report_ignores_rejected_zero_qty() {
        let monitor = LeaderMonitor::new("leader1");
        let data = serde_json::json!({
            "orderId": "X", "symbol": "PERP_BTC_USDC", "side": "BUY",
            "executedQty": 0, "status": "FILLED"
        });
        monitor.handle_execution_report(&data).await;
        assert!(!monitor.processed_set.lock().await.contains("X"));
    }
}

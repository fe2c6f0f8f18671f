//! ═══════════════════════════════════════════════════════════════════════════
//! 🪞 COPY TRADING BOT — per-follower executor
//!
//! Consumes leader events, validates via `RiskController`, and issues orders
//! on the follower's account. `_execution_lock` serializes copies per
//! follower so two leader events never race into out-of-order fills.
//! ═══════════════════════════════════════════════════════════════════════════

use crate::exchange::{ExchangeClient, OrderSideApi};
use crate::leader_monitor::{LeaderOrderType, LeaderTradeAction, LeaderTradeEvent, TradeCallback};
use crate::risk_controller::RiskController;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{info, warn};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

const LATENCY_LOG_MAX: usize = 1_000;
const LATENCY_LOG_COMPACT_TO: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CopyTradeStatus {
    Executed,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct CopyTradeRecord {
    pub leader_id: String,
    pub follower_id: String,
    pub leader_order_id: String,
    pub follower_order_id: Option<String>,
    pub symbol: String,
    pub action: LeaderTradeAction,
    pub order_type: LeaderOrderType,
    pub side: crate::types::Side,
    pub leader_price: Decimal,
    pub leader_quantity: Decimal,
    pub follower_price: Option<Decimal>,
    pub follower_quantity: Decimal,
    pub copy_ratio: Decimal,
    pub status: CopyTradeStatus,
    pub failure_reason: Option<String>,
    pub leader_timestamp: DateTime<Utc>,
    pub follower_timestamp: Option<DateTime<Utc>>,
    pub latency_ms: Option<f64>,
    pub slippage: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CopyTradeResult {
    pub success: bool,
    pub follower_id: String,
    pub leader_order_id: String,
    pub follower_order_id: Option<String>,
    pub status: CopyTradeStatus,
    pub executed_price: Option<Decimal>,
    pub executed_quantity: Option<Decimal>,
    pub latency_ms: Option<f64>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FollowerStatistics {
    pub total_trades: u64,
    pub successful_trades: u64,
    pub failed_trades: u64,
    pub skipped_trades: u64,
    pub total_profit: Decimal,
    pub total_slippage: Decimal,
}

impl FollowerStatistics {
    pub fn success_rate(&self) -> f64 {
        if self.total_trades == 0 {
            return 0.0;
        }
        self.successful_trades as f64 / self.total_trades as f64
    }
}

struct Stats {
    counters: FollowerStatistics,
    latency_log: VecDeque<f64>,
    trade_log: Vec<CopyTradeRecord>,
}

/// Per-follower executor. Holds the follower's exchange client, its
/// `RiskController`, and the serialization lock for in-flight copies.
pub struct CopyTradingBot {
    follower_id: String,
    copy_ratio: Decimal,
    client: Arc<dyn ExchangeClient>,
    risk: Arc<RiskController>,
    running: AtomicBool,
    skipped_trades: AtomicU64,
    execution_lock: Mutex<()>,
    stats: Mutex<Stats>,
}

impl CopyTradingBot {
    pub fn new(follower_id: impl Into<String>, copy_ratio: Decimal, client: Arc<dyn ExchangeClient>, risk: Arc<RiskController>) -> Self {
        Self {
            follower_id: follower_id.into(),
            copy_ratio,
            client,
            risk,
            running: AtomicBool::new(true),
            skipped_trades: AtomicU64::new(0),
            execution_lock: Mutex::new(()),
            stats: Mutex::new(Stats {
                counters: FollowerStatistics::default(),
                latency_log: VecDeque::new(),
                trade_log: Vec::new(),
            }),
        }
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub async fn statistics(&self) -> FollowerStatistics {
        self.stats.lock().await.counters.clone()
    }

    pub async fn trade_log(&self) -> Vec<CopyTradeRecord> {
        self.stats.lock().await.trade_log.clone()
    }

    /// Main entry point: handles one leader trade event end to end.
    pub async fn handle_leader_trade(&self, event: LeaderTradeEvent) -> CopyTradeResult {
        let _guard = self.execution_lock.lock().await;
        let start = std::time::Instant::now();

        if !self.is_running() {
            return self.skip(&event, "bot not running").await;
        }

        let validation = self.risk.validate_trade(&event, self.copy_ratio, None).await;
        if !validation.is_valid {
            let reason = validation.reason.unwrap_or_else(|| "risk rejected".to_string());
            return self.skip(&event, &reason).await;
        }

        let follower_qty = validation.adjusted_qty.unwrap_or(event.quantity * self.copy_ratio);

        let exec_result = match event.order_type {
            LeaderOrderType::Market => self.client.create_market_order(&event.symbol, to_api_side(event.side), follower_qty).await,
            LeaderOrderType::Limit => {
                self.client
                    .create_limit_order(&event.symbol, to_api_side(event.side), event.price, follower_qty)
                    .await
            }
        };

        let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
        self.record_latency(latency_ms).await;

        match exec_result {
            Ok(ack) => {
                self.risk
                    .record_trade_result(&event.symbol, follower_qty, event.price, event.side, event.action, None)
                    .await;

                let record = CopyTradeRecord {
                    leader_id: event.leader_id.clone(),
                    follower_id: self.follower_id.clone(),
                    leader_order_id: event.order_id.clone(),
                    follower_order_id: Some(ack.order_id.clone()),
                    symbol: event.symbol.clone(),
                    action: event.action,
                    order_type: event.order_type,
                    side: event.side,
                    leader_price: event.price,
                    leader_quantity: event.quantity,
                    follower_price: Some(event.price),
                    follower_quantity: follower_qty,
                    copy_ratio: self.copy_ratio,
                    status: CopyTradeStatus::Executed,
                    failure_reason: None,
                    leader_timestamp: event.timestamp,
                    follower_timestamp: Some(Utc::now()),
                    latency_ms: Some(latency_ms),
                    slippage: None,
                };

                let mut stats = self.stats.lock().await;
                stats.counters.total_trades += 1;
                stats.counters.successful_trades += 1;
                push_bounded(&mut stats.trade_log, record.clone(), 10_000);

                info!(
                    "follower {} copied leader {} order {}: {} {} @ {} (latency {:.1}ms)",
                    self.follower_id, event.leader_id, event.order_id, event.side, follower_qty, event.price, latency_ms
                );

                CopyTradeResult {
                    success: true,
                    follower_id: self.follower_id.clone(),
                    leader_order_id: event.order_id,
                    follower_order_id: Some(ack.order_id),
                    status: CopyTradeStatus::Executed,
                    executed_price: Some(event.price),
                    executed_quantity: Some(follower_qty),
                    latency_ms: Some(latency_ms),
                    error_message: None,
                }
            }
            Err(e) => {
                warn!("follower {} failed to copy leader {} order: {}", self.follower_id, event.leader_id, e);
                let mut stats = self.stats.lock().await;
                stats.counters.total_trades += 1;
                stats.counters.failed_trades += 1;

                CopyTradeResult {
                    success: false,
                    follower_id: self.follower_id.clone(),
                    leader_order_id: event.order_id,
                    follower_order_id: None,
                    status: CopyTradeStatus::Failed,
                    executed_price: None,
                    executed_quantity: None,
                    latency_ms: Some(latency_ms),
                    error_message: Some(e.to_string()),
                }
            }
        }
    }

    async fn skip(&self, event: &LeaderTradeEvent, reason: &str) -> CopyTradeResult {
        self.skipped_trades.fetch_add(1, Ordering::SeqCst);
        let mut stats = self.stats.lock().await;
        stats.counters.total_trades += 1;
        stats.counters.skipped_trades += 1;
        push_bounded(
            &mut stats.trade_log,
            CopyTradeRecord {
                leader_id: event.leader_id.clone(),
                follower_id: self.follower_id.clone(),
                leader_order_id: event.order_id.clone(),
                follower_order_id: None,
                symbol: event.symbol.clone(),
                action: event.action,
                order_type: event.order_type,
                side: event.side,
                leader_price: event.price,
                leader_quantity: event.quantity,
                follower_price: None,
                follower_quantity: Decimal::ZERO,
                copy_ratio: self.copy_ratio,
                status: CopyTradeStatus::Skipped,
                failure_reason: Some(reason.to_string()),
                leader_timestamp: event.timestamp,
                follower_timestamp: Some(Utc::now()),
                latency_ms: None,
                slippage: None,
            },
            10_000,
        );

        CopyTradeResult {
            success: false,
            follower_id: self.follower_id.clone(),
            leader_order_id: event.order_id.clone(),
            follower_order_id: None,
            status: CopyTradeStatus::Skipped,
            executed_price: None,
            executed_quantity: None,
            latency_ms: None,
            error_message: Some(reason.to_string()),
        }
    }

    async fn record_latency(&self, latency_ms: f64) {
        let mut stats = self.stats.lock().await;
        stats.latency_log.push_back(latency_ms);
        if stats.latency_log.len() > LATENCY_LOG_MAX {
            while stats.latency_log.len() > LATENCY_LOG_COMPACT_TO {
                stats.latency_log.pop_front();
            }
        }
    }
}

fn to_api_side(side: crate::types::Side) -> OrderSideApi {
    match side {
        crate::types::Side::Buy => OrderSideApi::Buy,
        crate::types::Side::Sell => OrderSideApi::Sell,
    }
}

fn push_bounded<T>(log: &mut Vec<T>, item: T, max: usize) {
    log.push(item);
    if log.len() > max {
        log.remove(0);
    }
}

/// Adapter registered on a `LeaderMonitor` so the follower callback list can
/// hold `Arc<dyn TradeCallback>` while dispatching into this bot.
pub struct CopyTradingCallback(pub Arc<CopyTradingBot>);

#[async_trait]
impl TradeCallback for CopyTradingCallback {
    async fn on_trade(&self, event: LeaderTradeEvent) {
        let _ = self.0.handle_leader_trade(event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::SimulatedExchangeClient;
    use crate::leader_monitor::LeaderOrderType;
    use crate::risk_controller::RiskLimits;
    use rust_decimal_macros::dec;

    fn limits() -> RiskLimits {
        RiskLimits {
            max_per_trade_amount: dec!(100000),
            daily_max_loss: dec!(500),
            max_position_count: 5,
            max_position_value: dec!(1000000),
            max_single_position_ratio: dec!(0.9),
        }
    }

    fn event() -> LeaderTradeEvent {
        LeaderTradeEvent {
            leader_id: "leader1".into(),
            order_id: "1".into(),
            symbol: "PERP_BTC_USDC".into(),
            side: crate::types::Side::Buy,
            order_type: LeaderOrderType::Market,
            price: dec!(42000),
            quantity: dec!(1.0),
            action: LeaderTradeAction::Open,
            timestamp: Utc::now(),
            raw_payload: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn successful_copy_records_a_trade() {
        let client = Arc::new(SimulatedExchangeClient::new());
        let risk = Arc::new(RiskController::new("f1", limits()));
        let bot = CopyTradingBot::new("f1", dec!(0.1), client, risk);

        let result = bot.handle_leader_trade(event()).await;
        assert!(result.success);
        assert_eq!(bot.statistics().await.successful_trades, 1);
    }

    #[tokio::test]
    async fn stopped_bot_skips_trades() {
        let client = Arc::new(SimulatedExchangeClient::new());
        let risk = Arc::new(RiskController::new("f1", limits()));
        let bot = CopyTradingBot::new("f1", dec!(0.1), client, risk);
        bot.stop();

        let result = bot.handle_leader_trade(event()).await;
        assert!(!result.success);
        assert_eq!(result.status, CopyTradeStatus::Skipped);
    }
}

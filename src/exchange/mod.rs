//! ═══════════════════════════════════════════════════════════════════════════
//! 🔄 EXCHANGE CLIENT — order placement surface + retry handling
//!
//! Thin async trait over whatever perpetual-futures REST/WS API a session is
//! wired to. Grid and copy bots depend only on this trait, never on a
//! concrete venue client, so a simulated double can stand in for tests.
//! ═══════════════════════════════════════════════════════════════════════════

use async_trait::async_trait;
use log::{info, warn};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSideApi {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderAck {
    pub order_id: String,
    pub symbol: String,
    pub side: OrderSideApi,
    pub price: Option<Decimal>,
    pub quantity: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBookLevel {
    pub price: Decimal,
    pub quantity: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct OrderBook {
    pub bids: Vec<OrderBookLevel>,
    pub asks: Vec<OrderBookLevel>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionSnapshot {
    pub symbol: String,
    pub side: OrderSideApi,
    pub quantity: Decimal,
    pub entry_price: Decimal,
    pub mark_price: Decimal,
    pub unrealized_pnl: Decimal,
}

/// Venue surface every bot depends on. Implementations are expected to
/// retry transient failures themselves (see `RetryHandler`) — callers treat
/// an `Err` as final.
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    async fn create_limit_order(&self, symbol: &str, side: OrderSideApi, price: Decimal, quantity: Decimal) -> Result<OrderAck, ExchangeCallError>;

    async fn create_market_order(&self, symbol: &str, side: OrderSideApi, quantity: Decimal) -> Result<OrderAck, ExchangeCallError>;

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<(), ExchangeCallError>;

    async fn cancel_orders(&self, symbol: &str, order_ids: &[String]) -> Vec<Result<(), ExchangeCallError>>;

    async fn get_positions(&self, symbol: &str) -> Result<Vec<PositionSnapshot>, ExchangeCallError>;

    async fn get_orderbook(&self, symbol: &str, depth: usize) -> Result<OrderBook, ExchangeCallError>;

    async fn get_orders(&self, symbol: &str) -> Result<Vec<OrderAck>, ExchangeCallError>;
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ExchangeCallError {
    #[error("venue rejected order: {0}")]
    Rejected(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("rate limited, retry after {0:?}")]
    RateLimited(Duration),
    #[error("timeout after {0:?}")]
    Timeout(Duration),
    #[error("unknown order: {0}")]
    UnknownOrder(String),
}

impl ExchangeCallError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ExchangeCallError::Network(_) | ExchangeCallError::RateLimited(_) | ExchangeCallError::Timeout(_))
    }
}

/// Wraps any `ExchangeClient` call with the shared retry policy: 3 attempts,
/// base delay 1s, capped at 30s, with jitter to avoid thundering-herd retries
/// across many sessions sharing one venue.
pub struct RetryHandler {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl Default for RetryHandler {
    fn default() -> Self {
        Self { max_attempts: 3, base_delay: Duration::from_secs(1), max_delay: Duration::from_secs(30) }
    }
}

impl RetryHandler {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self { max_attempts, base_delay, max_delay }
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let exp = 2u64.saturating_pow(attempt.min(8));
        let scaled = self.base_delay.as_millis() as u64 * exp;
        let jitter_ms = fastrand::u64(0..=250);
        Duration::from_millis(scaled.saturating_add(jitter_ms)).min(self.max_delay)
    }

    pub async fn run<F, Fut, T>(&self, op_name: &str, mut f: F) -> Result<T, ExchangeCallError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, ExchangeCallError>>,
    {
        let mut attempt = 0;
        loop {
            match f().await {
                Ok(v) => return Ok(v),
                Err(e) if e.is_retryable() && attempt + 1 < self.max_attempts => {
                    let delay = self.delay_for(attempt);
                    warn!("{} failed ({}), retrying in {:?} (attempt {}/{})", op_name, e, delay, attempt + 1, self.max_attempts);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

struct SimState {
    orders: HashMap<String, OrderAck>,
    positions: HashMap<String, PositionSnapshot>,
}

/// In-memory exchange double used by session tests and dry-run sessions.
/// Every call succeeds deterministically; no network I/O, no retries needed.
pub struct SimulatedExchangeClient {
    next_id: AtomicU64,
    state: Mutex<SimState>,
}

impl Default for SimulatedExchangeClient {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedExchangeClient {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            state: Mutex::new(SimState { orders: HashMap::new(), positions: HashMap::new() }),
        }
    }

    fn next_order_id(&self) -> String {
        format!("SIM-{}", self.next_id.fetch_add(1, Ordering::SeqCst))
    }
}

#[async_trait]
impl ExchangeClient for SimulatedExchangeClient {
    async fn create_limit_order(&self, symbol: &str, side: OrderSideApi, price: Decimal, quantity: Decimal) -> Result<OrderAck, ExchangeCallError> {
        let ack = OrderAck { order_id: self.next_order_id(), symbol: symbol.to_string(), side, price: Some(price), quantity };
        self.state.lock().await.orders.insert(ack.order_id.clone(), ack.clone());
        info!("simulated limit order placed: {} {} {} @ {}", symbol, side_label(side), quantity, price);
        Ok(ack)
    }

    async fn create_market_order(&self, symbol: &str, side: OrderSideApi, quantity: Decimal) -> Result<OrderAck, ExchangeCallError> {
        let ack = OrderAck { order_id: self.next_order_id(), symbol: symbol.to_string(), side, price: None, quantity };
        self.state.lock().await.orders.insert(ack.order_id.clone(), ack.clone());
        info!("simulated market order placed: {} {} {}", symbol, side_label(side), quantity);
        Ok(ack)
    }

    async fn cancel_order(&self, _symbol: &str, order_id: &str) -> Result<(), ExchangeCallError> {
        let mut state = self.state.lock().await;
        if state.orders.remove(order_id).is_none() {
            return Err(ExchangeCallError::UnknownOrder(order_id.to_string()));
        }
        Ok(())
    }

    async fn cancel_orders(&self, symbol: &str, order_ids: &[String]) -> Vec<Result<(), ExchangeCallError>> {
        let mut results = Vec::with_capacity(order_ids.len());
        for id in order_ids {
            results.push(self.cancel_order(symbol, id).await);
        }
        results
    }

    async fn get_positions(&self, symbol: &str) -> Result<Vec<PositionSnapshot>, ExchangeCallError> {
        let state = self.state.lock().await;
        Ok(state.positions.get(symbol).cloned().into_iter().collect())
    }

    async fn get_orderbook(&self, _symbol: &str, _depth: usize) -> Result<OrderBook, ExchangeCallError> {
        Ok(OrderBook::default())
    }

    async fn get_orders(&self, symbol: &str) -> Result<Vec<OrderAck>, ExchangeCallError> {
        let state = self.state.lock().await;
        Ok(state.orders.values().filter(|o| o.symbol == symbol).cloned().collect())
    }
}

fn side_label(side: OrderSideApi) -> &'static str {
    match side {
        OrderSideApi::Buy => "BUY",
        OrderSideApi::Sell => "SELL",
    }
}

pub type SharedExchangeClient = Arc<dyn ExchangeClient>;

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn simulated_client_places_and_cancels_orders() {
        let client = SimulatedExchangeClient::new();
        let ack = client.create_limit_order("PERP_BTC_USDC", OrderSideApi::Buy, dec!(42000), dec!(1.0)).await.unwrap();
        assert_eq!(client.get_orders("PERP_BTC_USDC").await.unwrap().len(), 1);
        client.cancel_order("PERP_BTC_USDC", &ack.order_id).await.unwrap();
        assert_eq!(client.get_orders("PERP_BTC_USDC").await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn cancel_unknown_order_errors() {
        let client = SimulatedExchangeClient::new();
        let err = client.cancel_order("PERP_BTC_USDC", "nope").await.unwrap_err();
        assert!(matches!(err, ExchangeCallError::UnknownOrder(_)));
    }

    #[tokio::test]
    async fn retry_handler_retries_transient_errors_then_succeeds() {
        let retry = RetryHandler::new(3, Duration::from_millis(1), Duration::from_millis(5));
        let attempts = std::sync::atomic::AtomicU32::new(0);
        let result = retry
            .run("test_op", || async {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(ExchangeCallError::Network("boom".into()))
                } else {
                    Ok(42)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_handler_does_not_retry_rejected() {
        let retry = RetryHandler::default();
        let attempts = std::sync::atomic::AtomicU32::new(0);
        let result: Result<(), ExchangeCallError> = retry
            .run("test_op", || async {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(ExchangeCallError::Rejected("bad price".into()))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}

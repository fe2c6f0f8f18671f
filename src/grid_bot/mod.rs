//! ═══════════════════════════════════════════════════════════════════════════
//! 🤖 GRID TRADING BOT — the orchestrator
//!
//! Owns one exchange client, one `GridSignalGenerator`, one `OrderTracker`,
//! one `ProfitTracker`, one `SessionEventQueue`, and one `WebSocketSupervisor`
//! per session. Every signal the generator emits is dispatched here into an
//! exchange call; every fill that comes back in is fed back into the
//! generator. Nothing outside this module touches the exchange directly.
//! ═══════════════════════════════════════════════════════════════════════════

use crate::error::GridError;
use crate::exchange::{ExchangeCallError, ExchangeClient, OrderSideApi};
use crate::grid::{Direction, FillEvent, GridConfig, GridSignalGenerator, SignalType, TradingSignal};
use crate::market::{GridConfigBounds, MarketValidator};
use crate::order_tracker::OrderTracker;
use crate::persistence::{GridSummary, SummarySink};
use crate::profit_tracker::ProfitTracker;
use crate::session_queue::{EventHandler, SessionEvent, SessionEventQueue};
use crate::types::{OrderType, PriceKey, Side};
use crate::ws_supervisor::WebSocketSupervisor;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

const PENDING_ORDER_TTL: Duration = Duration::from_secs(5);
const FUZZY_PRICE_EPSILON: Decimal = dec!(0.00000001);
const STOP_STEP_TIMEOUT: Duration = Duration::from_secs(2);
const MAX_RESTORATIONS_PER_HOUR: u32 = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
enum GridOrderSlot {
    Pending,
    Active(String),
}

struct OrdersState {
    active_orders: HashSet<String>,
    grid_orders: HashMap<PriceKey, GridOrderSlot>,
    pending: HashMap<PriceKey, Instant>,
}

impl OrdersState {
    fn new() -> Self {
        Self { active_orders: HashSet::new(), grid_orders: HashMap::new(), pending: HashMap::new() }
    }

    /// §4.7's three-part duplicate check: a fresh pending registration, an
    /// active order at the exact key, or a fuzzy match within 1e-8 on price.
    fn is_duplicate(&self, key: &PriceKey, price: Decimal) -> bool {
        if let Some(registered_at) = self.pending.get(key) {
            if registered_at.elapsed() < PENDING_ORDER_TTL {
                return true;
            }
        }

        if let Some(GridOrderSlot::Active(order_id)) = self.grid_orders.get(key) {
            if self.active_orders.contains(order_id) {
                return true;
            }
        }

        self.grid_orders.iter().any(|(existing_key, slot)| {
            existing_key.side() == key.side()
                && matches!(slot, GridOrderSlot::Active(id) if self.active_orders.contains(id))
                && (existing_key.price() - price).abs() <= FUZZY_PRICE_EPSILON
        })
    }
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct BotStats {
    pub orders_created: u64,
    pub orders_filled: u64,
    pub orders_cancelled: u64,
    pub orders_rejected: u64,
    pub restorations: u32,
}

/// Cancellation reasons eligible for automatic re-placement at the same price.
fn is_user_cancelled(reason: &str) -> bool {
    matches!(reason, "USER_CANCELLED" | "ADMIN_CANCELLED" | "MANUAL_CANCEL")
}

fn to_api_side(side: Side) -> OrderSideApi {
    match side {
        Side::Buy => OrderSideApi::Buy,
        Side::Sell => OrderSideApi::Sell,
    }
}

/// One per grid-trading session. `orders_lock` (the `Mutex<OrdersState>`)
/// must never be held across an exchange call: snapshot/mutate, release,
/// call the network, then reacquire to commit the result.
pub struct GridTradingBot {
    session_id: String,
    symbol: String,
    market: Arc<MarketValidator>,
    client: Arc<dyn ExchangeClient>,
    sink: Arc<dyn SummarySink>,
    generator: Mutex<GridSignalGenerator>,
    tracker: Mutex<OrderTracker>,
    profit: Mutex<ProfitTracker>,
    orders: Mutex<OrdersState>,
    queue: Arc<SessionEventQueue>,
    ws: Arc<WebSocketSupervisor>,
    running: AtomicBool,
    start_time: DateTime<Utc>,
    stats: Mutex<BotStats>,
    restorations_this_hour: Mutex<(u32, Instant)>,
}

impl GridTradingBot {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session_id: impl Into<String>,
        grid_config: GridConfig,
        market: Arc<MarketValidator>,
        client: Arc<dyn ExchangeClient>,
        sink: Arc<dyn SummarySink>,
    ) -> Result<Self> {
        let session_id = session_id.into();
        let symbol = grid_config.symbol.clone();

        market
            .validate_config(
                &symbol,
                GridConfigBounds {
                    lower: grid_config.lower,
                    current: grid_config.current,
                    upper: grid_config.upper,
                    grid_levels: grid_config.grid_levels,
                    total_margin: grid_config.total_margin,
                    min_margin: dec!(10),
                },
            )
            .context("grid configuration failed market validation")?;

        let generator = GridSignalGenerator::new(grid_config).context("failed to build grid signal generator")?;
        let queue = Arc::new(SessionEventQueue::new());

        Ok(Self {
            ws: Arc::new(WebSocketSupervisor::new(session_id.clone(), queue.clone())),
            queue,
            session_id,
            symbol,
            market,
            client,
            sink,
            generator: Mutex::new(generator),
            tracker: Mutex::new(OrderTracker::new()),
            profit: Mutex::new(ProfitTracker::new(dec!(0))),
            orders: Mutex::new(OrdersState::new()),
            running: AtomicBool::new(false),
            start_time: Utc::now(),
            stats: Mutex::new(BotStats::default()),
            restorations_this_hour: Mutex::new((0, Instant::now())),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub async fn stats(&self) -> BotStats {
        self.stats.lock().await.clone()
    }

    /// Builds the initial grid and places every resulting signal.
    pub async fn start_grid_trading(&self) -> Result<()> {
        if self.is_running() {
            bail!("session {} already running", self.session_id);
        }
        self.running.store(true, Ordering::SeqCst);
        info!("starting grid trading for {} (session {})", self.symbol, self.session_id);

        let mut signals = Vec::new();
        self.generator.lock().await.setup_initial_grid(|s| signals.push(s));

        for signal in signals {
            if let Err(e) = self.dispatch_signal(signal).await {
                warn!("failed to dispatch initial grid signal: {:#}", e);
            }
        }

        Ok(())
    }

    /// Core order-creation contract. Never holds `orders_lock` across the
    /// exchange call: register pending, release, call out, reacquire to commit.
    async fn create_grid_order(&self, price: Decimal, side: Side, qty: Decimal) -> Result<(), GridError> {
        let key = PriceKey::new(price, side);

        {
            let mut orders = self.orders.lock().await;
            if orders.is_duplicate(&key, price) {
                return Err(GridError::DuplicateOrder { price: price.to_string(), side: side.to_string() });
            }
            orders.pending.insert(key.clone(), Instant::now());
        }

        let market = match self.market.get_market(&self.symbol) {
            Some(m) => m,
            None => {
                self.orders.lock().await.pending.remove(&key);
                return Err(GridError::Market(crate::error::MarketError::UnsupportedSymbol(self.symbol.clone())));
            }
        };
        let norm_price = self.market.normalize_price(price, market);
        let norm_qty = self.market.normalize_quantity(qty, market);

        let result = self.client.create_limit_order(&self.symbol, to_api_side(side), norm_price, norm_qty).await;

        let mut orders = self.orders.lock().await;
        orders.pending.remove(&key);

        match result {
            Ok(ack) => {
                orders.active_orders.insert(ack.order_id.clone());
                orders.grid_orders.insert(key, GridOrderSlot::Active(ack.order_id.clone()));
                drop(orders);

                self.tracker.lock().await.add_order(ack.order_id.clone(), &self.symbol, side, OrderType::Limit, norm_price, norm_qty);
                self.stats.lock().await.orders_created += 1;
                debug!("grid order placed: {} {} {} @ {}", ack.order_id, side, norm_qty, norm_price);
                Ok(())
            }
            Err(e) => {
                drop(orders);
                self.stats.lock().await.orders_rejected += 1;
                warn!("grid order rejected at {} {}: {}", side, price, e);
                Err(GridError::GridInactive { reason: e.to_string() })
            }
        }
    }

    async fn create_market_order(&self, side: Side, qty: Decimal) -> Result<(), ExchangeCallError> {
        let ack = self.client.create_market_order(&self.symbol, to_api_side(side), qty).await?;
        self.tracker.lock().await.add_order(ack.order_id.clone(), &self.symbol, side, OrderType::Market, Decimal::ZERO, qty);
        self.orders.lock().await.active_orders.insert(ack.order_id);
        Ok(())
    }

    /// Fill-gating contract. Safety checks, then double dedup (WS-layer +
    /// OrderTracker), then FIFO accounting, then — only on a full fill —
    /// feeds the event back to the signal generator.
    pub async fn handle_order_filled(&self, symbol: &str, order_id: &str, fill_id: &str, price: Decimal, qty: Decimal, side: Side, ts: DateTime<Utc>) {
        if symbol != self.symbol {
            warn!("fill for foreign symbol {} ignored by session for {}", symbol, self.symbol);
            return;
        }

        {
            let orders = self.orders.lock().await;
            if !orders.active_orders.contains(order_id) {
                warn!("fill for order {} not in active_orders; dropping", order_id);
                return;
            }
        }

        if !self.ws.accept_fill(fill_id).await {
            debug!("duplicate fill {} suppressed", fill_id);
            return;
        }

        let applied = self.tracker.lock().await.add_fill(order_id, fill_id, price, qty, side, ts);
        if !applied {
            debug!("fill_id {} already applied; dropping", fill_id);
            return;
        }

        self.profit.lock().await.add_trade(side, price, qty, ts, None);

        let is_full = self.tracker.lock().await.get(order_id).map(|o| o.is_fully_filled()).unwrap_or(false);

        if !is_full {
            debug!("partial fill recorded for order {}", order_id);
            return;
        }

        {
            let mut orders = self.orders.lock().await;
            orders.active_orders.remove(order_id);
            orders.grid_orders.retain(|_, slot| !matches!(slot, GridOrderSlot::Active(id) if id == order_id));
        }
        self.stats.lock().await.orders_filled += 1;

        let mut signals = Vec::new();
        self.generator.lock().await.on_order_filled(FillEvent { price }, |s| signals.push(s));

        for signal in signals {
            if let Err(e) = self.dispatch_signal(signal).await {
                warn!("failed to dispatch counter signal: {:#}", e);
            }
        }
    }

    async fn dispatch_signal(&self, signal: TradingSignal) -> Result<()> {
        match signal.signal_type {
            SignalType::Initial | SignalType::Counter => self
                .create_grid_order(signal.price, signal.side, signal.size)
                .await
                .map_err(anyhow::Error::from),
            SignalType::MarketOpen => self.create_market_order(signal.side, signal.size).await.map_err(anyhow::Error::from),
            SignalType::CancelAll => self.cancel_all_grid_orders("signal_cancel_all").await,
            SignalType::Stop => self.stop_grid_trading("grid_signal_stop").await,
        }
    }

    /// Cancels every tracked grid order for this symbol. Market-type entries
    /// are just dropped from tracking; limit orders get a real cancel call.
    /// Failed cancels are retained in the active set, per §4.7.
    pub async fn cancel_all_grid_orders(&self, reason: &str) -> Result<()> {
        let order_ids: Vec<String> = {
            let orders = self.orders.lock().await;
            orders.active_orders.iter().cloned().collect()
        };

        if order_ids.is_empty() {
            return Ok(());
        }

        info!("cancelling {} grid orders for {} ({})", order_ids.len(), self.symbol, reason);
        let results = self.client.cancel_orders(&self.symbol, &order_ids).await;

        let mut orders = self.orders.lock().await;
        let mut tracker = self.tracker.lock().await;
        let mut cancelled = 0u64;

        for (order_id, result) in order_ids.into_iter().zip(results) {
            match result {
                Ok(()) => {
                    orders.active_orders.remove(&order_id);
                    orders.grid_orders.retain(|_, slot| !matches!(slot, GridOrderSlot::Active(id) if *id == order_id));
                    tracker.mark_cancelled(&order_id);
                    cancelled += 1;
                }
                Err(e) => {
                    warn!("cancel failed for order {}: {} — retained in active set", order_id, e);
                }
            }
        }
        drop(orders);
        drop(tracker);
        self.stats.lock().await.orders_cancelled += cancelled;
        Ok(())
    }

    /// Re-places an equivalent order after a whitelisted cancellation reason,
    /// subject to a max-restorations-per-hour rate limit. Not fatal on failure.
    pub async fn recover_cancelled_order(&self, price: Decimal, side: Side, qty: Decimal, reason: &str) {
        if !is_user_cancelled(reason) {
            return;
        }

        {
            let mut window = self.restorations_this_hour.lock().await;
            if window.1.elapsed() > Duration::from_secs(3600) {
                *window = (0, Instant::now());
            }
            if window.0 >= MAX_RESTORATIONS_PER_HOUR {
                warn!("restoration rate limit reached ({}/hr); not re-placing order at {}", MAX_RESTORATIONS_PER_HOUR, price);
                return;
            }
            window.0 += 1;
        }

        match self.create_grid_order(price, side, qty).await {
            Ok(()) => {
                self.stats.lock().await.restorations += 1;
                info!("restored cancelled order at {} {}", side, price);
            }
            Err(e) => warn!("failed to restore cancelled order at {} {}: {}", side, price, e),
        }
    }

    /// Non-best-effort stop: each step gets a bounded timeout and failures
    /// are logged, never abort the remaining steps. Emits exactly one
    /// `GridSummary` as the final step.
    pub async fn stop_grid_trading(&self, reason: &str) -> Result<()> {
        if !self.is_running() {
            return Ok(());
        }
        self.running.store(false, Ordering::SeqCst);
        info!("stopping grid trading for session {} ({})", self.session_id, reason);

        if let Err(e) = tokio::time::timeout(STOP_STEP_TIMEOUT, self.cancel_all_grid_orders("session_stop")).await {
            error!("cancel-all step timed out during stop: {}", e);
        }

        let residual_qty: Decimal = self.profit.lock().await.get_current_positions().iter().map(|(_, q, _)| *q).sum();
        if residual_qty > Decimal::ZERO {
            let close = tokio::time::timeout(STOP_STEP_TIMEOUT, self.create_market_order(Side::Sell, residual_qty)).await;
            match close {
                Ok(Ok(())) => info!("closed residual position of {}", residual_qty),
                Ok(Err(e)) => error!("failed to close residual position: {}", e),
                Err(e) => error!("residual-position close timed out: {}", e),
            }
        }

        self.emit_summary(reason).await;
        Ok(())
    }

    async fn emit_summary(&self, reason: &str) {
        let current_price = self.generator.lock().await.levels().first().map(|l| l.price).unwrap_or(Decimal::ZERO);
        let summary_data = self.profit.lock().await.get_summary(current_price);
        let end_time = Utc::now();

        let summary = GridSummary {
            session_id: self.session_id.clone(),
            symbol: self.symbol.clone(),
            start_time: self.start_time,
            end_time,
            duration_secs: (end_time - self.start_time).num_seconds(),
            total_profit: summary_data.total_profit,
            grid_profit: summary_data.grid_profit,
            unpaired_profit: summary_data.unpaired_profit,
            arbitrage_count: summary_data.arbitrage_count,
            stop_reason: reason.to_string(),
        };

        if let Err(e) = tokio::time::timeout(STOP_STEP_TIMEOUT, async {
            self.sink.save_grid_summary(&summary).await;
        })
        .await
        {
            error!("summary persistence timed out: {}", e);
        }
    }

    pub async fn restart_grid(&self) {
        let mut signals = Vec::new();
        self.generator.lock().await.restart_grid(|s| signals.push(s));
        for signal in signals {
            if let Err(e) = self.dispatch_signal(signal).await {
                warn!("failed to dispatch signal during grid restart: {:#}", e);
            }
        }
    }

    pub fn display_status(&self) {
        println!("═══ Grid Bot Status [{}] ═══", self.session_id);
        println!("  Symbol:   {}", self.symbol);
        println!("  Running:  {}", self.is_running());
    }

    /// The session's single event queue. WS I/O-thread callbacks only ever
    /// see a [`crate::ws_supervisor::WsCallbackHandle`] onto this same queue
    /// (see [`Self::ws_supervisor`]) — they can enqueue events but never call
    /// back into the bot directly.
    pub fn event_queue(&self) -> Arc<SessionEventQueue> {
        self.queue.clone()
    }

    pub fn ws_supervisor(&self) -> Arc<WebSocketSupervisor> {
        self.ws.clone()
    }

    /// Drives the session's event queue until a `Stop` event is processed.
    /// This is the single-consumer loop described in §4.5/§5: every signal,
    /// fill, and cancellation for this session passes through here serialized.
    pub async fn run(self: Arc<Self>) {
        let queue = self.queue.clone();
        queue.run_worker(self as Arc<dyn EventHandler>).await;
    }
}

#[async_trait]
impl EventHandler for GridTradingBot {
    async fn handle(&self, event: SessionEvent) -> Result<()> {
        match event {
            SessionEvent::Signal(signal) => self.dispatch_signal(signal).await,
            SessionEvent::OrderFilled { order_id, fill_id, price, quantity, side, timestamp } => {
                let symbol = self.symbol.clone();
                self.handle_order_filled(&symbol, &order_id, &fill_id, price, quantity, side, timestamp).await;
                Ok(())
            }
            SessionEvent::OrderCancellation { order_id, reason } => {
                let record = self.tracker.lock().await.get(&order_id).cloned();
                if let Some(record) = record {
                    self.recover_cancelled_order(record.original_price, record.side, record.original_quantity, &reason).await;
                } else {
                    warn!("cancellation for unknown order {} ignored", order_id);
                }
                Ok(())
            }
            SessionEvent::Stop => self.stop_grid_trading("queue_stop_event").await,
        }
    }
}

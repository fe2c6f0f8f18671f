//! ═══════════════════════════════════════════════════════════════════════════
//! 🛡️ RISK CONTROLLER — per-follower trade validation and exposure tracking
//!
//! Holds risk limits, daily stats, and a per-symbol position map behind a
//! single async mutex. Validation never touches the network; it only
//! computes a `ValidationResult` the caller acts on.
//! ═══════════════════════════════════════════════════════════════════════════

use crate::leader_monitor::{LeaderTradeAction, LeaderTradeEvent};
use crate::types::Side;
use chrono::{NaiveDate, Utc};
use log::{info, warn};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskLimits {
    pub max_per_trade_amount: Decimal,
    pub daily_max_loss: Decimal,
    pub max_position_count: usize,
    pub max_position_value: Decimal,
    /// Must be in (0, 1].
    pub max_single_position_ratio: Decimal,
}

impl RiskLimits {
    pub fn validate(&self) -> Result<(), crate::error::RiskError> {
        if self.max_single_position_ratio <= Decimal::ZERO || self.max_single_position_ratio > Decimal::ONE {
            return Err(crate::error::RiskError::InvalidLimits(
                "max_single_position_ratio must be in (0, 1]".into(),
            ));
        }
        if self.max_position_count == 0 {
            return Err(crate::error::RiskError::InvalidLimits("max_position_count must be > 0".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionInfo {
    pub symbol: String,
    pub quantity: Decimal,
    pub value: Decimal,
    pub side: Side,
    pub entry_price: Decimal,
    pub unrealized_pnl: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeLogEntry {
    pub symbol: String,
    pub quantity: Decimal,
    pub pnl: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyStats {
    pub date: NaiveDate,
    pub trades_count: u64,
    pub total_loss: Decimal,
    pub total_profit: Decimal,
    pub trade_log: Vec<TradeLogEntry>,
}

impl DailyStats {
    fn new_for(date: NaiveDate) -> Self {
        Self {
            date,
            trades_count: 0,
            total_loss: Decimal::ZERO,
            total_profit: Decimal::ZERO,
            trade_log: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub reason: Option<String>,
    pub adjusted_qty: Option<Decimal>,
    pub risk_score: f64,
}

impl ValidationResult {
    /// Full rejections report their risk_score uncapped — 100.0 marks an
    /// outright block, distinct from the ≤99 scores a soft-limit adjustment
    /// can produce (see `accepted`).
    fn rejected(reason: impl Into<String>, risk_score: f64) -> Self {
        Self {
            is_valid: false,
            reason: Some(reason.into()),
            adjusted_qty: None,
            risk_score,
        }
    }

    fn accepted(adjusted_qty: Option<Decimal>, risk_score: f64) -> Self {
        Self {
            is_valid: true,
            reason: None,
            adjusted_qty,
            risk_score: risk_score.min(99.0),
        }
    }
}

struct RiskState {
    limits: RiskLimits,
    daily: DailyStats,
    positions: HashMap<String, PositionInfo>,
}

/// Per-follower risk gate. All mutable state lives behind one lock; the
/// release-before-IO discipline is the caller's responsibility (this type
/// does no I/O itself).
pub struct RiskController {
    follower_id: String,
    state: Mutex<RiskState>,
}

impl RiskController {
    pub fn new(follower_id: impl Into<String>, limits: RiskLimits) -> Self {
        Self {
            follower_id: follower_id.into(),
            state: Mutex::new(RiskState {
                limits,
                daily: DailyStats::new_for(Utc::now().date_naive()),
                positions: HashMap::new(),
            }),
        }
    }

    async fn maybe_reset_daily(&self, state: &mut RiskState) {
        let today = Utc::now().date_naive();
        if state.daily.date != today {
            info!(
                "follower {} daily stats reset for {} (prior loss={}, profit={})",
                self.follower_id, today, state.daily.total_loss, state.daily.total_profit
            );
            state.daily = DailyStats::new_for(today);
        }
    }

    /// Validates a proposed copy trade against risk limits, adjusting
    /// quantity down where a soft limit is exceeded and rejecting outright
    /// when adjustment would leave too little of the original trade.
    pub async fn validate_trade(
        &self,
        event: &LeaderTradeEvent,
        copy_ratio: Decimal,
        current_price: Option<Decimal>,
    ) -> ValidationResult {
        let mut state = self.state.lock().await;
        self.maybe_reset_daily(&mut state).await;

        let price = current_price.unwrap_or(event.price);
        let mut adjusted_qty = event.quantity * copy_ratio;
        let original_qty = adjusted_qty;
        let mut risk_score = 0.0f64;

        let mut trade_value = adjusted_qty * price;
        if trade_value > state.limits.max_per_trade_amount {
            let candidate = state.limits.max_per_trade_amount / price;
            if candidate < original_qty * dec!(0.1) {
                return ValidationResult::rejected("exceeds per-trade limit (超過單筆限制)", 100.0);
            }
            adjusted_qty = candidate;
            trade_value = adjusted_qty * price;
            risk_score += 30.0;
        }

        if state.daily.total_loss >= state.limits.daily_max_loss {
            return ValidationResult::rejected("daily max loss reached", 100.0);
        }

        let loss_remaining = state.limits.daily_max_loss - state.daily.total_loss;
        if loss_remaining < state.limits.daily_max_loss * dec!(0.2) {
            risk_score += 40.0;
        }

        if matches!(event.action, LeaderTradeAction::Open | LeaderTradeAction::Add) {
            let has_symbol = state.positions.contains_key(&event.symbol);
            if state.positions.len() >= state.limits.max_position_count && !has_symbol {
                return ValidationResult::rejected("max position count reached", 100.0);
            }
            if state.positions.len() as f64 >= state.limits.max_position_count as f64 * 0.8 {
                risk_score += 20.0;
            }

            let current_total_value: Decimal = state.positions.values().map(|p| p.value).sum();
            if current_total_value + adjusted_qty * price > state.limits.max_position_value {
                let room = state.limits.max_position_value - current_total_value;
                if room <= Decimal::ZERO {
                    return ValidationResult::rejected("max position value reached", 100.0);
                }
                adjusted_qty = room / price;
                risk_score += 25.0;
            }

            let existing_symbol_value = state.positions.get(&event.symbol).map(|p| p.value).unwrap_or(Decimal::ZERO);
            let new_symbol_value = existing_symbol_value + adjusted_qty * price;
            let new_total = current_total_value + adjusted_qty * price;
            if !new_total.is_zero() && new_symbol_value / new_total > state.limits.max_single_position_ratio {
                let max_symbol_value = new_total * state.limits.max_single_position_ratio;
                let allowed_add = max_symbol_value - existing_symbol_value;
                if allowed_add <= Decimal::ZERO {
                    return ValidationResult::rejected("exceeds single-position concentration ratio", 100.0);
                }
                adjusted_qty = allowed_add / price;
                risk_score += 15.0;
            }
        }

        let adjusted = if adjusted_qty != original_qty { Some(adjusted_qty) } else { None };
        ValidationResult::accepted(adjusted, risk_score)
    }

    /// Records the realized outcome of an executed copy trade.
    pub async fn record_trade_result(
        &self,
        symbol: &str,
        qty: Decimal,
        price: Decimal,
        side: Side,
        action: LeaderTradeAction,
        pnl: Option<Decimal>,
    ) {
        let mut state = self.state.lock().await;
        self.maybe_reset_daily(&mut state).await;

        match action {
            LeaderTradeAction::Open => {
                state.positions.insert(
                    symbol.to_string(),
                    PositionInfo {
                        symbol: symbol.to_string(),
                        quantity: qty,
                        value: qty * price,
                        side,
                        entry_price: price,
                        unrealized_pnl: Decimal::ZERO,
                    },
                );
            }
            LeaderTradeAction::Add => {
                if let Some(existing) = state.positions.get_mut(symbol) {
                    let total_qty = existing.quantity + qty;
                    if !total_qty.is_zero() {
                        existing.entry_price =
                            (existing.entry_price * existing.quantity + price * qty) / total_qty;
                    }
                    existing.quantity = total_qty;
                    existing.value = total_qty * existing.entry_price;
                } else {
                    state.positions.insert(
                        symbol.to_string(),
                        PositionInfo {
                            symbol: symbol.to_string(),
                            quantity: qty,
                            value: qty * price,
                            side,
                            entry_price: price,
                            unrealized_pnl: Decimal::ZERO,
                        },
                    );
                }
            }
            LeaderTradeAction::Reduce => {
                if let Some(existing) = state.positions.get_mut(symbol) {
                    existing.quantity -= qty;
                    existing.value = existing.quantity * existing.entry_price;
                    if existing.quantity <= Decimal::ZERO {
                        state.positions.remove(symbol);
                    }
                }
            }
            LeaderTradeAction::Close => {
                state.positions.remove(symbol);
            }
        }

        state.daily.trades_count += 1;
        if let Some(pnl) = pnl {
            if pnl < Decimal::ZERO {
                state.daily.total_loss += pnl.abs();
            } else if pnl > Decimal::ZERO {
                state.daily.total_profit += pnl;
            }
            state.daily.trade_log.push(TradeLogEntry { symbol: symbol.to_string(), quantity: qty, pnl });
        }

        let total_value: Decimal = state.positions.values().map(|p| p.value).sum();
        if total_value > state.limits.max_position_value {
            warn!(
                "follower {} positions value {} exceeds limit {} after recording trade",
                self.follower_id, total_value, state.limits.max_position_value
            );
        }
    }

    pub async fn daily_stats(&self) -> DailyStats {
        self.state.lock().await.daily.clone()
    }

    pub async fn positions(&self) -> Vec<PositionInfo> {
        self.state.lock().await.positions.values().cloned().collect()
    }

    /// Background task: sleeps until next UTC midnight, resets daily stats,
    /// repeats. Exits cleanly on cancellation (dropping the returned future).
    pub async fn run_daily_reset_loop(controller: std::sync::Arc<Self>) {
        loop {
            let now = Utc::now();
            let tomorrow = now.date_naive().succ_opt().unwrap_or(now.date_naive());
            let midnight = tomorrow.and_hms_opt(0, 0, 0).unwrap().and_utc();
            let sleep_for = (midnight - now).to_std().unwrap_or(std::time::Duration::from_secs(86_400));
            tokio::time::sleep(sleep_for).await;
            let mut state = controller.state.lock().await;
            controller.maybe_reset_daily(&mut state).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::leader_monitor::{LeaderOrderType, LeaderTradeEvent};
    use chrono::Utc;

    fn event(qty: Decimal, price: Decimal) -> LeaderTradeEvent {
        LeaderTradeEvent {
            leader_id: "leader1".into(),
            order_id: "1".into(),
            symbol: "PERP_BTC_USDC".into(),
            side: Side::Buy,
            order_type: LeaderOrderType::Market,
            price,
            quantity: qty,
            action: LeaderTradeAction::Open,
            timestamp: Utc::now(),
            raw_payload: serde_json::json!({}),
        }
    }

    fn limits() -> RiskLimits {
        RiskLimits {
            max_per_trade_amount: dec!(1000),
            daily_max_loss: dec!(500),
            max_position_count: 5,
            max_position_value: dec!(100000),
            max_single_position_ratio: dec!(0.5),
        }
    }

    #[tokio::test]
    async fn oversized_trade_is_rejected() {
        let controller = RiskController::new("f1", limits());
        let result = controller.validate_trade(&event(dec!(1.0), dec!(50000)), dec!(1.0), None).await;
        assert!(!result.is_valid);
        assert_eq!(result.risk_score, 100.0);
        assert!(result.reason.unwrap().contains("超過單筆限制"));
    }

    #[tokio::test]
    async fn small_overage_is_adjusted_not_rejected() {
        let controller = RiskController::new("f1", limits());
        // trade_value = 1100, adjusted = 1000/11 ~= 0.909 which is > 10% of original 1.0
        let result = controller.validate_trade(&event(dec!(1.0), dec!(1100)), dec!(1.0), None).await;
        assert!(result.is_valid);
        assert!(result.adjusted_qty.is_some());
    }

    #[tokio::test]
    async fn daily_loss_limit_blocks_trades() {
        let controller = RiskController::new("f1", limits());
        controller
            .record_trade_result("PERP_BTC_USDC", dec!(1), dec!(100), Side::Buy, LeaderTradeAction::Open, Some(dec!(-500)))
            .await;
        let result = controller.validate_trade(&event(dec!(0.001), dec!(100)), dec!(1.0), None).await;
        assert!(!result.is_valid);
    }
}

//! ═══════════════════════════════════════════════════════════════════════════
//! 📒 ORDER TRACKER — per-session order-id → lifecycle record
//!
//! `add_fill` is the sole mutator for fill accounting. It is idempotent under
//! retry: a `fill_id` already seen anywhere in the session is rejected, even
//! if it targets a different order-id than where it was first applied.
//! ═══════════════════════════════════════════════════════════════════════════

use crate::types::{OrderType, Side};
use chrono::{DateTime, Utc};
use log::{debug, warn};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fill {
    pub fill_id: String,
    pub order_id: String,
    pub price: Decimal,
    pub quantity: Decimal,
    pub side: Side,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRecord {
    pub order_id: String,
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub original_price: Decimal,
    pub original_quantity: Decimal,
    pub status: OrderStatus,
    pub filled_quantity: Decimal,
    pub remaining_quantity: Decimal,
    pub average_fill_price: Decimal,
    pub fills: Vec<Fill>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set when this record was synthesized by `add_fill` against an unknown
    /// order-id rather than created through `add_order` (Invariant error kind).
    pub is_stub: bool,
}

impl OrderRecord {
    fn new(
        order_id: String,
        symbol: String,
        side: Side,
        order_type: OrderType,
        price: Decimal,
        quantity: Decimal,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            order_id,
            symbol,
            side,
            order_type,
            original_price: price,
            original_quantity: quantity,
            status: OrderStatus::Pending,
            filled_quantity: Decimal::ZERO,
            remaining_quantity: quantity,
            average_fill_price: Decimal::ZERO,
            fills: Vec::new(),
            created_at: now,
            updated_at: now,
            is_stub: false,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self.status, OrderStatus::Pending | OrderStatus::PartiallyFilled)
    }

    pub fn is_fully_filled(&self) -> bool {
        self.status == OrderStatus::Filled
    }

    pub fn fill_pct(&self) -> Decimal {
        if self.original_quantity.is_zero() {
            return Decimal::ZERO;
        }
        (self.filled_quantity / self.original_quantity) * Decimal::ONE_HUNDRED
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct OrderStatistics {
    pub total_orders: usize,
    pub active_orders: usize,
    pub filled_orders: usize,
    pub cancelled_orders: usize,
    pub total_fills: usize,
    pub fill_rate: f64,
}

/// Per-session registry. Fill idempotence is process-local to this tracker:
/// a `fill_id` once applied (to any order) can never be applied again.
#[derive(Debug, Default)]
pub struct OrderTracker {
    orders: HashMap<String, OrderRecord>,
    fill_id_set: HashSet<String>,
}

impl OrderTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_order(
        &mut self,
        order_id: impl Into<String>,
        symbol: impl Into<String>,
        side: Side,
        order_type: OrderType,
        price: Decimal,
        qty: Decimal,
    ) -> &OrderRecord {
        let order_id = order_id.into();
        let record = OrderRecord::new(order_id.clone(), symbol.into(), side, order_type, price, qty, Utc::now());
        self.orders.insert(order_id.clone(), record);
        self.orders.get(&order_id).expect("just inserted")
    }

    pub fn get(&self, order_id: &str) -> Option<&OrderRecord> {
        self.orders.get(order_id)
    }

    /// Applies a fill. Returns `false` (without mutating anything) if
    /// `fill_id` has already been applied anywhere in this session.
    ///
    /// If `order_id` is unknown, synthesizes a stub record (Invariant error
    /// kind: logged, not fatal) so the fill accounting has somewhere to land.
    pub fn add_fill(
        &mut self,
        order_id: &str,
        fill_id: impl Into<String>,
        price: Decimal,
        qty: Decimal,
        side: Side,
        ts: DateTime<Utc>,
    ) -> bool {
        let fill_id = fill_id.into();
        if self.fill_id_set.contains(&fill_id) {
            debug!("duplicate fill_id {} dropped for order {}", fill_id, order_id);
            return false;
        }

        if !self.orders.contains_key(order_id) {
            warn!(
                "add_fill against unknown order {} — synthesizing stub record",
                order_id
            );
            let mut stub = OrderRecord::new(
                order_id.to_string(),
                "UNKNOWN".to_string(),
                side,
                OrderType::Limit,
                price,
                qty,
                ts,
            );
            stub.is_stub = true;
            self.orders.insert(order_id.to_string(), stub);
        }

        let record = self.orders.get_mut(order_id).expect("inserted above if absent");

        record.fills.push(Fill {
            fill_id: fill_id.clone(),
            order_id: order_id.to_string(),
            price,
            quantity: qty,
            side,
            timestamp: ts,
        });
        self.fill_id_set.insert(fill_id);

        let filled: Decimal = record.fills.iter().map(|f| f.quantity).sum();
        let weighted: Decimal = record.fills.iter().map(|f| f.price * f.quantity).sum();

        record.filled_quantity = filled;
        record.remaining_quantity = (record.original_quantity - filled).max(Decimal::ZERO);
        record.average_fill_price = if filled.is_zero() { Decimal::ZERO } else { weighted / filled };
        record.updated_at = ts;

        record.status = if record.remaining_quantity.is_zero() {
            OrderStatus::Filled
        } else if !record.filled_quantity.is_zero() {
            OrderStatus::PartiallyFilled
        } else {
            record.status
        };

        true
    }

    pub fn mark_cancelled(&mut self, order_id: &str) {
        if let Some(record) = self.orders.get_mut(order_id) {
            record.status = OrderStatus::Cancelled;
            record.updated_at = Utc::now();
        }
    }

    pub fn mark_rejected(&mut self, order_id: &str) {
        if let Some(record) = self.orders.get_mut(order_id) {
            record.status = OrderStatus::Rejected;
            record.updated_at = Utc::now();
        }
    }

    /// Evicts a record and drops its fill_ids from the idempotence set.
    pub fn remove_order(&mut self, order_id: &str) -> Option<OrderRecord> {
        let record = self.orders.remove(order_id)?;
        for fill in &record.fills {
            self.fill_id_set.remove(&fill.fill_id);
        }
        Some(record)
    }

    pub fn active_order_ids(&self) -> Vec<String> {
        self.orders
            .values()
            .filter(|o| o.is_active())
            .map(|o| o.order_id.clone())
            .collect()
    }

    pub fn get_statistics(&self) -> OrderStatistics {
        let total_orders = self.orders.len();
        let active_orders = self.orders.values().filter(|o| o.is_active()).count();
        let filled_orders = self
            .orders
            .values()
            .filter(|o| o.status == OrderStatus::Filled)
            .count();
        let cancelled_orders = self
            .orders
            .values()
            .filter(|o| o.status == OrderStatus::Cancelled)
            .count();
        let total_fills: usize = self.orders.values().map(|o| o.fills.len()).sum();
        let fill_rate = if total_orders == 0 {
            0.0
        } else {
            filled_orders as f64 / total_orders as f64
        };

        OrderStatistics {
            total_orders,
            active_orders,
            filled_orders,
            cancelled_orders,
            total_fills,
            fill_rate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn tracker_with_order() -> OrderTracker {
        let mut tracker = OrderTracker::new();
        tracker.add_order("888888", "PERP_BTC_USDC", Side::Buy, OrderType::Limit, dec!(42500.50), dec!(1.0));
        tracker
    }

    #[test]
    fn duplicate_fill_id_is_rejected() {
        let mut tracker = tracker_with_order();
        let fill_id = "888888_42500.50_0.6_1".to_string();
        assert!(tracker.add_fill("888888", fill_id.clone(), dec!(42500.50), dec!(0.6), Side::Buy, Utc::now()));
        assert!(!tracker.add_fill("888888", fill_id, dec!(42500.50), dec!(0.6), Side::Buy, Utc::now()));

        let order = tracker.get("888888").unwrap();
        assert_eq!(order.fills.len(), 1);
        assert_eq!(order.fill_pct(), dec!(60.00));
        assert_eq!(order.remaining_quantity, dec!(0.4));
    }

    #[test]
    fn partial_then_full_fill_transitions_status() {
        let mut tracker = tracker_with_order();
        assert!(tracker.add_fill("888888", "f1", dec!(42500.50), dec!(0.4), Side::Buy, Utc::now()));
        assert_eq!(tracker.get("888888").unwrap().status, OrderStatus::PartiallyFilled);
        assert!(tracker.add_fill("888888", "f2", dec!(42500.50), dec!(0.4), Side::Buy, Utc::now()));
        assert_eq!(tracker.get("888888").unwrap().status, OrderStatus::PartiallyFilled);
        assert!(tracker.add_fill("888888", "f3", dec!(42500.50), dec!(0.2), Side::Buy, Utc::now()));
        let order = tracker.get("888888").unwrap();
        assert_eq!(order.status, OrderStatus::Filled);
        assert!(order.is_fully_filled());
        assert_eq!(order.remaining_quantity, Decimal::ZERO);
    }

    #[test]
    fn unknown_order_synthesizes_stub() {
        let mut tracker = OrderTracker::new();
        assert!(tracker.add_fill("ghost", "f1", dec!(100), dec!(1), Side::Sell, Utc::now()));
        let record = tracker.get("ghost").unwrap();
        assert!(record.is_stub);
        assert_eq!(record.symbol, "UNKNOWN");
    }

    #[test]
    fn remove_order_frees_its_fill_ids() {
        let mut tracker = tracker_with_order();
        tracker.add_fill("888888", "f1", dec!(42500.50), dec!(1.0), Side::Buy, Utc::now());
        tracker.remove_order("888888");
        // f1 can now be reused against a fresh order without being treated as a dup.
        tracker.add_order("999999", "PERP_BTC_USDC", Side::Buy, OrderType::Limit, dec!(42500.50), dec!(1.0));
        assert!(tracker.add_fill("999999", "f1", dec!(42500.50), dec!(1.0), Side::Buy, Utc::now()));
    }
}

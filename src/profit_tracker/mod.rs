//! ═══════════════════════════════════════════════════════════════════════════
//! 💰 PROFIT TRACKER — FIFO position matching, realized/unrealized PnL
//!
//! Buys push onto an open-position FIFO queue; sells walk the queue head-first,
//! matching proportionally and realizing PnL per match. `unrealized_pnl` is a
//! pure function of `(open_positions, current_price, fee_rate)` and carries no
//! memory between calls — it is recomputed on demand, never accumulated.
//! ═══════════════════════════════════════════════════════════════════════════

use crate::types::Side;
use chrono::{DateTime, Utc};
use log::debug;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub buy_price: Decimal,
    pub quantity: Decimal,
    pub buy_cost: Decimal,
    pub buy_ts: DateTime<Utc>,
    pub matched: bool,
    pub sell_price: Option<Decimal>,
    pub sell_ts: Option<DateTime<Utc>>,
    pub sell_revenue: Option<Decimal>,
    pub realized_pnl: Option<Decimal>,
}

impl Position {
    pub fn pnl_pct(&self) -> Option<Decimal> {
        self.realized_pnl.map(|pnl| {
            if self.buy_cost.is_zero() {
                Decimal::ZERO
            } else {
                pnl / self.buy_cost
            }
        })
    }
}

#[derive(Debug, Clone)]
struct OpenLot {
    buy_price: Decimal,
    quantity: Decimal,
    buy_cost: Decimal,
    buy_ts: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProfitSummary {
    pub grid_profit: Decimal,
    pub unpaired_profit: Decimal,
    pub total_profit: Decimal,
    pub unrealized_pnl: Decimal,
    pub arbitrage_count: u64,
    pub capital_utilization: Decimal,
    pub total_fees: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsSummary {
    pub open_position_count: usize,
    pub closed_position_count: usize,
    pub total_volume: Decimal,
    pub average_realized_pnl: Decimal,
}

/// FIFO matching ledger, one per session.
#[derive(Debug)]
pub struct ProfitTracker {
    fee_rate: Decimal,
    total_margin_allocated: Decimal,
    open_positions: VecDeque<OpenLot>,
    closed_positions: Vec<Position>,
    grid_profit: Decimal,
    total_fees: Decimal,
    funding_fees: Decimal,
    order_modification_pnl: Decimal,
    arbitrage_count: u64,
}

impl ProfitTracker {
    pub fn new(total_margin_allocated: Decimal) -> Self {
        Self::with_fee_rate(total_margin_allocated, dec!(0.001))
    }

    pub fn with_fee_rate(total_margin_allocated: Decimal, fee_rate: Decimal) -> Self {
        Self {
            fee_rate,
            total_margin_allocated,
            open_positions: VecDeque::new(),
            closed_positions: Vec::new(),
            grid_profit: Decimal::ZERO,
            total_fees: Decimal::ZERO,
            funding_fees: Decimal::ZERO,
            order_modification_pnl: Decimal::ZERO,
            arbitrage_count: 0,
        }
    }

    /// Records a trade; `fee` overrides the computed `notional * fee_rate` if supplied.
    pub fn add_trade(&mut self, side: Side, price: Decimal, qty: Decimal, ts: DateTime<Utc>, fee: Option<Decimal>) {
        let notional = price * qty;
        let fee = fee.unwrap_or(notional * self.fee_rate);
        self.total_fees += fee;

        match side {
            Side::Buy => {
                let buy_cost = notional + fee;
                self.open_positions.push_back(OpenLot {
                    buy_price: price,
                    quantity: qty,
                    buy_cost,
                    buy_ts: ts,
                });
            }
            Side::Sell => {
                let sell_revenue_total = notional - fee;
                let original_sell_qty = qty;
                let mut remaining = qty;

                while remaining > Decimal::ZERO {
                    let Some(head) = self.open_positions.front_mut() else {
                        debug!("sell exceeds open position size; {} unmatched remains", remaining);
                        break;
                    };

                    let matched_qty = remaining.min(head.quantity);
                    let matched_cost = head.buy_cost * matched_qty / head.quantity;
                    let matched_revenue = sell_revenue_total * matched_qty / original_sell_qty;
                    let realized_pnl = matched_revenue - matched_cost;

                    self.closed_positions.push(Position {
                        buy_price: head.buy_price,
                        quantity: matched_qty,
                        buy_cost: matched_cost,
                        buy_ts: head.buy_ts,
                        matched: true,
                        sell_price: Some(price),
                        sell_ts: Some(ts),
                        sell_revenue: Some(matched_revenue),
                        realized_pnl: Some(realized_pnl),
                    });

                    self.grid_profit += realized_pnl;
                    self.arbitrage_count += 1;

                    head.quantity -= matched_qty;
                    head.buy_cost -= matched_cost;
                    remaining -= matched_qty;

                    if head.quantity <= Decimal::ZERO {
                        self.open_positions.pop_front();
                    }
                }
            }
        }
    }

    pub fn add_funding_fee(&mut self, amount: Decimal) {
        self.funding_fees += amount;
    }

    pub fn add_order_modification_pnl(&mut self, amount: Decimal) {
        self.order_modification_pnl += amount;
    }

    /// Pure function of current open positions, `current_price`, and `fee_rate`.
    pub fn unrealized_pnl(&self, current_price: Decimal) -> Decimal {
        self.open_positions
            .iter()
            .map(|lot| lot.quantity * current_price * (Decimal::ONE - self.fee_rate) - lot.buy_cost)
            .sum()
    }

    pub fn unpaired_profit(&self, current_price: Decimal) -> Decimal {
        self.unrealized_pnl(current_price) - self.total_fees + self.funding_fees + self.order_modification_pnl
    }

    pub fn total_profit(&self, current_price: Decimal) -> Decimal {
        self.grid_profit + self.unpaired_profit(current_price)
    }

    pub fn capital_utilization(&self) -> Decimal {
        if self.total_margin_allocated.is_zero() {
            return Decimal::ZERO;
        }
        let open_cost: Decimal = self.open_positions.iter().map(|lot| lot.buy_cost).sum();
        open_cost / self.total_margin_allocated
    }

    pub fn grid_profit(&self) -> Decimal {
        self.grid_profit
    }

    pub fn arbitrage_count(&self) -> u64 {
        self.arbitrage_count
    }

    pub fn get_summary(&self, current_price: Decimal) -> ProfitSummary {
        ProfitSummary {
            grid_profit: self.grid_profit,
            unpaired_profit: self.unpaired_profit(current_price),
            total_profit: self.total_profit(current_price),
            unrealized_pnl: self.unrealized_pnl(current_price),
            arbitrage_count: self.arbitrage_count,
            capital_utilization: self.capital_utilization(),
            total_fees: self.total_fees,
        }
    }

    pub fn get_stats_summary(&self) -> StatsSummary {
        let total_volume: Decimal = self.closed_positions.iter().map(|p| p.quantity * p.buy_price).sum();
        let average_realized_pnl = if self.closed_positions.is_empty() {
            Decimal::ZERO
        } else {
            self.closed_positions.iter().filter_map(|p| p.realized_pnl).sum::<Decimal>()
                / Decimal::from(self.closed_positions.len())
        };

        StatsSummary {
            open_position_count: self.open_positions.len(),
            closed_position_count: self.closed_positions.len(),
            total_volume,
            average_realized_pnl,
        }
    }

    pub fn get_trade_history(&self, limit: Option<usize>) -> Vec<&Position> {
        let iter = self.closed_positions.iter().rev();
        match limit {
            Some(n) => iter.take(n).collect(),
            None => iter.collect(),
        }
    }

    pub fn get_closed_positions(&self, limit: Option<usize>) -> Vec<&Position> {
        self.get_trade_history(limit)
    }

    pub fn get_current_positions(&self) -> Vec<(Decimal, Decimal, DateTime<Utc>)> {
        self.open_positions
            .iter()
            .map(|lot| (lot.buy_price, lot.quantity, lot.buy_ts))
            .collect()
    }

    pub fn to_json(&self, current_price: Decimal) -> serde_json::Value {
        serde_json::json!({
            "summary": self.get_summary(current_price),
            "stats": self.get_stats_summary(),
            "open_positions": self.get_current_positions().iter().map(|(p, q, t)| {
                serde_json::json!({"buy_price": p.to_string(), "quantity": q.to_string(), "buy_ts": t})
            }).collect::<Vec<_>>(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn fifo_matching_consumes_oldest_buy_first() {
        let mut tracker = ProfitTracker::with_fee_rate(dec!(100000), Decimal::ZERO);
        let t0 = Utc::now();
        tracker.add_trade(Side::Buy, dec!(42500), dec!(0.001), t0, Some(Decimal::ZERO));
        tracker.add_trade(Side::Buy, dec!(42400), dec!(0.001), t0, Some(Decimal::ZERO));
        tracker.add_trade(Side::Buy, dec!(42300), dec!(0.001), t0, Some(Decimal::ZERO));
        tracker.add_trade(Side::Sell, dec!(42600), dec!(0.001), t0, Some(Decimal::ZERO));

        assert_eq!(tracker.closed_positions.len(), 1);
        assert_eq!(tracker.closed_positions[0].buy_price, dec!(42500));
        assert_eq!(tracker.open_positions.len(), 2);
        assert_eq!(tracker.open_positions[0].buy_price, dec!(42400));
        assert_eq!(tracker.open_positions[1].buy_price, dec!(42300));
        assert_eq!(tracker.arbitrage_count(), 1);
    }

    #[test]
    fn realized_pnl_is_revenue_minus_cost() {
        let mut tracker = ProfitTracker::with_fee_rate(dec!(100000), Decimal::ZERO);
        let t0 = Utc::now();
        tracker.add_trade(Side::Buy, dec!(100), dec!(1), t0, Some(Decimal::ZERO));
        tracker.add_trade(Side::Sell, dec!(110), dec!(1), t0, Some(Decimal::ZERO));
        assert_eq!(tracker.grid_profit(), dec!(10));
    }

    #[test]
    fn unrealized_pnl_has_no_memory() {
        let mut tracker = ProfitTracker::new(dec!(100000));
        let t0 = Utc::now();
        tracker.add_trade(Side::Buy, dec!(100), dec!(1), t0, Some(Decimal::ZERO));
        let a = tracker.unrealized_pnl(dec!(120));
        let b = tracker.unrealized_pnl(dec!(120));
        assert_eq!(a, b);
    }

    #[test]
    fn total_profit_equals_grid_plus_unpaired() {
        let mut tracker = ProfitTracker::new(dec!(100000));
        let t0 = Utc::now();
        tracker.add_trade(Side::Buy, dec!(100), dec!(1), t0, Some(Decimal::ZERO));
        tracker.add_trade(Side::Sell, dec!(110), dec!(1), t0, Some(Decimal::ZERO));
        let price = dec!(105);
        assert_eq!(tracker.total_profit(price), tracker.grid_profit() + tracker.unpaired_profit(price));
    }

    #[test]
    fn arbitrage_count_is_non_decreasing() {
        let mut tracker = ProfitTracker::new(dec!(100000));
        let t0 = Utc::now();
        let mut last = tracker.arbitrage_count();
        tracker.add_trade(Side::Buy, dec!(100), dec!(1), t0, Some(Decimal::ZERO));
        assert!(tracker.arbitrage_count() >= last);
        last = tracker.arbitrage_count();
        tracker.add_trade(Side::Sell, dec!(101), dec!(1), t0, Some(Decimal::ZERO));
        assert!(tracker.arbitrage_count() >= last);
    }
}

//! ═══════════════════════════════════════════════════════════════════════════
//! 📐 MARKET VALIDATOR — tick/step normalization and order sanity checks
//!
//! Stateless service over a static per-symbol `MarketInfo` table. Every price
//! and quantity that crosses into an exchange call passes through here first;
//! it is the single place `Decimal` values get floored to exchange precision.
//! ═══════════════════════════════════════════════════════════════════════════

use crate::error::MarketError;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Immutable, per-symbol exchange metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MarketInfo {
    pub symbol: String,
    pub tick_size: Decimal,
    pub step_size: Decimal,
    pub min_notional: Decimal,
    pub min_price: Option<Decimal>,
    pub max_price: Option<Decimal>,
    pub min_quantity: Option<Decimal>,
    pub max_quantity: Option<Decimal>,
}

impl MarketInfo {
    pub fn new(symbol: impl Into<String>, tick_size: Decimal, step_size: Decimal, min_notional: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            tick_size,
            step_size,
            min_notional,
            min_price: None,
            max_price: None,
            min_quantity: None,
            max_quantity: None,
        }
    }

    pub fn with_price_bounds(mut self, min: Decimal, max: Decimal) -> Self {
        self.min_price = Some(min);
        self.max_price = Some(max);
        self
    }

    pub fn with_quantity_bounds(mut self, min: Decimal, max: Decimal) -> Self {
        self.min_quantity = Some(min);
        self.max_quantity = Some(max);
        self
    }
}

/// Direction/grid-type facing config passed to `validate_config`.
#[derive(Debug, Clone, Copy)]
pub struct GridConfigBounds {
    pub lower: Decimal,
    pub current: Decimal,
    pub upper: Decimal,
    pub grid_levels: u32,
    pub total_margin: Decimal,
    pub min_margin: Decimal,
}

/// Floors `value` to the nearest multiple of `step` at or below it.
fn floor_to_step(value: Decimal, step: Decimal) -> Decimal {
    if step <= Decimal::ZERO {
        return value;
    }
    (value / step).floor() * step
}

fn clamp(value: Decimal, min: Option<Decimal>, max: Option<Decimal>) -> Decimal {
    let mut v = value;
    if let Some(min) = min {
        if v < min {
            v = min;
        }
    }
    if let Some(max) = max {
        if v > max {
            v = max;
        }
    }
    v
}

/// Normalizes one exchange symbol's loose ticker spelling (`BTCUSDT`,
/// `BTCUSDC`, `btc-usdc`, …) to the canonical `PERP_<BASE>_USDC` form that
/// keys the `MarketValidator` table.
pub fn symbol_alias(ticker: &str) -> String {
    let upper = ticker.to_uppercase().replace(['-', '/'], "");
    if upper.starts_with("PERP_") {
        return upper;
    }
    let base = upper
        .strip_suffix("USDC")
        .or_else(|| upper.strip_suffix("USDT"))
        .unwrap_or(upper.as_str());
    format!("PERP_{}_USDC", base)
}

/// Stateless validator over a symbol → `MarketInfo` table.
#[derive(Debug, Clone, Default)]
pub struct MarketValidator {
    table: HashMap<String, MarketInfo>,
}

impl MarketValidator {
    pub fn new() -> Self {
        Self { table: HashMap::new() }
    }

    pub fn with_market(mut self, info: MarketInfo) -> Self {
        self.table.insert(info.symbol.clone(), info);
        self
    }

    pub fn register(&mut self, info: MarketInfo) {
        self.table.insert(info.symbol.clone(), info);
    }

    pub fn get_market(&self, symbol: &str) -> Option<&MarketInfo> {
        self.table
            .get(symbol)
            .or_else(|| self.table.get(&symbol_alias(symbol)))
    }

    /// Floors `price` to `tick_size`, then clamps into `[min_price, max_price]`.
    pub fn normalize_price(&self, price: Decimal, market: &MarketInfo) -> Decimal {
        let stepped = floor_to_step(price, market.tick_size);
        clamp(stepped, market.min_price, market.max_price)
    }

    /// Floors `qty` to `step_size`, then clamps into `[min_quantity, max_quantity]`.
    pub fn normalize_quantity(&self, qty: Decimal, market: &MarketInfo) -> Decimal {
        let stepped = floor_to_step(qty, market.step_size);
        clamp(stepped, market.min_quantity, market.max_quantity)
    }

    /// Normalizes and checks min-notional for an order.
    pub fn validate_order(
        &self,
        symbol: &str,
        price: Decimal,
        qty: Decimal,
    ) -> Result<(Decimal, Decimal), MarketError> {
        let market = self
            .get_market(symbol)
            .ok_or_else(|| MarketError::UnsupportedSymbol(symbol.to_string()))?;

        let norm_price = self.normalize_price(price, market);
        let norm_qty = self.normalize_quantity(qty, market);
        let notional = norm_price * norm_qty;

        if notional < market.min_notional {
            return Err(MarketError::BelowMinNotional {
                symbol: symbol.to_string(),
                notional: notional.to_string(),
                min_notional: market.min_notional.to_string(),
            });
        }

        Ok((norm_price, norm_qty))
    }

    /// Validates a proposed grid's price corridor and capital allocation.
    pub fn validate_config(&self, symbol: &str, bounds: GridConfigBounds) -> Result<(), MarketError> {
        let market = self
            .get_market(symbol)
            .ok_or_else(|| MarketError::UnsupportedSymbol(symbol.to_string()))?;

        if !(bounds.lower < bounds.current && bounds.current < bounds.upper) {
            return Err(MarketError::InvalidGridConfig {
                reason: format!(
                    "corridor must satisfy lower < current < upper (got {} < {} < {})",
                    bounds.lower, bounds.current, bounds.upper
                ),
            });
        }

        if bounds.grid_levels < 2 {
            return Err(MarketError::InvalidGridConfig {
                reason: format!("grid_levels must be >= 2 (got {})", bounds.grid_levels),
            });
        }

        if bounds.total_margin <= bounds.min_margin {
            return Err(MarketError::InvalidGridConfig {
                reason: format!(
                    "total_margin {} must exceed min_margin {}",
                    bounds.total_margin, bounds.min_margin
                ),
            });
        }

        let per_grid_notional = bounds.total_margin / Decimal::from(bounds.grid_levels);
        if per_grid_notional < market.min_notional {
            return Err(MarketError::InvalidGridConfig {
                reason: format!(
                    "per-grid notional {} below min_notional {}",
                    per_grid_notional, market.min_notional
                ),
            });
        }

        let width = bounds.upper - bounds.lower;
        let min_width = bounds.current * dec!(0.01);
        if width < min_width {
            return Err(MarketError::InvalidGridConfig {
                reason: format!("corridor width {} below 1% of current price ({})", width, min_width),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn btc_market() -> MarketInfo {
        MarketInfo::new("PERP_BTC_USDC", dec!(0.1), dec!(0.0001), dec!(10))
    }

    #[test]
    fn normalize_price_floors_to_tick() {
        let validator = MarketValidator::new().with_market(btc_market());
        let market = validator.get_market("PERP_BTC_USDC").unwrap();
        let normalized = validator.normalize_price(dec!(42500.57), market);
        assert_eq!(normalized, dec!(42500.5));
    }

    #[test]
    fn normalize_quantity_floors_to_step() {
        let validator = MarketValidator::new().with_market(btc_market());
        let market = validator.get_market("PERP_BTC_USDC").unwrap();
        let normalized = validator.normalize_quantity(dec!(1.00006), market);
        assert_eq!(normalized, dec!(1.0));
    }

    #[test]
    fn validate_order_rejects_unsupported_symbol() {
        let validator = MarketValidator::new().with_market(btc_market());
        let err = validator.validate_order("PERP_ETH_USDC", dec!(2000), dec!(1)).unwrap_err();
        assert!(matches!(err, MarketError::UnsupportedSymbol(_)));
    }

    #[test]
    fn validate_order_rejects_below_min_notional() {
        let validator = MarketValidator::new().with_market(btc_market());
        let err = validator.validate_order("PERP_BTC_USDC", dec!(42500), dec!(0.0001)).unwrap_err();
        assert!(matches!(err, MarketError::BelowMinNotional { .. }));
    }

    #[test]
    fn validate_config_requires_corridor_ordering() {
        let validator = MarketValidator::new().with_market(btc_market());
        let bounds = GridConfigBounds {
            lower: dec!(43000),
            current: dec!(42000),
            upper: dec!(44000),
            grid_levels: 10,
            total_margin: dec!(10000),
            min_margin: dec!(100),
        };
        let err = validator.validate_config("PERP_BTC_USDC", bounds).unwrap_err();
        assert!(matches!(err, MarketError::InvalidGridConfig { .. }));
    }

    #[test]
    fn validate_config_requires_minimum_corridor_width() {
        let validator = MarketValidator::new().with_market(btc_market());
        let bounds = GridConfigBounds {
            lower: dec!(41999),
            current: dec!(42000),
            upper: dec!(42001),
            grid_levels: 10,
            total_margin: dec!(10000),
            min_margin: dec!(100),
        };
        let err = validator.validate_config("PERP_BTC_USDC", bounds).unwrap_err();
        assert!(matches!(err, MarketError::InvalidGridConfig { .. }));
    }

    #[test]
    fn symbol_alias_normalizes_loose_tickers() {
        assert_eq!(symbol_alias("BTCUSDT"), "PERP_BTC_USDC");
        assert_eq!(symbol_alias("btc-usdc"), "PERP_BTC_USDC");
        assert_eq!(symbol_alias("PERP_BTC_USDC"), "PERP_BTC_USDC");
    }
}

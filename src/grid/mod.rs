//! ═══════════════════════════════════════════════════════════════════════════
//! 🎯 GRID SIGNAL GENERATOR — pure deterministic grid state machine
//!
//! Given a price corridor, direction, and grid type, computes the grid price
//! table once at init, then maps fill events onto counter-order signals.
//! Contains no I/O: every signal is handed to a caller-supplied callback.
//! ═══════════════════════════════════════════════════════════════════════════

use crate::error::MarketError;
use crate::types::Side;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Long,
    Short,
    Both,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum GridType {
    Arithmetic,
    Geometric(Decimal),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalType {
    Initial,
    Counter,
    Stop,
    MarketOpen,
    CancelAll,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingSignal {
    pub symbol: String,
    pub side: Side,
    pub price: Decimal,
    pub size: Decimal,
    pub signal_type: SignalType,
    pub timestamp: DateTime<Utc>,
}

/// Input describing a fill the bot wants the signal generator to react to.
#[derive(Debug, Clone)]
pub struct FillEvent {
    pub price: Decimal,
}

#[derive(Debug, Clone)]
pub struct GridConfig {
    pub symbol: String,
    pub lower: Decimal,
    pub current: Decimal,
    pub upper: Decimal,
    pub grid_levels: u32,
    pub direction: Direction,
    pub grid_type: GridType,
    pub total_margin: Decimal,
    pub tick_size: Decimal,
    pub stop_bot_price: Option<Decimal>,
    pub stop_top_price: Option<Decimal>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    ExternalSignal,
    StopBottomBreached,
    StopTopBreached,
}

/// One grid level: its price and the fixed or per-level quantity to quote there.
#[derive(Debug, Clone, Copy)]
pub struct GridLevel {
    pub price: Decimal,
    pub quantity: Decimal,
}

/// Integer power for `Decimal` by repeated multiplication (avoids pulling in
/// the `maths` feature of `rust_decimal` for a handful of small exponents).
fn decimal_pow(base: Decimal, exponent: u32) -> Decimal {
    let mut result = Decimal::ONE;
    for _ in 0..exponent {
        result *= base;
    }
    result
}

/// Pure deterministic state machine over a fixed grid price table.
pub struct GridSignalGenerator {
    config: GridConfig,
    levels: Vec<GridLevel>,
    current_pointer: Option<usize>,
    first_trigger: bool,
    is_active: bool,
    stop_reason: Option<StopReason>,
}

impl GridSignalGenerator {
    pub fn new(config: GridConfig) -> Result<Self, MarketError> {
        if config.grid_levels < 2 {
            return Err(MarketError::InvalidGridConfig {
                reason: format!("grid_levels must be >= 2 (got {})", config.grid_levels),
            });
        }
        let levels = Self::build_levels(&config);
        Ok(Self {
            config,
            levels,
            current_pointer: None,
            first_trigger: false,
            is_active: true,
            stop_reason: None,
        })
    }

    fn floor_to_tick(price: Decimal, tick: Decimal) -> Decimal {
        if tick <= Decimal::ZERO {
            return price;
        }
        (price / tick).floor() * tick
    }

    /// Computes the grid price table once, per §4.4: exclude current price,
    /// clamp into `[lower, upper]`, quantize per tick-size, sort ascending.
    fn build_levels(config: &GridConfig) -> Vec<GridLevel> {
        let below_levels = config.grid_levels / 2;
        let above_levels = config.grid_levels - below_levels;

        let mut prices: Vec<Decimal> = Vec::with_capacity(config.grid_levels as usize);

        match config.grid_type {
            GridType::Arithmetic => {
                if below_levels > 0 {
                    let spacing = (config.current - config.lower) / Decimal::from(below_levels);
                    for i in 1..=below_levels {
                        prices.push(config.current - spacing * Decimal::from(i));
                    }
                }
                if above_levels > 0 {
                    let spacing = (config.upper - config.current) / Decimal::from(above_levels);
                    for i in 1..=above_levels {
                        prices.push(config.current + spacing * Decimal::from(i));
                    }
                }
            }
            GridType::Geometric(ratio) => {
                let one_minus_r = Decimal::ONE - ratio;
                let one_plus_r = Decimal::ONE + ratio;
                for i in 1..=below_levels {
                    prices.push(config.current * decimal_pow(one_minus_r, i));
                }
                for i in 1..=above_levels {
                    prices.push(config.current * decimal_pow(one_plus_r, i));
                }
            }
        }

        let reference_price = Self::reference_price(config, &prices);
        let margin_per_grid = Self::margin_per_grid(config, below_levels, above_levels);

        let mut levels: Vec<GridLevel> = prices
            .into_iter()
            .filter(|p| *p != config.current)
            .map(|p| Self::floor_to_tick(p, config.tick_size))
            .filter(|p| *p >= config.lower && *p <= config.upper)
            .map(|p| {
                let qty = match config.grid_type {
                    GridType::Arithmetic => margin_per_grid / reference_price,
                    GridType::Geometric(_) => margin_per_grid / p,
                };
                GridLevel { price: p, quantity: qty }
            })
            .collect();

        levels.sort_by(|a, b| a.price.cmp(&b.price));
        levels.dedup_by(|a, b| a.price == b.price);
        levels
    }

    /// §4.4's sizing table: the "most conservative" reference price per direction.
    fn reference_price(config: &GridConfig, prices: &[Decimal]) -> Decimal {
        match config.direction {
            Direction::Long => prices
                .iter()
                .filter(|p| **p < config.current)
                .copied()
                .fold(Decimal::MAX, |a, b| if b < a { b } else { a }),
            Direction::Short => prices
                .iter()
                .filter(|p| **p > config.current)
                .copied()
                .fold(Decimal::MIN, |a, b| if b > a { b } else { a }),
            Direction::Both => config.upper,
        }
    }

    /// §4.4's "grid margin" divisor: the reference's `_setup_long_grid`/
    /// `_setup_short_grid` divide the 50%-of-total grid margin by the count of
    /// levels on the *relevant side only* (below-current for Long,
    /// above-current for Short); only `_setup_both_grid` spreads the full
    /// margin over every level.
    fn margin_per_grid(config: &GridConfig, below_levels: u32, above_levels: u32) -> Decimal {
        let (grid_margin_fraction, relevant_levels) = match config.direction {
            Direction::Long => (dec!(0.5), below_levels),
            Direction::Short => (dec!(0.5), above_levels),
            Direction::Both => (Decimal::ONE, config.grid_levels),
        };
        let relevant_levels = relevant_levels.max(1);
        (config.total_margin * grid_margin_fraction) / Decimal::from(relevant_levels)
    }

    pub fn levels(&self) -> &[GridLevel] {
        &self.levels
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    pub fn current_pointer(&self) -> Option<usize> {
        self.current_pointer
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        self.stop_reason
    }

    /// Same price-relative rule for all three directions: a Long grid's
    /// above-current levels are still take-profit SELLs, not resting BUYs
    /// that would sit above market and fill immediately.
    fn side_for_level(&self, price: Decimal) -> Side {
        if price < self.config.current {
            Side::Buy
        } else {
            Side::Sell
        }
    }

    /// Emits the initial grid's signals via `emit`.
    pub fn setup_initial_grid(&mut self, mut emit: impl FnMut(TradingSignal)) {
        info!(
            "setting up initial grid for {}: {} levels, direction={:?}",
            self.config.symbol,
            self.levels.len(),
            self.config.direction
        );

        let now = Utc::now();

        match self.config.direction {
            Direction::Long => {
                let qty = self.config.total_margin * dec!(0.5) / self.config.current;
                emit(TradingSignal {
                    symbol: self.config.symbol.clone(),
                    side: Side::Buy,
                    price: self.config.current,
                    size: qty,
                    signal_type: SignalType::MarketOpen,
                    timestamp: now,
                });
            }
            Direction::Short => {
                let qty = self.config.total_margin * dec!(0.5) / self.config.current;
                emit(TradingSignal {
                    symbol: self.config.symbol.clone(),
                    side: Side::Sell,
                    price: self.config.current,
                    size: qty,
                    signal_type: SignalType::MarketOpen,
                    timestamp: now,
                });
            }
            Direction::Both => {}
        }

        for level in self.levels.clone() {
            let side = self.side_for_level(level.price);
            emit(TradingSignal {
                symbol: self.config.symbol.clone(),
                side,
                price: level.price,
                size: level.quantity,
                signal_type: SignalType::Initial,
                timestamp: now,
            });
        }
    }

    fn closest_index(&self, price: Decimal) -> Option<usize> {
        self.levels
            .iter()
            .enumerate()
            .min_by_key(|(_, lvl)| (lvl.price - price).abs())
            .map(|(i, _)| i)
    }

    /// Reacts to an order fill. Returns the number of Counter signals emitted
    /// (0 on the very first fill, 1 for Long/Short, 2 for Both), matching the
    /// first-fill/partial-fill/full-fill gating laws.
    pub fn on_order_filled(&mut self, fill: FillEvent, mut emit: impl FnMut(TradingSignal)) -> usize {
        if !self.is_active {
            warn!("on_order_filled called while grid inactive; ignoring");
            return 0;
        }

        let Some(filled_index) = self.closest_index(fill.price) else {
            warn!("fill price {} has no matching grid level", fill.price);
            return 0;
        };

        let mut emitted = 0;
        let now = Utc::now();

        if !self.first_trigger {
            self.current_pointer = Some(filled_index);
            self.first_trigger = true;
            debug!("first fill at index {} — gating counter emission", filled_index);
        } else {
            let previous_pointer = self.current_pointer;
            self.current_pointer = Some(filled_index);

            match self.config.direction {
                Direction::Long | Direction::Short => {
                    if let Some(prev_idx) = previous_pointer {
                        let prev_level = self.levels[prev_idx];
                        let filled_side = self.side_for_level(fill.price);
                        emit(TradingSignal {
                            symbol: self.config.symbol.clone(),
                            side: filled_side.opposite(),
                            price: prev_level.price,
                            size: prev_level.quantity,
                            signal_type: SignalType::Counter,
                            timestamp: now,
                        });
                        emitted += 1;
                    }
                }
                Direction::Both => {
                    let level = self.levels[filled_index];
                    emit(TradingSignal {
                        symbol: self.config.symbol.clone(),
                        side: Side::Buy,
                        price: level.price,
                        size: level.quantity,
                        signal_type: SignalType::Counter,
                        timestamp: now,
                    });
                    emit(TradingSignal {
                        symbol: self.config.symbol.clone(),
                        side: Side::Sell,
                        price: level.price,
                        size: level.quantity,
                        signal_type: SignalType::Counter,
                        timestamp: now,
                    });
                    emitted += 2;
                }
            }
        }

        if let Some(stop_bot) = self.config.stop_bot_price {
            if fill.price <= stop_bot {
                self.trigger_stop(StopReason::StopBottomBreached, &mut emit);
                return emitted;
            }
        }
        if let Some(stop_top) = self.config.stop_top_price {
            if fill.price >= stop_top {
                self.trigger_stop(StopReason::StopTopBreached, &mut emit);
            }
        }

        emitted
    }

    fn trigger_stop(&mut self, reason: StopReason, emit: &mut impl FnMut(TradingSignal)) {
        self.is_active = false;
        self.stop_reason = Some(reason);
        emit(TradingSignal {
            symbol: self.config.symbol.clone(),
            side: Side::Sell,
            price: self.config.current,
            size: Decimal::ZERO,
            signal_type: SignalType::Stop,
            timestamp: Utc::now(),
        });
    }

    /// External stop: deactivates the grid and emits a single `Stop` signal.
    pub fn stop_by_signal(&mut self, mut emit: impl FnMut(TradingSignal)) {
        self.is_active = false;
        self.stop_reason = Some(StopReason::ExternalSignal);
        emit(TradingSignal {
            symbol: self.config.symbol.clone(),
            side: Side::Sell,
            price: self.config.current,
            size: Decimal::ZERO,
            signal_type: SignalType::Stop,
            timestamp: Utc::now(),
        });
    }

    /// Re-runs `setup_initial_grid` with fresh pointer/trigger state, for
    /// operator-triggered grid resets without tearing down the session.
    pub fn restart_grid(&mut self, emit: impl FnMut(TradingSignal)) {
        self.current_pointer = None;
        self.first_trigger = false;
        self.is_active = true;
        self.stop_reason = None;
        self.levels = Self::build_levels(&self.config);
        self.setup_initial_grid(emit);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn both_config() -> GridConfig {
        GridConfig {
            symbol: "PERP_BTC_USDC".into(),
            lower: dec!(40000),
            current: dec!(42000),
            upper: dec!(44000),
            grid_levels: 10,
            direction: Direction::Both,
            grid_type: GridType::Arithmetic,
            total_margin: dec!(10000),
            tick_size: dec!(0.1),
            stop_bot_price: None,
            stop_top_price: None,
        }
    }

    #[test]
    fn levels_exclude_current_price_and_are_sorted() {
        let gen = GridSignalGenerator::new(both_config()).unwrap();
        assert!(gen.levels().windows(2).all(|w| w[0].price < w[1].price));
        assert!(gen.levels().iter().all(|l| l.price != dec!(42000)));
    }

    #[test]
    fn first_fill_emits_zero_counters() {
        let mut gen = GridSignalGenerator::new(both_config()).unwrap();
        let first_price = gen.levels()[0].price;
        let mut signals = Vec::new();
        let emitted = gen.on_order_filled(FillEvent { price: first_price }, |s| signals.push(s));
        assert_eq!(emitted, 0);
        assert!(signals.is_empty());
        assert_eq!(gen.current_pointer(), Some(0));
    }

    #[test]
    fn both_direction_second_fill_emits_pair() {
        let mut gen = GridSignalGenerator::new(both_config()).unwrap();
        let p0 = gen.levels()[0].price;
        let p1 = gen.levels()[1].price;
        gen.on_order_filled(FillEvent { price: p0 }, |_| {});
        let mut signals = Vec::new();
        let emitted = gen.on_order_filled(FillEvent { price: p1 }, |s| signals.push(s));
        assert_eq!(emitted, 2);
        assert_eq!(signals.len(), 2);
        assert!(signals.iter().any(|s| s.side == Side::Buy));
        assert!(signals.iter().any(|s| s.side == Side::Sell));
        assert!(signals.iter().all(|s| s.signal_type == SignalType::Counter));
    }

    #[test]
    fn long_direction_emits_opposite_side_at_previous_pointer() {
        let mut config = both_config();
        config.direction = Direction::Long;
        let mut gen = GridSignalGenerator::new(config).unwrap();
        let p0 = gen.levels()[0].price;
        let p1 = gen.levels()[1].price;
        gen.on_order_filled(FillEvent { price: p0 }, |_| {});
        let mut signals = Vec::new();
        let emitted = gen.on_order_filled(FillEvent { price: p1 }, |s| signals.push(s));
        assert_eq!(emitted, 1);
        assert_eq!(signals[0].price, p0);
        assert_eq!(signals[0].signal_type, SignalType::Counter);
    }

    #[test]
    fn long_grid_sides_depend_on_price_not_direction() {
        let mut config = both_config();
        config.direction = Direction::Long;
        let mut gen = GridSignalGenerator::new(config).unwrap();
        let mut signals = Vec::new();
        gen.setup_initial_grid(|s| signals.push(s));

        let initial: Vec<_> = signals.iter().filter(|s| s.signal_type == SignalType::Initial).collect();
        assert!(initial.iter().any(|s| s.price < dec!(42000) && s.side == Side::Buy));
        assert!(initial.iter().any(|s| s.price > dec!(42000) && s.side == Side::Sell));
        assert!(initial.iter().all(|s| (s.price < dec!(42000)) == (s.side == Side::Buy)));
    }

    #[test]
    fn short_grid_sides_depend_on_price_not_direction() {
        let mut config = both_config();
        config.direction = Direction::Short;
        let mut gen = GridSignalGenerator::new(config).unwrap();
        let mut signals = Vec::new();
        gen.setup_initial_grid(|s| signals.push(s));

        let initial: Vec<_> = signals.iter().filter(|s| s.signal_type == SignalType::Initial).collect();
        assert!(initial.iter().any(|s| s.price < dec!(42000) && s.side == Side::Buy));
        assert!(initial.iter().any(|s| s.price > dec!(42000) && s.side == Side::Sell));
        assert!(initial.iter().all(|s| (s.price < dec!(42000)) == (s.side == Side::Buy)));
    }

    #[test]
    fn stop_by_signal_deactivates_and_emits_one_stop() {
        let mut gen = GridSignalGenerator::new(both_config()).unwrap();
        let mut signals = Vec::new();
        gen.stop_by_signal(|s| signals.push(s));
        assert!(!gen.is_active());
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].signal_type, SignalType::Stop);
    }

    #[test]
    fn rejects_fewer_than_two_levels() {
        let mut config = both_config();
        config.grid_levels = 1;
        assert!(GridSignalGenerator::new(config).is_err());
    }
}

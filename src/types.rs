//! ═══════════════════════════════════════════════════════════════════════════
//! SHARED TYPES — side/order-type enums used across every component
//! ═══════════════════════════════════════════════════════════════════════════

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    pub fn from_str_loose(s: &str) -> Option<Side> {
        match s.to_uppercase().as_str() {
            "BUY" | "LONG" => Some(Side::Buy),
            "SELL" | "SHORT" => Some(Side::Sell),
            _ => None,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    Limit,
    Market,
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderType::Limit => write!(f, "LIMIT"),
            OrderType::Market => write!(f, "MARKET"),
        }
    }
}

/// A `(price, side)` pair used throughout the duplicate-guard machinery.
/// `Decimal` doesn't implement `Hash`/`Eq` stably across scales, so the key
/// is normalized string form at construction time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PriceKey(String, Side);

impl PriceKey {
    pub fn new(price: rust_decimal::Decimal, side: Side) -> Self {
        Self(price.normalize().to_string(), side)
    }

    pub fn side(&self) -> Side {
        self.1
    }

    /// Recovers the normalized price this key was built from. Used by the
    /// fuzzy duplicate-order check, which compares prices across keys rather
    /// than relying on exact string equality.
    pub fn price(&self) -> rust_decimal::Decimal {
        self.0.parse().unwrap_or_default()
    }
}

impl fmt::Display for PriceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.1, self.0)
    }
}

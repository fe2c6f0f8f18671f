//! ═══════════════════════════════════════════════════════════════════════════
//! ⚙️  CONFIGURATION — layered settings for the grid engine + copy-trading stack
//!
//! Sources layer in this order (lowest to highest precedence): built-in
//! defaults → `config/default.toml` → `config/{RUST_ENV}.toml` → `.env` file →
//! unprefixed environment variables (`ORDERLY_KEY`, `GRID__SYMBOL`, ...). See
//! [`loader::ConfigLoader`].
//! ═══════════════════════════════════════════════════════════════════════════

pub mod loader;

pub use loader::ConfigLoader;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Orderly Network API credentials and environment selection.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ExchangeConfig {
    #[validate(length(min = 1, message = "orderly_key must not be empty"))]
    pub orderly_key: String,

    #[validate(length(min = 1, message = "orderly_secret must not be empty"))]
    pub orderly_secret: String,

    #[validate(length(min = 1, message = "orderly_account_id must not be empty"))]
    pub orderly_account_id: String,

    #[serde(default = "default_true")]
    pub orderly_testnet: bool,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            orderly_key: String::new(),
            orderly_secret: String::new(),
            orderly_account_id: String::new(),
            orderly_testnet: true,
        }
    }
}

/// Default grid parameters a new session starts from; the caller can still
/// override any of these per-session through the admin API or CLI flags.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct GridDefaults {
    pub symbol: String,

    #[validate(range(min = 2, message = "grid_levels must be at least 2"))]
    pub grid_levels: u32,

    pub per_grid_margin: Decimal,

    pub leverage: Decimal,

    /// `"arithmetic"` or `"geometric"`.
    pub grid_type: String,

    /// `"long"`, `"short"`, or `"both"`.
    pub direction: String,

    /// Corridor half-width as a fraction of the current price (e.g. `0.1` = ±10%).
    pub corridor_width_pct: Decimal,
}

impl Default for GridDefaults {
    fn default() -> Self {
        Self {
            symbol: "PERP_BTC_USDC".to_string(),
            grid_levels: 10,
            per_grid_margin: dec!(50),
            leverage: dec!(3),
            grid_type: "arithmetic".to_string(),
            direction: "both".to_string(),
            corridor_width_pct: dec!(0.1),
        }
    }
}

/// Default per-follower risk limits applied when a new copy-trading follower
/// doesn't supply its own; mirrors [`crate::risk_controller::RiskLimits`].
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RiskDefaults {
    pub max_per_trade_amount: Decimal,
    pub daily_max_loss: Decimal,

    #[validate(range(min = 1, message = "max_position_count must be at least 1"))]
    pub max_position_count: u32,

    pub max_position_value: Decimal,

    #[validate(range(min = 0.0, max = 1.0, message = "max_single_position_ratio must be within (0, 1]"))]
    pub max_single_position_ratio: f64,
}

impl Default for RiskDefaults {
    fn default() -> Self {
        Self {
            max_per_trade_amount: dec!(1000),
            daily_max_loss: dec!(500),
            max_position_count: 10,
            max_position_value: dec!(50000),
            max_single_position_ratio: 0.5,
        }
    }
}

impl RiskDefaults {
    pub fn to_risk_limits(&self) -> crate::risk_controller::RiskLimits {
        crate::risk_controller::RiskLimits {
            max_per_trade_amount: self.max_per_trade_amount,
            daily_max_loss: self.daily_max_loss,
            max_position_count: self.max_position_count,
            max_position_value: self.max_position_value,
            max_single_position_ratio: Decimal::try_from(self.max_single_position_ratio).unwrap_or(dec!(0.5)),
        }
    }
}

/// Where session summaries and copy-trade documents are written; the
/// in-tree [`crate::persistence::LoggingSink`] is used whenever `uri` is unset.
#[derive(Debug, Clone, Serialize, Deserialize, Default, Validate)]
pub struct PersistenceConfig {
    pub uri: Option<String>,
}

/// Admin/API surface settings; out of this crate's scope to serve, but the
/// values are threaded through so an embedding service knows what to bind.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ServerConfig {
    pub frontend_url: String,

    #[serde(default)]
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { frontend_url: "http://localhost:3000".to_string(), cors_origins: vec!["http://localhost:3000".to_string()] }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level() }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

/// Root settings object assembled by [`ConfigLoader`] and shared (behind an
/// `Arc`) by the orchestrator.
///
/// `exchange` and `server` are flattened rather than nested so that the
/// `ORDERLY_KEY` / `ORDERLY_SECRET` / `ORDERLY_ACCOUNT_ID` / `ORDERLY_TESTNET`
/// / `FRONTEND_URL` / `CORS_ORIGINS` environment variables named in the
/// external-interfaces spec land directly as top-level keys instead of
/// needing an `EXCHANGE__`/`SERVER__` prefix.
#[derive(Debug, Clone, Serialize, Deserialize, Default, Validate)]
pub struct Config {
    #[serde(flatten)]
    #[validate(nested)]
    pub exchange: ExchangeConfig,

    #[validate(nested)]
    pub grid: GridDefaults,

    #[validate(nested)]
    pub risk: RiskDefaults,

    #[serde(default)]
    pub persistence: PersistenceConfig,

    #[serde(flatten)]
    #[validate(nested)]
    pub server: ServerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    pub fn validate_all(&self) -> anyhow::Result<()> {
        self.validate().map_err(|e| anyhow::anyhow!("configuration invalid: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass_validation_once_exchange_creds_are_set() {
        let mut cfg = Config::default();
        cfg.exchange.orderly_key = "k".into();
        cfg.exchange.orderly_secret = "s".into();
        cfg.exchange.orderly_account_id = "a".into();
        assert!(cfg.validate_all().is_ok());
    }

    #[test]
    fn missing_credentials_fail_validation() {
        let cfg = Config::default();
        assert!(cfg.validate_all().is_err());
    }

    #[test]
    fn too_few_grid_levels_fail_validation() {
        let mut cfg = Config::default();
        cfg.exchange.orderly_key = "k".into();
        cfg.exchange.orderly_secret = "s".into();
        cfg.exchange.orderly_account_id = "a".into();
        cfg.grid.grid_levels = 1;
        assert!(cfg.validate_all().is_err());
    }
}

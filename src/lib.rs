//! ═══════════════════════════════════════════════════════════════════════
//! PERP GRID ENGINE — automated perpetual-futures grid trading + copy-trading
//!
//! • Deterministic arithmetic/geometric grid signal generation
//! • Idempotent order and fill tracking, FIFO realized/unrealized PnL
//! • Per-follower risk-gated copy-trading fan-out from a leader account
//! • Resilient exchange WebSocket supervision: backoff, circuit breaker,
//!   duplicate-fill suppression
//! • Bounded single-consumer session event queue with privileged stop events
//!
//! Version: 0.1.0
//! License: MIT
//! ═══════════════════════════════════════════════════════════════════════

#![allow(missing_docs)]
#![allow(missing_debug_implementations)]
#![warn(rust_2018_idioms, unreachable_pub)]
#![deny(unsafe_code)]
#![allow(clippy::too_many_arguments)]

// ═══════════════════════════════════════════════════════════════════════
// Module Declarations
// ═══════════════════════════════════════════════════════════════════════

pub mod config;
pub mod error;
pub mod types;

pub mod market;
pub mod exchange;
pub mod grid;
pub mod order_tracker;
pub mod profit_tracker;
pub mod session_queue;
pub mod ws_supervisor;
pub mod grid_bot;

pub mod leader_monitor;
pub mod risk_controller;
pub mod copy_bot;
pub mod copy_session_manager;

pub mod persistence;

// ═══════════════════════════════════════════════════════════════════════
// Public API Exports
// ═══════════════════════════════════════════════════════════════════════

pub use config::Config;
pub use types::{OrderType, PriceKey, Side};

pub use grid::{
    Direction, FillEvent, GridConfig, GridSignalGenerator, GridType, SignalType, StopReason, TradingSignal,
};
pub use grid_bot::GridTradingBot;
pub use market::{MarketInfo, MarketValidator};
pub use order_tracker::{OrderStatus, OrderTracker};
pub use profit_tracker::ProfitTracker;
pub use session_queue::{SessionEvent, SessionEventQueue};
pub use ws_supervisor::WebSocketSupervisor;

pub use copy_bot::CopyTradingBot;
pub use copy_session_manager::CopyTradingSessionManager;
pub use leader_monitor::{LeaderMonitor, LeaderTradeEvent};
pub use risk_controller::{RiskController, RiskLimits, ValidationResult};

pub use exchange::{ExchangeClient, SimulatedExchangeClient};
pub use persistence::{LoggingSink, SummarySink};

// ═══════════════════════════════════════════════════════════════════════
// Library Metadata
// ═══════════════════════════════════════════════════════════════════════

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Initializes logging at the given level (respects `RUST_LOG` if already set)
/// and prints a one-line startup banner. Call once from `main`.
pub fn init() -> anyhow::Result<()> {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info");
    }
    env_logger::try_init().ok();
    log::info!("{} v{} starting", NAME, VERSION);
    Ok(())
}

/// Initializes logging, then validates the supplied configuration, logging
/// its salient fields. Returns an error if the configuration fails validation.
pub fn init_with_config(config: &Config) -> anyhow::Result<()> {
    init()?;
    config.validate_all()?;
    log::info!(
        "config loaded: symbol={} grid_levels={} testnet={}",
        config.grid.symbol, config.grid.grid_levels, config.exchange.orderly_testnet
    );
    Ok(())
}

pub fn version() -> &'static str {
    VERSION
}

pub fn version_string() -> String {
    format!("{NAME} v{VERSION}")
}

pub mod prelude {
    pub use crate::config::Config;
    pub use crate::copy_bot::CopyTradingBot;
    pub use crate::copy_session_manager::CopyTradingSessionManager;
    pub use crate::exchange::{ExchangeClient, SimulatedExchangeClient};
    pub use crate::grid::{Direction, GridConfig, GridSignalGenerator, GridType};
    pub use crate::grid_bot::GridTradingBot;
    pub use crate::leader_monitor::LeaderMonitor;
    pub use crate::risk_controller::{RiskController, RiskLimits};
    pub use crate::types::{OrderType, Side};
    pub use crate::{init, init_with_config, version};
    pub use anyhow::{Context, Result};
}

pub fn is_test_mode() -> bool {
    cfg!(test)
}

pub fn is_debug_mode() -> bool {
    cfg!(debug_assertions)
}

pub fn has_backtrace() -> bool {
    std::env::var("RUST_BACKTRACE").is_ok()
}

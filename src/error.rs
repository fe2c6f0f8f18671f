//! ═══════════════════════════════════════════════════════════════════════════
//! ERROR KINDS — typed boundaries per component
//!
//! Each component boundary gets a `thiserror`-derived enum so callers can
//! match on the *kind* of failure (validation vs. transient vs. fatal, per
//! the error-handling design) instead of parsing strings. Orchestrator-level
//! glue uses `anyhow::Result` and `.context(...)` over these.
//! ═══════════════════════════════════════════════════════════════════════════

use thiserror::Error;

/// `MarketValidator` boundary errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MarketError {
    #[error("unsupported symbol: {0}")]
    UnsupportedSymbol(String),

    #[error("order notional {notional} below minimum {min_notional} for {symbol}")]
    BelowMinNotional {
        symbol: String,
        notional: String,
        min_notional: String,
    },

    #[error("invalid grid config: {reason}")]
    InvalidGridConfig { reason: String },
}

/// `GridSignalGenerator` / `GridTradingBot` boundary errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GridError {
    #[error("market error: {0}")]
    Market(#[from] MarketError),

    #[error("duplicate order at price={price} side={side:?}")]
    DuplicateOrder { price: String, side: String },

    #[error("order {0} not found in active orders")]
    OrderNotActive(String),

    #[error("symbol mismatch: expected {expected}, got {actual}")]
    SymbolMismatch { expected: String, actual: String },

    #[error("bot is not running")]
    NotRunning,

    #[error("grid is not active: {reason}")]
    GridInactive { reason: String },
}

/// `RiskController` boundary errors (distinct from a `ValidationResult` rejection,
/// which is a normal outcome, not an error).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RiskError {
    #[error("risk limits invalid: {0}")]
    InvalidLimits(String),

    #[error("unknown follower: {0}")]
    UnknownFollower(String),
}

/// Errors surfaced by the (simulated / real) exchange client boundary.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExchangeError {
    #[error("transient I/O error: {0}")]
    Transient(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("permanent error ({code}): {message}")]
    Permanent { code: u16, message: String },

    #[error("authentication failed: {0}")]
    AuthFailed(String),
}

impl ExchangeError {
    /// Whether `RetryHandler` should retry this kind of failure.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ExchangeError::Transient(_) | ExchangeError::RateLimited(_))
    }
}

/// `WebSocketSupervisor` boundary errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SupervisorError {
    #[error("reconnect attempts exhausted after {0} tries")]
    ReconnectExhausted(u32),

    #[error("circuit breaker open, retry after {0:?}")]
    CircuitOpen(std::time::Duration),

    #[error("authentication failed, session must stop: {0}")]
    AuthFatal(String),

    #[error("connection already in state {0}")]
    InvalidTransition(String),
}

/// Trading-mode conflict for `CopyTradingSessionManager`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionManagerError {
    #[error("user {user_id} already in trading mode {current:?}, cannot enter {requested:?}")]
    TradingModeConflict {
        user_id: String,
        current: crate::copy_session_manager::TradingMode,
        requested: crate::copy_session_manager::TradingMode,
    },

    #[error("leader {0} not found")]
    LeaderNotFound(String),

    #[error("follower {0} not found")]
    FollowerNotFound(String),

    #[error("leader {0} not approved")]
    LeaderNotApproved(String),

    #[error("invalid risk limits: {0}")]
    InvalidRiskLimits(String),
}

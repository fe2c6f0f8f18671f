//! Circuit breaker gating reconnect attempts — not trading. Same shape as a
//! drawdown breaker (trip threshold + cooldown timer + status snapshot) but
//! trips on consecutive *connection* failures instead of consecutive losses.

use log::{error, info, warn};
use std::time::{Duration, Instant};

const TRIP_THRESHOLD: u32 = 6;
const OPEN_COOLDOWN: Duration = Duration::from_secs(120);
const HALF_OPEN_TEST_BUDGET: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
pub struct ReconnectCircuitBreaker {
    state: CircuitState,
    consecutive_failures: u32,
    half_open_successes: u32,
    half_open_attempts: u32,
    opened_at: Option<Instant>,
}

impl ReconnectCircuitBreaker {
    pub fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            half_open_successes: 0,
            half_open_attempts: 0,
            opened_at: None,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    /// Whether a reconnect attempt may proceed right now. Transitions
    /// OPEN → HALF_OPEN once the cooldown has elapsed.
    pub fn allow_attempt(&mut self) -> bool {
        match self.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => self.half_open_attempts < HALF_OPEN_TEST_BUDGET,
            CircuitState::Open => {
                if let Some(opened_at) = self.opened_at {
                    if opened_at.elapsed() >= OPEN_COOLDOWN {
                        info!("circuit breaker cooldown elapsed — entering HALF_OPEN");
                        self.state = CircuitState::HalfOpen;
                        self.half_open_attempts = 0;
                        self.half_open_successes = 0;
                        return true;
                    }
                }
                false
            }
        }
    }

    pub fn record_success(&mut self) {
        match self.state {
            CircuitState::HalfOpen => {
                self.half_open_attempts += 1;
                self.half_open_successes += 1;
                if self.half_open_successes >= HALF_OPEN_TEST_BUDGET {
                    info!("circuit breaker CLOSED after {} successful test attempts", self.half_open_successes);
                    self.close();
                }
            }
            CircuitState::Closed => {
                self.consecutive_failures = 0;
            }
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&mut self) {
        match self.state {
            CircuitState::HalfOpen => {
                warn!("test attempt failed in HALF_OPEN — re-opening circuit breaker");
                self.half_open_attempts += 1;
                self.open();
            }
            CircuitState::Closed => {
                self.consecutive_failures += 1;
                if self.consecutive_failures >= TRIP_THRESHOLD {
                    error!(
                        "circuit breaker tripped after {} consecutive failures",
                        self.consecutive_failures
                    );
                    self.open();
                }
            }
            CircuitState::Open => {}
        }
    }

    fn open(&mut self) {
        self.state = CircuitState::Open;
        self.opened_at = Some(Instant::now());
    }

    fn close(&mut self) {
        self.state = CircuitState::Closed;
        self.consecutive_failures = 0;
        self.opened_at = None;
    }
}

impl Default for ReconnectCircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trips_after_six_consecutive_failures() {
        let mut cb = ReconnectCircuitBreaker::new();
        for _ in 0..5 {
            cb.record_failure();
            assert_eq!(cb.state(), CircuitState::Closed);
        }
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn half_open_closes_after_two_successes() {
        let mut cb = ReconnectCircuitBreaker::new();
        for _ in 0..6 {
            cb.record_failure();
        }
        cb.state = CircuitState::HalfOpen;
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn half_open_failure_reopens() {
        let mut cb = ReconnectCircuitBreaker::new();
        cb.state = CircuitState::HalfOpen;
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
    }
}

//! ═══════════════════════════════════════════════════════════════════════════
//! 🔌 WEBSOCKET SUPERVISOR — connection state machine, backoff, health monitor
//!
//! Owns one private WS connection per session. Callbacks from the I/O thread
//! never touch session state directly — the only thing they're handed is a
//! sender half of the `SessionEventQueue`, enforced at the type level by
//! `WsCallbackHandle` only exposing `enqueue(...)`.
//! ═══════════════════════════════════════════════════════════════════════════

pub mod circuit_breaker;

use crate::error::SupervisorError;
use crate::session_queue::{SessionEvent, SessionEventQueue};
use circuit_breaker::ReconnectCircuitBreaker;
use log::{error, info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

const BASE_DELAY: Duration = Duration::from_secs(3);
const MAX_DELAY: Duration = Duration::from_secs(120);
const BROKEN_PIPE_PENALTY: Duration = Duration::from_secs(7);
pub const MAX_RETRIES: u32 = 8;
const RECONNECT_TIMEOUT: Duration = Duration::from_secs(45);
const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(90);
const STALE_THRESHOLD: Duration = Duration::from_secs(45);
const PROACTIVE_RECONNECT_AGE: Duration = Duration::from_secs(6 * 3600);
const PROCESSED_FILLS_TTL: Duration = Duration::from_secs(300);
const PROCESSED_FILLS_MAX: usize = 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connected,
    Reconnecting,
    Failed,
}

/// Computes the exponential backoff delay for reconnect attempt `n` (0-indexed).
pub fn backoff_delay(attempt: u32, broken_pipe: bool) -> Duration {
    // Cap the exponent well before it could overflow u32 — delay saturates
    // at MAX_DELAY long before attempt reaches double digits anyway.
    let exp = 2u64.saturating_pow(attempt.min(16));
    let scaled_secs = BASE_DELAY.as_secs().saturating_mul(exp);
    let mut delay = Duration::from_secs(scaled_secs).min(MAX_DELAY);
    if broken_pipe {
        delay += BROKEN_PIPE_PENALTY;
    }
    delay
}

struct DedupEntry {
    seen_at: Instant,
}

/// Per-session duplicate-notification suppression with TTL + size-bound LRU.
struct ProcessedFills {
    entries: HashMap<String, DedupEntry>,
}

impl ProcessedFills {
    fn new() -> Self {
        Self { entries: HashMap::new() }
    }

    /// Returns `true` if this is the first time `fill_id` has been seen
    /// (and records it); `false` if it's a duplicate.
    fn check_and_insert(&mut self, fill_id: &str) -> bool {
        self.prune_expired();
        if self.entries.contains_key(fill_id) {
            return false;
        }
        self.entries.insert(fill_id.to_string(), DedupEntry { seen_at: Instant::now() });
        if self.entries.len() > PROCESSED_FILLS_MAX / 2 {
            self.compact();
        }
        true
    }

    fn prune_expired(&mut self) {
        self.entries.retain(|_, v| v.seen_at.elapsed() < PROCESSED_FILLS_TTL);
    }

    /// LRU-by-timestamp compaction down to half the max size.
    fn compact(&mut self) {
        if self.entries.len() <= PROCESSED_FILLS_MAX {
            return;
        }
        let mut by_age: Vec<(String, Instant)> =
            self.entries.iter().map(|(k, v)| (k.clone(), v.seen_at)).collect();
        by_age.sort_by_key(|(_, t)| *t);
        let excess = self.entries.len().saturating_sub(PROCESSED_FILLS_MAX / 2);
        for (key, _) in by_age.into_iter().take(excess) {
            self.entries.remove(&key);
        }
    }
}

/// Send-only handle given to WS I/O-thread callbacks. Cannot touch session
/// state — only enqueue events onto the session's queue.
#[derive(Clone)]
pub struct WsCallbackHandle {
    queue: Arc<SessionEventQueue>,
}

impl WsCallbackHandle {
    pub async fn enqueue(&self, event: SessionEvent) {
        self.queue.add_event(event).await;
    }
}

struct ConnectionMeta {
    credentials_key: String,
    connected_at: Instant,
    last_activity: Instant,
}

pub struct WebSocketSupervisor {
    session_id: String,
    state: Mutex<ConnectionState>,
    circuit: Mutex<ReconnectCircuitBreaker>,
    retries: Mutex<u32>,
    processed_fills: Mutex<ProcessedFills>,
    meta: Mutex<Option<ConnectionMeta>>,
    queue: Arc<SessionEventQueue>,
}

impl WebSocketSupervisor {
    pub fn new(session_id: impl Into<String>, queue: Arc<SessionEventQueue>) -> Self {
        Self {
            session_id: session_id.into(),
            state: Mutex::new(ConnectionState::Disconnected),
            circuit: Mutex::new(ReconnectCircuitBreaker::new()),
            retries: Mutex::new(0),
            processed_fills: Mutex::new(ProcessedFills::new()),
            meta: Mutex::new(None),
            queue,
        }
    }

    pub fn callback_handle(&self) -> WsCallbackHandle {
        WsCallbackHandle { queue: self.queue.clone() }
    }

    pub async fn state(&self) -> ConnectionState {
        *self.state.lock().await
    }

    /// First connect: stashes credentials for reuse on reconnect.
    pub async fn start(&self, credentials_key: impl Into<String>) -> Result<(), SupervisorError> {
        let mut state = self.state.lock().await;
        *state = ConnectionState::Connected;
        let now = Instant::now();
        *self.meta.lock().await = Some(ConnectionMeta {
            credentials_key: credentials_key.into(),
            connected_at: now,
            last_activity: now,
        });
        *self.retries.lock().await = 0;
        info!("session {} websocket CONNECTED", self.session_id);
        Ok(())
    }

    /// Called on close/error. Attempts exponential-backoff reconnect gated by
    /// the circuit breaker; exhausting `MAX_RETRIES` transitions to FAILED.
    pub async fn on_disconnect(&self, broken_pipe: bool) -> Result<(), SupervisorError> {
        *self.state.lock().await = ConnectionState::Reconnecting;
        warn!("session {} websocket disconnected, entering RECONNECTING", self.session_id);

        loop {
            let mut retries = self.retries.lock().await;
            if *retries >= MAX_RETRIES {
                drop(retries);
                *self.state.lock().await = ConnectionState::Failed;
                error!("session {} reconnect exhausted after {} tries", self.session_id, MAX_RETRIES);
                return Err(SupervisorError::ReconnectExhausted(MAX_RETRIES));
            }

            let mut breaker = self.circuit.lock().await;
            if !breaker.allow_attempt() {
                drop(breaker);
                drop(retries);
                return Err(SupervisorError::CircuitOpen(OPEN_COOLDOWN_HINT));
            }
            drop(breaker);

            let attempt = *retries;
            let delay = backoff_delay(attempt, broken_pipe);
            *retries += 1;
            drop(retries);

            info!("session {} reconnect attempt {} in {:?}", self.session_id, attempt, delay);
            tokio::time::sleep(delay).await;

            let credentials_key = self
                .meta
                .lock()
                .await
                .as_ref()
                .map(|m| m.credentials_key.clone())
                .unwrap_or_default();

            match tokio::time::timeout(RECONNECT_TIMEOUT, self.attempt_reconnect(&credentials_key)).await {
                Ok(Ok(())) => {
                    self.circuit.lock().await.record_success();
                    *self.retries.lock().await = 0;
                    *self.state.lock().await = ConnectionState::Connected;
                    info!("session {} reconnected successfully", self.session_id);
                    return Ok(());
                }
                Ok(Err(e)) => {
                    self.circuit.lock().await.record_failure();
                    warn!("session {} reconnect attempt failed: {}", self.session_id, e);
                }
                Err(_) => {
                    self.circuit.lock().await.record_failure();
                    warn!("session {} reconnect attempt timed out", self.session_id);
                }
            }
        }
    }

    /// Placeholder for the excluded real WS dial — overridden in integration
    /// tests with a fake that succeeds/fails deterministically.
    async fn attempt_reconnect(&self, credentials_key: &str) -> Result<(), SupervisorError> {
        if credentials_key.is_empty() {
            return Err(SupervisorError::AuthFatal("missing credentials".into()));
        }
        let now = Instant::now();
        if let Some(meta) = self.meta.lock().await.as_mut() {
            meta.connected_at = now;
            meta.last_activity = now;
        }
        Ok(())
    }

    pub async fn should_retry_reconnection(&self) -> bool {
        *self.retries.lock().await < MAX_RETRIES
    }

    pub async fn note_activity(&self) {
        if let Some(meta) = self.meta.lock().await.as_mut() {
            meta.last_activity = Instant::now();
        }
    }

    /// Every 90s: validates the connection is present and has had activity
    /// within the last 45s; also proactively reconnects connections older
    /// than 6h.
    pub async fn health_check(&self) -> bool {
        let meta = self.meta.lock().await;
        let Some(meta) = meta.as_ref() else {
            return false;
        };
        let stale = meta.last_activity.elapsed() > STALE_THRESHOLD;
        let too_old = meta.connected_at.elapsed() > PROACTIVE_RECONNECT_AGE;
        if stale {
            warn!("session {} connection stale (> {:?} idle)", self.session_id, STALE_THRESHOLD);
        }
        if too_old {
            info!("session {} connection older than {:?}; proactive reconnect due", self.session_id, PROACTIVE_RECONNECT_AGE);
        }
        !(stale || too_old)
    }

    pub fn health_check_interval() -> Duration {
        HEALTH_CHECK_INTERVAL
    }

    /// Duplicate-notification suppression: returns `false` if `fill_id` was
    /// already processed for this session.
    pub async fn accept_fill(&self, fill_id: &str) -> bool {
        self.processed_fills.lock().await.check_and_insert(fill_id)
    }
}

const OPEN_COOLDOWN_HINT: Duration = Duration::from_secs(120);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_schedule_matches_spec_table() {
        let expected = [3u64, 6, 12, 24, 48, 96];
        for (attempt, exp) in expected.iter().enumerate() {
            assert_eq!(backoff_delay(attempt as u32, false), Duration::from_secs(*exp));
        }
        assert_eq!(backoff_delay(6, false), Duration::from_secs(120));
        assert_eq!(backoff_delay(10, false), Duration::from_secs(120));
    }

    #[test]
    fn broken_pipe_adds_extra_delay() {
        assert_eq!(backoff_delay(0, true), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn should_retry_reconnection_false_after_exhaustion() {
        let queue = Arc::new(SessionEventQueue::new());
        let supervisor = WebSocketSupervisor::new("s1", queue);
        *supervisor.retries.lock().await = MAX_RETRIES;
        assert!(!supervisor.should_retry_reconnection().await);
    }

    #[tokio::test]
    async fn duplicate_fill_ids_are_suppressed() {
        let queue = Arc::new(SessionEventQueue::new());
        let supervisor = WebSocketSupervisor::new("s1", queue);
        assert!(supervisor.accept_fill("abc").await);
        assert!(!supervisor.accept_fill("abc").await);
    }

    #[tokio::test]
    async fn start_transitions_to_connected() {
        let queue = Arc::new(SessionEventQueue::new());
        let supervisor = WebSocketSupervisor::new("s1", queue);
        supervisor.start("key").await.unwrap();
        assert_eq!(supervisor.state().await, ConnectionState::Connected);
    }
}

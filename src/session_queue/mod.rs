//! ═══════════════════════════════════════════════════════════════════════════
//! 📬 SESSION EVENT QUEUE — bounded FIFO, single-consumer worker
//!
//! Serializes WebSocket fill/cancel events with outbound commands for one
//! session. `Stop` events are privileged: they evict older non-`Stop` events
//! to guarantee delivery under backpressure rather than being dropped.
//! ═══════════════════════════════════════════════════════════════════════════

use crate::grid::TradingSignal;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, error, warn};
use rust_decimal::Decimal;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};

pub const DEFAULT_CAPACITY: usize = 1_000;
const STALE_AFTER: Duration = Duration::from_secs(300);
const WORKER_POLL_TIMEOUT: Duration = Duration::from_secs(1);
const STOP_EVICTION_BUDGET: usize = 5;

#[derive(Debug, Clone)]
pub enum SessionEvent {
    Signal(TradingSignal),
    OrderFilled {
        order_id: String,
        fill_id: String,
        price: Decimal,
        quantity: Decimal,
        side: crate::types::Side,
        timestamp: DateTime<Utc>,
    },
    OrderCancellation {
        order_id: String,
        reason: String,
    },
    Stop,
}

impl SessionEvent {
    fn is_stop(&self) -> bool {
        matches!(self, SessionEvent::Stop)
    }
}

/// Caller-supplied handler invoked once per dispatched event. Errors are
/// logged by the worker and never kill it.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: SessionEvent) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Default)]
pub struct QueueStatistics {
    pub total: u64,
    pub processed: u64,
    pub failed: u64,
    pub dropped: u64,
    pub peak_size: usize,
}

struct Inner {
    queue: VecDeque<SessionEvent>,
    capacity: usize,
    stats: QueueStatistics,
    last_activity: std::time::Instant,
}

/// Bounded FIFO backing a single-consumer worker task.
pub struct SessionEventQueue {
    inner: Arc<Mutex<Inner>>,
    notify: Arc<Notify>,
    total_counter: Arc<AtomicU64>,
}

impl SessionEventQueue {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                queue: VecDeque::with_capacity(capacity.min(64)),
                capacity,
                stats: QueueStatistics::default(),
                last_activity: std::time::Instant::now(),
            })),
            notify: Arc::new(Notify::new()),
            total_counter: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Non-blocking enqueue. Drops the event (incrementing `dropped`) if the
    /// queue is full — unless it's a `Stop`, which evicts up to
    /// `STOP_EVICTION_BUDGET` older non-Stop events to make room.
    pub async fn add_event(&self, event: SessionEvent) {
        let mut inner = self.inner.lock().await;
        inner.last_activity = std::time::Instant::now();
        inner.stats.total += 1;
        self.total_counter.fetch_add(1, Ordering::Relaxed);

        if inner.queue.len() >= inner.capacity {
            if event.is_stop() {
                let mut evicted = 0;
                while evicted < STOP_EVICTION_BUDGET && inner.queue.len() >= inner.capacity {
                    if let Some(pos) = inner.queue.iter().position(|e| !e.is_stop()) {
                        inner.queue.remove(pos);
                        evicted += 1;
                        inner.stats.dropped += 1;
                    } else {
                        break;
                    }
                }
            } else {
                warn!("session event queue full (capacity={}) — dropping event", inner.capacity);
                inner.stats.dropped += 1;
                return;
            }
        }

        inner.queue.push_back(event);
        inner.stats.peak_size = inner.stats.peak_size.max(inner.queue.len());
        drop(inner);
        self.notify.notify_one();
    }

    /// Blocking variant for critical events: waits up to `timeout` for room.
    pub async fn add_event_with_timeout(&self, event: SessionEvent, timeout: Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        loop {
            {
                let mut inner = self.inner.lock().await;
                if inner.queue.len() < inner.capacity {
                    inner.last_activity = std::time::Instant::now();
                    inner.stats.total += 1;
                    self.total_counter.fetch_add(1, Ordering::Relaxed);
                    inner.queue.push_back(event);
                    inner.stats.peak_size = inner.stats.peak_size.max(inner.queue.len());
                    drop(inner);
                    self.notify.notify_one();
                    return true;
                }
            }
            if std::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    async fn pop(&self) -> Option<SessionEvent> {
        self.inner.lock().await.queue.pop_front()
    }

    async fn purge_if_stale(&self) {
        let mut inner = self.inner.lock().await;
        if !inner.queue.is_empty() && inner.last_activity.elapsed() > STALE_AFTER {
            warn!("session event queue stale for >{:?}; purging {} events", STALE_AFTER, inner.queue.len());
            inner.stats.dropped += inner.queue.len() as u64;
            inner.queue.clear();
        }
    }

    pub async fn statistics(&self) -> QueueStatistics {
        self.inner.lock().await.stats.clone()
    }

    /// Runs the single-consumer worker loop until a `Stop` event is drained.
    /// `get` polls with a 1s timeout so stale-cleanup runs periodically even
    /// when idle.
    pub async fn run_worker(&self, handler: Arc<dyn EventHandler>) {
        loop {
            let event = tokio::time::timeout(WORKER_POLL_TIMEOUT, async {
                loop {
                    if let Some(e) = self.pop().await {
                        return e;
                    }
                    self.notify.notified().await;
                }
            })
            .await;

            let event = match event {
                Ok(e) => e,
                Err(_) => {
                    self.purge_if_stale().await;
                    continue;
                }
            };

            let is_stop = event.is_stop();
            debug!("dispatching session event");

            match handler.handle(event).await {
                Ok(()) => {
                    let mut inner = self.inner.lock().await;
                    inner.stats.processed += 1;
                }
                Err(e) => {
                    error!("session event handler failed: {:#}", e);
                    let mut inner = self.inner.lock().await;
                    inner.stats.failed += 1;
                }
            }

            if is_stop {
                // Drain remaining events without dispatching further work.
                let mut inner = self.inner.lock().await;
                let remaining = inner.queue.len();
                if remaining > 0 {
                    debug!("draining {} undispatched events on stop", remaining);
                }
                inner.queue.clear();
                break;
            }
        }
    }
}

impl Default for SessionEventQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct CountingHandler {
        count: AtomicUsize,
    }

    #[async_trait]
    impl EventHandler for CountingHandler {
        async fn handle(&self, _event: SessionEvent) -> anyhow::Result<()> {
            self.count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn events_are_dispatched_in_enqueue_order() {
        let queue = Arc::new(SessionEventQueue::new());
        let handler = Arc::new(CountingHandler { count: AtomicUsize::new(0) });

        for _ in 0..5 {
            queue
                .add_event(SessionEvent::OrderCancellation { order_id: "x".into(), reason: "r".into() })
                .await;
        }
        queue.add_event(SessionEvent::Stop).await;

        queue.run_worker(handler.clone()).await;
        assert_eq!(handler.count.load(Ordering::SeqCst), 6);

        let stats = queue.statistics().await;
        assert_eq!(stats.processed, 6);
    }

    #[tokio::test]
    async fn stop_evicts_older_events_when_full() {
        let queue = SessionEventQueue::with_capacity(3);
        for _ in 0..3 {
            queue
                .add_event(SessionEvent::OrderCancellation { order_id: "x".into(), reason: "r".into() })
                .await;
        }
        queue.add_event(SessionEvent::Stop).await;
        let stats = queue.statistics().await;
        assert!(stats.dropped >= 1);
    }

    #[tokio::test]
    async fn handler_errors_do_not_kill_worker() {
        struct FlakyHandler;
        #[async_trait]
        impl EventHandler for FlakyHandler {
            async fn handle(&self, event: SessionEvent) -> anyhow::Result<()> {
                if matches!(event, SessionEvent::OrderCancellation { .. }) {
                    anyhow::bail!("boom");
                }
                Ok(())
            }
        }

        let queue = Arc::new(SessionEventQueue::new());
        queue
            .add_event(SessionEvent::OrderCancellation { order_id: "x".into(), reason: "r".into() })
            .await;
        queue.add_event(SessionEvent::Stop).await;

        queue.run_worker(Arc::new(FlakyHandler)).await;
        let stats = queue.statistics().await;
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.processed, 1);
    }
}

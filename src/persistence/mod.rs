//! ═══════════════════════════════════════════════════════════════════════════
//! 💾 PERSISTENCE — external storage adapter for session summaries
//!
//! Storage itself is out of scope; this crate only specifies the documents
//! and ships a logging no-op so the orchestrator has somewhere to write
//! without pulling in a database dependency.
//! ═══════════════════════════════════════════════════════════════════════════

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::info;
use rust_decimal::Decimal;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct GridSummary {
    pub session_id: String,
    pub symbol: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_secs: i64,
    pub total_profit: Decimal,
    pub grid_profit: Decimal,
    pub unpaired_profit: Decimal,
    pub arbitrage_count: u64,
    pub stop_reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CopyTradeDocument {
    pub leader_id: String,
    pub follower_id: String,
    pub leader_order_id: String,
    pub status: String,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CopyFollowerDocument {
    pub follower_id: String,
    pub leader_id: String,
    pub copy_ratio: Decimal,
    pub started_at: DateTime<Utc>,
}

/// External storage boundary. A production implementation would write these
/// to whatever store `PERSISTENCE_URI` names; the in-tree default just logs.
#[async_trait]
pub trait SummarySink: Send + Sync {
    async fn save_grid_summary(&self, summary: &GridSummary);
    async fn save_copy_trade(&self, doc: &CopyTradeDocument);
    async fn save_copy_follower(&self, doc: &CopyFollowerDocument);
}

/// Default sink: logs each document at info level, does not persist it anywhere.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingSink;

#[async_trait]
impl SummarySink for LoggingSink {
    async fn save_grid_summary(&self, summary: &GridSummary) {
        info!(
            "grid_summary session={} symbol={} total_profit={} arbitrage_count={} stop_reason={}",
            summary.session_id, summary.symbol, summary.total_profit, summary.arbitrage_count, summary.stop_reason
        );
    }

    async fn save_copy_trade(&self, doc: &CopyTradeDocument) {
        info!("copy_trade leader={} follower={} status={}", doc.leader_id, doc.follower_id, doc.status);
    }

    async fn save_copy_follower(&self, doc: &CopyFollowerDocument) {
        info!("copy_follower follower={} leader={} ratio={}", doc.follower_id, doc.leader_id, doc.copy_ratio);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn logging_sink_accepts_a_summary_without_panicking() {
        let sink = LoggingSink;
        sink.save_grid_summary(&GridSummary {
            session_id: "s1".into(),
            symbol: "PERP_BTC_USDC".into(),
            start_time: Utc::now(),
            end_time: Utc::now(),
            duration_secs: 10,
            total_profit: dec!(42),
            grid_profit: dec!(40),
            unpaired_profit: dec!(2),
            arbitrage_count: 3,
            stop_reason: "external_signal".into(),
        })
        .await;
    }
}

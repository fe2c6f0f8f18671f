//! ═══════════════════════════════════════════════════════════════════════════
//! 👥 COPY TRADING SESSION MANAGER — process-wide leader/follower registry
//!
//! One instance per process. Wires `LeaderMonitor`s to `CopyTradingBot`s and
//! enforces the trading-mode mutex: a user may be a grid trader, a copy
//! leader, or a copy follower, never more than one at a time.
//!
//! Two separate locks guard leaders and followers (§5): never acquire one
//! while holding the other, to keep leader-activation and follower-start
//! from deadlocking against each other.
//! ═══════════════════════════════════════════════════════════════════════════

use crate::copy_bot::{CopyTradingBot, CopyTradingCallback, FollowerStatistics};
use crate::error::SessionManagerError;
use crate::exchange::ExchangeClient;
use crate::leader_monitor::LeaderMonitor;
use crate::risk_controller::{RiskController, RiskLimits};
use log::info;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TradingMode {
    Grid,
    CopyLeader,
    CopyFollower,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LeaderStatus {
    Pending,
    Approved,
    Active,
    Rejected,
}

struct LeaderEntry {
    status: LeaderStatus,
    monitor: Option<Arc<LeaderMonitor>>,
}

struct FollowerEntry {
    leader_id: String,
    bot: Arc<CopyTradingBot>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FollowerStatus {
    pub leader_id: String,
    pub statistics: FollowerStatistics,
}

/// Process-wide registry; create exactly one and share it behind an `Arc`.
pub struct CopyTradingSessionManager {
    trading_modes: Mutex<HashMap<String, TradingMode>>,
    leaders: Mutex<HashMap<String, LeaderEntry>>,
    followers: Mutex<HashMap<String, FollowerEntry>>,
}

impl Default for CopyTradingSessionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl CopyTradingSessionManager {
    pub fn new() -> Self {
        Self {
            trading_modes: Mutex::new(HashMap::new()),
            leaders: Mutex::new(HashMap::new()),
            followers: Mutex::new(HashMap::new()),
        }
    }

    async fn claim_mode(&self, user_id: &str, mode: TradingMode) -> Result<(), SessionManagerError> {
        let mut modes = self.trading_modes.lock().await;
        match modes.get(user_id) {
            Some(existing) if *existing != mode => Err(SessionManagerError::TradingModeConflict {
                user_id: user_id.to_string(),
                current: *existing,
                requested: mode,
            }),
            _ => {
                modes.insert(user_id.to_string(), mode);
                Ok(())
            }
        }
    }

    async fn release_mode(&self, user_id: &str) {
        self.trading_modes.lock().await.remove(user_id);
    }

    /// Registers a prospective leader in `Pending` state, awaiting admin review.
    pub async fn register_leader(&self, user_id: impl Into<String>) {
        let user_id = user_id.into();
        let mut leaders = self.leaders.lock().await;
        leaders.entry(user_id.clone()).or_insert(LeaderEntry { status: LeaderStatus::Pending, monitor: None });
        info!("leader {} registered (pending approval)", user_id);
    }

    pub async fn approve_leader(&self, user_id: &str) -> Result<(), SessionManagerError> {
        let mut leaders = self.leaders.lock().await;
        let entry = leaders.get_mut(user_id).ok_or_else(|| SessionManagerError::LeaderNotFound(user_id.to_string()))?;
        entry.status = LeaderStatus::Approved;
        info!("leader {} approved", user_id);
        Ok(())
    }

    pub async fn reject_leader(&self, user_id: &str) -> Result<(), SessionManagerError> {
        let mut leaders = self.leaders.lock().await;
        let entry = leaders.get_mut(user_id).ok_or_else(|| SessionManagerError::LeaderNotFound(user_id.to_string()))?;
        entry.status = LeaderStatus::Rejected;
        info!("leader {} rejected", user_id);
        Ok(())
    }

    /// Activates an approved leader: claims the trading-mode mutex for
    /// `CopyLeader`, then starts a `LeaderMonitor` if one isn't running yet.
    pub async fn activate_leader(&self, user_id: &str) -> Result<Arc<LeaderMonitor>, SessionManagerError> {
        self.claim_mode(user_id, TradingMode::CopyLeader).await?;

        let mut leaders = self.leaders.lock().await;
        let entry = leaders.get_mut(user_id).ok_or_else(|| SessionManagerError::LeaderNotFound(user_id.to_string()))?;
        if entry.status != LeaderStatus::Approved && entry.status != LeaderStatus::Active {
            return Err(SessionManagerError::LeaderNotApproved(user_id.to_string()));
        }

        if entry.monitor.is_none() {
            entry.monitor = Some(Arc::new(LeaderMonitor::new(user_id)));
        }
        entry.status = LeaderStatus::Active;
        info!("leader {} activated", user_id);
        Ok(entry.monitor.clone().expect("just set"))
    }

    /// Validates both parties, creates a `CopyTradingBot`, and subscribes it
    /// to the leader's monitor. Claims the `CopyFollower` mode for `follower_id`.
    pub async fn start_following(
        &self,
        follower_id: impl Into<String>,
        leader_id: &str,
        copy_ratio: Decimal,
        risk_limits: RiskLimits,
        client: Arc<dyn ExchangeClient>,
    ) -> Result<Arc<CopyTradingBot>, SessionManagerError> {
        let follower_id = follower_id.into();
        risk_limits.validate().map_err(|e| SessionManagerError::InvalidRiskLimits(e.to_string()))?;

        self.claim_mode(&follower_id, TradingMode::CopyFollower).await?;

        let monitor = {
            let leaders = self.leaders.lock().await;
            let entry = leaders.get(leader_id).ok_or_else(|| SessionManagerError::LeaderNotFound(leader_id.to_string()))?;
            if entry.status != LeaderStatus::Active {
                self.release_mode(&follower_id).await;
                return Err(SessionManagerError::LeaderNotApproved(leader_id.to_string()));
            }
            entry.monitor.clone().ok_or_else(|| SessionManagerError::LeaderNotApproved(leader_id.to_string()))?
        };

        let risk = Arc::new(RiskController::new(follower_id.clone(), risk_limits));
        let bot = Arc::new(CopyTradingBot::new(follower_id.clone(), copy_ratio, client, risk));

        monitor
            .register_trade_callback(follower_id.clone(), Arc::new(CopyTradingCallback(bot.clone())))
            .await;

        self.followers.lock().await.insert(follower_id.clone(), FollowerEntry { leader_id: leader_id.to_string(), bot: bot.clone() });
        info!("follower {} started following leader {} at ratio {}", follower_id, leader_id, copy_ratio);
        Ok(bot)
    }

    /// Tears down a follower's bot and unregisters its leader callback.
    pub async fn stop_following(&self, follower_id: &str) -> Result<(), SessionManagerError> {
        let entry = self
            .followers
            .lock()
            .await
            .remove(follower_id)
            .ok_or_else(|| SessionManagerError::FollowerNotFound(follower_id.to_string()))?;

        entry.bot.stop();

        let leaders = self.leaders.lock().await;
        if let Some(leader) = leaders.get(&entry.leader_id) {
            if let Some(monitor) = &leader.monitor {
                monitor.unregister_follower(follower_id).await;
            }
        }
        drop(leaders);

        self.release_mode(follower_id).await;
        info!("follower {} stopped following leader {}", follower_id, entry.leader_id);
        Ok(())
    }

    pub async fn follower_status(&self, follower_id: &str) -> Option<FollowerStatus> {
        let followers = self.followers.lock().await;
        let entry = followers.get(follower_id)?;
        Some(FollowerStatus { leader_id: entry.leader_id.clone(), statistics: entry.bot.statistics().await })
    }

    pub async fn leader_status(&self, user_id: &str) -> Option<LeaderStatus> {
        self.leaders.lock().await.get(user_id).map(|e| e.status)
    }

    /// Claims the `Grid` trading mode for a user, rejecting it if the user
    /// is already an active leader or follower.
    pub async fn claim_grid_mode(&self, user_id: &str) -> Result<(), SessionManagerError> {
        self.claim_mode(user_id, TradingMode::Grid).await
    }

    pub async fn release_grid_mode(&self, user_id: &str) {
        self.release_mode(user_id).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::SimulatedExchangeClient;
    use rust_decimal_macros::dec;

    fn limits() -> RiskLimits {
        RiskLimits {
            max_per_trade_amount: dec!(100000),
            daily_max_loss: dec!(500),
            max_position_count: 5,
            max_position_value: dec!(1000000),
            max_single_position_ratio: dec!(0.9),
        }
    }

    #[tokio::test]
    async fn leader_lifecycle_register_approve_activate() {
        let mgr = CopyTradingSessionManager::new();
        mgr.register_leader("alice").await;
        assert_eq!(mgr.leader_status("alice").await, Some(LeaderStatus::Pending));

        mgr.approve_leader("alice").await.unwrap();
        assert_eq!(mgr.leader_status("alice").await, Some(LeaderStatus::Approved));

        mgr.activate_leader("alice").await.unwrap();
        assert_eq!(mgr.leader_status("alice").await, Some(LeaderStatus::Active));
    }

    #[tokio::test]
    async fn activation_without_approval_fails() {
        let mgr = CopyTradingSessionManager::new();
        mgr.register_leader("bob").await;
        let err = mgr.activate_leader("bob").await.unwrap_err();
        assert!(matches!(err, SessionManagerError::LeaderNotApproved(_)));
    }

    #[tokio::test]
    async fn start_following_subscribes_bot_to_leader_monitor() {
        let mgr = CopyTradingSessionManager::new();
        mgr.register_leader("alice").await;
        mgr.approve_leader("alice").await.unwrap();
        mgr.activate_leader("alice").await.unwrap();

        let client = Arc::new(SimulatedExchangeClient::new());
        let bot = mgr.start_following("carol", "alice", dec!(0.1), limits(), client).await.unwrap();
        assert!(bot.is_running());

        let status = mgr.follower_status("carol").await.unwrap();
        assert_eq!(status.leader_id, "alice");
    }

    #[tokio::test]
    async fn trading_mode_conflict_rejects_grid_and_leader_simultaneously() {
        let mgr = CopyTradingSessionManager::new();
        mgr.claim_grid_mode("dave").await.unwrap();
        mgr.register_leader("dave").await;
        mgr.approve_leader("dave").await.unwrap();

        let err = mgr.activate_leader("dave").await.unwrap_err();
        assert!(matches!(err, SessionManagerError::TradingModeConflict { .. }));
    }

    #[tokio::test]
    async fn stop_following_releases_trading_mode() {
        let mgr = CopyTradingSessionManager::new();
        mgr.register_leader("alice").await;
        mgr.approve_leader("alice").await.unwrap();
        mgr.activate_leader("alice").await.unwrap();

        let client = Arc::new(SimulatedExchangeClient::new());
        mgr.start_following("carol", "alice", dec!(0.1), limits(), client).await.unwrap();
        mgr.stop_following("carol").await.unwrap();

        // mode released: carol can now become a grid trader
        mgr.claim_grid_mode("carol").await.unwrap();
    }
}

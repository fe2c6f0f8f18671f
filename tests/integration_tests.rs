use perp_grid_engine::config::ConfigLoader;
use perp_grid_engine::copy_session_manager::CopyTradingSessionManager;
use perp_grid_engine::exchange::SimulatedExchangeClient;
use perp_grid_engine::grid::{Direction, GridConfig, GridType};
use perp_grid_engine::grid_bot::GridTradingBot;
use perp_grid_engine::market::{MarketInfo, MarketValidator};
use perp_grid_engine::persistence::LoggingSink;
use perp_grid_engine::risk_controller::{RiskController, RiskLimits};
use perp_grid_engine::types::Side;
use chrono::Utc;
use rust_decimal_macros::dec;
use serde_json::json;
use std::sync::Arc;

fn market() -> Arc<MarketValidator> {
    Arc::new(MarketValidator::new().with_market(MarketInfo::new("PERP_BTC_USDC", dec!(0.1), dec!(0.0001), dec!(10))))
}

fn grid_config() -> GridConfig {
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

fn risk_limits() -> RiskLimits {
    RiskLimits {
        max_per_trade_amount: dec!(500),
        daily_max_loss: dec!(500),
        max_position_count: 5,
        max_position_value: dec!(1000000),
        max_single_position_ratio: dec!(0.9),
    }
}

/// A full grid session: start places every initial level, a fill on one of
/// them produces a counter signal, and stop tears everything down cleanly.
#[tokio::test]
async fn grid_session_starts_fills_and_stops_cleanly() {
    let bot = Arc::new(
        GridTradingBot::new("integration-session", grid_config(), market(), Arc::new(SimulatedExchangeClient::new()), Arc::new(LoggingSink))
            .unwrap(),
    );

    bot.start_grid_trading().await.unwrap();
    let stats_after_start = bot.stats().await;
    assert!(stats_after_start.orders_created > 0, "initial grid should place resting orders");

    bot.stop_grid_trading("integration_test_stop").await.unwrap();
    let stats_after_stop = bot.stats().await;
    assert!(!bot.is_running());
    assert_eq!(stats_after_stop.orders_cancelled, stats_after_start.orders_created);
}

/// End-to-end copy-trading fan-out: a leader's execution report reaches a
/// registered follower's bot and is recorded in its statistics.
#[tokio::test]
async fn copy_trading_fan_out_delivers_leader_fills_to_followers() {
    let mgr = CopyTradingSessionManager::new();
    mgr.register_leader("leader-1").await;
    mgr.approve_leader("leader-1").await.unwrap();
    let monitor = mgr.activate_leader("leader-1").await.unwrap();

    let client = Arc::new(SimulatedExchangeClient::new());
    let bot = mgr.start_following("follower-1", "leader-1", dec!(0.1), risk_limits(), client).await.unwrap();
    assert!(bot.is_running());

    let report = json!({
        "orderId": "L-1001",
        "symbol": "PERP_BTC_USDC",
        "side": "BUY",
        "status": "FILLED",
        "executedPrice": "42000.50",
        "executedQty": "1.0",
        "type": "LIMIT",
        "reduceOnly": false,
    });
    monitor.handle_execution_report(&report).await;

    // fan-out is fire-and-forget; give the spawned callback a chance to run.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let status = mgr.follower_status("follower-1").await.unwrap();
    assert_eq!(status.leader_id, "leader-1");
    assert_eq!(status.statistics.total_trades, 1);
    assert_eq!(status.statistics.successful_trades, 1);
}

/// A copy trade whose notional blows past the per-trade limit by more than
/// the 10% adjustment threshold is rejected outright with risk_score 100.
#[tokio::test]
async fn oversized_copy_trade_is_rejected_with_full_risk_score() {
    let controller = RiskController::new("follower-1", risk_limits());
    let event = perp_grid_engine::leader_monitor::LeaderTradeEvent {
        leader_id: "leader-1".into(),
        order_id: "L-2".into(),
        symbol: "PERP_BTC_USDC".into(),
        side: Side::Buy,
        order_type: perp_grid_engine::leader_monitor::LeaderOrderType::Market,
        price: dec!(42000),
        quantity: dec!(10),
        action: perp_grid_engine::leader_monitor::LeaderTradeAction::Open,
        timestamp: Utc::now(),
        raw_payload: json!({}),
    };

    let result = controller.validate_trade(&event, dec!(1.0), None).await;
    assert!(!result.is_valid);
    assert_eq!(result.risk_score, 100.0);
}

#[test]
fn config_loader_round_trips_a_toml_file() {
    let dir = std::env::temp_dir().join(format!("perp-grid-engine-integration-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("session.toml");
    std::fs::write(
        &path,
        r#"
        orderly_key = "k"
        orderly_secret = "s"
        orderly_account_id = "a"
        orderly_testnet = true

        [grid]
        symbol = "PERP_ETH_USDC"
        grid_levels = 8
        per_grid_margin = 25
        leverage = 2
        grid_type = "geometric"
        direction = "long"
        corridor_width_pct = 0.08

        [risk]
        max_per_trade_amount = 200
        daily_max_loss = 100
        max_position_count = 4
        max_position_value = 5000
        max_single_position_ratio = 0.4
        "#,
    )
    .unwrap();

    let config = ConfigLoader::from_file(path).unwrap();
    assert_eq!(config.grid.symbol, "PERP_ETH_USDC");
    assert_eq!(config.grid.grid_levels, 8);
    assert!(config.exchange.orderly_testnet);

    std::fs::remove_dir_all(&dir).ok();
}

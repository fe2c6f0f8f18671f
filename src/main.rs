//! ═══════════════════════════════════════════════════════════════════════════
//! PERP GRID ENGINE — CLI entry point
//!
//! Starts one `GridTradingBot` session against the configured symbol, drives
//! its event queue until `Ctrl+C`, then stops the session gracefully (cancel
//! all resting orders, close any residual position, persist the summary).
//! ═══════════════════════════════════════════════════════════════════════════

use perp_grid_engine::config::{Config, ConfigLoader};
use perp_grid_engine::grid::{Direction, GridConfig, GridType};
use perp_grid_engine::grid_bot::GridTradingBot;
use perp_grid_engine::market::{MarketInfo, MarketValidator};
use perp_grid_engine::persistence::LoggingSink;
use perp_grid_engine::{init, init_with_config};

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use colored::Colorize;
use log::{error, info, warn};
use rust_decimal::Decimal;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Parser, Debug)]
#[clap(name = "perp-grid-engine", author, version, about = "Automated perpetual-futures grid trading engine", long_about = None)]
struct Args {
    /// Configuration file to load directly, bypassing the default/environment layering.
    #[clap(short, long)]
    config: Option<PathBuf>,

    /// Session identifier; defaults to a timestamp-derived id.
    #[clap(short, long)]
    session_id: Option<String>,

    /// Override the configured symbol (e.g. PERP_ETH_USDC).
    #[clap(long)]
    symbol: Option<String>,

    /// Enable debug logging.
    #[clap(long)]
    debug: bool,

    /// Enable trace logging (very verbose).
    #[clap(long)]
    trace: bool,
}

fn setup_logging(args: &Args) {
    if args.trace {
        std::env::set_var("RUST_LOG", "trace");
    } else if args.debug {
        std::env::set_var("RUST_LOG", "debug");
    }
}

fn load_configuration(args: &Args) -> Result<Config> {
    match &args.config {
        Some(path) => ConfigLoader::from_file(path.clone()).with_context(|| format!("loading config file {}", path.display())),
        None => ConfigLoader::new()
            .with_defaults()
            .with_environment()
            .with_env_file()
            .build()
            .context("assembling layered configuration (set ORDERLY_KEY / ORDERLY_SECRET / ORDERLY_ACCOUNT_ID if this failed on missing credentials)"),
    }
}

fn print_banner(config: &Config) {
    let border = "═".repeat(70);
    println!("\n{}", border.cyan());
    println!("  {}", format!("PERP GRID ENGINE v{}", perp_grid_engine::version()).bold());
    println!("{}", border.cyan());
    println!("  Symbol:      {}", config.grid.symbol);
    println!("  Grid type:   {} / {}", config.grid.grid_type, config.grid.direction);
    println!("  Levels:      {}", config.grid.grid_levels);
    println!("  Testnet:     {}", config.exchange.orderly_testnet);
    println!("{}\n", border.cyan());
}

fn parse_direction(s: &str) -> Result<Direction> {
    match s.to_lowercase().as_str() {
        "long" => Ok(Direction::Long),
        "short" => Ok(Direction::Short),
        "both" => Ok(Direction::Both),
        other => Err(anyhow!("unknown grid direction: {other}")),
    }
}

fn parse_grid_type(s: &str, geometric_ratio: Decimal) -> Result<GridType> {
    match s.to_lowercase().as_str() {
        "arithmetic" => Ok(GridType::Arithmetic),
        "geometric" => Ok(GridType::Geometric(geometric_ratio)),
        other => Err(anyhow!("unknown grid type: {other}")),
    }
}

/// Builds the bot's `GridConfig` from settings plus a live corridor centered
/// on `current_price`; corridor half-width comes from `corridor_width_pct`.
fn build_grid_config(config: &Config, symbol: String, current_price: Decimal) -> Result<GridConfig> {
    let half_width = current_price * config.grid.corridor_width_pct;
    Ok(GridConfig {
        symbol,
        lower: current_price - half_width,
        current: current_price,
        upper: current_price + half_width,
        grid_levels: config.grid.grid_levels,
        direction: parse_direction(&config.grid.direction)?,
        grid_type: parse_grid_type(&config.grid.grid_type, Decimal::new(102, 3))?,
        total_margin: config.grid.per_grid_margin * Decimal::from(config.grid.grid_levels),
        tick_size: Decimal::new(1, 2),
        stop_bot_price: None,
        stop_top_price: None,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    setup_logging(&args);
    init()?;

    let mut config = load_configuration(&args)?;
    if let Some(symbol) = &args.symbol {
        config.grid.symbol = symbol.clone();
    }
    init_with_config(&config)?;
    print_banner(&config);

    let session_id = args.session_id.clone().unwrap_or_else(|| format!("session-{}", std::process::id()));

    // A real deployment resolves this from the venue's current mark price;
    // simulated sessions seed the corridor around a fixed reference instead.
    let current_price = Decimal::new(42000, 0);

    let market = Arc::new(
        MarketValidator::new().with_market(MarketInfo::new(config.grid.symbol.clone(), Decimal::new(1, 1), Decimal::new(1, 4), Decimal::new(10, 0))),
    );

    let grid_config = build_grid_config(&config, config.grid.symbol.clone(), current_price)?;

    let client = Arc::new(perp_grid_engine::exchange::SimulatedExchangeClient::new());
    let sink = Arc::new(LoggingSink);

    let bot = Arc::new(
        GridTradingBot::new(session_id.clone(), grid_config, market, client, sink)
            .context("failed to construct grid trading session")?,
    );

    bot.start_grid_trading().await.context("failed to start grid trading")?;
    info!("session {} running; press Ctrl+C to stop", session_id);

    let worker_bot = bot.clone();
    let worker = tokio::spawn(async move { worker_bot.run().await });

    let shutdown_requested = Arc::new(AtomicBool::new(false));
    let shutdown_flag = shutdown_requested.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to listen for shutdown signal: {}", e);
            return;
        }
        warn!("Ctrl+C received, shutting down session");
        shutdown_flag.store(true, Ordering::SeqCst);
    });

    while !shutdown_requested.load(Ordering::SeqCst) {
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    }

    bot.stop_grid_trading("external_signal").await.context("failed to stop grid trading cleanly")?;
    bot.event_queue().add_event(perp_grid_engine::SessionEvent::Stop).await;
    worker.await.ok();

    let stats = bot.stats().await;
    info!(
        "session {} stopped: created={} filled={} cancelled={} rejected={} restorations={}",
        session_id, stats.orders_created, stats.orders_filled, stats.orders_cancelled, stats.orders_rejected, stats.restorations
    );

    println!("\n{}", "Session complete.".green().bold());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_direction_accepts_known_values() {
        assert!(matches!(parse_direction("long").unwrap(), Direction::Long));
        assert!(matches!(parse_direction("BOTH").unwrap(), Direction::Both));
        assert!(parse_direction("sideways").is_err());
    }

    #[test]
    fn parse_grid_type_accepts_known_values() {
        assert!(matches!(parse_grid_type("arithmetic", Decimal::ONE).unwrap(), GridType::Arithmetic));
        assert!(matches!(parse_grid_type("geometric", Decimal::new(102, 3)).unwrap(), GridType::Geometric(_)));
        assert!(parse_grid_type("fibonacci", Decimal::ONE).is_err());
    }
}

//! Multi-source config assembly: defaults → `config/{env}.toml` → `.env` →
//! environment variables (`ORDERLY_KEY`, `ORDERLY_SECRET`, `ORDERLY_ACCOUNT_ID`,
//! `ORDERLY_TESTNET`, `FRONTEND_URL`, `CORS_ORIGINS`, and `GRID__*`/`RISK__*`
//! for nested fields), in that order of increasing precedence.

use super::Config;
use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File};
use std::env;
use std::path::PathBuf;

#[derive(Default)]
pub struct ConfigLoader {
    builder: config::builder::ConfigBuilder<config::builder::DefaultState>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { builder: ConfigBuilder::builder() }
    }

    /// Layers in `config/default.toml` if it exists; safe to call on a bare
    /// checkout with no config directory at all.
    pub fn with_defaults(mut self) -> Self {
        self.builder = self.builder.add_source(File::with_name("config/default").required(false));
        self
    }

    /// Layers in `config/{RUST_ENV}.toml`, defaulting to `development`.
    pub fn with_environment(mut self) -> Self {
        let env = env::var("RUST_ENV").unwrap_or_else(|_| "development".to_string());
        self.builder = self.builder.add_source(File::with_name(&format!("config/{env}")).required(false));
        self
    }

    /// Loads a `.env` file (if present) into the process environment, then
    /// layers environment variables over everything so far. Unprefixed names
    /// (`ORDERLY_KEY`, `FRONTEND_URL`, ...) land on the flattened top-level
    /// fields; `GRID__SYMBOL`-style double-underscore names reach nested ones.
    pub fn with_env_file(mut self) -> Self {
        dotenv::dotenv().ok();
        self.builder = self.builder.add_source(Environment::default().separator("__"));
        self
    }

    /// CLI flag overrides are applied by the caller after `build()`; `clap`
    /// owns argument parsing, this loader only owns file/env layering.
    pub fn with_cli_overrides(self) -> Self {
        self
    }

    pub fn build(self) -> Result<Config> {
        let raw = self.builder.build().context("failed to assemble configuration sources")?;
        let config: Config = raw.try_deserialize().context("failed to parse configuration")?;
        config.validate_all()?;
        Ok(config)
    }

    /// Loads a single file directly, bypassing the default/environment/env-var
    /// layering. Used by tests and by `--config <path>` overrides.
    pub fn from_file(path: PathBuf) -> Result<Config> {
        let raw = ConfigBuilder::builder()
            .add_source(File::from(path))
            .build()
            .context("failed to load config file")?;
        let config: Config = raw.try_deserialize().context("failed to parse configuration")?;
        config.validate_all()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_optional_config_files_do_not_error() {
        // No config/ directory exists in the test environment; required(false)
        // must still produce a buildable (empty) source set.
        let loader = ConfigLoader::new().with_defaults().with_environment();
        assert!(loader.builder.build().is_ok());
    }

    #[test]
    fn from_file_loads_and_validates_a_toml_config() {
        let dir = std::env::temp_dir().join(format!("perp-grid-engine-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("test_config.toml");
        std::fs::write(
            &path,
            r#"
            orderly_key = "k"
            orderly_secret = "s"
            orderly_account_id = "a"

            [grid]
            symbol = "PERP_BTC_USDC"
            grid_levels = 10
            per_grid_margin = 50
            leverage = 3
            grid_type = "arithmetic"
            direction = "both"
            corridor_width_pct = 0.1

            [risk]
            max_per_trade_amount = 1000
            daily_max_loss = 500
            max_position_count = 10
            max_position_value = 50000
            max_single_position_ratio = 0.5
            "#,
        )
        .unwrap();

        let config = ConfigLoader::from_file(path).unwrap();
        assert_eq!(config.grid.symbol, "PERP_BTC_USDC");
        std::fs::remove_dir_all(&dir).ok();
    }
}

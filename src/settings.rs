// File: src/settings.rs
// Layered configuration: embedded defaults, optional TOML file, EXPLORER__* environment

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Result, ensure};
use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;

use crate::data_models::PriceWindow;
use crate::sync::SyncSettings;

const DEFAULT_CONFIG: &str = include_str!("../config.default.toml");

/// Shortest poll interval accepted from configuration
pub const MIN_POLL_INTERVAL_MS: u64 = 250;

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub repository: RepositoryConfig,
    pub market: MarketConfig,
    pub sync: SyncConfig,
    /// Log destination; TUI mode discards logs when unset
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

/// Block repository API endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct RepositoryConfig {
    pub base_url: String,
    pub timeout_secs: u64,
    pub recent_limit: usize,
}

/// Market data provider endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct MarketConfig {
    pub base_url: String,
    pub coin_id: String,
    /// Ticker used to look up market dominance
    pub symbol: String,
    pub timeout_secs: u64,
    pub price_window_days: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    pub poll_interval_ms: u64,
}

impl SyncConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl AppConfig {
    /// Load defaults, then `path` if given, then environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder()
            .add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml));
        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }
        let config = builder
            .add_source(
                Environment::with_prefix("EXPLORER")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Self::from_config(config)
    }

    fn from_config(config: Config) -> Result<Self> {
        let app: AppConfig = config.try_deserialize()?;
        app.validate()?;
        Ok(app)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(self.repository.recent_limit > 0, "repository.recent_limit must be positive");
        ensure!(self.repository.timeout_secs > 0, "repository.timeout_secs must be positive");
        ensure!(self.market.timeout_secs > 0, "market.timeout_secs must be positive");
        ensure!(self.market.price_window_days > 0, "market.price_window_days must be positive");
        ensure!(!self.market.coin_id.trim().is_empty(), "market.coin_id must not be empty");
        ensure!(
            self.sync.poll_interval_ms >= MIN_POLL_INTERVAL_MS,
            "sync.poll_interval_ms must be at least {MIN_POLL_INTERVAL_MS}"
        );
        Ok(())
    }

    /// Settings consumed by the synchronizer
    pub fn sync_settings(&self) -> SyncSettings {
        SyncSettings {
            block_limit: self.repository.recent_limit,
            price_window: PriceWindow {
                days: self.market.price_window_days,
            },
        }
    }
}

// File: src/main.rs
// Blockchain explorer client: view-model synchronizer with TUI, Web and one-shot CLI presentation

use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{
    EnvFilter, Layer as _, Registry, fmt, fmt::writer::BoxMakeWriter, layer::SubscriberExt as _,
    util::SubscriberInitExt as _,
};

// Gateways and domain types
mod block_gateway;
mod data_models;
mod demo;
mod error;
mod market_gateway;
mod settings;
mod sync;

// Presentation adapters
mod cli_interface;
mod tui_dashboard;
mod web_server;

use crate::block_gateway::{BlockRepository, HttpBlockRepository};
use crate::market_gateway::{CoinGeckoMarketData, MarketData};
use crate::settings::AppConfig;
use crate::sync::Synchronizer;

/// Command-line interface definition for the chain explorer
#[derive(Parser)]
#[command(name = "chain-explorer-sync")]
#[command(about = "Blockchain explorer client with TUI and Web dashboards")]
#[command(version)]
pub struct Cli {
    /// TOML file layered over the built-in defaults
    #[arg(long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Use synthetic in-memory gateways instead of the configured APIs
    #[arg(long, global = true)]
    pub demo: bool,

    /// Override sync.poll_interval_ms
    #[arg(long, value_name = "MS", global = true)]
    pub poll_ms: Option<u64>,

    /// Interface mode selection
    #[command(subcommand)]
    pub mode: InterfaceMode,
}

/// Available presentation modes. All of them drive the same synchronizer.
#[derive(Subcommand)]
pub enum InterfaceMode {
    /// Sync once, print the view and exit
    Cli {
        /// Select this block instead of the newest one
        #[arg(long)]
        hash: Option<String>,

        /// Give up waiting for upstream after this many seconds
        #[arg(short, long, default_value = "20")]
        timeout: u64,
    },

    /// Terminal UI dashboard (ratatui)
    Tui,

    /// Web server with dashboard (axum + WebSocket)
    Web {
        /// Server port
        #[arg(short, long, default_value = "8080")]
        port: u16,

        /// Bind address
        #[arg(short, long, default_value = "127.0.0.1")]
        bind: String,

        /// Enable CORS for development
        #[arg(short, long)]
        cors: bool,
    },
}

/// `RUST_LOG` directives when set and valid, otherwise `info`
fn log_filter(directives: Option<&str>) -> EnvFilter {
    directives
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

/// Route logs to the configured file, or stderr. The TUI owns the
/// terminal, so without a log file its logs are discarded.
fn init_tracing(mode: &InterfaceMode, log_file: Option<&Path>) -> Result<()> {
    let writer = match (log_file, mode) {
        (Some(path), _) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            BoxMakeWriter::new(Mutex::new(file))
        }
        (None, InterfaceMode::Tui) => BoxMakeWriter::new(io::sink),
        (None, _) => BoxMakeWriter::new(io::stderr),
    };

    let fmt_layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(log_file.is_none())
        .with_filter(log_filter(std::env::var(EnvFilter::DEFAULT_ENV).ok().as_deref()));
    Registry::default().with(fmt_layer).try_init()?;
    Ok(())
}

fn build_gateways(config: &AppConfig, demo: bool) -> Result<(Arc<dyn BlockRepository>, Arc<dyn MarketData>)> {
    if demo {
        println!("🧪 Demo mode: synthetic chain and market data");
        return Ok((Arc::new(demo::DemoChain::new()), Arc::new(demo::DemoMarket::new())));
    }
    Ok((
        Arc::new(HttpBlockRepository::new(&config.repository)?),
        Arc::new(CoinGeckoMarketData::new(&config.market)?),
    ))
}

/// Main application entry point
/// Routes to the selected presentation mode
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load(cli.config.as_deref())?;
    if let Some(poll_ms) = cli.poll_ms {
        config.sync.poll_interval_ms = poll_ms;
        config.validate()?;
    }
    init_tracing(&cli.mode, config.log_file.as_deref())?;
    info!(
        "Repository {} / market {} ({})",
        config.repository.base_url, config.market.base_url, config.market.coin_id
    );

    let (repository, market) = build_gateways(&config, cli.demo)?;
    let mut sync = Synchronizer::new(repository, market, config.sync_settings());
    let poll_interval = config.sync.poll_interval();

    match cli.mode {
        InterfaceMode::Cli { hash, timeout } => {
            println!("🔍 Chain Explorer - CLI Mode");
            cli_interface::run_cli_mode(&mut sync, poll_interval, hash, timeout).await
        }

        InterfaceMode::Tui => {
            println!("📊 Chain Explorer - Terminal Dashboard");
            sync.start(poll_interval);
            let result = tui_dashboard::run_tui_mode(sync.handle()).await;
            sync.stop().await;
            result
        }

        InterfaceMode::Web { port, bind, cors } => {
            println!("🌐 Chain Explorer - Web Server Mode");
            println!("Starting server at http://{}:{}", bind, port);
            sync.start(poll_interval);
            let result = web_server::run_web_mode(sync.handle(), &bind, port, cors).await;
            sync.stop().await;
            result
        }
    }
}

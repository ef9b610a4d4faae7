//! HBDM Smoke Test CLI
//!
//! Commands:
//! - `depth`: Subscribe to market depth and collect updates
//! - `orders`: Subscribe to order notifications (requires credentials)
//! - `index`: Fetch the contract index price over REST
//! - `account`: Fetch margin account info over REST (requires credentials)
//!
//! # Usage
//! ```bash
//! # Market depth smoke test
//! hbdm_smoke depth --symbol BTC_CQ --out data/depth.jsonl --limit 100
//!
//! # Order notifications (requires env vars)
//! HBDM_ACCESS_KEY=... HBDM_SECRET_KEY=...
//! hbdm_smoke orders --symbol BTC --out data/orders.jsonl --limit 0
//!
//! # REST
//! hbdm_smoke index --symbol BTC
//! hbdm_smoke account --symbol BTC
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::DateTime;
use clap::{Parser, Subcommand};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use hbdm_adapter::httpws::{ApiCredentials, EventSink, MarketWsClient, RestClient, TradeWsClient};
use hbdm_adapter::types::StreamEvent;
use hbdm_adapter::{
    StreamConfig, StreamError, MARKET_WSS_ENDPOINT, NOTIFICATION_WSS_ENDPOINT, REST_API_BASE,
};

#[derive(Parser)]
#[command(name = "hbdm_smoke")]
#[command(about = "HBDM derivatives smoke test CLI")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Subscribe to market depth and collect updates
    Depth {
        /// Contract symbol, e.g. BTC_CQ. Can specify multiple times.
        #[arg(long, required = true)]
        symbol: Vec<String>,

        /// Output file path for JSONL events
        #[arg(long, default_value = "data/depth.jsonl")]
        out: PathBuf,

        /// Maximum events to collect (0 = unlimited until Ctrl+C)
        #[arg(long, default_value = "100")]
        limit: u64,

        /// Market WebSocket endpoint
        #[arg(long, default_value = MARKET_WSS_ENDPOINT)]
        endpoint: String,
    },

    /// Subscribe to order notifications (requires HBDM_ACCESS_KEY, HBDM_SECRET_KEY)
    Orders {
        /// Contract symbol, e.g. BTC. Can specify multiple times.
        #[arg(long, required = true)]
        symbol: Vec<String>,

        /// Output file path for JSONL events
        #[arg(long, default_value = "data/orders.jsonl")]
        out: PathBuf,

        /// Maximum events to collect (0 = unlimited until Ctrl+C)
        #[arg(long, default_value = "0")]
        limit: u64,

        /// Notification WebSocket endpoint
        #[arg(long, default_value = NOTIFICATION_WSS_ENDPOINT)]
        endpoint: String,
    },

    /// Fetch the contract index price
    Index {
        #[arg(long)]
        symbol: String,
    },

    /// Fetch margin account info (requires HBDM_ACCESS_KEY, HBDM_SECRET_KEY)
    Account {
        /// Restrict to one symbol
        #[arg(long)]
        symbol: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));

    tracing_subscriber::fmt().with_env_filter(env_filter).with_target(false).init();

    match cli.command {
        Commands::Depth { symbol, out, limit, endpoint } => {
            run_depth_smoke(symbol, out, limit, endpoint).await
        }
        Commands::Orders { symbol, out, limit, endpoint } => {
            run_orders_smoke(symbol, out, limit, endpoint).await
        }
        Commands::Index { symbol } => run_index(symbol).await,
        Commands::Account { symbol } => run_account(symbol).await,
    }
}

fn load_credentials() -> Result<ApiCredentials> {
    let credentials = match ApiCredentials::from_env() {
        Some(c) => c,
        None => {
            error!("Missing credentials. Set environment variables:");
            error!("  HBDM_ACCESS_KEY");
            error!("  HBDM_SECRET_KEY");
            anyhow::bail!("Missing credentials");
        }
    };

    if !credentials.is_valid() {
        error!("Invalid credentials - one or more fields are empty");
        anyhow::bail!("Invalid credentials");
    }

    info!("Credentials loaded: {:?}", credentials);
    Ok(credentials)
}

/// Forward every sink into one channel so the collector can wait on all of them
fn fan_in<T>(sinks: Vec<EventSink<T>>) -> mpsc::Receiver<StreamEvent>
where
    T: Into<StreamEvent> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(256);
    for sink in sinks {
        let tx = tx.clone();
        tokio::spawn(async move {
            while let Some(event) = sink.recv().await {
                if tx.send(event.into()).await.is_err() {
                    break;
                }
            }
        });
    }
    rx
}

#[derive(Default)]
struct CollectStats {
    total: u64,
    per_topic: BTreeMap<String, u64>,
    first_ts: Option<i64>,
    last_ts: Option<i64>,
}

/// Write events as JSONL until the limit, Ctrl+C, a stream error or end of stream
async fn collect(
    mut events: mpsc::Receiver<StreamEvent>,
    errors: EventSink<StreamError>,
    out: &Path,
    limit: u64,
) -> Result<CollectStats> {
    if let Some(parent) = out.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = File::create(out).await.context("Failed to create output file")?;
    let mut stats = CollectStats::default();

    loop {
        if limit > 0 && stats.total >= limit {
            info!("Reached event limit: {}", limit);
            break;
        }

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down...");
                break;
            }
            err = errors.recv() => {
                if let Some(err) = err {
                    error!("Stream failed: {}", err);
                }
                break;
            }
            event = events.recv() => {
                let Some(event) = event else {
                    warn!("All subscriptions closed");
                    break;
                };

                file.write_all(serde_json::to_string(&event)?.as_bytes()).await?;
                file.write_all(b"\n").await?;

                stats.total += 1;
                *stats.per_topic.entry(event.topic().to_string()).or_default() += 1;
                stats.first_ts.get_or_insert(event.timestamp());
                stats.last_ts = Some(event.timestamp());

                if stats.total % 100 == 0 {
                    info!("Collected {} events", stats.total);
                }
            }
        }
    }

    file.flush().await?;
    Ok(stats)
}

fn print_summary(stats: &CollectStats, dropped: u64, out: &Path) {
    info!("");
    info!("=== Summary ===");
    info!("Total events: {}", stats.total);
    info!("Dropped by backpressure: {}", dropped);
    if let (Some(first), Some(last)) = (stats.first_ts, stats.last_ts) {
        info!("Exchange time span: {} ms", last - first);
    }
    info!("");
    info!("Events per topic:");
    for (topic, count) in &stats.per_topic {
        info!("  {}: {}", topic, count);
    }
    info!("");
    info!("Output written to: {}", out.display());
}

async fn run_depth_smoke(
    symbols: Vec<String>,
    out: PathBuf,
    limit: u64,
    endpoint: String,
) -> Result<()> {
    info!("=== Market Depth Smoke Test ===");
    info!("Endpoint: {}", endpoint);
    info!("Symbols: {:?}", symbols);
    info!("Output: {}", out.display());
    info!("Limit: {} (0 = unlimited)", limit);
    info!("Press Ctrl+C to stop");
    info!("");

    let client = MarketWsClient::connect(StreamConfig::market().with_endpoint(endpoint)).await?;

    let mut sinks = Vec::with_capacity(symbols.len());
    for symbol in &symbols {
        sinks.push(client.subscribe_market_depth(symbol).await?);
    }
    let dropped_from = sinks.clone();

    let stats = collect(fan_in(sinks), client.errors(), &out, limit).await;
    client.close().await;
    let stats = stats?;

    print_summary(&stats, dropped_from.iter().map(EventSink::dropped).sum(), &out);
    Ok(())
}

async fn run_orders_smoke(
    symbols: Vec<String>,
    out: PathBuf,
    limit: u64,
    endpoint: String,
) -> Result<()> {
    info!("=== Order Notification Smoke Test ===");
    info!("Endpoint: {}", endpoint);
    info!("Symbols: {:?}", symbols);
    info!("Output: {}", out.display());
    info!("Limit: {} (0 = unlimited)", limit);
    info!("");

    let credentials = load_credentials()?;
    info!("Press Ctrl+C to stop");
    info!("");

    let config = StreamConfig::trade().with_endpoint(endpoint);
    let client = TradeWsClient::connect(credentials, config).await?;
    info!("Authenticated");

    let mut sinks = Vec::with_capacity(symbols.len());
    for symbol in &symbols {
        sinks.push(client.subscribe_order_push(symbol).await?);
    }
    let dropped_from = sinks.clone();

    let stats = collect(fan_in(sinks), client.errors(), &out, limit).await;
    client.close().await;
    let stats = stats?;

    print_summary(&stats, dropped_from.iter().map(EventSink::dropped).sum(), &out);
    Ok(())
}

async fn run_index(symbol: String) -> Result<()> {
    info!("=== Contract Index ===");
    info!("Base URL: {}", REST_API_BASE);
    info!("");

    let client = RestClient::new()?;
    let resp = client.contract_index(&symbol).await?;

    let at = DateTime::from_timestamp_millis(resp.data.ts)
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| resp.data.ts.to_string());
    info!("{} index price: {} (at {})", resp.data.symbol, resp.data.price, at);

    Ok(())
}

async fn run_account(symbol: Option<String>) -> Result<()> {
    info!("=== Account Info ===");
    info!("Base URL: {}", REST_API_BASE);
    info!("");

    let credentials = load_credentials()?;
    let client = RestClient::new()?.with_credentials(credentials);
    let resp = client.account_info(symbol.as_deref()).await?;

    if resp.data.is_empty() {
        warn!("No margin accounts returned");
    }
    for account in &resp.data {
        info!("{}:", account.symbol);
        info!("  Margin balance: {}", account.margin_balance);
        info!("  Margin available: {}", account.margin_available);
        info!("  Margin frozen: {}", account.margin_frozen);
        info!("  Realised PnL: {}", account.profit_real);
        info!("  Unrealised PnL: {}", account.profit_unreal);
        if let Some(risk) = account.risk_rate {
            info!("  Risk rate: {}", risk);
        }
    }

    Ok(())
}

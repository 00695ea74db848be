//! spdy-replay
//!
//! Replays a page-load request trace against SPDY/3 servers and reports
//! per-request timings.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use spdy_client::replay::{self, Summary};
use spdy_client::Client;
use spdy_core::config;

#[derive(Parser)]
#[command(name = "spdy-replay")]
#[command(about = "Replay request traces over SPDY/3")]
#[command(version)]
struct Args {
    /// Trace file: host, path and offset in milliseconds, tab-separated
    trace: PathBuf,

    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port for hosts that do not name one (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Use plaintext TCP instead of TLS
    #[arg(long)]
    plain: bool,

    /// Priority of replayed requests, 0-7 (overrides config)
    #[arg(long)]
    priority: Option<u8>,

    /// Live stream cap per session (overrides config)
    #[arg(long)]
    max_streams: Option<u32>,

    /// Print the summary as JSON
    #[arg(long)]
    json: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", env = "SPDY_REPLAY_LOG")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| args.log_level.clone()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut config = config::load_client_config(args.config.as_deref())
        .with_context(|| format!("Failed to load config from {:?}", args.config))?;
    if args.plain {
        config.plain = true;
    }
    if let Some(port) = args.port {
        config.port = Some(port);
    }
    if let Some(priority) = args.priority {
        config.default_priority = priority;
    }
    if let Some(max_streams) = args.max_streams {
        config.max_concurrent_streams = max_streams;
    }

    let entries = replay::load_trace(&args.trace)
        .await
        .with_context(|| format!("Failed to load trace {:?}", args.trace))?;
    tracing::info!("Loaded {} requests from {:?}", entries.len(), args.trace);

    let client = Arc::new(Client::new(config).context("Invalid client configuration")?);

    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received Ctrl+C, shutting down...");
            cancel_clone.cancel();
        }
    });

    let summary = tokio::select! {
        summary = replay::replay(Arc::clone(&client), entries) => Some(summary),
        _ = cancel.cancelled() => None,
    };
    client.shutdown().await;

    match summary {
        Some(summary) if args.json => println!("{}", serde_json::to_string_pretty(&summary)?),
        Some(summary) => print_summary(&summary),
        None => tracing::warn!("Replay interrupted"),
    }
    Ok(())
}

fn print_summary(summary: &Summary) {
    for c in &summary.completions {
        match (&c.status, &c.error) {
            (Some(status), _) => println!(
                "{:>4}  {:>6} ms  +{:>6} ms  {:>8} B  {}{}",
                status, c.elapsed_ms, c.started_ms, c.bytes, c.host, c.path
            ),
            (None, Some(err)) => println!(
                " ERR  {:>6} ms  +{:>6} ms  {}{}: {}",
                c.elapsed_ms, c.started_ms, c.host, c.path, err
            ),
            (None, None) => {}
        }
    }
    println!(
        "{} requests, {} ok, {} failed, {} bytes in {} ms",
        summary.requests, summary.succeeded, summary.failed, summary.bytes, summary.wall_time_ms
    );
}

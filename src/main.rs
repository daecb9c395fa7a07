//! CLI entry point for the transit ingestion pipeline.
//!
//! Provides subcommands for running the scheduler and for one-off static or
//! realtime sync cycles.

use std::ffi::OsStr;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};
use transit_ingest::{
    IngestConfig,
    fetch::BasicClient,
    store,
    sync::{Scheduler, Syncer, sync_static_with_timeout},
};

#[derive(Parser)]
#[command(name = "transit_ingest")]
#[command(about = "Ingests GTFS static and GTFS-realtime feeds", long_about = None)]
struct Cli {
    /// JSON config file; defaults to TRANSIT_* environment variables
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the static and realtime schedulers until interrupted
    Run,
    /// Run one static sync cycle and print its report
    SyncStatic {
        /// Abort the cycle after this many seconds
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Run one realtime sync cycle and print its report
    SyncRealtime,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/transit_ingest.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("transit_ingest.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => IngestConfig::load(path)?,
        None => IngestConfig::from_env()?,
    };
    let syncer = build_syncer(config).await?;

    match cli.command {
        Commands::Run => {
            let (scheduler, _trigger) = Scheduler::new(syncer);
            tokio::select! {
                _ = scheduler.run() => warn!("Scheduler stopped"),
                result = tokio::signal::ctrl_c() => {
                    result.context("failed to listen for ctrl-c")?;
                    info!("Shutting down");
                }
            }
        }
        Commands::SyncStatic { timeout } => {
            let report = match timeout {
                Some(secs) => {
                    sync_static_with_timeout(&syncer, std::time::Duration::from_secs(secs)).await?
                }
                None => syncer.sync_static().await?,
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::SyncRealtime => {
            let report = syncer.sync_realtime().await;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}

/// Opens the store and HTTP client described by `config`.
#[tracing::instrument(skip_all, fields(database_url = %config.database_url))]
async fn build_syncer(config: IngestConfig) -> Result<Syncer> {
    let pool = store::connect(&config.database_url).await?;
    let client = BasicClient::new(config.request_timeout()).context("failed to build HTTP client")?;
    Ok(Syncer::new(pool, Arc::new(client), config))
}

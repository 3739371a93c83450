use anyhow::{Context, Result};
use clap::Parser;
use rollcall_core::{MultiAngleMatcher, RecognitionIndex};
use rollcall_hw::NetworkOpener;
use rollcall_store::{Ledger, Store};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

mod analyzer_http;
mod config;
mod engine;
mod hub;
mod protocol;
mod stats;
mod worker;
mod ws;

use config::Config;
use hub::{Hub, HubSettings};
use worker::{CameraLauncher, WorkerContext, WorkerSettings};

#[derive(Parser)]
#[command(name = "rollcalld", about = "Rollcall attendance daemon")]
struct Args {
    /// Configuration file (default: $XDG_CONFIG_HOME/rollcall/rollcalld.toml)
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = Config::load(args.config.as_deref())?;
    tracing::info!(listen = %config.listen_addr, cameras = config.cameras.len(), "rollcalld starting");

    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    let store = Store::open(&config.db_path).await?;
    let offset = config.reporting_offset()?;
    let ledger = Ledger::new(store.clone(), offset, config.out_before_in);

    let index = Arc::new(RecognitionIndex::new(Duration::from_secs(config.index_max_age_secs)));
    match store.load_identities().await {
        Ok(identities) => {
            if let Err(e) = index.rebuild(&identities) {
                tracing::warn!(error = %e, "initial index build failed; workers will retry");
            }
        }
        Err(e) => tracing::warn!(error = %e, "enrollment snapshot unavailable; workers will retry"),
    }

    let analyzer = analyzer_http::HttpFaceAnalyzer::new(&config.analyzer_url, config.analyzer_timeout());
    let analysis = engine::spawn_engine(Box::new(analyzer))?;
    tracing::info!(url = %config.analyzer_url, "face analyzer configured");

    let context = WorkerContext {
        index,
        matcher: Arc::new(MultiAngleMatcher::new(config.matcher_config())),
        ledger,
        store,
        analysis,
        opener: Arc::new(NetworkOpener::default()),
        settings: WorkerSettings::from_config(&config),
    };

    let stats = Arc::new(stats::Stats::default());
    let hub = Arc::new(Hub::new(
        HubSettings {
            send_timeout: Duration::from_millis(config.broadcast_send_timeout_ms),
            viewer_queue: config.viewer_queue,
        },
        Arc::clone(&stats),
        Box::new(CameraLauncher::new(config.cameras.clone(), context)),
    ));

    stats::spawn_daily_reset(stats, offset, config.stats_reset_at()?);
    ws::start_heartbeat(Arc::clone(&hub));

    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("binding {}", config.listen_addr))?;
    tracing::info!(addr = %config.listen_addr, "rollcalld ready");

    let shutdown_hub = Arc::clone(&hub);
    axum::serve(listener, ws::router(hub))
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for shutdown signal");
            }
            tracing::info!("rollcalld shutting down");
            shutdown_hub.shutdown().await;
        })
        .await?;

    Ok(())
}

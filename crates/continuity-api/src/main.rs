//! Axum API server binary.
//!
//! Runs the HTTP API, the background dispatcher and the stale job detector
//! in one process around a single ledger database.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use continuity_api::{create_router, metrics, ApiConfig, AppState, StaleJobDetector};
use continuity_gen_client::GenClient;
use continuity_ledger::{AccountingEngine, LedgerConfig, LedgerStore};
use continuity_media::{FfmpegStitcher, StitchConfig};
use continuity_worker::{Dispatcher, JobManager, WorkerConfig};

fn init_tracing() -> anyhow::Result<()> {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env().add_directive("continuity=info".parse()?);

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Install rustls crypto provider (required for rustls 0.23+)
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    init_tracing()?;
    info!("Starting continuity-api");

    let config = ApiConfig::from_env();
    info!("API config: host={}, port={}", config.host, config.port);

    let metrics_enabled = std::env::var("METRICS_ENABLED")
        .map(|v| v == "true" || v == "1")
        .unwrap_or(true);
    let metrics_handle = if metrics_enabled {
        info!("Prometheus metrics enabled at /metrics");
        Some(metrics::init_metrics().context("Failed to install Prometheus recorder")?)
    } else {
        None
    };

    let ledger_config = LedgerConfig::from_env();
    info!(path = %ledger_config.db_path.display(), "Opening ledger");
    let store = LedgerStore::open(ledger_config)
        .await
        .context("Failed to open ledger")?;

    let generation = GenClient::from_env().context("Failed to create generation client")?;
    let stitcher = FfmpegStitcher::new(StitchConfig::from_env());

    let manager = JobManager::new(
        AccountingEngine::new(store),
        Arc::new(generation),
        Arc::new(stitcher),
        WorkerConfig::from_env(),
    );

    let dispatcher = Arc::new(Dispatcher::new(manager.clone()));
    let dispatcher_task = tokio::spawn({
        let dispatcher = Arc::clone(&dispatcher);
        async move { dispatcher.run().await }
    });

    let stale_detector = StaleJobDetector::new(manager.clone());
    tokio::spawn(async move {
        stale_detector.run().await;
    });

    let state = AppState::new(config.clone(), manager).context("Failed to create application state")?;
    let app = create_router(state, metrics_handle);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .context("Invalid bind address")?;

    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("HTTP server stopped, draining jobs");
    dispatcher.shutdown();
    dispatcher_task.await??;

    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal");
}

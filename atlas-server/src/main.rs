use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use atlas_server::api::{ApiServer, ApiServerConfig, AppState};
use atlas_server::config::AppConfig;
use atlas_server::logging;
use atlas_server::scan::{IntervalStore, ScanRunner, Scheduler, StreamHub};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = Arc::new(AppConfig::from_env_or_default());

    // Initialize logging; the guard must outlive the runtime so buffered
    // lines reach the file on shutdown.
    let (logging_config, _guard) = logging::init_logging(&config.logs_dir)?;

    tracing::info!(
        logs_dir = %config.logs_dir.display(),
        scan_bin = %config.scan_bin.display(),
        "atlas-server starting"
    );

    let shutdown = CancellationToken::new();

    // Scan engine.
    let hub = Arc::new(StreamHub::new());
    let runner = Arc::new(ScanRunner::new(&config, Arc::clone(&hub)));
    let intervals = Arc::new(IntervalStore::load_or_default(config.intervals_path()));

    // Background tasks.
    let scheduler = Scheduler::new(
        Arc::clone(&runner),
        Arc::clone(&intervals),
        shutdown.clone(),
    );
    let scheduler_handle = tokio::spawn(scheduler.run());
    logging_config.start_retention_cleanup(shutdown.clone());

    // API server.
    let state = AppState::new(
        Arc::clone(&config),
        runner,
        hub,
        intervals,
        shutdown.clone(),
    )
    .with_logging_config(Arc::clone(&logging_config));
    let server = ApiServer::with_state(ApiServerConfig::from_env_or_default(), state);
    let server_cancel = server.cancel_token();

    // Propagate Ctrl-C into a clean shutdown of both loops.
    let shutdown_for_signal = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for shutdown signal");
            return;
        }
        tracing::info!("Shutdown signal received");
        shutdown_for_signal.cancel();
        server_cancel.cancel();
    });

    server.run().await?;

    shutdown.cancel();
    let _ = scheduler_handle.await;
    tracing::info!("atlas-server stopped");

    Ok(())
}

use anyhow::{Context, Result};
use std::time::Duration;
use tracing::{info, warn};

use skimonitor_api::app::{create_app, AppState};
use skimonitor_api::config::Config;
use skimonitor_api::jobs::{JobScheduler, PaymentReconciliationJob, PoolMetricsJob, RefundRetryJob};
use skimonitor_api::middleware::{init_metrics, logging::init_logging};
use skimonitor_api::services::build_backend;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let config = Config::load().context("Failed to load configuration")?;

    init_logging(&config.logging).context("Failed to initialize logging")?;
    info!("Starting SkiMonitor API v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = init_metrics() {
        warn!(error = %e, "Metrics exporter not installed");
    }

    let backend = build_backend(&config).await?;
    let addr = config.socket_addr().context("Invalid server address")?;

    let mut scheduler = JobScheduler::new();
    if config.jobs.enabled {
        scheduler.register(PaymentReconciliationJob::new(
            backend.engine.clone(),
            config.jobs.reconcile_batch_size,
            config.jobs.reconcile_interval_secs,
        ));
        scheduler.register(RefundRetryJob::new(
            backend.engine.clone(),
            config.jobs.refund_retry_batch_size,
            config.jobs.refund_retry_interval_secs,
        ));
        if let Some(pool) = &backend.pool {
            scheduler.register(PoolMetricsJob::new(pool.clone()));
        }
        scheduler.start();
    } else {
        info!("Background jobs disabled");
    }

    let state = AppState::new(config, backend.engine, backend.pool)
        .context("Invalid identity configuration")?;
    let app = create_app(state);

    info!("Server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler.shutdown();
    scheduler.wait_for_shutdown(Duration::from_secs(10)).await;
    info!("Server stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

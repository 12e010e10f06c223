//! Standalone stalled-upload reclaimer.
//!
//! Runs the sweep loop outside the API server, for deployments that set
//! `RECLAIMER_ENABLED=false` on the API instances.

use photo_upload_orchestrator::{
    app_state::AppState,
    config::AppConfig,
    db::{self, PgUploadStore},
    routes,
    services::{reclaimer, storage::S3Gateway},
};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting stalled upload reclaimer");

    let config = AppConfig::from_env().expect("Failed to load configuration");

    PrometheusBuilder::new()
        .install()
        .expect("Failed to install Prometheus exporter");
    routes::metrics::describe();

    tracing::info!("Connecting to PostgreSQL");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    let storage = S3Gateway::new(
        &config.s3_bucket,
        &config.s3_region,
        config.s3_endpoint.as_deref(),
        &config.s3_access_key,
        &config.s3_secret_key,
        config.s3_path_style,
    )
    .expect("Failed to initialize object store client");

    let state = AppState::new(
        Arc::new(PgUploadStore::new(db_pool)),
        Arc::new(storage),
        config.settings(),
    );

    let cancel_token = CancellationToken::new();
    let worker = tokio::spawn(reclaimer::run(state, cancel_token.clone()));

    if let Err(e) = signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
    tracing::info!("Shutdown signal received");
    cancel_token.cancel();

    if let Err(e) = worker.await {
        tracing::error!(error = %e, "Reclaimer task panicked");
    }
}

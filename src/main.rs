use axum::{
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use photo_upload_orchestrator::{
    app_state::AppState,
    config::AppConfig,
    db::{self, PgUploadStore},
    routes,
    services::{reclaimer, storage::S3Gateway},
};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing photo upload orchestrator");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);
    routes::metrics::describe();

    // Initialize database connection pool
    tracing::info!("Connecting to PostgreSQL database");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    tracing::info!("Running database migrations");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run database migrations");

    tracing::info!(bucket = %config.s3_bucket, "Initializing object store client");
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

    let reclaimer_task = if config.reclaimer_enabled {
        Some(tokio::spawn(reclaimer::run(
            state.clone(),
            cancel_token.clone(),
        )))
    } else {
        tracing::info!("In-process reclaimer disabled");
        None
    };

    let app = Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/api/upload-jobs", post(routes::uploads::create_upload_job))
        .route("/api/upload-jobs/{job_id}", get(routes::uploads::get_upload_job))
        .route(
            "/api/upload-jobs/{job_id}/status",
            get(routes::status::subscribe).delete(routes::status::unsubscribe),
        )
        .route("/api/photos/{photo_id}", get(routes::photos::get_photo))
        .route(
            "/api/photos/{photo_id}/complete",
            post(routes::photos::complete_photo_upload),
        )
        .route(
            "/api/photos/{photo_id}/fail",
            post(routes::photos::fail_photo_upload),
        )
        .route(
            "/api/photos/{photo_id}/retry",
            post(routes::photos::retry_photo_upload),
        )
        .route(
            "/api/admin/stalled-uploads/stats",
            get(routes::admin::stalled_stats),
        )
        .route(
            "/api/admin/stalled-uploads/cleanup",
            post(routes::admin::cleanup_stalled),
        )
        .with_state(state.clone())
        // Prometheus metrics endpoint (separate state)
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(1024 * 1024)); // 1 MB limit

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    let shutdown_token = cancel_token.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            tracing::info!("Shutdown signal received");
            // Open status streams would otherwise hold the server open.
            state.broadcaster.close_everything();
            shutdown_token.cancel();
        })
        .await
        .expect("Server error");

    cancel_token.cancel();
    if let Some(task) = reclaimer_task {
        if let Err(e) = task.await {
            tracing::error!(error = %e, "Reclaimer task panicked");
        }
    }

    tracing::info!("Shut down cleanly");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

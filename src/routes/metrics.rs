use axum::extract::State;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

/// Register descriptions for the upload metrics.
pub fn describe() {
    metrics::describe_counter!("upload_jobs_created_total", "Upload jobs created");
    metrics::describe_counter!(
        "photo_uploads_completed_total",
        "Photos confirmed present in the object store"
    );
    metrics::describe_counter!(
        "photo_uploads_failed_total",
        "Photo uploads reported as failed by clients"
    );
    metrics::describe_counter!(
        "stalled_uploads_reclaimed_total",
        "Photos failed by the stalled-upload sweep"
    );
    metrics::describe_gauge!(
        "upload_status_subscribers",
        "Open status stream subscribers across all jobs"
    );
}

/// Prometheus scrape endpoint, text exposition format.
pub async fn prometheus_metrics(State(handle): State<Arc<PrometheusHandle>>) -> impl IntoResponse {
    handle.render()
}

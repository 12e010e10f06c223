use axum::extract::State;
use axum::Json;

use crate::app_state::AppState;
use crate::error::AppError;
use crate::services::reclaimer::{self, StalledStats, SweepReport};

/// GET /api/admin/stalled-uploads/stats: Photos the next sweep would reclaim.
pub async fn stalled_stats(State(state): State<AppState>) -> Result<Json<StalledStats>, AppError> {
    Ok(Json(reclaimer::stalled_stats(&state).await?))
}

/// POST /api/admin/stalled-uploads/cleanup: Run a sweep now.
pub async fn cleanup_stalled(State(state): State<AppState>) -> Result<Json<SweepReport>, AppError> {
    tracing::info!("Manual stalled upload sweep requested");
    Ok(Json(reclaimer::sweep(&state).await?))
}

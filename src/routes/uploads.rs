use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::error::AppError;
use crate::models::upload::{CreateUploadJobRequest, CreateUploadJobResponse, JobDetailsResponse};
use crate::routes::OwnerId;
use crate::services::orchestrator;

/// POST /api/upload-jobs: Create a job and get one upload URL per photo.
pub async fn create_upload_job(
    State(state): State<AppState>,
    OwnerId(owner_id): OwnerId,
    Json(request): Json<CreateUploadJobRequest>,
) -> Result<(StatusCode, Json<CreateUploadJobResponse>), AppError> {
    let response = orchestrator::create_upload_job(&state, owner_id, request).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// GET /api/upload-jobs/{job_id}: Job progress and photo statuses.
pub async fn get_upload_job(
    State(state): State<AppState>,
    OwnerId(owner_id): OwnerId,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobDetailsResponse>, AppError> {
    let job = orchestrator::get_upload_job(&state, owner_id, job_id).await?;
    Ok(Json(job))
}

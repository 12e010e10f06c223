use axum::extract::{Path, State};
use axum::Json;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::error::AppError;
use crate::models::upload::{
    FailPhotoUploadRequest, PhotoDetailsResponse, PhotoTransitionResponse, RetryUploadResponse,
};
use crate::routes::OwnerId;
use crate::services::{completion, failure, orchestrator};

/// POST /api/photos/{photo_id}/complete: Confirm the upload landed.
pub async fn complete_photo_upload(
    State(state): State<AppState>,
    Path(photo_id): Path<Uuid>,
) -> Result<Json<PhotoTransitionResponse>, AppError> {
    Ok(Json(completion::complete_photo_upload(&state, photo_id).await?))
}

/// POST /api/photos/{photo_id}/fail: Report a failed upload.
pub async fn fail_photo_upload(
    State(state): State<AppState>,
    Path(photo_id): Path<Uuid>,
    Json(request): Json<FailPhotoUploadRequest>,
) -> Result<Json<PhotoTransitionResponse>, AppError> {
    Ok(Json(failure::fail_photo_upload(&state, photo_id, request).await?))
}

/// POST /api/photos/{photo_id}/retry: New upload URL for a failed photo.
pub async fn retry_photo_upload(
    State(state): State<AppState>,
    OwnerId(owner_id): OwnerId,
    Path(photo_id): Path<Uuid>,
) -> Result<Json<RetryUploadResponse>, AppError> {
    Ok(Json(
        orchestrator::retry_photo_upload(&state, owner_id, photo_id).await?,
    ))
}

/// GET /api/photos/{photo_id}
pub async fn get_photo(
    State(state): State<AppState>,
    OwnerId(owner_id): OwnerId,
    Path(photo_id): Path<Uuid>,
) -> Result<Json<PhotoDetailsResponse>, AppError> {
    Ok(Json(orchestrator::get_photo(&state, owner_id, photo_id).await?))
}

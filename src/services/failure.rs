use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::app_state::AppState;
use crate::db::Transition;
use crate::error::AppError;
use crate::models::event::UploadStatusEvent;
use crate::models::photo::PhotoStatus;
use crate::models::upload::{FailPhotoUploadRequest, PhotoTransitionResponse};

/// Record a client-reported upload failure.
///
/// Never touches the object store; leftover objects are cleaned up by the
/// stalled-upload sweep.
pub async fn fail_photo_upload(
    state: &AppState,
    photo_id: Uuid,
    request: FailPhotoUploadRequest,
) -> Result<PhotoTransitionResponse, AppError> {
    let errors = state.validator.validate_failure(&request);
    if !errors.is_empty() {
        return Err(AppError::Validation(errors));
    }
    let message = request.error_message.trim();

    let photo = state
        .store
        .get_photo(photo_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("photo {}", photo_id)))?;

    match photo.status {
        PhotoStatus::Failed => {
            debug!(photo_id = %photo_id, "Photo already failed");
            return Ok(failed(photo_id));
        }
        PhotoStatus::Completed => return Err(completed_conflict(photo_id)),
        PhotoStatus::Uploading => {}
    }

    let _job_guard = state.broadcaster.lock_job_of(photo.job_id).await;
    match state
        .store
        .mark_photo_failed(photo_id, message, Utc::now())
        .await?
    {
        Transition::Applied { photo, job } => {
            metrics::counter!("photo_uploads_failed_total").increment(1);
            info!(
                photo_id = %photo.id,
                job_id = ?photo.job_id,
                retry_count = photo.retry_count,
                error_message = %message,
                "Photo upload failed"
            );

            if let Some(job) = job {
                let event = UploadStatusEvent::photo_failed(&job, &photo, message);
                if state.broadcaster.emit_transition(&job, event) {
                    info!(job_id = %job.id, status = %job.status, "Upload job finished");
                    state.broadcaster.close_all_connections(job.id);
                }
            }
            Ok(failed(photo_id))
        }
        Transition::Skipped(current) if current.status == PhotoStatus::Failed => {
            Ok(failed(photo_id))
        }
        Transition::Skipped(_) => Err(completed_conflict(photo_id)),
        Transition::NotFound => Err(AppError::NotFound(format!("photo {}", photo_id))),
    }
}

fn failed(photo_id: Uuid) -> PhotoTransitionResponse {
    PhotoTransitionResponse {
        photo_id,
        status: PhotoStatus::Failed,
    }
}

fn completed_conflict(photo_id: Uuid) -> AppError {
    AppError::Conflict(format!("photo {} is already completed", photo_id))
}

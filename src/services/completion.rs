use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::app_state::AppState;
use crate::db::Transition;
use crate::error::AppError;
use crate::models::event::UploadStatusEvent;
use crate::models::photo::PhotoStatus;
use crate::models::upload::PhotoTransitionResponse;

/// Confirm that a photo's object landed in storage and mark it completed.
///
/// Completing an already completed photo succeeds without touching the job
/// counters again. A missing object is a `Conflict` and leaves the photo in
/// `UPLOADING` so the client can finish the upload and call again.
pub async fn complete_photo_upload(
    state: &AppState,
    photo_id: Uuid,
) -> Result<PhotoTransitionResponse, AppError> {
    let photo = state
        .store
        .get_photo(photo_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("photo {}", photo_id)))?;

    match photo.status {
        PhotoStatus::Completed => {
            debug!(photo_id = %photo_id, "Photo already completed");
            return Ok(completed(photo_id));
        }
        PhotoStatus::Failed => return Err(failed_conflict(photo_id)),
        PhotoStatus::Uploading => {}
    }

    if !state.storage.exists(&photo.object_key).await? {
        warn!(
            photo_id = %photo_id,
            object_key = %photo.object_key,
            "Completion reported but object is missing"
        );
        return Err(AppError::Conflict(format!(
            "object for photo {} not found in storage",
            photo_id
        )));
    }

    let _job_guard = state.broadcaster.lock_job_of(photo.job_id).await;
    match state.store.mark_photo_completed(photo_id, Utc::now()).await? {
        Transition::Applied { photo, job } => {
            metrics::counter!("photo_uploads_completed_total").increment(1);
            info!(
                photo_id = %photo.id,
                job_id = ?photo.job_id,
                "Photo upload completed"
            );

            if let Some(job) = job {
                let event = UploadStatusEvent::photo_completed(&job, &photo);
                if state.broadcaster.emit_transition(&job, event) {
                    info!(job_id = %job.id, status = %job.status, "Upload job finished");
                    state.broadcaster.close_all_connections(job.id);
                }
            }
            Ok(completed(photo_id))
        }
        // Lost the race to a concurrent completion.
        Transition::Skipped(current) if current.status == PhotoStatus::Completed => {
            Ok(completed(photo_id))
        }
        Transition::Skipped(_) => Err(failed_conflict(photo_id)),
        Transition::NotFound => Err(AppError::NotFound(format!("photo {}", photo_id))),
    }
}

fn completed(photo_id: Uuid) -> PhotoTransitionResponse {
    PhotoTransitionResponse {
        photo_id,
        status: PhotoStatus::Completed,
    }
}

fn failed_conflict(photo_id: Uuid) -> AppError {
    AppError::Conflict(format!(
        "photo {} has failed; retry the upload before completing it",
        photo_id
    ))
}

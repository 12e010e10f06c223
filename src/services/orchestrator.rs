use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::app_state::AppState;
use crate::db::Transition;
use crate::error::AppError;
use crate::models::event::UploadStatusEvent;
use crate::models::job::UploadJob;
use crate::models::photo::{object_key, Photo, PhotoStatus};
use crate::models::upload::{
    CreateUploadJobRequest, CreateUploadJobResponse, FieldError, JobDetailsResponse,
    PhotoDetailsResponse, PhotoSummary, PhotoUploadTicket, RetryUploadResponse,
    MAX_PHOTOS_PER_JOB,
};

/// Create an upload job and hand back one presigned write URL per photo.
///
/// Every URL is issued before anything is written, so a gateway failure
/// leaves no job or photo behind.
pub async fn create_upload_job(
    state: &AppState,
    owner_id: Uuid,
    request: CreateUploadJobRequest,
) -> Result<CreateUploadJobResponse, AppError> {
    let count = request.photos.len();
    if count == 0 || count > MAX_PHOTOS_PER_JOB {
        return Err(AppError::Validation(vec![FieldError::new(
            "photos",
            format!("an upload job takes between 1 and {} photos", MAX_PHOTOS_PER_JOB),
        )]));
    }

    let errors = state.validator.validate_job(&request);
    if !errors.is_empty() {
        debug!(owner_id = %owner_id, errors = errors.len(), "Upload job request rejected");
        return Err(AppError::Validation(errors));
    }

    if !state.store.owner_exists(owner_id).await? {
        return Err(AppError::NotFound(format!("owner {}", owner_id)));
    }

    let now = Utc::now();
    let job = UploadJob::new(owner_id, count as i32, now);
    let mut photos = Vec::with_capacity(count);
    let mut tickets = Vec::with_capacity(count);

    for item in request.photos {
        let photo_id = Uuid::new_v4();
        let key = object_key(owner_id, photo_id, &item.filename);
        let upload_url = state
            .storage
            .presign_write(&key, &item.content_type, state.settings.presign_ttl)
            .await?;

        tickets.push(PhotoUploadTicket {
            photo_id,
            filename: item.filename.clone(),
            upload_url,
            object_key: key.clone(),
            status: PhotoStatus::Uploading,
        });
        photos.push(Photo {
            id: photo_id,
            owner_id,
            job_id: Some(job.id),
            filename: item.filename,
            object_key: key,
            file_size: item.file_size,
            content_type: item.content_type,
            status: PhotoStatus::Uploading,
            retry_count: 0,
            created_at: now,
            completed_at: None,
            attempt_started_at: now,
        });
    }

    state.store.create_job(&job, &photos).await?;

    metrics::counter!("upload_jobs_created_total").increment(1);
    info!(
        job_id = %job.id,
        owner_id = %owner_id,
        total_count = job.total_count,
        "Upload job created"
    );

    Ok(CreateUploadJobResponse {
        job_id: job.id,
        owner_id,
        total_count: job.total_count,
        status: job.status,
        photos: tickets,
    })
}

/// Re-open a failed photo with a fresh write URL for the same object key.
pub async fn retry_photo_upload(
    state: &AppState,
    owner_id: Uuid,
    photo_id: Uuid,
) -> Result<RetryUploadResponse, AppError> {
    let photo = owned_photo(state, owner_id, photo_id).await?;

    if photo.status != PhotoStatus::Failed {
        return Err(AppError::Conflict(format!(
            "photo {} is {} and cannot be retried",
            photo_id, photo.status
        )));
    }
    if photo.retry_count >= state.settings.max_retries {
        return Err(AppError::Conflict(format!(
            "photo {} reached the retry limit of {}",
            photo_id, state.settings.max_retries
        )));
    }

    let upload_url = state
        .storage
        .presign_write(&photo.object_key, &photo.content_type, state.settings.presign_ttl)
        .await?;

    let _job_guard = state.broadcaster.lock_job_of(photo.job_id).await;
    match state.store.reset_photo_for_retry(photo_id, Utc::now()).await? {
        Transition::Applied { photo, job } => {
            // Streams closed when the job settled; clients resubscribe to see this.
            if let Some(job) = &job {
                state
                    .broadcaster
                    .emit_event(job.id, &UploadStatusEvent::photo_retrying(job, &photo));
            }
            info!(
                photo_id = %photo.id,
                job_id = ?job.as_ref().map(|j| j.id),
                retry_count = photo.retry_count,
                "Photo reopened for upload"
            );
            Ok(RetryUploadResponse {
                photo_id: photo.id,
                upload_url,
                filename: photo.filename,
                content_type: photo.content_type,
                retry_count: photo.retry_count,
            })
        }
        Transition::Skipped(current) => Err(AppError::Conflict(format!(
            "photo {} is {} and cannot be retried",
            photo_id, current.status
        ))),
        Transition::NotFound => Err(AppError::NotFound(format!("photo {}", photo_id))),
    }
}

/// Job snapshot with progress and its photos, visible to the job's owner only.
pub async fn get_upload_job(
    state: &AppState,
    owner_id: Uuid,
    job_id: Uuid,
) -> Result<JobDetailsResponse, AppError> {
    let job = state
        .store
        .get_job(job_id)
        .await?
        .filter(|job| job.owner_id == owner_id)
        .ok_or_else(|| AppError::NotFound(format!("upload job {}", job_id)))?;

    let photos = state.store.list_job_photos(job_id).await?;

    Ok(JobDetailsResponse {
        progress_percent: job.progress_percent(),
        photos: photos.iter().map(PhotoSummary::from).collect(),
        job,
    })
}

/// Photo status including the message of its latest failed attempt.
pub async fn get_photo(
    state: &AppState,
    owner_id: Uuid,
    photo_id: Uuid,
) -> Result<PhotoDetailsResponse, AppError> {
    let photo = owned_photo(state, owner_id, photo_id).await?;
    let last_error = if photo.status == PhotoStatus::Failed || photo.retry_count > 0 {
        state
            .store
            .latest_failure(photo_id)
            .await?
            .map(|event| event.message)
    } else {
        None
    };

    Ok(PhotoDetailsResponse { photo, last_error })
}

/// Photos owned by someone else are reported as missing.
async fn owned_photo(state: &AppState, owner_id: Uuid, photo_id: Uuid) -> Result<Photo, AppError> {
    state
        .store
        .get_photo(photo_id)
        .await?
        .filter(|photo| photo.owner_id == owner_id)
        .ok_or_else(|| AppError::NotFound(format!("photo {}", photo_id)))
}

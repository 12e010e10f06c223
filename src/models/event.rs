use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::job::{JobStatus, UploadJob};
use crate::models::photo::{Photo, PhotoStatus};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StatusEventType {
    Connected,
    PhotoCompleted,
    PhotoFailed,
    /// A failed photo was reopened; its job is back in progress.
    PhotoRetrying,
    JobCompleted,
}

/// Progress event pushed to live subscribers of a job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UploadStatusEvent {
    pub event_type: StatusEventType,
    pub job_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub photo_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_status: Option<JobStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub photo_status: Option<PhotoStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress_percent: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_count: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_count: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_count: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl UploadStatusEvent {
    /// First event on every new subscription.
    pub fn connected(job_id: Uuid) -> Self {
        Self {
            event_type: StatusEventType::Connected,
            job_id,
            photo_id: None,
            job_status: None,
            photo_status: None,
            progress_percent: None,
            completed_count: None,
            failed_count: None,
            total_count: None,
            error_message: None,
            timestamp: Utc::now(),
        }
    }

    pub fn photo_completed(job: &UploadJob, photo: &Photo) -> Self {
        Self::for_photo(StatusEventType::PhotoCompleted, job, photo, None)
    }

    pub fn photo_failed(job: &UploadJob, photo: &Photo, error_message: &str) -> Self {
        Self::for_photo(
            StatusEventType::PhotoFailed,
            job,
            photo,
            Some(error_message.to_string()),
        )
    }

    pub fn photo_retrying(job: &UploadJob, photo: &Photo) -> Self {
        Self::for_photo(StatusEventType::PhotoRetrying, job, photo, None)
    }

    /// Terminal event for a job; progress is reported as 100%.
    pub fn job_completed(job: &UploadJob) -> Self {
        Self {
            event_type: StatusEventType::JobCompleted,
            job_id: job.id,
            photo_id: None,
            job_status: Some(job.status),
            photo_status: None,
            progress_percent: Some(100.0),
            completed_count: Some(job.completed_count),
            failed_count: Some(job.failed_count),
            total_count: Some(job.total_count),
            error_message: None,
            timestamp: Utc::now(),
        }
    }

    fn for_photo(
        event_type: StatusEventType,
        job: &UploadJob,
        photo: &Photo,
        error_message: Option<String>,
    ) -> Self {
        Self {
            event_type,
            job_id: job.id,
            photo_id: Some(photo.id),
            job_status: Some(job.status),
            photo_status: Some(photo.status),
            progress_percent: Some(job.progress_percent()),
            completed_count: Some(job.completed_count),
            failed_count: Some(job.failed_count),
            total_count: Some(job.total_count),
            error_message,
            timestamp: Utc::now(),
        }
    }
}

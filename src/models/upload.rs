use garde::Validate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::job::{JobStatus, UploadJob};
use crate::models::photo::{Photo, PhotoStatus};

/// Maximum number of photos accepted in one upload job.
pub const MAX_PHOTOS_PER_JOB: usize = 100;

const ALLOWED_CONTENT_TYPES: &[&str] = &[
    "image/jpeg",
    "image/jpg",
    "image/png",
    "image/gif",
    "image/webp",
];

/// Request to start a batch upload.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateUploadJobRequest {
    #[garde(length(min = 1, max = 100), dive)]
    pub photos: Vec<PhotoUploadItem>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PhotoUploadItem {
    #[garde(length(min = 1, max = 500), custom(valid_filename))]
    pub filename: String,

    #[garde(range(min = 1024, max = 10485760))]
    pub file_size: i64,

    #[garde(custom(valid_content_type))]
    pub content_type: String,
}

/// Client report that an upload to the object store failed.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct FailPhotoUploadRequest {
    #[garde(length(max = 2000), custom(not_blank))]
    pub error_message: String,
}

fn valid_filename(value: &str, _ctx: &()) -> garde::Result {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(garde::Error::new("filename cannot be empty"));
    }
    let forbidden = ['/', '\\', '\0', '<', '>', ':', '"', '|', '?', '*'];
    if trimmed.contains("..") || trimmed.chars().any(|c| forbidden.contains(&c)) {
        return Err(garde::Error::new("filename contains invalid characters"));
    }
    Ok(())
}

fn valid_content_type(value: &str, _ctx: &()) -> garde::Result {
    if ALLOWED_CONTENT_TYPES.contains(&value.to_ascii_lowercase().as_str()) {
        Ok(())
    } else {
        Err(garde::Error::new(format!(
            "content type must be one of: {}",
            ALLOWED_CONTENT_TYPES.join(", ")
        )))
    }
}

fn not_blank(value: &str, _ctx: &()) -> garde::Result {
    if value.trim().is_empty() {
        Err(garde::Error::new("error message is required"))
    } else {
        Ok(())
    }
}

/// A single field-level validation problem.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Write locator handed back for one photo of a new job.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoUploadTicket {
    pub photo_id: Uuid,
    pub filename: String,
    pub upload_url: String,
    pub object_key: String,
    pub status: PhotoStatus,
}

/// Response after creating an upload job.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUploadJobResponse {
    pub job_id: Uuid,
    pub owner_id: Uuid,
    pub total_count: i32,
    pub status: JobStatus,
    pub photos: Vec<PhotoUploadTicket>,
}

/// Response to a completion or failure report.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoTransitionResponse {
    pub photo_id: Uuid,
    pub status: PhotoStatus,
}

/// Response after re-opening a failed photo for upload.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryUploadResponse {
    pub photo_id: Uuid,
    pub upload_url: String,
    pub filename: String,
    pub content_type: String,
    pub retry_count: i32,
}

/// Job snapshot with its photos.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDetailsResponse {
    #[serde(flatten)]
    pub job: UploadJob,
    pub progress_percent: f64,
    pub photos: Vec<PhotoSummary>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoSummary {
    pub photo_id: Uuid,
    pub filename: String,
    pub status: PhotoStatus,
    pub retry_count: i32,
}

impl From<&Photo> for PhotoSummary {
    fn from(photo: &Photo) -> Self {
        Self {
            photo_id: photo.id,
            filename: photo.filename.clone(),
            status: photo.status,
            retry_count: photo.retry_count,
        }
    }
}

/// Photo status as seen by its owner, including the latest failure.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoDetailsResponse {
    #[serde(flatten)]
    pub photo: Photo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(filename: &str, size: i64, content_type: &str) -> PhotoUploadItem {
        PhotoUploadItem {
            filename: filename.to_string(),
            file_size: size,
            content_type: content_type.to_string(),
        }
    }

    #[test]
    fn test_valid_request() {
        let request = CreateUploadJobRequest {
            photos: vec![item("a.jpg", 2048, "image/jpeg")],
        };
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_empty_request_rejected() {
        let request = CreateUploadJobRequest { photos: vec![] };
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_path_traversal_rejected() {
        assert!(item("../etc/passwd", 2048, "image/png").validate().is_err());
        assert!(item("a/b.png", 2048, "image/png").validate().is_err());
    }

    #[test]
    fn test_size_bounds() {
        assert!(item("a.jpg", 100, "image/jpeg").validate().is_err());
        assert!(item("a.jpg", 10 * 1024 * 1024 + 1, "image/jpeg").validate().is_err());
        assert!(item("a.jpg", 1024, "image/jpeg").validate().is_ok());
    }

    #[test]
    fn test_content_type_allowlist() {
        assert!(item("a.jpg", 2048, "IMAGE/PNG").validate().is_ok());
        assert!(item("a.pdf", 2048, "application/pdf").validate().is_err());
    }

    #[test]
    fn test_blank_error_message_rejected() {
        let request = FailPhotoUploadRequest {
            error_message: "   ".to_string(),
        };
        assert!(request.validate().is_err());
    }
}

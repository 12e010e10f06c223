use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

/// Upload status of a single photo.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, EnumString, Display, AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "snake_case")]
pub enum PhotoStatus {
    Uploading,
    Completed,
    Failed,
}

/// A single file's upload placeholder, tied 1:1 to an object key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Photo {
    pub id: Uuid,
    pub owner_id: Uuid,
    /// Parent job, if it still exists. Lookup only.
    pub job_id: Option<Uuid>,
    pub filename: String,
    pub object_key: String,
    pub file_size: i64,
    pub content_type: String,
    pub status: PhotoStatus,
    pub retry_count: i32,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Start of the current upload attempt; moves forward on retry.
    pub attempt_started_at: DateTime<Utc>,
}

/// Append-only audit record of a failed upload attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FailureEvent {
    pub id: Uuid,
    pub photo_id: Uuid,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

impl FailureEvent {
    pub fn new(photo_id: Uuid, message: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            photo_id,
            message: message.to_string(),
            created_at: now,
        }
    }
}

/// Build the object key for a photo: `uploads/{owner}/{photo}-{filename}`.
///
/// Every character outside `[A-Za-z0-9._-]` in the filename becomes `_`, so
/// the key never contains path separators supplied by the client.
pub fn object_key(owner_id: Uuid, photo_id: Uuid, filename: &str) -> String {
    let sanitized: String = filename
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("uploads/{}/{}-{}", owner_id, photo_id, sanitized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_key_is_deterministic() {
        let owner = Uuid::new_v4();
        let photo = Uuid::new_v4();
        assert_eq!(
            object_key(owner, photo, "a.jpg"),
            format!("uploads/{}/{}-a.jpg", owner, photo)
        );
        assert_eq!(object_key(owner, photo, "a.jpg"), object_key(owner, photo, "a.jpg"));
    }

    #[test]
    fn test_object_key_sanitizes_filename() {
        let owner = Uuid::nil();
        let photo = Uuid::nil();
        let key = object_key(owner, photo, "../my photo (1)/é.png");
        assert!(key.ends_with("-.._my_photo__1___.png"));
        assert_eq!(key.matches('/').count(), 2);
    }

    #[test]
    fn test_photo_status_strings() {
        assert_eq!(PhotoStatus::Uploading.as_ref(), "uploading");
        assert_eq!("failed".parse::<PhotoStatus>().unwrap(), PhotoStatus::Failed);
        assert_eq!(
            serde_json::to_string(&PhotoStatus::Completed).unwrap(),
            "\"COMPLETED\""
        );
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

/// Aggregate status of an upload job.
///
/// Serialized as `IN_PROGRESS` on the wire and stored as `in_progress` in the
/// database.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, EnumString, Display, AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    InProgress,
    Completed,
    Failed,
}

impl JobStatus {
    /// Derive the job status from its counters.
    ///
    /// A job with any failed photo ends as `Failed` once every photo has
    /// settled; there is no separate partial-success state.
    pub fn derive(total: i32, completed: i32, failed: i32) -> Self {
        if completed + failed < total {
            JobStatus::InProgress
        } else if failed == 0 {
            JobStatus::Completed
        } else {
            JobStatus::Failed
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, JobStatus::InProgress)
    }
}

/// A batch upload spanning one or more photos.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UploadJob {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub total_count: i32,
    pub completed_count: i32,
    pub failed_count: i32,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UploadJob {
    pub fn new(owner_id: Uuid, total_count: i32, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_id,
            total_count,
            completed_count: 0,
            failed_count: 0,
            status: JobStatus::derive(total_count, 0, 0),
            created_at: now,
            updated_at: now,
        }
    }

    /// Percentage of photos that have settled, either way.
    pub fn progress_percent(&self) -> f64 {
        if self.total_count == 0 {
            return 0.0;
        }
        f64::from(self.completed_count + self.failed_count) / f64::from(self.total_count) * 100.0
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

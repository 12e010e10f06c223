use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;
use uuid::Uuid;

use crate::models::job::UploadJob;
use crate::models::photo::{FailureEvent, Photo, PhotoStatus};

pub mod memory;
pub mod postgres;
pub mod queries;

pub use memory::MemoryUploadStore;
pub use postgres::PgUploadStore;

/// Initialize PostgreSQL connection pool
pub async fn init_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(20)
        .min_connections(5)
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(database_url)
        .await
}

/// Run database migrations
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| sqlx::Error::Migrate(Box::new(e)))
}

/// Outcome of a guarded photo state change.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// The photo moved to the new state. `job` is the parent job after its
    /// counters were updated, or `None` when the photo has no parent job.
    Applied { photo: Photo, job: Option<UploadJob> },
    /// The photo was not in the required source state; nothing changed.
    Skipped(Photo),
    /// No photo with that id.
    NotFound,
}

/// Persistence for upload jobs and their photos.
///
/// Every `mark_*`/`reset_*` method runs the photo update, the parent job's
/// counter update, and any audit insert as one unit: either all of it is
/// visible afterwards or none of it is.
#[async_trait]
pub trait UploadStore: Send + Sync {
    async fn owner_exists(&self, owner_id: Uuid) -> Result<bool, StoreError>;

    /// Persist a new job together with all of its photos.
    async fn create_job(&self, job: &UploadJob, photos: &[Photo]) -> Result<(), StoreError>;

    async fn get_job(&self, job_id: Uuid) -> Result<Option<UploadJob>, StoreError>;

    async fn get_photo(&self, photo_id: Uuid) -> Result<Option<Photo>, StoreError>;

    async fn list_job_photos(&self, job_id: Uuid) -> Result<Vec<Photo>, StoreError>;

    /// UPLOADING -> COMPLETED, stamping `completed_at` and bumping the job's
    /// completed counter.
    async fn mark_photo_completed(
        &self,
        photo_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Transition, StoreError>;

    /// UPLOADING -> FAILED, bumping `retry_count` and the job's failed
    /// counter and appending a failure event.
    async fn mark_photo_failed(
        &self,
        photo_id: Uuid,
        message: &str,
        now: DateTime<Utc>,
    ) -> Result<Transition, StoreError>;

    /// FAILED -> UPLOADING, starting a new attempt and giving the failed slot
    /// back to the job.
    async fn reset_photo_for_retry(
        &self,
        photo_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Transition, StoreError>;

    /// Photos in `status` whose current attempt started before `cutoff`.
    async fn find_by_status_and_created_before(
        &self,
        status: PhotoStatus,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Photo>, StoreError>;

    async fn count_by_status_and_created_before(
        &self,
        status: PhotoStatus,
        cutoff: DateTime<Utc>,
    ) -> Result<i64, StoreError>;

    async fn latest_failure(&self, photo_id: Uuid) -> Result<Option<FailureEvent>, StoreError>;

    async fn health_check(&self) -> Result<(), StoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Counter invariant violated for job {0}")]
    CounterInvariant(Uuid),

    #[error("Duplicate key: {0}")]
    Duplicate(String),
}

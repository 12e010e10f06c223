use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::{queries, StoreError, Transition, UploadStore};
use crate::models::job::UploadJob;
use crate::models::photo::{FailureEvent, Photo, PhotoStatus};

/// PostgreSQL-backed upload store.
///
/// Counter updates are single `UPDATE ... SET n = n + 1` statements, so
/// concurrent transitions on one job serialize on the job row instead of
/// racing in application memory.
#[derive(Clone)]
pub struct PgUploadStore {
    pool: PgPool,
}

impl PgUploadStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn map_insert_err(e: sqlx::Error) -> StoreError {
    match e.as_database_error() {
        Some(db) if db.is_unique_violation() => StoreError::Duplicate(db.message().to_string()),
        _ => StoreError::Database(e),
    }
}

#[async_trait]
impl UploadStore for PgUploadStore {
    async fn owner_exists(&self, owner_id: Uuid) -> Result<bool, StoreError> {
        Ok(queries::owner_exists(&self.pool, owner_id).await?)
    }

    async fn create_job(&self, job: &UploadJob, photos: &[Photo]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        queries::insert_job(&mut *tx, job).await.map_err(map_insert_err)?;
        for photo in photos {
            queries::insert_photo(&mut *tx, photo)
                .await
                .map_err(map_insert_err)?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<UploadJob>, StoreError> {
        Ok(queries::get_job(&self.pool, job_id).await?)
    }

    async fn get_photo(&self, photo_id: Uuid) -> Result<Option<Photo>, StoreError> {
        Ok(queries::get_photo(&self.pool, photo_id).await?)
    }

    async fn list_job_photos(&self, job_id: Uuid) -> Result<Vec<Photo>, StoreError> {
        Ok(queries::list_job_photos(&self.pool, job_id).await?)
    }

    async fn mark_photo_completed(
        &self,
        photo_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Transition, StoreError> {
        let mut tx = self.pool.begin().await?;

        let Some(photo) = queries::complete_photo_if_uploading(&mut *tx, photo_id, now).await?
        else {
            let current = queries::get_photo(&mut *tx, photo_id).await?;
            tx.rollback().await?;
            return Ok(current.map_or(Transition::NotFound, Transition::Skipped));
        };

        let job = match photo.job_id {
            Some(job_id) => Some(
                queries::increment_completed(&mut *tx, job_id, now)
                    .await?
                    .ok_or(StoreError::CounterInvariant(job_id))?,
            ),
            None => None,
        };

        tx.commit().await?;
        Ok(Transition::Applied { photo, job })
    }

    async fn mark_photo_failed(
        &self,
        photo_id: Uuid,
        message: &str,
        now: DateTime<Utc>,
    ) -> Result<Transition, StoreError> {
        let mut tx = self.pool.begin().await?;

        let Some(photo) = queries::fail_photo_if_uploading(&mut *tx, photo_id).await? else {
            let current = queries::get_photo(&mut *tx, photo_id).await?;
            tx.rollback().await?;
            return Ok(current.map_or(Transition::NotFound, Transition::Skipped));
        };

        queries::insert_failure_event(&mut *tx, &FailureEvent::new(photo_id, message, now))
            .await?;

        let job = match photo.job_id {
            Some(job_id) => Some(
                queries::increment_failed(&mut *tx, job_id, now)
                    .await?
                    .ok_or(StoreError::CounterInvariant(job_id))?,
            ),
            None => None,
        };

        tx.commit().await?;
        Ok(Transition::Applied { photo, job })
    }

    async fn reset_photo_for_retry(
        &self,
        photo_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Transition, StoreError> {
        let mut tx = self.pool.begin().await?;

        let Some(photo) = queries::reopen_failed_photo(&mut *tx, photo_id, now).await? else {
            let current = queries::get_photo(&mut *tx, photo_id).await?;
            tx.rollback().await?;
            return Ok(current.map_or(Transition::NotFound, Transition::Skipped));
        };

        let job = match photo.job_id {
            Some(job_id) => Some(
                queries::decrement_failed(&mut *tx, job_id, now)
                    .await?
                    .ok_or(StoreError::CounterInvariant(job_id))?,
            ),
            None => None,
        };

        tx.commit().await?;
        Ok(Transition::Applied { photo, job })
    }

    async fn find_by_status_and_created_before(
        &self,
        status: PhotoStatus,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Photo>, StoreError> {
        Ok(queries::find_photos_by_status_created_before(&self.pool, status, cutoff).await?)
    }

    async fn count_by_status_and_created_before(
        &self,
        status: PhotoStatus,
        cutoff: DateTime<Utc>,
    ) -> Result<i64, StoreError> {
        Ok(queries::count_photos_by_status_created_before(&self.pool, status, cutoff).await?)
    }

    async fn latest_failure(&self, photo_id: Uuid) -> Result<Option<FailureEvent>, StoreError> {
        Ok(queries::latest_failure(&self.pool, photo_id).await?)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgExecutor, Row};
use uuid::Uuid;

use crate::models::job::{JobStatus, UploadJob};
use crate::models::photo::{FailureEvent, Photo, PhotoStatus};

const JOB_COLUMNS: &str = "id, owner_id, total_count, completed_count, failed_count, status, \
                           created_at, updated_at";

const PHOTO_COLUMNS: &str = "id, owner_id, job_id, filename, object_key, file_size, content_type, \
                             status, retry_count, created_at, completed_at, attempt_started_at";

fn decode_err(e: strum::ParseError) -> sqlx::Error {
    sqlx::Error::Decode(Box::new(e))
}

fn job_from_row(row: &PgRow) -> Result<UploadJob, sqlx::Error> {
    let status: String = row.try_get("status")?;
    Ok(UploadJob {
        id: row.try_get("id")?,
        owner_id: row.try_get("owner_id")?,
        total_count: row.try_get("total_count")?,
        completed_count: row.try_get("completed_count")?,
        failed_count: row.try_get("failed_count")?,
        status: status.parse::<JobStatus>().map_err(decode_err)?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn photo_from_row(row: &PgRow) -> Result<Photo, sqlx::Error> {
    let status: String = row.try_get("status")?;
    Ok(Photo {
        id: row.try_get("id")?,
        owner_id: row.try_get("owner_id")?,
        job_id: row.try_get("job_id")?,
        filename: row.try_get("filename")?,
        object_key: row.try_get("object_key")?,
        file_size: row.try_get("file_size")?,
        content_type: row.try_get("content_type")?,
        status: status.parse::<PhotoStatus>().map_err(decode_err)?,
        retry_count: row.try_get("retry_count")?,
        created_at: row.try_get("created_at")?,
        completed_at: row.try_get("completed_at")?,
        attempt_started_at: row.try_get("attempt_started_at")?,
    })
}

/// Check that an owner (user) row exists
pub async fn owner_exists<'e>(
    executor: impl PgExecutor<'e>,
    owner_id: Uuid,
) -> Result<bool, sqlx::Error> {
    let row = sqlx::query("SELECT EXISTS(SELECT 1 FROM users WHERE id = $1) AS present")
        .bind(owner_id)
        .fetch_one(executor)
        .await?;
    row.try_get("present")
}

/// Insert a new upload job
pub async fn insert_job<'e>(
    executor: impl PgExecutor<'e>,
    job: &UploadJob,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO upload_jobs (id, owner_id, total_count, completed_count, failed_count,
                                 status, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(job.id)
    .bind(job.owner_id)
    .bind(job.total_count)
    .bind(job.completed_count)
    .bind(job.failed_count)
    .bind(job.status.as_ref())
    .bind(job.created_at)
    .bind(job.updated_at)
    .execute(executor)
    .await?;

    Ok(())
}

/// Insert a photo placeholder
pub async fn insert_photo<'e>(
    executor: impl PgExecutor<'e>,
    photo: &Photo,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO photos (id, owner_id, job_id, filename, object_key, file_size, content_type,
                            status, retry_count, created_at, completed_at, attempt_started_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        "#,
    )
    .bind(photo.id)
    .bind(photo.owner_id)
    .bind(photo.job_id)
    .bind(&photo.filename)
    .bind(&photo.object_key)
    .bind(photo.file_size)
    .bind(&photo.content_type)
    .bind(photo.status.as_ref())
    .bind(photo.retry_count)
    .bind(photo.created_at)
    .bind(photo.completed_at)
    .bind(photo.attempt_started_at)
    .execute(executor)
    .await?;

    Ok(())
}

/// Get a job by ID
pub async fn get_job<'e>(
    executor: impl PgExecutor<'e>,
    job_id: Uuid,
) -> Result<Option<UploadJob>, sqlx::Error> {
    let sql = format!("SELECT {} FROM upload_jobs WHERE id = $1", JOB_COLUMNS);
    let row = sqlx::query(&sql).bind(job_id).fetch_optional(executor).await?;
    row.as_ref().map(job_from_row).transpose()
}

/// Get a photo by ID
pub async fn get_photo<'e>(
    executor: impl PgExecutor<'e>,
    photo_id: Uuid,
) -> Result<Option<Photo>, sqlx::Error> {
    let sql = format!("SELECT {} FROM photos WHERE id = $1", PHOTO_COLUMNS);
    let row = sqlx::query(&sql).bind(photo_id).fetch_optional(executor).await?;
    row.as_ref().map(photo_from_row).transpose()
}

/// All photos that reference a job, oldest first
pub async fn list_job_photos<'e>(
    executor: impl PgExecutor<'e>,
    job_id: Uuid,
) -> Result<Vec<Photo>, sqlx::Error> {
    let sql = format!(
        "SELECT {} FROM photos WHERE job_id = $1 ORDER BY created_at ASC, id ASC",
        PHOTO_COLUMNS
    );
    let rows = sqlx::query(&sql).bind(job_id).fetch_all(executor).await?;
    rows.iter().map(photo_from_row).collect()
}

/// Mark a photo completed, only if it is still uploading
pub async fn complete_photo_if_uploading<'e>(
    executor: impl PgExecutor<'e>,
    photo_id: Uuid,
    now: DateTime<Utc>,
) -> Result<Option<Photo>, sqlx::Error> {
    let sql = format!(
        r#"
        UPDATE photos
        SET status = 'completed', completed_at = $2
        WHERE id = $1 AND status = 'uploading'
        RETURNING {}
        "#,
        PHOTO_COLUMNS
    );
    let row = sqlx::query(&sql)
        .bind(photo_id)
        .bind(now)
        .fetch_optional(executor)
        .await?;
    row.as_ref().map(photo_from_row).transpose()
}

/// Mark a photo failed and bump its retry count, only if it is still uploading
pub async fn fail_photo_if_uploading<'e>(
    executor: impl PgExecutor<'e>,
    photo_id: Uuid,
) -> Result<Option<Photo>, sqlx::Error> {
    let sql = format!(
        r#"
        UPDATE photos
        SET status = 'failed', retry_count = retry_count + 1
        WHERE id = $1 AND status = 'uploading'
        RETURNING {}
        "#,
        PHOTO_COLUMNS
    );
    let row = sqlx::query(&sql).bind(photo_id).fetch_optional(executor).await?;
    row.as_ref().map(photo_from_row).transpose()
}

/// Put a failed photo back into uploading with a fresh attempt timestamp
pub async fn reopen_failed_photo<'e>(
    executor: impl PgExecutor<'e>,
    photo_id: Uuid,
    now: DateTime<Utc>,
) -> Result<Option<Photo>, sqlx::Error> {
    let sql = format!(
        r#"
        UPDATE photos
        SET status = 'uploading', attempt_started_at = $2
        WHERE id = $1 AND status = 'failed'
        RETURNING {}
        "#,
        PHOTO_COLUMNS
    );
    let row = sqlx::query(&sql)
        .bind(photo_id)
        .bind(now)
        .fetch_optional(executor)
        .await?;
    row.as_ref().map(photo_from_row).transpose()
}

/// Append a failure audit record
pub async fn insert_failure_event<'e>(
    executor: impl PgExecutor<'e>,
    event: &FailureEvent,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO upload_failure_events (id, photo_id, message, created_at)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(event.id)
    .bind(event.photo_id)
    .bind(&event.message)
    .bind(event.created_at)
    .execute(executor)
    .await?;

    Ok(())
}

/// Increment a job's completed counter in place and recompute its status.
///
/// Returns `None` if the job does not exist or is already full.
pub async fn increment_completed<'e>(
    executor: impl PgExecutor<'e>,
    job_id: Uuid,
    now: DateTime<Utc>,
) -> Result<Option<UploadJob>, sqlx::Error> {
    let sql = format!(
        r#"
        UPDATE upload_jobs
        SET completed_count = completed_count + 1,
            status = CASE
                WHEN completed_count + 1 + failed_count < total_count THEN 'in_progress'
                WHEN failed_count = 0 THEN 'completed'
                ELSE 'failed'
            END,
            updated_at = $2
        WHERE id = $1 AND completed_count + failed_count < total_count
        RETURNING {}
        "#,
        JOB_COLUMNS
    );
    let row = sqlx::query(&sql)
        .bind(job_id)
        .bind(now)
        .fetch_optional(executor)
        .await?;
    row.as_ref().map(job_from_row).transpose()
}

/// Increment a job's failed counter in place and recompute its status.
///
/// Returns `None` if the job does not exist or is already full.
pub async fn increment_failed<'e>(
    executor: impl PgExecutor<'e>,
    job_id: Uuid,
    now: DateTime<Utc>,
) -> Result<Option<UploadJob>, sqlx::Error> {
    let sql = format!(
        r#"
        UPDATE upload_jobs
        SET failed_count = failed_count + 1,
            status = CASE
                WHEN completed_count + failed_count + 1 < total_count THEN 'in_progress'
                ELSE 'failed'
            END,
            updated_at = $2
        WHERE id = $1 AND completed_count + failed_count < total_count
        RETURNING {}
        "#,
        JOB_COLUMNS
    );
    let row = sqlx::query(&sql)
        .bind(job_id)
        .bind(now)
        .fetch_optional(executor)
        .await?;
    row.as_ref().map(job_from_row).transpose()
}

/// Give a failed slot back to a job after a photo is retried
pub async fn decrement_failed<'e>(
    executor: impl PgExecutor<'e>,
    job_id: Uuid,
    now: DateTime<Utc>,
) -> Result<Option<UploadJob>, sqlx::Error> {
    let sql = format!(
        r#"
        UPDATE upload_jobs
        SET failed_count = failed_count - 1,
            status = 'in_progress',
            updated_at = $2
        WHERE id = $1 AND failed_count > 0
        RETURNING {}
        "#,
        JOB_COLUMNS
    );
    let row = sqlx::query(&sql)
        .bind(job_id)
        .bind(now)
        .fetch_optional(executor)
        .await?;
    row.as_ref().map(job_from_row).transpose()
}

/// Photos in a status whose current attempt started before the cutoff
pub async fn find_photos_by_status_created_before<'e>(
    executor: impl PgExecutor<'e>,
    status: PhotoStatus,
    cutoff: DateTime<Utc>,
) -> Result<Vec<Photo>, sqlx::Error> {
    let sql = format!(
        r#"
        SELECT {}
        FROM photos
        WHERE status = $1 AND attempt_started_at < $2
        ORDER BY attempt_started_at ASC
        "#,
        PHOTO_COLUMNS
    );
    let rows = sqlx::query(&sql)
        .bind(status.as_ref())
        .bind(cutoff)
        .fetch_all(executor)
        .await?;
    rows.iter().map(photo_from_row).collect()
}

/// Count photos in a status whose current attempt started before the cutoff
pub async fn count_photos_by_status_created_before<'e>(
    executor: impl PgExecutor<'e>,
    status: PhotoStatus,
    cutoff: DateTime<Utc>,
) -> Result<i64, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT COUNT(*) AS stalled
        FROM photos
        WHERE status = $1 AND attempt_started_at < $2
        "#,
    )
    .bind(status.as_ref())
    .bind(cutoff)
    .fetch_one(executor)
    .await?;
    row.try_get("stalled")
}

/// Most recent failure recorded for a photo
pub async fn latest_failure<'e>(
    executor: impl PgExecutor<'e>,
    photo_id: Uuid,
) -> Result<Option<FailureEvent>, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT id, photo_id, message, created_at
        FROM upload_failure_events
        WHERE photo_id = $1
        ORDER BY created_at DESC
        LIMIT 1
        "#,
    )
    .bind(photo_id)
    .fetch_optional(executor)
    .await?;

    row.map(|r| {
        Ok::<_, sqlx::Error>(FailureEvent {
            id: r.try_get("id")?,
            photo_id: r.try_get("photo_id")?,
            message: r.try_get("message")?,
            created_at: r.try_get("created_at")?,
        })
    })
    .transpose()
}

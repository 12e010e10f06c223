use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{StoreError, Transition, UploadStore};
use crate::models::job::{JobStatus, UploadJob};
use crate::models::photo::{FailureEvent, Photo, PhotoStatus};

#[derive(Default)]
struct State {
    owners: HashSet<Uuid>,
    jobs: HashMap<Uuid, UploadJob>,
    photos: HashMap<Uuid, Photo>,
    failures: Vec<FailureEvent>,
}

impl State {
    /// Apply a counter change to a job and re-derive its status.
    ///
    /// Refuses any change that would break `completed + failed <= total`.
    fn adjust_job(
        &mut self,
        job_id: Uuid,
        completed_delta: i32,
        failed_delta: i32,
        now: DateTime<Utc>,
    ) -> Result<Option<UploadJob>, StoreError> {
        let Some(job) = self.jobs.get_mut(&job_id) else {
            return Ok(None);
        };
        let completed = job.completed_count + completed_delta;
        let failed = job.failed_count + failed_delta;
        if completed < 0 || failed < 0 || completed + failed > job.total_count {
            return Err(StoreError::CounterInvariant(job_id));
        }
        job.completed_count = completed;
        job.failed_count = failed;
        job.status = JobStatus::derive(job.total_count, completed, failed);
        job.updated_at = now;
        Ok(Some(job.clone()))
    }
}

/// In-process upload store.
///
/// Each operation holds one lock for its whole duration, which gives the
/// same all-or-nothing behaviour as a database transaction. Used for local
/// development and tests.
#[derive(Default)]
pub struct MemoryUploadStore {
    state: Mutex<State>,
}

impl MemoryUploadStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an owner id, as the identity system would.
    pub async fn add_owner(&self, owner_id: Uuid) {
        self.state.lock().await.owners.insert(owner_id);
    }

    /// All failure events recorded for a photo, oldest first.
    pub async fn failures_for(&self, photo_id: Uuid) -> Vec<FailureEvent> {
        self.state
            .lock()
            .await
            .failures
            .iter()
            .filter(|f| f.photo_id == photo_id)
            .cloned()
            .collect()
    }

    pub async fn job_count(&self) -> usize {
        self.state.lock().await.jobs.len()
    }

    pub async fn photo_count(&self) -> usize {
        self.state.lock().await.photos.len()
    }
}

#[async_trait]
impl UploadStore for MemoryUploadStore {
    async fn owner_exists(&self, owner_id: Uuid) -> Result<bool, StoreError> {
        Ok(self.state.lock().await.owners.contains(&owner_id))
    }

    async fn create_job(&self, job: &UploadJob, photos: &[Photo]) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;

        if state.jobs.contains_key(&job.id) {
            return Err(StoreError::Duplicate(format!("job {}", job.id)));
        }
        let mut keys = HashSet::new();
        for photo in photos {
            let clash = state.photos.contains_key(&photo.id)
                || state.photos.values().any(|p| p.object_key == photo.object_key)
                || !keys.insert(photo.object_key.as_str());
            if clash {
                return Err(StoreError::Duplicate(photo.object_key.clone()));
            }
        }

        state.jobs.insert(job.id, job.clone());
        for photo in photos {
            state.photos.insert(photo.id, photo.clone());
        }
        Ok(())
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<UploadJob>, StoreError> {
        Ok(self.state.lock().await.jobs.get(&job_id).cloned())
    }

    async fn get_photo(&self, photo_id: Uuid) -> Result<Option<Photo>, StoreError> {
        Ok(self.state.lock().await.photos.get(&photo_id).cloned())
    }

    async fn list_job_photos(&self, job_id: Uuid) -> Result<Vec<Photo>, StoreError> {
        let state = self.state.lock().await;
        let mut photos: Vec<Photo> = state
            .photos
            .values()
            .filter(|p| p.job_id == Some(job_id))
            .cloned()
            .collect();
        photos.sort_by_key(|p| (p.created_at, p.id));
        Ok(photos)
    }

    async fn mark_photo_completed(
        &self,
        photo_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Transition, StoreError> {
        let mut state = self.state.lock().await;
        let Some(current) = state.photos.get(&photo_id).cloned() else {
            return Ok(Transition::NotFound);
        };
        if current.status != PhotoStatus::Uploading {
            return Ok(Transition::Skipped(current));
        }

        let job = match current.job_id {
            Some(job_id) => state.adjust_job(job_id, 1, 0, now)?,
            None => None,
        };

        let mut photo = current;
        photo.status = PhotoStatus::Completed;
        photo.completed_at = Some(now);
        state.photos.insert(photo_id, photo.clone());

        Ok(Transition::Applied { photo, job })
    }

    async fn mark_photo_failed(
        &self,
        photo_id: Uuid,
        message: &str,
        now: DateTime<Utc>,
    ) -> Result<Transition, StoreError> {
        let mut state = self.state.lock().await;
        let Some(current) = state.photos.get(&photo_id).cloned() else {
            return Ok(Transition::NotFound);
        };
        if current.status != PhotoStatus::Uploading {
            return Ok(Transition::Skipped(current));
        }

        let job = match current.job_id {
            Some(job_id) => state.adjust_job(job_id, 0, 1, now)?,
            None => None,
        };

        let mut photo = current;
        photo.status = PhotoStatus::Failed;
        photo.retry_count += 1;
        state.photos.insert(photo_id, photo.clone());
        state.failures.push(FailureEvent::new(photo_id, message, now));

        Ok(Transition::Applied { photo, job })
    }

    async fn reset_photo_for_retry(
        &self,
        photo_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Transition, StoreError> {
        let mut state = self.state.lock().await;
        let Some(current) = state.photos.get(&photo_id).cloned() else {
            return Ok(Transition::NotFound);
        };
        if current.status != PhotoStatus::Failed {
            return Ok(Transition::Skipped(current));
        }

        let job = match current.job_id {
            Some(job_id) => state.adjust_job(job_id, 0, -1, now)?,
            None => None,
        };

        let mut photo = current;
        photo.status = PhotoStatus::Uploading;
        photo.attempt_started_at = now;
        state.photos.insert(photo_id, photo.clone());

        Ok(Transition::Applied { photo, job })
    }

    async fn find_by_status_and_created_before(
        &self,
        status: PhotoStatus,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Photo>, StoreError> {
        let state = self.state.lock().await;
        let mut photos: Vec<Photo> = state
            .photos
            .values()
            .filter(|p| p.status == status && p.attempt_started_at < cutoff)
            .cloned()
            .collect();
        photos.sort_by_key(|p| p.attempt_started_at);
        Ok(photos)
    }

    async fn count_by_status_and_created_before(
        &self,
        status: PhotoStatus,
        cutoff: DateTime<Utc>,
    ) -> Result<i64, StoreError> {
        let state = self.state.lock().await;
        let count = state
            .photos
            .values()
            .filter(|p| p.status == status && p.attempt_started_at < cutoff)
            .count();
        Ok(count as i64)
    }

    async fn latest_failure(&self, photo_id: Uuid) -> Result<Option<FailureEvent>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .failures
            .iter()
            .rev()
            .find(|f| f.photo_id == photo_id)
            .cloned())
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn photo(owner_id: Uuid, job_id: Uuid, name: &str) -> Photo {
        let now = Utc::now();
        let id = Uuid::new_v4();
        Photo {
            id,
            owner_id,
            job_id: Some(job_id),
            filename: name.to_string(),
            object_key: crate::models::photo::object_key(owner_id, id, name),
            file_size: 2048,
            content_type: "image/jpeg".to_string(),
            status: PhotoStatus::Uploading,
            retry_count: 0,
            created_at: now,
            completed_at: None,
            attempt_started_at: now,
        }
    }

    #[tokio::test]
    async fn test_duplicate_object_key_rejected_atomically() {
        let store = MemoryUploadStore::new();
        let owner = Uuid::new_v4();
        let job = UploadJob::new(owner, 2, Utc::now());
        let a = photo(owner, job.id, "a.jpg");
        let mut b = photo(owner, job.id, "b.jpg");
        b.object_key = a.object_key.clone();

        let result = store.create_job(&job, &[a, b]).await;
        assert!(matches!(result, Err(StoreError::Duplicate(_))));
        assert_eq!(store.job_count().await, 0);
        assert_eq!(store.photo_count().await, 0);
    }

    #[tokio::test]
    async fn test_fail_then_retry_restores_counters() {
        let store = MemoryUploadStore::new();
        let owner = Uuid::new_v4();
        let job = UploadJob::new(owner, 1, Utc::now());
        let p = photo(owner, job.id, "a.jpg");
        store.create_job(&job, std::slice::from_ref(&p)).await.unwrap();

        let failed = store.mark_photo_failed(p.id, "boom", Utc::now()).await.unwrap();
        let Transition::Applied { job: Some(after_fail), .. } = failed else {
            panic!("expected applied transition");
        };
        assert_eq!(after_fail.failed_count, 1);
        assert_eq!(after_fail.status, JobStatus::Failed);

        let retried = store.reset_photo_for_retry(p.id, Utc::now()).await.unwrap();
        let Transition::Applied { photo, job: Some(after_retry) } = retried else {
            panic!("expected applied transition");
        };
        assert_eq!(photo.status, PhotoStatus::Uploading);
        assert_eq!(photo.retry_count, 1);
        assert_eq!(after_retry.failed_count, 0);
        assert_eq!(after_retry.status, JobStatus::InProgress);
    }

    #[tokio::test]
    async fn test_guard_skips_wrong_state() {
        let store = MemoryUploadStore::new();
        let owner = Uuid::new_v4();
        let job = UploadJob::new(owner, 1, Utc::now());
        let p = photo(owner, job.id, "a.jpg");
        store.create_job(&job, std::slice::from_ref(&p)).await.unwrap();

        store.mark_photo_completed(p.id, Utc::now()).await.unwrap();
        let again = store.mark_photo_failed(p.id, "late", Utc::now()).await.unwrap();
        assert!(matches!(again, Transition::Skipped(ref ph) if ph.status == PhotoStatus::Completed));
        assert!(store.failures_for(p.id).await.is_empty());

        let missing = store.mark_photo_completed(Uuid::new_v4(), Utc::now()).await.unwrap();
        assert_eq!(missing, Transition::NotFound);
    }
}

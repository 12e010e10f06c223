//! Shared fixtures for the upload flow tests.
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

use photo_upload_orchestrator::app_state::AppState;
use photo_upload_orchestrator::config::UploadSettings;
use photo_upload_orchestrator::db::{MemoryUploadStore, StoreError, Transition, UploadStore};
use photo_upload_orchestrator::models::job::UploadJob;
use photo_upload_orchestrator::models::photo::{object_key, FailureEvent, Photo, PhotoStatus};
use photo_upload_orchestrator::models::upload::{CreateUploadJobRequest, PhotoUploadItem};
use photo_upload_orchestrator::services::storage::{ObjectStore, StorageError};

/// Object store double: existence is whatever the test says it is.
#[derive(Default)]
pub struct MockObjectStore {
    objects: Mutex<HashSet<String>>,
    deleted: Mutex<Vec<String>>,
    fail_presign: AtomicBool,
    presigned: AtomicUsize,
}

impl MockObjectStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Pretend the client finished writing `key`.
    pub fn put(&self, key: &str) {
        self.objects.lock().unwrap().insert(key.to_string());
    }

    pub fn set_fail_presign(&self, fail: bool) {
        self.fail_presign.store(fail, Ordering::SeqCst);
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }

    pub fn presigned_count(&self) -> usize {
        self.presigned.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for MockObjectStore {
    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.objects.lock().unwrap().contains(key))
    }

    async fn presign_write(
        &self,
        key: &str,
        content_type: &str,
        ttl: Duration,
    ) -> Result<String, StorageError> {
        if self.fail_presign.load(Ordering::SeqCst) {
            return Err(StorageError::UnexpectedStatus(503));
        }
        self.presigned.fetch_add(1, Ordering::SeqCst);
        Ok(format!(
            "https://uploads.test/{}?content-type={}&expires={}",
            key,
            content_type,
            ttl.as_secs()
        ))
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let removed = self.objects.lock().unwrap().remove(key);
        if removed {
            self.deleted.lock().unwrap().push(key.to_string());
        }
        Ok(removed)
    }
}

/// Memory store that stalls after committing a transition of one photo,
/// widening the gap between the write and the caller seeing its result.
pub struct SlowCommitStore {
    inner: Arc<MemoryUploadStore>,
    slow_photo: Uuid,
    delay: Duration,
}

impl SlowCommitStore {
    pub fn new(inner: Arc<MemoryUploadStore>, slow_photo: Uuid, delay: Duration) -> Self {
        Self {
            inner,
            slow_photo,
            delay,
        }
    }

    async fn after_commit(&self, photo_id: Uuid) {
        if photo_id == self.slow_photo {
            tokio::time::sleep(self.delay).await;
        }
    }
}

#[async_trait]
impl UploadStore for SlowCommitStore {
    async fn owner_exists(&self, owner_id: Uuid) -> Result<bool, StoreError> {
        self.inner.owner_exists(owner_id).await
    }

    async fn create_job(&self, job: &UploadJob, photos: &[Photo]) -> Result<(), StoreError> {
        self.inner.create_job(job, photos).await
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<UploadJob>, StoreError> {
        self.inner.get_job(job_id).await
    }

    async fn get_photo(&self, photo_id: Uuid) -> Result<Option<Photo>, StoreError> {
        self.inner.get_photo(photo_id).await
    }

    async fn list_job_photos(&self, job_id: Uuid) -> Result<Vec<Photo>, StoreError> {
        self.inner.list_job_photos(job_id).await
    }

    async fn mark_photo_completed(
        &self,
        photo_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Transition, StoreError> {
        let transition = self.inner.mark_photo_completed(photo_id, now).await;
        self.after_commit(photo_id).await;
        transition
    }

    async fn mark_photo_failed(
        &self,
        photo_id: Uuid,
        message: &str,
        now: DateTime<Utc>,
    ) -> Result<Transition, StoreError> {
        let transition = self.inner.mark_photo_failed(photo_id, message, now).await;
        self.after_commit(photo_id).await;
        transition
    }

    async fn reset_photo_for_retry(
        &self,
        photo_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Transition, StoreError> {
        self.inner.reset_photo_for_retry(photo_id, now).await
    }

    async fn find_by_status_and_created_before(
        &self,
        status: PhotoStatus,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Photo>, StoreError> {
        self.inner
            .find_by_status_and_created_before(status, cutoff)
            .await
    }

    async fn count_by_status_and_created_before(
        &self,
        status: PhotoStatus,
        cutoff: DateTime<Utc>,
    ) -> Result<i64, StoreError> {
        self.inner
            .count_by_status_and_created_before(status, cutoff)
            .await
    }

    async fn latest_failure(&self, photo_id: Uuid) -> Result<Option<FailureEvent>, StoreError> {
        self.inner.latest_failure(photo_id).await
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        self.inner.health_check().await
    }
}

pub struct TestContext {
    pub state: AppState,
    pub store: Arc<MemoryUploadStore>,
    pub storage: Arc<MockObjectStore>,
    pub owner_id: Uuid,
}

/// Settings with a short URL lifetime so a 10 minute threshold is valid.
pub fn test_settings() -> UploadSettings {
    UploadSettings {
        presign_ttl: Duration::from_secs(5 * 60),
        stalled_threshold: Duration::from_secs(10 * 60),
        ..UploadSettings::default()
    }
}

pub async fn setup() -> TestContext {
    setup_with(test_settings()).await
}

pub async fn setup_with(settings: UploadSettings) -> TestContext {
    let store = Arc::new(MemoryUploadStore::new());
    let storage = MockObjectStore::new();
    let owner_id = Uuid::new_v4();
    store.add_owner(owner_id).await;

    let state = AppState::new(store.clone(), storage.clone(), settings);

    TestContext {
        state,
        store,
        storage,
        owner_id,
    }
}

pub fn jpeg(filename: &str) -> PhotoUploadItem {
    PhotoUploadItem {
        filename: filename.to_string(),
        file_size: 1024,
        content_type: "image/jpeg".to_string(),
    }
}

pub fn request_for(count: usize) -> CreateUploadJobRequest {
    CreateUploadJobRequest {
        photos: (0..count).map(|i| jpeg(&format!("photo-{}.jpg", i))).collect(),
    }
}

/// Store a job directly, one photo per entry in `ages`, each photo's upload
/// attempt having started that long ago.
pub async fn seed_job(ctx: &TestContext, ages: &[ChronoDuration]) -> (UploadJob, Vec<Photo>) {
    let now = Utc::now();
    let job = UploadJob::new(ctx.owner_id, ages.len() as i32, now);
    let photos: Vec<Photo> = ages
        .iter()
        .enumerate()
        .map(|(i, age)| {
            let id = Uuid::new_v4();
            let filename = format!("seeded-{}.jpg", i);
            let started = now - *age;
            Photo {
                id,
                owner_id: ctx.owner_id,
                job_id: Some(job.id),
                object_key: object_key(ctx.owner_id, id, &filename),
                filename,
                file_size: 2048,
                content_type: "image/jpeg".to_string(),
                status: PhotoStatus::Uploading,
                retry_count: 0,
                created_at: started,
                completed_at: None,
                attempt_started_at: started,
            }
        })
        .collect();

    ctx.store
        .create_job(&job, &photos)
        .await
        .expect("seed job");
    (job, photos)
}

/// The context's state, with transitions of `slow_photo` stalling after commit.
pub fn slow_commit_state(ctx: &TestContext, slow_photo: Uuid, delay: Duration) -> AppState {
    AppState {
        store: Arc::new(SlowCommitStore::new(ctx.store.clone(), slow_photo, delay)),
        ..ctx.state.clone()
    }
}

pub async fn job(ctx: &TestContext, job_id: Uuid) -> UploadJob {
    ctx.store.get_job(job_id).await.unwrap().expect("job exists")
}

pub async fn photo(ctx: &TestContext, photo_id: Uuid) -> Photo {
    ctx.store
        .get_photo(photo_id)
        .await
        .unwrap()
        .expect("photo exists")
}

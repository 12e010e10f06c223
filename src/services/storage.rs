use async_trait::async_trait;
// rust-s3 0.35 signs requests with the http 0.2 header types, not axum's.
use http::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use s3::creds::Credentials;
use s3::error::S3Error;
use s3::{Bucket, Region};
use std::time::Duration;

/// Gateway to the object store that holds the uploaded bytes.
///
/// The backend never sees the bytes themselves: it hands out write locators,
/// asks whether an object exists, and cleans up abandoned objects.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Whether an object exists at `key`.
    async fn exists(&self, key: &str) -> Result<bool, StorageError>;

    /// Issue a time-limited URL that lets a client PUT exactly one object.
    async fn presign_write(
        &self,
        key: &str,
        content_type: &str,
        ttl: Duration,
    ) -> Result<String, StorageError>;

    /// Delete the object at `key`. Returns whether the store accepted it.
    async fn delete(&self, key: &str) -> Result<bool, StorageError>;
}

/// Client for an S3-compatible bucket (AWS S3, R2, MinIO).
pub struct S3Gateway {
    bucket: Box<Bucket>,
}

impl S3Gateway {
    pub fn new(
        bucket_name: &str,
        region: &str,
        endpoint: Option<&str>,
        access_key: &str,
        secret_key: &str,
        path_style: bool,
    ) -> Result<Self, StorageError> {
        let endpoint = endpoint
            .map(str::to_string)
            .unwrap_or_else(|| format!("https://s3.{}.amazonaws.com", region));
        let region = Region::Custom {
            region: region.to_string(),
            endpoint,
        };

        let credentials =
            Credentials::new(Some(access_key), Some(secret_key), None, None, None)
                .map_err(|e| StorageError::Config(e.to_string()))?;

        let mut bucket = Bucket::new(bucket_name, region, credentials)
            .map_err(|e| StorageError::Config(e.to_string()))?;
        if path_style {
            bucket = bucket.with_path_style();
        }

        Ok(Self { bucket })
    }
}

/// Headers signed into a presigned PUT, pinning the upload's content type.
fn content_type_headers(content_type: &str) -> Result<HeaderMap, StorageError> {
    let value = HeaderValue::from_str(content_type)
        .map_err(|e| StorageError::Config(format!("invalid content type: {}", e)))?;
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, value);
    Ok(headers)
}

#[async_trait]
impl ObjectStore for S3Gateway {
    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        match self.bucket.head_object(key).await {
            Ok((_, code)) if (200..300).contains(&code) => Ok(true),
            Ok((_, 404)) => Ok(false),
            Ok((_, code)) => Err(StorageError::UnexpectedStatus(code)),
            Err(S3Error::HttpFailWithBody(404, _)) => Ok(false),
            Err(e) => Err(StorageError::S3(e)),
        }
    }

    async fn presign_write(
        &self,
        key: &str,
        content_type: &str,
        ttl: Duration,
    ) -> Result<String, StorageError> {
        let headers = content_type_headers(content_type)?;
        let expiry_secs = u32::try_from(ttl.as_secs()).unwrap_or(u32::MAX);
        let url = self
            .bucket
            .presign_put(key, expiry_secs, Some(headers), None)
            .await?;
        Ok(url)
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let response = self.bucket.delete_object(key).await?;
        Ok((200..300).contains(&response.status_code()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("S3 operation failed: {0}")]
    S3(#[from] S3Error),

    #[error("Unexpected object store status: {0}")]
    UnexpectedStatus(u16),

    #[error("Storage configuration error: {0}")]
    Config(String),
}

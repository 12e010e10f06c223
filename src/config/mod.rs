use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000"). Optional for the reclaimer process.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection string
    pub database_url: String,

    /// Bucket that receives the uploaded photos
    pub s3_bucket: String,

    /// Bucket region
    #[serde(default = "default_s3_region")]
    pub s3_region: String,

    /// Endpoint URL for S3-compatible stores (R2, MinIO). AWS endpoint when unset.
    #[serde(default)]
    pub s3_endpoint: Option<String>,

    /// Access key ID
    pub s3_access_key: String,

    /// Secret access key
    pub s3_secret_key: String,

    /// Use path-style bucket addressing (needed by MinIO)
    #[serde(default)]
    pub s3_path_style: bool,

    /// Lifetime of a presigned upload URL
    #[serde(default = "default_presign_ttl_secs")]
    pub presign_ttl_secs: u64,

    /// How often the stalled-upload sweep runs
    #[serde(default = "default_reclaim_interval_secs")]
    pub reclaim_interval_secs: u64,

    /// Age after which an UPLOADING photo is considered abandoned
    #[serde(default = "default_stalled_threshold_secs")]
    pub stalled_threshold_secs: u64,

    /// Run the sweep inside the API server process
    #[serde(default = "default_true")]
    pub reclaimer_enabled: bool,

    /// Failed uploads a photo may accumulate before retries are refused
    #[serde(default = "default_max_retries")]
    pub max_retries: i32,

    /// Maximum lifetime of a status stream connection
    #[serde(default = "default_stream_timeout_secs")]
    pub stream_timeout_secs: u64,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_s3_region() -> String {
    "us-east-1".to_string()
}

fn default_presign_ttl_secs() -> u64 {
    15 * 60
}

fn default_reclaim_interval_secs() -> u64 {
    5 * 60
}

/// Kept above the default presigned URL lifetime.
fn default_stalled_threshold_secs() -> u64 {
    20 * 60
}

fn default_true() -> bool {
    true
}

fn default_max_retries() -> i32 {
    3
}

fn default_stream_timeout_secs() -> u64 {
    30 * 60
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let config: Self = envy::from_env()?;
        config.settings().validate()?;
        Ok(config)
    }

    /// Tunables the upload services need at runtime.
    pub fn settings(&self) -> UploadSettings {
        UploadSettings {
            presign_ttl: Duration::from_secs(self.presign_ttl_secs),
            stalled_threshold: Duration::from_secs(self.stalled_threshold_secs),
            reclaim_interval: Duration::from_secs(self.reclaim_interval_secs),
            max_retries: self.max_retries,
            stream_timeout: Duration::from_secs(self.stream_timeout_secs),
        }
    }
}

/// Runtime tunables shared by the upload services.
#[derive(Debug, Clone)]
pub struct UploadSettings {
    pub presign_ttl: Duration,
    pub stalled_threshold: Duration,
    pub reclaim_interval: Duration,
    pub max_retries: i32,
    pub stream_timeout: Duration,
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            presign_ttl: Duration::from_secs(default_presign_ttl_secs()),
            stalled_threshold: Duration::from_secs(default_stalled_threshold_secs()),
            reclaim_interval: Duration::from_secs(default_reclaim_interval_secs()),
            max_retries: default_max_retries(),
            stream_timeout: Duration::from_secs(default_stream_timeout_secs()),
        }
    }
}

impl UploadSettings {
    /// The stalled threshold must outlive the upload URL, otherwise the sweep
    /// could fail an upload that is still allowed to land.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stalled_threshold <= self.presign_ttl {
            return Err(ConfigError::Invalid(format!(
                "stalled threshold ({}s) must exceed presigned URL lifetime ({}s)",
                self.stalled_threshold.as_secs(),
                self.presign_ttl.as_secs()
            )));
        }
        if self.reclaim_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "reclaim interval must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read environment: {0}")]
    Env(#[from] envy::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_consistent() {
        let settings = UploadSettings::default();
        assert_eq!(settings.presign_ttl, Duration::from_secs(900));
        assert_eq!(settings.stalled_threshold, Duration::from_secs(1200));
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_threshold_must_exceed_ttl() {
        let racing = UploadSettings {
            stalled_threshold: Duration::from_secs(600),
            ..UploadSettings::default()
        };
        assert!(racing.validate().is_err());

        let shorter_ttl = UploadSettings {
            presign_ttl: Duration::from_secs(300),
            stalled_threshold: Duration::from_secs(600),
            ..UploadSettings::default()
        };
        assert!(shorter_ttl.validate().is_ok());
    }
}

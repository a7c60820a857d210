//! Connection settings for the blob backend.

use serde::{Deserialize, Serialize};

/// Configuration for an S3-compatible object store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectStorageConfig {
    /// S3/MinIO endpoint URL
    pub endpoint: String,
    /// Bucket name
    pub bucket: String,
    /// Access key ID
    pub access_key_id: String,
    /// Secret access key
    pub secret_access_key: String,
    /// AWS region (use "us-east-1" for MinIO)
    pub region: String,
    /// Allow HTTP (for local MinIO)
    pub allow_http: bool,
    /// Extra attempts after a transient failure.
    pub max_retries: u32,
    /// Backoff step; attempt `n` waits `n * retry_backoff_ms`.
    pub retry_backoff_ms: u64,
}

impl Default for ObjectStorageConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://minio:9000".to_string(),
            bucket: "raster-data".to_string(),
            access_key_id: "minioadmin".to_string(),
            secret_access_key: "minioadmin".to_string(),
            region: "us-east-1".to_string(),
            allow_http: true,
            max_retries: 3,
            retry_backoff_ms: 200,
        }
    }
}

impl ObjectStorageConfig {
    /// Create config from `S3_*` environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            endpoint: std::env::var("S3_ENDPOINT").unwrap_or(defaults.endpoint),
            bucket: std::env::var("S3_BUCKET").unwrap_or(defaults.bucket),
            access_key_id: std::env::var("S3_ACCESS_KEY").unwrap_or(defaults.access_key_id),
            secret_access_key: std::env::var("S3_SECRET_KEY").unwrap_or(defaults.secret_access_key),
            region: std::env::var("S3_REGION").unwrap_or(defaults.region),
            allow_http: std::env::var("S3_ALLOW_HTTP")
                .map(|v| v.to_lowercase() == "true" || v == "1")
                .unwrap_or(defaults.allow_http),
            max_retries: std::env::var("S3_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_retries),
            retry_backoff_ms: std::env::var("S3_RETRY_BACKOFF_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.retry_backoff_ms),
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.endpoint.is_empty() {
            return Err("endpoint must not be empty".to_string());
        }
        if self.bucket.is_empty() {
            return Err("bucket must not be empty".to_string());
        }
        if self.endpoint.starts_with("http://") && !self.allow_http {
            return Err(format!(
                "endpoint {} is plain HTTP but allow_http is false",
                self.endpoint
            ));
        }
        if self.max_retries > 10 {
            return Err("max_retries must be <= 10".to_string());
        }
        Ok(())
    }
}

//! Blob storage for grid payloads (S3/MinIO compatible).
//!
//! Each grid is two objects: the encoded payload at `<name>` and its header
//! as JSON at `<name>.meta.json`.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use object_store::{aws::AmazonS3Builder, memory::InMemory, path::Path, ObjectStore};
use raster_common::{keys, Header, RasterError, RasterResult, ScalarKind};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::config::ObjectStorageConfig;

/// Suffix of the header sidecar object.
pub const META_SUFFIX: &str = ".meta.json";

/// Required string fields and their values; an empty filter matches anything.
pub type StringFilter = BTreeMap<String, String>;

/// A payload together with its header.
#[derive(Debug, Clone, PartialEq)]
pub struct BlobRecord {
    pub data: Bytes,
    pub header: Header,
}

/// Persisted form of a header.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct BlobMeta {
    numeric: BTreeMap<String, f64>,
    strings: BTreeMap<String, String>,
    written_at: DateTime<Utc>,
}

/// Storage of named grid payloads.
#[async_trait]
pub trait BlobBackend: Send + Sync {
    /// Fetch a payload whose string fields match `filter`.
    async fn get(&self, name: &str, filter: &StringFilter) -> RasterResult<BlobRecord>;

    /// Replace any existing payload under `name`.
    async fn put(&self, name: &str, data: Bytes, header: &Header) -> RasterResult<()>;

    async fn remove(&self, name: &str) -> RasterResult<()>;

    async fn exists(&self, name: &str) -> RasterResult<bool>;

    /// Payload names under `prefix`, sidecars excluded.
    async fn list(&self, prefix: &str) -> RasterResult<Vec<String>>;
}

/// Check that `len` bytes is exactly `CELLSNUM * LAYERS` elements of the
/// header's `DATATYPE_OUT`.
pub fn check_payload(header: &Header, len: usize) -> RasterResult<ScalarKind> {
    for key in [keys::NROWS, keys::NCOLS, keys::LAYERS, keys::CELLSNUM] {
        match header.get(key) {
            Some(v) if v >= 0.0 => {}
            Some(v) => return Err(RasterError::Metadata(format!("{} is negative: {}", key, v))),
            None => return Err(RasterError::Metadata(format!("{} missing", key))),
        }
    }

    let kind = header.output_kind();
    let width = kind.byte_width().ok_or_else(|| {
        RasterError::UnknownKind(
            header
                .get_string(keys::DATATYPE_OUT)
                .unwrap_or("<missing>")
                .to_string(),
        )
    })?;
    let cells = header.valid_cell_count().unwrap_or(0);
    let expected = cells * header.layers() * width;
    if len != expected {
        return Err(RasterError::Metadata(format!(
            "{} bytes but header declares {} cells x {} layers of {}",
            len,
            cells,
            header.layers(),
            kind
        )));
    }
    Ok(kind)
}

/// Run `op`, retrying transient failures up to `max_retries` extra times with
/// linear backoff.
pub async fn retry_transient<F, Fut, R>(
    max_retries: u32,
    backoff: Duration,
    operation: &str,
    mut op: F,
) -> RasterResult<R>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = RasterResult<R>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < max_retries => {
                attempt += 1;
                warn!(operation, attempt, max_retries, error = %e, "Transient backend failure, retrying");
                tokio::time::sleep(backoff * attempt).await;
            }
            Err(e) => return Err(e),
        }
    }
}

fn store_error(context: &str, err: object_store::Error) -> RasterError {
    match err {
        object_store::Error::NotFound { path, .. } => {
            RasterError::backend(format!("{}: {} not found", context, path))
        }
        object_store::Error::Generic { store, source } => {
            RasterError::transient(format!("{}: {} error: {}", context, store, source))
        }
        other => RasterError::backend(format!("{}: {}", context, other)),
    }
}

fn meta_name(name: &str) -> String {
    format!("{}{}", name, META_SUFFIX)
}

/// [`BlobBackend`] over any `object_store` implementation.
pub struct ObjectStoreBackend {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    max_retries: u32,
    backoff: Duration,
}

impl ObjectStoreBackend {
    /// Connect to an S3-compatible store.
    pub fn new(config: &ObjectStorageConfig) -> RasterResult<Self> {
        config.validate().map_err(RasterError::invalid_argument)?;
        let mut builder = AmazonS3Builder::new()
            .with_endpoint(&config.endpoint)
            .with_bucket_name(&config.bucket)
            .with_access_key_id(&config.access_key_id)
            .with_secret_access_key(&config.secret_access_key)
            .with_region(&config.region);

        if config.allow_http {
            builder = builder.with_allow_http(true);
        }

        let store = builder
            .build()
            .map_err(|e| RasterError::backend(format!("Failed to create S3 client: {}", e)))?;

        Ok(Self::from_store(Arc::new(store), config))
    }

    /// Wrap an existing store, taking retry settings from `config`.
    pub fn from_store(store: Arc<dyn ObjectStore>, config: &ObjectStorageConfig) -> Self {
        Self {
            store,
            bucket: config.bucket.clone(),
            max_retries: config.max_retries,
            backoff: Duration::from_millis(config.retry_backoff_ms),
        }
    }

    /// Process-local store, mainly for tests.
    pub fn in_memory() -> Self {
        let config = ObjectStorageConfig {
            bucket: "memory".to_string(),
            ..Default::default()
        };
        Self::from_store(Arc::new(InMemory::new()), &config)
    }

    async fn put_object(&self, name: &str, data: Bytes) -> RasterResult<()> {
        let location = Path::from(name);
        retry_transient(self.max_retries, self.backoff, "put", || {
            let data = data.clone();
            let location = location.clone();
            async move {
                self.store
                    .put(&location, data)
                    .await
                    .map(|_| ())
                    .map_err(|e| store_error(&format!("Failed to write {}", name), e))
            }
        })
        .await
    }

    async fn get_object(&self, name: &str) -> RasterResult<Bytes> {
        let location = Path::from(name);
        retry_transient(self.max_retries, self.backoff, "get", || {
            let location = location.clone();
            async move {
                let result = self
                    .store
                    .get(&location)
                    .await
                    .map_err(|e| store_error(&format!("Failed to read {}", name), e))?;
                result
                    .bytes()
                    .await
                    .map_err(|e| store_error(&format!("Failed to read bytes of {}", name), e))
            }
        })
        .await
    }

    async fn delete_object(&self, name: &str) -> RasterResult<()> {
        let location = Path::from(name);
        match self.store.delete(&location).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(store_error(&format!("Failed to delete {}", name), e)),
        }
    }
}

#[async_trait]
impl BlobBackend for ObjectStoreBackend {
    #[instrument(skip(self, filter), fields(bucket = %self.bucket, name = %name))]
    async fn get(&self, name: &str, filter: &StringFilter) -> RasterResult<BlobRecord> {
        let meta_bytes = self.get_object(&meta_name(name)).await?;
        let meta: BlobMeta = serde_json::from_slice(&meta_bytes)?;

        for (key, wanted) in filter {
            match meta.strings.get(key) {
                Some(actual) if actual.eq_ignore_ascii_case(wanted) => {}
                actual => {
                    return Err(RasterError::backend(format!(
                        "{}: {} is {:?}, wanted {:?}",
                        name, key, actual, wanted
                    )))
                }
            }
        }

        let header = Header::from_maps(meta.numeric, meta.strings);
        let data = self.get_object(name).await?;
        check_payload(&header, data.len())?;
        debug!(size = data.len(), written_at = %meta.written_at, "Read grid blob");

        Ok(BlobRecord { data, header })
    }

    #[instrument(skip(self, data, header), fields(bucket = %self.bucket, name = %name))]
    async fn put(&self, name: &str, data: Bytes, header: &Header) -> RasterResult<()> {
        check_payload(header, data.len())?;
        self.remove(name).await?;

        let meta = BlobMeta {
            numeric: header.numeric().clone(),
            strings: header.strings().clone(),
            written_at: Utc::now(),
        };
        let meta_bytes = Bytes::from(serde_json::to_vec(&meta)?);

        debug!(size = data.len(), "Writing grid blob");
        self.put_object(name, data).await?;
        self.put_object(&meta_name(name), meta_bytes).await
    }

    #[instrument(skip(self), fields(bucket = %self.bucket))]
    async fn remove(&self, name: &str) -> RasterResult<()> {
        self.delete_object(name).await?;
        self.delete_object(&meta_name(name)).await
    }

    async fn exists(&self, name: &str) -> RasterResult<bool> {
        let location = Path::from(meta_name(name));
        match self.store.head(&location).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(store_error(&format!("Failed to check {}", name), e)),
        }
    }

    async fn list(&self, prefix: &str) -> RasterResult<Vec<String>> {
        let prefix_path = Path::from(prefix);
        let mut stream = self.store.list(Some(&prefix_path));
        let mut names = Vec::new();

        while let Some(meta) = stream
            .try_next()
            .await
            .map_err(|e| store_error(&format!("Failed to list {}", prefix), e))?
        {
            let name = meta.location.to_string();
            if !name.ends_with(META_SUFFIX) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }
}

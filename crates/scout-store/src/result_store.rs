//! Pluggable result storage behind location descriptors.
//!
//! Workers call `save_success`/`save_failure` against the configured default
//! backend and get back a [`ResultLocation`]; the query assembler calls
//! `fetch` with whatever location a completion event carried. Adding a backend
//! means registering a new `StorageKind` variant and its location shape;
//! neither the saga nor the workers change.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};
use uuid::Uuid;

use scout_core::{ResultLocation, ServiceKind, StorageKind};

use crate::kv::{KvStore, StoreError};
use crate::record::ResultRecord;

/// One concrete storage backend: write a record, read it back by location.
#[async_trait]
pub trait ResultBackend: Send + Sync {
    async fn write(&self, record: &ResultRecord) -> Result<ResultLocation, StoreError>;

    /// `None` means absent or unreadable; corruption never fails a query.
    async fn read(&self, location: &ResultLocation) -> Result<Option<ResultRecord>, StoreError>;
}

/// Result storage in the shared key-value state store.
pub struct KeyValueBackend {
    kv: Arc<dyn KvStore>,
    partition: u32,
    ttl_secs: u64,
}

impl KeyValueBackend {
    pub fn new(kv: Arc<dyn KvStore>, partition: u32, ttl_secs: u64) -> Self {
        Self {
            kv,
            partition,
            ttl_secs,
        }
    }
}

#[async_trait]
impl ResultBackend for KeyValueBackend {
    async fn write(&self, record: &ResultRecord) -> Result<ResultLocation, StoreError> {
        let key = ResultRecord::key(record.job_id, record.kind);
        let payload = serde_json::to_vec(record)?;
        // Unconditional put keeps retries idempotent: same key, same location.
        self.kv.put(&key, payload).await?;
        Ok(ResultLocation::KeyValue {
            key,
            partition: self.partition,
            ttl: self.ttl_secs,
        })
    }

    async fn read(&self, location: &ResultLocation) -> Result<Option<ResultRecord>, StoreError> {
        let ResultLocation::KeyValue { key, .. } = location else {
            return Err(StoreError::BackendUnavailable(location.storage_kind()));
        };
        let Some(entry) = self.kv.get(key).await? else {
            return Ok(None);
        };
        match serde_json::from_slice(&entry.value) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                warn!("Discarding corrupt result record at '{}': {}", key, e);
                Ok(None)
            }
        }
    }
}

/// Result storage as one JSON file per `(job, kind)` under a base directory.
pub struct FilesystemBackend {
    base_path: PathBuf,
}

impl FilesystemBackend {
    pub fn new(base_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let base_path = base_path.as_ref().to_path_buf();
        std::fs::create_dir_all(&base_path).map_err(|e| StoreError::Io(e.to_string()))?;
        Ok(Self { base_path })
    }

    fn record_path(&self, job_id: Uuid, kind: ServiceKind) -> PathBuf {
        self.base_path
            .join(job_id.to_string())
            .join(format!("{}.json", kind.as_str()))
    }
}

#[async_trait]
impl ResultBackend for FilesystemBackend {
    async fn write(&self, record: &ResultRecord) -> Result<ResultLocation, StoreError> {
        let path = self.record_path(record.job_id, record.kind);
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| StoreError::Io(e.to_string()))?;
        }
        let payload = serde_json::to_string_pretty(record)?;
        std::fs::write(&path, payload).map_err(|e| StoreError::Io(e.to_string()))?;
        info!("Wrote result record to {:?}", path);
        Ok(ResultLocation::Filesystem {
            path: path.display().to_string(),
        })
    }

    async fn read(&self, location: &ResultLocation) -> Result<Option<ResultRecord>, StoreError> {
        let ResultLocation::Filesystem { path } = location else {
            return Err(StoreError::BackendUnavailable(location.storage_kind()));
        };
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::Io(e.to_string())),
        };
        match serde_json::from_slice(&bytes) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                warn!("Discarding corrupt result record at '{}': {}", path, e);
                Ok(None)
            }
        }
    }
}

/// Registry of backends plus the default used for writes.
///
/// Reads are routed by the location's `backend` tag, so a deployment can
/// switch its default while still dereferencing records written before the
/// switch.
pub struct ResultStore {
    backends: HashMap<StorageKind, Arc<dyn ResultBackend>>,
    default_kind: StorageKind,
}

impl ResultStore {
    pub fn new(default_kind: StorageKind) -> Self {
        Self {
            backends: HashMap::new(),
            default_kind,
        }
    }

    pub fn register(mut self, kind: StorageKind, backend: Arc<dyn ResultBackend>) -> Self {
        self.backends.insert(kind, backend);
        self
    }

    fn backend_for(&self, kind: StorageKind) -> Result<&Arc<dyn ResultBackend>, StoreError> {
        self.backends
            .get(&kind)
            .ok_or(StoreError::BackendUnavailable(kind))
    }

    pub async fn save_success(
        &self,
        job_id: Uuid,
        kind: ServiceKind,
        data: serde_json::Value,
        duration_ms: u64,
    ) -> Result<ResultLocation, StoreError> {
        let record = ResultRecord::success(job_id, kind, data, duration_ms);
        self.backend_for(self.default_kind)?.write(&record).await
    }

    pub async fn save_failure(
        &self,
        job_id: Uuid,
        kind: ServiceKind,
        error_message: String,
        duration_ms: u64,
    ) -> Result<ResultLocation, StoreError> {
        let record = ResultRecord::failure(job_id, kind, error_message, duration_ms);
        self.backend_for(self.default_kind)?.write(&record).await
    }

    pub async fn fetch(
        &self,
        location: &ResultLocation,
    ) -> Result<Option<ResultRecord>, StoreError> {
        self.backend_for(location.storage_kind())?
            .read(location)
            .await
    }
}

//! Saga persistence over the keyed state store.

use std::sync::Arc;

use uuid::Uuid;

use scout_store::{KvStore, StoreError};

use crate::instance::SagaInstance;

/// Saga instances keyed by `saga:<jobId>`, with the revision stamp callers
/// need for compare-and-swap updates.
pub struct SagaStore {
    kv: Arc<dyn KvStore>,
}

impl SagaStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    pub async fn load(&self, job_id: Uuid) -> Result<Option<(SagaInstance, u64)>, StoreError> {
        let Some(entry) = self.kv.get(&SagaInstance::key(job_id)).await? else {
            return Ok(None);
        };
        let saga = serde_json::from_slice(&entry.value)?;
        Ok(Some((saga, entry.revision)))
    }

    /// Create the instance; fails with [`StoreError::AlreadyExists`] when a
    /// redelivered `JobSubmitted` races an earlier creation.
    pub async fn create(&self, saga: &SagaInstance) -> Result<u64, StoreError> {
        let payload = serde_json::to_vec(saga)?;
        self.kv
            .create(&SagaInstance::key(saga.correlation_id), payload)
            .await
    }

    /// Overwrite the instance iff `revision` is still current.
    pub async fn update(&self, saga: &SagaInstance, revision: u64) -> Result<u64, StoreError> {
        let payload = serde_json::to_vec(saga)?;
        self.kv
            .update(&SagaInstance::key(saga.correlation_id), payload, revision)
            .await
    }

    /// Every live saga instance. The sweeper scans this; queries never do.
    pub async fn list(&self) -> Result<Vec<SagaInstance>, StoreError> {
        let mut out = Vec::new();
        for key in self.kv.keys().await? {
            if !key.starts_with("saga:") {
                continue;
            }
            if let Some(entry) = self.kv.get(&key).await? {
                match serde_json::from_slice(&entry.value) {
                    Ok(saga) => out.push(saga),
                    Err(e) => tracing::warn!("Skipping unreadable saga at '{}': {}", key, e),
                }
            }
        }
        Ok(out)
    }
}

//! Keyed byte storage with revision-based compare-and-swap.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use scout_core::StorageKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("key '{0}' already exists")]
    AlreadyExists(String),

    #[error("revision conflict on key '{0}'")]
    Conflict(String),

    #[error("no backend registered for storage kind {0}")]
    BackendUnavailable(StorageKind),

    #[error("serialization failed: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("store io: {0}")]
    Io(String),
}

/// A stored value with the revision stamp needed for CAS updates.
#[derive(Debug, Clone)]
pub struct Entry {
    pub value: Vec<u8>,
    pub revision: u64,
}

/// The state-store contract: string keys, byte values, single-key atomic
/// updates via revision compare-and-swap. TTL is a property of the backing
/// bucket, not of individual operations.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Entry>, StoreError>;

    /// Create the key. Fails with [`StoreError::AlreadyExists`] if present.
    async fn create(&self, key: &str, value: Vec<u8>) -> Result<u64, StoreError>;

    /// Unconditional overwrite. Returns the new revision.
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<u64, StoreError>;

    /// Overwrite only if the current revision matches. Fails with
    /// [`StoreError::Conflict`] otherwise.
    async fn update(&self, key: &str, value: Vec<u8>, expected_revision: u64)
        -> Result<u64, StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// All live keys. Used by the sweeper to scan saga instances.
    async fn keys(&self) -> Result<Vec<String>, StoreError>;
}

/// In-memory store for tests and single-process runs. Revisions are
/// per-store monotonic, matching the JetStream KV behaviour the production
/// backend exposes.
#[derive(Default)]
pub struct MemoryKvStore {
    inner: Mutex<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    entries: HashMap<String, Entry>,
    next_revision: u64,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MemoryInner {
    fn bump(&mut self) -> u64 {
        self.next_revision += 1;
        self.next_revision
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<Entry>, StoreError> {
        let inner = self.inner.lock().expect("kv mutex");
        Ok(inner.entries.get(key).cloned())
    }

    async fn create(&self, key: &str, value: Vec<u8>) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock().expect("kv mutex");
        if inner.entries.contains_key(key) {
            return Err(StoreError::AlreadyExists(key.to_string()));
        }
        let revision = inner.bump();
        inner.entries.insert(key.to_string(), Entry { value, revision });
        Ok(revision)
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock().expect("kv mutex");
        let revision = inner.bump();
        inner.entries.insert(key.to_string(), Entry { value, revision });
        Ok(revision)
    }

    async fn update(
        &self,
        key: &str,
        value: Vec<u8>,
        expected_revision: u64,
    ) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock().expect("kv mutex");
        let current = inner.entries.get(key).map(|entry| entry.revision);
        match current {
            Some(revision) if revision == expected_revision => {
                let revision = inner.bump();
                inner.entries.insert(key.to_string(), Entry { value, revision });
                Ok(revision)
            }
            // A vanished key also conflicts: the caller's snapshot is stale.
            _ => Err(StoreError::Conflict(key.to_string())),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("kv mutex");
        inner.entries.remove(key);
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, StoreError> {
        let inner = self.inner.lock().expect("kv mutex");
        Ok(inner.entries.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_then_get() {
        let kv = MemoryKvStore::new();
        let rev = kv.create("job:1", b"a".to_vec()).await.unwrap();
        let entry = kv.get("job:1").await.unwrap().unwrap();
        assert_eq!(entry.value, b"a");
        assert_eq!(entry.revision, rev);
    }

    #[tokio::test]
    async fn create_twice_fails() {
        let kv = MemoryKvStore::new();
        kv.create("job:1", b"a".to_vec()).await.unwrap();
        let err = kv.create("job:1", b"b".to_vec()).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(_)), "got {err}");
    }

    #[tokio::test]
    async fn update_with_stale_revision_conflicts() {
        let kv = MemoryKvStore::new();
        let rev = kv.create("saga:1", b"a".to_vec()).await.unwrap();
        let rev2 = kv.update("saga:1", b"b".to_vec(), rev).await.unwrap();
        assert!(rev2 > rev);

        // The first writer's revision is stale now.
        let err = kv.update("saga:1", b"c".to_vec(), rev).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)), "got {err}");

        let entry = kv.get("saga:1").await.unwrap().unwrap();
        assert_eq!(entry.value, b"b");
    }

    #[tokio::test]
    async fn update_missing_key_conflicts() {
        let kv = MemoryKvStore::new();
        let err = kv.update("saga:nope", b"x".to_vec(), 1).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)), "got {err}");
    }

    #[tokio::test]
    async fn put_overwrites_unconditionally() {
        let kv = MemoryKvStore::new();
        kv.create("worker-result:1:Ping", b"a".to_vec()).await.unwrap();
        kv.put("worker-result:1:Ping", b"b".to_vec()).await.unwrap();
        let entry = kv.get("worker-result:1:Ping").await.unwrap().unwrap();
        assert_eq!(entry.value, b"b");
    }

    #[tokio::test]
    async fn keys_lists_live_entries() {
        let kv = MemoryKvStore::new();
        kv.create("saga:1", b"a".to_vec()).await.unwrap();
        kv.create("job:1", b"b".to_vec()).await.unwrap();
        kv.delete("job:1").await.unwrap();
        let keys = kv.keys().await.unwrap();
        assert_eq!(keys, vec!["saga:1".to_string()]);
    }
}

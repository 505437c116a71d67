//! JetStream key-value implementation of the state store.

use async_nats::jetstream::{self, kv};
use async_trait::async_trait;
use futures::StreamExt;

use crate::kv::{Entry, KvStore, StoreError};

/// State store backed by a JetStream KV bucket.
///
/// The bucket carries the retention: `max_age` set at creation expires every
/// entry after the configured TTL, which is how job, saga, and result records
/// all share one retention window.
pub struct NatsKvStore {
    store: kv::Store,
}

impl NatsKvStore {
    /// Open (or create) the bucket on an existing JetStream context.
    pub async fn connect(
        jetstream: &jetstream::Context,
        bucket: &str,
        ttl: std::time::Duration,
    ) -> Result<Self, StoreError> {
        let store = match jetstream.get_key_value(bucket).await {
            Ok(store) => store,
            Err(_) => jetstream
                .create_key_value(kv::Config {
                    bucket: bucket.to_string(),
                    max_age: ttl,
                    ..Default::default()
                })
                .await
                .map_err(|e| StoreError::Io(e.to_string()))?,
        };
        Ok(Self { store })
    }

    // JetStream KV keys may not contain ':'. Our logical keys never contain
    // '.', so the mapping is reversible.
    fn encode(key: &str) -> String {
        key.replace(':', ".")
    }

    fn decode(key: &str) -> String {
        key.replace('.', ":")
    }
}

#[async_trait]
impl KvStore for NatsKvStore {
    async fn get(&self, key: &str) -> Result<Option<Entry>, StoreError> {
        let entry = self
            .store
            .entry(Self::encode(key))
            .await
            .map_err(|e| StoreError::Io(e.to_string()))?;
        Ok(entry.and_then(|e| match e.operation {
            kv::Operation::Put => Some(Entry {
                value: e.value.to_vec(),
                revision: e.revision,
            }),
            kv::Operation::Delete | kv::Operation::Purge => None,
        }))
    }

    async fn create(&self, key: &str, value: Vec<u8>) -> Result<u64, StoreError> {
        match self.store.create(Self::encode(key), value.into()).await {
            Ok(revision) => Ok(revision),
            Err(e) if e.kind() == kv::CreateErrorKind::AlreadyExists => {
                Err(StoreError::AlreadyExists(key.to_string()))
            }
            Err(e) => Err(StoreError::Io(e.to_string())),
        }
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<u64, StoreError> {
        self.store
            .put(Self::encode(key), value.into())
            .await
            .map_err(|e| StoreError::Io(e.to_string()))
    }

    async fn update(
        &self,
        key: &str,
        value: Vec<u8>,
        expected_revision: u64,
    ) -> Result<u64, StoreError> {
        match self
            .store
            .update(Self::encode(key), value.into(), expected_revision)
            .await
        {
            Ok(revision) => Ok(revision),
            Err(e) => {
                // JetStream reports CAS misses as a wrong-last-sequence publish
                // failure.
                let msg = e.to_string();
                if msg.contains("wrong last sequence") {
                    Err(StoreError::Conflict(key.to_string()))
                } else {
                    Err(StoreError::Io(msg))
                }
            }
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.store
            .delete(Self::encode(key))
            .await
            .map_err(|e| StoreError::Io(e.to_string()))
    }

    async fn keys(&self) -> Result<Vec<String>, StoreError> {
        let mut stream = self
            .store
            .keys()
            .await
            .map_err(|e| StoreError::Io(e.to_string()))?;
        let mut out = Vec::new();
        while let Some(key) = stream.next().await {
            let key = key.map_err(|e| StoreError::Io(e.to_string()))?;
            out.push(Self::decode(&key));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_encoding_is_reversible() {
        let logical = "worker-result:8400d0f1-1111-2222-3333-444455556666:GeoIP";
        let encoded = NatsKvStore::encode(logical);
        assert!(!encoded.contains(':'));
        assert_eq!(NatsKvStore::decode(&encoded), logical);
    }
}

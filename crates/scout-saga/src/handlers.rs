//! Event handlers the coordinator drives, one per event type.
//!
//! Both handlers are idempotent under redelivery: creation is conditional on
//! absence, completion is a no-op for kinds that are not pending, and the
//! compare-and-swap loop serialises concurrent deliveries for the same job.

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use scout_bus::BusClient;
use scout_core::{CommandBody, JobSubmitted, LookupCommand, TaskCompleted};
use scout_store::StoreError;

use crate::instance::{CompletionOutcome, SagaInstance};
use crate::store::SagaStore;

/// Bounded retry budget for conflicting completion updates.
pub const MAX_CAS_RETRIES: u32 = 10;

#[derive(Debug, Error)]
pub enum SagaError {
    /// A `TaskCompleted` arrived for a job with no saga instance. Retryable;
    /// the caller decides when to dead-letter.
    #[error("no saga instance for job {0}")]
    Orphan(Uuid),

    #[error("saga store: {0}")]
    Store(#[from] StoreError),

    #[error("gave up after {MAX_CAS_RETRIES} conflicting updates for job {0}")]
    ConflictBudget(Uuid),
}

/// The slice of the bus the fan-out needs. A seam so handlers are testable
/// without a broker.
#[async_trait]
pub trait CommandPublisher: Send + Sync {
    async fn publish_command(&self, command: &LookupCommand) -> anyhow::Result<()>;
}

#[async_trait]
impl CommandPublisher for BusClient {
    async fn publish_command(&self, command: &LookupCommand) -> anyhow::Result<()> {
        BusClient::publish_command(self, command).await
    }
}

/// Create the saga instance and fan out one typed command per requested
/// service. A duplicate `JobSubmitted` for an existing instance is discarded.
///
/// The instance is made durable before anything is published; a partial
/// publish failure therefore leaves a `Processing` saga that the sweeper will
/// republish for, rather than a job nobody knows about.
pub async fn handle_job_submitted(
    store: &SagaStore,
    publisher: &dyn CommandPublisher,
    event: &JobSubmitted,
) -> Result<(), SagaError> {
    let saga = SagaInstance::new(event.job_id, event.services.iter().copied());
    match store.create(&saga).await {
        Ok(_) => {}
        Err(StoreError::AlreadyExists(_)) => {
            debug!("Duplicate JobSubmitted for job {}, discarding", event.job_id);
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    }
    info!(
        "Saga created for job {} with {} services",
        event.job_id,
        saga.pending_services.len()
    );

    for kind in &saga.pending_services {
        let command = LookupCommand::for_kind(
            *kind,
            CommandBody {
                job_id: event.job_id,
                target: event.target.clone(),
                target_kind: event.target_kind,
            },
        );
        // Publish failures are not fatal here: the saga is durable and the
        // sweeper republishes for stalled pending sets.
        if let Err(e) = publisher.publish_command(&command).await {
            warn!(
                "Failed to publish {} command for job {}: {}",
                kind, event.job_id, e
            );
        }
    }
    Ok(())
}

/// Fold one `TaskCompleted` into the saga, retrying on concurrent updates.
pub async fn handle_task_completed(
    store: &SagaStore,
    event: &TaskCompleted,
) -> Result<CompletionOutcome, SagaError> {
    for _ in 0..MAX_CAS_RETRIES {
        let Some((mut saga, revision)) = store.load(event.job_id).await? else {
            return Err(SagaError::Orphan(event.job_id));
        };

        let outcome = saga.apply_completion(event.kind, event.result_location.clone());
        if outcome == CompletionOutcome::Duplicate {
            debug!(
                "Duplicate TaskCompleted({}) for job {}, discarding",
                event.kind, event.job_id
            );
            return Ok(outcome);
        }

        match store.update(&saga, revision).await {
            Ok(_) => {
                if outcome == CompletionOutcome::Finalized {
                    info!("Job {} completed, all services reported", event.job_id);
                }
                return Ok(outcome);
            }
            Err(StoreError::Conflict(_)) => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Err(SagaError::ConflictBudget(event.job_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    use chrono::Utc;
    use scout_core::{ResultLocation, ServiceKind, TargetKind};
    use scout_store::{Entry, KvStore, MemoryKvStore};

    #[derive(Default)]
    struct RecordingPublisher {
        commands: Mutex<Vec<LookupCommand>>,
    }

    #[async_trait]
    impl CommandPublisher for RecordingPublisher {
        async fn publish_command(&self, command: &LookupCommand) -> anyhow::Result<()> {
            self.commands.lock().unwrap().push(command.clone());
            Ok(())
        }
    }

    fn submitted(job_id: Uuid, services: &[ServiceKind]) -> JobSubmitted {
        JobSubmitted {
            job_id,
            target: "8.8.8.8".to_string(),
            target_kind: TargetKind::Ip,
            services: services.to_vec(),
        }
    }

    fn completed(job_id: Uuid, kind: ServiceKind) -> TaskCompleted {
        TaskCompleted {
            job_id,
            kind,
            success: true,
            error_message: None,
            duration_ms: 10,
            timestamp: Utc::now(),
            result_location: Some(ResultLocation::KeyValue {
                key: format!("worker-result:{}:{}", job_id, kind.as_str()),
                partition: 0,
                ttl: 86400,
            }),
        }
    }

    #[tokio::test]
    async fn submission_fans_out_one_command_per_service() {
        let store = SagaStore::new(Arc::new(MemoryKvStore::new()));
        let publisher = RecordingPublisher::default();
        let job_id = Uuid::new_v4();

        handle_job_submitted(
            &store,
            &publisher,
            &submitted(job_id, &[ServiceKind::GeoIp, ServiceKind::Ping]),
        )
        .await
        .unwrap();

        let commands = publisher.commands.lock().unwrap();
        assert_eq!(commands.len(), 2);
        let kinds: Vec<_> = commands.iter().map(|c| c.kind()).collect();
        assert!(kinds.contains(&ServiceKind::GeoIp));
        assert!(kinds.contains(&ServiceKind::Ping));
        assert!(commands.iter().all(|c| c.job_id() == job_id));
    }

    #[tokio::test]
    async fn duplicate_submission_publishes_nothing() {
        let store = SagaStore::new(Arc::new(MemoryKvStore::new()));
        let publisher = RecordingPublisher::default();
        let job_id = Uuid::new_v4();
        let event = submitted(job_id, &[ServiceKind::GeoIp]);

        handle_job_submitted(&store, &publisher, &event).await.unwrap();
        handle_job_submitted(&store, &publisher, &event).await.unwrap();
        handle_job_submitted(&store, &publisher, &event).await.unwrap();

        assert_eq!(publisher.commands.lock().unwrap().len(), 1);
        let (saga, _) = store.load(job_id).await.unwrap().unwrap();
        assert_eq!(saga.pending_services.len(), 1);
    }

    #[tokio::test]
    async fn completions_drive_the_saga_to_terminal() {
        let store = SagaStore::new(Arc::new(MemoryKvStore::new()));
        let publisher = RecordingPublisher::default();
        let job_id = Uuid::new_v4();

        handle_job_submitted(
            &store,
            &publisher,
            &submitted(job_id, &[ServiceKind::GeoIp, ServiceKind::Ping]),
        )
        .await
        .unwrap();

        let outcome = handle_task_completed(&store, &completed(job_id, ServiceKind::GeoIp))
            .await
            .unwrap();
        assert_eq!(outcome, CompletionOutcome::Applied);

        let outcome = handle_task_completed(&store, &completed(job_id, ServiceKind::Ping))
            .await
            .unwrap();
        assert_eq!(outcome, CompletionOutcome::Finalized);

        let (saga, _) = store.load(job_id).await.unwrap().unwrap();
        assert!(saga.is_completed());
        assert_eq!(saga.result_locations.len(), 2);
    }

    #[tokio::test]
    async fn redelivered_completion_is_a_duplicate() {
        let store = SagaStore::new(Arc::new(MemoryKvStore::new()));
        let publisher = RecordingPublisher::default();
        let job_id = Uuid::new_v4();

        handle_job_submitted(&store, &publisher, &submitted(job_id, &[ServiceKind::GeoIp]))
            .await
            .unwrap();

        let event = completed(job_id, ServiceKind::GeoIp);
        handle_task_completed(&store, &event).await.unwrap();
        let (terminal, _) = store.load(job_id).await.unwrap().unwrap();

        for _ in 0..3 {
            let outcome = handle_task_completed(&store, &event).await.unwrap();
            assert_eq!(outcome, CompletionOutcome::Duplicate);
        }
        let (after, _) = store.load(job_id).await.unwrap().unwrap();
        assert_eq!(after, terminal);
    }

    #[tokio::test]
    async fn orphan_completion_is_reported() {
        let store = SagaStore::new(Arc::new(MemoryKvStore::new()));
        let job_id = Uuid::new_v4();
        let err = handle_task_completed(&store, &completed(job_id, ServiceKind::Ping))
            .await
            .unwrap_err();
        assert!(matches!(err, SagaError::Orphan(id) if id == job_id));
    }

    /// KvStore decorator that fails the first CAS update to exercise the
    /// retry loop.
    struct ConflictOnce {
        inner: MemoryKvStore,
        tripped: AtomicBool,
    }

    #[async_trait]
    impl KvStore for ConflictOnce {
        async fn get(&self, key: &str) -> Result<Option<Entry>, StoreError> {
            self.inner.get(key).await
        }
        async fn create(&self, key: &str, value: Vec<u8>) -> Result<u64, StoreError> {
            self.inner.create(key, value).await
        }
        async fn put(&self, key: &str, value: Vec<u8>) -> Result<u64, StoreError> {
            self.inner.put(key, value).await
        }
        async fn update(
            &self,
            key: &str,
            value: Vec<u8>,
            expected_revision: u64,
        ) -> Result<u64, StoreError> {
            if !self.tripped.swap(true, Ordering::SeqCst) {
                return Err(StoreError::Conflict(key.to_string()));
            }
            self.inner.update(key, value, expected_revision).await
        }
        async fn delete(&self, key: &str) -> Result<(), StoreError> {
            self.inner.delete(key).await
        }
        async fn keys(&self) -> Result<Vec<String>, StoreError> {
            self.inner.keys().await
        }
    }

    #[tokio::test]
    async fn completion_retries_through_a_conflict() {
        let store = SagaStore::new(Arc::new(ConflictOnce {
            inner: MemoryKvStore::new(),
            tripped: AtomicBool::new(false),
        }));
        let publisher = RecordingPublisher::default();
        let job_id = Uuid::new_v4();

        handle_job_submitted(&store, &publisher, &submitted(job_id, &[ServiceKind::Rdap]))
            .await
            .unwrap();

        let outcome = handle_task_completed(&store, &completed(job_id, ServiceKind::Rdap))
            .await
            .unwrap();
        assert_eq!(outcome, CompletionOutcome::Finalized);
    }
}

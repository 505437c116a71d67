//! Sweeper — background task that republishes commands for stalled sagas.
//!
//! Fan-out publishes after the saga instance is durable, so a crashed or
//! partially failed publish leaves a `Processing` instance whose pending set
//! records exactly which commands are owed. Republishing is safe: result
//! writes are idempotent and duplicate completions are saga no-ops.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use scout_core::{CommandBody, Job, LookupCommand};
use scout_store::KvStore;

use crate::handlers::{CommandPublisher, SagaError};
use crate::store::SagaStore;

/// Spawn the sweeper as a background tokio task.
pub fn spawn_sweeper(
    store: Arc<SagaStore>,
    kv: Arc<dyn KvStore>,
    publisher: Arc<dyn CommandPublisher>,
    interval_secs: u64,
    stale_secs: u64,
) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(interval_secs));
        loop {
            interval.tick().await;
            match sweep_once(&store, kv.as_ref(), publisher.as_ref(), stale_secs).await {
                Ok(0) => {}
                Ok(n) => info!("Sweeper republished commands for {} stalled sagas", n),
                Err(e) => warn!("Sweeper error: {}", e),
            }
        }
    });
}

/// One sweep pass. Returns how many sagas had commands republished.
pub async fn sweep_once(
    store: &SagaStore,
    kv: &dyn KvStore,
    publisher: &dyn CommandPublisher,
    stale_secs: u64,
) -> Result<u32, SagaError> {
    let cutoff = Utc::now() - chrono::Duration::seconds(stale_secs as i64);
    let mut swept = 0;

    for saga in store.list().await? {
        if saga.is_completed() || saga.updated_at > cutoff {
            continue;
        }

        // The saga record does not carry the target; the job record does.
        let job_id = saga.correlation_id;
        let Some(entry) = kv.get(&Job::key(job_id)).await? else {
            warn!("Stalled saga {} has no job record, skipping", job_id);
            continue;
        };
        let job: Job = match serde_json::from_slice(&entry.value) {
            Ok(job) => job,
            Err(e) => {
                warn!("Skipping unreadable job record for {}: {}", job_id, e);
                continue;
            }
        };

        for kind in &saga.pending_services {
            let command = LookupCommand::for_kind(
                *kind,
                CommandBody {
                    job_id,
                    target: job.target.clone(),
                    target_kind: job.target_kind,
                },
            );
            if let Err(e) = publisher.publish_command(&command).await {
                warn!("Sweeper failed to republish {} for job {}: {}", kind, job_id, e);
            }
        }
        info!(
            "Republished {} pending commands for stalled saga {}",
            saga.pending_services.len(),
            job_id
        );
        swept += 1;
    }

    Ok(swept)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use uuid::Uuid;

    use scout_core::{ServiceKind, TargetKind};
    use scout_store::MemoryKvStore;

    use crate::instance::SagaInstance;

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

    async fn seed(
        kv: &Arc<MemoryKvStore>,
        store: &SagaStore,
        services: &[ServiceKind],
        stale: bool,
    ) -> Uuid {
        let job_id = Uuid::new_v4();
        let job = Job::new(
            job_id,
            "1.1.1.1".to_string(),
            TargetKind::Ip,
            services.iter().copied().collect(),
        );
        kv.create(&Job::key(job_id), serde_json::to_vec(&job).unwrap())
            .await
            .unwrap();

        let mut saga = SagaInstance::new(job_id, services.iter().copied());
        if stale {
            saga.updated_at = Utc::now() - chrono::Duration::seconds(3600);
        }
        store.create(&saga).await.unwrap();
        job_id
    }

    #[tokio::test]
    async fn republishes_only_stale_processing_sagas() {
        let kv = Arc::new(MemoryKvStore::new());
        let store = SagaStore::new(kv.clone());
        let publisher = RecordingPublisher::default();

        let stale_id = seed(&kv, &store, &[ServiceKind::GeoIp, ServiceKind::Ping], true).await;
        let _fresh_id = seed(&kv, &store, &[ServiceKind::Rdap], false).await;

        let swept = sweep_once(&store, kv.as_ref(), &publisher, 300).await.unwrap();
        assert_eq!(swept, 1);

        let commands = publisher.commands.lock().unwrap();
        assert_eq!(commands.len(), 2);
        assert!(commands.iter().all(|c| c.job_id() == stale_id));
    }

    #[tokio::test]
    async fn completed_sagas_are_left_alone() {
        let kv = Arc::new(MemoryKvStore::new());
        let store = SagaStore::new(kv.clone());
        let publisher = RecordingPublisher::default();

        let job_id = seed(&kv, &store, &[ServiceKind::Ping], true).await;
        let (mut saga, revision) = store.load(job_id).await.unwrap().unwrap();
        saga.apply_completion(ServiceKind::Ping, None);
        saga.updated_at = Utc::now() - chrono::Duration::seconds(3600);
        store.update(&saga, revision).await.unwrap();

        let swept = sweep_once(&store, kv.as_ref(), &publisher, 300).await.unwrap();
        assert_eq!(swept, 0);
        assert!(publisher.commands.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_job_record_is_skipped() {
        let kv = Arc::new(MemoryKvStore::new());
        let store = SagaStore::new(kv.clone());
        let publisher = RecordingPublisher::default();

        let mut saga = SagaInstance::new(Uuid::new_v4(), [ServiceKind::GeoIp]);
        saga.updated_at = Utc::now() - chrono::Duration::seconds(3600);
        store.create(&saga).await.unwrap();

        let swept = sweep_once(&store, kv.as_ref(), &publisher, 300).await.unwrap();
        assert_eq!(swept, 0);
    }
}

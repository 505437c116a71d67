//! Query assembler - joins saga state with dereferenced result records into
//! the client-visible job view.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use scout_core::{Job, ServiceKind, TargetKind};
use scout_saga::{SagaStore, SagaState};
use scout_store::{KvStore, ResultRecord, ResultStore, StoreError};

/// Per-service outcome in the assembled view: either the dereferenced record
/// or an `unavailable` marker when the record is gone (expired TTL, missing
/// backend, failed persist).
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum ServiceView {
    Completed(ResultRecord),
    Unavailable { unavailable: bool },
}

impl ServiceView {
    fn unavailable() -> Self {
        ServiceView::Unavailable { unavailable: true }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobView {
    pub job_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_kind: Option<TargetKind>,
    pub status: SagaState,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub results: BTreeMap<ServiceKind, ServiceView>,
    pub pending: Vec<ServiceKind>,
}

/// Assemble the view for `job_id`. `None` means the job is unknown.
///
/// Read-only: one saga load plus one result fetch per completed service.
/// Missing or unreadable records degrade to per-service `unavailable`
/// markers, never to a query failure.
pub async fn assemble(
    saga_store: &SagaStore,
    kv: &dyn KvStore,
    results: &ResultStore,
    job_id: Uuid,
) -> Result<Option<JobView>, StoreError> {
    let Some((saga, _)) = saga_store.load(job_id).await? else {
        return Ok(None);
    };

    // The job record enriches the view with target metadata; its absence
    // (TTL expiry mid-retention is possible) is tolerated.
    let job: Option<Job> = match kv.get(&Job::key(job_id)).await? {
        Some(entry) => serde_json::from_slice(&entry.value).ok(),
        None => None,
    };

    let mut assembled = BTreeMap::new();
    for kind in &saga.completed_services {
        let view = match saga.result_locations.get(kind) {
            Some(location) => match results.fetch(location).await {
                Ok(Some(record)) => ServiceView::Completed(record),
                Ok(None) => ServiceView::unavailable(),
                Err(e) => {
                    warn!("Could not dereference {} result for job {}: {}", kind, job_id, e);
                    ServiceView::unavailable()
                }
            },
            // The worker reported completion without managing to persist.
            None => ServiceView::unavailable(),
        };
        assembled.insert(*kind, view);
    }

    Ok(Some(JobView {
        job_id,
        target: job.as_ref().map(|j| j.target.clone()),
        target_kind: job.as_ref().map(|j| j.target_kind),
        status: saga.current_state,
        created_at: saga.created_at,
        completed_at: saga.completed_at,
        results: assembled,
        pending: saga.pending_services.iter().copied().collect(),
    }))
}

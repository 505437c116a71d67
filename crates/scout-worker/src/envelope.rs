//! The shared worker lifecycle, parameterised by two function-typed fields.
//!
//! Every lookup kind runs the same envelope: start a timer, validate the
//! target, perform the kind-specific lookup, persist the outcome through the
//! result store, and hand back the completion event for publication. There is
//! no per-kind subtyping; a kind is just a pair of functions.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use scout_core::{CommandBody, LookupCommand, ServiceKind, TaskCompleted};
use scout_store::ResultStore;

/// Pre-lookup target check. A message short-circuits the lookup and is
/// recorded as that subtask's failure.
pub type ValidateFn = fn(&CommandBody) -> Option<String>;

/// The kind-specific lookup. Must honour the cancellation token at every
/// suspension point; any error is treated uniformly as a lookup failure.
pub type LookupFn = Arc<
    dyn Fn(CommandBody, CancellationToken) -> BoxFuture<'static, anyhow::Result<serde_json::Value>>
        + Send
        + Sync,
>;

pub struct WorkerEnvelope {
    kind: ServiceKind,
    validate: ValidateFn,
    perform_lookup: LookupFn,
}

impl WorkerEnvelope {
    pub fn new(kind: ServiceKind, validate: ValidateFn, perform_lookup: LookupFn) -> Self {
        Self {
            kind,
            validate,
            perform_lookup,
        }
    }

    pub fn kind(&self) -> ServiceKind {
        self.kind
    }

    /// Run the full lifecycle for one command and return the completion
    /// event. Never fails: a store-write failure degrades to a locationless
    /// failed completion so the saga still advances.
    pub async fn handle(
        &self,
        command: &LookupCommand,
        cancel: CancellationToken,
        results: &ResultStore,
    ) -> TaskCompleted {
        let started = Instant::now();
        let body = command.body().clone();
        let job_id = body.job_id;
        debug!("{} lookup starting for job {}", self.kind, job_id);

        let outcome = match (self.validate)(&body) {
            Some(message) => Err(message),
            None => (self.perform_lookup)(body, cancel)
                .await
                .map_err(|e| e.to_string()),
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        let (success, error_message, result_location) = match outcome {
            Ok(data) => match results.save_success(job_id, self.kind, data, duration_ms).await {
                Ok(location) => (true, None, Some(location)),
                Err(e) => {
                    error!(
                        "Failed to persist {} result for job {}: {}",
                        self.kind, job_id, e
                    );
                    (
                        false,
                        Some(format!("Lookup succeeded but the result could not be persisted: {}", e)),
                        None,
                    )
                }
            },
            Err(message) => {
                match results
                    .save_failure(job_id, self.kind, message.clone(), duration_ms)
                    .await
                {
                    Ok(location) => (false, Some(message), Some(location)),
                    Err(e) => {
                        error!(
                            "Failed to persist {} failure for job {}: {}",
                            self.kind, job_id, e
                        );
                        (
                            false,
                            Some(format!("{} (result not persisted: {})", message, e)),
                            None,
                        )
                    }
                }
            }
        };

        TaskCompleted {
            job_id,
            kind: self.kind,
            success,
            error_message,
            duration_ms,
            timestamp: Utc::now(),
            result_location,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    use scout_core::{StorageKind, TargetKind};
    use scout_store::{KeyValueBackend, KvStore, MemoryKvStore};

    fn result_store() -> ResultStore {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
        ResultStore::new(StorageKind::KeyValue).register(
            StorageKind::KeyValue,
            Arc::new(KeyValueBackend::new(kv, 0, 86400)),
        )
    }

    /// A store with no backend registered, so every write fails.
    fn broken_store() -> ResultStore {
        ResultStore::new(StorageKind::KeyValue)
    }

    fn command() -> LookupCommand {
        LookupCommand::for_kind(
            ServiceKind::Ping,
            CommandBody {
                job_id: Uuid::new_v4(),
                target: "8.8.8.8".to_string(),
                target_kind: TargetKind::Ip,
            },
        )
    }

    fn no_validate(_body: &CommandBody) -> Option<String> {
        None
    }

    fn reject_all(_body: &CommandBody) -> Option<String> {
        Some("target not usable for this lookup".to_string())
    }

    fn lookup_ok() -> LookupFn {
        Arc::new(|_body, _cancel| Box::pin(async { Ok(json!({"packetsSent": 4})) }))
    }

    fn lookup_fails() -> LookupFn {
        Arc::new(|_body, _cancel| Box::pin(async { anyhow::bail!("probe api failed") }))
    }

    #[tokio::test]
    async fn successful_lookup_persists_and_reports_location() {
        let store = result_store();
        let envelope = WorkerEnvelope::new(ServiceKind::Ping, no_validate, lookup_ok());
        let cmd = command();

        let event = envelope.handle(&cmd, CancellationToken::new(), &store).await;
        assert!(event.success);
        assert_eq!(event.kind, ServiceKind::Ping);
        assert_eq!(event.job_id, cmd.job_id());
        assert!(event.error_message.is_none());

        let location = event.result_location.expect("location");
        let record = store.fetch(&location).await.unwrap().unwrap();
        assert!(record.success);
        assert_eq!(record.data, Some(json!({"packetsSent": 4})));
    }

    #[tokio::test]
    async fn failed_lookup_still_persists_a_record() {
        let store = result_store();
        let envelope = WorkerEnvelope::new(ServiceKind::Ping, no_validate, lookup_fails());

        let event = envelope.handle(&command(), CancellationToken::new(), &store).await;
        assert!(!event.success);
        assert_eq!(event.error_message.as_deref(), Some("probe api failed"));

        // Failure is data too: the record exists and carries the message.
        let location = event.result_location.expect("location");
        let record = store.fetch(&location).await.unwrap().unwrap();
        assert!(!record.success);
        assert_eq!(record.error_message.as_deref(), Some("probe api failed"));
    }

    #[tokio::test]
    async fn validation_short_circuits_the_lookup() {
        let store = result_store();
        let lookup: LookupFn = Arc::new(|_body, _cancel| {
            Box::pin(async { panic!("lookup must not run after validation failure") })
        });
        let envelope = WorkerEnvelope::new(ServiceKind::ReverseDns, reject_all, lookup);

        let event = envelope.handle(&command(), CancellationToken::new(), &store).await;
        assert!(!event.success);
        assert_eq!(
            event.error_message.as_deref(),
            Some("target not usable for this lookup")
        );
        assert!(event.result_location.is_some());
    }

    #[tokio::test]
    async fn store_write_failure_degrades_to_locationless_completion() {
        let store = broken_store();
        let envelope = WorkerEnvelope::new(ServiceKind::Ping, no_validate, lookup_ok());

        let event = envelope.handle(&command(), CancellationToken::new(), &store).await;
        assert!(!event.success);
        assert!(event.result_location.is_none());
        let message = event.error_message.expect("synthesized message");
        assert!(message.contains("could not be persisted"), "message: {message}");
    }
}

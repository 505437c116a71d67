//! Worker loop - pulls commands of one kind from the bus and runs them
//! through the lifecycle envelope.

use std::sync::Arc;

use anyhow::Result;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use scout_bus::BusClient;
use scout_core::{Event, LookupCommand};
use scout_store::ResultStore;

use crate::envelope::WorkerEnvelope;
use crate::metrics::{KindLabel, WorkerMetrics};

/// Run the consume loop for one lookup kind until shutdown.
pub async fn run_worker_loop(
    bus: Arc<BusClient>,
    envelope: WorkerEnvelope,
    results: Arc<ResultStore>,
    metrics: WorkerMetrics,
    shutdown: CancellationToken,
) -> Result<()> {
    let kind = envelope.kind();
    let consumer = bus.command_consumer(kind).await?;
    let mut messages = consumer.messages().await?;

    info!("Worker loop started for {}", kind);

    loop {
        if let Ok(depth) = bus.command_queue_depth().await {
            metrics.command_queue_depth.set(depth as i64);
        }

        let next = tokio::select! {
            _ = shutdown.cancelled() => break,
            next = messages.next() => next,
        };

        match next {
            Some(Ok(msg)) => {
                let command: LookupCommand = match serde_json::from_slice(&msg.payload) {
                    Ok(command) => command,
                    Err(e) => {
                        warn!("Invalid command message: {}", e);
                        msg.ack().await.ok();
                        continue;
                    }
                };
                if command.kind() != kind {
                    warn!(
                        "Command for {} routed to {} worker, dropping",
                        command.kind(),
                        kind
                    );
                    msg.ack().await.ok();
                    continue;
                }

                metrics.active_lookups.inc();
                let event = envelope
                    .handle(&command, shutdown.child_token(), results.as_ref())
                    .await;
                metrics.active_lookups.dec();

                let label = KindLabel(kind.subject_suffix().to_string());
                metrics.lookups_completed.get_or_create(&label).inc();
                if !event.success {
                    metrics.lookup_failures.get_or_create(&label).inc();
                }
                if event.result_location.is_none() {
                    metrics.store_write_failures.inc();
                }

                // Completion must reach the saga; without it the job never
                // finalizes. Leave the message unacked on publish failure so
                // the command redelivers and the idempotent rewrite repeats.
                match bus.publish_event(&Event::TaskCompleted(event)).await {
                    Ok(()) => {
                        msg.ack().await.ok();
                    }
                    Err(e) => {
                        error!(
                            "Failed to publish TaskCompleted for job {}: {}",
                            command.job_id(),
                            e
                        );
                    }
                }
            }
            Some(Err(e)) => warn!("Command consumer error: {}", e),
            None => break,
        }
    }

    info!("Worker loop stopped for {}", kind);
    Ok(())
}

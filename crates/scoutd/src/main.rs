//! scoutd - Scout coordinator daemon.
//!
//! Runs the saga event loop (consume `JobSubmitted`/`TaskCompleted`, drive
//! the per-job state machine, fan out commands) plus the sweeper that
//! republishes commands for stalled sagas. Performs no lookups and never
//! touches result data.

use std::sync::Arc;
use std::time::Duration;

use async_nats::jetstream::AckKind;
use clap::Parser;
use futures::StreamExt;
use tracing::{debug, info, warn};

use scout_bus::BusClient;
use scout_core::Event;
use scout_saga::{
    handle_job_submitted, handle_task_completed, spawn_sweeper, CommandPublisher, SagaError,
    SagaStore,
};
use scout_store::{KvStore, NatsKvStore};

/// Orphan completions retry a few times before dead-lettering; transient
/// store errors retry forever.
const MAX_ORPHAN_DELIVERIES: i64 = 5;
const RETRY_DELAY: Duration = Duration::from_secs(2);

#[derive(Parser)]
#[command(name = "scoutd", about = "Scout saga coordinator daemon")]
struct Cli {
    /// NATS server the bus and state bucket live on
    #[arg(long, env = "NATS_URL")]
    nats_url: String,

    /// JetStream KV bucket holding job and saga state
    #[arg(long, default_value = "scout-state", env = "STATE_BUCKET")]
    state_bucket: String,

    /// Retention for job, saga, and result records, in seconds
    #[arg(long, default_value = "86400", env = "RESULT_TTL_SECS")]
    state_ttl_secs: u64,

    /// How often the sweeper scans for stalled sagas
    #[arg(long, default_value = "60", env = "SWEEP_INTERVAL_SECS")]
    sweep_interval_secs: u64,

    /// How long a Processing saga may sit idle before its pending commands
    /// are republished
    #[arg(long, default_value = "300", env = "SWEEP_STALE_SECS")]
    sweep_stale_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let bus = Arc::new(BusClient::connect(&cli.nats_url).await?);
    info!("Connected to NATS at {}", cli.nats_url);

    let kv: Arc<dyn KvStore> = Arc::new(
        NatsKvStore::connect(
            bus.jetstream(),
            &cli.state_bucket,
            Duration::from_secs(cli.state_ttl_secs),
        )
        .await?,
    );
    let store = Arc::new(SagaStore::new(kv.clone()));

    let publisher: Arc<dyn CommandPublisher> = bus.clone();
    spawn_sweeper(
        store.clone(),
        kv,
        publisher,
        cli.sweep_interval_secs,
        cli.sweep_stale_secs,
    );
    info!(
        "Sweeper started (interval: {}s, stale after: {}s)",
        cli.sweep_interval_secs, cli.sweep_stale_secs
    );

    run_event_loop(bus, store).await
}

/// Consume broadcast events and fold them into saga state. Blocks forever.
async fn run_event_loop(bus: Arc<BusClient>, store: Arc<SagaStore>) -> anyhow::Result<()> {
    let consumer = bus.saga_consumer().await?;
    let mut messages = consumer.messages().await?;
    info!("Saga event loop started");

    while let Some(next) = messages.next().await {
        let msg = match next {
            Ok(msg) => msg,
            Err(e) => {
                warn!("Event consumer error: {}", e);
                continue;
            }
        };

        let event: Event = match serde_json::from_slice(&msg.payload) {
            Ok(event) => event,
            Err(e) => {
                warn!("Unparseable event, dead-lettering: {}", e);
                if let Err(e) = bus.publish_dlq(msg.payload.to_vec()).await {
                    warn!("Dead-letter publish failed: {}", e);
                }
                msg.ack().await.ok();
                continue;
            }
        };

        match &event {
            Event::JobSubmitted(submitted) => {
                match handle_job_submitted(&store, bus.as_ref(), submitted).await {
                    Ok(()) => {
                        msg.ack().await.ok();
                    }
                    Err(e) => {
                        warn!("JobSubmitted for {} failed: {}", submitted.job_id, e);
                        msg.ack_with(AckKind::Nak(Some(RETRY_DELAY))).await.ok();
                    }
                }
            }
            Event::TaskCompleted(completed) => {
                match handle_task_completed(&store, completed).await {
                    Ok(_) => {
                        msg.ack().await.ok();
                    }
                    // A completion can outrun its own JobSubmitted under
                    // redelivery; give the saga a few chances to appear.
                    Err(SagaError::Orphan(job_id)) => {
                        let delivered = msg.info().map(|i| i.delivered).unwrap_or(0);
                        if delivered >= MAX_ORPHAN_DELIVERIES {
                            warn!(
                                "Orphan TaskCompleted for job {} after {} deliveries, dead-lettering",
                                job_id, delivered
                            );
                            if let Err(e) = bus.publish_dlq(msg.payload.to_vec()).await {
                                warn!("Dead-letter publish failed: {}", e);
                            }
                            msg.ack().await.ok();
                        } else {
                            debug!("Orphan TaskCompleted for job {}, retrying", job_id);
                            msg.ack_with(AckKind::Nak(Some(RETRY_DELAY))).await.ok();
                        }
                    }
                    Err(e) => {
                        warn!("TaskCompleted for {} failed: {}", completed.job_id, e);
                        msg.ack_with(AckKind::Nak(Some(RETRY_DELAY))).await.ok();
                    }
                }
            }
        }
    }

    Ok(())
}

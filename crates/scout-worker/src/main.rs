//! scout-worker binary - lookup worker pools for Scout.
//!
//! One process can host any subset of the lookup kinds; each kind gets its
//! own consume loop over the shared bus connection.

mod config;
mod envelope;
mod health;
mod lookups;
mod metrics;
mod run_loop;

use anyhow::Result;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use scout_bus::BusClient;
use scout_core::StorageKind;
use scout_store::{FilesystemBackend, KeyValueBackend, KvStore, NatsKvStore, ResultStore};

use config::WorkerConfig;
use health::HealthState;
use lookups::LookupContext;
use metrics::WorkerMetrics;

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = WorkerConfig::from_env()?;
    info!(
        "Starting scout-worker {} for kinds {:?}",
        config.worker_id, config.kinds
    );

    // Connect to NATS; the state bucket rides the same connection.
    let bus = Arc::new(BusClient::connect(&config.nats_url).await?);
    info!("Connected to NATS at {}", config.nats_url);

    let kv: Arc<dyn KvStore> = Arc::new(
        NatsKvStore::connect(
            bus.jetstream(),
            &config.state_bucket,
            std::time::Duration::from_secs(config.result_ttl_secs),
        )
        .await?,
    );

    let results = Arc::new(
        ResultStore::new(config.result_backend)
            .register(
                StorageKind::KeyValue,
                Arc::new(KeyValueBackend::new(
                    kv,
                    config.state_partition,
                    config.result_ttl_secs,
                )),
            )
            .register(
                StorageKind::Filesystem,
                Arc::new(FilesystemBackend::new(&config.result_fs_path)?),
            ),
    );

    if config.kinds.contains(&scout_core::ServiceKind::GeoIp) && config.geoip_db_path.is_none() {
        warn!("GeoIP worker enabled without GEOIP_DB_PATH; those lookups will fail");
    }
    let ctx = Arc::new(LookupContext::new(config.geoip_db_path.as_deref())?);

    let worker_metrics = WorkerMetrics::new();

    // Health/readiness state
    let ready = Arc::new(std::sync::atomic::AtomicBool::new(true));
    let health_state = Arc::new(HealthState {
        metrics: worker_metrics.clone(),
        ready: ready.clone(),
    });

    // Start metrics/health HTTP server
    let metrics_port = config.metrics_port;
    let health_router = health::health_router(health_state);
    tokio::spawn(async move {
        let addr = format!("0.0.0.0:{}", metrics_port);
        info!("Metrics server listening on {}", addr);
        let listener = tokio::net::TcpListener::bind(&addr).await.unwrap();
        axum::serve(listener, health_router).await.unwrap();
    });

    // Ctrl-C flips the token every in-flight lookup watches.
    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        let ready = ready.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutdown requested");
                ready.store(false, std::sync::atomic::Ordering::Relaxed);
                shutdown.cancel();
            }
        });
    }

    let mut loops = tokio::task::JoinSet::new();
    for kind in &config.kinds {
        let envelope = lookups::build(*kind, ctx.clone());
        loops.spawn(run_loop::run_worker_loop(
            bus.clone(),
            envelope,
            results.clone(),
            worker_metrics.clone(),
            shutdown.clone(),
        ));
    }

    while let Some(joined) = loops.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Worker loop exited with error: {}", e),
            Err(e) => warn!("Worker loop panicked: {}", e),
        }
    }

    Ok(())
}

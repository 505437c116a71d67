//! Scout Server - REST API for the distributed lookup system.
//!
//! The server owns the submission path (validate, persist the job record,
//! emit `JobSubmitted`) and the read path (assemble the job view on demand).
//! It performs no lookups and never mutates saga state.

mod ratelimit;
mod view;

use std::collections::{BTreeMap, BTreeSet};
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;
use uuid::Uuid;

use scout_bus::BusClient;
use scout_core::{validate_target, Event, Job, JobSubmitted, ServiceKind, StorageKind};
use scout_saga::SagaStore;
use scout_store::{FilesystemBackend, KeyValueBackend, KvStore, NatsKvStore, ResultStore};

use ratelimit::RateLimitLayer;
use view::JobView;

/// Upper bound on services per submission.
const MAX_SERVICES: usize = 10;

/// Application state shared across handlers
struct AppState {
    bus: Arc<BusClient>,
    kv: Arc<dyn KvStore>,
    saga_store: SagaStore,
    results: ResultStore,
    allow_single_label: bool,
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let nats_url = std::env::var("NATS_URL")?;
    let http_port: u16 = env_or("HTTP_PORT", "3000").parse()?;
    let state_bucket = env_or("STATE_BUCKET", "scout-state");
    let result_ttl_secs: u64 = env_or("RESULT_TTL_SECS", "86400").parse()?;
    let result_fs_path = env_or("RESULT_FS_PATH", "./results");
    let state_partition: u32 = env_or("STATE_PARTITION", "0").parse()?;
    let allow_single_label: bool = env_or("ALLOW_SINGLE_LABEL", "false").parse()?;
    let per_route_limit: u32 = env_or("RATE_LIMIT_PER_ROUTE", "100").parse()?;
    let global_limit: u32 = env_or("RATE_LIMIT_GLOBAL", "1000").parse()?;

    let bus = Arc::new(BusClient::connect(&nats_url).await?);
    info!("Connected to NATS at {}", nats_url);

    let kv: Arc<dyn KvStore> = Arc::new(
        NatsKvStore::connect(
            bus.jetstream(),
            &state_bucket,
            std::time::Duration::from_secs(result_ttl_secs),
        )
        .await?,
    );

    // The read path must be able to dereference every backend workers write
    // through, regardless of which one is their current default.
    let results = ResultStore::new(StorageKind::KeyValue)
        .register(
            StorageKind::KeyValue,
            Arc::new(KeyValueBackend::new(
                kv.clone(),
                state_partition,
                result_ttl_secs,
            )),
        )
        .register(
            StorageKind::Filesystem,
            Arc::new(FilesystemBackend::new(&result_fs_path)?),
        );

    let state = Arc::new(AppState {
        bus,
        saga_store: SagaStore::new(kv.clone()),
        kv,
        results,
        allow_single_label,
    });

    // Build router. Health probes sit outside the rate-limit layer.
    let jobs = Router::new()
        .route("/jobs", post(submit_job))
        .route("/jobs/:job_id", get(get_job))
        .layer(RateLimitLayer::new(per_route_limit, global_limit));

    let app = Router::new()
        .merge(jobs)
        .route("/health/live", get(health_live))
        .route("/health/ready", get(health_ready))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = format!("0.0.0.0:{}", http_port);
    info!("Starting Scout server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

async fn health_live() -> &'static str {
    "OK"
}

async fn health_ready(State(state): State<Arc<AppState>>) -> Result<&'static str, StatusCode> {
    if state.bus.is_connected() {
        Ok("OK")
    } else {
        Err(StatusCode::SERVICE_UNAVAILABLE)
    }
}

// === Job Endpoints ===

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitJobRequest {
    #[serde(default)]
    target: String,
    /// Raw strings so unrecognized kinds surface as field errors rather than
    /// a body-level deserialization failure.
    #[serde(default)]
    services: Vec<String>,
    #[serde(default)]
    single_label_allowed: Option<bool>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SubmitJobResponse {
    job_id: Uuid,
}

fn internal(e: impl std::fmt::Display) -> (StatusCode, Json<Value>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"error": "internal", "message": e.to_string()})),
    )
}

// POST /jobs
async fn submit_job(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SubmitJobRequest>,
) -> Result<(StatusCode, Json<SubmitJobResponse>), (StatusCode, Json<Value>)> {
    let mut errors: BTreeMap<&'static str, Vec<String>> = BTreeMap::new();

    let allow_single_label = req.single_label_allowed.unwrap_or(state.allow_single_label);
    let validated = match validate_target(&req.target, allow_single_label) {
        Ok(validated) => Some(validated),
        Err(e) => {
            errors.entry("target").or_default().push(e.to_string());
            None
        }
    };

    let mut services: BTreeSet<ServiceKind> = BTreeSet::new();
    if req.services.is_empty() {
        errors
            .entry("services")
            .or_default()
            .push("at least one service is required".to_string());
    } else if req.services.len() > MAX_SERVICES {
        errors
            .entry("services")
            .or_default()
            .push(format!("at most {} services may be requested", MAX_SERVICES));
    } else {
        for raw in &req.services {
            match raw.parse::<ServiceKind>() {
                Ok(kind) => {
                    if !services.insert(kind) {
                        errors
                            .entry("services")
                            .or_default()
                            .push(format!("duplicate service '{}'", raw));
                    }
                }
                Err(e) => errors.entry("services").or_default().push(e),
            }
        }
    }

    if !errors.is_empty() {
        return Err((StatusCode::BAD_REQUEST, Json(json!({ "errors": errors }))));
    }
    let validated = validated.expect("target valid when no errors collected");

    let job_id = Uuid::new_v4();
    let job = Job::new(
        job_id,
        validated.normalized.clone(),
        validated.kind,
        services.clone(),
    );
    let payload = serde_json::to_vec(&job).map_err(internal)?;
    state
        .kv
        .create(&Job::key(job_id), payload)
        .await
        .map_err(internal)?;

    // At-least-once is enough here: the saga's conditional creation absorbs
    // a client retry that lands as a second JobSubmitted.
    let event = Event::JobSubmitted(JobSubmitted {
        job_id,
        target: validated.normalized,
        target_kind: validated.kind,
        services: services.iter().copied().collect(),
    });
    state.bus.publish_event(&event).await.map_err(internal)?;

    info!(
        "Accepted job {} for '{}' with {} services",
        job_id,
        job.target,
        services.len()
    );
    Ok((StatusCode::ACCEPTED, Json(SubmitJobResponse { job_id })))
}

// GET /jobs/:job_id
async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobView>, (StatusCode, Json<Value>)> {
    match view::assemble(&state.saga_store, state.kv.as_ref(), &state.results, job_id).await {
        Ok(Some(view)) => Ok(Json(view)),
        Ok(None) => Err((
            StatusCode::NOT_FOUND,
            Json(json!({"error": "not_found", "message": format!("no job with id {}", job_id)})),
        )),
        Err(e) => Err(internal(e)),
    }
}

//! Worker configuration from environment variables.

use anyhow::{Context, Result};

use scout_core::{ServiceKind, StorageKind};

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub worker_id: String,
    pub nats_url: String,
    pub kinds: Vec<ServiceKind>,
    pub metrics_port: u16,
    // State store
    pub state_bucket: String,
    pub state_partition: u32,
    // Result store
    pub result_backend: StorageKind,
    pub result_ttl_secs: u64,
    pub result_fs_path: String,
    // Lookups
    pub geoip_db_path: Option<String>,
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self> {
        let kinds_raw =
            std::env::var("WORKER_KINDS").unwrap_or_else(|_| "geoip,ping,rdap,reverse-dns".to_string());
        let kinds = kinds_raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| s.parse::<ServiceKind>().map_err(anyhow::Error::msg))
            .collect::<Result<Vec<_>>>()
            .context("Invalid WORKER_KINDS")?;
        anyhow::ensure!(!kinds.is_empty(), "WORKER_KINDS must name at least one kind");

        Ok(Self {
            worker_id: std::env::var("WORKER_ID")
                .unwrap_or_else(|_| uuid::Uuid::new_v4().to_string()),
            nats_url: std::env::var("NATS_URL").context("NATS_URL required")?,
            kinds,
            metrics_port: std::env::var("METRICS_PORT")
                .unwrap_or_else(|_| "9090".to_string())
                .parse()
                .context("Invalid METRICS_PORT")?,
            state_bucket: std::env::var("STATE_BUCKET")
                .unwrap_or_else(|_| "scout-state".to_string()),
            state_partition: std::env::var("STATE_PARTITION")
                .unwrap_or_else(|_| "0".to_string())
                .parse()
                .context("Invalid STATE_PARTITION")?,
            result_backend: std::env::var("RESULT_BACKEND")
                .unwrap_or_else(|_| "keyvalue".to_string())
                .parse::<StorageKind>()
                .map_err(anyhow::Error::msg)
                .context("Invalid RESULT_BACKEND")?,
            result_ttl_secs: std::env::var("RESULT_TTL_SECS")
                .unwrap_or_else(|_| "86400".to_string())
                .parse()
                .context("Invalid RESULT_TTL_SECS")?,
            result_fs_path: std::env::var("RESULT_FS_PATH")
                .unwrap_or_else(|_| "./results".to_string()),
            geoip_db_path: std::env::var("GEOIP_DB_PATH").ok(),
        })
    }
}

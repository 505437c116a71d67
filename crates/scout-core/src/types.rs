//! Shared domain types: service kinds, jobs, and result locations.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The closed set of lookup services a job can request.
///
/// Wire names (`GeoIP`, `Ping`, `RDAP`, `ReverseDNS`) are part of the protocol;
/// unknown kinds fail deserialization rather than being passed through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ServiceKind {
    #[serde(rename = "GeoIP")]
    GeoIp,
    Ping,
    #[serde(rename = "RDAP")]
    Rdap,
    #[serde(rename = "ReverseDNS")]
    ReverseDns,
}

impl ServiceKind {
    pub const ALL: [ServiceKind; 4] = [
        ServiceKind::GeoIp,
        ServiceKind::Ping,
        ServiceKind::Rdap,
        ServiceKind::ReverseDns,
    ];

    /// Wire name, also used as the result-store key suffix.
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceKind::GeoIp => "GeoIP",
            ServiceKind::Ping => "Ping",
            ServiceKind::Rdap => "RDAP",
            ServiceKind::ReverseDns => "ReverseDNS",
        }
    }

    /// Lower-case token used in bus subjects and consumer names.
    pub fn subject_suffix(&self) -> &'static str {
        match self {
            ServiceKind::GeoIp => "geoip",
            ServiceKind::Ping => "ping",
            ServiceKind::Rdap => "rdap",
            ServiceKind::ReverseDns => "reverse-dns",
        }
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceKind {
    type Err = String;

    /// Accepts both the wire name and the subject token, so the same parser
    /// serves config (`WORKER_KINDS=geoip,ping`) and request payload checks.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GeoIP" | "geoip" => Ok(ServiceKind::GeoIp),
            "Ping" | "ping" => Ok(ServiceKind::Ping),
            "RDAP" | "rdap" => Ok(ServiceKind::Rdap),
            "ReverseDNS" | "reverse-dns" => Ok(ServiceKind::ReverseDns),
            other => Err(format!("unknown service kind '{}'", other)),
        }
    }
}

/// How a submitted target was classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetKind {
    #[serde(rename = "IP")]
    Ip,
    #[serde(rename = "DNS")]
    Dns,
}

/// Job lifecycle status as recorded at submission time.
///
/// The client-visible status is derived from the saga; the job record itself
/// is written once and never mutated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// The submission-side job record, persisted under `job:<jobId>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub job_id: Uuid,
    pub target: String,
    pub target_kind: TargetKind,
    pub requested_services: BTreeSet<ServiceKind>,
    pub created_at: DateTime<Utc>,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(
        job_id: Uuid,
        target: String,
        target_kind: TargetKind,
        requested_services: BTreeSet<ServiceKind>,
    ) -> Self {
        Self {
            job_id,
            target,
            target_kind,
            requested_services,
            created_at: Utc::now(),
            status: JobStatus::Pending,
            completed_at: None,
        }
    }

    /// State-store key for this job record.
    pub fn key(job_id: Uuid) -> String {
        format!("job:{}", job_id)
    }
}

/// Discriminator for result-store backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StorageKind {
    KeyValue,
    ObjectStore,
    #[serde(rename = "DocumentDB")]
    DocumentDb,
    Filesystem,
    BlobStore,
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StorageKind::KeyValue => "KeyValue",
            StorageKind::ObjectStore => "ObjectStore",
            StorageKind::DocumentDb => "DocumentDB",
            StorageKind::Filesystem => "Filesystem",
            StorageKind::BlobStore => "BlobStore",
        };
        f.write_str(s)
    }
}

impl FromStr for StorageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "KeyValue" | "keyvalue" => Ok(StorageKind::KeyValue),
            "ObjectStore" | "objectstore" => Ok(StorageKind::ObjectStore),
            "DocumentDB" | "documentdb" => Ok(StorageKind::DocumentDb),
            "Filesystem" | "filesystem" => Ok(StorageKind::Filesystem),
            "BlobStore" | "blobstore" => Ok(StorageKind::BlobStore),
            other => Err(format!("unknown storage kind '{}'", other)),
        }
    }
}

/// Self-describing pointer to a persisted result record.
///
/// The `backend` tag plus the variant fields must be sufficient for the query
/// assembler to dereference the record without any side channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all_fields = "camelCase")]
pub enum ResultLocation {
    KeyValue {
        key: String,
        partition: u32,
        /// Seconds until the record expires.
        ttl: u64,
    },
    ObjectStore {
        bucket: String,
        object_key: String,
    },
    #[serde(rename = "DocumentDB")]
    DocumentDb {
        collection: String,
        document_id: String,
    },
    Filesystem {
        path: String,
    },
    BlobStore {
        container: String,
        blob_name: String,
    },
}

impl ResultLocation {
    pub fn storage_kind(&self) -> StorageKind {
        match self {
            ResultLocation::KeyValue { .. } => StorageKind::KeyValue,
            ResultLocation::ObjectStore { .. } => StorageKind::ObjectStore,
            ResultLocation::DocumentDb { .. } => StorageKind::DocumentDb,
            ResultLocation::Filesystem { .. } => StorageKind::Filesystem,
            ResultLocation::BlobStore { .. } => StorageKind::BlobStore,
        }
    }
}

//! Wire envelopes: broadcast events and per-kind worker commands.
//!
//! Field names are part of the wire contract. Durations travel as integer
//! milliseconds.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{ResultLocation, ServiceKind, TargetKind};

/// Broadcast fact: a job was accepted and needs fan-out.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSubmitted {
    pub job_id: Uuid,
    pub target: String,
    pub target_kind: TargetKind,
    pub services: Vec<ServiceKind>,
}

/// Broadcast fact: one worker finished its subtask.
///
/// `result_location` is present whenever the worker managed to persist a
/// record, independent of lookup success; its absence means the store write
/// itself failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskCompleted {
    pub job_id: Uuid,
    pub kind: ServiceKind,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Wall-clock lookup duration in milliseconds.
    #[serde(rename = "duration")]
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_location: Option<ResultLocation>,
}

/// Events that flow through the broadcast stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    JobSubmitted(JobSubmitted),
    TaskCompleted(TaskCompleted),
}

/// Target context shared by every command variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandBody {
    pub job_id: Uuid,
    pub target: String,
    pub target_kind: TargetKind,
}

/// Commands directed at exactly one worker kind. Routing is by kind; the
/// payload carries nothing beyond target context.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LookupCommand {
    #[serde(rename = "CheckGeoIP")]
    CheckGeoIp(CommandBody),
    CheckPing(CommandBody),
    #[serde(rename = "CheckRDAP")]
    CheckRdap(CommandBody),
    #[serde(rename = "CheckReverseDNS")]
    CheckReverseDns(CommandBody),
}

impl LookupCommand {
    /// Build the command variant matching `kind`.
    pub fn for_kind(kind: ServiceKind, body: CommandBody) -> Self {
        match kind {
            ServiceKind::GeoIp => LookupCommand::CheckGeoIp(body),
            ServiceKind::Ping => LookupCommand::CheckPing(body),
            ServiceKind::Rdap => LookupCommand::CheckRdap(body),
            ServiceKind::ReverseDns => LookupCommand::CheckReverseDns(body),
        }
    }

    pub fn kind(&self) -> ServiceKind {
        match self {
            LookupCommand::CheckGeoIp(_) => ServiceKind::GeoIp,
            LookupCommand::CheckPing(_) => ServiceKind::Ping,
            LookupCommand::CheckRdap(_) => ServiceKind::Rdap,
            LookupCommand::CheckReverseDns(_) => ServiceKind::ReverseDns,
        }
    }

    pub fn body(&self) -> &CommandBody {
        match self {
            LookupCommand::CheckGeoIp(body)
            | LookupCommand::CheckPing(body)
            | LookupCommand::CheckRdap(body)
            | LookupCommand::CheckReverseDns(body) => body,
        }
    }

    pub fn job_id(&self) -> Uuid {
        self.body().job_id
    }
}

//! The persisted result record, opaque to the saga.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use scout_core::ServiceKind;

/// One lookup outcome, stored keyed by `(jobId, kind)`. Written by exactly
/// one worker attempt; rewrites under the same key are idempotent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultRecord {
    pub job_id: Uuid,
    pub kind: ServiceKind,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Lookup duration in milliseconds.
    #[serde(rename = "duration")]
    pub duration_ms: u64,
    pub completed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ResultRecord {
    pub fn success(
        job_id: Uuid,
        kind: ServiceKind,
        data: serde_json::Value,
        duration_ms: u64,
    ) -> Self {
        Self {
            job_id,
            kind,
            success: true,
            error_message: None,
            duration_ms,
            completed_at: Utc::now(),
            data: Some(data),
        }
    }

    pub fn failure(
        job_id: Uuid,
        kind: ServiceKind,
        error_message: String,
        duration_ms: u64,
    ) -> Self {
        Self {
            job_id,
            kind,
            success: false,
            error_message: Some(error_message),
            duration_ms,
            completed_at: Utc::now(),
            data: None,
        }
    }

    /// Deterministic state-store key for this record.
    pub fn key(job_id: Uuid, kind: ServiceKind) -> String {
        format!("worker-result:{}:{}", job_id, kind.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_deterministic() {
        let id = Uuid::nil();
        assert_eq!(
            ResultRecord::key(id, ServiceKind::ReverseDns),
            "worker-result:00000000-0000-0000-0000-000000000000:ReverseDNS"
        );
    }

    #[test]
    fn wire_field_names() {
        let record = ResultRecord::failure(Uuid::nil(), ServiceKind::Rdap, "boom".to_string(), 12);
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains(r#""jobId""#), "json: {json}");
        assert!(json.contains(r#""errorMessage":"boom""#), "json: {json}");
        assert!(json.contains(r#""duration":12"#), "json: {json}");
        assert!(json.contains(r#""completedAt""#), "json: {json}");
        assert!(!json.contains(r#""data""#), "json: {json}");
    }
}

//! PTR resolution for IP targets.
//!
//! Absence of a PTR record is a successful lookup with `found = false`;
//! only resolver/network errors fail the subtask.

use std::net::IpAddr;
use std::sync::Arc;

use anyhow::{anyhow, bail};
use hickory_resolver::error::ResolveErrorKind;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use scout_core::{CommandBody, TargetKind};

use super::{LookupContext, LOOKUP_TIMEOUT};

pub fn validate(body: &CommandBody) -> Option<String> {
    if body.target_kind == TargetKind::Ip {
        None
    } else {
        Some("Reverse DNS lookup requires an IP address target.".to_string())
    }
}

pub async fn lookup(
    ctx: Arc<LookupContext>,
    body: CommandBody,
    cancel: CancellationToken,
) -> anyhow::Result<Value> {
    let ip: IpAddr = body
        .target
        .parse()
        .map_err(|e| anyhow!("'{}' is not a valid IP address: {}", body.target, e))?;

    let result = tokio::select! {
        _ = cancel.cancelled() => bail!("lookup cancelled"),
        res = tokio::time::timeout(LOOKUP_TIMEOUT, ctx.resolver.reverse_lookup(ip)) => {
            res.map_err(|_| anyhow!("reverse DNS lookup timed out for {}", ip))?
        }
    };

    match result {
        Ok(ptr) => {
            let names: Vec<String> = ptr
                .iter()
                .map(|name| name.to_string().trim_end_matches('.').to_string())
                .collect();
            Ok(json!({
                "address": ip.to_string(),
                "found": !names.is_empty(),
                "names": names,
            }))
        }
        Err(e) if matches!(e.kind(), ResolveErrorKind::NoRecordsFound { .. }) => Ok(json!({
            "address": ip.to_string(),
            "found": false,
            "names": [],
        })),
        Err(e) => Err(anyhow!("reverse DNS lookup failed for {}: {}", ip, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn body(target: &str, kind: TargetKind) -> CommandBody {
        CommandBody {
            job_id: Uuid::nil(),
            target: target.to_string(),
            target_kind: kind,
        }
    }

    #[test]
    fn ip_targets_pass_validation() {
        assert!(validate(&body("8.8.8.8", TargetKind::Ip)).is_none());
        assert!(validate(&body("2001:db8::1", TargetKind::Ip)).is_none());
    }

    #[test]
    fn dns_targets_are_rejected_with_the_contract_message() {
        assert_eq!(
            validate(&body("example.com", TargetKind::Dns)).as_deref(),
            Some("Reverse DNS lookup requires an IP address target.")
        );
    }
}

//! RDAP registration data via the rdap.org bootstrap service.
//!
//! The bootstrap redirects to the authoritative registry (RIR for addresses,
//! TLD registry for domains); the HTTP client follows the redirect.

use std::sync::Arc;

use anyhow::{anyhow, bail};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use scout_core::{CommandBody, TargetKind};

use super::LookupContext;

const RDAP_BOOTSTRAP: &str = "https://rdap.org";

pub fn validate(_body: &CommandBody) -> Option<String> {
    None
}

pub async fn lookup(
    ctx: Arc<LookupContext>,
    body: CommandBody,
    cancel: CancellationToken,
) -> anyhow::Result<Value> {
    let url = match body.target_kind {
        TargetKind::Ip => format!("{}/ip/{}", RDAP_BOOTSTRAP, body.target),
        TargetKind::Dns => format!("{}/domain/{}", RDAP_BOOTSTRAP, body.target),
    };

    let response = tokio::select! {
        _ = cancel.cancelled() => bail!("lookup cancelled"),
        res = ctx.http.get(&url).send() => {
            res.map_err(|e| anyhow!("RDAP request failed: {}", e))?
        }
    };

    if response.status() == reqwest::StatusCode::NOT_FOUND {
        bail!("no RDAP registration found for '{}'", body.target);
    }
    let response = response
        .error_for_status()
        .map_err(|e| anyhow!("RDAP registry error: {}", e))?;
    let document: Value = response
        .json()
        .await
        .map_err(|e| anyhow!("RDAP response was not valid JSON: {}", e))?;

    Ok(summarize(&body.target, &document))
}

/// Flatten the RDAP document to the fields clients actually render.
fn summarize(target: &str, doc: &Value) -> Value {
    let events: Vec<Value> = doc
        .get("events")
        .and_then(Value::as_array)
        .map(|events| {
            events
                .iter()
                .filter_map(|e| {
                    let action = e.get("eventAction")?.as_str()?;
                    let date = e.get("eventDate")?.as_str()?;
                    Some(json!({"action": action, "date": date}))
                })
                .collect()
        })
        .unwrap_or_default();

    json!({
        "target": target,
        "handle": doc.get("handle").cloned().unwrap_or(Value::Null),
        "name": doc
            .get("name")
            .or_else(|| doc.get("ldhName"))
            .cloned()
            .unwrap_or(Value::Null),
        "objectClassName": doc.get("objectClassName").cloned().unwrap_or(Value::Null),
        "status": doc.get("status").cloned().unwrap_or_else(|| json!([])),
        "country": doc.get("country").cloned().unwrap_or(Value::Null),
        "startAddress": doc.get("startAddress").cloned().unwrap_or(Value::Null),
        "endAddress": doc.get("endAddress").cloned().unwrap_or(Value::Null),
        "events": events,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summarize_ip_network_document() {
        let doc = json!({
            "objectClassName": "ip network",
            "handle": "NET-8-8-8-0-1",
            "name": "LVLT-GOGL-8-8-8",
            "startAddress": "8.8.8.0",
            "endAddress": "8.8.8.255",
            "status": ["active"],
            "country": "US",
            "events": [
                {"eventAction": "registration", "eventDate": "2014-03-14T00:00:00Z"},
                {"eventAction": "last changed", "eventDate": "2014-03-14T00:00:00Z"},
                {"malformed": true}
            ]
        });
        let data = summarize("8.8.8.8", &doc);
        assert_eq!(data["handle"], "NET-8-8-8-0-1");
        assert_eq!(data["startAddress"], "8.8.8.0");
        assert_eq!(data["status"], json!(["active"]));
        assert_eq!(data["events"].as_array().unwrap().len(), 2);
        assert_eq!(data["events"][0]["action"], "registration");
    }

    #[test]
    fn summarize_domain_document_uses_ldh_name() {
        let doc = json!({
            "objectClassName": "domain",
            "ldhName": "EXAMPLE.COM",
            "status": ["client delete prohibited"]
        });
        let data = summarize("example.com", &doc);
        assert_eq!(data["name"], "EXAMPLE.COM");
        assert_eq!(data["handle"], Value::Null);
        assert_eq!(data["events"], json!([]));
    }
}

//! ICMP reachability probing.
//!
//! Packet loss is data, not failure: the lookup only fails when the probe API
//! itself cannot be used (no raw socket, bad target).

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail};
use serde_json::{json, Value};
use surge_ping::{Client, Config, PingIdentifier, PingSequence, ICMP};
use tokio_util::sync::CancellationToken;

use scout_core::CommandBody;

use super::{resolve_ip, LookupContext, LOOKUP_TIMEOUT};

pub const PROBE_COUNT: u32 = 4;
pub const PROBE_SPACING: Duration = Duration::from_millis(500);

pub fn validate(_body: &CommandBody) -> Option<String> {
    None
}

pub async fn lookup(
    ctx: Arc<LookupContext>,
    body: CommandBody,
    cancel: CancellationToken,
) -> anyhow::Result<Value> {
    let ip = resolve_ip(&ctx, &body, &cancel).await?;

    let config = match ip {
        IpAddr::V4(_) => Config::default(),
        IpAddr::V6(_) => Config::builder().kind(ICMP::V6).build(),
    };
    let client = Client::new(&config).map_err(|e| anyhow!("ping socket unavailable: {}", e))?;
    let mut pinger = client.pinger(ip, PingIdentifier(rand::random())).await;
    pinger.timeout(LOOKUP_TIMEOUT);

    let payload = [0u8; 56];
    let mut rtts = Vec::new();
    for seq in 0..PROBE_COUNT {
        if seq > 0 {
            tokio::select! {
                _ = cancel.cancelled() => bail!("lookup cancelled"),
                _ = tokio::time::sleep(PROBE_SPACING) => {}
            }
        }
        let reply = tokio::select! {
            _ = cancel.cancelled() => bail!("lookup cancelled"),
            reply = pinger.ping(PingSequence(seq as u16), &payload) => reply,
        };
        match reply {
            Ok((_packet, rtt)) => rtts.push(rtt),
            Err(surge_ping::SurgeError::Timeout { .. }) => {}
            Err(e) => bail!("ping probe failed: {}", e),
        }
    }

    Ok(summarize(ip, PROBE_COUNT, &rtts))
}

fn summarize(ip: IpAddr, sent: u32, rtts: &[Duration]) -> Value {
    let received = rtts.len() as u32;
    let loss_percent = 100.0 * f64::from(sent - received) / f64::from(sent);
    let mut data = json!({
        "address": ip.to_string(),
        "packetsSent": sent,
        "packetsReceived": received,
        "packetLossPercent": loss_percent,
    });
    if !rtts.is_empty() {
        let ms: Vec<f64> = rtts.iter().map(|d| d.as_secs_f64() * 1000.0).collect();
        let sum: f64 = ms.iter().sum();
        data["minRttMs"] = json!(ms.iter().cloned().fold(f64::INFINITY, f64::min));
        data["maxRttMs"] = json!(ms.iter().cloned().fold(f64::NEG_INFINITY, f64::max));
        data["avgRttMs"] = json!(sum / ms.len() as f64);
    }
    data
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summarize_all_replies() {
        let rtts = [
            Duration::from_millis(10),
            Duration::from_millis(20),
            Duration::from_millis(30),
            Duration::from_millis(40),
        ];
        let data = summarize("8.8.8.8".parse().unwrap(), 4, &rtts);
        assert_eq!(data["packetsSent"], 4);
        assert_eq!(data["packetsReceived"], 4);
        assert_eq!(data["packetLossPercent"], 0.0);
        assert_eq!(data["minRttMs"], 10.0);
        assert_eq!(data["maxRttMs"], 40.0);
        assert_eq!(data["avgRttMs"], 25.0);
    }

    #[test]
    fn summarize_partial_loss() {
        let rtts = [Duration::from_millis(12)];
        let data = summarize("1.1.1.1".parse().unwrap(), 4, &rtts);
        assert_eq!(data["packetsReceived"], 1);
        assert_eq!(data["packetLossPercent"], 75.0);
        assert_eq!(data["avgRttMs"], 12.0);
    }

    #[test]
    fn summarize_total_loss_has_no_rtt_fields() {
        let data = summarize("192.0.2.1".parse().unwrap(), 4, &[]);
        assert_eq!(data["packetsReceived"], 0);
        assert_eq!(data["packetLossPercent"], 100.0);
        assert!(data.get("avgRttMs").is_none());
        assert!(data.get("minRttMs").is_none());
    }

    #[test]
    fn validate_accepts_any_target() {
        use scout_core::TargetKind;
        let body = CommandBody {
            job_id: uuid::Uuid::nil(),
            target: "example.com".to_string(),
            target_kind: TargetKind::Dns,
        };
        assert!(validate(&body).is_none());
    }
}

//! GeoIP enrichment from a local MaxMind City database.

use std::net::IpAddr;
use std::sync::Arc;

use anyhow::{anyhow, bail};
use maxminddb::{geoip2, MaxMindDBError};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use scout_core::CommandBody;

use super::{resolve_ip, LookupContext};

pub fn validate(_body: &CommandBody) -> Option<String> {
    None
}

pub async fn lookup(
    ctx: Arc<LookupContext>,
    body: CommandBody,
    cancel: CancellationToken,
) -> anyhow::Result<Value> {
    let ip = resolve_ip(&ctx, &body, &cancel).await?;
    let Some(reader) = ctx.geoip.as_ref() else {
        bail!("GeoIP database not configured (set GEOIP_DB_PATH)");
    };

    match reader.lookup::<geoip2::City>(ip) {
        Ok(city) => Ok(summarize(ip, &city)),
        // Private and unallocated ranges have no record; that is data.
        Err(MaxMindDBError::AddressNotFoundError(_)) => Ok(json!({
            "address": ip.to_string(),
            "found": false,
        })),
        Err(e) => Err(anyhow!("GeoIP lookup failed for {}: {}", ip, e)),
    }
}

fn summarize(ip: IpAddr, city: &geoip2::City<'_>) -> Value {
    json!({
        "address": ip.to_string(),
        "found": true,
        "countryCode": city.country.as_ref().and_then(|c| c.iso_code),
        "country": city
            .country
            .as_ref()
            .and_then(|c| c.names.as_ref())
            .and_then(|n| n.get("en").copied()),
        "city": city
            .city
            .as_ref()
            .and_then(|c| c.names.as_ref())
            .and_then(|n| n.get("en").copied()),
        "latitude": city.location.as_ref().and_then(|l| l.latitude),
        "longitude": city.location.as_ref().and_then(|l| l.longitude),
        "timeZone": city.location.as_ref().and_then(|l| l.time_zone),
    })
}

//! The four lookup implementations and the context they share.

pub mod geoip;
pub mod ping;
pub mod rdap;
pub mod reverse_dns;

use std::future::Future;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;
use tokio_util::sync::CancellationToken;

use scout_core::{CommandBody, ServiceKind, TargetKind};

use crate::envelope::{LookupFn, ValidateFn, WorkerEnvelope};

/// Soft timeout applied inside each lookup.
pub const LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Clients shared by every lookup kind in the process.
pub struct LookupContext {
    pub resolver: TokioAsyncResolver,
    pub http: reqwest::Client,
    pub geoip: Option<maxminddb::Reader<Vec<u8>>>,
}

impl LookupContext {
    pub fn new(geoip_db_path: Option<&str>) -> anyhow::Result<Self> {
        let resolver =
            TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default());
        let http = reqwest::Client::builder()
            .timeout(LOOKUP_TIMEOUT)
            .user_agent("scout-worker")
            .build()?;
        let geoip = match geoip_db_path {
            Some(path) => Some(
                maxminddb::Reader::open_readfile(path)
                    .with_context(|| format!("opening GeoIP database at {}", path))?,
            ),
            None => None,
        };
        Ok(Self {
            resolver,
            http,
            geoip,
        })
    }
}

/// Build the envelope for `kind` over a shared context.
pub fn build(kind: ServiceKind, ctx: Arc<LookupContext>) -> WorkerEnvelope {
    match kind {
        ServiceKind::GeoIp => make(kind, geoip::validate, ctx, geoip::lookup),
        ServiceKind::Ping => make(kind, ping::validate, ctx, ping::lookup),
        ServiceKind::Rdap => make(kind, rdap::validate, ctx, rdap::lookup),
        ServiceKind::ReverseDns => make(kind, reverse_dns::validate, ctx, reverse_dns::lookup),
    }
}

fn make<F, Fut>(
    kind: ServiceKind,
    validate: ValidateFn,
    ctx: Arc<LookupContext>,
    lookup: F,
) -> WorkerEnvelope
where
    F: Fn(Arc<LookupContext>, CommandBody, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<serde_json::Value>> + Send + 'static,
{
    let perform: LookupFn = Arc::new(move |body, cancel| Box::pin(lookup(ctx.clone(), body, cancel)));
    WorkerEnvelope::new(kind, validate, perform)
}

/// Resolve the command target to one address, honouring cancellation during
/// DNS resolution.
pub(crate) async fn resolve_ip(
    ctx: &LookupContext,
    body: &CommandBody,
    cancel: &CancellationToken,
) -> anyhow::Result<IpAddr> {
    match body.target_kind {
        TargetKind::Ip => body
            .target
            .parse()
            .map_err(|e| anyhow!("'{}' is not a valid IP address: {}", body.target, e)),
        TargetKind::Dns => {
            let lookup = tokio::select! {
                _ = cancel.cancelled() => anyhow::bail!("lookup cancelled"),
                res = tokio::time::timeout(LOOKUP_TIMEOUT, ctx.resolver.lookup_ip(body.target.as_str())) => {
                    res.map_err(|_| anyhow!("DNS resolution timed out for '{}'", body.target))??
                }
            };
            lookup
                .iter()
                .next()
                .ok_or_else(|| anyhow!("'{}' did not resolve to any address", body.target))
        }
    }
}

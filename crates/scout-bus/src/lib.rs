//! NATS JetStream bus client: stream topology, publishers, durable consumers.
//!
//! Three streams: a broadcast event stream the saga consumes, a WorkQueue
//! command stream with one subject per lookup kind, and a dead-letter stream
//! for poison events. Per-kind routing is by subject; multiple workers of the
//! same kind share one durable consumer.

use anyhow::Result;
use async_nats::jetstream::{self, consumer::PullConsumer, stream::Stream as JsStream};

use scout_core::{Event, LookupCommand, ServiceKind};

pub const EVENTS_STREAM: &str = "SCOUT_EVENTS";
pub const CMDS_STREAM: &str = "SCOUT_CMDS";
pub const DLQ_STREAM: &str = "SCOUT_DLQ";

pub const JOB_SUBMITTED_SUBJECT: &str = "scout.events.job-submitted";
pub const TASK_COMPLETED_SUBJECT: &str = "scout.events.task-completed";
pub const DLQ_SUBJECT: &str = "scout.dlq";

pub const SAGA_CONSUMER: &str = "scout-saga";

/// Event retention. Matches the state-store TTL so an event is never older
/// than the state it refers to.
const EVENT_MAX_AGE: std::time::Duration = std::time::Duration::from_secs(24 * 60 * 60);

/// Subject a command for `kind` is routed on.
pub fn command_subject(kind: ServiceKind) -> String {
    format!("scout.cmds.{}", kind.subject_suffix())
}

/// Durable consumer name for workers of `kind`.
pub fn worker_consumer_name(kind: ServiceKind) -> String {
    format!("scout-worker-{}", kind.subject_suffix())
}

/// JetStream client shared by the server, the coordinator, and the workers.
pub struct BusClient {
    client: async_nats::Client,
    jetstream: jetstream::Context,
    events_stream: tokio::sync::Mutex<JsStream>,
    cmds_stream: tokio::sync::Mutex<JsStream>,
}

impl BusClient {
    /// Connect to NATS and ensure the stream topology exists.
    pub async fn connect(nats_url: &str) -> Result<Self> {
        let client = async_nats::connect(nats_url).await?;
        let jetstream = jetstream::new(client.clone());

        let events_stream = jetstream
            .get_or_create_stream(jetstream::stream::Config {
                name: EVENTS_STREAM.to_string(),
                subjects: vec!["scout.events.*".to_string()],
                max_age: EVENT_MAX_AGE,
                ..Default::default()
            })
            .await?;

        let cmds_stream = jetstream
            .get_or_create_stream(jetstream::stream::Config {
                name: CMDS_STREAM.to_string(),
                subjects: vec!["scout.cmds.*".to_string()],
                retention: jetstream::stream::RetentionPolicy::WorkQueue,
                ..Default::default()
            })
            .await?;

        jetstream
            .get_or_create_stream(jetstream::stream::Config {
                name: DLQ_STREAM.to_string(),
                subjects: vec![DLQ_SUBJECT.to_string()],
                max_age: EVENT_MAX_AGE,
                ..Default::default()
            })
            .await?;

        Ok(Self {
            client,
            jetstream,
            events_stream: tokio::sync::Mutex::new(events_stream),
            cmds_stream: tokio::sync::Mutex::new(cmds_stream),
        })
    }

    /// Publish a broadcast event to its per-type subject.
    pub async fn publish_event(&self, event: &Event) -> Result<()> {
        let subject = match event {
            Event::JobSubmitted(_) => JOB_SUBMITTED_SUBJECT,
            Event::TaskCompleted(_) => TASK_COMPLETED_SUBJECT,
        };
        let payload = serde_json::to_vec(event)?;
        self.jetstream.publish(subject, payload.into()).await?.await?;
        Ok(())
    }

    /// Publish a worker command, routed by kind.
    pub async fn publish_command(&self, command: &LookupCommand) -> Result<()> {
        let payload = serde_json::to_vec(command)?;
        self.jetstream
            .publish(command_subject(command.kind()), payload.into())
            .await?
            .await?;
        Ok(())
    }

    /// Park an undeliverable event payload on the dead-letter stream.
    pub async fn publish_dlq(&self, payload: Vec<u8>) -> Result<()> {
        self.jetstream
            .publish(DLQ_SUBJECT, payload.into())
            .await?
            .await?;
        Ok(())
    }

    /// The saga's durable consumer over the whole event stream.
    pub async fn saga_consumer(&self) -> Result<PullConsumer> {
        let stream = self.events_stream.lock().await;
        let consumer = stream
            .get_or_create_consumer(
                SAGA_CONSUMER,
                jetstream::consumer::pull::Config {
                    durable_name: Some(SAGA_CONSUMER.to_string()),
                    ack_policy: jetstream::consumer::AckPolicy::Explicit,
                    ..Default::default()
                },
            )
            .await?;
        Ok(consumer)
    }

    /// Durable consumer for workers of `kind`.
    ///
    /// Uses a shared consumer name so multiple workers of the same kind pull
    /// from the same consumer on the WorkQueue stream.
    pub async fn command_consumer(&self, kind: ServiceKind) -> Result<PullConsumer> {
        let name = worker_consumer_name(kind);
        let stream = self.cmds_stream.lock().await;
        let consumer = stream
            .get_or_create_consumer(
                &name,
                jetstream::consumer::pull::Config {
                    durable_name: Some(name.clone()),
                    filter_subject: command_subject(kind),
                    ack_policy: jetstream::consumer::AckPolicy::Explicit,
                    ..Default::default()
                },
            )
            .await?;
        Ok(consumer)
    }

    /// Pending message count on the command stream, an autoscaling signal.
    pub async fn command_queue_depth(&self) -> Result<u64> {
        let mut stream = self.cmds_stream.lock().await;
        let info = stream.info().await?;
        Ok(info.state.messages)
    }

    /// Whether the underlying connection is currently up. Drives readiness.
    pub fn is_connected(&self) -> bool {
        self.client.connection_state() == async_nats::connection::State::Connected
    }

    /// The JetStream context, for opening KV buckets on the same connection.
    pub fn jetstream(&self) -> &jetstream::Context {
        &self.jetstream
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constants_are_correct() {
        assert_eq!(EVENTS_STREAM, "SCOUT_EVENTS");
        assert_eq!(CMDS_STREAM, "SCOUT_CMDS");
        assert_eq!(JOB_SUBMITTED_SUBJECT, "scout.events.job-submitted");
        assert_eq!(TASK_COMPLETED_SUBJECT, "scout.events.task-completed");
    }

    #[test]
    fn command_subjects_route_by_kind() {
        assert_eq!(command_subject(ServiceKind::GeoIp), "scout.cmds.geoip");
        assert_eq!(
            command_subject(ServiceKind::ReverseDns),
            "scout.cmds.reverse-dns"
        );
        assert_eq!(
            worker_consumer_name(ServiceKind::Rdap),
            "scout-worker-rdap"
        );
    }
}

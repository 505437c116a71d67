//! Prometheus metrics for worker observability and autoscaling signals.

use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;
use std::sync::Arc;

#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct KindLabel(pub String);

impl prometheus_client::encoding::EncodeLabelSet for KindLabel {
    fn encode(
        &self,
        mut encoder: prometheus_client::encoding::LabelSetEncoder,
    ) -> Result<(), std::fmt::Error> {
        use prometheus_client::encoding::EncodeLabel;
        ("kind", self.0.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct WorkerMetrics {
    pub command_queue_depth: Gauge,
    pub active_lookups: Gauge,
    pub lookups_completed: Family<KindLabel, Counter>,
    pub lookup_failures: Family<KindLabel, Counter>,
    pub store_write_failures: Counter,
    pub registry: Arc<Registry>,
}

impl WorkerMetrics {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let command_queue_depth = Gauge::default();
        registry.register(
            "scout_command_queue_depth",
            "Number of pending lookup commands",
            command_queue_depth.clone(),
        );

        let active_lookups = Gauge::default();
        registry.register(
            "scout_worker_active_lookups",
            "Number of lookups currently in flight",
            active_lookups.clone(),
        );

        let lookups_completed = Family::<KindLabel, Counter>::default();
        registry.register(
            "scout_worker_lookups_completed_total",
            "Total lookups completed by kind",
            lookups_completed.clone(),
        );

        let lookup_failures = Family::<KindLabel, Counter>::default();
        registry.register(
            "scout_worker_lookup_failures_total",
            "Total failed lookups by kind",
            lookup_failures.clone(),
        );

        let store_write_failures = Counter::default();
        registry.register(
            "scout_worker_store_write_failures_total",
            "Completions published without a result location",
            store_write_failures.clone(),
        );

        Self {
            command_queue_depth,
            active_lookups,
            lookups_completed,
            lookup_failures,
            store_write_failures,
            registry: Arc::new(registry),
        }
    }

    /// Encode all metrics as Prometheus text format.
    pub fn encode(&self) -> String {
        let mut buf = String::new();
        encode(&mut buf, &self.registry).unwrap();
        buf
    }
}

impl Default for WorkerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_creates_all_metrics() {
        let metrics = WorkerMetrics::new();
        let output = metrics.encode();

        assert!(output.contains("scout_command_queue_depth"));
        assert!(output.contains("scout_worker_active_lookups"));
        assert!(output.contains("scout_worker_lookups_completed_total"));
        assert!(output.contains("scout_worker_lookup_failures_total"));
        assert!(output.contains("scout_worker_store_write_failures_total"));
    }

    #[test]
    fn gauge_set_reflected_in_encode() {
        let metrics = WorkerMetrics::new();
        metrics.command_queue_depth.set(3);

        let output = metrics.encode();
        assert!(
            output.contains("scout_command_queue_depth 3"),
            "Expected gauge value 3 in output: {output}"
        );
    }

    #[test]
    fn family_counter_with_kind_labels() {
        let metrics = WorkerMetrics::new();
        metrics
            .lookups_completed
            .get_or_create(&KindLabel("geoip".to_string()))
            .inc();
        metrics
            .lookups_completed
            .get_or_create(&KindLabel("ping".to_string()))
            .inc();
        metrics
            .lookups_completed
            .get_or_create(&KindLabel("ping".to_string()))
            .inc();

        let output = metrics.encode();
        assert!(
            output.contains("kind=\"geoip\""),
            "Expected geoip label in output: {output}"
        );
        assert!(
            output.contains("kind=\"ping\""),
            "Expected ping label in output: {output}"
        );
    }
}

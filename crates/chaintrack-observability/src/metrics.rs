//! ChainTrack metrics definitions.
//!
//! All metrics use OpenTelemetry conventions.
//! They can be exported via OTLP to Prometheus, Grafana, Datadog, etc.

use opentelemetry::{
    metrics::{Counter, Histogram, Meter, UpDownCounter},
    KeyValue,
};

/// Central metrics handle for ChainTrack.
#[derive(Clone)]
pub struct TrackerMetrics {
    pub commands_processed: Counter<u64>,
    pub command_errors: Counter<u64>,
    pub events_relayed: Counter<u64>,
    pub publish_errors: Counter<u64>,
    pub upstream_resubscribes: Counter<u64>,
    pub relay_latency_ms: Histogram<f64>,
    pub active_wallets: UpDownCounter<i64>,
}

impl TrackerMetrics {
    pub fn new(meter: &Meter) -> Self {
        Self {
            commands_processed: meter
                .u64_counter("chaintrack.commands_processed")
                .with_description("Commands applied to the subscription registry")
                .build(),
            command_errors: meter
                .u64_counter("chaintrack.command_errors")
                .with_description("Commands that failed to decode or apply")
                .build(),
            events_relayed: meter
                .u64_counter("chaintrack.events_relayed")
                .with_description("Account events forwarded to the message bus")
                .build(),
            publish_errors: meter
                .u64_counter("chaintrack.publish_errors")
                .with_description("Events dropped because publishing failed")
                .build(),
            upstream_resubscribes: meter
                .u64_counter("chaintrack.upstream_resubscribes")
                .with_description("Upstream re-subscribe attempts after a stream loss")
                .build(),
            relay_latency_ms: meter
                .f64_histogram("chaintrack.relay_latency_ms")
                .with_description("Time from event receipt to publish in milliseconds")
                .build(),
            active_wallets: meter
                .i64_up_down_counter("chaintrack.active_wallets")
                .with_description("Addresses with at least one subscriber")
                .build(),
        }
    }

    pub fn record_command(&self, action: &str) {
        self.commands_processed
            .add(1, &[KeyValue::new("action", action.to_string())]);
    }

    pub fn record_command_error(&self, action: &str, reason: &str) {
        self.command_errors.add(
            1,
            &[
                KeyValue::new("action", action.to_string()),
                KeyValue::new("reason", reason.to_string()),
            ],
        );
    }

    pub fn record_relayed(&self, address: &str, latency_ms: f64) {
        self.events_relayed
            .add(1, &[KeyValue::new("address", address.to_string())]);
        self.relay_latency_ms
            .record(latency_ms, &[KeyValue::new("address", address.to_string())]);
    }

    pub fn record_publish_error(&self, address: &str) {
        self.publish_errors
            .add(1, &[KeyValue::new("address", address.to_string())]);
    }

    pub fn record_resubscribe(&self, address: &str) {
        self.upstream_resubscribes
            .add(1, &[KeyValue::new("address", address.to_string())]);
    }

    pub fn wallet_started(&self) {
        self.active_wallets.add(1, &[]);
    }

    pub fn wallet_stopped(&self) {
        self.active_wallets.add(-1, &[]);
    }
}

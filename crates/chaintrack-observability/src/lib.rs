//! # chaintrack-observability
//!
//! OpenTelemetry-based observability for ChainTrack.
//!
//! ## Built-in metrics
//! - `chaintrack.commands_processed`    — counter, tagged with action
//! - `chaintrack.command_errors`        — counter, tagged with action + reason
//! - `chaintrack.events_relayed`        — counter, tagged with address
//! - `chaintrack.publish_errors`        — counter, tagged with address
//! - `chaintrack.upstream_resubscribes` — counter, tagged with address
//! - `chaintrack.relay_latency_ms`      — histogram
//! - `chaintrack.active_wallets`        — up/down counter
//!
//! ## Structured logging
//! JSON-structured logs compatible with ELK, Loki, CloudWatch.
//! Log levels configurable per component.

pub mod metrics;
pub mod tracing_setup;

pub use metrics::TrackerMetrics;
pub use tracing_setup::{init_tracing, LogConfig};

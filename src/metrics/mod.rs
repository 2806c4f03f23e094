//! Process-wide counters and their Prometheus export
//!
//! Connection tasks bump the atomics in [`METRICS`]; the optional exporter
//! copies them into the `metrics` registry once a second.

mod counters;
mod exporter;

pub use counters::{Metrics, MetricsSnapshot, METRICS};
pub use exporter::init_metrics;

//! Prometheus metrics exporter
//!
//! HTTP endpoint for Prometheus scraping.

use std::time::Duration;

use anyhow::Result;
use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

use super::counters::{MetricsSnapshot, METRICS};
use crate::config::MetricsConfig;

/// Initialize the Prometheus metrics exporter
pub fn init_metrics(config: &MetricsConfig) -> Result<()> {
    describe_counter!("socksveil_connections_total", "Total connections accepted");
    describe_gauge!("socksveil_connections_active", "Currently open connections");
    describe_counter!(
        "socksveil_connections_established",
        "Connections that completed negotiation"
    );
    describe_counter!("socksveil_connections_failed", "Connections closed with an error");
    describe_counter!("socksveil_auth_rejected", "Rejected handshakes and credentials");
    describe_counter!("socksveil_tunnels_opened", "Tunnels dialed to the relay server");
    describe_counter!("socksveil_relay_rejected", "Relay headers that failed to decode");
    describe_counter!("socksveil_bytes_received", "Bytes relayed from clients");
    describe_counter!("socksveil_bytes_sent", "Bytes relayed to clients");
    describe_counter!("socksveil_errors_total", "Total errors");
    describe_counter!("socksveil_timeouts_total", "Total timeouts");

    PrometheusBuilder::new()
        .with_http_listener(config.bind_addr)
        .install()?;

    // Sync atomic counters to the metrics crate
    tokio::spawn(sync_metrics_task());

    Ok(())
}

fn increment(name: &'static str, current: u64, previous: u64) {
    let delta = current.saturating_sub(previous);
    if delta > 0 {
        counter!(name).increment(delta);
    }
}

async fn sync_metrics_task() {
    let mut interval = tokio::time::interval(Duration::from_secs(1));
    let mut last = MetricsSnapshot::default();

    loop {
        interval.tick().await;
        let now = METRICS.snapshot();

        increment("socksveil_connections_total", now.connections_total, last.connections_total);
        gauge!("socksveil_connections_active").set(now.connections_active as f64);
        increment(
            "socksveil_connections_established",
            now.connections_established,
            last.connections_established,
        );
        increment("socksveil_connections_failed", now.connections_failed, last.connections_failed);
        increment("socksveil_auth_rejected", now.auth_rejected, last.auth_rejected);
        increment("socksveil_tunnels_opened", now.tunnels_opened, last.tunnels_opened);
        increment("socksveil_relay_rejected", now.relay_rejected, last.relay_rejected);
        increment("socksveil_bytes_received", now.bytes_received, last.bytes_received);
        increment("socksveil_bytes_sent", now.bytes_sent, last.bytes_sent);
        increment("socksveil_errors_total", now.errors_total, last.errors_total);
        increment("socksveil_timeouts_total", now.timeouts_total, last.timeouts_total);

        last = now;
    }
}

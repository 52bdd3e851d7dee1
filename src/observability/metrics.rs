//! Metrics collection and exposition.
//!
//! # Metrics
//! - `delay_proxy_forwards_total` (counter): forwards by method, status
//! - `delay_proxy_forward_duration_seconds` (histogram): upstream leg latency
//! - `delay_proxy_pending_forwards` (gauge): requests waiting on their delay
//! - `delay_proxy_abandoned_forwards_total` (counter): client left before dispatch
//! - `delay_proxy_undispatched_forwards_total` (counter): scheduler closed under a waiting forward
//! - `delay_proxy_active_connections` (gauge): open connections by service
//! - `delay_proxy_connections_total` (counter): accepted connections by service
//! - `delay_proxy_protocol_errors_total` (counter): requests rejected with 4xx
//! - `upstream_echo_requests_total` (counter): requests answered by the echo service
//!
//! Without an installed recorder every call is a no-op.

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder with an HTTP scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_forward(method: &str, status: u16, start: Instant) {
    counter!(
        "delay_proxy_forwards_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("delay_proxy_forward_duration_seconds").record(start.elapsed().as_secs_f64());
}

pub fn pending_forward_started() {
    gauge!("delay_proxy_pending_forwards").increment(1.0);
}

/// How a pending forward left the delay stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingOutcome {
    Dispatched,
    Abandoned,
    SchedulerClosed,
}

pub fn pending_forward_finished(outcome: PendingOutcome) {
    gauge!("delay_proxy_pending_forwards").decrement(1.0);
    match outcome {
        PendingOutcome::Dispatched => {}
        PendingOutcome::Abandoned => {
            counter!("delay_proxy_abandoned_forwards_total").increment(1);
        }
        PendingOutcome::SchedulerClosed => {
            counter!("delay_proxy_undispatched_forwards_total").increment(1);
        }
    }
}

pub fn connection_opened(service: &'static str) {
    counter!("delay_proxy_connections_total", "service" => service).increment(1);
    gauge!("delay_proxy_active_connections", "service" => service).increment(1.0);
}

pub fn connection_closed(service: &'static str) {
    gauge!("delay_proxy_active_connections", "service" => service).decrement(1.0);
}

pub fn record_protocol_error() {
    counter!("delay_proxy_protocol_errors_total").increment(1);
}

pub fn record_echo() {
    counter!("upstream_echo_requests_total").increment(1);
}

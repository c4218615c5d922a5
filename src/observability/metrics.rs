//! Metrics collection and exposition.
//!
//! # Metrics
//! - `paygate_requests_total` (counter): HTTP requests by method, route, status
//! - `paygate_request_duration_seconds` (histogram): HTTP latency
//! - `paygate_invoice_events_total` (counter): invoice lifecycle events
//! - `paygate_pending_invoices` (gauge): invoices awaiting settlement
//! - `paygate_admissions_total` (counter): gateway outcomes
//! - `paygate_job_transitions_total` (counter): job status changes
//! - `paygate_polls_total` (counter): tracker poll outcomes
//! - `paygate_cache_lookups_total` (counter): response cache hits/misses
//! - `paygate_rate_limited_total` (counter): rejected by rate limiter
//! - `paygate_blockchain_healthy` (gauge): 1=RPC reachable, 0=not
//!
//! Recording is a no-op until a recorder is installed, so library code and
//! tests can call these freely.

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::cache::ResourceKind;

/// Install the Prometheus recorder and its HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(method: &str, route: &str, status: u16, start: Instant) {
    counter!(
        "paygate_requests_total",
        "method" => method.to_string(),
        "route" => route.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("paygate_request_duration_seconds", "route" => route.to_string())
        .record(start.elapsed().as_secs_f64());
}

pub fn record_invoice_event(event: &'static str) {
    counter!("paygate_invoice_events_total", "event" => event).increment(1);
}

pub fn record_pending_invoices(count: usize) {
    gauge!("paygate_pending_invoices").set(count as f64);
}

pub fn record_admission(outcome: &'static str) {
    counter!("paygate_admissions_total", "outcome" => outcome).increment(1);
}

pub fn record_job_transition(status: &'static str) {
    counter!("paygate_job_transitions_total", "status" => status).increment(1);
}

pub fn record_poll(outcome: &'static str) {
    counter!("paygate_polls_total", "outcome" => outcome).increment(1);
}

pub fn record_cache_lookup(kind: ResourceKind, hit: bool) {
    counter!(
        "paygate_cache_lookups_total",
        "kind" => kind.to_string(),
        "result" => if hit { "hit" } else { "miss" }
    )
    .increment(1);
}

pub fn record_rate_limited() {
    counter!("paygate_rate_limited_total").increment(1);
}

pub fn record_blockchain_health(healthy: bool) {
    gauge!("paygate_blockchain_healthy").set(if healthy { 1.0 } else { 0.0 });
}

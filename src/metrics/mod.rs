//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Bridge lifecycle (started, settled, latency)
//! - Status polling and reconciliation ticks
//! - Swap outcomes
//! - Notification delivery failures

use crate::error::{OrchestratorError, OrchestratorResult};

use axum::{http::StatusCode, routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram_vec, CounterVec, Encoder,
    GaugeVec, HistogramVec, TextEncoder,
};
use std::net::SocketAddr;
use tracing::info;

lazy_static! {
    // Bridge metrics
    pub static ref BRIDGES_STARTED: CounterVec = register_counter_vec!(
        "orchestrator_bridges_started_total",
        "Total bridges committed with the provider",
        &[]
    ).unwrap();

    pub static ref BRIDGES_SETTLED: CounterVec = register_counter_vec!(
        "orchestrator_bridges_settled_total",
        "Total bridges moved out of pending, by outcome",
        &["outcome"]
    ).unwrap();

    pub static ref BRIDGE_LATENCY: HistogramVec = register_histogram_vec!(
        "orchestrator_bridge_latency_seconds",
        "Time from bridge creation to completion",
        &[],
        vec![30.0, 60.0, 120.0, 300.0, 600.0, 1200.0, 1800.0, 3600.0]
    ).unwrap();

    pub static ref STATUS_POLLS: CounterVec = register_counter_vec!(
        "orchestrator_bridge_status_polls_total",
        "Bridge status polls by mapped result",
        &["result"]
    ).unwrap();

    // Reconciliation metrics
    pub static ref PENDING_BRIDGES: GaugeVec = register_gauge_vec!(
        "orchestrator_pending_bridges",
        "Pending bridge rows seen by the last reconciliation tick",
        &[]
    ).unwrap();

    // Swap metrics
    pub static ref SWAPS_COMPLETED: CounterVec = register_counter_vec!(
        "orchestrator_swaps_completed_total",
        "Total swaps settled and recorded",
        &[]
    ).unwrap();

    pub static ref SWAPS_FAILED: CounterVec = register_counter_vec!(
        "orchestrator_swaps_failed_total",
        "Total swaps that failed, by stage",
        &["stage"]
    ).unwrap();

    // Notification metrics
    pub static ref NOTIFICATION_FAILURES: CounterVec = register_counter_vec!(
        "orchestrator_notification_failures_total",
        "Notifications that could not be delivered",
        &["kind"]
    ).unwrap();

    // Health metrics
    pub static ref HEALTH_CHECK_SUCCESS: CounterVec = register_counter_vec!(
        "orchestrator_health_check_success_total",
        "Total successful health checks",
        &[]
    ).unwrap();

    pub static ref HEALTH_CHECK_FAILURE: CounterVec = register_counter_vec!(
        "orchestrator_health_check_failure_total",
        "Total failed health checks",
        &[]
    ).unwrap();
}

/// Prometheus metrics server
pub struct MetricsServer {
    port: u16,
}

impl MetricsServer {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    pub async fn run(&self) -> OrchestratorResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| OrchestratorError::Config(format!("cannot bind metrics on {}: {}", addr, e)))?;
        axum::serve(listener, app)
            .await
            .map_err(|e| OrchestratorError::Internal(format!("metrics server failed: {}", e)))?;

        Ok(())
    }
}

async fn metrics_handler() -> Result<String, StatusCode> {
    render().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

/// Current registry in the text exposition format
pub fn render() -> OrchestratorResult<String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| OrchestratorError::Internal(format!("metrics encoding failed: {}", e)))?;
    String::from_utf8(buffer).map_err(|e| OrchestratorError::Internal(e.to_string()))
}

// Helper functions to record metrics

pub fn record_bridge_started() {
    BRIDGES_STARTED.with_label_values(&[]).inc();
}

pub fn record_bridge_settled(outcome: &str) {
    BRIDGES_SETTLED.with_label_values(&[outcome]).inc();
}

pub fn record_bridge_latency(latency_secs: f64) {
    BRIDGE_LATENCY.with_label_values(&[]).observe(latency_secs);
}

pub fn record_status_poll(result: &str) {
    STATUS_POLLS.with_label_values(&[result]).inc();
}

pub fn record_reconcile_tick(pending: usize) {
    PENDING_BRIDGES.with_label_values(&[]).set(pending as f64);
}

pub fn record_swap_completed() {
    SWAPS_COMPLETED.with_label_values(&[]).inc();
}

pub fn record_swap_failed(stage: &str) {
    SWAPS_FAILED.with_label_values(&[stage]).inc();
}

pub fn record_notification_failure(kind: &str) {
    NOTIFICATION_FAILURES.with_label_values(&[kind]).inc();
}

pub fn record_health_check() {
    HEALTH_CHECK_SUCCESS.with_label_values(&[]).inc();
}

pub fn record_health_check_failure() {
    HEALTH_CHECK_FAILURE.with_label_values(&[]).inc();
}

//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Deployment outcomes and pending polls
//! - Transaction submission and rejection
//! - Event correlation outcomes and latency
//! - Open event subscriptions
//! - Agreement transitions

use crate::error::{EngineError, EngineResult};

use axum::{http::StatusCode, routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_histogram_vec, register_int_gauge,
    CounterVec, Encoder, Gauge, HistogramVec, IntGauge, TextEncoder,
};
use std::net::SocketAddr;
use tracing::info;

lazy_static! {
    // Deployment metrics
    pub static ref DEPLOYMENTS: CounterVec = register_counter_vec!(
        "fxengine_deployments_total",
        "Deployments by artifact and outcome",
        &["artifact", "outcome"]
    ).unwrap();

    pub static ref DEPLOY_POLLS: CounterVec = register_counter_vec!(
        "fxengine_deployment_pending_polls_total",
        "Polls that found a deployment not yet mined",
        &["artifact"]
    ).unwrap();

    // Transaction metrics
    pub static ref TX_SUBMITTED: CounterVec = register_counter_vec!(
        "fxengine_transactions_submitted_total",
        "Transactions accepted for submission by the node",
        &["method"]
    ).unwrap();

    pub static ref TX_REJECTED: CounterVec = register_counter_vec!(
        "fxengine_transactions_rejected_total",
        "Transactions rejected at submission",
        &["method"]
    ).unwrap();

    // Correlation metrics
    pub static ref CORRELATIONS: CounterVec = register_counter_vec!(
        "fxengine_correlations_total",
        "Correlation outcomes by method",
        &["method", "outcome"]
    ).unwrap();

    pub static ref CORRELATION_LATENCY: HistogramVec = register_histogram_vec!(
        "fxengine_correlation_latency_seconds",
        "Time from submission to correlated event",
        &["method"],
        vec![0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]
    ).unwrap();

    pub static ref ACTIVE_SUBSCRIPTIONS: IntGauge = register_int_gauge!(
        "fxengine_active_subscriptions",
        "Event subscriptions currently open"
    ).unwrap();

    pub static ref EVENTS_RECEIVED: CounterVec = register_counter_vec!(
        "fxengine_events_received_total",
        "Decoded events delivered to subscriptions",
        &["event"]
    ).unwrap();

    pub static ref CHAIN_BLOCK_HEIGHT: Gauge = register_gauge!(
        "fxengine_chain_block_height",
        "Latest block seen by the log poller"
    ).unwrap();

    // Agreement metrics
    pub static ref AGREEMENT_TRANSITIONS: CounterVec = register_counter_vec!(
        "fxengine_agreement_transitions_total",
        "Agreement transitions observed on chain",
        &["transition"]
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

    pub async fn run(&self) -> EngineResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| EngineError::Internal(format!("cannot bind {}: {}", addr, e)))?;
        axum::serve(listener, app)
            .await
            .map_err(|e| EngineError::Internal(format!("metrics server: {}", e)))?;

        Ok(())
    }
}

async fn metrics_handler() -> Result<String, StatusCode> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    String::from_utf8(buffer).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

// Helper functions to record metrics

pub fn record_deployment(artifact: &str, outcome: &str) {
    DEPLOYMENTS.with_label_values(&[artifact, outcome]).inc();
}

pub fn record_deploy_pending(artifact: &str) {
    DEPLOY_POLLS.with_label_values(&[artifact]).inc();
}

pub fn record_tx_submitted(method: &str) {
    TX_SUBMITTED.with_label_values(&[method]).inc();
}

pub fn record_tx_rejected(method: &str) {
    TX_REJECTED.with_label_values(&[method]).inc();
}

pub fn record_correlation(method: &str, outcome: &str) {
    CORRELATIONS.with_label_values(&[method, outcome]).inc();
}

pub fn record_correlation_latency(method: &str, latency_secs: f64) {
    CORRELATION_LATENCY
        .with_label_values(&[method])
        .observe(latency_secs);
}

pub fn record_subscription_opened() {
    ACTIVE_SUBSCRIPTIONS.inc();
}

pub fn record_subscription_closed() {
    ACTIVE_SUBSCRIPTIONS.dec();
}

pub fn record_event(name: &str) {
    EVENTS_RECEIVED.with_label_values(&[name]).inc();
}

pub fn record_block_height(block_number: u64) {
    CHAIN_BLOCK_HEIGHT.set(block_number as f64);
}

pub fn record_transition(transition: &str) {
    AGREEMENT_TRANSITIONS.with_label_values(&[transition]).inc();
}

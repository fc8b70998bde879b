//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Ledger and coin chain heights
//! - Unlock processing and withdrawal broadcasts
//! - Relay submissions and superblock state
//! - Scheduler tick health

use crate::error::{AgentError, AgentResult};
use crate::events::LedgerEvent;
use crate::superblock::SuperblockStatus;

use axum::{http::StatusCode, routing::get, Router};
use ethers::types::U256;
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, register_histogram_vec,
    CounterVec, Encoder, Gauge, GaugeVec, HistogramVec, TextEncoder,
};
use std::collections::HashMap;
use std::net::SocketAddr;
use tracing::info;

lazy_static! {
    // Chain metrics
    pub static ref LEDGER_HEIGHT: Gauge = register_gauge!(
        "superblock_agent_ledger_block_height",
        "Latest ledger chain block number seen"
    ).unwrap();

    pub static ref GAS_PRICE: Gauge = register_gauge!(
        "superblock_agent_gas_price_wei",
        "Gas price applied to ledger writes"
    ).unwrap();

    // Event metrics
    pub static ref EVENTS_RECEIVED: CounterVec = register_counter_vec!(
        "superblock_agent_events_received_total",
        "Total ledger events received by type",
        &["event_type"]
    ).unwrap();

    // Unlock metrics
    pub static ref CHECKPOINT: Gauge = register_gauge!(
        "superblock_agent_unlock_checkpoint",
        "Last ledger block fully processed by the unlock processor"
    ).unwrap();

    pub static ref UNLOCKS: CounterVec = register_counter_vec!(
        "superblock_agent_unlocks_total",
        "Unlock requests handled, by outcome",
        &["outcome"]
    ).unwrap();

    pub static ref BROADCASTS: CounterVec = register_counter_vec!(
        "superblock_agent_coin_broadcasts_total",
        "Withdrawal broadcasts to the coin network, by outcome",
        &["outcome"]
    ).unwrap();

    // Relay metrics
    pub static ref RELAY_SUBMISSIONS: CounterVec = register_counter_vec!(
        "superblock_agent_relay_submissions_total",
        "Ledger writes sent by the relay, by kind and outcome",
        &["kind", "outcome"]
    ).unwrap();

    pub static ref SUPERBLOCKS: GaugeVec = register_gauge_vec!(
        "superblock_agent_superblocks",
        "Superblocks in the local chain",
        &["state"]
    ).unwrap();

    // Scheduler metrics
    pub static ref TICKS: CounterVec = register_counter_vec!(
        "superblock_agent_ticks_total",
        "Periodic task runs, by task and outcome",
        &["task", "outcome"]
    ).unwrap();

    pub static ref TICK_LATENCY: HistogramVec = register_histogram_vec!(
        "superblock_agent_tick_latency_seconds",
        "Duration of one periodic task run",
        &["task"],
        vec![0.05, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 300.0]
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

    pub async fn run(&self) -> AgentResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| AgentError::Internal(format!("metrics bind {}: {}", addr, e)))?;
        axum::serve(listener, app)
            .await
            .map_err(|e| AgentError::Internal(format!("metrics server: {}", e)))?;

        Ok(())
    }
}

async fn metrics_handler() -> Result<String, StatusCode> {
    render().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

/// Text exposition of every registered metric
pub fn render() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

// Helper functions to record metrics

pub fn set_ledger_height(block_number: u64) {
    LEDGER_HEIGHT.set(block_number as f64);
}

pub fn set_gas_price(price: U256) {
    // Lossy above 2^53 wei
    GAS_PRICE.set(price.low_u128() as f64);
}

pub fn record_event(event: &LedgerEvent) {
    EVENTS_RECEIVED.with_label_values(&[event.name()]).inc();
}

pub fn set_checkpoint(block_number: u64) {
    CHECKPOINT.set(block_number as f64);
}

pub fn record_unlock(outcome: &str) {
    UNLOCKS.with_label_values(&[outcome]).inc();
}

pub fn record_broadcast(outcome: &str) {
    BROADCASTS.with_label_values(&[outcome]).inc();
}

pub fn record_relay_submission(kind: &str, outcome: &str) {
    RELAY_SUBMISSIONS.with_label_values(&[kind, outcome]).inc();
}

pub fn set_superblocks_built(count: usize) {
    SUPERBLOCKS.with_label_values(&["built"]).set(count as f64);
}

/// Export per-status superblock counts; statuses absent from `counts` read 0
pub fn set_superblock_states(counts: &HashMap<SuperblockStatus, usize>) {
    export_superblock_states(&SUPERBLOCKS, counts);
}

fn export_superblock_states(gauge: &GaugeVec, counts: &HashMap<SuperblockStatus, usize>) {
    for status in SuperblockStatus::ALL {
        let count = counts.get(&status).copied().unwrap_or(0);
        gauge.with_label_values(&[status.as_str()]).set(count as f64);
    }
}

pub fn record_tick(task: &str, outcome: &str, latency_secs: f64) {
    TICKS.with_label_values(&[task, outcome]).inc();
    TICK_LATENCY.with_label_values(&[task]).observe(latency_secs);
}

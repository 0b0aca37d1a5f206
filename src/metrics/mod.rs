//! Prometheus metrics for the transaction pipeline
//!
//! Counts:
//! - Failed builds
//! - Submitted transactions
//! - Confirmed transactions
//! - Confirmation timeouts

use lazy_static::lazy_static;
use prometheus::{register_counter_vec, CounterVec, Encoder, TextEncoder};
use tracing::warn;

lazy_static! {
    pub static ref TX_BUILD_FAILED: CounterVec = register_counter_vec!(
        "ether_tx_builds_failed_total",
        "Total transaction builds that failed before signing",
        &["kind"]
    ).unwrap();

    pub static ref TX_SUBMITTED: CounterVec = register_counter_vec!(
        "ether_tx_transactions_submitted_total",
        "Total transactions submitted",
        &["chain_id"]
    ).unwrap();

    pub static ref TX_CONFIRMED: CounterVec = register_counter_vec!(
        "ether_tx_transactions_confirmed_total",
        "Total transactions included or confirmed at the requested depth",
        &["chain_id"]
    ).unwrap();

    pub static ref TX_CONFIRMATION_TIMEOUT: CounterVec = register_counter_vec!(
        "ether_tx_confirmation_timeouts_total",
        "Total transactions whose receipt or depth wait timed out",
        &["chain_id"]
    ).unwrap();
}

/// Record a build that failed before anything was sent.
///
/// Labelled by failure kind only: validation failures happen before the
/// chain id is known.
pub fn record_build_failed(validation: bool) {
    let kind = if validation { "validation" } else { "chain" };
    TX_BUILD_FAILED.with_label_values(&[kind]).inc();
}

pub fn record_tx_submitted(chain_id: u64) {
    TX_SUBMITTED
        .with_label_values(&[&chain_id.to_string()])
        .inc();
}

pub fn record_tx_confirmed(chain_id: u64) {
    TX_CONFIRMED
        .with_label_values(&[&chain_id.to_string()])
        .inc();
}

pub fn record_confirmation_timeout(chain_id: u64) {
    TX_CONFIRMATION_TIMEOUT
        .with_label_values(&[&chain_id.to_string()])
        .inc();
}

/// Text exposition of every registered metric
pub fn render() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

//! Metrics collection and Prometheus export.
//!
//! The recorder is installed once by the binary. Until then every `record_*`
//! call goes to the no-op recorder of the `metrics` facade, which keeps the
//! services usable from tests without setup.

use metrics::counter;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

pub static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

pub fn init_metrics() -> Result<(), anyhow::Error> {
    if METRICS_HANDLE.get().is_some() {
        return Ok(());
    }

    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("failed to install Prometheus recorder: {}", e))?;

    METRICS_HANDLE
        .set(handle)
        .map_err(|_| anyhow::anyhow!("metrics handle already initialized"))
}

/// Current metrics in Prometheus text format.
pub fn get_metrics() -> String {
    METRICS_HANDLE
        .get()
        .map(|handle| handle.render())
        .unwrap_or_else(|| "# Metrics recorder not initialized\n".to_string())
}

pub fn record_preflight(outcome: &'static str) {
    counter!("access_preflights_total", "outcome" => outcome).increment(1);
}

pub fn record_request(outcome: &'static str) {
    counter!("access_requests_total", "outcome" => outcome).increment(1);
}

pub fn record_grants_issued(count: usize) {
    counter!("access_grants_issued_total").increment(count as u64);
}

pub fn record_grants_revoked(count: usize) {
    counter!("access_grants_revoked_total").increment(count as u64);
}

pub fn record_arg_option_refresh(outcome: &'static str) {
    counter!("access_arg_option_refresh_total", "outcome" => outcome).increment(1);
}

//! Prometheus metrics for the poller

use finpulse_common::{FinPulseError, Result};
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

/// Call outcome labels
pub const OUTCOME_SUCCESS: &str = "success";
pub const OUTCOME_FAILURE: &str = "failure";
pub const OUTCOME_MALFORMED: &str = "malformed";

/// Poller metrics registered on a shared registry
pub struct PollerMetrics {
    pub poll_cycles: IntCounter,
    pub endpoint_calls: IntCounterVec,
    pub retries: IntCounter,
    pub snapshot_flushes: IntCounter,
    pub active_connections: IntGauge,
    pub discovered_tenants: IntGauge,
}

impl PollerMetrics {
    pub fn new() -> Result<Self> {
        Ok(Self {
            poll_cycles: IntCounter::new(
                "finpulse_poll_cycles_total",
                "Poll cycles started across all connections",
            )
            .map_err(metrics_error)?,
            endpoint_calls: IntCounterVec::new(
                Opts::new(
                    "finpulse_endpoint_calls_total",
                    "Endpoint calls completed, by scope and outcome",
                ),
                &["scope", "outcome"],
            )
            .map_err(metrics_error)?,
            retries: IntCounter::new(
                "finpulse_http_retries_total",
                "HTTP attempts retried after a transient failure",
            )
            .map_err(metrics_error)?,
            snapshot_flushes: IntCounter::new(
                "finpulse_snapshot_flushes_total",
                "Snapshot flushes triggered by completed cycles",
            )
            .map_err(metrics_error)?,
            active_connections: IntGauge::new(
                "finpulse_active_connections",
                "Currently connected dashboard clients",
            )
            .map_err(metrics_error)?,
            discovered_tenants: IntGauge::new(
                "finpulse_discovered_tenants",
                "Tenants known from the last successful discovery",
            )
            .map_err(metrics_error)?,
        })
    }

    pub fn register(&self, registry: &Registry) -> Result<()> {
        registry
            .register(Box::new(self.poll_cycles.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(self.endpoint_calls.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(self.retries.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(self.snapshot_flushes.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(self.active_connections.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(self.discovered_tenants.clone()))
            .map_err(metrics_error)?;
        Ok(())
    }

    pub fn record_call(&self, scope: &str, outcome: &str) {
        self.endpoint_calls.with_label_values(&[scope, outcome]).inc();
    }

    pub fn call_count(&self, scope: &str, outcome: &str) -> u64 {
        self.endpoint_calls.with_label_values(&[scope, outcome]).get()
    }
}

/// Render a registry in the Prometheus text format
pub fn encode(registry: &Registry) -> Result<String> {
    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&registry.gather(), &mut buffer)
        .map_err(metrics_error)?;
    String::from_utf8(buffer).map_err(|e| FinPulseError::Internal(e.to_string()))
}

fn metrics_error(err: prometheus::Error) -> FinPulseError {
    FinPulseError::Internal(format!("metrics: {}", err))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_encode() {
        let registry = Registry::new();
        let metrics = PollerMetrics::new().unwrap();
        metrics.register(&registry).unwrap();

        metrics.record_call("tenant", OUTCOME_SUCCESS);
        metrics.discovered_tenants.set(3);

        let text = encode(&registry).unwrap();
        assert!(text.contains("finpulse_endpoint_calls_total{"));
        assert!(text.contains("scope=\"tenant\""));
        assert!(text.contains("finpulse_discovered_tenants 3"));
        assert_eq!(metrics.call_count("tenant", OUTCOME_SUCCESS), 1);
    }

    #[test]
    fn test_double_registration_fails() {
        let registry = Registry::new();
        let metrics = PollerMetrics::new().unwrap();
        metrics.register(&registry).unwrap();
        assert!(metrics.register(&registry).is_err());
    }
}

//! # Metrics Collection Module

pub mod handler;

/// Initializes the metrics exporter.
///
/// Installs the global Prometheus recorder when the `prometheus` feature is
/// enabled and spawns the periodic upkeep task for histograms and
/// summaries. A no-op otherwise.
pub fn init() {
    #[cfg(feature = "prometheus")]
    {
        use metrics_exporter_prometheus::PrometheusBuilder;
        use tracing::debug;
        debug!("Prometheus metrics endpoint is enabled");
        if let Ok(handle) = PrometheusBuilder::new().install_recorder() {
            crate::metrics::handler::set_prom_handle(handle.clone());
            use std::time::Duration;
            tokio::spawn(async move {
                let mut tick = tokio::time::interval(Duration::from_secs(30));
                loop {
                    tick.tick().await;
                    handle.run_upkeep();
                }
            });
        }
    }
}

/// Records a flow state-machine transition.
///
/// Tracks transition counts by endpoint step and outcome, giving
/// visibility into where browser flows succeed, detour into linking, or
/// die.
///
/// # Arguments
/// * `step` - Flow endpoint ("authorize", "callback", "link_callback", "token")
/// * `outcome` - Transition outcome label
pub fn record_flow_step(step: &str, outcome: &str) {
    #[cfg(feature = "prometheus")]
    {
        use metrics::counter;
        counter!(
            "janus_flow_transitions_total",
            "step" => step.to_string(),
            "outcome" => outcome.to_string()
        )
        .increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        // No-op when metrics are disabled
        let _ = (step, outcome);
    }
}

/// Records a forwarded request.
///
/// Tracks request count and latency by tenant, HTTP method, and response
/// status.
///
/// # Arguments
/// * `tenant` - Tenant id the request addressed
/// * `method` - HTTP method
/// * `status` - HTTP response status code
/// * `latency_ms` - End-to-end proxy latency in milliseconds
pub fn record_proxy_request(tenant: &str, method: &str, status: u16, latency_ms: f64) {
    #[cfg(feature = "prometheus")]
    {
        use metrics::{counter, histogram};
        let status_s = status.to_string();
        counter!(
            "janus_proxy_requests_total",
            "tenant" => tenant.to_string(),
            "method" => method.to_string(),
            "status" => status_s.clone()
        )
        .increment(1);
        histogram!(
            "janus_proxy_latency_ms",
            "tenant" => tenant.to_string(),
            "method" => method.to_string(),
            "status" => status_s
        )
        .record(latency_ms);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        // No-op when metrics are disabled
        let _ = (tenant, method, status, latency_ms);
    }
}

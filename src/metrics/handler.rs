//! # Metrics HTTP Handler
//!
//! HTTP endpoint handling for metrics exposition. Serves
//! Prometheus-formatted metrics at the `/metrics` endpoint when the
//! `prometheus` feature is enabled.
//!
//! ## HTTP Responses
//!
//! - `200 OK`: Metrics successfully rendered
//! - `503 Service Unavailable`: Metrics recorder not initialized
//! - `404 Not Found`: Metrics feature not compiled in

use http_body_util::Full;
use hyper::Response;
use hyper::body::Bytes;

/// Global Prometheus handle for metrics rendering.
///
/// Holds the recorder handle once initialized; `OnceLock` gives
/// thread-safe one-time initialization.
#[cfg(feature = "prometheus")]
static PROM_HANDLE: std::sync::OnceLock<metrics_exporter_prometheus::PrometheusHandle> =
    std::sync::OnceLock::new();

/// Sets the global Prometheus handle for metrics rendering.
///
/// Called once during server initialization; later calls are ignored.
#[cfg(feature = "prometheus")]
pub(crate) fn set_prom_handle(handle: metrics_exporter_prometheus::PrometheusHandle) {
    let _ = PROM_HANDLE.set(handle);
}

/// Builds an HTTP response containing Prometheus metrics.
///
/// Returns metrics in the standard Prometheus text format (version 0.0.4).
///
/// # Returns
/// - `200 OK` with metrics data when available
/// - `503 Service Unavailable` when the recorder is not initialized
/// - `404 Not Found` when Prometheus support is not compiled in
pub fn make_metrics_response() -> Response<Full<Bytes>> {
    #[cfg(feature = "prometheus")]
    {
        use hyper::{StatusCode, header};

        tracing::debug!("Metrics requested");
        if let Some(handle) = PROM_HANDLE.get() {
            let body = handle.render();
            return Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, "text/plain; version=0.0.4")
                .body(Full::new(Bytes::from(body)))
                .expect("Failed to build metrics response");
        }
        Response::builder()
            .status(StatusCode::SERVICE_UNAVAILABLE)
            .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(Full::new(Bytes::from(
                "prometheus recorder not initialized",
            )))
            .expect("Failed to build service unavailable response")
    }
    #[cfg(not(feature = "prometheus"))]
    {
        use hyper::{StatusCode, header};

        tracing::warn!("Metrics endpoint called with metrics disabled");
        Response::builder()
            .status(StatusCode::NOT_FOUND)
            .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(Full::new(Bytes::from_static(b"metrics disabled")))
            .expect("Failed to build not found response")
    }
}

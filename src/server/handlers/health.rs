//! Health check handlers for the Janus server.
//!
//! This module provides HTTP handlers for health and readiness checks.
//!
//! # Endpoints
//!
//! - `GET /livez` - Returns 200/OK if the server is alive (basic liveness check)
//! - `GET /readyz` - Returns 200/OK if the server is ready to serve requests
//!
//! # Response Format
//!
//! Both endpoints support content negotiation:
//! - `Accept: application/json` returns `{"status": "live|ready|not live|not ready"}`
//! - Default returns plain text `"live"`, `"ready"`, `"not live"`, or `"not ready"`

use std::sync::Arc;

use axum::{extract::State, http::HeaderMap, http::StatusCode, response::Response};
use serde_json::json;

use crate::state::AppState;

/// Liveness check handler.
///
/// # Endpoint
/// `GET /livez`
///
/// # Returns
/// - 200 OK with "live" if the server is alive
/// - 503 Service Unavailable with "not live" otherwise
pub async fn livez(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    tracing::debug!("livez_handler invoked");

    let accept = headers
        .get("accept")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let (status, text) = if state.is_alive() {
        (StatusCode::OK, "live")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not live")
    };

    negotiated_response(status, text, accept)
}

/// Readiness check handler.
///
/// Ready means initialization finished and the listener is up; flows that
/// need the agent signer additionally require it to be loaded, which is
/// checked at startup rather than here.
///
/// # Endpoint
/// `GET /readyz`
///
/// # Returns
/// - 200 OK with "ready" if the server is ready
/// - 503 Service Unavailable with "not ready" otherwise
pub async fn readyz(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    tracing::debug!("readyz_handler invoked");

    let accept = headers
        .get("accept")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let (status, text) = if state.is_ready() {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready")
    };

    negotiated_response(status, text, accept)
}

fn negotiated_response(status: StatusCode, text: &str, accept: &str) -> Response {
    let json_wanted = accept.contains("application/json");
    let body = if json_wanted {
        json!({ "status": text }).to_string()
    } else {
        text.to_string()
    };

    Response::builder()
        .status(status)
        .header(
            "Content-Type",
            if json_wanted {
                "application/json"
            } else {
                "text/plain"
            },
        )
        .body(body.into())
        .unwrap()
}

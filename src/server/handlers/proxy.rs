//! Request-time forwarding path.
//!
//! `ANY /{tenant}/{rest...}`: validate the inbound bearer, broker the
//! agent token into the tenant's vaulted downstream credential, and relay
//! the request to the tenant's backend. The inbound `Authorization` and
//! `Host` headers never cross the proxy; response headers are copied from
//! a fixed allowlist.

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Extension, OriginalUri, Path},
    http::{HeaderMap, Method, StatusCode, header},
    response::{IntoResponse, Response},
    routing::any,
};
use std::sync::Arc;
use std::time::Instant;

use crate::config::TenantConfig;
use crate::errors::ProxyError;
use crate::server::auth::Denial;
use crate::server::constants::FORWARD_TIMEOUT;
use crate::server::vault::VaultExchange;
use crate::state::AppState;

/// Response headers relayed from the backend; everything else is dropped.
const RESPONSE_HEADER_ALLOWLIST: [&str; 4] =
    ["content-type", "cache-control", "etag", "last-modified"];

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/{tenant}/{*rest}", any(forward_handler))
        .layer(Extension(state))
}

async fn forward_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path((tenant_id, rest)): Path<(String, String)>,
    OriginalUri(uri): OriginalUri,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let started = Instant::now();
    let response = forward(&state, &tenant_id, &rest, &uri, &method, &headers, body).await;

    crate::metrics::record_proxy_request(
        &tenant_id,
        method.as_str(),
        response.status().as_u16(),
        started.elapsed().as_secs_f64() * 1000.0,
    );
    response
}

async fn forward(
    state: &Arc<AppState>,
    tenant_id: &str,
    rest: &str,
    uri: &axum::http::Uri,
    method: &Method,
    headers: &HeaderMap,
    body: Bytes,
) -> Response {
    let Some(tenant) = state.tenants.lookup(tenant_id).cloned() else {
        return forwarder_error(&ProxyError::NotFound(format!(
            "unknown tenant '{}'",
            tenant_id
        )));
    };

    let bearer = match state.authorizer.authorize(&tenant, headers, method).await {
        Ok(bearer) => bearer,
        Err(denial) => return denied_response(state, tenant_id, &denial),
    };

    // Broker the agent token into the vaulted downstream credential. The
    // inbound bearer itself is never forwarded.
    let mut downstream_token = None;
    if tenant.vault_connection.is_some() {
        match state.vault.exchange(&bearer.token, &tenant).await {
            Ok(VaultExchange::Ok { access_token }) => downstream_token = Some(access_token),
            Ok(VaultExchange::NeedsLinking) => {
                let denial = Denial {
                    status: StatusCode::UNAUTHORIZED,
                    code: "linking_required",
                    message: ProxyError::LinkingRequired.to_string(),
                };
                return denied_response(state, tenant_id, &denial);
            }
            Err(e) => {
                tracing::warn!(tenant = %tenant.id, "vault exchange failed: {}", e);
                // Transport failures keep their gateway status; a vault
                // refusal is a 403 here.
                let err = match e {
                    gateway @ ProxyError::Gateway { .. } => gateway,
                    other => ProxyError::Authorization(other.public_message()),
                };
                return forwarder_error(&err);
            }
        }
    }

    relay(state, &tenant, rest, uri, method, headers, body, downstream_token).await
}

/// Builds and sends the outbound request, then relays status, allowlisted
/// headers, and body.
#[allow(clippy::too_many_arguments)]
async fn relay(
    state: &Arc<AppState>,
    tenant: &TenantConfig,
    rest: &str,
    uri: &axum::http::Uri,
    method: &Method,
    headers: &HeaderMap,
    body: Bytes,
    downstream_token: Option<String>,
) -> Response {
    let mut url = format!("{}/{}", tenant.backend_url.trim_end_matches('/'), rest);
    if let Some(query) = uri.query() {
        url.push('?');
        url.push_str(query);
    }

    let mut request = state
        .http
        .request(method.clone(), url.as_str())
        .timeout(FORWARD_TIMEOUT);

    if let Some(token) = downstream_token {
        request = request.bearer_auth(token);
    }
    for name in [header::CONTENT_TYPE, header::ACCEPT] {
        if let Some(value) = headers.get(&name) {
            request = request.header(name.clone(), value.clone());
        }
    }
    if matches!(*method, Method::POST | Method::PUT | Method::PATCH) {
        request = request.body(body.to_vec());
    }

    let upstream = match request.send().await {
        Ok(response) => response,
        Err(e) => return transport_failure(e),
    };

    let status = upstream.status();
    let mut response_headers = HeaderMap::new();
    for name in RESPONSE_HEADER_ALLOWLIST {
        if let Some(value) = upstream.headers().get(name) {
            if let Ok(header_name) = header::HeaderName::from_bytes(name.as_bytes()) {
                response_headers.insert(header_name, value.clone());
            }
        }
    }

    let bytes = match upstream.bytes().await {
        Ok(bytes) => bytes,
        Err(e) => return transport_failure(e),
    };

    (status, response_headers, bytes).into_response()
}

/// 502 for refused connections, 504 for timeouts, 500 for anything local.
fn transport_failure(e: reqwest::Error) -> Response {
    let err = ProxyError::from_transport(e);
    tracing::warn!("backend request failed: {}", err);
    forwarder_error(&err)
}

/// The forwarder's error shape is `{error, message}`, unlike the OAuth
/// shape used by the flow endpoints.
fn forwarder_error(err: &ProxyError) -> Response {
    (
        err.status(),
        Json(serde_json::json!({
            "error": err.oauth_code(),
            "message": err.public_message(),
        })),
    )
        .into_response()
}

/// Denied requests carry `WWW-Authenticate` pointing at this proxy's
/// protected-resource metadata, per RFC 9728.
fn denied_response(state: &Arc<AppState>, tenant_id: &str, denial: &Denial) -> Response {
    let base = state.settings.proxy_base_url.trim_end_matches('/');
    let challenge = format!(
        r#"Bearer error="{}", error_description="{}", resource_metadata="{}/.well-known/oauth-protected-resource/{}""#,
        denial.code,
        denial.message.replace('"', "'"),
        base,
        tenant_id,
    );

    let mut response = (
        denial.status,
        Json(serde_json::json!({
            "error": denial.code,
            "message": denial.message,
        })),
    )
        .into_response();

    if let Ok(value) = challenge.parse() {
        response
            .headers_mut()
            .insert(header::WWW_AUTHENTICATE, value);
    }
    response
}

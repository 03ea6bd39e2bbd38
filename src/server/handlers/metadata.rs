//! OAuth 2.0 / OIDC discovery documents and client registration.
//!
//! The proxy presents itself to clients as a standards-compliant
//! authorization server and resource server: RFC 9728 protected-resource
//! metadata, RFC 8414 authorization-server metadata (one issuer per
//! tenant), a fixed RFC 7591 registration response for the recognized
//! client, and the JWKS of the agent signing key.

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use std::sync::Arc;

use crate::state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(
            "/.well-known/oauth-protected-resource/{tenant}",
            get(protected_resource_handler),
        )
        .route(
            "/.well-known/oauth-protected-resource/{tenant}/{*rest}",
            get(protected_resource_nested_handler),
        )
        .route(
            "/.well-known/oauth-authorization-server/{tenant}",
            get(authorization_server_handler),
        )
        .route(
            "/.well-known/oauth-authorization-server/{tenant}/{*rest}",
            get(authorization_server_nested_handler),
        )
        .route("/register", post(register_handler))
        .route("/jwks", get(jwks_handler))
        .layer(Extension(state))
}

async fn protected_resource_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(tenant_id): Path<String>,
) -> impl IntoResponse {
    protected_resource_document(&state, &tenant_id)
}

async fn protected_resource_nested_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path((tenant_id, _rest)): Path<(String, String)>,
) -> impl IntoResponse {
    protected_resource_document(&state, &tenant_id)
}

async fn authorization_server_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(tenant_id): Path<String>,
) -> impl IntoResponse {
    authorization_server_document(&state, &tenant_id)
}

async fn authorization_server_nested_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path((tenant_id, _rest)): Path<(String, String)>,
) -> impl IntoResponse {
    authorization_server_document(&state, &tenant_id)
}

/// RFC 9728 protected-resource metadata for one tenant.
fn protected_resource_document(state: &AppState, tenant_id: &str) -> axum::response::Response {
    let Some(tenant) = state.tenants.lookup(tenant_id) else {
        return tenant_not_found(tenant_id);
    };
    let base = state.settings.proxy_base_url.trim_end_matches('/');
    let resource = format!("{}/{}", base, tenant.id);

    Json(serde_json::json!({
        "resource": resource,
        "authorization_servers": [resource],
        "resource_name": tenant.name,
    }))
    .into_response()
}

/// RFC 8414 authorization-server metadata. The issuer identifier carries
/// the tenant as a path component, so its metadata URL is exactly
/// `/.well-known/oauth-authorization-server/{tenant}` per the RFC's
/// path-insertion rule.
fn authorization_server_document(state: &AppState, tenant_id: &str) -> axum::response::Response {
    let Some(tenant) = state.tenants.lookup(tenant_id) else {
        return tenant_not_found(tenant_id);
    };
    let base = state.settings.proxy_base_url.trim_end_matches('/');
    let issuer = format!("{}/{}", base, tenant.id);

    Json(serde_json::json!({
        "issuer": issuer,
        "authorization_endpoint": format!("{}/authorize/{}", base, tenant.id),
        "token_endpoint": format!("{}/token", base),
        "jwks_uri": format!("{}/jwks", base),
        "registration_endpoint": format!("{}/register", base),
        "scopes_supported": tenant.external_scopes,
        "response_types_supported": ["code"],
        "response_modes_supported": ["query"],
        "grant_types_supported": ["authorization_code"],
        "token_endpoint_auth_methods_supported": ["none", "client_secret_basic", "client_secret_post"],
        "code_challenge_methods_supported": ["S256"],
        "protected_resources": [issuer],
    }))
    .into_response()
}

/// POST /register - dynamic client registration stub.
///
/// Registration is not open: whatever the request carries, the response is
/// the preconfigured record for the recognized client identity.
async fn register_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> impl IntoResponse {
    let record = serde_json::json!({
        "client_id": state.settings.login_client_id,
        "client_name": "MCP client",
        "client_id_issued_at": chrono::Utc::now().timestamp(),
        "redirect_uris": [
            "http://127.0.0.1:33418",
            "https://vscode.dev/redirect",
        ],
        "token_endpoint_auth_method": "none",
        "grant_types": ["authorization_code", "refresh_token"],
        "response_types": ["code"],
    });
    (StatusCode::CREATED, Json(record))
}

/// GET /jwks - public keys for the agent client assertions.
async fn jwks_handler(Extension(state): Extension<Arc<AppState>>) -> impl IntoResponse {
    if let Some(signer) = &state.signer {
        (StatusCode::OK, Json(signer.jwks())).into_response()
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error":"no jwks configured"})),
        )
            .into_response()
    }
}

fn tenant_not_found(tenant_id: &str) -> axum::response::Response {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({
            "error": "not_found",
            "error_description": format!("unknown tenant '{}'", tenant_id),
        })),
    )
        .into_response()
}

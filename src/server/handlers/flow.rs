//! Browser-flow orchestration endpoints.
//!
//! Implements the multi-stage OAuth state machine that binds the inbound
//! client flow to the outbound IdP flow, the vault exchange, and the
//! optional connected-accounts linking detour:
//!
//! `INIT -> AWAIT_IDP` at `/authorize/{tenant}`, `AWAIT_IDP -> EVALUATING`
//! at `/callback`, then either straight to `ISSUED` or through
//! `AWAIT_LINK` via `/connected_account_callback`, and finally
//! `ISSUED -> CONSUMED` at `/token`. Every hop is correlated through the
//! store in [`crate::server::correlation`]; every failure evicts the
//! flow's entries.

use axum::{
    Json, Router,
    body::{Body, Bytes},
    extract::{Extension, Path, Query},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::Utc;
use openidconnect::{AuthorizationCode, PkceCodeChallenge, PkceCodeVerifier};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::TenantConfig;
use crate::errors::ProxyError;
use crate::server::constants::{OIDC_LOGIN_SCOPES, PKCE_METHOD_S256};
use crate::server::correlation::{
    InboundAuthorizeContext, LinkSession, OidcOutbound, ReturnCode, StagedAgentToken,
    random_urlsafe,
};
use crate::server::vault::VaultExchange;
use crate::state::AppState;

/// OAuth token response returned by `/token`.
#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
}

/// Creates the flow router with the four state-machine endpoints.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/authorize/{tenant}", get(authorize_handler))
        .route("/callback", get(oidc_callback_handler))
        .route("/connected_account_callback", get(link_callback_handler))
        .route("/token", post(token_handler))
        .layer(Extension(state))
}

/// GET /authorize/{tenant} - entry of the browser flow.
///
/// Captures the raw inbound query for later replay, mints the outbound
/// state and nonce, and bounces the browser to the IdP's authorization
/// endpoint for the `openid profile` leg.
async fn authorize_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(tenant_id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let Some(tenant) = state.tenants.lookup(&tenant_id) else {
        return oauth_error(
            StatusCode::NOT_FOUND,
            "not_found",
            &format!("unknown tenant '{}'", tenant_id),
        );
    };

    let Some(redirect_uri) = params.get("redirect_uri").cloned() else {
        return oauth_error(
            StatusCode::BAD_REQUEST,
            "invalid_request",
            "missing redirect_uri",
        );
    };

    let inbound = InboundAuthorizeContext {
        tenant_id: tenant.id.clone(),
        state: params.get("state").cloned(),
        client_id: params.get("client_id").cloned(),
        redirect_uri,
        code_challenge: params.get("code_challenge").cloned(),
        code_challenge_method: params.get("code_challenge_method").cloned(),
        params: params.clone(),
    };

    let outbound_state = random_urlsafe(32);
    let outbound_nonce = random_urlsafe(32);

    state
        .correlation
        .oidc
        .put(
            outbound_state.clone(),
            OidcOutbound {
                inbound,
                staged: None,
            },
        )
        .await;

    let mut url = format!(
        "{}?client_id={}&response_type=code&scope={}&state={}&nonce={}",
        state.idp.authorize_endpoint(),
        urlencoding::encode(state.idp.login_client_id()),
        urlencoding::encode(OIDC_LOGIN_SCOPES),
        urlencoding::encode(&outbound_state),
        urlencoding::encode(&outbound_nonce),
    );
    url.push_str("&redirect_uri=");
    url.push_str(&urlencoding::encode(&state.settings.oidc_callback_uri()));

    tracing::debug!(tenant = %tenant.id, "authorize: redirecting to IdP");
    crate::metrics::record_flow_step("authorize", "redirected");
    found_redirect(&url)
}

/// GET /callback - return leg from the IdP.
///
/// Runs the exchange chain (code -> ID token -> ID-JAG -> agent token),
/// then asks the vault for the federated downstream token. Depending on
/// the vault's answer the flow either issues the return code now or takes
/// the linking detour.
async fn oidc_callback_handler(
    Extension(state): Extension<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    if let Some(error) = params.get("error") {
        let description = params
            .get("error_description")
            .map(|s| s.as_str())
            .unwrap_or("authorization failed at the identity provider");
        if let Some(st) = params.get("state") {
            state.correlation.oidc.delete(st).await;
        }
        crate::metrics::record_flow_step("callback", "idp_error");
        return oauth_error(StatusCode::BAD_REQUEST, error, description);
    }

    let (Some(outbound_state), Some(code)) = (params.get("state"), params.get("code")) else {
        return oauth_error(
            StatusCode::BAD_REQUEST,
            "invalid_request",
            "missing state or code",
        );
    };

    let Some(entry) = state.correlation.oidc.get(outbound_state).await else {
        crate::metrics::record_flow_step("callback", "invalid_state");
        return oauth_error(
            StatusCode::BAD_REQUEST,
            "invalid_state",
            "unknown or expired state",
        );
    };

    // The tenant must still resolve at every later step of the flow.
    let Some(tenant) = state.tenants.lookup(&entry.inbound.tenant_id).cloned() else {
        state.correlation.oidc.delete(outbound_state).await;
        return oauth_error(
            StatusCode::BAD_REQUEST,
            "invalid_request",
            "tenant is no longer configured",
        );
    };

    let staged = match run_exchange_chain(&state, &tenant, code).await {
        Ok(staged) => staged,
        Err(e) => {
            state.correlation.oidc.delete(outbound_state).await;
            crate::metrics::record_flow_step("callback", "exchange_failed");
            tracing::warn!(tenant = %tenant.id, "IdP exchange chain failed: {}", e);
            return e.into_response();
        }
    };

    // Tenants without a vault connection skip brokering entirely.
    if tenant.vault_connection.is_none() {
        state.correlation.oidc.delete(outbound_state).await;
        crate::metrics::record_flow_step("callback", "issued");
        return issue_return_code(&state, entry.inbound, staged).await;
    }

    match state.vault.exchange(&staged.access_token, &tenant).await {
        Ok(VaultExchange::Ok { .. }) => {
            state.correlation.oidc.delete(outbound_state).await;
            crate::metrics::record_flow_step("callback", "issued");
            issue_return_code(&state, entry.inbound, staged).await
        }
        Ok(VaultExchange::NeedsLinking) => {
            begin_linking(&state, &tenant, outbound_state, entry, staged).await
        }
        Err(e) => {
            state.correlation.oidc.delete(outbound_state).await;
            crate::metrics::record_flow_step("callback", "vault_error");
            tracing::warn!(tenant = %tenant.id, "vault exchange failed: {}", e);
            match e {
                // Transport-level failures keep their gateway status; a
                // vault refusal is a 403 for the flow.
                gateway @ ProxyError::Gateway { .. } => gateway.into_response(),
                other => oauth_error(
                    StatusCode::FORBIDDEN,
                    "access_denied",
                    &other.public_message(),
                ),
            }
        }
    }
}

/// AWAIT_LINK transition: start a connected-accounts session, stage the
/// agent token into the OIDC entry, and send the browser to the vault's
/// link URL.
///
/// The staged-token write and the link-session write both happen before
/// the redirect is returned, so the link callback always observes them.
async fn begin_linking(
    state: &Arc<AppState>,
    tenant: &TenantConfig,
    outbound_state: &str,
    entry: OidcOutbound,
    staged: StagedAgentToken,
) -> Response {
    let start = match state
        .vault
        .begin_link(&staged.access_token, tenant, &state.settings.link_callback_uri())
        .await
    {
        Ok(start) => start,
        Err(e) => {
            state.correlation.oidc.delete(outbound_state).await;
            crate::metrics::record_flow_step("callback", "link_init_failed");
            tracing::warn!(tenant = %tenant.id, "link initiation failed: {}", e);
            return oauth_error(
                StatusCode::FORBIDDEN,
                "access_denied",
                &e.public_message(),
            );
        }
    };

    let updated = OidcOutbound {
        inbound: entry.inbound,
        staged: Some(staged.clone()),
    };
    if !state.correlation.oidc.update(outbound_state, updated).await {
        // Entry expired between the callback lookup and here.
        return oauth_error(
            StatusCode::BAD_REQUEST,
            "invalid_state",
            "unknown or expired state",
        );
    }

    state
        .correlation
        .links
        .put(
            start.state.clone(),
            LinkSession {
                oidc_state: outbound_state.to_string(),
                auth_session: start.auth_session,
                user_token: staged.access_token,
                created_at: Utc::now(),
            },
        )
        .await;

    tracing::debug!(tenant = %tenant.id, "callback: linking required, redirecting to vault");
    crate::metrics::record_flow_step("callback", "link_started");
    found_redirect(&start.link_url)
}

/// GET /connected_account_callback - return leg from the vault's link
/// provider.
///
/// Consumes the link session, completes the link at the vault, then mints
/// the return code from the token staged at `/callback`.
async fn link_callback_handler(
    Extension(state): Extension<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let (Some(link_state), Some(connect_code)) = (params.get("state"), params.get("connect_code"))
    else {
        return oauth_error(
            StatusCode::BAD_REQUEST,
            "invalid_request",
            "missing state or connect_code",
        );
    };

    let Some(session) = state.correlation.links.take(link_state).await else {
        crate::metrics::record_flow_step("link_callback", "invalid_state");
        return oauth_error(
            StatusCode::BAD_REQUEST,
            "invalid_state",
            "unknown or expired link state",
        );
    };

    if let Err(e) = state
        .vault
        .complete_link(
            &session.auth_session,
            connect_code,
            &state.settings.link_callback_uri(),
            &session.user_token,
        )
        .await
    {
        state.correlation.oidc.delete(&session.oidc_state).await;
        crate::metrics::record_flow_step("link_callback", "complete_failed");
        tracing::warn!("link completion failed: {}", e);
        return e.into_response();
    }

    let Some(entry) = state.correlation.oidc.take(&session.oidc_state).await else {
        return oauth_error(
            StatusCode::BAD_REQUEST,
            "invalid_state",
            "unknown or expired state",
        );
    };
    let Some(staged) = entry.staged else {
        return oauth_error(
            StatusCode::BAD_REQUEST,
            "invalid_state",
            "flow carries no staged token",
        );
    };

    crate::metrics::record_flow_step("link_callback", "issued");
    issue_return_code(&state, entry.inbound, staged).await
}

/// POST /token - final leg, consumes the single-use return code.
///
/// Accepts a form-encoded or JSON body. PKCE S256 verification is
/// mandatory: the original authorize request must have carried a
/// challenge, and the presented verifier must hash to it.
async fn token_handler(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let params = parse_token_request(&headers, &body);

    if params.get("grant_type").map(|s| s.as_str()) != Some("authorization_code") {
        return oauth_error(
            StatusCode::BAD_REQUEST,
            "unsupported_grant_type",
            "only 'authorization_code' is supported",
        );
    }

    let (Some(code), Some(client_id), Some(code_verifier), Some(redirect_uri)) = (
        params.get("code"),
        params.get("client_id"),
        params.get("code_verifier"),
        params.get("redirect_uri"),
    ) else {
        return oauth_error(
            StatusCode::BAD_REQUEST,
            "invalid_request",
            "code, client_id, code_verifier and redirect_uri are required",
        );
    };

    // Atomic read-and-delete: a code redeems at most once.
    let Some(return_code) = state.correlation.codes.take(code).await else {
        crate::metrics::record_flow_step("token", "invalid_grant");
        return oauth_error(
            StatusCode::BAD_REQUEST,
            "invalid_grant",
            "unknown, expired or already redeemed code",
        );
    };

    let original = &return_code.original;

    let Some(challenge) = original.code_challenge.as_deref() else {
        return oauth_error(
            StatusCode::BAD_REQUEST,
            "invalid_grant",
            "authorization request carried no code_challenge",
        );
    };
    let method = original
        .code_challenge_method
        .as_deref()
        .unwrap_or(PKCE_METHOD_S256);
    if method != PKCE_METHOD_S256 {
        return oauth_error(
            StatusCode::BAD_REQUEST,
            "invalid_grant",
            "unsupported code_challenge_method",
        );
    }
    let verifier = PkceCodeVerifier::new(code_verifier.clone());
    let computed = PkceCodeChallenge::from_code_verifier_sha256(&verifier);
    if computed.as_str() != challenge {
        crate::metrics::record_flow_step("token", "pkce_failed");
        return oauth_error(
            StatusCode::BAD_REQUEST,
            "invalid_grant",
            "PKCE verification failed",
        );
    }

    if original.client_id.as_deref() != Some(client_id.as_str()) {
        return oauth_error(
            StatusCode::BAD_REQUEST,
            "invalid_grant",
            "code was issued to a different client",
        );
    }

    if original.redirect_uri != *redirect_uri {
        return oauth_error(
            StatusCode::BAD_REQUEST,
            "invalid_grant",
            "redirect URI mismatch",
        );
    }

    crate::metrics::record_flow_step("token", "issued");
    let token = return_code.token;
    (
        StatusCode::OK,
        Json(TokenResponse {
            access_token: token.access_token,
            token_type: "Bearer".to_string(),
            expires_in: token.expires_in,
            scope: token.scope,
            id_token: token.id_token,
        }),
    )
        .into_response()
}

/// Runs the three-hop IdP exchange and stages the resulting agent token.
async fn run_exchange_chain(
    state: &Arc<AppState>,
    tenant: &TenantConfig,
    code: &str,
) -> Result<StagedAgentToken, ProxyError> {
    let id_token = state
        .idp
        .complete_oidc_login(code, &state.settings.oidc_callback_uri())
        .await?;
    let id_jag = state.idp.id_token_to_id_jag(tenant, &id_token).await?;
    let agent = state.idp.id_jag_to_access_token(tenant, &id_jag).await?;

    Ok(StagedAgentToken {
        access_token: agent.access_token,
        scope: agent.scope,
        expires_in: agent.expires_in,
        id_token: Some(id_token),
    })
}

/// ISSUED transition: mint the single-use return code and send the browser
/// back to the client with its original state echoed verbatim.
async fn issue_return_code(
    state: &Arc<AppState>,
    inbound: InboundAuthorizeContext,
    staged: StagedAgentToken,
) -> Response {
    let code = AuthorizationCode::new(random_urlsafe(32));

    let mut redirect = format!(
        "{}?code={}",
        inbound.redirect_uri,
        urlencoding::encode(code.secret())
    );
    if let Some(client_state) = &inbound.state {
        redirect.push_str(&format!("&state={}", urlencoding::encode(client_state)));
    }

    state
        .correlation
        .codes
        .put(
            code.secret().clone(),
            ReturnCode {
                token: staged,
                original: inbound,
            },
        )
        .await;

    found_redirect(&redirect)
}

/// Plain 302 redirect for the browser hops.
fn found_redirect(url: &str) -> Response {
    Response::builder()
        .status(StatusCode::FOUND)
        .header(header::LOCATION, url)
        .body(Body::empty())
        .unwrap()
        .into_response()
}

/// The token endpoint accepts both body shapes; everything is flattened
/// into a string map before validation.
fn parse_token_request(headers: &HeaderMap, body: &Bytes) -> HashMap<String, String> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if content_type.starts_with("application/json") {
        let value: serde_json::Value = serde_json::from_slice(body).unwrap_or_default();
        value
            .as_object()
            .map(|map| {
                map.iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                    .collect()
            })
            .unwrap_or_default()
    } else {
        url::form_urlencoded::parse(body).into_owned().collect()
    }
}

fn oauth_error(status: StatusCode, error: &str, description: &str) -> Response {
    (
        status,
        Json(serde_json::json!({
            "error": error,
            "error_description": description,
        })),
    )
        .into_response()
}

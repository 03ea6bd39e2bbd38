//! Upstream IdP exchange client.
//!
//! Implements the three-hop chain that turns an authorization code into an
//! agent-bound access token: code -> ID token (authorization_code grant),
//! ID token -> identity-assertion JWT authorization grant (RFC 8693 token
//! exchange), ID-JAG -> access token (RFC 7523 JWT-bearer grant at the
//! tenant's authorization server). The agent client authenticates with a
//! private-key JWT assertion minted per call.

use jsonwebtoken::{Algorithm, Header};
use serde::Deserialize;
use std::collections::HashMap;

use crate::config::{Settings, TenantConfig};
use crate::errors::ProxyError;
use crate::server::constants::{
    CLIENT_ASSERTION_LIFETIME_SECS, CLIENT_ASSERTION_TYPE_JWT_BEARER, EXCHANGE_TIMEOUT,
    GRANT_TYPE_JWT_BEARER, GRANT_TYPE_TOKEN_EXCHANGE, OIDC_LOGIN_SCOPES, TOKEN_TYPE_ID_JAG,
    TOKEN_TYPE_ID_TOKEN,
};
use crate::server::signing::DynSigner;

/// Agent access token material as returned by the tenant's authorization
/// server.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentToken {
    pub access_token: String,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

pub struct IdpClient {
    http: reqwest::Client,
    base: String,
    login_client_id: String,
    login_client_secret: String,
    agent_client_id: String,
    signer: Option<DynSigner>,
}

impl IdpClient {
    pub fn new(http: reqwest::Client, settings: &Settings, signer: Option<DynSigner>) -> Self {
        Self {
            http,
            base: settings.idp_base(),
            login_client_id: settings.login_client_id.clone(),
            login_client_secret: settings.login_client_secret.clone(),
            agent_client_id: settings.agent_client_id.clone(),
            signer,
        }
    }

    /// Authorization endpoint the browser is sent to for the initial leg.
    pub fn authorize_endpoint(&self) -> String {
        format!("{}/oauth2/v1/authorize", self.base)
    }

    fn token_endpoint(&self) -> String {
        format!("{}/oauth2/v1/token", self.base)
    }

    pub fn login_client_id(&self) -> &str {
        &self.login_client_id
    }

    /// Redeem the authorization code from the OIDC callback for an ID
    /// token. Confidential-client leg: the login client secret goes in the
    /// form body.
    pub async fn complete_oidc_login(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<String, ProxyError> {
        let mut params = HashMap::new();
        params.insert("grant_type", "authorization_code");
        params.insert("code", code);
        params.insert("redirect_uri", redirect_uri);
        params.insert("scope", OIDC_LOGIN_SCOPES);
        params.insert("client_id", &self.login_client_id);
        params.insert("client_secret", &self.login_client_secret);

        let body = post_form(&self.http, &self.token_endpoint(), &params).await?;
        body.get("id_token")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| ProxyError::Internal("IdP token response missing id_token".to_string()))
    }

    /// RFC 8693 token exchange: ID token in, ID-JAG out. The audience is
    /// the tenant's authorization server and the scope is the tenant's
    /// external scope list.
    pub async fn id_token_to_id_jag(
        &self,
        tenant: &TenantConfig,
        id_token: &str,
    ) -> Result<String, ProxyError> {
        let endpoint = self.token_endpoint();
        let assertion = self.client_assertion(&endpoint)?;
        let scope = tenant.external_scopes.join(" ");

        let mut params = HashMap::new();
        params.insert("grant_type", GRANT_TYPE_TOKEN_EXCHANGE);
        params.insert("requested_token_type", TOKEN_TYPE_ID_JAG);
        params.insert("audience", &tenant.issuer);
        params.insert("scope", &scope);
        params.insert("subject_token", id_token);
        params.insert("subject_token_type", TOKEN_TYPE_ID_TOKEN);
        params.insert("client_id", &self.agent_client_id);
        params.insert("client_assertion_type", CLIENT_ASSERTION_TYPE_JWT_BEARER);
        params.insert("client_assertion", &assertion);

        let body = post_form(&self.http, &endpoint, &params).await?;
        body.get("access_token")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| {
                ProxyError::Internal("token exchange response missing access_token".to_string())
            })
    }

    /// JWT-bearer grant at the tenant's authorization server: ID-JAG in,
    /// agent access token out.
    pub async fn id_jag_to_access_token(
        &self,
        tenant: &TenantConfig,
        id_jag: &str,
    ) -> Result<AgentToken, ProxyError> {
        let endpoint = format!("{}/v1/token", tenant.issuer.trim_end_matches('/'));
        let assertion = self.client_assertion(&endpoint)?;

        let mut params = HashMap::new();
        params.insert("grant_type", GRANT_TYPE_JWT_BEARER);
        params.insert("assertion", id_jag);
        params.insert("client_id", &self.agent_client_id);
        params.insert("client_assertion_type", CLIENT_ASSERTION_TYPE_JWT_BEARER);
        params.insert("client_assertion", &assertion);

        let body = post_form(&self.http, &endpoint, &params).await?;
        serde_json::from_value(body)
            .map_err(|e| ProxyError::Internal(format!("malformed agent token response: {}", e)))
    }

    /// Mint the RS256 private-key JWT client assertion for `token_endpoint`.
    ///
    /// Claims: `iss = sub = client_id`, `aud = token_endpoint`, five-minute
    /// lifetime, random `jti`. The signer places the configured `kid` in
    /// the header.
    pub fn client_assertion(&self, token_endpoint: &str) -> Result<String, ProxyError> {
        let signer = self.signer.as_ref().ok_or_else(|| {
            ProxyError::Internal("agent signing key not configured".to_string())
        })?;

        let now = chrono::Utc::now().timestamp();
        let claims = serde_json::json!({
            "iss": self.agent_client_id,
            "sub": self.agent_client_id,
            "aud": token_endpoint,
            "iat": now,
            "exp": now + CLIENT_ASSERTION_LIFETIME_SECS,
            "jti": uuid::Uuid::new_v4().to_string(),
        });

        signer
            .sign(Header::new(Algorithm::RS256), &claims)
            .map_err(|e| ProxyError::Internal(format!("client assertion signing failed: {}", e)))
    }
}

/// POST a form-encoded token request and decode the JSON response.
///
/// Failure statuses are mapped to `Upstream` with the OAuth error body
/// parsed tolerantly; transport failures map to gateway errors.
pub(crate) async fn post_form(
    http: &reqwest::Client,
    endpoint: &str,
    params: &HashMap<&str, &str>,
) -> Result<serde_json::Value, ProxyError> {
    let response = http
        .post(endpoint)
        .form(params)
        .timeout(EXCHANGE_TIMEOUT)
        .send()
        .await
        .map_err(ProxyError::from_transport)?;

    let status = response.status();
    let body: serde_json::Value = response.json().await.unwrap_or_default();

    if !status.is_success() {
        return Err(upstream_error(status.as_u16(), &body));
    }
    Ok(body)
}

/// Builds an `Upstream` error from an OAuth-shaped error body; unknown
/// shapes fall back to generic fields rather than failing the mapping.
pub(crate) fn upstream_error(status: u16, body: &serde_json::Value) -> ProxyError {
    let code = body
        .get("error")
        .and_then(|v| v.as_str())
        .unwrap_or("upstream_error")
        .to_string();
    let description = body
        .get("error_description")
        .and_then(|v| v.as_str())
        .unwrap_or("upstream request failed")
        .to_string();
    ProxyError::Upstream {
        status,
        code,
        description,
    }
}

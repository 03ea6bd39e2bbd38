//! Token vault client.
//!
//! The vault holds the user's connected accounts and mints federated
//! downstream access tokens from them. Reaching it is itself a two-step
//! dance: the agent access token is first exchanged (custom token exchange)
//! for a vault-scoped token, which is then traded for the federated
//! connection token or used against the connected-accounts API when the
//! user still has to link the external account.

use serde::Deserialize;
use std::collections::HashMap;

use crate::config::{Settings, TenantConfig};
use crate::errors::ProxyError;
use crate::server::constants::{
    CONNECTED_ACCOUNTS_SCOPE, ERROR_REFRESH_TOKEN_NOT_FOUND, EXCHANGE_TIMEOUT,
    GRANT_TYPE_FEDERATED_CONNECTION_TOKEN, GRANT_TYPE_TOKEN_EXCHANGE, TOKEN_TYPE_ACCESS_TOKEN,
    TOKEN_TYPE_AGENT_ACCESS_TOKEN, TOKEN_TYPE_FEDERATED_CONNECTION_TOKEN,
};
use crate::server::correlation::random_urlsafe;
use crate::server::idp::{post_form, upstream_error};

/// Outcome of a federated-connection exchange. "No connected account yet"
/// is a first-class result, not an error: it routes the user into the
/// linking flow.
#[derive(Debug, Clone)]
pub enum VaultExchange {
    Ok { access_token: String },
    NeedsLinking,
}

/// A freshly initiated connected-accounts linking session.
#[derive(Debug, Clone)]
pub struct LinkStart {
    /// URL the browser is redirected to for provider consent.
    pub link_url: String,
    /// Opaque vault handle, needed again to complete the link.
    pub auth_session: String,
    /// The `link_state` key the callback will present.
    pub state: String,
}

#[derive(Debug, Deserialize)]
struct ConnectResponse {
    auth_session: String,
    connect_uri: String,
    #[serde(default)]
    connect_params: ConnectParams,
}

#[derive(Debug, Default, Deserialize)]
struct ConnectParams {
    #[serde(default)]
    ticket: String,
}

pub struct VaultClient {
    http: reqwest::Client,
    base: String,
    cte_client_id: String,
    cte_client_secret: String,
    vault_client_id: String,
    vault_client_secret: String,
    audience: String,
    scope: String,
}

impl VaultClient {
    pub fn new(http: reqwest::Client, settings: &Settings) -> Self {
        Self {
            http,
            base: settings.vault_base(),
            cte_client_id: settings.cte_client_id.clone(),
            cte_client_secret: settings.cte_client_secret.clone(),
            vault_client_id: settings.vault_client_id.clone(),
            vault_client_secret: settings.vault_client_secret.clone(),
            audience: settings.vault_audience.clone(),
            scope: settings.vault_scope.clone(),
        }
    }

    fn token_endpoint(&self) -> String {
        format!("{}/oauth/token", self.base)
    }

    /// Exchange an agent access token for the tenant's federated downstream
    /// token.
    ///
    /// A 401 carrying `federated_connection_refresh_token_not_found` means
    /// the user has not linked the external account yet and maps to
    /// [`VaultExchange::NeedsLinking`]; every other failure is an error.
    pub async fn exchange(
        &self,
        agent_token: &str,
        tenant: &TenantConfig,
    ) -> Result<VaultExchange, ProxyError> {
        let connection = tenant.vault_connection.as_deref().ok_or_else(|| {
            ProxyError::Internal(format!("tenant '{}' has no vault connection", tenant.id))
        })?;

        let vault_token = self
            .scoped_token(
                &self.cte_client_id,
                &self.cte_client_secret,
                &self.audience,
                &self.scope,
                agent_token,
            )
            .await?;

        let payload = serde_json::json!({
            "grant_type": GRANT_TYPE_FEDERATED_CONNECTION_TOKEN,
            "client_id": self.cte_client_id,
            "client_secret": self.cte_client_secret,
            "subject_token": vault_token,
            "subject_token_type": TOKEN_TYPE_ACCESS_TOKEN,
            "requested_token_type": TOKEN_TYPE_FEDERATED_CONNECTION_TOKEN,
            "connection": connection,
        });

        let response = self
            .http
            .post(self.token_endpoint())
            .json(&payload)
            .timeout(EXCHANGE_TIMEOUT)
            .send()
            .await
            .map_err(ProxyError::from_transport)?;

        let status = response.status();
        let body: serde_json::Value = response.json().await.unwrap_or_default();

        if status.as_u16() == 401 {
            let code = body.get("error").and_then(|v| v.as_str()).unwrap_or("");
            if code == ERROR_REFRESH_TOKEN_NOT_FOUND {
                return Ok(VaultExchange::NeedsLinking);
            }
        }
        if !status.is_success() {
            return Err(upstream_error(status.as_u16(), &body));
        }

        body.get("access_token")
            .and_then(|v| v.as_str())
            .map(|s| VaultExchange::Ok {
                access_token: s.to_string(),
            })
            .ok_or_else(|| {
                ProxyError::Internal("vault exchange response missing access_token".to_string())
            })
    }

    /// Initiate a connected-accounts linking session for the tenant's
    /// federated connection.
    ///
    /// Mints a fresh `link_state` for the callback correlation; the caller
    /// records the [`LinkStart`] in the correlation store before redirecting
    /// the browser to `link_url`.
    pub async fn begin_link(
        &self,
        agent_token: &str,
        tenant: &TenantConfig,
        redirect_uri: &str,
    ) -> Result<LinkStart, ProxyError> {
        let connection = tenant.vault_connection.as_deref().ok_or_else(|| {
            ProxyError::Internal(format!("tenant '{}' has no vault connection", tenant.id))
        })?;

        let me_token = self.connected_accounts_token(agent_token).await?;
        let link_state = random_urlsafe(32);
        let scopes = rewrite_scopes(&tenant.external_scopes);

        let payload = serde_json::json!({
            "connection": connection,
            "redirect_uri": redirect_uri,
            "state": link_state,
            "scopes": scopes,
        });

        let response = self
            .http
            .post(format!("{}/me/v1/connected-accounts/connect", self.base))
            .bearer_auth(&me_token)
            .json(&payload)
            .timeout(EXCHANGE_TIMEOUT)
            .send()
            .await
            .map_err(ProxyError::from_transport)?;

        let status = response.status();
        if !status.is_success() {
            let body: serde_json::Value = response.json().await.unwrap_or_default();
            return Err(upstream_error(status.as_u16(), &body));
        }

        let connect: ConnectResponse = response.json().await.map_err(|e| {
            ProxyError::Internal(format!("malformed connect response: {}", e))
        })?;

        let link_url = format!(
            "{}?ticket={}",
            connect.connect_uri,
            urlencoding::encode(&connect.connect_params.ticket)
        );

        Ok(LinkStart {
            link_url,
            auth_session: connect.auth_session,
            state: link_state,
        })
    }

    /// Complete a linking session after the provider redirected back.
    ///
    /// The connected-accounts vault token is re-derived from the agent
    /// token that began the link.
    pub async fn complete_link(
        &self,
        auth_session: &str,
        connect_code: &str,
        redirect_uri: &str,
        agent_token: &str,
    ) -> Result<(), ProxyError> {
        let me_token = self.connected_accounts_token(agent_token).await?;

        let payload = serde_json::json!({
            "auth_session": auth_session,
            "connect_code": connect_code,
            "redirect_uri": redirect_uri,
        });

        let response = self
            .http
            .post(format!("{}/me/v1/connected-accounts/complete", self.base))
            .bearer_auth(&me_token)
            .json(&payload)
            .timeout(EXCHANGE_TIMEOUT)
            .send()
            .await
            .map_err(ProxyError::from_transport)?;

        let status = response.status();
        if !status.is_success() {
            let body: serde_json::Value = response.json().await.unwrap_or_default();
            return Err(upstream_error(status.as_u16(), &body));
        }
        Ok(())
    }

    /// Vault token scoped to the connected-accounts API.
    async fn connected_accounts_token(&self, agent_token: &str) -> Result<String, ProxyError> {
        let audience = format!("{}/me/", self.base);
        self.scoped_token(
            &self.vault_client_id,
            &self.vault_client_secret,
            &audience,
            CONNECTED_ACCOUNTS_SCOPE,
            agent_token,
        )
        .await
    }

    /// Internal custom token exchange at the vault's authorization server:
    /// agent access token in, vault-scoped access token out.
    async fn scoped_token(
        &self,
        client_id: &str,
        client_secret: &str,
        audience: &str,
        scope: &str,
        subject_token: &str,
    ) -> Result<String, ProxyError> {
        let scope = rewrite_scope_string(scope);

        let mut params = HashMap::new();
        params.insert("grant_type", GRANT_TYPE_TOKEN_EXCHANGE);
        params.insert("client_id", client_id);
        params.insert("client_secret", client_secret);
        params.insert("audience", audience);
        params.insert("scope", &scope);
        params.insert("subject_token", subject_token);
        params.insert("subject_token_type", TOKEN_TYPE_AGENT_ACCESS_TOKEN);
        params.insert("requested_token_type", TOKEN_TYPE_ACCESS_TOKEN);

        let endpoint = self.token_endpoint();
        let body = post_form(&self.http, &endpoint, &params).await?;
        body.get("access_token")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| {
                ProxyError::Internal("vault token response missing access_token".to_string())
            })
    }
}

/// Compatibility shim: callers may request a `refresh_token` scope
/// placeholder; the vault only understands `offline_access`.
fn rewrite_scopes(scopes: &[String]) -> Vec<String> {
    scopes
        .iter()
        .map(|s| {
            if s == "refresh_token" {
                "offline_access".to_string()
            } else {
                s.clone()
            }
        })
        .collect()
}

fn rewrite_scope_string(scope: &str) -> String {
    scope
        .split_whitespace()
        .map(|s| if s == "refresh_token" { "offline_access" } else { s })
        .collect::<Vec<_>>()
        .join(" ")
}

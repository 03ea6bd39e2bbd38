/// Janus configuration models.
///
/// This module defines the user-facing configuration structures: the
/// per-tenant records read from the tenant file and the process-wide
/// settings assembled from CLI arguments and environment variables.
use serde::{Deserialize, Serialize};

use super::defaults;

/// A single downstream tenant served by the proxy.
///
/// Tenants are read once at startup from the JSON tenant file and are
/// immutable afterwards; there is no mutation API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TenantConfig {
    /// Tenant identifier; first path segment on the forwarding routes.
    pub id: String,

    /// Human-readable name, surfaced in the protected-resource metadata.
    #[serde(default)]
    pub name: String,

    /// Base URL of the tenant's backend API.
    pub backend_url: String,

    /// Issuer URL of the tenant's upstream authorization server. Inbound
    /// bearer tokens must carry exactly this `iss`.
    pub issuer: String,

    /// JWKS document URL for inbound token verification.
    pub jwks_url: String,

    /// Federated connection name at the token vault. When absent the
    /// forwarder relays requests without brokering a downstream token.
    #[serde(default)]
    pub vault_connection: Option<String>,

    /// Scopes requested from the external provider during token exchange
    /// and account linking.
    #[serde(default)]
    pub external_scopes: Vec<String>,
}

/// TLS material paths for the listener.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct TlsConfig {
    /// TLS private key path.
    pub key: Option<String>,
    /// TLS certificate path.
    pub cert: Option<String>,
}

/// Process-wide settings, immutable after startup.
///
/// Field-for-field these mirror the environment surface: `PORT`,
/// `PROXY_BASE_URL`, `OKTA_DOMAIN`, `AUTH0_DOMAIN`, the CTE/vault client
/// credential pairs, the login client pair, and the agent signing identity.
#[derive(Debug, Clone)]
pub struct Settings {
    pub port: u16,

    /// Externally visible base URL of this proxy (no trailing slash);
    /// redirect URIs and metadata documents are derived from it.
    pub proxy_base_url: String,

    /// Upstream IdP domain (bare host or full URL).
    pub okta_domain: String,

    /// Token vault domain (bare host or full URL).
    pub auth0_domain: String,

    /// Custom-token-exchange client at the vault.
    pub cte_client_id: String,
    pub cte_client_secret: String,

    /// Connected-accounts client at the vault.
    pub vault_client_id: String,
    pub vault_client_secret: String,

    /// Audience and scope for the vault-scoped exchange token.
    pub vault_audience: String,
    pub vault_scope: String,

    /// OIDC login client at the IdP used for the initial `openid profile`
    /// leg of the browser flow.
    pub login_client_id: String,
    pub login_client_secret: String,

    /// Agent client at the IdP, authenticated by private-key JWT.
    pub agent_client_id: String,
    pub agent_private_key_path: Option<String>,
    pub agent_private_key_id: Option<String>,

    /// Expected audience for inbound bearer tokens; unset disables the
    /// audience check.
    pub expected_audience: Option<String>,

    /// Accept audience values that merely start with the expected audience.
    /// Compatibility switch for the legacy behavior; off means equality or
    /// list membership.
    pub audience_prefix_match: bool,

    /// Comma-separated CORS origins, "*" for any, unset disables CORS.
    pub cors_origins: Option<String>,

    pub tls: TlsConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            port: crate::server::constants::DEFAULT_PORT,
            proxy_base_url: defaults::default_proxy_base_url(),
            okta_domain: String::new(),
            auth0_domain: String::new(),
            cte_client_id: String::new(),
            cte_client_secret: String::new(),
            vault_client_id: String::new(),
            vault_client_secret: String::new(),
            vault_audience: String::new(),
            vault_scope: String::new(),
            login_client_id: String::new(),
            login_client_secret: String::new(),
            agent_client_id: String::new(),
            agent_private_key_path: None,
            agent_private_key_id: None,
            expected_audience: None,
            audience_prefix_match: false,
            cors_origins: None,
            tls: TlsConfig::default(),
        }
    }
}

impl Settings {
    /// Base URL of the IdP, normalizing bare domains to https.
    pub fn idp_base(&self) -> String {
        normalize_base(&self.okta_domain)
    }

    /// Base URL of the token vault, normalizing bare domains to https.
    pub fn vault_base(&self) -> String {
        normalize_base(&self.auth0_domain)
    }

    /// Redirect URI the IdP sends the browser back to.
    pub fn oidc_callback_uri(&self) -> String {
        format!("{}/callback", self.proxy_base_url.trim_end_matches('/'))
    }

    /// Redirect URI the vault's link provider sends the browser back to.
    pub fn link_callback_uri(&self) -> String {
        format!(
            "{}/connected_account_callback",
            self.proxy_base_url.trim_end_matches('/')
        )
    }
}

/// Bare domains are taken to be https; anything already carrying a scheme
/// is used verbatim (lets tests point at plain-http mock servers).
fn normalize_base(domain: &str) -> String {
    let trimmed = domain.trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    }
}

//! Janus server entry point.
//!
//! This module contains the main entry point for the Janus authentication
//! proxy. It handles command-line argument parsing, tenant configuration
//! loading, and server startup.
//!
//! # Responsibilities
//!
//! - Parse CLI arguments and environment variables (via Clap)
//! - Load the tenant registry from the JSON tenant file
//! - Initialize logging and application state
//! - Load the agent signing key
//! - Start the HTTP(S) server
//!
//! # Application Lifecycle
//!
//! The server follows a structured initialization sequence:
//! 1. **Unknown** → Parse CLI args and initialize state
//! 2. **Initializing** → Load configuration and build state
//! 3. **StartingNetwork** → Bind the listener
//! 4. **Ready** → Server is fully operational
//! 5. **Terminating** → Server is shutting down

use clap::{CommandFactory, FromArgMatches, Parser};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::fmt;

use janus::{
    config::{Settings, TenantRegistry, TlsConfig},
    server::service,
    state::{AppState, ApplicationState},
};

/// CLI arguments definition for the Janus server.
///
/// This struct defines all command-line arguments and environment variables
/// supported by the server. Field documentation is used by Clap to generate
/// help text, so keep them in rustdoc format.
#[derive(Parser, Debug, Clone)]
#[command(name = "janus", version, about = "Janus authentication proxy", long_about = None)]
struct Args {
    /// Tenant file path (JSON array of tenant records)
    #[arg(long = "config-path", value_name = "FILE", env = "CONFIG_PATH")]
    config_path: Option<std::path::PathBuf>,

    /// Listen port
    #[arg(long = "port", value_name = "PORT", env = "PORT", default_value_t = janus::server::constants::DEFAULT_PORT)]
    port: u16,

    /// Externally visible base URL of this proxy
    #[arg(long = "proxy-base-url", value_name = "URL", env = "PROXY_BASE_URL")]
    proxy_base_url: Option<String>,

    /// Upstream IdP domain
    #[arg(long = "okta-domain", value_name = "DOMAIN", env = "OKTA_DOMAIN", default_value = "")]
    okta_domain: String,

    /// Token vault domain
    #[arg(long = "auth0-domain", value_name = "DOMAIN", env = "AUTH0_DOMAIN", default_value = "")]
    auth0_domain: String,

    /// Custom-token-exchange client id at the vault
    #[arg(long = "cte-client-id", env = "AUTH0_CTE_CLIENT_ID", default_value = "")]
    cte_client_id: String,

    /// Custom-token-exchange client secret at the vault
    #[arg(long = "cte-client-secret", env = "AUTH0_CTE_CLIENT_SECRET", default_value = "")]
    cte_client_secret: String,

    /// Connected-accounts client id at the vault
    #[arg(long = "vault-client-id", env = "AUTH0_VAULT_CLIENT_ID", default_value = "")]
    vault_client_id: String,

    /// Connected-accounts client secret at the vault
    #[arg(long = "vault-client-secret", env = "AUTH0_VAULT_CLIENT_SECRET", default_value = "")]
    vault_client_secret: String,

    /// Audience for the vault-scoped exchange token
    #[arg(long = "vault-audience", env = "AUTH0_VAULT_AUDIENCE", default_value = "")]
    vault_audience: String,

    /// Scope for the vault-scoped exchange token
    #[arg(long = "vault-scope", env = "AUTH0_VAULT_SCOPE", default_value = "")]
    vault_scope: String,

    /// OIDC login client id at the IdP
    #[arg(long = "login-client-id", env = "VSCODE_CLIENT", default_value = "")]
    login_client_id: String,

    /// OIDC login client secret at the IdP
    #[arg(long = "login-client-secret", env = "VSCODE_SECRET", default_value = "")]
    login_client_secret: String,

    /// Agent client id at the IdP (private-key JWT client)
    #[arg(long = "agent-client-id", env = "AGENT_CLIENT_ID", default_value = "")]
    agent_client_id: String,

    /// Path to the agent's RSA private key PEM
    #[arg(long = "agent-private-key-path", env = "AGENT_PRIVATE_KEY_PATH")]
    agent_private_key_path: Option<String>,

    /// Key id placed in the agent client assertion header
    #[arg(long = "agent-private-key-id", env = "AGENT_PRIVATE_KEY_ID")]
    agent_private_key_id: Option<String>,

    /// Expected audience for inbound bearer tokens
    #[arg(long = "expected-audience", env = "EXPECTED_AUDIENCE")]
    expected_audience: Option<String>,

    /// Accept audiences that merely start with the expected audience
    #[arg(
        long = "audience-prefix-match",
        env = "AUDIENCE_PREFIX_MATCH",
        default_value = "false"
    )]
    audience_prefix_match: bool,

    /// CORS origins ("*" or comma-separated list); unset disables CORS
    #[arg(long = "cors-origins", env = "CORS_ORIGINS")]
    cors_origins: Option<String>,

    /// TLS certificate path; together with --tls-key enables HTTPS
    #[arg(long = "tls-cert", env = "TLS_CERT")]
    tls_cert: Option<String>,

    /// TLS private key path
    #[arg(long = "tls-key", env = "TLS_KEY")]
    tls_key: Option<String>,
}

impl Args {
    fn into_settings(self) -> Settings {
        let proxy_base_url = self
            .proxy_base_url
            .unwrap_or_else(|| format!("http://localhost:{}", self.port));
        Settings {
            port: self.port,
            proxy_base_url,
            okta_domain: self.okta_domain,
            auth0_domain: self.auth0_domain,
            cte_client_id: self.cte_client_id,
            cte_client_secret: self.cte_client_secret,
            vault_client_id: self.vault_client_id,
            vault_client_secret: self.vault_client_secret,
            vault_audience: self.vault_audience,
            vault_scope: self.vault_scope,
            login_client_id: self.login_client_id,
            login_client_secret: self.login_client_secret,
            agent_client_id: self.agent_client_id,
            agent_private_key_path: self.agent_private_key_path,
            agent_private_key_id: self.agent_private_key_id,
            expected_audience: self.expected_audience,
            audience_prefix_match: self.audience_prefix_match,
            cors_origins: self.cors_origins,
            tls: TlsConfig {
                cert: self.tls_cert,
                key: self.tls_key,
            },
        }
    }
}

/// Main entry point for the Janus server.
///
/// # Returns
/// - `Ok(())` if the server starts and runs successfully
/// - `Err(anyhow::Error)` if initialization or execution fails
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command-line arguments
    let matches = Args::command().get_matches();
    let args = Args::from_arg_matches(&matches).expect("invalid args");

    // Initialize logging
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let fmt_layer = fmt::layer().with_target(false).compact();
    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(tracing_subscriber::filter::EnvFilter::new(env_filter))
        .init();

    // Load the tenant registry
    let tenant_path = args
        .config_path
        .clone()
        .unwrap_or_else(TenantRegistry::default_path);
    let tenants = TenantRegistry::load(&tenant_path)?;
    tracing::info!("Loaded {} tenant(s) from {:?}", tenants.len(), tenant_path);

    // Build shared application state
    let state = std::sync::Arc::new(AppState::new(args.into_settings(), tenants)?);
    state.set_state(ApplicationState::Initializing);

    // Initialize metrics collection if enabled
    janus::metrics::init();

    // Initialize AWS-LC cryptographic provider for TLS
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .expect("Failed to install AWS-LC provider");

    // Start the server
    match service::start(state).await {
        Ok(_) => tracing::debug!("Server has exited"),
        Err(e) => tracing::error!("Server execution failed: {:?}", e),
    }

    Ok(())
}

/// The application state is responsible for:
///
/// - Maintaining the lifecycle state of the server
/// - Hosting the tenant registry and the correlation store
/// - Owning the outbound HTTP client and the upstream service clients
use crate::{
    config::{Settings, TenantRegistry},
    errors::StartupError,
    server::auth::InboundAuthorizer,
    server::constants::REQUEST_USER_AGENT,
    server::correlation::CorrelationStore,
    server::idp::IdpClient,
    server::signing::{DynSigner, load_pem_signer_from_path},
    server::vault::VaultClient,
};

use std::sync::{
    Arc,
    atomic::{AtomicU8, Ordering},
};

use tracing::debug;

/** Application lifecycle states. */
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ApplicationState {
    /// Unknown state, typically the initial state.
    Unknown = 0,
    /// The application is initializing.
    Initializing = 1,
    /// Starting network services.
    StartingNetwork = 2,
    /// The application is ready to serve requests.
    Ready = 3,
    /// The application is terminating.
    Terminating = 4,
}

// Shared application state.
//
// One instance is built at startup and shared by every handler. Everything
// here is either immutable after construction or internally synchronized.
pub struct AppState {
    /// Process-wide settings.
    pub settings: Settings,
    /// Read-only tenant registry.
    pub tenants: TenantRegistry,
    /// Outbound HTTP client, shared by all upstream calls.
    pub http: reqwest::Client,
    /// Correlation state for in-flight browser flows.
    pub correlation: Arc<CorrelationStore>,
    /// Inbound bearer validation for the forwarding path.
    pub authorizer: InboundAuthorizer,
    /// Upstream IdP exchange client.
    pub idp: IdpClient,
    /// Token vault client.
    pub vault: VaultClient,
    /// Agent signing key, when configured.
    pub signer: Option<DynSigner>,
    /// Current application lifecycle state.
    pub state: AtomicU8,
}

impl AppState {
    /// Build the shared state from settings and the loaded tenant registry.
    ///
    /// Fails when the HTTP client cannot be constructed or the configured
    /// agent signing key cannot be loaded.
    pub fn new(settings: Settings, tenants: TenantRegistry) -> Result<Self, StartupError> {
        let http = reqwest::Client::builder()
            .user_agent(REQUEST_USER_AGENT)
            .build()
            .map_err(|e| StartupError::Other(format!("failed to create HTTP client: {}", e)))?;

        let signer = match settings.agent_private_key_path.as_deref() {
            Some(path) if !path.is_empty() => {
                let signer =
                    load_pem_signer_from_path(path, settings.agent_private_key_id.as_deref())
                        .map_err(|e| StartupError::SigningMisconfigured(e.to_string()))?;
                Some(signer)
            }
            _ => {
                tracing::warn!(
                    "no agent signing key configured; IdP token exchange is unavailable"
                );
                None
            }
        };

        let authorizer = InboundAuthorizer::new(
            http.clone(),
            settings.expected_audience.clone(),
            settings.audience_prefix_match,
        );
        let idp = IdpClient::new(http.clone(), &settings, signer.clone());
        let vault = VaultClient::new(http.clone(), &settings);

        Ok(Self {
            settings,
            tenants,
            http,
            correlation: Arc::new(CorrelationStore::new()),
            authorizer,
            idp,
            vault,
            signer,
            state: AtomicU8::new(ApplicationState::Unknown as u8),
        })
    }

    /// Replace the correlation store; used by expiry tests that need a
    /// shorter TTL than the production policy.
    pub fn with_correlation_store(mut self, store: CorrelationStore) -> Self {
        self.correlation = Arc::new(store);
        self
    }

    /// Set application lifecycle state.
    pub fn set_state(&self, value: ApplicationState) {
        let v = value as u8;
        debug!("Application state changed to {:?}", v);
        self.state.store(v, Ordering::Relaxed);
    }

    /// Returns true if the application is running (liveness check).
    pub fn is_alive(&self) -> bool {
        let state = self.state.load(Ordering::SeqCst);
        state >= ApplicationState::Initializing as u8 && state < ApplicationState::Terminating as u8
    }

    /// Returns true if the application is ready to serve requests.
    pub fn is_ready(&self) -> bool {
        self.state.load(Ordering::SeqCst) >= ApplicationState::Ready as u8
    }
}

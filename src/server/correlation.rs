//! Short-lived correlation state carried across redirect hops.
//!
//! The browser flow spans four independent redirects and three cooperating
//! external services; the only thing tying those requests together are the
//! high-entropy keys minted here. Each namespace is an in-memory TTL map:
//! entries expire 15 minutes after creation, expiry is evicted lazily at
//! read time, and a background sweeper reclaims whatever nobody reads.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use rand::RngCore;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::server::constants::CORRELATION_TTL;

/// Inbound authorize request captured verbatim at `/authorize/{tenant}`.
///
/// Replayed at `/token` to rebind the client identity and the PKCE
/// challenge, and at the final redirect to round-trip the client state.
#[derive(Debug, Clone)]
pub struct InboundAuthorizeContext {
    pub tenant_id: String,
    /// Opaque client state, echoed byte-for-byte on the final redirect.
    pub state: Option<String>,
    pub client_id: Option<String>,
    pub redirect_uri: String,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
    /// Raw query bag as received, for later replay.
    pub params: HashMap<String, String>,
}

/// Agent access token material staged between the OIDC callback and the
/// final return-code mint.
#[derive(Debug, Clone)]
pub struct StagedAgentToken {
    pub access_token: String,
    pub scope: Option<String>,
    pub expires_in: Option<u64>,
    pub id_token: Option<String>,
}

/// Entry keyed by `outbound_state`: binds the inbound client flow to the
/// outbound IdP flow. Written without tokens at `/authorize`; the staged
/// token is added in place only when the callback detects that account
/// linking is required.
#[derive(Debug, Clone)]
pub struct OidcOutbound {
    pub inbound: InboundAuthorizeContext,
    pub staged: Option<StagedAgentToken>,
}

/// Entry keyed by `link_state`: one in-progress connected-accounts linking
/// session at the vault.
#[derive(Debug, Clone)]
pub struct LinkSession {
    /// The `outbound_state` of the flow that required linking.
    pub oidc_state: String,
    /// Opaque session handle returned by the vault's connect call.
    pub auth_session: String,
    /// The agent access token on whose behalf the link was begun.
    pub user_token: String,
    pub created_at: DateTime<Utc>,
}

/// Entry keyed by the single-use authorization code handed back to the
/// client; consumed atomically by `/token`.
#[derive(Debug, Clone)]
pub struct ReturnCode {
    pub token: StagedAgentToken,
    pub original: InboundAuthorizeContext,
}

struct Entry<V> {
    value: V,
    expires_at: Instant,
}

/// A concurrency-safe map whose entries expire a fixed interval after
/// creation. Expired entries are evicted on the read that observes them.
pub struct TtlMap<V> {
    inner: RwLock<HashMap<String, Entry<V>>>,
    ttl: Duration,
}

impl<V: Clone> TtlMap<V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Insert a value under `key` with a fresh TTL.
    pub async fn put(&self, key: impl Into<String>, value: V) {
        let entry = Entry {
            value,
            expires_at: Instant::now() + self.ttl,
        };
        self.inner.write().await.insert(key.into(), entry);
    }

    /// Replace the value under `key`, keeping the original expiry, so
    /// in-place updates never stretch an entry's lifetime. No-op when the
    /// key is absent or already expired.
    pub async fn update(&self, key: &str, value: V) -> bool {
        let mut map = self.inner.write().await;
        match map.get_mut(key) {
            Some(entry) if entry.expires_at > Instant::now() => {
                entry.value = value;
                true
            }
            _ => false,
        }
    }

    /// Look up `key`, evicting it if expired.
    pub async fn get(&self, key: &str) -> Option<V> {
        {
            let map = self.inner.read().await;
            if let Some(entry) = map.get(key) {
                if Instant::now() < entry.expires_at {
                    return Some(entry.value.clone());
                }
            } else {
                return None;
            }
        }
        // Entry expired; remove it under the write lock.
        self.inner.write().await.remove(key);
        None
    }

    /// Atomic read-and-delete. Exactly one caller ever obtains a given
    /// entry; everyone after gets `None`.
    pub async fn take(&self, key: &str) -> Option<V> {
        let mut map = self.inner.write().await;
        let entry = map.remove(key)?;
        if Instant::now() < entry.expires_at {
            Some(entry.value)
        } else {
            None
        }
    }

    pub async fn delete(&self, key: &str) {
        self.inner.write().await.remove(key);
    }

    /// Drop every expired entry.
    pub async fn sweep(&self) {
        let now = Instant::now();
        self.inner.write().await.retain(|_, e| e.expires_at > now);
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }
}

/// The four correlation namespaces behind the browser flow. One instance is
/// shared by all handlers; the JWKS key family lives with the inbound
/// authorizer since its TTL policy differs.
pub struct CorrelationStore {
    /// outbound_state -> in-flight OIDC flow.
    pub oidc: TtlMap<OidcOutbound>,
    /// link_state -> in-progress connected-accounts linking.
    pub links: TtlMap<LinkSession>,
    /// return code -> staged token awaiting `/token`.
    pub codes: TtlMap<ReturnCode>,
}

impl CorrelationStore {
    pub fn new() -> Self {
        Self::with_ttl(CORRELATION_TTL)
    }

    /// Build a store with a custom TTL; used by expiry tests.
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            oidc: TtlMap::new(ttl),
            links: TtlMap::new(ttl),
            codes: TtlMap::new(ttl),
        }
    }

    pub async fn sweep(&self) {
        self.oidc.sweep().await;
        self.links.sweep().await;
        self.codes.sweep().await;
    }
}

impl Default for CorrelationStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Starts the periodic sweeper for the correlation store.
///
/// Lazy read-time eviction already upholds the TTL contract; the sweeper
/// only bounds memory for entries nobody ever reads back.
pub fn start_sweeper(store: Arc<CorrelationStore>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(300));
        loop {
            interval.tick().await;
            store.sweep().await;
            tracing::debug!("Performed correlation store sweep");
        }
    });
}

/// Generates a URL-safe random string.
///
/// Uses cryptographically secure random bytes and base64url encoding.
///
/// # Arguments
///
/// * `bytes` - Number of random bytes to generate.
///
/// # Returns
///
/// A URL-safe base64-encoded random string.
pub fn random_urlsafe(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::rng().fill_bytes(&mut buf);
    URL_SAFE_NO_PAD.encode(buf)
}

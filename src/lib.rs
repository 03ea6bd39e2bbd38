//! Janus - a multi-tenant authentication proxy.
//!
//! To its clients Janus looks like a standards-compliant OAuth 2.0 / OIDC
//! authorization server and resource server. Internally it orchestrates a
//! multi-hop token exchange: it authenticates the user at an upstream
//! identity provider, obtains an agent-bound access token via RFC 8693
//! token exchange and an identity-assertion JWT authorization grant, and
//! asks a token vault for the user's federated credential for the target
//! connection, walking the user through account linking when the vault has
//! none. At request time it swaps the client's bearer token for the
//! vaulted downstream credential and forwards the call to the tenant's
//! backend.

pub mod config;
pub mod errors;
pub mod metrics;
pub mod server;
pub mod state;

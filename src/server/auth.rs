//! Inbound bearer-token validation.
//!
//! This module provides the request-time authentication for the forwarding
//! path: bearer extraction, per-tenant issuer pinning, RS256 signature
//! verification against the tenant's JWKS, and the optional audience and
//! scope checks.

use axum::http::{HeaderMap, Method, StatusCode, header};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header, jwk::JwkSet};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::server::constants::{JWKS_FETCH_TIMEOUT, JWKS_TTL};
use crate::server::correlation::TtlMap;

/// Audience can be a single string or an array of strings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Audience {
    #[default]
    None,
    Single(String),
    Multiple(Vec<String>),
}

impl Audience {
    pub fn contains(&self, aud: &str) -> bool {
        match self {
            Audience::None => false,
            Audience::Single(s) => s == aud,
            Audience::Multiple(v) => v.iter().any(|s| s == aud),
        }
    }

    pub fn any_starts_with(&self, prefix: &str) -> bool {
        match self {
            Audience::None => false,
            Audience::Single(s) => s.starts_with(prefix),
            Audience::Multiple(v) => v.iter().any(|s| s.starts_with(prefix)),
        }
    }
}

/// Claims extracted from a validated inbound bearer token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BearerClaims {
    pub iss: String,

    #[serde(default)]
    pub sub: Option<String>,

    #[serde(default)]
    pub aud: Audience,

    pub exp: u64,

    #[serde(default)]
    pub iat: u64,

    /// Okta-style scope array.
    #[serde(default)]
    pub scp: Option<Vec<String>>,

    /// Space-separated scope string (generic OAuth shape).
    #[serde(default)]
    pub scope: Option<String>,

    /// All other claims, kept for downstream policy hooks.
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl BearerClaims {
    /// Scope list regardless of which claim shape the issuer used.
    pub fn scopes(&self) -> Vec<String> {
        if let Some(scp) = &self.scp {
            return scp.clone();
        }
        self.scope
            .as_deref()
            .map(|s| s.split_whitespace().map(|p| p.to_string()).collect())
            .unwrap_or_default()
    }
}

/// Distinct failure modes of the key cache: an unreachable document is not
/// the same as a document with no matching key.
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("failed to fetch JWKS: {0}")]
    Fetch(String),

    #[error("no JWK matching kid '{0}'")]
    NotFound(String),
}

/// Caches decoding keys by `(jwks_url, kid)` for up to one hour; expiry is
/// lazy on the next read.
pub struct JwksKeyCache {
    http: reqwest::Client,
    keys: TtlMap<DecodingKey>,
}

impl JwksKeyCache {
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            http,
            keys: TtlMap::new(JWKS_TTL),
        }
    }

    /// Look up the signing key for `kid` at `jwks_url`, fetching the JWKS
    /// document on a cache miss.
    pub async fn signing_key(&self, jwks_url: &str, kid: &str) -> Result<DecodingKey, KeyError> {
        let cache_key = format!("{}|{}", jwks_url, kid);
        if let Some(key) = self.keys.get(&cache_key).await {
            return Ok(key);
        }

        let response = self
            .http
            .get(jwks_url)
            .timeout(JWKS_FETCH_TIMEOUT)
            .send()
            .await
            .map_err(|e| KeyError::Fetch(e.to_string()))?
            .error_for_status()
            .map_err(|e| KeyError::Fetch(e.to_string()))?;

        let jwks: JwkSet = response
            .json()
            .await
            .map_err(|e| KeyError::Fetch(format!("invalid JWKS document: {}", e)))?;

        let jwk = jwks
            .keys
            .iter()
            .find(|k| k.common.key_id.as_deref() == Some(kid))
            .ok_or_else(|| KeyError::NotFound(kid.to_string()))?;

        let key =
            DecodingKey::from_jwk(jwk).map_err(|e| KeyError::Fetch(format!("bad JWK: {}", e)))?;
        self.keys.put(cache_key, key.clone()).await;
        Ok(key)
    }
}

/// A denied request: HTTP status, RFC 6750 error code, and a message for
/// the `WWW-Authenticate` header / body.
#[derive(Debug)]
pub struct Denial {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

impl Denial {
    fn unauthorized(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            code: "invalid_token",
            message: message.into(),
        }
    }

    fn forbidden(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::FORBIDDEN,
            code: "insufficient_scope",
            message: message.into(),
        }
    }
}

/// A bearer token that passed validation, with its raw string (needed for
/// the vault exchange) and decoded claims.
#[derive(Debug, Clone)]
pub struct AuthorizedBearer {
    pub token: String,
    pub claims: BearerClaims,
}

/// Validates inbound bearer JWTs for the forwarding path.
pub struct InboundAuthorizer {
    jwks: JwksKeyCache,
    expected_audience: Option<String>,
    audience_prefix_match: bool,
    /// Scope policy hook: receives the token's scopes and the HTTP method.
    /// The default admits everything; deployments and tests can install a
    /// stricter policy.
    scope_check: fn(&[String], &Method) -> bool,
}

impl InboundAuthorizer {
    pub fn new(
        http: reqwest::Client,
        expected_audience: Option<String>,
        audience_prefix_match: bool,
    ) -> Self {
        Self {
            jwks: JwksKeyCache::new(http),
            expected_audience,
            audience_prefix_match,
            scope_check: |_, _| true,
        }
    }

    pub fn with_scope_check(mut self, check: fn(&[String], &Method) -> bool) -> Self {
        self.scope_check = check;
        self
    }

    pub fn key_cache(&self) -> &JwksKeyCache {
        &self.jwks
    }

    /// Validate the bearer token on `headers` against `tenant`.
    ///
    /// Returns the raw token and its claims on success. Parse, signature,
    /// and key-fetch failures are 401; issuer/audience/scope mismatches are
    /// 403.
    pub async fn authorize(
        &self,
        tenant: &crate::config::TenantConfig,
        headers: &HeaderMap,
        method: &Method,
    ) -> Result<AuthorizedBearer, Denial> {
        let token = extract_bearer(headers)
            .ok_or_else(|| Denial::unauthorized("missing bearer token"))?;

        let header = decode_header(&token)
            .map_err(|e| Denial::unauthorized(format!("malformed token header: {}", e)))?;
        let kid = header
            .kid
            .ok_or_else(|| Denial::unauthorized("token header does not contain 'kid'"))?;

        // Issuer comes from the unverified payload; it selects the key
        // source, and the signature check below makes the claim trustworthy.
        let issuer = unverified_issuer(&token)
            .ok_or_else(|| Denial::unauthorized("token payload is not decodable"))?;
        if issuer != tenant.issuer {
            return Err(Denial::forbidden(format!(
                "token issuer '{}' does not match tenant issuer",
                issuer
            )));
        }

        let key = self
            .jwks
            .signing_key(&tenant.jwks_url, &kid)
            .await
            .map_err(|e| Denial::unauthorized(e.to_string()))?;

        let mut validation = Validation::new(Algorithm::RS256);
        // Audience is checked below with the configured policy.
        validation.validate_aud = false;
        let data = decode::<BearerClaims>(&token, &key, &validation)
            .map_err(|e| Denial::unauthorized(format!("token validation failed: {}", e)))?;
        let claims = data.claims;

        if let Some(expected) = &self.expected_audience {
            let matched = claims.aud.contains(expected)
                || (self.audience_prefix_match && claims.aud.any_starts_with(expected));
            if !matched {
                return Err(Denial::forbidden("token audience mismatch"));
            }
        }

        if !(self.scope_check)(&claims.scopes(), method) {
            return Err(Denial::forbidden("insufficient scope"));
        }

        Ok(AuthorizedBearer { token, claims })
    }
}

/// Pulls the token out of `Authorization: Bearer <token>`, scheme
/// case-insensitive.
fn extract_bearer(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

/// Decodes the payload segment without verifying the signature, returning
/// the `iss` claim.
fn unverified_issuer(token: &str) -> Option<String> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload).ok()?;
    let value: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
    value.get("iss")?.as_str().map(|s| s.to_string())
}

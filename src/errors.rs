use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Token signing misconfigured: {0}")]
    SigningMisconfigured(String),

    #[error("Other startup error: {0}")]
    Other(String),
}

/// Failure taxonomy for the request path.
///
/// Every handler and client in the proxy funnels its failures into one of
/// these kinds; the HTTP status and the response body shape are derived from
/// the kind, never chosen ad hoc at the failure site.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// Bad inbound parameters (400).
    #[error("{0}")]
    Validation(String),

    /// Bearer token or correlation state invalid (401).
    #[error("{0}")]
    Authentication(String),

    /// Issuer/audience/scope mismatch or vault refusal (403).
    #[error("{0}")]
    Authorization(String),

    /// Tenant or code absent (404).
    #[error("{0}")]
    NotFound(String),

    /// No connected account for the federated connection yet (401).
    #[error("Account linking required")]
    LinkingRequired,

    /// The IdP or the vault answered with a failure; the upstream status is
    /// preserved where we have one.
    #[error("upstream returned {status}: {code}")]
    Upstream {
        status: u16,
        code: String,
        description: String,
    },

    /// Upstream unreachable (502) or timed out (504).
    #[error("{message}")]
    Gateway { status: u16, message: String },

    /// Anything unexpected and local (500). The raw cause is logged, never
    /// returned to the caller.
    #[error("{0}")]
    Internal(String),
}

impl ProxyError {
    pub fn bad_gateway(message: impl Into<String>) -> Self {
        ProxyError::Gateway {
            status: 502,
            message: message.into(),
        }
    }

    pub fn gateway_timeout(message: impl Into<String>) -> Self {
        ProxyError::Gateway {
            status: 504,
            message: message.into(),
        }
    }

    /// Maps a reqwest transport failure onto the taxonomy: connection-level
    /// failures become 502, timeouts 504, anything else is local.
    pub fn from_transport(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProxyError::gateway_timeout(format!("upstream timed out: {}", err))
        } else if err.is_connect() {
            ProxyError::bad_gateway(format!("upstream unreachable: {}", err))
        } else {
            ProxyError::Internal(format!("request failed: {}", err))
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::Validation(_) => StatusCode::BAD_REQUEST,
            ProxyError::Authentication(_) => StatusCode::UNAUTHORIZED,
            ProxyError::Authorization(_) => StatusCode::FORBIDDEN,
            ProxyError::NotFound(_) => StatusCode::NOT_FOUND,
            ProxyError::LinkingRequired => StatusCode::UNAUTHORIZED,
            ProxyError::Upstream { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            ProxyError::Gateway { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            ProxyError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// OAuth-style error code for `{error, error_description}` bodies.
    pub fn oauth_code(&self) -> &str {
        match self {
            ProxyError::Validation(_) => "invalid_request",
            ProxyError::Authentication(_) => "invalid_token",
            ProxyError::Authorization(_) => "access_denied",
            ProxyError::NotFound(_) => "not_found",
            ProxyError::LinkingRequired => "linking_required",
            ProxyError::Upstream { code, .. } => code,
            ProxyError::Gateway { status, .. } => {
                if *status == 504 {
                    "gateway_timeout"
                } else {
                    "bad_gateway"
                }
            }
            ProxyError::Internal(_) => "server_error",
        }
    }

    /// Message safe to surface to the caller. Internal causes are replaced
    /// with a generic body; the detail only goes to the log.
    pub fn public_message(&self) -> String {
        match self {
            ProxyError::Internal(detail) => {
                tracing::error!("internal error: {}", detail);
                "internal server error".to_string()
            }
            ProxyError::Upstream { description, .. } => description.clone(),
            other => other.to_string(),
        }
    }
}

/// Default rendering: the OAuth 2.0 error-response shape used by the flow
/// endpoints. The forwarder renders its own `{error, message}` shape.
impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = serde_json::json!({
            "error": self.oauth_code(),
            "error_description": self.public_message(),
        });
        (status, Json(body)).into_response()
    }
}

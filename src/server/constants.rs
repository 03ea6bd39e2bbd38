use std::time::Duration;

// user agent used for outgoing HTTP(s) requests to the IdP, vault and backends
pub const REQUEST_USER_AGENT: &str = "janus/1";

// default listen port; override with PORT
pub const DEFAULT_PORT: u16 = 3000;

// RFC 8693 / RFC 7523 grant and token type identifiers. These are wire
// constants; the upstream IdP and the vault match on them verbatim.
pub const GRANT_TYPE_TOKEN_EXCHANGE: &str = "urn:ietf:params:oauth:grant-type:token-exchange";
pub const GRANT_TYPE_JWT_BEARER: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
pub const GRANT_TYPE_FEDERATED_CONNECTION_TOKEN: &str =
    "urn:auth0:params:oauth:grant-type:token-exchange:federated-connection-access-token";
pub const CLIENT_ASSERTION_TYPE_JWT_BEARER: &str =
    "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";

pub const TOKEN_TYPE_ID_JAG: &str = "urn:ietf:params:oauth:token-type:id-jag";
pub const TOKEN_TYPE_ID_TOKEN: &str = "urn:ietf:params:oauth:token-type:id_token";
pub const TOKEN_TYPE_ACCESS_TOKEN: &str = "urn:ietf:params:oauth:token-type:access_token";
pub const TOKEN_TYPE_FEDERATED_CONNECTION_TOKEN: &str =
    "http://auth0.com/oauth/token-type/federated-connection-access-token";

// Subject token type the vault's custom-token-exchange action is configured
// to accept for agent access tokens.
pub const TOKEN_TYPE_AGENT_ACCESS_TOKEN: &str =
    "urn:okta:params:oauth:token-type:agent-access-token";

// Error code the vault returns when no connected account exists for the
// requested federated connection. Maps to the linking flow, never to a
// generic failure.
pub const ERROR_REFRESH_TOKEN_NOT_FOUND: &str = "federated_connection_refresh_token_not_found";

pub const PKCE_METHOD_S256: &str = "S256";

// Scopes for the initial OIDC leg at the IdP.
pub const OIDC_LOGIN_SCOPES: &str = "openid profile";

// Scopes for the vault's connected-accounts (me) API.
pub const CONNECTED_ACCOUNTS_SCOPE: &str =
    "create:me:connected_accounts read:me:connected_accounts delete:me:connected_accounts";

// Correlation entries carry flow state across browser redirects; anything
// older than this is a dead flow.
pub const CORRELATION_TTL: Duration = Duration::from_secs(900);
pub const JWKS_TTL: Duration = Duration::from_secs(3600);

// Outbound call timeouts.
pub const JWKS_FETCH_TIMEOUT: Duration = Duration::from_secs(5);
pub const EXCHANGE_TIMEOUT: Duration = Duration::from_secs(15);
pub const FORWARD_TIMEOUT: Duration = Duration::from_secs(30);

// Private-key JWT client assertions are minted per request and expire fast.
pub const CLIENT_ASSERTION_LIFETIME_SECS: i64 = 300;

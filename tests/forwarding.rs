//! Tests for the request-time forwarding path: inbound bearer validation
//! against a mock JWKS, vault brokering, and relay semantics against a
//! mock backend.

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use jsonwebtoken::{Algorithm, Header};
use serde_json::Value;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tower::ServiceExt;
use wiremock::matchers::{header as header_eq, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use janus::config::{Settings, TenantConfig, TenantRegistry};
use janus::server::service::build_router;
use janus::server::signing::{PemSigner, Signer};
use janus::state::AppState;

const TEST_KEY_PATH: &str = "tests/fixtures/agent_key.pem";
const ISSUER: &str = "https://issuer.test/tenant-as";

fn signer() -> PemSigner {
    let pem = std::fs::read(TEST_KEY_PATH).expect("test key fixture");
    PemSigner::from_pem(&pem, Some("test-kid")).expect("signer")
}

fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

fn sign_bearer(signer: &PemSigner, iss: &str, exp: u64, aud: Option<&str>) -> String {
    let mut claims = serde_json::json!({
        "iss": iss,
        "sub": "user1",
        "exp": exp,
        "iat": now(),
        "scp": ["repo"],
    });
    if let Some(aud) = aud {
        claims["aud"] = serde_json::json!(aud);
    }
    signer
        .sign(Header::new(Algorithm::RS256), &claims)
        .expect("sign bearer")
}

async fn mount_jwks(server: &MockServer, signer: &PemSigner) {
    Mock::given(method("GET"))
        .and(path("/jwks-doc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(signer.jwks()))
        .mount(server)
        .await;
}

fn tenant(jwks_uri: &str, backend_url: &str, vault_connection: Option<&str>) -> TenantConfig {
    TenantConfig {
        id: "github".to_string(),
        name: "GitHub".to_string(),
        backend_url: backend_url.to_string(),
        issuer: ISSUER.to_string(),
        jwks_url: jwks_uri.to_string(),
        vault_connection: vault_connection.map(|s| s.to_string()),
        external_scopes: vec!["repo".to_string()],
    }
}

fn build_state(tenants: Vec<TenantConfig>, vault_uri: &str) -> Arc<AppState> {
    let settings = Settings {
        proxy_base_url: "http://proxy.test".to_string(),
        auth0_domain: vault_uri.to_string(),
        cte_client_id: "cte-client".to_string(),
        cte_client_secret: "cte-secret".to_string(),
        vault_client_id: "vault-client".to_string(),
        vault_client_secret: "vault-secret".to_string(),
        vault_audience: "https://vault.test/api".to_string(),
        vault_scope: "exchange".to_string(),
        ..Settings::default()
    };
    Arc::new(AppState::new(settings, TenantRegistry::from_tenants(tenants)).expect("state"))
}

fn bearer_request(uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .body(Body::empty())
        .unwrap()
}

async fn json_body(resp: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json body")
}

#[tokio::test]
async fn forwards_request_and_relays_allowlisted_headers() {
    let signer = signer();
    let jwks = MockServer::start().await;
    let backend = MockServer::start().await;
    mount_jwks(&jwks, &signer).await;

    Mock::given(method("GET"))
        .and(path("/api/data"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/json")
                .insert_header("etag", "\"abc\"")
                .insert_header("x-internal", "secret")
                .set_body_json(serde_json::json!({ "ok": true })),
        )
        .mount(&backend)
        .await;

    let state = build_state(
        vec![tenant(
            &format!("{}/jwks-doc", jwks.uri()),
            &backend.uri(),
            None,
        )],
        "http://127.0.0.1:1",
    );
    let router = build_router(state);

    let token = sign_bearer(&signer, ISSUER, now() + 600, None);
    let resp = router
        .clone()
        .oneshot(bearer_request("/github/api/data?x=1&y=2", &token))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers().get("etag").unwrap(), "\"abc\"");
    assert!(resp.headers().get("x-internal").is_none());
    let body = json_body(resp).await;
    assert_eq!(body["ok"], true);

    // The backend saw the query verbatim and no inbound Authorization.
    let requests = backend.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].url.query(), Some("x=1&y=2"));
    assert!(!requests[0].headers.contains_key("authorization"));
}

#[tokio::test]
async fn forwards_post_bodies_and_mirrors_content_type() {
    let signer = signer();
    let jwks = MockServer::start().await;
    let backend = MockServer::start().await;
    mount_jwks(&jwks, &signer).await;

    Mock::given(method("POST"))
        .and(path("/api/items"))
        .respond_with(ResponseTemplate::new(201))
        .mount(&backend)
        .await;

    let state = build_state(
        vec![tenant(
            &format!("{}/jwks-doc", jwks.uri()),
            &backend.uri(),
            None,
        )],
        "http://127.0.0.1:1",
    );
    let router = build_router(state);

    let token = sign_bearer(&signer, ISSUER, now() + 600, None);
    let req = Request::builder()
        .method("POST")
        .uri("/github/api/items")
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(r#"{"name":"x"}"#))
        .unwrap();
    let resp = router.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);

    let requests = backend.received_requests().await.unwrap();
    assert_eq!(requests[0].body, br#"{"name":"x"}"#.to_vec());
    assert_eq!(
        requests[0].headers.get("content-type").unwrap(),
        "application/json"
    );
}

#[tokio::test]
async fn missing_bearer_is_401_with_www_authenticate() {
    let signer = signer();
    let jwks = MockServer::start().await;
    mount_jwks(&jwks, &signer).await;

    let state = build_state(
        vec![tenant(
            &format!("{}/jwks-doc", jwks.uri()),
            "http://127.0.0.1:1",
            None,
        )],
        "http://127.0.0.1:1",
    );
    let router = build_router(state);

    let resp = router
        .clone()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/github/api/data")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let challenge = resp
        .headers()
        .get(header::WWW_AUTHENTICATE)
        .expect("challenge")
        .to_str()
        .unwrap()
        .to_string();
    assert!(challenge.starts_with("Bearer error="));
    assert!(challenge.contains(
        "resource_metadata=\"http://proxy.test/.well-known/oauth-protected-resource/github\""
    ));
}

#[tokio::test]
async fn issuer_mismatch_is_403() {
    let signer = signer();
    let jwks = MockServer::start().await;
    mount_jwks(&jwks, &signer).await;

    let state = build_state(
        vec![tenant(
            &format!("{}/jwks-doc", jwks.uri()),
            "http://127.0.0.1:1",
            None,
        )],
        "http://127.0.0.1:1",
    );
    let router = build_router(state);

    let token = sign_bearer(&signer, "https://evil.test", now() + 600, None);
    let resp = router
        .clone()
        .oneshot(bearer_request("/github/api/data", &token))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    // Issuer pinning rejects before any JWKS fetch happens.
    assert!(jwks.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn tampered_signature_is_401() {
    let signer = signer();
    let jwks = MockServer::start().await;
    mount_jwks(&jwks, &signer).await;

    let state = build_state(
        vec![tenant(
            &format!("{}/jwks-doc", jwks.uri()),
            "http://127.0.0.1:1",
            None,
        )],
        "http://127.0.0.1:1",
    );
    let router = build_router(state);

    let mut token = sign_bearer(&signer, ISSUER, now() + 600, None);
    // Flip the last signature character.
    let last = if token.ends_with('A') { 'B' } else { 'A' };
    token.pop();
    token.push(last);

    let resp = router
        .clone()
        .oneshot(bearer_request("/github/api/data", &token))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn expired_token_is_401() {
    let signer = signer();
    let jwks = MockServer::start().await;
    mount_jwks(&jwks, &signer).await;

    let state = build_state(
        vec![tenant(
            &format!("{}/jwks-doc", jwks.uri()),
            "http://127.0.0.1:1",
            None,
        )],
        "http://127.0.0.1:1",
    );
    let router = build_router(state);

    let token = sign_bearer(&signer, ISSUER, now() - 600, None);
    let resp = router
        .clone()
        .oneshot(bearer_request("/github/api/data", &token))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn unknown_kid_is_401() {
    let signer = signer();
    let jwks = MockServer::start().await;
    mount_jwks(&jwks, &signer).await;

    // Same key material, different kid: the JWKS document has no match.
    let pem = std::fs::read(TEST_KEY_PATH).unwrap();
    let other = PemSigner::from_pem(&pem, Some("other-kid")).unwrap();

    let state = build_state(
        vec![tenant(
            &format!("{}/jwks-doc", jwks.uri()),
            "http://127.0.0.1:1",
            None,
        )],
        "http://127.0.0.1:1",
    );
    let router = build_router(state);

    let token = sign_bearer(&other, ISSUER, now() + 600, None);
    let resp = router
        .clone()
        .oneshot(bearer_request("/github/api/data", &token))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn unknown_tenant_is_404() {
    let state = build_state(vec![], "http://127.0.0.1:1");
    let router = build_router(state);

    let resp = router
        .clone()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/nope/api/data")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn jwks_key_is_cached_between_requests() {
    let signer = signer();
    let jwks = MockServer::start().await;
    let backend = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/jwks-doc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(signer.jwks()))
        .expect(1)
        .mount(&jwks)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/data"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&backend)
        .await;

    let state = build_state(
        vec![tenant(
            &format!("{}/jwks-doc", jwks.uri()),
            &backend.uri(),
            None,
        )],
        "http://127.0.0.1:1",
    );
    let router = build_router(state);

    let token = sign_bearer(&signer, ISSUER, now() + 600, None);
    for _ in 0..2 {
        let resp = router
            .clone()
            .oneshot(bearer_request("/github/api/data", &token))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
    // The expect(1) on the JWKS mock verifies the cache on drop.
}

#[tokio::test]
async fn needs_linking_surfaces_as_401_with_message() {
    let signer = signer();
    let jwks = MockServer::start().await;
    let vault = MockServer::start().await;
    mount_jwks(&jwks, &signer).await;

    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(header_eq("content-type", "application/x-www-form-urlencoded"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "access_token": "VAULT_TOKEN" })),
        )
        .mount(&vault)
        .await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(header_eq("content-type", "application/json"))
        .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
            "error": "federated_connection_refresh_token_not_found",
        })))
        .mount(&vault)
        .await;

    let state = build_state(
        vec![tenant(
            &format!("{}/jwks-doc", jwks.uri()),
            "http://127.0.0.1:1",
            Some("github"),
        )],
        &vault.uri(),
    );
    let router = build_router(state);

    let token = sign_bearer(&signer, ISSUER, now() + 600, None);
    let resp = router
        .clone()
        .oneshot(bearer_request("/github/api/data", &token))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert!(resp.headers().get(header::WWW_AUTHENTICATE).is_some());
    let body = json_body(resp).await;
    assert_eq!(body["message"], "Account linking required");
}

#[tokio::test]
async fn vault_failure_surfaces_as_403() {
    let signer = signer();
    let jwks = MockServer::start().await;
    let vault = MockServer::start().await;
    mount_jwks(&jwks, &signer).await;

    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(500).set_body_json(serde_json::json!({
            "error": "server_error",
        })))
        .mount(&vault)
        .await;

    let state = build_state(
        vec![tenant(
            &format!("{}/jwks-doc", jwks.uri()),
            "http://127.0.0.1:1",
            Some("github"),
        )],
        &vault.uri(),
    );
    let router = build_router(state);

    let token = sign_bearer(&signer, ISSUER, now() + 600, None);
    let resp = router
        .clone()
        .oneshot(bearer_request("/github/api/data", &token))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn vaulted_token_replaces_inbound_bearer() {
    let signer = signer();
    let jwks = MockServer::start().await;
    let vault = MockServer::start().await;
    let backend = MockServer::start().await;
    mount_jwks(&jwks, &signer).await;

    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(header_eq("content-type", "application/x-www-form-urlencoded"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "access_token": "VAULT_TOKEN" })),
        )
        .mount(&vault)
        .await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(header_eq("content-type", "application/json"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "access_token": "D1" })),
        )
        .mount(&vault)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/data"))
        .and(header_eq("authorization", "Bearer D1"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&backend)
        .await;

    let state = build_state(
        vec![tenant(
            &format!("{}/jwks-doc", jwks.uri()),
            &backend.uri(),
            Some("github"),
        )],
        &vault.uri(),
    );
    let router = build_router(state);

    let token = sign_bearer(&signer, ISSUER, now() + 600, None);
    let resp = router
        .clone()
        .oneshot(bearer_request("/github/api/data", &token))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn unreachable_backend_is_502() {
    let signer = signer();
    let jwks = MockServer::start().await;
    mount_jwks(&jwks, &signer).await;

    let state = build_state(
        vec![tenant(
            &format!("{}/jwks-doc", jwks.uri()),
            // Nothing listens here.
            "http://127.0.0.1:9",
            None,
        )],
        "http://127.0.0.1:1",
    );
    let router = build_router(state);

    let token = sign_bearer(&signer, ISSUER, now() + 600, None);
    let resp = router
        .clone()
        .oneshot(bearer_request("/github/api/data", &token))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn audience_policy_is_equality_unless_prefix_match_enabled() {
    let signer = signer();
    let jwks = MockServer::start().await;
    let backend = MockServer::start().await;
    mount_jwks(&jwks, &signer).await;
    Mock::given(method("GET"))
        .and(path("/api/data"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&backend)
        .await;

    let tenants = vec![tenant(
        &format!("{}/jwks-doc", jwks.uri()),
        &backend.uri(),
        None,
    )];

    let strict = Settings {
        proxy_base_url: "http://proxy.test".to_string(),
        expected_audience: Some("api://janus".to_string()),
        ..Settings::default()
    };
    let strict_state = Arc::new(
        AppState::new(strict, TenantRegistry::from_tenants(tenants.clone())).expect("state"),
    );
    let strict_router = build_router(strict_state);

    let exact = sign_bearer(&signer, ISSUER, now() + 600, Some("api://janus"));
    let resp = strict_router
        .clone()
        .oneshot(bearer_request("/github/api/data", &exact))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let extended = sign_bearer(&signer, ISSUER, now() + 600, Some("api://janus/extra"));
    let resp = strict_router
        .clone()
        .oneshot(bearer_request("/github/api/data", &extended))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let lax = Settings {
        proxy_base_url: "http://proxy.test".to_string(),
        expected_audience: Some("api://janus".to_string()),
        audience_prefix_match: true,
        ..Settings::default()
    };
    let lax_state =
        Arc::new(AppState::new(lax, TenantRegistry::from_tenants(tenants)).expect("state"));
    let lax_router = build_router(lax_state);

    let resp = lax_router
        .clone()
        .oneshot(bearer_request("/github/api/data", &extended))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

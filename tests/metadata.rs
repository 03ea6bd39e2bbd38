//! Tests for the discovery documents, the registration stub, the JWKS
//! endpoint, and the health probes.

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

use janus::config::{Settings, TenantConfig, TenantRegistry};
use janus::server::service::build_router;
use janus::state::{AppState, ApplicationState};

const TEST_KEY_PATH: &str = "tests/fixtures/agent_key.pem";

fn tenants() -> TenantRegistry {
    TenantRegistry::from_tenants(vec![TenantConfig {
        id: "github".to_string(),
        name: "GitHub".to_string(),
        backend_url: "https://api.github.com".to_string(),
        issuer: "https://tenant.okta.com/oauth2/abc".to_string(),
        jwks_url: "https://tenant.okta.com/oauth2/abc/v1/keys".to_string(),
        vault_connection: Some("github".to_string()),
        external_scopes: vec!["repo".to_string()],
    }])
}

fn state_with_signer() -> Arc<AppState> {
    let settings = Settings {
        proxy_base_url: "http://proxy.test".to_string(),
        login_client_id: "vscode-client".to_string(),
        agent_private_key_path: Some(TEST_KEY_PATH.to_string()),
        agent_private_key_id: Some("agent-kid".to_string()),
        ..Settings::default()
    };
    Arc::new(AppState::new(settings, tenants()).expect("state"))
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn get_json(router: &axum::Router, uri: &str) -> (StatusCode, Value) {
    let resp = router.clone().oneshot(get(uri)).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or_default())
}

#[tokio::test]
async fn authorization_server_metadata_matches_rfc8414_shape() {
    let router = build_router(state_with_signer());

    let (status, doc) = get_json(
        &router,
        "/.well-known/oauth-authorization-server/github",
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    assert_eq!(doc["issuer"], "http://proxy.test/github");
    assert_eq!(
        doc["authorization_endpoint"],
        "http://proxy.test/authorize/github"
    );
    assert_eq!(doc["token_endpoint"], "http://proxy.test/token");
    assert_eq!(doc["jwks_uri"], "http://proxy.test/jwks");
    assert_eq!(doc["registration_endpoint"], "http://proxy.test/register");
    assert_eq!(doc["scopes_supported"], serde_json::json!(["repo"]));
    assert_eq!(doc["response_types_supported"], serde_json::json!(["code"]));
    assert_eq!(doc["response_modes_supported"], serde_json::json!(["query"]));
    assert_eq!(
        doc["grant_types_supported"],
        serde_json::json!(["authorization_code"])
    );
    assert_eq!(
        doc["token_endpoint_auth_methods_supported"],
        serde_json::json!(["none", "client_secret_basic", "client_secret_post"])
    );
    assert_eq!(
        doc["code_challenge_methods_supported"],
        serde_json::json!(["S256"])
    );
    assert_eq!(
        doc["protected_resources"],
        serde_json::json!(["http://proxy.test/github"])
    );
}

#[tokio::test]
async fn metadata_is_served_for_nested_resource_paths() {
    let router = build_router(state_with_signer());

    let (status, doc) = get_json(
        &router,
        "/.well-known/oauth-authorization-server/github/some/deep/path",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(doc["issuer"], "http://proxy.test/github");

    let (status, doc) = get_json(
        &router,
        "/.well-known/oauth-protected-resource/github/some/deep/path",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(doc["resource"], "http://proxy.test/github");
}

#[tokio::test]
async fn protected_resource_metadata_matches_rfc9728_shape() {
    let router = build_router(state_with_signer());

    let (status, doc) =
        get_json(&router, "/.well-known/oauth-protected-resource/github").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(doc["resource"], "http://proxy.test/github");
    assert_eq!(
        doc["authorization_servers"],
        serde_json::json!(["http://proxy.test/github"])
    );
    assert_eq!(doc["resource_name"], "GitHub");
}

#[tokio::test]
async fn metadata_for_unknown_tenant_is_404() {
    let router = build_router(state_with_signer());

    let (status, _) = get_json(&router, "/.well-known/oauth-authorization-server/nope").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = get_json(&router, "/.well-known/oauth-protected-resource/nope").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn register_returns_the_preconfigured_client_record() {
    let router = build_router(state_with_signer());

    let resp = router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/register")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"client_name":"whatever"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    let record: Value = serde_json::from_slice(&bytes).unwrap();

    assert_eq!(record["client_id"], "vscode-client");
    assert_eq!(record["token_endpoint_auth_method"], "none");
    assert_eq!(
        record["grant_types"],
        serde_json::json!(["authorization_code", "refresh_token"])
    );
    assert_eq!(record["response_types"], serde_json::json!(["code"]));
    assert!(
        record["redirect_uris"]
            .as_array()
            .is_some_and(|uris| !uris.is_empty())
    );
    assert!(record["client_id_issued_at"].as_i64().unwrap() > 0);
}

#[tokio::test]
async fn jwks_endpoint_serves_the_agent_public_key() {
    let router = build_router(state_with_signer());

    let (status, doc) = get_json(&router, "/jwks").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(doc["keys"][0]["kid"], "agent-kid");
    assert_eq!(doc["keys"][0]["kty"], "RSA");
}

#[tokio::test]
async fn jwks_endpoint_without_signer_is_404() {
    let settings = Settings {
        proxy_base_url: "http://proxy.test".to_string(),
        ..Settings::default()
    };
    let state = Arc::new(AppState::new(settings, tenants()).expect("state"));
    let router = build_router(state);

    let (status, _) = get_json(&router, "/jwks").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn health_probes_follow_lifecycle_state() {
    let state = state_with_signer();
    let router = build_router(state.clone());

    // Fresh state is neither alive nor ready.
    let resp = router.clone().oneshot(get("/livez")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);

    state.set_state(ApplicationState::Initializing);
    let resp = router.clone().oneshot(get("/livez")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let resp = router.clone().oneshot(get("/readyz")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);

    state.set_state(ApplicationState::Ready);
    let resp = router.clone().oneshot(get("/readyz")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    // Content negotiation: JSON when asked for.
    let resp = router
        .clone()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/readyz")
                .header(header::ACCEPT, "application/json")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["status"], "ready");
}

//! End-to-end tests for the HTTP surface.
//!
//! Drives the router through `axum-test` over the in-memory backend:
//! authorization code flow with PKCE, refresh rotation, revocation,
//! session hand-off, logout and key rotation.

use authd::audit::AuditWriter;
use authd::config::Config;
use authd::http::{AppState, build_router};
use authd::oauth::pkce::s256_challenge;
use authd::oauth::types::hash_token;
use authd::oauth::{Application, ClientType, MemoryOneTimeTokenBroker, OneTimeTokenBroker, User};
use authd::storage::{ApplicationStore, MemoryOAuthStorage};
use axum::http::{HeaderName, HeaderValue, StatusCode, header};
use axum_test::{TestResponse, TestServer};
use chrono::Utc;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

const BASE: &str = "https://auth.test";
const APP1_REDIRECT: &str = "https://app1/cb";
const APP2_SECRET: &str = "app2-secret";
const VERIFIER: &str = "dBjftJeZ4CVP-mJ92K9qgZ7xwTkVFMyxP7Kob1i2IZs";
const USER_ID: &str = "user-1";

struct Harness {
    server: TestServer,
    state: AppState,
    _audit_writer: AuditWriter,
}

fn application(client_id: &str, client_type: ClientType) -> Application {
    let now = Utc::now();
    Application {
        id: format!("id-{client_id}"),
        client_id: client_id.to_string(),
        client_secret_hash: match client_type {
            ClientType::Confidential => Some(hash_token(APP2_SECRET)),
            ClientType::Public => None,
        },
        display_name: Some(client_id.to_string()),
        redirect_uris: vec![format!("https://{client_id}/cb")],
        post_logout_redirect_uris: vec![format!("https://{client_id}/signed-out")],
        client_type,
        is_active: true,
        created_at: now,
        updated_at: now,
    }
}

impl Harness {
    async fn new() -> Self {
        let storage = Arc::new(MemoryOAuthStorage::new());
        storage
            .store_application(&application("app1", ClientType::Public))
            .await
            .unwrap();
        storage
            .store_application(&application("app2", ClientType::Confidential))
            .await
            .unwrap();
        storage
            .store_user(User {
                id: USER_ID.to_string(),
                username: "alice".to_string(),
                email: "alice@example.com".to_string(),
                email_verified: true,
                name: Some("Alice".to_string()),
            })
            .unwrap();

        let config = Config::from_lookup(BASE, |name| match name {
            "LOGIN_URL" => Some("https://login.test/account/login".to_string()),
            "REFRESH_TOKEN_REUSE_LEEWAY" => Some("0s".to_string()),
            _ => None,
        })
        .unwrap();

        let (state, audit_writer) = AppState::new(
            Arc::new(config),
            storage,
            Arc::new(MemoryOneTimeTokenBroker::new()),
        );
        let server = TestServer::new(build_router(state.clone())).unwrap();

        Self {
            server,
            state,
            _audit_writer: audit_writer,
        }
    }

    async fn session_cookie(&self) -> HeaderValue {
        let now = Utc::now();
        let session = self.state.sessions.issue(USER_ID, now, now).await.unwrap();
        HeaderValue::from_str(&format!("authd_session={session}")).unwrap()
    }

    /// Run `/connect/authorize` for app1 with a session and return the code.
    async fn authorize_code(&self, scope: &str) -> String {
        let response = self
            .server
            .get("/connect/authorize")
            .add_query_param("client_id", "app1")
            .add_query_param("redirect_uri", APP1_REDIRECT)
            .add_query_param("response_type", "code")
            .add_query_param("scope", scope)
            .add_query_param("state", "xyz")
            .add_query_param("code_challenge", s256_challenge(VERIFIER))
            .add_query_param("code_challenge_method", "S256")
            .add_header(header::COOKIE, self.session_cookie().await)
            .await;

        let location = location(&response);
        assert!(location.starts_with("https://app1/cb?"), "{location}");
        assert_eq!(query_param(&location, "state").as_deref(), Some("xyz"));
        query_param(&location, "code").unwrap()
    }

    async fn exchange_code(&self, code: &str) -> TestResponse {
        self.server
            .post("/connect/token")
            .form(&[
                ("grant_type", "authorization_code"),
                ("client_id", "app1"),
                ("code", code),
                ("redirect_uri", APP1_REDIRECT),
                ("code_verifier", VERIFIER),
            ])
            .await
    }

    async fn refresh(&self, refresh_token: &str) -> TestResponse {
        self.server
            .post("/connect/token")
            .form(&[
                ("grant_type", "refresh_token"),
                ("client_id", "app1"),
                ("refresh_token", refresh_token),
            ])
            .await
    }

    /// Full code flow returning the token response body.
    async fn issue_tokens(&self, scope: &str) -> Value {
        let code = self.authorize_code(scope).await;
        let response = self.exchange_code(&code).await;
        assert_eq!(response.status_code(), StatusCode::OK);
        response.json::<Value>()
    }

    async fn userinfo(&self, access_token: &str) -> TestResponse {
        self.server
            .get("/connect/userinfo")
            .add_header(header::AUTHORIZATION, bearer(access_token))
            .await
    }
}

fn bearer(token: &str) -> HeaderValue {
    HeaderValue::from_str(&format!("Bearer {token}")).unwrap()
}

fn location(response: &TestResponse) -> String {
    assert!(
        response.status_code().is_redirection(),
        "expected redirect, got {}",
        response.status_code()
    );
    response
        .headers()
        .get(header::LOCATION)
        .and_then(|value| value.to_str().ok())
        .unwrap()
        .to_string()
}

fn query_param(url: &str, name: &str) -> Option<String> {
    Url::parse(url)
        .ok()?
        .query_pairs()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

fn assert_oauth_error(response: &TestResponse, status: StatusCode, error: &str) {
    assert_eq!(response.status_code(), status);
    let body = response.json::<Value>();
    assert_eq!(body["error"], error, "body: {body}");
    assert!(body["error_description"].is_string());
}

fn kid(jwt: &str) -> String {
    jsonwebtoken::decode_header(jwt).unwrap().kid.unwrap()
}

#[tokio::test]
async fn test_authorization_code_flow_is_single_use() {
    let harness = Harness::new().await;

    let code = harness.authorize_code("openid profile").await;

    let response = harness.exchange_code(&code).await;
    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CACHE_CONTROL),
        Some(&HeaderValue::from_static("no-store"))
    );
    let body = response.json::<Value>();
    assert_eq!(body["token_type"], "Bearer");
    assert!(body["access_token"].is_string());
    assert!(body["refresh_token"].is_string());
    assert!(body["id_token"].is_string());
    assert!(body["expires_in"].as_u64().unwrap() > 0);

    let replay = harness.exchange_code(&code).await;
    assert_oauth_error(&replay, StatusCode::BAD_REQUEST, "invalid_grant");
}

#[tokio::test]
async fn test_concurrent_code_redemption() {
    let harness = Harness::new().await;
    let code = harness.authorize_code("openid").await;

    let attempts = (0..8).map(|_| harness.exchange_code(&code));
    let responses = futures::future::join_all(attempts).await;

    let succeeded = responses
        .iter()
        .filter(|response| response.status_code() == StatusCode::OK)
        .count();
    assert_eq!(succeeded, 1);
    for response in responses
        .iter()
        .filter(|response| response.status_code() != StatusCode::OK)
    {
        assert_oauth_error(response, StatusCode::BAD_REQUEST, "invalid_grant");
    }
}

#[tokio::test]
async fn test_code_exchange_rejects_wrong_verifier_and_redirect() {
    let harness = Harness::new().await;

    let code = harness.authorize_code("openid").await;
    let response = harness
        .server
        .post("/connect/token")
        .form(&[
            ("grant_type", "authorization_code"),
            ("client_id", "app1"),
            ("code", code.as_str()),
            ("redirect_uri", APP1_REDIRECT),
            ("code_verifier", "not-the-verifier-not-the-verifier-not-the"),
        ])
        .await;
    assert_oauth_error(&response, StatusCode::BAD_REQUEST, "invalid_grant");

    let code = harness.authorize_code("openid").await;
    let response = harness
        .server
        .post("/connect/token")
        .form(&[
            ("grant_type", "authorization_code"),
            ("client_id", "app1"),
            ("code", code.as_str()),
            ("redirect_uri", "https://app1/cb/"),
            ("code_verifier", VERIFIER),
        ])
        .await;
    assert_oauth_error(&response, StatusCode::BAD_REQUEST, "invalid_grant");
}

#[tokio::test]
async fn test_token_endpoint_errors() {
    let harness = Harness::new().await;

    let response = harness
        .server
        .post("/connect/token")
        .form(&[("grant_type", "password"), ("client_id", "app1")])
        .await;
    assert_oauth_error(&response, StatusCode::BAD_REQUEST, "unsupported_grant_type");

    let response = harness
        .server
        .post("/connect/token")
        .form(&[
            ("grant_type", "authorization_code"),
            ("client_id", "app2"),
            ("client_secret", "wrong"),
            ("code", "whatever"),
        ])
        .await;
    assert_oauth_error(&response, StatusCode::UNAUTHORIZED, "invalid_client");

    let response = harness
        .server
        .post("/connect/token")
        .form(&[
            ("grant_type", "authorization_code"),
            ("client_id", "unknown"),
            ("code", "whatever"),
        ])
        .await;
    assert_oauth_error(&response, StatusCode::UNAUTHORIZED, "invalid_client");

    // Bodies that fail to deserialize still get the OAuth error shape.
    let response = harness
        .server
        .post("/connect/token")
        .form(&[("client_id", "app1"), ("code", "whatever")])
        .await;
    assert_oauth_error(&response, StatusCode::BAD_REQUEST, "invalid_request");

    let response = harness
        .server
        .post("/connect/token")
        .text("grant_type=authorization_code")
        .await;
    assert_oauth_error(&response, StatusCode::BAD_REQUEST, "invalid_request");

    let response = harness
        .server
        .post("/connect/revoke")
        .form(&[("client_id", "app1")])
        .await;
    assert_oauth_error(&response, StatusCode::BAD_REQUEST, "invalid_request");
}

#[tokio::test]
async fn test_refresh_rotation_and_reuse_detection() {
    let harness = Harness::new().await;
    let tokens = harness.issue_tokens("openid profile").await;
    let first_refresh = tokens["refresh_token"].as_str().unwrap().to_string();

    let response = harness.refresh(&first_refresh).await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let rotated = response.json::<Value>();
    let second_refresh = rotated["refresh_token"].as_str().unwrap().to_string();
    assert_ne!(first_refresh, second_refresh);
    assert!(rotated["id_token"].is_string());

    // The rotated-out token is burned, and replaying it revokes the chain.
    let replay = harness.refresh(&first_refresh).await;
    assert_oauth_error(&replay, StatusCode::BAD_REQUEST, "invalid_grant");

    let response = harness.refresh(&second_refresh).await;
    assert_oauth_error(&response, StatusCode::BAD_REQUEST, "invalid_grant");

    let response = harness
        .userinfo(rotated["access_token"].as_str().unwrap())
        .await;
    assert_oauth_error(&response, StatusCode::UNAUTHORIZED, "invalid_token");
}

#[tokio::test]
async fn test_userinfo_filters_claims_by_scope() {
    let harness = Harness::new().await;

    let tokens = harness.issue_tokens("openid profile").await;
    let response = harness
        .userinfo(tokens["access_token"].as_str().unwrap())
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let claims = response.json::<Value>();
    assert_eq!(claims["sub"], USER_ID);
    assert_eq!(claims["preferred_username"], "alice");
    assert_eq!(claims["name"], "Alice");
    assert!(claims.get("email").is_none());

    let tokens = harness.issue_tokens("openid email").await;
    let claims = harness
        .userinfo(tokens["access_token"].as_str().unwrap())
        .await
        .json::<Value>();
    assert_eq!(claims["email"], "alice@example.com");
    assert_eq!(claims["email_verified"], true);

    let response = harness.server.get("/connect/userinfo").await;
    assert_oauth_error(&response, StatusCode::UNAUTHORIZED, "invalid_token");
    assert!(response.headers().get(header::WWW_AUTHENTICATE).is_some());
}

#[tokio::test]
async fn test_revoked_access_token_is_rejected() {
    let harness = Harness::new().await;
    let tokens = harness.issue_tokens("openid").await;
    let access_token = tokens["access_token"].as_str().unwrap();

    let response = harness
        .server
        .post("/connect/revoke")
        .form(&[("token", access_token), ("client_id", "app1")])
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);

    let response = harness.userinfo(access_token).await;
    assert_oauth_error(&response, StatusCode::UNAUTHORIZED, "invalid_token");

    // Revoking again, or revoking garbage, still answers 200.
    for token in [access_token, "not-a-token"] {
        let response = harness
            .server
            .post("/connect/revoke")
            .form(&[("token", token), ("client_id", "app1")])
            .await;
        assert_eq!(response.status_code(), StatusCode::OK);
    }
}

#[tokio::test]
async fn test_revoking_refresh_token_revokes_authorization() {
    let harness = Harness::new().await;
    let tokens = harness.issue_tokens("openid").await;

    let response = harness
        .server
        .post("/connect/revoke")
        .form(&[
            ("token", tokens["refresh_token"].as_str().unwrap()),
            ("token_type_hint", "refresh_token"),
            ("client_id", "app1"),
        ])
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);

    let response = harness
        .userinfo(tokens["access_token"].as_str().unwrap())
        .await;
    assert_oauth_error(&response, StatusCode::UNAUTHORIZED, "invalid_token");

    let response = harness
        .refresh(tokens["refresh_token"].as_str().unwrap())
        .await;
    assert_oauth_error(&response, StatusCode::BAD_REQUEST, "invalid_grant");
}

#[tokio::test]
async fn test_authorize_without_session_redirects_to_login() {
    let harness = Harness::new().await;

    let response = harness
        .server
        .get("/connect/authorize")
        .add_query_param("client_id", "app1")
        .add_query_param("redirect_uri", APP1_REDIRECT)
        .add_query_param("response_type", "code")
        .add_query_param("scope", "openid")
        .add_query_param("code_challenge", s256_challenge(VERIFIER))
        .add_query_param("code_challenge_method", "S256")
        .await;

    let login_location = location(&response);
    assert!(login_location.starts_with("https://login.test/account/login?"));
    let return_url = query_param(&login_location, "returnUrl").unwrap();
    assert!(return_url.starts_with("/connect/authorize?client_id=app1"));

    let response = harness
        .server
        .get("/connect/authorize")
        .add_query_param("client_id", "app1")
        .add_query_param("redirect_uri", APP1_REDIRECT)
        .add_query_param("response_type", "code")
        .add_query_param("code_challenge", s256_challenge(VERIFIER))
        .add_query_param("state", "s1")
        .add_query_param("prompt", "none")
        .await;

    let error_location = location(&response);
    assert!(error_location.starts_with("https://app1/cb?"));
    assert_eq!(
        query_param(&error_location, "error").as_deref(),
        Some("login_required")
    );
    assert_eq!(query_param(&error_location, "state").as_deref(), Some("s1"));
}

#[tokio::test]
async fn test_authorize_rejects_unregistered_redirect_uri() {
    let harness = Harness::new().await;

    for redirect_uri in ["https://app1/cb/", "https://app1/cb?x=1", "https://evil/cb"] {
        let response = harness
            .server
            .get("/connect/authorize")
            .add_query_param("client_id", "app1")
            .add_query_param("redirect_uri", redirect_uri)
            .add_query_param("response_type", "code")
            .add_query_param("code_challenge", s256_challenge(VERIFIER))
            .add_header(header::COOKIE, harness.session_cookie().await)
            .await;
        assert_oauth_error(&response, StatusCode::BAD_REQUEST, "invalid_request");
    }
}

#[tokio::test]
async fn test_session_handoff_sets_cookie() {
    let harness = Harness::new().await;
    let token = harness
        .state
        .one_time_tokens
        .issue(
            &json!({ "user_id": USER_ID, "auth_time": Utc::now().timestamp() }),
            Duration::from_secs(60),
        )
        .await
        .unwrap();

    let response = harness
        .server
        .get("/connect/session")
        .add_query_param("token", &token)
        .add_query_param("returnUrl", "/connect/authorize?client_id=app1")
        .await;
    assert_eq!(location(&response), "/connect/authorize?client_id=app1");
    let cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .and_then(|value| value.to_str().ok())
        .unwrap()
        .to_string();
    assert!(cookie.starts_with("authd_session="));
    assert!(cookie.contains("HttpOnly"));

    // The hand-off token is single use.
    let response = harness
        .server
        .get("/connect/session")
        .add_query_param("token", &token)
        .await;
    assert_oauth_error(&response, StatusCode::BAD_REQUEST, "invalid_request");

    // The issued cookie is accepted by /connect/authorize.
    let session = cookie.split(';').next().unwrap().to_string();
    let response = harness
        .server
        .get("/connect/authorize")
        .add_query_param("client_id", "app1")
        .add_query_param("redirect_uri", APP1_REDIRECT)
        .add_query_param("response_type", "code")
        .add_query_param("code_challenge", s256_challenge(VERIFIER))
        .add_header(header::COOKIE, HeaderValue::from_str(&session).unwrap())
        .await;
    assert!(query_param(&location(&response), "code").is_some());
}

#[tokio::test]
async fn test_session_handoff_rejects_open_redirect() {
    let harness = Harness::new().await;
    let token = harness
        .state
        .one_time_tokens
        .issue(&json!({ "user_id": USER_ID }), Duration::from_secs(60))
        .await
        .unwrap();

    let response = harness
        .server
        .get("/connect/session")
        .add_query_param("token", &token)
        .add_query_param("returnUrl", "https://evil.test/steal")
        .await;
    assert_eq!(location(&response), "/");
}

#[tokio::test]
async fn test_logout_redirect_policy() {
    let harness = Harness::new().await;

    let response = harness
        .server
        .get("/connect/logout")
        .add_query_param("client_id", "app1")
        .add_query_param("post_logout_redirect_uri", "https://app1/signed-out")
        .add_query_param("state", "bye")
        .add_header(header::COOKIE, harness.session_cookie().await)
        .await;
    assert_eq!(location(&response), "https://app1/signed-out?state=bye");
    let cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .and_then(|value| value.to_str().ok())
        .unwrap();
    assert!(cookie.contains("Max-Age=0"));

    // Registered for a different client.
    let response = harness
        .server
        .get("/connect/logout")
        .add_query_param("client_id", "app1")
        .add_query_param("post_logout_redirect_uri", "https://app2/signed-out")
        .await;
    assert_eq!(location(&response), "https://login.test/account/login");

    // Without a client any active client's URI is accepted.
    let response = harness
        .server
        .get("/connect/logout")
        .add_query_param("post_logout_redirect_uri", "https://app2/signed-out?from=nav")
        .await;
    assert_eq!(location(&response), "https://app2/signed-out?from=nav");

    let response = harness
        .server
        .get("/connect/logout")
        .add_query_param("post_logout_redirect_uri", "https://evil.test/")
        .await;
    assert_eq!(location(&response), "https://login.test/account/login");
}

#[tokio::test]
async fn test_logout_uses_id_token_hint_for_client() {
    let harness = Harness::new().await;
    let tokens = harness.issue_tokens("openid").await;

    let response = harness
        .server
        .get("/connect/logout")
        .add_query_param("id_token_hint", tokens["id_token"].as_str().unwrap())
        .add_query_param("post_logout_redirect_uri", "https://app2/signed-out")
        .await;
    assert_eq!(location(&response), "https://login.test/account/login");

    let response = harness
        .server
        .get("/connect/logout")
        .add_query_param("id_token_hint", tokens["id_token"].as_str().unwrap())
        .add_query_param("post_logout_redirect_uri", "https://app1/signed-out")
        .await;
    assert_eq!(location(&response), "https://app1/signed-out");
}

#[tokio::test]
async fn test_jwks_stable_across_rotation() {
    let harness = Harness::new().await;
    let tokens = harness.issue_tokens("openid").await;
    let old_access_token = tokens["access_token"].as_str().unwrap().to_string();
    let old_kid = kid(&old_access_token);

    let rotation = harness.state.signing_keys.rotate_key().await.unwrap();
    assert_eq!(rotation.previous_key_id.as_deref(), Some(old_kid.as_str()));

    let jwks = harness
        .server
        .get("/.well-known/jwks.json")
        .await
        .json::<Value>();
    let kids: Vec<&str> = jwks["keys"]
        .as_array()
        .unwrap()
        .iter()
        .map(|key| key["kid"].as_str().unwrap())
        .collect();
    assert!(kids.contains(&old_kid.as_str()));
    assert!(kids.contains(&rotation.key_id.as_str()));
    for key in jwks["keys"].as_array().unwrap() {
        assert_eq!(key["kty"], "RSA");
        assert_eq!(key["alg"], "RS256");
        assert!(key.get("d").is_none());
    }

    // Tokens signed before the rotation still verify.
    let response = harness.userinfo(&old_access_token).await;
    assert_eq!(response.status_code(), StatusCode::OK);

    // New tokens carry the new kid.
    let rotated = harness.issue_tokens("openid").await;
    assert_eq!(kid(rotated["access_token"].as_str().unwrap()), rotation.key_id);
    assert_eq!(kid(rotated["id_token"].as_str().unwrap()), rotation.key_id);
}

#[tokio::test]
async fn test_openid_configuration() {
    let harness = Harness::new().await;

    let response = harness
        .server
        .get("/.well-known/openid-configuration")
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let document = response.json::<Value>();

    assert_eq!(document["issuer"], BASE);
    assert_eq!(
        document["authorization_endpoint"],
        "https://auth.test/connect/authorize"
    );
    assert_eq!(document["token_endpoint"], "https://auth.test/connect/token");
    assert_eq!(
        document["jwks_uri"],
        "https://auth.test/.well-known/jwks.json"
    );
    assert_eq!(
        document["response_types_supported"],
        json!(["code", "token", "id_token"])
    );
    assert_eq!(
        document["id_token_signing_alg_values_supported"],
        json!(["RS256"])
    );
}

#[tokio::test]
async fn test_cors_preflight_for_allowed_origin() {
    let storage = Arc::new(MemoryOAuthStorage::new());
    let config = Config::from_lookup(BASE, |name| match name {
        "CORS_ALLOWED_ORIGINS" => Some("https://app1".to_string()),
        _ => None,
    })
    .unwrap();
    let (state, _audit_writer) = AppState::new(
        Arc::new(config),
        storage,
        Arc::new(MemoryOneTimeTokenBroker::new()),
    );
    let server = TestServer::new(build_router(state)).unwrap();

    let response = server
        .method(axum::http::Method::OPTIONS, "/.well-known/openid-configuration")
        .add_header(header::ORIGIN, HeaderValue::from_static("https://app1"))
        .add_header(
            HeaderName::from_static("access-control-request-method"),
            HeaderValue::from_static("GET"),
        )
        .await;

    assert_eq!(
        response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN),
        Some(&HeaderValue::from_static("https://app1"))
    );
}

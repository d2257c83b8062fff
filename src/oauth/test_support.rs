//! Shared fixtures for the authorization server unit tests.

use chrono::Utc;
use std::sync::Arc;
use url::Url;

use crate::audit::{AuditLogger, AuditWriter};
use crate::oauth::auth_server::{AuthorizationServer, ClientAuthentication};
use crate::oauth::authorize::{AuthenticatedUser, AuthorizeOutcome, AuthorizeQuery};
use crate::oauth::pkce::s256_challenge;
use crate::oauth::signing_keys::SigningKeyManager;
use crate::oauth::tokens::{TokenFactory, TokenLifetimes};
use crate::oauth::types::*;
use crate::storage::MemoryOAuthStorage;
use crate::storage::traits::ApplicationStore;

pub const ISSUER: &str = "https://auth.test";
pub const APP1_REDIRECT: &str = "https://app1/cb";
pub const CONFIDENTIAL_SECRET: &str = "s3cret";
pub const TEST_USER_ID: &str = "user-1";
pub const TEST_VERIFIER: &str = "dBjftJeZ4CVP-mJ92K9qgZ7xwTkVFMyxP7Kob1i2IZs";

pub struct TestContext {
    pub server: Arc<AuthorizationServer>,
    pub storage: Arc<MemoryOAuthStorage>,
    pub signing_keys: Arc<SigningKeyManager>,
    _audit_writer: AuditWriter,
}

pub fn application(client_id: &str, client_type: ClientType, redirect_uri: &str) -> Application {
    let now = Utc::now();
    Application {
        id: format!("id-{client_id}"),
        client_id: client_id.to_string(),
        client_secret_hash: match client_type {
            ClientType::Confidential => Some(hash_token(CONFIDENTIAL_SECRET)),
            ClientType::Public => None,
        },
        display_name: None,
        redirect_uris: vec![redirect_uri.to_string()],
        post_logout_redirect_uris: vec![format!("https://{client_id}/signed-out")],
        client_type,
        is_active: true,
        created_at: now,
        updated_at: now,
    }
}

pub fn test_user() -> User {
    User {
        id: TEST_USER_ID.to_string(),
        username: "alice".to_string(),
        email: "alice@example.com".to_string(),
        email_verified: true,
        name: Some("Alice".to_string()),
    }
}

pub fn authenticated_user() -> AuthenticatedUser {
    AuthenticatedUser {
        user_id: TEST_USER_ID.to_string(),
        auth_time: Utc::now(),
    }
}

pub fn client_auth(client_id: &str, client_secret: Option<&str>) -> ClientAuthentication {
    ClientAuthentication {
        client_id: client_id.to_string(),
        client_secret: client_secret.map(str::to_string),
    }
}

pub fn authorize_query(scope: &str) -> AuthorizeQuery {
    AuthorizeQuery {
        client_id: Some("app1".to_string()),
        redirect_uri: Some(APP1_REDIRECT.to_string()),
        response_type: Some("code".to_string()),
        scope: Some(scope.to_string()),
        code_challenge: Some(s256_challenge(TEST_VERIFIER)),
        code_challenge_method: Some("S256".to_string()),
        ..AuthorizeQuery::default()
    }
}

pub fn code_exchange(code: &str) -> TokenRequest {
    TokenRequest {
        grant_type: GrantType::AuthorizationCode,
        code: Some(code.to_string()),
        redirect_uri: Some(APP1_REDIRECT.to_string()),
        code_verifier: Some(TEST_VERIFIER.to_string()),
        refresh_token: None,
    }
}

pub fn refresh_exchange(refresh_token: &str) -> TokenRequest {
    TokenRequest {
        grant_type: GrantType::RefreshToken,
        code: None,
        redirect_uri: None,
        code_verifier: None,
        refresh_token: Some(refresh_token.to_string()),
    }
}

pub fn query_param(url: &str, name: &str) -> Option<String> {
    Url::parse(url)
        .ok()?
        .query_pairs()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

impl TestContext {
    pub async fn new() -> Self {
        Self::with_lifetimes(TokenLifetimes::default()).await
    }

    /// Context whose replayed refresh tokens count as reuse immediately.
    pub async fn without_reuse_leeway() -> Self {
        Self::with_lifetimes(TokenLifetimes {
            refresh_token_reuse_leeway: chrono::Duration::zero(),
            ..TokenLifetimes::default()
        })
        .await
    }

    pub async fn with_lifetimes(lifetimes: TokenLifetimes) -> Self {
        let storage = Arc::new(MemoryOAuthStorage::new());
        storage
            .store_application(&application("app1", ClientType::Public, APP1_REDIRECT))
            .await
            .unwrap();
        storage
            .store_application(&application(
                "app2",
                ClientType::Confidential,
                "https://app2/cb",
            ))
            .await
            .unwrap();
        let mut inactive = application("inactive", ClientType::Public, "https://inactive/cb");
        inactive.is_active = false;
        storage.store_application(&inactive).await.unwrap();
        storage.store_user(test_user()).unwrap();

        let signing_keys = Arc::new(SigningKeyManager::new(
            storage.clone(),
            std::time::Duration::from_secs(300),
        ));
        let (audit, audit_writer) = AuditLogger::new(256);
        let server = Arc::new(AuthorizationServer::new(
            storage.clone(),
            signing_keys.clone(),
            TokenFactory::new(lifetimes),
            audit,
            ISSUER.to_string(),
            ISSUER.to_string(),
        ));

        Self {
            server,
            storage,
            signing_keys,
            _audit_writer: audit_writer,
        }
    }

    /// Run `/authorize` for app1 and return the plaintext code.
    pub async fn authorize_code(&self, scope: &str) -> String {
        let outcome = self
            .server
            .authorize(&authorize_query(scope), Some(&authenticated_user()))
            .await
            .unwrap();
        match outcome {
            AuthorizeOutcome::Redirect(location) => query_param(&location, "code").unwrap(),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    /// Full code flow for app1.
    pub async fn issue_tokens(&self, scope: &str) -> TokenResponse {
        let code = self.authorize_code(scope).await;
        self.server
            .token(code_exchange(&code), Some(client_auth("app1", None)))
            .await
            .unwrap()
    }
}

//! The `/authorize` step of the authorization code flow.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use url::Url;
use uuid::Uuid;

use crate::audit::AuditEvent;
use crate::errors::{OAuthError, StorageError};
use crate::oauth::auth_server::AuthorizationServer;
use crate::oauth::pkce;
use crate::oauth::tokens::TokenSubject;
use crate::oauth::types::*;

/// Query (or form) parameters of the authorize endpoint
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthorizeQuery {
    pub client_id: Option<String>,
    pub redirect_uri: Option<String>,
    pub response_type: Option<String>,
    pub scope: Option<String>,
    pub state: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
    pub nonce: Option<String>,
    pub prompt: Option<String>,
}

/// The user behind the current session
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: String,
    pub auth_time: DateTime<Utc>,
}

#[derive(Debug)]
pub enum AuthorizeOutcome {
    /// Redirect back to the client with a code
    Redirect(String),
    /// The request is valid but nobody is logged in
    LoginRequired {
        redirect_uri: String,
        state: Option<String>,
    },
}

impl AuthorizationServer {
    /// Handle an authorization request (RFC 6749 Section 4.1.1).
    ///
    /// Every validation runs before anything is written, so a rejected
    /// request never leaves a code or authorization behind.
    pub async fn authorize(
        &self,
        query: &AuthorizeQuery,
        user: Option<&AuthenticatedUser>,
    ) -> Result<AuthorizeOutcome, OAuthError> {
        let client_id = non_empty(query.client_id.as_deref())
            .ok_or_else(|| OAuthError::InvalidRequest("Missing client_id".to_string()))?;

        let application = self
            .storage
            .get_application_by_client_id(client_id)
            .await
            .map_err(|e| match e {
                StorageError::InvalidData(message) => OAuthError::InvalidRequest(message),
                other => other.into(),
            })?
            .filter(|application| application.is_active)
            .ok_or_else(|| OAuthError::InvalidClient("Client not found".to_string()))?;

        let redirect_uri = non_empty(query.redirect_uri.as_deref())
            .ok_or_else(|| OAuthError::InvalidRequest("Missing redirect_uri".to_string()))?;
        if !application.has_redirect_uri(redirect_uri) {
            return Err(OAuthError::InvalidRequest(
                "Invalid redirect URI".to_string(),
            ));
        }

        match query.response_type.as_deref() {
            Some("code") => {}
            Some(other) => return Err(OAuthError::UnsupportedResponseType(other.to_string())),
            None => {
                return Err(OAuthError::InvalidRequest(
                    "Missing response_type".to_string(),
                ));
            }
        }

        let code_challenge = non_empty(query.code_challenge.as_deref());
        let code_challenge_method = match code_challenge {
            Some(_) => {
                let method = query.code_challenge_method.as_deref().unwrap_or("plain");
                if !pkce::is_supported_method(method) {
                    return Err(OAuthError::InvalidRequest(format!(
                        "Unsupported code_challenge_method: {}",
                        method
                    )));
                }
                Some(method.to_string())
            }
            None if application.client_type == ClientType::Public => {
                return Err(OAuthError::InvalidRequest(
                    "PKCE required for public clients".to_string(),
                ));
            }
            None => None,
        };

        let Some(user) = user else {
            return Ok(AuthorizeOutcome::LoginRequired {
                redirect_uri: redirect_uri.to_string(),
                state: query.state.clone(),
            });
        };

        let scope = normalize_scope(query.scope.as_deref().unwrap_or_default());
        let now = Utc::now();

        let existing = self
            .storage
            .find_valid_authorization(&application.id, &user.user_id, &scope)
            .await?;
        let is_new = existing.is_none();
        let authorization = existing.unwrap_or_else(|| Authorization {
            id: Uuid::new_v4().to_string(),
            application_id: application.id.clone(),
            user_id: user.user_id.clone(),
            scopes: scope.clone(),
            status: AuthorizationStatus::Valid,
            kind: AuthorizationKind::Permanent,
            creation_date: now,
        });

        let payload = AuthorizationCodePayload {
            redirect_uri: redirect_uri.to_string(),
            code_challenge: code_challenge.map(str::to_string),
            code_challenge_method,
            nonce: query.nonce.clone(),
            scope,
            auth_time: Some(user.auth_time.timestamp()),
        };

        let subject = TokenSubject {
            application_id: &application.id,
            authorization_id: &authorization.id,
            user_id: &user.user_id,
        };
        let issued = self
            .token_factory
            .authorization_code(subject, &payload, now)?;
        let location = append_query(
            redirect_uri,
            &[("code", Some(issued.plaintext.as_str())), ("state", query.state.as_deref())],
        )?;

        // Nothing is persisted until the redirect can be built
        if is_new {
            self.storage.store_authorization(&authorization).await?;
            tracing::debug!(
                client_id = %application.client_id,
                authorization_id = %authorization.id,
                "created authorization"
            );
        }
        self.storage.store_token(&issued.token).await?;

        self.audit.record(AuditEvent::AuthorizationCodeIssued {
            client_id: application.client_id,
            user_id: user.user_id.clone(),
            authorization_id: authorization.id,
        });

        Ok(AuthorizeOutcome::Redirect(location))
    }
}

/// Redirect location carrying an error back to an already validated
/// redirect URI.
pub fn error_redirect(
    redirect_uri: &str,
    error: &OAuthError,
    state: Option<&str>,
) -> Result<String, OAuthError> {
    append_query(
        redirect_uri,
        &[
            ("error", Some(error.error_code())),
            ("error_description", Some(error.description())),
            ("state", state),
        ],
    )
}

/// Append parameters to a URI, keeping any query it already has.
fn append_query(uri: &str, params: &[(&str, Option<&str>)]) -> Result<String, OAuthError> {
    let mut url = Url::parse(uri)
        .map_err(|e| OAuthError::InvalidRequest(format!("Invalid redirect URI: {}", e)))?;

    {
        let mut pairs = url.query_pairs_mut();
        for (name, value) in params {
            if let Some(value) = value {
                pairs.append_pair(name, value);
            }
        }
    }

    Ok(url.to_string())
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oauth::test_support::*;
    use crate::storage::traits::TokenStore;

    #[tokio::test]
    async fn test_authorize_issues_code() {
        let ctx = TestContext::new().await;
        let mut query = authorize_query("openid profile");
        query.state = Some("xyz".to_string());

        let outcome = ctx
            .server
            .authorize(&query, Some(&authenticated_user()))
            .await
            .unwrap();
        let AuthorizeOutcome::Redirect(location) = outcome else {
            panic!("expected redirect");
        };

        assert!(location.starts_with("https://app1/cb?code="));
        assert_eq!(query_param(&location, "state").as_deref(), Some("xyz"));

        let code = query_param(&location, "code").unwrap();
        let token = ctx
            .storage
            .get_token_by_reference(&hash_token(&code))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(token.kind, TokenKind::AuthorizationCode);
        assert_eq!(token.status(), TokenStatus::Valid);

        let payload: AuthorizationCodePayload =
            serde_json::from_value(token.payload.unwrap()).unwrap();
        assert_eq!(payload.redirect_uri, APP1_REDIRECT);
        assert_eq!(payload.scope, "openid profile");
        assert_eq!(payload.code_challenge_method.as_deref(), Some("S256"));
    }

    #[tokio::test]
    async fn test_authorize_reuses_authorization() {
        let ctx = TestContext::new().await;
        let first = ctx.authorize_code("openid profile").await;
        let second = ctx.authorize_code("profile openid").await;

        let first = ctx
            .storage
            .get_token_by_reference(&hash_token(&first))
            .await
            .unwrap()
            .unwrap();
        let second = ctx
            .storage
            .get_token_by_reference(&hash_token(&second))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.authorization_id, second.authorization_id);
        assert_ne!(first.reference_id, second.reference_id);
    }

    #[tokio::test]
    async fn test_authorize_validation_errors() {
        let ctx = TestContext::new().await;
        let user = authenticated_user();

        let cases: Vec<(AuthorizeQuery, &str)> = vec![
            (
                AuthorizeQuery {
                    client_id: Some("missing".to_string()),
                    ..authorize_query("openid")
                },
                "invalid_client",
            ),
            (
                AuthorizeQuery {
                    client_id: Some("inactive".to_string()),
                    redirect_uri: Some("https://inactive/cb".to_string()),
                    ..authorize_query("openid")
                },
                "invalid_client",
            ),
            (
                AuthorizeQuery {
                    redirect_uri: Some("https://app1/cb/".to_string()),
                    ..authorize_query("openid")
                },
                "invalid_request",
            ),
            (
                AuthorizeQuery {
                    redirect_uri: Some("https://app1/cb?x=1".to_string()),
                    ..authorize_query("openid")
                },
                "invalid_request",
            ),
            (
                AuthorizeQuery {
                    response_type: Some("token".to_string()),
                    ..authorize_query("openid")
                },
                "unsupported_response_type",
            ),
            (
                AuthorizeQuery {
                    code_challenge: None,
                    ..authorize_query("openid")
                },
                "invalid_request",
            ),
            (
                AuthorizeQuery {
                    code_challenge_method: Some("S512".to_string()),
                    ..authorize_query("openid")
                },
                "invalid_request",
            ),
        ];

        for (query, expected) in cases {
            let err = ctx.server.authorize(&query, Some(&user)).await.unwrap_err();
            assert_eq!(err.error_code(), expected, "{query:?}");
        }
    }

    #[tokio::test]
    async fn test_authorize_without_user_requires_login() {
        let ctx = TestContext::new().await;
        let mut query = authorize_query("openid");
        query.state = Some("abc".to_string());

        let outcome = ctx.server.authorize(&query, None).await.unwrap();
        match outcome {
            AuthorizeOutcome::LoginRequired {
                redirect_uri,
                state,
            } => {
                assert_eq!(redirect_uri, APP1_REDIRECT);
                assert_eq!(state.as_deref(), Some("abc"));
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_confidential_client_may_skip_pkce() {
        let ctx = TestContext::new().await;
        let query = AuthorizeQuery {
            client_id: Some("app2".to_string()),
            redirect_uri: Some("https://app2/cb".to_string()),
            response_type: Some("code".to_string()),
            scope: Some("openid".to_string()),
            ..AuthorizeQuery::default()
        };

        let outcome = ctx
            .server
            .authorize(&query, Some(&authenticated_user()))
            .await
            .unwrap();
        assert!(matches!(outcome, AuthorizeOutcome::Redirect(_)));
    }

    #[test]
    fn test_append_query_delimiter() {
        let location =
            append_query("https://app/cb?tenant=a", &[("code", Some("c1")), ("state", None)])
                .unwrap();
        assert_eq!(location, "https://app/cb?tenant=a&code=c1");

        let location = append_query("https://app/cb", &[("code", Some("c1"))]).unwrap();
        assert_eq!(location, "https://app/cb?code=c1");
    }

    #[test]
    fn test_error_redirect() {
        let err = OAuthError::LoginRequired("No session".to_string());
        let location = error_redirect("https://app/cb", &err, Some("s1")).unwrap();
        assert_eq!(query_param(&location, "error").as_deref(), Some("login_required"));
        assert_eq!(query_param(&location, "state").as_deref(), Some("s1"));
    }

    #[tokio::test]
    async fn test_unusable_redirect_leaves_nothing_behind() {
        use crate::storage::traits::{ApplicationStore, AuthorizationStore};

        let ctx = TestContext::new().await;
        ctx.storage
            .store_application(&application("broken", ClientType::Public, "not a url"))
            .await
            .unwrap();

        let query = AuthorizeQuery {
            client_id: Some("broken".to_string()),
            redirect_uri: Some("not a url".to_string()),
            ..authorize_query("openid")
        };
        let err = ctx
            .server
            .authorize(&query, Some(&authenticated_user()))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "invalid_request");

        let authorization = ctx
            .storage
            .find_valid_authorization("id-broken", TEST_USER_ID, "openid")
            .await
            .unwrap();
        assert!(authorization.is_none());
    }
}

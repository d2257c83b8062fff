//! Authorization server core: client authentication, token revocation and
//! access token verification.
//!
//! The `/authorize` and `/token` flows are implemented on the same type in
//! [`crate::oauth::authorize`] and [`crate::oauth::token_exchange`].

use base64::{Engine, prelude::*};
use chrono::Utc;
use http::HeaderMap;
use http::header::AUTHORIZATION;
use serde::Deserialize;
use std::sync::Arc;

use crate::audit::{AuditEvent, AuditLogger};
use crate::errors::{KeyError, OAuthError};
use crate::oauth::openid::{AccessTokenClaims, OpenIDClaims};
use crate::oauth::signing_keys::{SigningKeyManager, rs256_validation};
use crate::oauth::tokens::TokenFactory;
use crate::oauth::types::*;
use crate::storage::traits::OAuthStorage;

/// OAuth 2.0 / OpenID Connect authorization server
pub struct AuthorizationServer {
    pub(crate) storage: Arc<dyn OAuthStorage>,
    pub(crate) signing_keys: Arc<SigningKeyManager>,
    pub(crate) token_factory: TokenFactory,
    pub(crate) audit: AuditLogger,
    /// Server issuer URL (external base)
    pub(crate) issuer: String,
    /// Fixed `aud` of access tokens
    pub(crate) access_token_audience: String,
}

impl AuthorizationServer {
    pub fn new(
        storage: Arc<dyn OAuthStorage>,
        signing_keys: Arc<SigningKeyManager>,
        token_factory: TokenFactory,
        audit: AuditLogger,
        issuer: String,
        access_token_audience: String,
    ) -> Self {
        Self {
            storage,
            signing_keys,
            token_factory,
            audit,
            issuer,
            access_token_audience,
        }
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn storage(&self) -> &Arc<dyn OAuthStorage> {
        &self.storage
    }

    /// Look up the client and check its credentials.
    ///
    /// Confidential clients must present a matching secret; public clients
    /// only need to identify themselves.
    pub async fn authenticate_client(
        &self,
        client_auth: Option<ClientAuthentication>,
    ) -> Result<Application, OAuthError> {
        let client_auth = client_auth
            .ok_or_else(|| OAuthError::InvalidClient("Missing client credentials".to_string()))?;

        let application = self
            .storage
            .get_application_by_client_id(&client_auth.client_id)
            .await?
            .filter(|application| application.is_active)
            .ok_or_else(|| OAuthError::InvalidClient("Client not found".to_string()))?;

        if application.client_type == ClientType::Confidential {
            let secret = client_auth
                .client_secret
                .as_deref()
                .ok_or_else(|| OAuthError::InvalidClient("Missing client secret".to_string()))?;

            if !application.verify_secret(secret) {
                return Err(OAuthError::InvalidClient(
                    "Invalid client secret".to_string(),
                ));
            }
        }

        Ok(application)
    }

    /// Token revocation (RFC 7009).
    ///
    /// Unknown tokens and tokens of other clients are ignored. A refresh
    /// token takes its whole authorization down with it.
    pub async fn revoke(
        &self,
        client_auth: Option<ClientAuthentication>,
        token: &str,
        token_type_hint: Option<&str>,
    ) -> Result<(), OAuthError> {
        let application = self.authenticate_client(client_auth).await?;
        if token.is_empty() {
            return Err(OAuthError::InvalidRequest("Missing token".to_string()));
        }

        let Some(record) = self.find_revocable(token, token_type_hint).await? else {
            tracing::debug!(client_id = %application.client_id, "revocation of unknown token ignored");
            return Ok(());
        };

        if record.application_id.as_deref() != Some(application.id.as_str()) {
            tracing::warn!(
                client_id = %application.client_id,
                "client attempted to revoke a token issued to another client"
            );
            return Ok(());
        }

        let revoked = match (record.kind, record.authorization_id.as_deref()) {
            (TokenKind::RefreshToken, Some(authorization_id)) => {
                self.storage.revoke_authorization(authorization_id).await?
            }
            _ => usize::from(self.storage.revoke_token(&record.reference_id).await?),
        };

        self.audit.record(AuditEvent::TokenRevoked {
            client_id: application.client_id,
            kind: record.kind,
            revoked,
        });
        Ok(())
    }

    async fn find_revocable(
        &self,
        token: &str,
        token_type_hint: Option<&str>,
    ) -> Result<Option<Token>, OAuthError> {
        let looks_like_jwt = token.split('.').count() == 3;
        if looks_like_jwt && token_type_hint != Some("refresh_token") {
            if let Some(record) = self.find_access_token_reference(token).await? {
                return Ok(Some(record));
            }
        }

        Ok(self
            .storage
            .get_token_by_reference(&hash_token(token))
            .await?)
    }

    /// Access token record of a JWT whose signature still verifies; expiry
    /// is not checked so expired tokens can still be revoked.
    async fn find_access_token_reference(&self, token: &str) -> Result<Option<Token>, OAuthError> {
        let mut validation = rs256_validation(&self.issuer, &self.access_token_audience);
        validation.validate_exp = false;

        let claims = match self
            .signing_keys
            .verify::<AccessTokenClaims>(token, &validation)
            .await
        {
            Ok(claims) => claims,
            Err(KeyError::Storage(err)) => return Err(err.into()),
            Err(_) => return Ok(None),
        };

        Ok(self
            .storage
            .get_token_by_reference(&hash_token(&claims.jti))
            .await?
            .filter(|record| record.kind == TokenKind::AccessToken))
    }

    /// Verify a bearer access token.
    ///
    /// The JWT must verify against the key set and its reference record must
    /// still be valid, so revocation takes effect before the JWT expires.
    pub async fn verify_access_token(&self, bearer: &str) -> Result<AccessTokenClaims, OAuthError> {
        let validation = rs256_validation(&self.issuer, &self.access_token_audience);
        let claims = match self
            .signing_keys
            .verify::<AccessTokenClaims>(bearer, &validation)
            .await
        {
            Ok(claims) => claims,
            Err(KeyError::Storage(err)) => return Err(err.into()),
            Err(err) => return Err(OAuthError::InvalidToken(err.to_string())),
        };

        let now = Utc::now();
        let record = self
            .storage
            .get_token_by_reference(&hash_token(&claims.jti))
            .await?;

        match record {
            Some(record) if record.kind == TokenKind::AccessToken && record.is_usable(now) => {
                Ok(claims)
            }
            Some(_) => Err(OAuthError::InvalidToken(
                "Access token has been revoked".to_string(),
            )),
            None => Err(OAuthError::InvalidToken(
                "Unknown access token".to_string(),
            )),
        }
    }

    /// UserInfo claims for a bearer access token, filtered by its scopes.
    pub async fn userinfo(&self, bearer: &str) -> Result<OpenIDClaims, OAuthError> {
        let claims = self.verify_access_token(bearer).await?;
        let user = self
            .storage
            .get_user(&claims.sub)
            .await?
            .ok_or_else(|| OAuthError::InvalidToken("Unknown subject".to_string()))?;

        Ok(OpenIDClaims::userinfo_for(&user, &parse_scope(&claims.scope)))
    }
}

/// Client Authentication extracted from request
#[derive(Clone)]
pub struct ClientAuthentication {
    pub client_id: String,
    pub client_secret: Option<String>,
}

impl std::fmt::Debug for ClientAuthentication {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientAuthentication")
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Form data for token endpoint
#[derive(Debug, Deserialize)]
pub struct TokenForm {
    pub grant_type: String,
    pub code: Option<String>,
    pub redirect_uri: Option<String>,
    pub code_verifier: Option<String>,
    pub refresh_token: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

impl TryFrom<TokenForm> for TokenRequest {
    type Error = OAuthError;

    fn try_from(form: TokenForm) -> Result<Self, Self::Error> {
        let grant_type = match form.grant_type.as_str() {
            "authorization_code" => GrantType::AuthorizationCode,
            "refresh_token" => GrantType::RefreshToken,
            _ => return Err(OAuthError::UnsupportedGrantType(form.grant_type)),
        };

        Ok(Self {
            grant_type,
            code: form.code,
            redirect_uri: form.redirect_uri,
            code_verifier: form.code_verifier,
            refresh_token: form.refresh_token,
        })
    }
}

/// Form data for revocation endpoint
#[derive(Debug, Deserialize)]
pub struct RevokeForm {
    pub token: String,
    pub token_type_hint: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

/// Extract client authentication from the Authorization header, falling
/// back to form parameters.
pub fn extract_client_auth(
    headers: &HeaderMap,
    form_client_id: Option<&str>,
    form_client_secret: Option<&str>,
) -> Option<ClientAuthentication> {
    if let Some(credentials) = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Basic "))
        .and_then(|encoded| BASE64_STANDARD.decode(encoded.trim()).ok())
        .and_then(|decoded| String::from_utf8(decoded).ok())
    {
        if let Some((client_id, client_secret)) = credentials.split_once(':') {
            return Some(ClientAuthentication {
                client_id: client_id.to_string(),
                client_secret: Some(client_secret.to_string()),
            });
        }
    }

    form_client_id.map(|client_id| ClientAuthentication {
        client_id: client_id.to_string(),
        client_secret: form_client_secret.map(str::to_string),
    })
}

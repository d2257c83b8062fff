//! The `/token` step: authorization code redemption and refresh token
//! rotation.
//!
//! Both grants sign their JWTs first and then redeem the presented
//! credential and insert the replacement records in one storage
//! transaction. A concurrent loser of that compare-and-swap sees
//! `invalid_grant` and nothing it signed is ever recorded as valid.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::audit::AuditEvent;
use crate::errors::OAuthError;
use crate::oauth::auth_server::{AuthorizationServer, ClientAuthentication};
use crate::oauth::openid::{AccessTokenClaims, OpenIDClaims};
use crate::oauth::pkce;
use crate::oauth::tokens::TokenSubject;
use crate::oauth::types::*;

/// ID token inputs that come from the original authentication
struct IdTokenContext {
    nonce: Option<String>,
    auth_time: DateTime<Utc>,
}

/// Signed response plus the records to persist with the redemption
struct IssuedTokenSet {
    response: TokenResponse,
    records: Vec<Token>,
}

impl AuthorizationServer {
    /// Handle token requests (RFC 6749 Section 4.1.3 and Section 6)
    pub async fn token(
        &self,
        request: TokenRequest,
        client_auth: Option<ClientAuthentication>,
    ) -> Result<TokenResponse, OAuthError> {
        let application = self.authenticate_client(client_auth).await?;

        match request.grant_type {
            GrantType::AuthorizationCode => {
                self.exchange_authorization_code(&application, request)
                    .await
            }
            GrantType::RefreshToken => self.exchange_refresh_token(&application, request).await,
        }
    }

    async fn exchange_authorization_code(
        &self,
        application: &Application,
        request: TokenRequest,
    ) -> Result<TokenResponse, OAuthError> {
        let code = request
            .code
            .as_deref()
            .filter(|code| !code.is_empty())
            .ok_or_else(|| OAuthError::InvalidRequest("Missing authorization code".to_string()))?;

        let redirect_uri = request
            .redirect_uri
            .as_deref()
            .ok_or_else(|| OAuthError::InvalidRequest("Missing redirect URI".to_string()))?;

        let now = Utc::now();
        let token = self
            .storage
            .get_token_by_reference(&hash_token(code))
            .await?
            .ok_or_else(|| OAuthError::InvalidGrant("Invalid authorization code".to_string()))?;

        if token.kind != TokenKind::AuthorizationCode {
            return Err(OAuthError::InvalidGrant(
                "Invalid authorization code".to_string(),
            ));
        }
        if token.status() != TokenStatus::Valid {
            return Err(OAuthError::InvalidGrant(
                "Authorization code already used".to_string(),
            ));
        }
        if token.is_expired(now) {
            return Err(OAuthError::InvalidGrant(
                "Authorization code expired".to_string(),
            ));
        }
        if token.application_id.as_deref() != Some(application.id.as_str()) {
            return Err(OAuthError::InvalidGrant(
                "Authorization code was issued to another client".to_string(),
            ));
        }

        let payload: AuthorizationCodePayload = token
            .payload
            .clone()
            .ok_or_else(|| {
                OAuthError::ServerError("Authorization code has no payload".to_string())
            })
            .and_then(|payload| {
                serde_json::from_value(payload).map_err(|e| {
                    OAuthError::ServerError(format!("Malformed authorization code payload: {}", e))
                })
            })?;

        if payload.redirect_uri != redirect_uri {
            return Err(OAuthError::InvalidGrant(
                "Redirect URI mismatch".to_string(),
            ));
        }

        if let Some(code_challenge) = payload.code_challenge.as_deref() {
            let code_verifier = request
                .code_verifier
                .as_deref()
                .filter(|verifier| !verifier.is_empty())
                .ok_or_else(|| OAuthError::InvalidRequest("Missing code_verifier".to_string()))?;
            let method = payload.code_challenge_method.as_deref().unwrap_or("plain");

            if !pkce::validate(method, code_challenge, code_verifier) {
                return Err(OAuthError::InvalidGrant(
                    "PKCE verification failed".to_string(),
                ));
            }
        }

        let authorization_id = token.authorization_id.as_deref().ok_or_else(|| {
            OAuthError::ServerError("Authorization code has no authorization".to_string())
        })?;
        let user = self.load_user(&token.user_id).await?;

        let id_token = parse_scope(&payload.scope).contains("openid").then(|| IdTokenContext {
            nonce: payload.nonce.clone(),
            auth_time: payload
                .auth_time
                .and_then(|auth_time| DateTime::from_timestamp(auth_time, 0))
                .unwrap_or(now),
        });

        let issued = self
            .issue_token_set(
                application,
                &user,
                authorization_id,
                &payload.scope,
                id_token,
                now,
            )
            .await?;

        if !self
            .storage
            .redeem_and_store(&token.reference_id, now, &issued.records)
            .await?
        {
            return Err(OAuthError::InvalidGrant(
                "Authorization code already used".to_string(),
            ));
        }

        tracing::debug!(
            client_id = %application.client_id,
            authorization_id = %authorization_id,
            "authorization code redeemed"
        );
        self.audit.record(AuditEvent::AuthorizationCodeRedeemed {
            client_id: application.client_id.clone(),
            user_id: user.id,
            authorization_id: authorization_id.to_string(),
        });

        Ok(issued.response)
    }

    async fn exchange_refresh_token(
        &self,
        application: &Application,
        request: TokenRequest,
    ) -> Result<TokenResponse, OAuthError> {
        let refresh_token = request
            .refresh_token
            .as_deref()
            .filter(|token| !token.is_empty())
            .ok_or_else(|| OAuthError::InvalidRequest("Missing refresh token".to_string()))?;

        let now = Utc::now();
        let token = self
            .storage
            .get_token_by_reference(&hash_token(refresh_token))
            .await?
            .ok_or_else(|| OAuthError::InvalidGrant("Invalid refresh token".to_string()))?;

        if token.kind != TokenKind::RefreshToken {
            return Err(OAuthError::InvalidGrant("Invalid refresh token".to_string()));
        }
        if token.application_id.as_deref() != Some(application.id.as_str()) {
            return Err(OAuthError::InvalidGrant(
                "Refresh token was issued to another client".to_string(),
            ));
        }

        match token.status() {
            TokenStatus::Valid => {}
            TokenStatus::Redeemed => {
                let leeway = self.token_factory.lifetimes().refresh_token_reuse_leeway;
                if token
                    .redemption_date()
                    .is_some_and(|redeemed_at| now - redeemed_at < leeway)
                {
                    tracing::info!(
                        client_id = %application.client_id,
                        authorization_id = ?token.authorization_id,
                        "refresh token replayed within reuse leeway"
                    );
                    return Err(OAuthError::InvalidGrant(
                        "Refresh token already used".to_string(),
                    ));
                }
                self.handle_refresh_token_reuse(application, &token).await?;
                return Err(OAuthError::InvalidGrant(
                    "Refresh token already used".to_string(),
                ));
            }
            TokenStatus::Revoked => {
                return Err(OAuthError::InvalidGrant(
                    "Refresh token revoked".to_string(),
                ));
            }
        }

        if token.is_expired(now) {
            return Err(OAuthError::InvalidGrant("Refresh token expired".to_string()));
        }

        let authorization_id = token.authorization_id.as_deref().ok_or_else(|| {
            OAuthError::ServerError("Refresh token has no authorization".to_string())
        })?;
        let authorization = self
            .storage
            .get_authorization(authorization_id)
            .await?
            .filter(|authorization| authorization.status == AuthorizationStatus::Valid)
            .ok_or_else(|| OAuthError::InvalidGrant("Authorization revoked".to_string()))?;
        let user = self.load_user(&token.user_id).await?;

        let id_token = parse_scope(&authorization.scopes)
            .contains("openid")
            .then_some(IdTokenContext {
                nonce: None,
                auth_time: now,
            });

        let issued = self
            .issue_token_set(
                application,
                &user,
                &authorization.id,
                &authorization.scopes,
                id_token,
                now,
            )
            .await?;

        let rotated = self
            .storage
            .redeem_and_store(&token.reference_id, now, &issued.records)
            .await
            .inspect_err(|err| {
                tracing::error!(
                    client_id = %application.client_id,
                    authorization_id = %authorization.id,
                    error = %err,
                    "refresh token rotation failed; the client must re-authenticate"
                )
            })?;

        if !rotated {
            return Err(OAuthError::InvalidGrant(
                "Refresh token already used".to_string(),
            ));
        }

        self.audit.record(AuditEvent::RefreshTokenRotated {
            client_id: application.client_id.clone(),
            user_id: user.id,
            authorization_id: authorization.id,
        });

        Ok(issued.response)
    }

    /// A redeemed refresh token came back: the chain is compromised, so
    /// every token under its authorization is revoked.
    async fn handle_refresh_token_reuse(
        &self,
        application: &Application,
        token: &Token,
    ) -> Result<(), OAuthError> {
        let revoked = match token.authorization_id.as_deref() {
            Some(authorization_id) => {
                self.storage
                    .revoke_tokens_by_authorization(authorization_id)
                    .await?
            }
            None => 0,
        };

        tracing::warn!(
            client_id = %application.client_id,
            authorization_id = ?token.authorization_id,
            revoked,
            "refresh token reuse detected"
        );
        self.audit.record(AuditEvent::RefreshTokenReuseDetected {
            client_id: application.client_id.clone(),
            user_id: token.user_id.clone(),
            authorization_id: token.authorization_id.clone(),
            revoked,
        });
        Ok(())
    }

    async fn load_user(&self, user_id: &str) -> Result<User, OAuthError> {
        self.storage
            .get_user(user_id)
            .await?
            .ok_or_else(|| OAuthError::InvalidGrant("User no longer exists".to_string()))
    }

    /// Sign the access (and ID) token and build the records that go in with
    /// the redemption.
    async fn issue_token_set(
        &self,
        application: &Application,
        user: &User,
        authorization_id: &str,
        scope: &str,
        id_token: Option<IdTokenContext>,
        now: DateTime<Utc>,
    ) -> Result<IssuedTokenSet, OAuthError> {
        let credentials = self.signing_keys.get_active_signing_credentials().await?;
        let lifetimes = self.token_factory.lifetimes();

        let jti = Uuid::new_v4().to_string();
        let access_claims = AccessTokenClaims::new(
            &self.issuer,
            &self.access_token_audience,
            user,
            &application.client_id,
            scope,
            jti.clone(),
            now,
            lifetimes.access_token,
        );
        let access_token = credentials.sign(&access_claims)?;

        let id_token = match id_token {
            Some(context) => {
                let claims = OpenIDClaims::new_id_token(
                    self.issuer.clone(),
                    user.id.clone(),
                    application.client_id.clone(),
                    now,
                    lifetimes.id_token,
                    context.auth_time,
                )
                .with_nonce(context.nonce)
                .with_name(user.name.clone())
                .with_email(user.email.clone());
                Some(credentials.sign(&claims)?)
            }
            None => None,
        };

        let subject = TokenSubject {
            application_id: &application.id,
            authorization_id,
            user_id: &user.id,
        };
        let access_reference = self
            .token_factory
            .access_token_reference(subject, &jti, now);
        let refresh = self.token_factory.refresh_token(subject, now);

        let response = TokenResponse {
            access_token,
            token_type: TokenType::Bearer,
            expires_in: lifetimes.access_token.num_seconds().max(0) as u64,
            refresh_token: Some(refresh.plaintext),
            id_token,
            scope: (!scope.is_empty()).then(|| scope.to_string()),
        };

        Ok(IssuedTokenSet {
            response,
            records: vec![access_reference, refresh.token],
        })
    }
}

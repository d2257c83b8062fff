//! Token record issuance.
//!
//! Every token starts `Valid`. Opaque credentials (codes, refresh tokens)
//! are returned to the caller once as plaintext; only their hash is kept.

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::errors::OAuthError;
use crate::oauth::types::{
    AuthorizationCodePayload, Token, TokenKind, TokenStatus, generate_token, hash_token,
};

/// Lifetimes applied by the [`TokenFactory`]
#[derive(Debug, Clone, Copy)]
pub struct TokenLifetimes {
    pub authorization_code: Duration,
    pub access_token: Duration,
    pub refresh_token: Duration,
    pub id_token: Duration,
    /// How long after rotation a replayed refresh token is treated as a
    /// lost race rather than reuse
    pub refresh_token_reuse_leeway: Duration,
}

impl Default for TokenLifetimes {
    fn default() -> Self {
        Self {
            authorization_code: Duration::minutes(5),
            access_token: Duration::hours(1),
            refresh_token: Duration::days(14),
            id_token: Duration::hours(1),
            refresh_token_reuse_leeway: Duration::seconds(10),
        }
    }
}

/// A freshly issued opaque credential and its persisted record
#[derive(Debug, Clone)]
pub struct IssuedToken {
    /// Handed to the client once, never stored
    pub plaintext: String,
    pub token: Token,
}

/// Who a token is issued to
#[derive(Debug, Clone, Copy)]
pub struct TokenSubject<'a> {
    pub application_id: &'a str,
    pub authorization_id: &'a str,
    pub user_id: &'a str,
}

#[derive(Debug, Clone, Default)]
pub struct TokenFactory {
    lifetimes: TokenLifetimes,
}

impl TokenFactory {
    pub fn new(lifetimes: TokenLifetimes) -> Self {
        Self { lifetimes }
    }

    pub fn lifetimes(&self) -> &TokenLifetimes {
        &self.lifetimes
    }

    pub fn authorization_code(
        &self,
        subject: TokenSubject<'_>,
        payload: &AuthorizationCodePayload,
        now: DateTime<Utc>,
    ) -> Result<IssuedToken, OAuthError> {
        let payload = serde_json::to_value(payload)
            .map_err(|e| OAuthError::ServerError(format!("Failed to encode code payload: {}", e)))?;
        let plaintext = generate_token();
        let token = build(
            subject,
            TokenKind::AuthorizationCode,
            hash_token(&plaintext),
            Some(payload),
            now,
            now + self.lifetimes.authorization_code,
        );
        Ok(IssuedToken { plaintext, token })
    }

    /// Record for a JWT access token, keyed by the hash of its `jti`.
    pub fn access_token_reference(
        &self,
        subject: TokenSubject<'_>,
        jti: &str,
        now: DateTime<Utc>,
    ) -> Token {
        build(
            subject,
            TokenKind::AccessToken,
            hash_token(jti),
            None,
            now,
            now + self.lifetimes.access_token,
        )
    }

    pub fn refresh_token(&self, subject: TokenSubject<'_>, now: DateTime<Utc>) -> IssuedToken {
        let plaintext = generate_token();
        let token = build(
            subject,
            TokenKind::RefreshToken,
            hash_token(&plaintext),
            None,
            now,
            now + self.lifetimes.refresh_token,
        );
        IssuedToken { plaintext, token }
    }
}

fn build(
    subject: TokenSubject<'_>,
    kind: TokenKind,
    reference_id: String,
    payload: Option<serde_json::Value>,
    now: DateTime<Utc>,
    expiration_date: DateTime<Utc>,
) -> Token {
    Token {
        id: Uuid::new_v4().to_string(),
        application_id: Some(subject.application_id.to_string()),
        authorization_id: Some(subject.authorization_id.to_string()),
        user_id: subject.user_id.to_string(),
        kind,
        reference_id,
        status: TokenStatus::Valid,
        payload,
        creation_date: now,
        expiration_date,
        redemption_date: None,
    }
}

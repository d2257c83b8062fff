//! OAuth 2.0 / OpenID Connect core types and data structures.
//!
//! Defines the persisted entities (applications, authorizations, tokens,
//! signing keys, users) together with the wire-level request and response
//! types of the token endpoint.

use base64::prelude::*;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use crate::errors::{StorageError, TokenStateError};

/// OAuth 2.0 Grant Types accepted by the token endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantType {
    AuthorizationCode,
    RefreshToken,
}

/// Token type reported in token responses
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenType {
    Bearer,
}

/// Client Type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientType {
    Public,
    Confidential,
}

impl ClientType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClientType::Public => "public",
            ClientType::Confidential => "confidential",
        }
    }
}

impl FromStr for ClientType {
    type Err = StorageError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "public" => Ok(ClientType::Public),
            "confidential" => Ok(ClientType::Confidential),
            other => Err(StorageError::InvalidData(format!(
                "Unknown client type: {}",
                other
            ))),
        }
    }
}

/// Registered OAuth client application
#[derive(Debug, Clone)]
pub struct Application {
    /// Internal identifier
    pub id: String,
    /// Public client identifier
    pub client_id: String,
    /// Hash of the client secret; `None` for public clients
    pub client_secret_hash: Option<String>,
    /// Display name
    pub display_name: Option<String>,
    /// Exact-match redirect URIs
    pub redirect_uris: Vec<String>,
    /// Exact-match post logout redirect URIs
    pub post_logout_redirect_uris: Vec<String>,
    /// Client type (public or confidential)
    pub client_type: ClientType,
    /// Inactive applications cannot authorize or exchange tokens
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Application {
    /// Exact membership check; no prefix or normalized matching.
    pub fn has_redirect_uri(&self, redirect_uri: &str) -> bool {
        self.redirect_uris.iter().any(|uri| uri == redirect_uri)
    }

    /// Compare a presented secret against the stored hash.
    pub fn verify_secret(&self, client_secret: &str) -> bool {
        match &self.client_secret_hash {
            Some(expected) => hash_token(client_secret) == *expected,
            None => false,
        }
    }
}

/// Authorization status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizationStatus {
    Valid,
    Revoked,
    Inactive,
}

impl AuthorizationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthorizationStatus::Valid => "valid",
            AuthorizationStatus::Revoked => "revoked",
            AuthorizationStatus::Inactive => "inactive",
        }
    }
}

impl FromStr for AuthorizationStatus {
    type Err = StorageError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "valid" => Ok(AuthorizationStatus::Valid),
            "revoked" => Ok(AuthorizationStatus::Revoked),
            "inactive" => Ok(AuthorizationStatus::Inactive),
            other => Err(StorageError::InvalidData(format!(
                "Unknown authorization status: {}",
                other
            ))),
        }
    }
}

/// Whether a consent record outlives the request that created it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizationKind {
    Permanent,
    AdHoc,
}

impl AuthorizationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthorizationKind::Permanent => "permanent",
            AuthorizationKind::AdHoc => "ad_hoc",
        }
    }
}

impl FromStr for AuthorizationKind {
    type Err = StorageError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "permanent" => Ok(AuthorizationKind::Permanent),
            "ad_hoc" => Ok(AuthorizationKind::AdHoc),
            other => Err(StorageError::InvalidData(format!(
                "Unknown authorization type: {}",
                other
            ))),
        }
    }
}

/// A standing grant of scopes by a user to an application
#[derive(Debug, Clone)]
pub struct Authorization {
    pub id: String,
    pub application_id: String,
    pub user_id: String,
    /// Space-delimited scope string
    pub scopes: String,
    pub status: AuthorizationStatus,
    pub kind: AuthorizationKind,
    pub creation_date: DateTime<Utc>,
}

/// The kind of credential a [`Token`] record represents
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    AuthorizationCode,
    AccessToken,
    RefreshToken,
}

impl TokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::AuthorizationCode => "authorization_code",
            TokenKind::AccessToken => "access_token",
            TokenKind::RefreshToken => "refresh_token",
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TokenKind {
    type Err = StorageError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "authorization_code" => Ok(TokenKind::AuthorizationCode),
            "access_token" => Ok(TokenKind::AccessToken),
            "refresh_token" => Ok(TokenKind::RefreshToken),
            other => Err(StorageError::InvalidData(format!(
                "Unknown token type: {}",
                other
            ))),
        }
    }
}

/// Token status. `Redeemed` and `Revoked` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenStatus {
    Valid,
    Redeemed,
    Revoked,
}

impl TokenStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenStatus::Valid => "valid",
            TokenStatus::Redeemed => "redeemed",
            TokenStatus::Revoked => "revoked",
        }
    }
}

impl fmt::Display for TokenStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TokenStatus {
    type Err = StorageError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "valid" => Ok(TokenStatus::Valid),
            "redeemed" => Ok(TokenStatus::Redeemed),
            "revoked" => Ok(TokenStatus::Revoked),
            other => Err(StorageError::InvalidData(format!(
                "Unknown token status: {}",
                other
            ))),
        }
    }
}

/// Persisted token record.
///
/// Authorization codes, access token references and refresh tokens share
/// this shape. The plaintext credential is never stored; `reference_id` is
/// its hash. Status only moves through [`Token::redeem`] and
/// [`Token::revoke`].
#[derive(Debug, Clone)]
pub struct Token {
    pub id: String,
    pub application_id: Option<String>,
    pub authorization_id: Option<String>,
    pub user_id: String,
    pub kind: TokenKind,
    pub reference_id: String,
    pub(crate) status: TokenStatus,
    pub payload: Option<serde_json::Value>,
    pub creation_date: DateTime<Utc>,
    pub expiration_date: DateTime<Utc>,
    pub(crate) redemption_date: Option<DateTime<Utc>>,
}

impl Token {
    pub fn status(&self) -> TokenStatus {
        self.status
    }

    pub fn redemption_date(&self) -> Option<DateTime<Utc>> {
        self.redemption_date
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiration_date <= now
    }

    /// Valid and not past its expiration date.
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.status == TokenStatus::Valid && !self.is_expired(now)
    }

    /// Transition `Valid -> Redeemed`.
    pub fn redeem(&mut self, now: DateTime<Utc>) -> Result<(), TokenStateError> {
        if self.status != TokenStatus::Valid {
            return Err(TokenStateError::NotRedeemable(
                self.id.clone(),
                self.status.to_string(),
            ));
        }
        self.status = TokenStatus::Redeemed;
        self.redemption_date = Some(now);
        Ok(())
    }

    /// Transition `Valid -> Revoked`.
    pub fn revoke(&mut self) -> Result<(), TokenStateError> {
        if self.status != TokenStatus::Valid {
            return Err(TokenStateError::NotRevocable(
                self.id.clone(),
                self.status.to_string(),
            ));
        }
        self.status = TokenStatus::Revoked;
        Ok(())
    }
}

/// Payload stored with every authorization code
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationCodePayload {
    pub redirect_uri: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_challenge: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_challenge_method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    pub scope: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_time: Option<i64>,
}

/// RSA signing key record
#[derive(Debug, Clone)]
pub struct SigningKey {
    pub id: String,
    /// JWT `kid`
    pub key_id: String,
    pub algorithm: String,
    /// Public JWK (`kty`, `n`, `e`)
    pub public_key: serde_json::Value,
    /// Private JWK (`n`, `e`, `d`, `p`, `q`, `dp`, `dq`, `qi`)
    pub private_key: serde_json::Value,
    pub is_active: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl SigningKey {
    /// Active keys and keys without a passed expiry can verify signatures.
    pub fn is_verifiable(&self, now: DateTime<Utc>) -> bool {
        self.is_active || self.expires_at.is_none_or(|expires_at| expires_at > now)
    }
}

/// Read-only view of an end user, owned by the external account service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: String,
    pub email_verified: bool,
    pub name: Option<String>,
}

/// Token Exchange Request
#[derive(Debug, Clone)]
pub struct TokenRequest {
    /// Grant type
    pub grant_type: GrantType,
    /// Authorization code (for authorization_code grant)
    pub code: Option<String>,
    /// Redirect URI (for authorization_code grant)
    pub redirect_uri: Option<String>,
    /// Code verifier (for PKCE)
    pub code_verifier: Option<String>,
    /// Refresh token (for refresh_token grant)
    pub refresh_token: Option<String>,
}

/// Token Response
#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    /// Access token
    pub access_token: String,
    /// Token type
    pub token_type: TokenType,
    /// Expires in seconds
    pub expires_in: u64,
    /// Refresh token
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// ID token, present when `openid` was granted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    /// Granted scope
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

/// Generate a random 256-bit opaque token
pub fn generate_token() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let bytes: [u8; 32] = rng.r#gen();
    BASE64_URL_SAFE_NO_PAD.encode(bytes)
}

/// Reference id of an opaque credential: base64url(SHA-256(value))
pub fn hash_token(value: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(value.as_bytes());
    BASE64_URL_SAFE_NO_PAD.encode(hasher.finalize())
}

/// Parse a scope string into a set
pub fn parse_scope(scope: &str) -> HashSet<String> {
    scope.split_whitespace().map(|s| s.to_string()).collect()
}

/// Normalize a scope string: deduplicated, sorted, single-space separated
pub fn normalize_scope(scope: &str) -> String {
    let mut scopes: Vec<_> = parse_scope(scope).into_iter().collect();
    scopes.sort();
    scopes.join(" ")
}

/// Parse a stored URI list.
///
/// The canonical encoding is a JSON array. Older rows hold a single
/// space-delimited string, which is still accepted.
pub fn parse_uri_list(raw: &str) -> Result<Vec<String>, StorageError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    if trimmed.starts_with('[') {
        return serde_json::from_str::<Vec<String>>(trimmed).map_err(|e| {
            StorageError::InvalidData(format!("Malformed URI list '{}': {}", trimmed, e))
        });
    }

    Ok(trimmed.split_whitespace().map(|s| s.to_string()).collect())
}

/// Canonical storage encoding of a URI list
pub fn encode_uri_list(uris: &[String]) -> Result<String, StorageError> {
    serde_json::to_string(uris).map_err(|e| StorageError::SerializationFailed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn test_token() -> Token {
        let now = Utc::now();
        Token {
            id: "token-1".to_string(),
            application_id: Some("app-1".to_string()),
            authorization_id: Some("authz-1".to_string()),
            user_id: "user-1".to_string(),
            kind: TokenKind::RefreshToken,
            reference_id: hash_token("secret"),
            status: TokenStatus::Valid,
            payload: None,
            creation_date: now,
            expiration_date: now + Duration::days(14),
            redemption_date: None,
        }
    }

    #[test]
    fn test_parse_uri_list() {
        let cases: Vec<(&str, Vec<&str>)> = vec![
            (
                r#"["https://app.test/cb","https://app.test/other"]"#,
                vec!["https://app.test/cb", "https://app.test/other"],
            ),
            (
                "https://app.test/cb https://app.test/other",
                vec!["https://app.test/cb", "https://app.test/other"],
            ),
            ("  https://app.test/cb  ", vec!["https://app.test/cb"]),
            ("[]", vec![]),
            ("", vec![]),
        ];

        for (raw, expected) in cases {
            let parsed = parse_uri_list(raw).unwrap();
            assert_eq!(parsed, expected, "input: {raw}");
        }
    }

    #[test]
    fn test_parse_uri_list_rejects_malformed_json() {
        assert!(parse_uri_list(r#"["https://app.test/cb""#).is_err());
        assert!(parse_uri_list("[1, 2]").is_err());
    }

    #[test]
    fn test_encode_uri_list_is_json() {
        let uris = vec!["https://app.test/cb".to_string()];
        let encoded = encode_uri_list(&uris).unwrap();
        assert_eq!(encoded, r#"["https://app.test/cb"]"#);
        assert_eq!(parse_uri_list(&encoded).unwrap(), uris);
    }

    #[test]
    fn test_redirect_uri_exact_match() {
        let app = Application {
            id: "app-1".to_string(),
            client_id: "app1".to_string(),
            client_secret_hash: None,
            display_name: None,
            redirect_uris: vec!["https://app.test/cb".to_string()],
            post_logout_redirect_uris: vec![],
            client_type: ClientType::Public,
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        assert!(app.has_redirect_uri("https://app.test/cb"));
        assert!(!app.has_redirect_uri("https://app.test/cb/"));
        assert!(!app.has_redirect_uri("https://app.test/cb?x=1"));
        assert!(!app.has_redirect_uri("https://app.test/c"));
        assert!(!app.has_redirect_uri("HTTPS://app.test/cb"));
    }

    #[test]
    fn test_verify_secret() {
        let mut app = Application {
            id: "app-2".to_string(),
            client_id: "app2".to_string(),
            client_secret_hash: Some(hash_token("s3cret")),
            display_name: None,
            redirect_uris: vec![],
            post_logout_redirect_uris: vec![],
            client_type: ClientType::Confidential,
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        assert!(app.verify_secret("s3cret"));
        assert!(!app.verify_secret("wrong"));

        app.client_secret_hash = None;
        assert!(!app.verify_secret("s3cret"));
    }

    #[test]
    fn test_token_redeem_once() {
        let mut token = test_token();
        let now = Utc::now();

        token.redeem(now).unwrap();
        assert_eq!(token.status(), TokenStatus::Redeemed);
        assert_eq!(token.redemption_date(), Some(now));

        assert!(matches!(
            token.redeem(now),
            Err(TokenStateError::NotRedeemable(_, _))
        ));
        assert!(matches!(
            token.revoke(),
            Err(TokenStateError::NotRevocable(_, _))
        ));
    }

    #[test]
    fn test_token_revoke_is_terminal() {
        let mut token = test_token();
        token.revoke().unwrap();
        assert_eq!(token.status(), TokenStatus::Revoked);
        assert!(token.redeem(Utc::now()).is_err());
        assert!(token.revoke().is_err());
    }

    #[test]
    fn test_token_expiry() {
        let mut token = test_token();
        let now = Utc::now();
        assert!(token.is_usable(now));

        token.expiration_date = now - Duration::seconds(1);
        assert!(token.is_expired(now));
        assert!(!token.is_usable(now));
    }

    #[test]
    fn test_hash_token_is_stable() {
        assert_eq!(hash_token("abc"), hash_token("abc"));
        assert_ne!(hash_token("abc"), hash_token("abd"));
        assert_eq!(hash_token("abc").len(), 43);
    }

    #[test]
    fn test_generate_token_is_256_bits() {
        let token = generate_token();
        let decoded = BASE64_URL_SAFE_NO_PAD.decode(&token).unwrap();
        assert_eq!(decoded.len(), 32);
        assert_ne!(token, generate_token());
    }

    #[test]
    fn test_normalize_scope() {
        assert_eq!(normalize_scope("profile openid  profile"), "openid profile");
        assert_eq!(normalize_scope(""), "");
    }

    #[test]
    fn test_signing_key_verifiable() {
        let now = Utc::now();
        let mut key = SigningKey {
            id: "k".to_string(),
            key_id: "kid".to_string(),
            algorithm: "RS256".to_string(),
            public_key: serde_json::json!({}),
            private_key: serde_json::json!({}),
            is_active: false,
            expires_at: None,
            created_at: now,
        };
        assert!(key.is_verifiable(now));

        key.expires_at = Some(now - Duration::minutes(1));
        assert!(!key.is_verifiable(now));

        key.is_active = true;
        assert!(key.is_verifiable(now));
    }
}

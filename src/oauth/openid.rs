//! JWT claim sets: access tokens, OpenID Connect ID tokens and UserInfo.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::oauth::types::User;

/// Claims carried by a signed access token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    pub iss: String,
    /// User id
    pub sub: String,
    pub aud: String,
    pub exp: i64,
    pub iat: i64,
    /// Unique per token; its hash is the access token reference id
    pub jti: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// Granted scopes, space-delimited
    pub scope: String,
}

impl AccessTokenClaims {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        issuer: &str,
        audience: &str,
        user: &User,
        client_id: &str,
        scope: &str,
        jti: String,
        now: DateTime<Utc>,
        lifetime: Duration,
    ) -> Self {
        Self {
            iss: issuer.to_string(),
            sub: user.id.clone(),
            aud: audience.to_string(),
            exp: (now + lifetime).timestamp(),
            iat: now.timestamp(),
            jti,
            email: user.email.clone(),
            name: user.name.clone(),
            client_id: Some(client_id.to_string()),
            scope: scope.to_string(),
        }
    }
}

/// Unified OpenID Connect claims for ID tokens and UserInfo responses
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenIDClaims {
    /// Issuer - The URL of the authorization server
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,

    /// Subject - user id
    pub sub: String,

    /// Audience - Client ID that this token is intended for
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,

    /// Authentication time - Unix timestamp when user authenticated
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_time: Option<i64>,

    /// Authorized party - the client the token was issued to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub azp: Option<String>,

    /// Nonce from the authorize request (only for id_token)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferred_username: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_verified: Option<bool>,
}

impl OpenIDClaims {
    /// Create new claims for an ID token
    pub fn new_id_token(
        issuer: String,
        subject: String,
        client_id: String,
        now: DateTime<Utc>,
        lifetime: Duration,
        auth_time: DateTime<Utc>,
    ) -> Self {
        Self {
            iss: Some(issuer),
            sub: subject,
            aud: Some(client_id.clone()),
            exp: Some((now + lifetime).timestamp()),
            iat: Some(now.timestamp()),
            auth_time: Some(auth_time.timestamp()),
            azp: Some(client_id),
            ..Default::default()
        }
    }

    /// Create new claims for UserInfo response
    pub fn new_userinfo(subject: String) -> Self {
        Self {
            sub: subject,
            ..Default::default()
        }
    }

    pub fn with_nonce(mut self, nonce: Option<String>) -> Self {
        self.nonce = nonce;
        self
    }

    pub fn with_name(mut self, name: Option<String>) -> Self {
        self.name = name;
        self
    }

    pub fn with_email(mut self, email: String) -> Self {
        self.email = Some(email);
        self
    }

    /// UserInfo claims for `user`, filtered by the granted scopes.
    pub fn userinfo_for(user: &User, scopes: &HashSet<String>) -> Self {
        let mut claims = Self::new_userinfo(user.id.clone());

        if scopes.contains("profile") || scopes.contains("openid") {
            claims.name = user.name.clone();
            claims.preferred_username = Some(user.username.clone());
        }

        if scopes.contains("email") {
            claims.email = Some(user.email.clone());
            claims.email_verified = Some(user.email_verified);
        }

        claims
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oauth::types::parse_scope;

    fn user() -> User {
        User {
            id: "user-1".to_string(),
            username: "alice".to_string(),
            email: "alice@example.com".to_string(),
            email_verified: true,
            name: Some("Alice".to_string()),
        }
    }

    #[test]
    fn test_id_token_claims() {
        let now = Utc::now();
        let claims = OpenIDClaims::new_id_token(
            "https://auth.test".to_string(),
            "user-1".to_string(),
            "app1".to_string(),
            now,
            Duration::hours(1),
            now - Duration::minutes(3),
        )
        .with_nonce(Some("abc".to_string()))
        .with_email("alice@example.com".to_string());

        assert_eq!(claims.aud.as_deref(), Some("app1"));
        assert_eq!(claims.azp.as_deref(), Some("app1"));
        assert_eq!(claims.exp, Some(now.timestamp() + 3600));
        assert_eq!(claims.auth_time, Some((now - Duration::minutes(3)).timestamp()));
        assert_eq!(claims.nonce.as_deref(), Some("abc"));
    }

    #[test]
    fn test_id_token_omits_absent_nonce() {
        let now = Utc::now();
        let claims = OpenIDClaims::new_id_token(
            "https://auth.test".to_string(),
            "user-1".to_string(),
            "app1".to_string(),
            now,
            Duration::hours(1),
            now,
        )
        .with_nonce(None);

        let value = serde_json::to_value(&claims).unwrap();
        assert!(value.get("nonce").is_none());
        assert!(value.get("email_verified").is_none());
    }

    #[test]
    fn test_userinfo_scope_filtering() {
        let cases = [
            ("", None, None),
            ("openid", Some("alice"), None),
            ("profile", Some("alice"), None),
            ("email", None, Some("alice@example.com")),
            ("openid profile email", Some("alice"), Some("alice@example.com")),
        ];

        for (scope, username, email) in cases {
            let claims = OpenIDClaims::userinfo_for(&user(), &parse_scope(scope));
            assert_eq!(claims.sub, "user-1");
            assert_eq!(claims.preferred_username.as_deref(), username, "scope: {scope}");
            assert_eq!(claims.email.as_deref(), email, "scope: {scope}");
            assert_eq!(claims.email_verified.is_some(), email.is_some());
        }
    }

    #[test]
    fn test_access_token_claims() {
        let now = Utc::now();
        let claims = AccessTokenClaims::new(
            "https://auth.test",
            "https://api.test",
            &user(),
            "app1",
            "openid profile",
            "jti-1".to_string(),
            now,
            Duration::hours(1),
        );

        assert_eq!(claims.sub, "user-1");
        assert_eq!(claims.email, "alice@example.com");
        assert_eq!(claims.client_id.as_deref(), Some("app1"));
        assert_eq!(claims.exp - claims.iat, 3600);
    }
}

//! Browser session cookie.
//!
//! The cookie value is an RS256 JWT signed by the [`SigningKeyManager`] with
//! a dedicated audience, so sessions need no server-side table and survive
//! key rotation the same way access tokens do.

use chrono::{DateTime, Duration, Utc};
use http::HeaderMap;
use http::header::COOKIE;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::errors::KeyError;
use crate::oauth::signing_keys::{SigningKeyManager, rs256_validation};

/// Claims carried by the session cookie
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    pub iss: String,
    pub aud: String,
    /// User id
    pub sub: String,
    /// Session id
    pub sid: String,
    pub iat: i64,
    pub exp: i64,
    pub auth_time: i64,
}

impl SessionClaims {
    pub fn auth_time(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.auth_time, 0).unwrap_or_default()
    }
}

/// Cookie attributes
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub cookie_name: String,
    pub lifetime: Duration,
    pub secure: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            cookie_name: "authd_session".to_string(),
            lifetime: Duration::hours(8),
            secure: true,
        }
    }
}

pub struct SessionManager {
    signing_keys: Arc<SigningKeyManager>,
    issuer: String,
    settings: SessionSettings,
}

impl SessionManager {
    pub fn new(
        signing_keys: Arc<SigningKeyManager>,
        issuer: String,
        settings: SessionSettings,
    ) -> Self {
        Self {
            signing_keys,
            issuer,
            settings,
        }
    }

    fn audience(&self) -> String {
        format!("{}/session", self.issuer)
    }

    /// Sign a new session for `user_id`.
    pub async fn issue(
        &self,
        user_id: &str,
        auth_time: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<String, KeyError> {
        let claims = SessionClaims {
            iss: self.issuer.clone(),
            aud: self.audience(),
            sub: user_id.to_string(),
            sid: Uuid::new_v4().to_string(),
            iat: now.timestamp(),
            exp: (now + self.settings.lifetime).timestamp(),
            auth_time: auth_time.timestamp(),
        };
        let credentials = self.signing_keys.get_active_signing_credentials().await?;
        credentials.sign(&claims)
    }

    /// Verified session from the request cookies, if any.
    pub async fn current(&self, headers: &HeaderMap) -> Option<SessionClaims> {
        let value = extract_cookie(headers, &self.settings.cookie_name)?;
        let validation = rs256_validation(&self.issuer, &self.audience());
        match self
            .signing_keys
            .verify::<SessionClaims>(&value, &validation)
            .await
        {
            Ok(claims) => Some(claims),
            Err(err) => {
                tracing::debug!(error = %err, "ignoring invalid session cookie");
                None
            }
        }
    }

    /// `Set-Cookie` value establishing a session.
    pub fn session_cookie(&self, value: &str) -> String {
        format!(
            "{}={}; Path=/; Max-Age={}; HttpOnly; SameSite=Lax{}",
            self.settings.cookie_name,
            value,
            self.settings.lifetime.num_seconds(),
            self.secure_attribute()
        )
    }

    /// `Set-Cookie` value clearing the session.
    pub fn clear_cookie(&self) -> String {
        format!(
            "{}=; Path=/; Max-Age=0; HttpOnly; SameSite=Lax{}",
            self.settings.cookie_name,
            self.secure_attribute()
        )
    }

    fn secure_attribute(&self) -> &'static str {
        if self.settings.secure { "; Secure" } else { "" }
    }
}

/// Value of cookie `name` from the `Cookie` headers.
pub fn extract_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    for header in headers.get_all(COOKIE) {
        let Ok(header) = header.to_str() else {
            continue;
        };
        for cookie in header.split(';') {
            if let Some((key, value)) = cookie.trim().split_once('=')
                && key.trim() == name
            {
                let value = value.trim();
                if !value.is_empty() {
                    return Some(value.to_string());
                }
            }
        }
    }
    None
}

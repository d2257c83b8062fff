//! Request extractors for bearer tokens and browser sessions.

use axum::extract::{FromRef, FromRequestParts};
use http::header::AUTHORIZATION;
use http::request::Parts;

use crate::errors::OAuthError;
use crate::http::AppState;
use crate::oauth::SessionClaims;

/// Raw bearer token from the `Authorization` header
///
/// Rejects with `invalid_token` when the header is missing or does not use
/// the `Bearer` scheme. Verification is left to the handler.
#[derive(Clone, Debug)]
pub struct BearerToken(pub String);

impl<S> FromRequestParts<S> for BearerToken
where
    S: Send + Sync,
{
    type Rejection = OAuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| OAuthError::InvalidToken("Missing bearer token".to_string()))?;

        let (scheme, token) = header
            .split_once(' ')
            .ok_or_else(|| OAuthError::InvalidToken("Malformed authorization header".to_string()))?;
        if !scheme.eq_ignore_ascii_case("bearer") || token.trim().is_empty() {
            return Err(OAuthError::InvalidToken(
                "Bearer token required".to_string(),
            ));
        }

        Ok(Self(token.trim().to_string()))
    }
}

/// The verified session cookie, if the browser sent one
#[derive(Clone, Debug)]
pub struct CurrentSession(pub Option<SessionClaims>);

impl<S> FromRequestParts<S> for CurrentSession
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app_state = AppState::from_ref(state);
        Ok(Self(app_state.sessions.current(&parts.headers).await))
    }
}

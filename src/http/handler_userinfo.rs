//! Handles GET|POST /connect/userinfo - OpenID Connect UserInfo endpoint

use axum::{Json, extract::State};

use super::{context::AppState, middleware_auth::BearerToken};
use crate::errors::OAuthError;
use crate::oauth::OpenIDClaims;

/// Get OpenID Connect UserInfo
///
/// Returns claims about the End-User filtered by the scopes of the
/// presented access token. The token must verify and its reference must
/// still be valid.
pub async fn handle_userinfo(
    State(state): State<AppState>,
    BearerToken(token): BearerToken,
) -> Result<Json<OpenIDClaims>, OAuthError> {
    let claims = state.auth_server.userinfo(&token).await?;
    Ok(Json(claims))
}

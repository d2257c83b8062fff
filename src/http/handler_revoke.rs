//! Handles POST /connect/revoke - Token revocation (RFC 7009)

use axum::{
    Form,
    extract::{State, rejection::FormRejection},
    http::HeaderMap,
};

use super::context::AppState;
use crate::errors::OAuthError;
use crate::oauth::{RevokeForm, auth_server::extract_client_auth};

/// POST /connect/revoke
///
/// Answers 200 whether or not the token was known.
pub async fn handle_revoke(
    State(state): State<AppState>,
    headers: HeaderMap,
    form: Result<Form<RevokeForm>, FormRejection>,
) -> Result<(), OAuthError> {
    let Form(form) = form?;
    let client_auth = extract_client_auth(
        &headers,
        form.client_id.as_deref(),
        form.client_secret.as_deref(),
    );

    state
        .auth_server
        .revoke(client_auth, &form.token, form.token_type_hint.as_deref())
        .await
}

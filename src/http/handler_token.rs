//! Handles POST /connect/token - Redeems authorization codes and rotates refresh tokens

use axum::{
    Form, Json,
    extract::{State, rejection::FormRejection},
    http::{HeaderMap, HeaderValue, header},
    response::{IntoResponse, Response},
};

use super::context::AppState;
use crate::errors::OAuthError;
use crate::oauth::{TokenForm, TokenRequest, auth_server::extract_client_auth};

/// POST /connect/token
///
/// Client credentials come from HTTP Basic authentication or, failing
/// that, the `client_id`/`client_secret` form fields. A body that does not
/// parse is an `invalid_request`.
pub async fn handle_token(
    State(state): State<AppState>,
    headers: HeaderMap,
    form: Result<Form<TokenForm>, FormRejection>,
) -> Result<Response, OAuthError> {
    let Form(form) = form?;
    let client_auth = extract_client_auth(
        &headers,
        form.client_id.as_deref(),
        form.client_secret.as_deref(),
    );
    let request = TokenRequest::try_from(form)?;

    let response = state.auth_server.token(request, client_auth).await?;

    let mut response = Json(response).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    Ok(response)
}

//! Handles GET /connect/logout - Clears the session and returns to the client

use axum::{
    extract::{Query, State},
    http::header::SET_COOKIE,
    response::{IntoResponse, Redirect, Response},
};
use serde::Deserialize;
use url::Url;

use super::{context::AppState, middleware_auth::CurrentSession};
use crate::audit::AuditEvent;
use crate::errors::OAuthError;
use crate::oauth::{OpenIDClaims, signing_keys::rs256_validation};

/// RP-initiated logout parameters
#[derive(Debug, Default, Deserialize)]
pub struct LogoutQuery {
    pub client_id: Option<String>,
    pub post_logout_redirect_uri: Option<String>,
    pub id_token_hint: Option<String>,
    pub state: Option<String>,
}

/// GET /connect/logout
///
/// Redirects to `post_logout_redirect_uri` only when it is registered for
/// the client (or for any active client when none is named). Everything
/// else lands on the login page.
pub async fn handle_logout(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Query(query): Query<LogoutQuery>,
) -> Result<Response, OAuthError> {
    let client_id = match non_empty(query.client_id) {
        Some(client_id) => Some(client_id),
        None => match non_empty(query.id_token_hint) {
            Some(hint) => hinted_client_id(&state, &hint).await,
            None => None,
        },
    };

    let location = match non_empty(query.post_logout_redirect_uri) {
        Some(uri) if is_registered(&state, client_id.as_deref(), &uri).await? => {
            append_state(&uri, query.state.as_deref())?
        }
        Some(uri) => {
            tracing::warn!(
                client_id = ?client_id,
                post_logout_redirect_uri = %uri,
                "unregistered post logout redirect uri"
            );
            state.config.login_url.clone()
        }
        None => state.config.login_url.clone(),
    };

    state.audit.record(AuditEvent::LoggedOut {
        user_id: session.map(|session| session.sub),
        client_id,
    });

    Ok((
        [(SET_COOKIE, state.sessions.clear_cookie())],
        Redirect::to(&location),
    )
        .into_response())
}

/// Client named by an ID token we issued. Expiry is not checked; logout
/// commonly happens long after the ID token was minted.
async fn hinted_client_id(state: &AppState, id_token_hint: &str) -> Option<String> {
    let mut validation = rs256_validation(&state.config.external_base, "");
    validation.validate_aud = false;
    validation.validate_exp = false;

    match state
        .signing_keys
        .verify::<OpenIDClaims>(id_token_hint, &validation)
        .await
    {
        Ok(claims) => claims.azp.or(claims.aud),
        Err(err) => {
            tracing::debug!(error = %err, "ignoring invalid id_token_hint");
            None
        }
    }
}

async fn is_registered(
    state: &AppState,
    client_id: Option<&str>,
    uri: &str,
) -> Result<bool, OAuthError> {
    let storage = state.auth_server.storage();
    let applications = match client_id {
        Some(client_id) => storage
            .get_application_by_client_id(client_id)
            .await?
            .filter(|application| application.is_active)
            .into_iter()
            .collect(),
        None => storage.list_active_applications().await?,
    };

    let uri = without_query(uri);
    Ok(applications.iter().any(|application| {
        application
            .post_logout_redirect_uris
            .iter()
            .any(|registered| without_query(registered) == uri)
    }))
}

fn without_query(uri: &str) -> &str {
    uri.split(['?', '#']).next().unwrap_or(uri)
}

fn append_state(uri: &str, state: Option<&str>) -> Result<String, OAuthError> {
    let Some(state) = state else {
        return Ok(uri.to_string());
    };
    let mut url = Url::parse(uri).map_err(|e| {
        OAuthError::InvalidRequest(format!("Invalid post logout redirect URI: {}", e))
    })?;
    url.query_pairs_mut().append_pair("state", state);
    Ok(url.to_string())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.is_empty())
}

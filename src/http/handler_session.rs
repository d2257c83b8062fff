//! Handles GET /connect/session - Turns a login hand-off token into a session cookie

use axum::{
    extract::{Query, State},
    http::header::SET_COOKIE,
    response::{IntoResponse, Redirect, Response},
};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::context::AppState;
use crate::audit::AuditEvent;
use crate::errors::OAuthError;

#[derive(Debug, Default, Deserialize)]
pub struct SessionQuery {
    pub token: Option<String>,
    #[serde(rename = "returnUrl")]
    pub return_url: Option<String>,
}

/// Payload the login service stores with the hand-off token
#[derive(Debug, Deserialize)]
struct HandoffPayload {
    user_id: String,
    auth_time: Option<i64>,
}

/// GET /connect/session
pub async fn handle_session(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
) -> Result<Response, OAuthError> {
    let token = query
        .token
        .filter(|token| !token.is_empty())
        .ok_or_else(|| OAuthError::InvalidRequest("Missing token".to_string()))?;

    let payload = state
        .one_time_tokens
        .consume_once(&token)
        .await?
        .ok_or_else(|| OAuthError::InvalidRequest("Unknown or used token".to_string()))?;
    let handoff: HandoffPayload = serde_json::from_value(payload)
        .map_err(|e| OAuthError::InvalidRequest(format!("Malformed hand-off payload: {}", e)))?;

    if state
        .auth_server
        .storage()
        .get_user(&handoff.user_id)
        .await?
        .is_none()
    {
        return Err(OAuthError::InvalidRequest("Unknown user".to_string()));
    }

    let now = Utc::now();
    let auth_time = handoff
        .auth_time
        .and_then(|timestamp| DateTime::from_timestamp(timestamp, 0))
        .unwrap_or(now);
    let session = state
        .sessions
        .issue(&handoff.user_id, auth_time, now)
        .await?;

    state.audit.record(AuditEvent::SessionEstablished {
        user_id: handoff.user_id,
    });

    let location = safe_return_url(&state.config.external_base, query.return_url.as_deref());
    Ok((
        [(SET_COOKIE, state.sessions.session_cookie(&session))],
        Redirect::to(&location),
    )
        .into_response())
}

/// Local paths and URLs under the external base are allowed; anything else
/// becomes `/`.
fn safe_return_url(external_base: &str, return_url: Option<&str>) -> String {
    match return_url {
        Some(url) if url.starts_with('/') && !url.starts_with("//") && !url.starts_with("/\\") => {
            url.to_string()
        }
        Some(url) if url == external_base || url.starts_with(&format!("{}/", external_base)) => {
            url.to_string()
        }
        _ => "/".to_string(),
    }
}

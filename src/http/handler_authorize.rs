//! Handles GET|POST /connect/authorize - Issues authorization codes for the current session

use axum::{
    Form,
    extract::{Query, State, rejection::FormRejection},
    response::{IntoResponse, Redirect, Response},
};
use url::{Url, form_urlencoded};

use super::{context::AppState, middleware_auth::CurrentSession};
use crate::errors::OAuthError;
use crate::oauth::{
    AuthenticatedUser, AuthorizeOutcome, AuthorizeQuery, SessionClaims, authorize::error_redirect,
};

/// GET /connect/authorize
pub async fn handle_authorize_get(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Query(query): Query<AuthorizeQuery>,
) -> Result<Response, OAuthError> {
    authorize(&state, session, query).await
}

/// POST /connect/authorize
pub async fn handle_authorize_post(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    form: Result<Form<AuthorizeQuery>, FormRejection>,
) -> Result<Response, OAuthError> {
    let Form(query) = form?;
    authorize(&state, session, query).await
}

async fn authorize(
    state: &AppState,
    session: Option<SessionClaims>,
    query: AuthorizeQuery,
) -> Result<Response, OAuthError> {
    let prompt = Prompt::parse(query.prompt.as_deref());

    let user = session
        .filter(|_| !prompt.login)
        .map(|session| AuthenticatedUser {
            auth_time: session.auth_time(),
            user_id: session.sub,
        });

    match state.auth_server.authorize(&query, user.as_ref()).await? {
        AuthorizeOutcome::Redirect(location) => Ok(Redirect::to(&location).into_response()),
        AuthorizeOutcome::LoginRequired {
            redirect_uri,
            state: client_state,
        } => {
            if prompt.none {
                let error = OAuthError::LoginRequired("No active session".to_string());
                let location = error_redirect(&redirect_uri, &error, client_state.as_deref())?;
                return Ok(Redirect::to(&location).into_response());
            }

            let location = login_redirect(&state.config.login_url, &query)?;
            tracing::debug!(client_id = ?query.client_id, "redirecting to login");
            Ok(Redirect::to(&location).into_response())
        }
    }
}

/// The `prompt` values this server acts on
#[derive(Debug, Default, PartialEq, Eq)]
struct Prompt {
    none: bool,
    login: bool,
}

impl Prompt {
    fn parse(value: Option<&str>) -> Self {
        let mut prompt = Self::default();
        for value in value.unwrap_or_default().split_whitespace() {
            match value {
                "none" => prompt.none = true,
                "login" => prompt.login = true,
                _ => {}
            }
        }
        prompt
    }
}

/// Login page URL carrying a `returnUrl` back to this endpoint.
///
/// `prompt` is dropped from the return URL so a forced login does not
/// loop.
fn login_redirect(login_url: &str, query: &AuthorizeQuery) -> Result<String, OAuthError> {
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    let params = [
        ("client_id", &query.client_id),
        ("redirect_uri", &query.redirect_uri),
        ("response_type", &query.response_type),
        ("scope", &query.scope),
        ("state", &query.state),
        ("code_challenge", &query.code_challenge),
        ("code_challenge_method", &query.code_challenge_method),
        ("nonce", &query.nonce),
    ];
    for (name, value) in params {
        if let Some(value) = value {
            serializer.append_pair(name, value);
        }
    }
    let return_url = format!("/connect/authorize?{}", serializer.finish());

    let mut url = Url::parse(login_url)
        .map_err(|e| OAuthError::ServerError(format!("Invalid login URL: {}", e)))?;
    url.query_pairs_mut().append_pair("returnUrl", &return_url);
    Ok(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_parse() {
        assert_eq!(Prompt::parse(None), Prompt::default());
        assert_eq!(
            Prompt::parse(Some("login consent")),
            Prompt {
                none: false,
                login: true
            }
        );
        assert!(Prompt::parse(Some("none")).none);
    }

    #[test]
    fn test_login_redirect_drops_prompt() {
        let query = AuthorizeQuery {
            client_id: Some("app1".to_string()),
            redirect_uri: Some("https://app1/cb".to_string()),
            response_type: Some("code".to_string()),
            scope: Some("openid profile".to_string()),
            prompt: Some("login".to_string()),
            ..Default::default()
        };

        let location = login_redirect("https://auth.test/account/login", &query).unwrap();
        let url = Url::parse(&location).unwrap();
        let return_url = url
            .query_pairs()
            .find(|(name, _)| name == "returnUrl")
            .map(|(_, value)| value.into_owned())
            .unwrap();

        assert!(return_url.starts_with("/connect/authorize?client_id=app1"));
        assert!(return_url.contains("scope=openid+profile"));
        assert!(!return_url.contains("prompt"));
    }
}

//! Handles OpenID Connect discovery endpoints - provider configuration and JWKS

use axum::{extract::State, response::Json};
use serde_json::{Value, json};
use std::sync::Arc;

use super::context::AppState;
use crate::errors::OAuthError;
use crate::oauth::{JsonWebKeySet, SigningKeyManager};

/// OpenID Connect Configuration handler
/// GET /.well-known/openid-configuration
///
/// Returns OpenID Provider metadata as defined by OpenID Connect Discovery 1.0.
pub async fn openid_configuration_handler(State(state): State<AppState>) -> Json<Value> {
    let base = &state.config.external_base;
    let metadata = json!({
        "issuer": base,
        "authorization_endpoint": format!("{}/connect/authorize", base),
        "token_endpoint": format!("{}/connect/token", base),
        "userinfo_endpoint": format!("{}/connect/userinfo", base),
        "end_session_endpoint": format!("{}/connect/logout", base),
        "revocation_endpoint": format!("{}/connect/revoke", base),
        "jwks_uri": format!("{}/.well-known/jwks.json", base),
        "response_types_supported": ["code", "token", "id_token"],
        "response_modes_supported": ["query"],
        "grant_types_supported": ["authorization_code", "refresh_token"],
        "subject_types_supported": ["public"],
        "id_token_signing_alg_values_supported": ["RS256"],
        "scopes_supported": ["openid", "profile", "email", "offline_access"],
        "claims_supported": ["iss", "sub", "aud", "exp", "iat", "auth_time", "azp", "nonce", "name", "preferred_username", "email", "email_verified"],
        "token_endpoint_auth_methods_supported": ["client_secret_basic", "client_secret_post", "none"],
        "revocation_endpoint_auth_methods_supported": ["client_secret_basic", "client_secret_post", "none"],
        "code_challenge_methods_supported": ["plain", "S256"],
        "prompt_values_supported": ["none", "login"]
    });

    Json(metadata)
}

/// JWKS (JSON Web Key Set) handler
/// GET /.well-known/jwks.json
///
/// Returns the public half of every key that can still verify a signature.
pub async fn jwks_handler(
    State(signing_keys): State<Arc<SigningKeyManager>>,
) -> Result<Json<JsonWebKeySet>, OAuthError> {
    let key_set = signing_keys.get_verification_key_set().await?;
    Ok(Json(key_set))
}

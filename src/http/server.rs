//! Main router configuration assembling the OAuth 2.0 and discovery endpoints.

use axum::{
    Router,
    http::{HeaderValue, Method, header},
    routing::{get, post},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use super::{
    context::AppState,
    handler_authorize::{handle_authorize_get, handle_authorize_post},
    handler_logout::handle_logout,
    handler_revoke::handle_revoke,
    handler_session::handle_session,
    handler_token::handle_token,
    handler_userinfo::handle_userinfo,
    handler_well_known::{jwks_handler, openid_configuration_handler},
};

/// Build the application router
pub fn build_router(ctx: AppState) -> Router {
    let connect_routes = Router::new()
        .route(
            "/authorize",
            get(handle_authorize_get).post(handle_authorize_post),
        )
        .route("/token", post(handle_token))
        .route("/userinfo", get(handle_userinfo).post(handle_userinfo))
        .route("/logout", get(handle_logout))
        .route("/revoke", post(handle_revoke))
        .route("/session", get(handle_session));

    let well_known_routes = Router::new()
        .route("/openid-configuration", get(openid_configuration_handler))
        .route("/jwks.json", get(jwks_handler));

    let cors = cors_layer(ctx.config.cors_allowed_origins.as_ref());

    Router::new()
        .nest("/connect", connect_routes)
        .nest("/.well-known", well_known_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::warn!(origin = %origin, error = %err, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::ACCEPT])
}

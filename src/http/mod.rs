//! Axum HTTP server handlers and extractors for the OAuth 2.0 / OpenID Connect endpoints.

pub mod context;
mod handler_authorize;
mod handler_logout;
mod handler_revoke;
mod handler_session;
mod handler_token;
mod handler_userinfo;
mod handler_well_known;
pub mod middleware_auth;
pub mod server;

pub use context::AppState;
pub use server::build_router;

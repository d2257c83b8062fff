//! OAuth 2.0 / OpenID Connect authorization server library crate.
//!
//! Provides the authorization code flow with PKCE, refresh token rotation,
//! RS256 signing key management and the discovery documents relying
//! parties need to verify issued tokens.

pub mod audit;
pub mod config;
pub mod errors;
pub mod http;
pub mod oauth;
pub mod storage;

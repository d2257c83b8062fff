//! OAuth 2.0 authorization server with OpenID Connect, PKCE and refresh
//! token rotation.

pub mod auth_server;
pub mod authorize;
pub mod one_time_token;
pub mod openid;
pub mod pkce;
pub mod session;
pub mod signing_keys;
pub mod token_exchange;
pub mod tokens;
pub mod types;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export frequently used items from each module
pub use crate::storage::{inmemory::MemoryOAuthStorage, traits::OAuthStorage};
pub use auth_server::{AuthorizationServer, ClientAuthentication, RevokeForm, TokenForm};
pub use authorize::{AuthenticatedUser, AuthorizeOutcome, AuthorizeQuery};
#[cfg(feature = "redis")]
pub use one_time_token::RedisOneTimeTokenBroker;
pub use one_time_token::{MemoryOneTimeTokenBroker, OneTimeTokenBroker};
pub use openid::{AccessTokenClaims, OpenIDClaims};
pub use session::{SessionClaims, SessionManager, SessionSettings};
pub use signing_keys::{JsonWebKey, JsonWebKeySet, KeyRotation, SigningKeyManager};
pub use tokens::{TokenFactory, TokenLifetimes};
pub use types::{
    Application, Authorization, ClientType, GrantType, SigningKey, Token, TokenKind,
    TokenRequest, TokenResponse, TokenStatus, TokenType, User, parse_scope,
};

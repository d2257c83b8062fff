//! Application state shared by every request handler.

use axum::extract::FromRef;
use std::sync::Arc;

use crate::audit::{AuditLogger, AuditWriter};
use crate::config::Config;
use crate::oauth::{
    AuthorizationServer, OneTimeTokenBroker, SessionManager, SigningKeyManager, TokenFactory,
};
use crate::storage::traits::OAuthStorage;

/// Capacity of the audit event queue
const AUDIT_QUEUE_CAPACITY: usize = 1024;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// Authorize, token, revoke and userinfo logic
    pub auth_server: Arc<AuthorizationServer>,
    /// Active key and verification key set
    pub signing_keys: Arc<SigningKeyManager>,
    /// Browser session cookies
    pub sessions: Arc<SessionManager>,
    /// Hand-off tokens issued by the login service
    pub one_time_tokens: Arc<dyn OneTimeTokenBroker>,
    pub audit: AuditLogger,
}

impl AppState {
    /// Wire the server components together.
    ///
    /// The returned [`AuditWriter`] must be run for audit events to be
    /// written.
    pub fn new(
        config: Arc<Config>,
        storage: Arc<dyn OAuthStorage>,
        one_time_tokens: Arc<dyn OneTimeTokenBroker>,
    ) -> (Self, AuditWriter) {
        let (audit, audit_writer) = AuditLogger::new(AUDIT_QUEUE_CAPACITY);

        let signing_keys = Arc::new(SigningKeyManager::new(
            storage.clone(),
            config.signing_key_cache_ttl.to_std(),
        ));
        let auth_server = Arc::new(AuthorizationServer::new(
            storage,
            signing_keys.clone(),
            TokenFactory::new(config.token_lifetimes()),
            audit.clone(),
            config.external_base.clone(),
            config.access_token_audience.clone(),
        ));
        let sessions = Arc::new(SessionManager::new(
            signing_keys.clone(),
            config.external_base.clone(),
            config.session_settings(),
        ));

        let state = Self {
            config,
            auth_server,
            signing_keys,
            sessions,
            one_time_tokens,
            audit,
        };
        (state, audit_writer)
    }
}

impl FromRef<AppState> for Arc<AuthorizationServer> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.auth_server.clone()
    }
}

impl FromRef<AppState> for Arc<SigningKeyManager> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.signing_keys.clone()
    }
}

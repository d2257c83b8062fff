//! Storage trait definitions for the authorization server.
//!
//! Defines async storage interfaces for applications, authorizations,
//! tokens, signing keys and users that can be implemented by various
//! backend providers.

use crate::errors::StorageError;
use crate::oauth::types::*;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub type Result<T> = std::result::Result<T, StorageError>;

/// Trait for storing and retrieving registered client applications
#[async_trait]
pub trait ApplicationStore {
    /// Store a new application
    async fn store_application(&self, application: &Application) -> Result<()>;

    /// Retrieve an application by its public client identifier
    async fn get_application_by_client_id(&self, client_id: &str) -> Result<Option<Application>>;

    /// List applications that are currently active
    async fn list_active_applications(&self) -> Result<Vec<Application>>;
}

/// Trait for standing consent records
#[async_trait]
pub trait AuthorizationStore {
    /// Store a new authorization
    async fn store_authorization(&self, authorization: &Authorization) -> Result<()>;

    /// Retrieve an authorization by id
    async fn get_authorization(&self, id: &str) -> Result<Option<Authorization>>;

    /// Find the valid authorization for an (application, user, scopes) triple.
    /// `scopes` is compared in normalized form.
    async fn find_valid_authorization(
        &self,
        application_id: &str,
        user_id: &str,
        scopes: &str,
    ) -> Result<Option<Authorization>>;

    /// Revoke an authorization and every still-valid token issued under it.
    /// Returns the number of tokens revoked.
    async fn revoke_authorization(&self, id: &str) -> Result<usize>;
}

/// Trait for token records (authorization codes, access token references,
/// refresh tokens)
#[async_trait]
pub trait TokenStore {
    /// Store a new token. `reference_id` must be unique.
    async fn store_token(&self, token: &Token) -> Result<()>;

    /// Retrieve a token by its reference id
    async fn get_token_by_reference(&self, reference_id: &str) -> Result<Option<Token>>;

    /// Atomically transition a token from valid to redeemed.
    /// Returns `false` when the token was no longer valid.
    async fn redeem_token(&self, reference_id: &str, now: DateTime<Utc>) -> Result<bool>;

    /// Atomically redeem a token and insert its replacements.
    ///
    /// Either the redemption and every insert happen, or nothing does.
    /// Returns `false` (and inserts nothing) when the token was no longer
    /// valid.
    async fn redeem_and_store(
        &self,
        reference_id: &str,
        now: DateTime<Utc>,
        issued: &[Token],
    ) -> Result<bool>;

    /// Revoke a single valid token. Returns `false` when nothing changed.
    async fn revoke_token(&self, reference_id: &str) -> Result<bool>;

    /// Revoke every valid token issued under an authorization
    async fn revoke_tokens_by_authorization(&self, authorization_id: &str) -> Result<usize>;

    /// Revoke every valid token issued to a user
    async fn revoke_tokens_by_subject(&self, user_id: &str) -> Result<usize>;
}

/// Trait for the signing key ledger
#[async_trait]
pub trait SigningKeyStore {
    /// Retrieve the single active signing key
    async fn get_active_signing_key(&self) -> Result<Option<SigningKey>>;

    /// List every stored key, newest first
    async fn list_signing_keys(&self) -> Result<Vec<SigningKey>>;

    /// Insert a new key as the active key, demoting the current active key
    /// in the same transaction. Returns the demoted key id, if any.
    async fn activate_signing_key(&self, key: &SigningKey) -> Result<Option<String>>;

    /// Set or clear the expiry of a key
    async fn set_signing_key_expiration(
        &self,
        key_id: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<()>;
}

/// Read-only access to users managed by the account service
#[async_trait]
pub trait UserStore {
    /// Retrieve a user by id
    async fn get_user(&self, user_id: &str) -> Result<Option<User>>;
}

/// Combined storage trait
pub trait OAuthStorage:
    ApplicationStore + AuthorizationStore + TokenStore + SigningKeyStore + UserStore + Send + Sync
{
}

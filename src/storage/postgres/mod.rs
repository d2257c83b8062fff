//! PostgreSQL storage implementations
//!
//! This module provides PostgreSQL-based implementations of all storage traits.
//! PostgreSQL is suitable for production deployments with high availability requirements.

mod applications;
mod authorizations;
mod signing_keys;
mod tokens;
mod users;

use crate::errors::StorageError;
use crate::oauth::types::*;
use crate::storage::traits::*;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgRow, Postgres};
use sqlx::{Decode, Row, Type};
use std::sync::Arc;

pub use applications::PostgresApplicationStore;
pub use authorizations::PostgresAuthorizationStore;
pub use signing_keys::PostgresSigningKeyStore;
pub use tokens::PostgresTokenStore;
pub use users::PostgresUserStore;

/// Comprehensive PostgreSQL OAuth storage implementation
pub struct PostgresOAuthStorage {
    pool: PgPool,
    application_store: Arc<PostgresApplicationStore>,
    authorization_store: Arc<PostgresAuthorizationStore>,
    token_store: Arc<PostgresTokenStore>,
    signing_key_store: Arc<PostgresSigningKeyStore>,
    user_store: Arc<PostgresUserStore>,
}

impl PostgresOAuthStorage {
    /// Create a new PostgreSQL OAuth storage instance
    pub fn new(pool: PgPool) -> Self {
        Self {
            application_store: Arc::new(PostgresApplicationStore::new(pool.clone())),
            authorization_store: Arc::new(PostgresAuthorizationStore::new(pool.clone())),
            token_store: Arc::new(PostgresTokenStore::new(pool.clone())),
            signing_key_store: Arc::new(PostgresSigningKeyStore::new(pool.clone())),
            user_store: Arc::new(PostgresUserStore::new(pool.clone())),
            pool,
        }
    }

    /// Run database migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations/postgres")
            .run(&self.pool)
            .await
            .map_err(|e| StorageError::DatabaseError(format!("Migration failed: {}", e)))?;
        Ok(())
    }
}

/// Read a column, naming it in the error.
pub(crate) fn column<'r, T>(row: &'r PgRow, name: &str) -> Result<T>
where
    T: Decode<'r, Postgres> + Type<Postgres>,
{
    row.try_get(name)
        .map_err(|e| StorageError::DatabaseError(format!("Failed to get {}: {}", name, e)))
}

/// Map a driver error, turning unique violations into `Duplicate`.
pub(crate) fn database_error(e: sqlx::Error) -> StorageError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            StorageError::Duplicate(db.message().to_string())
        }
        _ => StorageError::DatabaseError(e.to_string()),
    }
}

#[async_trait]
impl ApplicationStore for PostgresOAuthStorage {
    async fn store_application(&self, application: &Application) -> Result<()> {
        self.application_store.store_application(application).await
    }

    async fn get_application_by_client_id(&self, client_id: &str) -> Result<Option<Application>> {
        self.application_store
            .get_application_by_client_id(client_id)
            .await
    }

    async fn list_active_applications(&self) -> Result<Vec<Application>> {
        self.application_store.list_active_applications().await
    }
}

#[async_trait]
impl AuthorizationStore for PostgresOAuthStorage {
    async fn store_authorization(&self, authorization: &Authorization) -> Result<()> {
        self.authorization_store
            .store_authorization(authorization)
            .await
    }

    async fn get_authorization(&self, id: &str) -> Result<Option<Authorization>> {
        self.authorization_store.get_authorization(id).await
    }

    async fn find_valid_authorization(
        &self,
        application_id: &str,
        user_id: &str,
        scopes: &str,
    ) -> Result<Option<Authorization>> {
        self.authorization_store
            .find_valid_authorization(application_id, user_id, scopes)
            .await
    }

    async fn revoke_authorization(&self, id: &str) -> Result<usize> {
        self.authorization_store.revoke_authorization(id).await
    }
}

#[async_trait]
impl TokenStore for PostgresOAuthStorage {
    async fn store_token(&self, token: &Token) -> Result<()> {
        self.token_store.store_token(token).await
    }

    async fn get_token_by_reference(&self, reference_id: &str) -> Result<Option<Token>> {
        self.token_store.get_token_by_reference(reference_id).await
    }

    async fn redeem_token(&self, reference_id: &str, now: DateTime<Utc>) -> Result<bool> {
        self.token_store.redeem_token(reference_id, now).await
    }

    async fn redeem_and_store(
        &self,
        reference_id: &str,
        now: DateTime<Utc>,
        issued: &[Token],
    ) -> Result<bool> {
        self.token_store
            .redeem_and_store(reference_id, now, issued)
            .await
    }

    async fn revoke_token(&self, reference_id: &str) -> Result<bool> {
        self.token_store.revoke_token(reference_id).await
    }

    async fn revoke_tokens_by_authorization(&self, authorization_id: &str) -> Result<usize> {
        self.token_store
            .revoke_tokens_by_authorization(authorization_id)
            .await
    }

    async fn revoke_tokens_by_subject(&self, user_id: &str) -> Result<usize> {
        self.token_store.revoke_tokens_by_subject(user_id).await
    }
}

#[async_trait]
impl SigningKeyStore for PostgresOAuthStorage {
    async fn get_active_signing_key(&self) -> Result<Option<SigningKey>> {
        self.signing_key_store.get_active_signing_key().await
    }

    async fn list_signing_keys(&self) -> Result<Vec<SigningKey>> {
        self.signing_key_store.list_signing_keys().await
    }

    async fn activate_signing_key(&self, key: &SigningKey) -> Result<Option<String>> {
        self.signing_key_store.activate_signing_key(key).await
    }

    async fn set_signing_key_expiration(
        &self,
        key_id: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        self.signing_key_store
            .set_signing_key_expiration(key_id, expires_at)
            .await
    }
}

#[async_trait]
impl UserStore for PostgresOAuthStorage {
    async fn get_user(&self, user_id: &str) -> Result<Option<User>> {
        self.user_store.get_user(user_id).await
    }
}

impl OAuthStorage for PostgresOAuthStorage {}

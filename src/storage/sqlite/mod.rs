//! SQLite storage implementations
//!
//! This module provides SQLite-based implementations of all storage traits.
//! SQLite is suitable for single-instance deployments and development.
//!
//! Timestamps are stored as RFC 3339 text and JSON documents as text.

mod applications;
mod authorizations;
mod signing_keys;
mod tokens;
mod users;

use crate::errors::StorageError;
use crate::oauth::types::*;
use crate::storage::traits::*;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{Sqlite, SqlitePool, SqliteRow};
use sqlx::{Decode, Row, Type};
use std::sync::Arc;

pub use applications::SqliteApplicationStore;
pub use authorizations::SqliteAuthorizationStore;
pub use signing_keys::SqliteSigningKeyStore;
pub use tokens::SqliteTokenStore;
pub use users::SqliteUserStore;

/// Comprehensive SQLite OAuth storage implementation
pub struct SqliteOAuthStorage {
    pool: SqlitePool,
    application_store: Arc<SqliteApplicationStore>,
    authorization_store: Arc<SqliteAuthorizationStore>,
    token_store: Arc<SqliteTokenStore>,
    signing_key_store: Arc<SqliteSigningKeyStore>,
    user_store: Arc<SqliteUserStore>,
}

impl SqliteOAuthStorage {
    /// Create a new SQLite OAuth storage instance
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            application_store: Arc::new(SqliteApplicationStore::new(pool.clone())),
            authorization_store: Arc::new(SqliteAuthorizationStore::new(pool.clone())),
            token_store: Arc::new(SqliteTokenStore::new(pool.clone())),
            signing_key_store: Arc::new(SqliteSigningKeyStore::new(pool.clone())),
            user_store: Arc::new(SqliteUserStore::new(pool.clone())),
            pool,
        }
    }

    /// Run database migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations/sqlite")
            .run(&self.pool)
            .await
            .map_err(|e| StorageError::DatabaseError(format!("Migration failed: {}", e)))?;
        Ok(())
    }
}

pub(crate) fn column<'r, T>(row: &'r SqliteRow, name: &str) -> Result<T>
where
    T: Decode<'r, Sqlite> + Type<Sqlite>,
{
    row.try_get(name)
        .map_err(|e| StorageError::DatabaseError(format!("Failed to get {}: {}", name, e)))
}

pub(crate) fn timestamp_column(row: &SqliteRow, name: &str) -> Result<DateTime<Utc>> {
    let raw: String = column(row, name)?;
    parse_timestamp(name, &raw)
}

pub(crate) fn optional_timestamp_column(
    row: &SqliteRow,
    name: &str,
) -> Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = column(row, name)?;
    raw.map(|raw| parse_timestamp(name, &raw)).transpose()
}

pub(crate) fn json_column(row: &SqliteRow, name: &str) -> Result<serde_json::Value> {
    let raw: String = column(row, name)?;
    serde_json::from_str(&raw)
        .map_err(|e| StorageError::SerializationFailed(format!("Failed to parse {}: {}", name, e)))
}

fn parse_timestamp(name: &str, raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|value| value.with_timezone(&Utc))
        .map_err(|e| StorageError::InvalidData(format!("Invalid timestamp in {}: {}", name, e)))
}

pub(crate) fn format_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn database_error(e: sqlx::Error) -> StorageError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            StorageError::Duplicate(db.message().to_string())
        }
        _ => StorageError::DatabaseError(e.to_string()),
    }
}

#[async_trait]
impl ApplicationStore for SqliteOAuthStorage {
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
impl AuthorizationStore for SqliteOAuthStorage {
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
impl TokenStore for SqliteOAuthStorage {
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
impl SigningKeyStore for SqliteOAuthStorage {
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
impl UserStore for SqliteOAuthStorage {
    async fn get_user(&self, user_id: &str) -> Result<Option<User>> {
        self.user_store.get_user(user_id).await
    }
}

impl OAuthStorage for SqliteOAuthStorage {}

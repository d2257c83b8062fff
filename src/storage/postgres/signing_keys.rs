//! PostgreSQL implementation for signing key storage

use crate::errors::StorageError;
use crate::oauth::types::SigningKey;
use crate::storage::traits::{Result, SigningKeyStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgRow};

use super::{column, database_error};

/// PostgreSQL implementation of signing key storage
pub struct PostgresSigningKeyStore {
    pool: PgPool,
}

impl PostgresSigningKeyStore {
    /// Create a new PostgreSQL signing key store
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_signing_key(row: &PgRow) -> Result<SigningKey> {
        Ok(SigningKey {
            id: column(row, "id")?,
            key_id: column(row, "key_id")?,
            algorithm: column(row, "algorithm")?,
            public_key: column(row, "public_key")?,
            private_key: column(row, "private_key")?,
            is_active: column(row, "is_active")?,
            expires_at: column(row, "expires_at")?,
            created_at: column(row, "created_at")?,
        })
    }
}

#[async_trait]
impl SigningKeyStore for PostgresSigningKeyStore {
    async fn get_active_signing_key(&self) -> Result<Option<SigningKey>> {
        let row = sqlx::query("SELECT * FROM signing_keys WHERE is_active")
            .fetch_optional(&self.pool)
            .await
            .map_err(database_error)?;

        row.as_ref().map(Self::row_to_signing_key).transpose()
    }

    async fn list_signing_keys(&self) -> Result<Vec<SigningKey>> {
        let rows = sqlx::query("SELECT * FROM signing_keys ORDER BY created_at DESC")
            .fetch_all(&self.pool)
            .await
            .map_err(database_error)?;

        rows.iter().map(Self::row_to_signing_key).collect()
    }

    async fn activate_signing_key(&self, key: &SigningKey) -> Result<Option<String>> {
        let mut tx = self.pool.begin().await.map_err(database_error)?;

        let demoted: Option<String> = sqlx::query_scalar(
            "UPDATE signing_keys SET is_active = FALSE WHERE is_active RETURNING key_id",
        )
        .fetch_optional(&mut *tx)
        .await
        .map_err(database_error)?;

        sqlx::query(
            r#"
            INSERT INTO signing_keys (
                id, key_id, algorithm, public_key, private_key, is_active, expires_at, created_at
            ) VALUES ($1, $2, $3, $4, $5, TRUE, $6, $7)
            "#,
        )
        .bind(&key.id)
        .bind(&key.key_id)
        .bind(&key.algorithm)
        .bind(&key.public_key)
        .bind(&key.private_key)
        .bind(key.expires_at)
        .bind(key.created_at)
        .execute(&mut *tx)
        .await
        .map_err(database_error)?;

        tx.commit().await.map_err(database_error)?;
        Ok(demoted)
    }

    async fn set_signing_key_expiration(
        &self,
        key_id: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let result = sqlx::query("UPDATE signing_keys SET expires_at = $2 WHERE key_id = $1")
            .bind(key_id)
            .bind(expires_at)
            .execute(&self.pool)
            .await
            .map_err(database_error)?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("signing key {}", key_id)));
        }
        Ok(())
    }
}

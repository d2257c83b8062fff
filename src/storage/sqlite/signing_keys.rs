//! SQLite implementation for signing key storage

use crate::errors::StorageError;
use crate::oauth::types::SigningKey;
use crate::storage::traits::{Result, SigningKeyStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqliteRow};

use super::{
    column, database_error, format_timestamp, json_column, optional_timestamp_column,
    timestamp_column,
};

/// SQLite implementation of signing key storage
pub struct SqliteSigningKeyStore {
    pool: SqlitePool,
}

impl SqliteSigningKeyStore {
    /// Create a new SQLite signing key store
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_signing_key(row: &SqliteRow) -> Result<SigningKey> {
        Ok(SigningKey {
            id: column(row, "id")?,
            key_id: column(row, "key_id")?,
            algorithm: column(row, "algorithm")?,
            public_key: json_column(row, "public_key")?,
            private_key: json_column(row, "private_key")?,
            is_active: column(row, "is_active")?,
            expires_at: optional_timestamp_column(row, "expires_at")?,
            created_at: timestamp_column(row, "created_at")?,
        })
    }
}

#[async_trait]
impl SigningKeyStore for SqliteSigningKeyStore {
    async fn get_active_signing_key(&self) -> Result<Option<SigningKey>> {
        let row = sqlx::query("SELECT * FROM signing_keys WHERE is_active = 1")
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
            "UPDATE signing_keys SET is_active = 0 WHERE is_active = 1 RETURNING key_id",
        )
        .fetch_optional(&mut *tx)
        .await
        .map_err(database_error)?;

        sqlx::query(
            r#"
            INSERT INTO signing_keys (
                id, key_id, algorithm, public_key, private_key, is_active, expires_at, created_at
            ) VALUES (?, ?, ?, ?, ?, 1, ?, ?)
            "#,
        )
        .bind(&key.id)
        .bind(&key.key_id)
        .bind(&key.algorithm)
        .bind(key.public_key.to_string())
        .bind(key.private_key.to_string())
        .bind(key.expires_at.map(format_timestamp))
        .bind(format_timestamp(key.created_at))
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
        let result = sqlx::query("UPDATE signing_keys SET expires_at = ? WHERE key_id = ?")
            .bind(expires_at.map(format_timestamp))
            .bind(key_id)
            .execute(&self.pool)
            .await
            .map_err(database_error)?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("signing key {}", key_id)));
        }
        Ok(())
    }
}

//! PostgreSQL implementation for authorization storage

use crate::errors::StorageError;
use crate::oauth::types::*;
use crate::storage::traits::{AuthorizationStore, Result};
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgRow};

use super::{column, database_error};

/// PostgreSQL implementation of authorization storage
pub struct PostgresAuthorizationStore {
    pool: PgPool,
}

impl PostgresAuthorizationStore {
    /// Create a new PostgreSQL authorization store
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_authorization(row: &PgRow) -> Result<Authorization> {
        let status: String = column(row, "status")?;
        let kind: String = column(row, "kind")?;

        Ok(Authorization {
            id: column(row, "id")?,
            application_id: column(row, "application_id")?,
            user_id: column(row, "user_id")?,
            scopes: column(row, "scopes")?,
            status: status.parse()?,
            kind: kind.parse()?,
            creation_date: column(row, "creation_date")?,
        })
    }
}

#[async_trait]
impl AuthorizationStore for PostgresAuthorizationStore {
    async fn store_authorization(&self, authorization: &Authorization) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO authorizations (
                id, application_id, user_id, scopes, status, kind, creation_date
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(&authorization.id)
        .bind(&authorization.application_id)
        .bind(&authorization.user_id)
        .bind(normalize_scope(&authorization.scopes))
        .bind(authorization.status.as_str())
        .bind(authorization.kind.as_str())
        .bind(authorization.creation_date)
        .execute(&self.pool)
        .await
        .map_err(database_error)?;

        Ok(())
    }

    async fn get_authorization(&self, id: &str) -> Result<Option<Authorization>> {
        let row = sqlx::query("SELECT * FROM authorizations WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(database_error)?;

        row.as_ref().map(Self::row_to_authorization).transpose()
    }

    async fn find_valid_authorization(
        &self,
        application_id: &str,
        user_id: &str,
        scopes: &str,
    ) -> Result<Option<Authorization>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM authorizations
            WHERE application_id = $1 AND user_id = $2 AND status = 'valid'
            ORDER BY creation_date DESC
            "#,
        )
        .bind(application_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(database_error)?;

        let scopes = normalize_scope(scopes);
        for row in &rows {
            let authorization = Self::row_to_authorization(row)?;
            if normalize_scope(&authorization.scopes) == scopes {
                return Ok(Some(authorization));
            }
        }
        Ok(None)
    }

    async fn revoke_authorization(&self, id: &str) -> Result<usize> {
        let mut tx = self.pool.begin().await.map_err(database_error)?;

        let result = sqlx::query("UPDATE authorizations SET status = 'revoked' WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(database_error)?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("authorization {}", id)));
        }

        let revoked = sqlx::query(
            "UPDATE tokens SET status = 'revoked' WHERE authorization_id = $1 AND status = 'valid'",
        )
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(database_error)?
        .rows_affected();

        tx.commit().await.map_err(database_error)?;
        Ok(revoked as usize)
    }
}

//! PostgreSQL implementation for token storage
//!
//! Redemption is a conditional `UPDATE ... WHERE status = 'valid'`; the row
//! lock makes a concurrent second redemption see zero affected rows.

use crate::oauth::types::*;
use crate::storage::traits::{Result, TokenStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Executor;
use sqlx::postgres::{PgPool, PgRow, Postgres};

use super::{column, database_error};

/// PostgreSQL implementation of token storage
pub struct PostgresTokenStore {
    pool: PgPool,
}

impl PostgresTokenStore {
    /// Create a new PostgreSQL token store
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_token(row: &PgRow) -> Result<Token> {
        let kind: String = column(row, "kind")?;
        let status: String = column(row, "status")?;

        Ok(Token {
            id: column(row, "id")?,
            application_id: column(row, "application_id")?,
            authorization_id: column(row, "authorization_id")?,
            user_id: column(row, "user_id")?,
            kind: kind.parse()?,
            reference_id: column(row, "reference_id")?,
            status: status.parse()?,
            payload: column(row, "payload")?,
            creation_date: column(row, "creation_date")?,
            expiration_date: column(row, "expiration_date")?,
            redemption_date: column(row, "redemption_date")?,
        })
    }

    async fn insert_token<'e, E>(executor: E, token: &Token) -> Result<()>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query(
            r#"
            INSERT INTO tokens (
                id, application_id, authorization_id, user_id, kind, reference_id,
                status, payload, creation_date, expiration_date, redemption_date
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(&token.id)
        .bind(&token.application_id)
        .bind(&token.authorization_id)
        .bind(&token.user_id)
        .bind(token.kind.as_str())
        .bind(&token.reference_id)
        .bind(token.status().as_str())
        .bind(&token.payload)
        .bind(token.creation_date)
        .bind(token.expiration_date)
        .bind(token.redemption_date())
        .execute(executor)
        .await
        .map_err(database_error)?;

        Ok(())
    }
}

#[async_trait]
impl TokenStore for PostgresTokenStore {
    async fn store_token(&self, token: &Token) -> Result<()> {
        Self::insert_token(&self.pool, token).await
    }

    async fn get_token_by_reference(&self, reference_id: &str) -> Result<Option<Token>> {
        let row = sqlx::query("SELECT * FROM tokens WHERE reference_id = $1")
            .bind(reference_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(database_error)?;

        row.as_ref().map(Self::row_to_token).transpose()
    }

    async fn redeem_token(&self, reference_id: &str, now: DateTime<Utc>) -> Result<bool> {
        self.redeem_and_store(reference_id, now, &[]).await
    }

    async fn redeem_and_store(
        &self,
        reference_id: &str,
        now: DateTime<Utc>,
        issued: &[Token],
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await.map_err(database_error)?;

        let redeemed = sqlx::query(
            r#"
            UPDATE tokens SET status = 'redeemed', redemption_date = $2
            WHERE reference_id = $1 AND status = 'valid'
            "#,
        )
        .bind(reference_id)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(database_error)?
        .rows_affected();

        if redeemed != 1 {
            tx.rollback().await.map_err(database_error)?;
            return Ok(false);
        }

        for token in issued {
            Self::insert_token(&mut *tx, token).await?;
        }

        tx.commit().await.map_err(database_error)?;
        Ok(true)
    }

    async fn revoke_token(&self, reference_id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE tokens SET status = 'revoked' WHERE reference_id = $1 AND status = 'valid'",
        )
        .bind(reference_id)
        .execute(&self.pool)
        .await
        .map_err(database_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn revoke_tokens_by_authorization(&self, authorization_id: &str) -> Result<usize> {
        let result = sqlx::query(
            "UPDATE tokens SET status = 'revoked' WHERE authorization_id = $1 AND status = 'valid'",
        )
        .bind(authorization_id)
        .execute(&self.pool)
        .await
        .map_err(database_error)?;

        Ok(result.rows_affected() as usize)
    }

    async fn revoke_tokens_by_subject(&self, user_id: &str) -> Result<usize> {
        let result = sqlx::query(
            "UPDATE tokens SET status = 'revoked' WHERE user_id = $1 AND status = 'valid'",
        )
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(database_error)?;

        Ok(result.rows_affected() as usize)
    }
}

//! PostgreSQL implementation for read-only user lookups

use crate::oauth::types::User;
use crate::storage::traits::{Result, UserStore};
use async_trait::async_trait;
use sqlx::postgres::PgPool;

use super::{column, database_error};

pub struct PostgresUserStore {
    pool: PgPool,
}

impl PostgresUserStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserStore for PostgresUserStore {
    async fn get_user(&self, user_id: &str) -> Result<Option<User>> {
        let row = sqlx::query("SELECT * FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(database_error)?;

        row.map(|row| {
            Ok(User {
                id: column(&row, "id")?,
                username: column(&row, "username")?,
                email: column(&row, "email")?,
                email_verified: column(&row, "email_verified")?,
                name: column(&row, "name")?,
            })
        })
        .transpose()
    }
}

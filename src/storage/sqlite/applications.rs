//! SQLite implementation for application storage

use crate::oauth::types::*;
use crate::storage::traits::{ApplicationStore, Result};
use async_trait::async_trait;
use sqlx::sqlite::{SqlitePool, SqliteRow};

use super::{column, database_error, format_timestamp, timestamp_column};

/// SQLite implementation of application storage
pub struct SqliteApplicationStore {
    pool: SqlitePool,
}

impl SqliteApplicationStore {
    /// Create a new SQLite application store
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Convert SQLite row to Application
    fn row_to_application(row: &SqliteRow) -> Result<Application> {
        let redirect_uris: String = column(row, "redirect_uris")?;
        let post_logout_redirect_uris: String = column(row, "post_logout_redirect_uris")?;
        let client_type: String = column(row, "client_type")?;

        Ok(Application {
            id: column(row, "id")?,
            client_id: column(row, "client_id")?,
            client_secret_hash: column(row, "client_secret_hash")?,
            display_name: column(row, "display_name")?,
            redirect_uris: parse_uri_list(&redirect_uris)?,
            post_logout_redirect_uris: parse_uri_list(&post_logout_redirect_uris)?,
            client_type: client_type.parse()?,
            is_active: column(row, "is_active")?,
            created_at: timestamp_column(row, "created_at")?,
            updated_at: timestamp_column(row, "updated_at")?,
        })
    }
}

#[async_trait]
impl ApplicationStore for SqliteApplicationStore {
    async fn store_application(&self, application: &Application) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO applications (
                id, client_id, client_secret_hash, display_name, redirect_uris,
                post_logout_redirect_uris, client_type, is_active, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&application.id)
        .bind(&application.client_id)
        .bind(&application.client_secret_hash)
        .bind(&application.display_name)
        .bind(encode_uri_list(&application.redirect_uris)?)
        .bind(encode_uri_list(&application.post_logout_redirect_uris)?)
        .bind(application.client_type.as_str())
        .bind(application.is_active)
        .bind(format_timestamp(application.created_at))
        .bind(format_timestamp(application.updated_at))
        .execute(&self.pool)
        .await
        .map_err(database_error)?;

        Ok(())
    }

    async fn get_application_by_client_id(&self, client_id: &str) -> Result<Option<Application>> {
        let row = sqlx::query("SELECT * FROM applications WHERE client_id = ?")
            .bind(client_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(database_error)?;

        row.as_ref().map(Self::row_to_application).transpose()
    }

    async fn list_active_applications(&self) -> Result<Vec<Application>> {
        let rows =
            sqlx::query("SELECT * FROM applications WHERE is_active = 1 ORDER BY created_at")
                .fetch_all(&self.pool)
                .await
                .map_err(database_error)?;

        rows.iter().map(Self::row_to_application).collect()
    }
}

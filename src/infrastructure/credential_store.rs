//! Persisted session cookies
//!
//! One row per source. A successful login replaces the row; an unrecoverable
//! session failure discards it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use crate::domain::{Cookie, SessionCredential};
use crate::infrastructure::harvest_error::HarvestResult;

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn load(&self, source_name: &str) -> HarvestResult<Option<SessionCredential>>;
    async fn save(&self, source_name: &str, credential: &SessionCredential) -> HarvestResult<()>;
    async fn discard(&self, source_name: &str) -> HarvestResult<()>;
}

pub struct SqliteCredentialStore {
    pool: SqlitePool,
}

impl SqliteCredentialStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CredentialStore for SqliteCredentialStore {
    async fn load(&self, source_name: &str) -> HarvestResult<Option<SessionCredential>> {
        let row = sqlx::query("SELECT cookies, saved_at FROM session_credentials WHERE source_name = ?")
            .bind(source_name)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let cookies: String = row.try_get("cookies")?;
        let saved_at: DateTime<Utc> = row.try_get("saved_at")?;
        let cookies: Vec<Cookie> = serde_json::from_str(&cookies)?;
        Ok(Some(SessionCredential { cookies, saved_at }))
    }

    async fn save(&self, source_name: &str, credential: &SessionCredential) -> HarvestResult<()> {
        let cookies = serde_json::to_string(&credential.cookies)?;
        sqlx::query(
            r#"
            INSERT INTO session_credentials (source_name, cookies, saved_at)
            VALUES (?, ?, ?)
            ON CONFLICT(source_name) DO UPDATE SET
                cookies = excluded.cookies,
                saved_at = excluded.saved_at
            "#,
        )
        .bind(source_name)
        .bind(cookies)
        .bind(credential.saved_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn discard(&self, source_name: &str) -> HarvestResult<()> {
        sqlx::query("DELETE FROM session_credentials WHERE source_name = ?")
            .bind(source_name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

// Database connection and pool management
// This module handles the SQLite store shared by checkpoints, session cookies and records

use anyhow::{Context, Result};
use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};
use std::path::Path;

pub struct DatabaseConnection {
    pool: SqlitePool,
}

fn is_in_memory(database_url: &str) -> bool {
    database_url.contains(":memory:") || database_url.contains("mode=memory")
}

impl DatabaseConnection {
    pub async fn new(database_url: &str) -> Result<Self> {
        if is_in_memory(database_url) {
            // Every pooled connection would otherwise see its own empty database.
            let pool = SqlitePoolOptions::new()
                .max_connections(1)
                .connect(database_url)
                .await
                .context("Failed to open in-memory database")?;
            return Ok(Self { pool });
        }

        let db_path = if database_url.starts_with("sqlite://") {
            database_url.trim_start_matches("sqlite://")
        } else if database_url.starts_with("sqlite:") {
            database_url.trim_start_matches("sqlite:")
        } else {
            database_url
        };
        let db_path = db_path.split('?').next().unwrap_or(db_path);

        if let Some(parent) = Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }

        if !Path::new(db_path).exists() {
            tokio::fs::File::create(db_path)
                .await
                .with_context(|| format!("Failed to create database file {db_path}"))?;
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .with_context(|| format!("Failed to connect to {database_url}"))?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Idempotent schema setup. Each table holds whole documents or whole rows,
    /// so writers always replace atomically.
    pub async fn migrate(&self) -> Result<()> {
        let create_progress_sql = r#"
            CREATE TABLE IF NOT EXISTS crawl_progress (
                source_name TEXT PRIMARY KEY,
                document TEXT NOT NULL,
                updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
        "#;

        let create_credentials_sql = r#"
            CREATE TABLE IF NOT EXISTS session_credentials (
                source_name TEXT PRIMARY KEY,
                cookies TEXT NOT NULL,
                saved_at DATETIME NOT NULL
            )
        "#;

        let create_records_sql = r#"
            CREATE TABLE IF NOT EXISTS property_records (
                canonical_key TEXT PRIMARY KEY,
                street_address TEXT NOT NULL,
                city TEXT,
                state TEXT,
                zip TEXT,
                list_price INTEGER,
                beds REAL,
                baths REAL,
                sqft INTEGER,
                agent_name TEXT,
                agent_email TEXT,
                agent_phone TEXT,
                source TEXT NOT NULL,
                scraped_at DATETIME NOT NULL,
                estimated_value INTEGER,
                value_source TEXT,
                value_updated_at DATETIME
            )
        "#;

        let create_indexes_sql = r#"
            CREATE INDEX IF NOT EXISTS idx_records_state ON property_records (state);
            CREATE INDEX IF NOT EXISTS idx_records_source ON property_records (source);
            CREATE INDEX IF NOT EXISTS idx_records_scraped_at ON property_records (scraped_at);
        "#;

        sqlx::query(create_progress_sql).execute(&self.pool).await?;
        sqlx::query(create_credentials_sql).execute(&self.pool).await?;
        sqlx::query(create_records_sql).execute(&self.pool).await?;
        sqlx::raw_sql(create_indexes_sql).execute(&self.pool).await?;

        tracing::debug!("✅ Database schema ready");
        Ok(())
    }
}

//! Checkpoint store
//!
//! Durable [`CrawlProgress`] documents keyed by source name. Every write
//! replaces the whole document in one statement, so a crash between saves
//! loses at most the in-flight sub-area and never leaves a half-updated row.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};

use crate::domain::CrawlProgress;
use crate::infrastructure::harvest_error::{HarvestError, HarvestResult};

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Stored progress for `source_name`, or a fresh document if none exists.
    async fn load(&self, source_name: &str) -> HarvestResult<CrawlProgress>;

    /// Atomically replace the stored document.
    async fn save(&self, progress: &CrawlProgress) -> HarvestResult<()>;

    async fn reset(&self, source_name: &str) -> HarvestResult<()>;

    async fn list_sources(&self) -> HarvestResult<Vec<String>>;

    async fn begin_partition(
        &self,
        source_name: &str,
        partition_code: &str,
    ) -> HarvestResult<CrawlProgress> {
        let mut progress = self.load(source_name).await?;
        progress.begin_partition(partition_code);
        self.save(&progress).await?;
        Ok(progress)
    }

    async fn mark_sub_area_complete(&self, source_name: &str) -> HarvestResult<CrawlProgress> {
        let mut progress = self.load(source_name).await?;
        progress.mark_sub_area_complete();
        self.save(&progress).await?;
        Ok(progress)
    }

    async fn mark_partition_complete(
        &self,
        source_name: &str,
        partition_code: &str,
    ) -> HarvestResult<CrawlProgress> {
        let mut progress = self.load(source_name).await?;
        progress.mark_partition_complete(partition_code);
        self.save(&progress).await?;
        Ok(progress)
    }

    async fn record_harvested(&self, source_name: &str, count: u64) -> HarvestResult<CrawlProgress> {
        let mut progress = self.load(source_name).await?;
        progress.record_harvested(count);
        self.save(&progress).await?;
        Ok(progress)
    }

    /// Close the cycle: bump `cycle_count`, clear completions, rotate the filter variant.
    async fn complete_cycle(&self, source_name: &str) -> HarvestResult<CrawlProgress> {
        let mut progress = self.load(source_name).await?;
        progress.complete_cycle();
        self.save(&progress).await?;
        Ok(progress)
    }
}

pub struct SqliteCheckpointStore {
    pool: SqlitePool,
}

impl SqliteCheckpointStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    async fn load(&self, source_name: &str) -> HarvestResult<CrawlProgress> {
        let row = sqlx::query("SELECT document FROM crawl_progress WHERE source_name = ?")
            .bind(source_name)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let document: String = row.try_get("document")?;
                Ok(serde_json::from_str(&document)?)
            }
            None => {
                debug!("No checkpoint for {}, starting fresh", source_name);
                Ok(CrawlProgress::new(source_name))
            }
        }
    }

    async fn save(&self, progress: &CrawlProgress) -> HarvestResult<()> {
        let document = serde_json::to_string(progress)?;
        sqlx::query(
            r#"
            INSERT INTO crawl_progress (source_name, document, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(source_name) DO UPDATE SET
                document = excluded.document,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&progress.source_name)
        .bind(document)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn reset(&self, source_name: &str) -> HarvestResult<()> {
        sqlx::query("DELETE FROM crawl_progress WHERE source_name = ?")
            .bind(source_name)
            .execute(&self.pool)
            .await?;
        info!("🔄 Checkpoint reset for {}", source_name);
        Ok(())
    }

    async fn list_sources(&self) -> HarvestResult<Vec<String>> {
        let rows = sqlx::query("SELECT source_name FROM crawl_progress ORDER BY source_name")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| row.try_get::<String, _>("source_name").map_err(HarvestError::from))
            .collect()
    }
}

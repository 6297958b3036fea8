//! Durable record store keyed by canonical address
//!
//! The primary key on `canonical_key` is the dedup index. Upserts read the
//! stored row, merge in memory through [`PropertyRecord::merge_from`], and write
//! back inside one transaction. The market-value columns belong to the valuation
//! service and are never written here.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqlitePool};

use crate::domain::PropertyRecord;
use crate::infrastructure::harvest_error::HarvestResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Merged,
}

#[async_trait]
pub trait PropertyStore: Send + Sync {
    async fn upsert_merge(&self, record: &PropertyRecord) -> HarvestResult<(UpsertOutcome, PropertyRecord)>;
    async fn get(&self, canonical_key: &str) -> HarvestResult<Option<PropertyRecord>>;
    async fn count(&self) -> HarvestResult<u64>;
    async fn count_by_state(&self, state: &str) -> HarvestResult<u64>;
}

#[derive(Debug, FromRow)]
struct PropertyRow {
    canonical_key: String,
    street_address: String,
    city: Option<String>,
    state: Option<String>,
    zip: Option<String>,
    list_price: Option<i64>,
    beds: Option<f64>,
    baths: Option<f64>,
    sqft: Option<i64>,
    agent_name: Option<String>,
    agent_email: Option<String>,
    agent_phone: Option<String>,
    source: String,
    scraped_at: DateTime<Utc>,
    estimated_value: Option<i64>,
    value_source: Option<String>,
    value_updated_at: Option<DateTime<Utc>>,
}

impl From<PropertyRow> for PropertyRecord {
    fn from(row: PropertyRow) -> Self {
        Self {
            canonical_key: row.canonical_key,
            street_address: row.street_address,
            city: row.city,
            state: row.state,
            zip: row.zip,
            list_price: row.list_price,
            beds: row.beds,
            baths: row.baths,
            sqft: row.sqft,
            agent_name: row.agent_name,
            agent_email: row.agent_email,
            agent_phone: row.agent_phone,
            source: row.source,
            scraped_at: row.scraped_at,
            estimated_value: row.estimated_value,
            value_source: row.value_source,
            value_updated_at: row.value_updated_at,
        }
    }
}

const SELECT_RECORD: &str = r#"
    SELECT canonical_key, street_address, city, state, zip, list_price, beds, baths, sqft,
           agent_name, agent_email, agent_phone, source, scraped_at,
           estimated_value, value_source, value_updated_at
    FROM property_records WHERE canonical_key = ?
"#;

pub struct SqlitePropertyStore {
    pool: SqlitePool,
}

impl SqlitePropertyStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PropertyStore for SqlitePropertyStore {
    async fn upsert_merge(&self, record: &PropertyRecord) -> HarvestResult<(UpsertOutcome, PropertyRecord)> {
        let mut tx = self.pool.begin().await?;

        let existing: Option<PropertyRow> = sqlx::query_as(SELECT_RECORD)
            .bind(&record.canonical_key)
            .fetch_optional(&mut *tx)
            .await?;

        let (outcome, merged) = match existing {
            Some(row) => {
                let mut stored = PropertyRecord::from(row);
                stored.merge_from(record);
                (UpsertOutcome::Merged, stored)
            }
            None => (UpsertOutcome::Inserted, record.clone()),
        };

        sqlx::query(
            r#"
            INSERT INTO property_records
                (canonical_key, street_address, city, state, zip, list_price, beds, baths, sqft,
                 agent_name, agent_email, agent_phone, source, scraped_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(canonical_key) DO UPDATE SET
                street_address = excluded.street_address,
                city = excluded.city,
                state = excluded.state,
                zip = excluded.zip,
                list_price = excluded.list_price,
                beds = excluded.beds,
                baths = excluded.baths,
                sqft = excluded.sqft,
                agent_name = excluded.agent_name,
                agent_email = excluded.agent_email,
                agent_phone = excluded.agent_phone,
                source = excluded.source,
                scraped_at = excluded.scraped_at
            "#,
        )
        .bind(&merged.canonical_key)
        .bind(&merged.street_address)
        .bind(&merged.city)
        .bind(&merged.state)
        .bind(&merged.zip)
        .bind(merged.list_price)
        .bind(merged.beds)
        .bind(merged.baths)
        .bind(merged.sqft)
        .bind(&merged.agent_name)
        .bind(&merged.agent_email)
        .bind(&merged.agent_phone)
        .bind(&merged.source)
        .bind(merged.scraped_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok((outcome, merged))
    }

    async fn get(&self, canonical_key: &str) -> HarvestResult<Option<PropertyRecord>> {
        let row: Option<PropertyRow> = sqlx::query_as(SELECT_RECORD)
            .bind(canonical_key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(PropertyRecord::from))
    }

    async fn count(&self) -> HarvestResult<u64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM property_records")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    async fn count_by_state(&self, state: &str) -> HarvestResult<u64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM property_records WHERE state = ?")
            .bind(state.to_uppercase())
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }
}

//! Normalizer / dedup / upsert
//!
//! Every card funnels through here on its way to the record store. Records
//! whose address sits in another partition are rejected: the dashboard is
//! known to serve a cached result set from the previous query now and then.
//! Accepted records are merged into the store and published on a broadcast
//! channel for downstream consumers.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info, warn};

use crate::domain::{PropertyRecord, RawCard, WorkItem};
use crate::infrastructure::harvest_error::HarvestResult;
use crate::infrastructure::parsing::card_parser::record_from_card;
use crate::infrastructure::property_repository::{PropertyStore, UpsertOutcome};

const RECORD_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CardOutcome {
    Inserted,
    Merged,
    RejectedWrongState { found: String },
    RejectedUnparseable,
}

/// Counters for one leaf view.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LeafSummary {
    pub inserted: u64,
    pub merged: u64,
    pub rejected_wrong_state: u64,
    pub rejected_unparseable: u64,
    /// Every card of a non-empty leaf was in the wrong partition
    pub all_rejected_wrong_state: bool,
}

impl LeafSummary {
    pub fn accepted(&self) -> u64 {
        self.inserted + self.merged
    }
}

/// Lifetime counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NormalizerStats {
    pub inserted: u64,
    pub merged: u64,
    pub rejected_wrong_state: u64,
    pub rejected_unparseable: u64,
}

#[derive(Default)]
struct Counters {
    inserted: AtomicU64,
    merged: AtomicU64,
    rejected_wrong_state: AtomicU64,
    rejected_unparseable: AtomicU64,
}

pub struct Normalizer {
    store: Arc<dyn PropertyStore>,
    sender: broadcast::Sender<PropertyRecord>,
    counters: Counters,
}

impl Normalizer {
    pub fn new(store: Arc<dyn PropertyStore>) -> Self {
        let (sender, _) = broadcast::channel(RECORD_CHANNEL_CAPACITY);
        Self {
            store,
            sender,
            counters: Counters::default(),
        }
    }

    pub fn store(&self) -> &Arc<dyn PropertyStore> {
        &self.store
    }

    /// Stream of every inserted or merged record, as stored.
    pub fn subscribe(&self) -> BroadcastStream<PropertyRecord> {
        BroadcastStream::new(self.sender.subscribe())
    }

    pub fn stats(&self) -> NormalizerStats {
        NormalizerStats {
            inserted: self.counters.inserted.load(Ordering::Relaxed),
            merged: self.counters.merged.load(Ordering::Relaxed),
            rejected_wrong_state: self.counters.rejected_wrong_state.load(Ordering::Relaxed),
            rejected_unparseable: self.counters.rejected_unparseable.load(Ordering::Relaxed),
        }
    }

    /// Upsert a parsed record. `expected_partition` enables the state check;
    /// a record without a state token passes.
    pub async fn upsert_record(
        &self,
        record: &PropertyRecord,
        expected_partition: Option<&str>,
    ) -> HarvestResult<CardOutcome> {
        if let (Some(expected), Some(found)) = (expected_partition, record.state.as_deref()) {
            if !found.eq_ignore_ascii_case(expected) {
                self.counters.rejected_wrong_state.fetch_add(1, Ordering::Relaxed);
                debug!(
                    "🗑️ Rejected {} (state {} under partition {})",
                    record.canonical_key, found, expected
                );
                return Ok(CardOutcome::RejectedWrongState {
                    found: found.to_string(),
                });
            }
        }

        let (outcome, stored) = self.store.upsert_merge(record).await?;
        let outcome = match outcome {
            UpsertOutcome::Inserted => {
                self.counters.inserted.fetch_add(1, Ordering::Relaxed);
                CardOutcome::Inserted
            }
            UpsertOutcome::Merged => {
                self.counters.merged.fetch_add(1, Ordering::Relaxed);
                CardOutcome::Merged
            }
        };
        // No subscribers is fine
        let _ = self.sender.send(stored);
        Ok(outcome)
    }

    pub async fn upsert_card(
        &self,
        card: &RawCard,
        expected_partition: &str,
        source: &str,
    ) -> HarvestResult<CardOutcome> {
        match record_from_card(card, source) {
            Some(record) => self.upsert_record(&record, Some(expected_partition)).await,
            None => {
                self.counters.rejected_unparseable.fetch_add(1, Ordering::Relaxed);
                warn!("⚠️ Unparseable card address: {:?}", card.address_lines);
                Ok(CardOutcome::RejectedUnparseable)
            }
        }
    }

    /// Upsert every card of one leaf view for `item`.
    pub async fn process_leaf(
        &self,
        cards: &[RawCard],
        item: &WorkItem,
        source: &str,
    ) -> HarvestResult<LeafSummary> {
        let mut summary = LeafSummary::default();
        for card in cards {
            match self.upsert_card(card, &item.partition_code, source).await? {
                CardOutcome::Inserted => summary.inserted += 1,
                CardOutcome::Merged => summary.merged += 1,
                CardOutcome::RejectedWrongState { .. } => summary.rejected_wrong_state += 1,
                CardOutcome::RejectedUnparseable => summary.rejected_unparseable += 1,
            }
        }
        summary.all_rejected_wrong_state =
            !cards.is_empty() && summary.rejected_wrong_state == cards.len() as u64;

        if summary.rejected_wrong_state > 0 {
            warn!(
                "⚠️ {}: rejected {} wrong-state cards of {}",
                item, summary.rejected_wrong_state, cards.len()
            );
        }
        info!(
            "💾 {}: {} inserted, {} merged, {} wrong-state, {} unparseable",
            item, summary.inserted, summary.merged, summary.rejected_wrong_state, summary.rejected_unparseable
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ContactInfo;
    use crate::infrastructure::database_connection::DatabaseConnection;
    use crate::infrastructure::property_repository::SqlitePropertyStore;
    use futures::StreamExt;

    async fn normalizer() -> Normalizer {
        let db = DatabaseConnection::new("sqlite::memory:").await.unwrap();
        db.migrate().await.unwrap();
        Normalizer::new(Arc::new(SqlitePropertyStore::new(db.pool().clone())))
    }

    fn card(address: &[&str], email: Option<&str>) -> RawCard {
        RawCard {
            address_lines: address.iter().map(|s| s.to_string()).collect(),
            price_text: Some("$300,000".into()),
            contact: ContactInfo {
                email: email.map(str::to_string),
                ..ContactInfo::default()
            },
            ..RawCard::default()
        }
    }

    fn item(partition: &str) -> WorkItem {
        WorkItem {
            partition_code: partition.into(),
            sub_area_name: "statewide".into(),
            filter_variant: "default".into(),
        }
    }

    #[tokio::test]
    async fn test_wrong_state_is_rejected_and_counted() {
        let normalizer = normalizer().await;
        let outcome = normalizer
            .upsert_card(&card(&["5 Oak Rd", "Nashville, TN 37201"], None), "GA", "dashboard")
            .await
            .unwrap();
        assert_eq!(outcome, CardOutcome::RejectedWrongState { found: "TN".into() });
        assert_eq!(normalizer.stats().rejected_wrong_state, 1);
        assert_eq!(normalizer.store().count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_missing_state_token_is_accepted() {
        let normalizer = normalizer().await;
        let outcome = normalizer
            .upsert_card(&card(&["12 Peach St", "Atlanta"], None), "GA", "dashboard")
            .await
            .unwrap();
        assert_eq!(outcome, CardOutcome::Inserted);
    }

    #[tokio::test]
    async fn test_case_variants_merge_into_one_record() {
        let normalizer = normalizer().await;
        let first = card(&["123 Main St, Springfield, IL"], None);
        let second = card(&["123 MAIN ST, SPRINGFIELD, IL"], Some("a@b.com"));
        normalizer.upsert_card(&first, "IL", "dashboard").await.unwrap();
        let outcome = normalizer.upsert_card(&second, "IL", "dashboard").await.unwrap();
        assert_eq!(outcome, CardOutcome::Merged);

        let store = normalizer.store();
        assert_eq!(store.count().await.unwrap(), 1);
        let stored = store.get("123 main st, springfield, il").await.unwrap().unwrap();
        assert_eq!(stored.agent_email.as_deref(), Some("a@b.com"));
    }

    #[tokio::test]
    async fn test_leaf_summary_flags_all_wrong_state() {
        let normalizer = normalizer().await;
        let cards = vec![
            card(&["5 Oak Rd", "Nashville, TN 37201"], None),
            card(&["9 Elm St", "Memphis, TN 38103"], None),
        ];
        let summary = normalizer.process_leaf(&cards, &item("GA"), "dashboard").await.unwrap();
        assert!(summary.all_rejected_wrong_state);
        assert_eq!(summary.accepted(), 0);

        let empty = normalizer.process_leaf(&[], &item("GA"), "dashboard").await.unwrap();
        assert!(!empty.all_rejected_wrong_state);
    }

    #[tokio::test]
    async fn test_upserts_are_published() {
        let normalizer = normalizer().await;
        let mut stream = normalizer.subscribe();
        normalizer
            .upsert_card(&card(&["1 First Ave", "Macon, GA 31201"], None), "GA", "dashboard")
            .await
            .unwrap();
        let published = stream.next().await.unwrap().unwrap();
        assert_eq!(published.canonical_key, "1 first ave, macon, ga 31201");
    }
}

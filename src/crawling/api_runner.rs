//! Secondary API harvest runner
//!
//! Walks the same partition × sub-area plan as the dashboard orchestrator, but
//! against the JSON/GIS API: resolve a region, fetch its listings, upsert.
//! Progress lives under its own checkpoint key so both sources resume
//! independently.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::crawling::normalizer::{CardOutcome, Normalizer};
use crate::crawling::orchestrator::{PassCounters, PassOutcome, PassStatus};
use crate::crawling::pause::PauseSignal;
use crate::crawling::work_plan::{PlanStep, WorkPlan};
use crate::domain::{CrawlProgress, WorkItem, partitions};
use crate::infrastructure::checkpoint_store::CheckpointStore;
use crate::infrastructure::config::{AppConfig, defaults};
use crate::infrastructure::harvest_error::{HarvestError, HarvestResult};
use crate::infrastructure::retry_policy::RetryPolicy;
use crate::infrastructure::secondary_api::{ListingQuery, RegionRef, SecondaryApiClient};

pub struct ApiHarvestRunner {
    source_name: String,
    client: SecondaryApiClient,
    plan: WorkPlan,
    limit: u32,
    checkpoints: Arc<dyn CheckpointStore>,
    normalizer: Arc<Normalizer>,
    pause: PauseSignal,
}

impl ApiHarvestRunner {
    pub fn new(
        config: &AppConfig,
        checkpoints: Arc<dyn CheckpointStore>,
        normalizer: Arc<Normalizer>,
        pause: PauseSignal,
    ) -> HarvestResult<Self> {
        Ok(Self {
            source_name: defaults::SECONDARY_API_SOURCE.to_string(),
            client: SecondaryApiClient::new(config.secondary_api.clone(), RetryPolicy::new(&config.retry))?,
            plan: WorkPlan::from_config(config),
            limit: config.secondary_api.limit,
            checkpoints,
            normalizer,
            pause,
        })
    }

    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    /// Run work items until the batch pauses or the cycle completes.
    pub async fn run_pass(&self) -> HarvestResult<PassOutcome> {
        let mut progress = self.checkpoints.load(&self.source_name).await?;
        let mut counters = PassCounters::default();
        info!(
            "🚀 Starting API pass (cycle {}, {} partitions done)",
            progress.cycle_count,
            progress.completed_partitions.len()
        );

        loop {
            if self.pause.is_paused() {
                return Ok(outcome(PassStatus::Paused, counters, progress));
            }

            let item = match self.plan.next_step(&progress) {
                PlanStep::Empty => return Ok(outcome(PassStatus::Exhausted, counters, progress)),
                PlanStep::CycleComplete => {
                    progress = self.checkpoints.complete_cycle(&self.source_name).await?;
                    info!("🎉 API cycle {} complete", progress.cycle_count);
                    return Ok(outcome(PassStatus::CycleComplete, counters, progress));
                }
                PlanStep::PartitionExhausted(code) => {
                    progress = self
                        .checkpoints
                        .mark_partition_complete(&self.source_name, &code)
                        .await?;
                    counters.partitions_completed += 1;
                    continue;
                }
                PlanStep::Work { item, .. } => item,
            };

            progress = self
                .checkpoints
                .begin_partition(&self.source_name, &item.partition_code)
                .await?;

            match self.run_item(&item, &mut counters).await {
                Ok(accepted) => {
                    progress.record_harvested(accepted);
                    progress.mark_sub_area_complete();
                    self.checkpoints.save(&progress).await?;
                    counters.items_completed += 1;
                    self.pause.record_item();
                }
                Err(e @ (HarvestError::DataIntegrity { .. } | HarvestError::Parse { .. })) => {
                    warn!("⚠️ Skipping {}: {}", item, e);
                    progress.mark_sub_area_complete();
                    self.checkpoints.save(&progress).await?;
                    counters.items_skipped += 1;
                    self.pause.record_item();
                }
                Err(HarvestError::Paused) => {
                    self.checkpoints.save(&progress).await?;
                    return Ok(outcome(PassStatus::Paused, counters, progress));
                }
                Err(e) => {
                    self.checkpoints.save(&progress).await?;
                    error!(
                        "❌ API pass aborted at partition {} / sub-area {}: {}",
                        item.partition_code, item.sub_area_name, e
                    );
                    return Err(e);
                }
            }
        }
    }

    async fn region_for(&self, item: &WorkItem) -> HarvestResult<RegionRef> {
        let cancel = self.pause.token();
        if item.sub_area_name.eq_ignore_ascii_case(defaults::DEFAULT_SUB_AREA) {
            let name = partitions::name_for(&item.partition_code).unwrap_or(item.partition_code.as_str());
            return self.client.resolve_region(&item.partition_code, name, cancel).await;
        }
        self.client
            .resolve_city(&item.sub_area_name, &item.partition_code, cancel)
            .await?
            .ok_or_else(|| HarvestError::DataIntegrity {
                reason: format!("no city region for {item}"),
            })
    }

    /// Fetch and upsert one work item; returns the accepted record count.
    async fn run_item(&self, item: &WorkItem, counters: &mut PassCounters) -> HarvestResult<u64> {
        let region = self.region_for(item).await?;
        let query = ListingQuery {
            region_id: region.region_id,
            region_type: region.region_type,
            limit: self.limit,
            filter_partition: item.partition_code.clone(),
        };
        let records = self.client.fetch_listings(&query, self.pause.token()).await?;
        counters.cards_collected += records.len() as u64;

        let mut accepted = 0;
        for record in &records {
            match self
                .normalizer
                .upsert_record(record, Some(&item.partition_code))
                .await?
            {
                CardOutcome::Inserted => {
                    counters.inserted += 1;
                    accepted += 1;
                }
                CardOutcome::Merged => {
                    counters.merged += 1;
                    accepted += 1;
                }
                CardOutcome::RejectedWrongState { .. } => counters.rejected_wrong_state += 1,
                CardOutcome::RejectedUnparseable => counters.rejected_unparseable += 1,
            }
        }
        info!("💾 {}: {} of {} API records accepted", item, accepted, records.len());
        Ok(accepted)
    }
}

fn outcome(status: PassStatus, counters: PassCounters, progress: CrawlProgress) -> PassOutcome {
    PassOutcome {
        status,
        counters,
        progress,
    }
}

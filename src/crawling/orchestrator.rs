//! # Harvest Orchestrator
//!
//! Drives one dashboard source through its work plan: pull the next work
//! item from the checkpoint, load its view, split dense views into leaves,
//! harvest and enrich every leaf, upsert, then advance the checkpoint.
//! Progress is persisted after every mutation, so a crash loses at most the
//! in-flight sub-area.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::crawling::cluster_decomposer::{ClusterDecomposer, LeafView, LeafVisitor};
use crate::crawling::list_harvester::ListHarvester;
use crate::crawling::normalizer::{LeafSummary, Normalizer};
use crate::crawling::pause::PauseSignal;
use crate::crawling::record_extractor::RecordExtractor;
use crate::crawling::work_plan::{PlanStep, WorkPlan};
use crate::domain::{CrawlProgress, RawCard, WorkItem, trailing_state_token};
use crate::infrastructure::browser::AutomationContext;
use crate::infrastructure::checkpoint_store::CheckpointStore;
use crate::infrastructure::config::AppConfig;
use crate::infrastructure::harvest_error::{HarvestError, HarvestResult};
use crate::infrastructure::navigation::NavigationController;
use crate::infrastructure::retry_policy::RetryPolicy;
use crate::infrastructure::session_manager::SessionManager;

/// How a pass ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PassStatus {
    /// Batch limit reached or pause requested; resume with the next pass
    Paused,
    /// Every partition finished; the cycle was closed
    CycleComplete,
    /// Nothing to do
    Exhausted,
}

/// Counters accumulated over one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PassCounters {
    pub items_completed: u64,
    pub items_skipped: u64,
    pub partitions_completed: u64,
    pub leaves: u64,
    pub cards_collected: u64,
    pub inserted: u64,
    pub merged: u64,
    pub rejected_wrong_state: u64,
    pub rejected_unparseable: u64,
    pub stale_reloads: u64,
}

impl PassCounters {
    fn absorb_leaf(&mut self, summary: &LeafSummary) {
        self.inserted += summary.inserted;
        self.merged += summary.merged;
        self.rejected_wrong_state += summary.rejected_wrong_state;
        self.rejected_unparseable += summary.rejected_unparseable;
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PassOutcome {
    pub status: PassStatus,
    pub counters: PassCounters,
    pub progress: CrawlProgress,
}

/// Per-item results gathered while visiting leaves.
#[derive(Debug, Clone, Default)]
struct ItemReport {
    counters: PassCounters,
}

impl ItemReport {
    fn accepted(&self) -> u64 {
        self.counters.inserted + self.counters.merged
    }
}

/// Leaf visitor for one work item: collect → enrich → upsert.
struct LeafHarvest<'a> {
    harvester: &'a ListHarvester,
    extractor: &'a RecordExtractor,
    normalizer: &'a Normalizer,
    navigation: &'a NavigationController,
    pause: &'a PauseSignal,
    item: &'a WorkItem,
    source_name: &'a str,
    report: ItemReport,
}

impl LeafHarvest<'_> {
    fn in_partition(&self, card: &RawCard) -> bool {
        trailing_state_token(&card.full_address())
            .is_none_or(|state| state.eq_ignore_ascii_case(&self.item.partition_code))
    }

    async fn harvest_once(
        &mut self,
        context: &dyn AutomationContext,
        target: Option<usize>,
    ) -> HarvestResult<LeafSummary> {
        let collected = self.harvester.collect(context, target, self.pause).await?;
        self.report.counters.cards_collected += collected.cards.len() as u64;

        // Out-of-partition cards are rejected anyway; don't spend detail clicks on them.
        let (wanted, foreign): (Vec<RawCard>, Vec<RawCard>) =
            collected.cards.into_iter().partition(|c| self.in_partition(c));
        let mut cards = self.extractor.enrich(context, wanted, self.pause).await?.cards;
        cards.extend(foreign);

        let summary = self
            .normalizer
            .process_leaf(&cards, self.item, self.source_name)
            .await?;
        self.report.counters.absorb_leaf(&summary);
        Ok(summary)
    }
}

#[async_trait]
impl LeafVisitor for LeafHarvest<'_> {
    async fn visit_leaf(&mut self, context: &dyn AutomationContext, leaf: &LeafView) -> HarvestResult<()> {
        self.pause.check()?;
        self.report.counters.leaves += 1;
        let target = leaf.result_count.map(|c| c as usize);

        let summary = self.harvest_once(context, target).await?;
        if summary.all_rejected_wrong_state {
            warn!(
                "⚠️ {}: every card in leaf {:?} is out of partition, reloading to bust stale results",
                self.item, leaf.path
            );
            self.report.counters.stale_reloads += 1;
            if self.navigation.reload_and_wait(context).await? {
                self.harvest_once(context, target).await?;
            } else {
                warn!("⚠️ {}: leaf did not hydrate after reload, moving on", self.item);
            }
        }
        Ok(())
    }
}

pub struct HarvestOrchestrator {
    source_name: String,
    plan: WorkPlan,
    checkpoints: Arc<dyn CheckpointStore>,
    navigation: NavigationController,
    decomposer: ClusterDecomposer,
    harvester: ListHarvester,
    extractor: RecordExtractor,
    normalizer: Arc<Normalizer>,
    pause: PauseSignal,
}

impl HarvestOrchestrator {
    pub fn new(
        config: &AppConfig,
        session: Arc<SessionManager>,
        checkpoints: Arc<dyn CheckpointStore>,
        normalizer: Arc<Normalizer>,
        pause: PauseSignal,
    ) -> Self {
        Self {
            source_name: config.dashboard.source_name.clone(),
            plan: WorkPlan::from_config(config),
            checkpoints,
            navigation: NavigationController::new(session, RetryPolicy::new(&config.retry), config),
            decomposer: ClusterDecomposer::new(config),
            harvester: ListHarvester::new(config),
            extractor: RecordExtractor::new(config),
            normalizer,
            pause,
        }
    }

    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    pub fn pause_signal(&self) -> &PauseSignal {
        &self.pause
    }

    pub fn normalizer(&self) -> &Arc<Normalizer> {
        &self.normalizer
    }

    fn session(&self) -> &Arc<SessionManager> {
        self.navigation.session()
    }

    /// Run work items until the batch pauses, the cycle completes, or an
    /// unrecoverable error ends the pass (after the checkpoint is saved).
    pub async fn run_pass(&self) -> HarvestResult<PassOutcome> {
        let mut progress = self.checkpoints.load(&self.source_name).await?;
        let mut counters = PassCounters::default();
        info!(
            "🚀 Starting pass for {} (cycle {}, {} partitions done, {} harvested so far)",
            self.source_name,
            progress.cycle_count,
            progress.completed_partitions.len(),
            progress.total_harvested
        );

        loop {
            if self.pause.is_paused() {
                info!("⏸️ Pass paused after {} items", counters.items_completed + counters.items_skipped);
                return Ok(self.outcome(PassStatus::Paused, counters, progress));
            }

            let (item, sub_area_index) = match self.plan.next_step(&progress) {
                PlanStep::Empty => {
                    warn!("⚠️ Work plan for {} is empty", self.source_name);
                    return Ok(self.outcome(PassStatus::Exhausted, counters, progress));
                }
                PlanStep::CycleComplete => {
                    progress = self.checkpoints.complete_cycle(&self.source_name).await?;
                    info!(
                        "🎉 Cycle {} complete for {} ({} total harvested)",
                        progress.cycle_count, self.source_name, progress.total_harvested
                    );
                    return Ok(self.outcome(PassStatus::CycleComplete, counters, progress));
                }
                PlanStep::PartitionExhausted(code) => {
                    progress = self
                        .checkpoints
                        .mark_partition_complete(&self.source_name, &code)
                        .await?;
                    counters.partitions_completed += 1;
                    info!("✅ Partition {} complete", code);
                    continue;
                }
                PlanStep::Work { item, sub_area_index } => (item, sub_area_index),
            };

            progress = self
                .checkpoints
                .begin_partition(&self.source_name, &item.partition_code)
                .await?;
            self.session().pin_for_work_item(&item.to_string()).await;
            info!("🔄 Work item {} (sub-area #{})", item, sub_area_index);

            match self.run_item(&item).await {
                Ok(report) => {
                    progress.record_harvested(report.accepted());
                    progress.mark_sub_area_complete();
                    self.checkpoints.save(&progress).await?;
                    merge_counters(&mut counters, &report.counters);
                    counters.items_completed += 1;
                    self.pause.record_item();
                }
                Err(e @ (HarvestError::DashboardNotReady { .. } | HarvestError::DataIntegrity { .. })) => {
                    warn!("⚠️ Skipping {}: {}", item, e);
                    progress.mark_sub_area_complete();
                    self.checkpoints.save(&progress).await?;
                    counters.items_skipped += 1;
                    self.pause.record_item();
                }
                Err(HarvestError::Paused) => {
                    self.checkpoints.save(&progress).await?;
                    info!("⏸️ Paused during {}; it will be redone next pass", item);
                    return Ok(self.outcome(PassStatus::Paused, counters, progress));
                }
                Err(e) => {
                    self.checkpoints.save(&progress).await?;
                    error!(
                        "❌ Pass aborted at partition {} / sub-area {} / filter {}: {}",
                        item.partition_code, item.sub_area_name, item.filter_variant, e
                    );
                    if matches!(e, HarvestError::SessionExpired { .. }) {
                        if let Err(discard) = self.session().discard_session().await {
                            warn!("⚠️ Failed to discard session: {}", discard);
                        }
                    }
                    return Err(e);
                }
            }
        }
    }

    /// One work item, retried once after a detached-context recovery.
    async fn run_item(&self, item: &WorkItem) -> HarvestResult<ItemReport> {
        let url = self.plan.url_for(item)?;
        match self.process_item(item, &url).await {
            Err(HarvestError::DetachedContext { message }) => {
                warn!("⚠️ Context detached during {} ({}), recovering and retrying once", item, message);
                self.session().recover_detached().await?;
                self.process_item(item, &url).await
            }
            other => other,
        }
    }

    async fn process_item(&self, item: &WorkItem, url: &str) -> HarvestResult<ItemReport> {
        let context = self.navigation.navigate_and_wait_ready(url).await?;
        self.pause.check()?;

        let mut visitor = LeafHarvest {
            harvester: &self.harvester,
            extractor: &self.extractor,
            normalizer: &self.normalizer,
            navigation: &self.navigation,
            pause: &self.pause,
            item,
            source_name: &self.source_name,
            report: ItemReport::default(),
        };
        self.decomposer
            .decompose(context.as_ref(), &mut visitor, &self.pause)
            .await?;

        let report = visitor.report;
        info!(
            "✅ {}: {} leaves, {} cards, {} inserted, {} merged",
            item,
            report.counters.leaves,
            report.counters.cards_collected,
            report.counters.inserted,
            report.counters.merged
        );
        Ok(report)
    }

    fn outcome(&self, status: PassStatus, counters: PassCounters, progress: CrawlProgress) -> PassOutcome {
        PassOutcome {
            status,
            counters,
            progress,
        }
    }
}

fn merge_counters(total: &mut PassCounters, item: &PassCounters) {
    total.leaves += item.leaves;
    total.cards_collected += item.cards_collected;
    total.inserted += item.inserted;
    total.merged += item.merged;
    total.rejected_wrong_state += item.rejected_wrong_state;
    total.rejected_unparseable += item.rejected_unparseable;
    total.stale_reloads += item.stale_reloads;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::property_repository::PropertyStore;
    use crate::test_utils::{FakeHarness, SiteState};

    fn orchestrator(harness: &FakeHarness, batch_limit: u64) -> HarvestOrchestrator {
        HarvestOrchestrator::new(
            &harness.config,
            harness.session(),
            harness.checkpoints.clone(),
            harness.normalizer.clone(),
            PauseSignal::new(batch_limit),
        )
    }

    fn plan(harness: &mut FakeHarness, partitions: &[&str]) {
        harness.config.plan.partitions = partitions.iter().map(|p| p.to_string()).collect();
    }

    #[tokio::test]
    async fn test_full_cycle_harvests_and_rotates_filter() {
        let mut harness = FakeHarness::new(SiteState::with_listings(4)).await;
        plan(&mut harness, &["GA"]);
        let outcome = orchestrator(&harness, 0).run_pass().await.unwrap();

        assert_eq!(outcome.status, PassStatus::CycleComplete);
        assert_eq!(outcome.counters.items_completed, 1);
        assert_eq!(outcome.counters.inserted, 4);
        assert_eq!(outcome.progress.cycle_count, 1);
        assert_eq!(outcome.progress.filter_cycle_index, 1);
        assert!(outcome.progress.completed_partitions.is_empty());
        assert_eq!(outcome.progress.total_harvested, 4);
        assert_eq!(harness.store.count().await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_batch_limit_pauses_and_resumes() {
        let mut harness = FakeHarness::new(SiteState::with_listings(2)).await;
        plan(&mut harness, &["GA", "AL"]);

        let first = orchestrator(&harness, 1).run_pass().await.unwrap();
        assert_eq!(first.status, PassStatus::Paused);
        assert_eq!(first.progress.current_partition.as_deref(), Some("GA"));
        assert_eq!(first.progress.current_sub_area_index, 1);

        let second = orchestrator(&harness, 0).run_pass().await.unwrap();
        assert_eq!(second.status, PassStatus::CycleComplete);
        // GA finished in the first pass; only AL is left.
        assert_eq!(second.counters.items_completed, 1);
        assert_eq!(second.counters.partitions_completed, 2);
    }

    #[tokio::test]
    async fn test_not_ready_sub_area_is_skipped() {
        let mut site = SiteState::with_listings(2);
        site.hydrate_after_loads = u32::MAX;
        let mut harness = FakeHarness::new(site).await;
        plan(&mut harness, &["GA"]);

        let outcome = orchestrator(&harness, 0).run_pass().await.unwrap();
        assert_eq!(outcome.status, PassStatus::CycleComplete);
        assert_eq!(outcome.counters.items_skipped, 1);
        assert_eq!(harness.store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_all_wrong_state_leaf_forces_one_reload() {
        let mut site = SiteState::with_listings(3);
        site.serve_partition = Some("TN".into());
        let mut harness = FakeHarness::new(site).await;
        plan(&mut harness, &["GA"]);

        let outcome = orchestrator(&harness, 0).run_pass().await.unwrap();
        assert_eq!(outcome.counters.stale_reloads, 1);
        assert_eq!(outcome.counters.rejected_wrong_state, 6);
        assert_eq!(harness.store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_detached_context_is_recovered_once() {
        let mut harness = FakeHarness::new(SiteState::with_listings(2)).await;
        plan(&mut harness, &["GA"]);
        harness.site.state().detach_on_goto = Some(1);

        let outcome = orchestrator(&harness, 0).run_pass().await.unwrap();
        assert_eq!(outcome.status, PassStatus::CycleComplete);
        assert_eq!(outcome.counters.inserted, 2);
    }

    #[tokio::test]
    async fn test_fatal_error_saves_progress_and_surfaces() {
        let mut site = SiteState::with_listings(2);
        site.reject_login = true;
        let mut harness = FakeHarness::new(site).await;
        plan(&mut harness, &["GA"]);

        let err = orchestrator(&harness, 0).run_pass().await.unwrap_err();
        assert!(err.is_fatal());
        let progress = harness.checkpoints.load("dashboard").await.unwrap();
        assert_eq!(progress.current_partition.as_deref(), Some("GA"));
        assert_eq!(progress.current_sub_area_index, 0);
    }
}

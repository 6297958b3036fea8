//! Cluster decomposer
//!
//! A dense map view only lists a fraction of its results, so it is split by
//! clicking its map clusters until each view is small enough to harvest
//! completely. Recursion is bounded three ways: a depth limit, a visited-view
//! set keyed by a view signature, and a cap on harvested leaves.
//!
//! A view signature hashes the result count, the visible cluster labels and
//! the first few mounted cards. A click that lands on the same signature made
//! no progress.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tracing::{debug, info, warn};

use crate::crawling::list_harvester::read_result_count;
use crate::crawling::pause::PauseSignal;
use crate::infrastructure::browser::{AutomationContext, DomScope};
use crate::infrastructure::config::{AppConfig, DecomposerConfig};
use crate::infrastructure::harvest_error::HarvestResult;
use crate::infrastructure::parsing::card_parser::card_from_snapshot;
use crate::infrastructure::parsing::config::{SelectorConfig, join};

/// A view the decomposer decided to harvest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafView {
    /// Cluster labels clicked from the root to get here
    pub path: Vec<String>,
    pub depth: u32,
    pub result_count: Option<u64>,
    pub signature: String,
}

/// Called once per leaf. The decomposer waits for it before moving on.
#[async_trait]
pub trait LeafVisitor: Send {
    async fn visit_leaf(&mut self, context: &dyn AutomationContext, leaf: &LeafView) -> HarvestResult<()>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecomposeReport {
    pub leaves: u32,
    pub views_visited: u32,
    pub clusters_clicked: u32,
    pub repeated_views: u32,
    pub depth_limited: u32,
    pub leaf_cap_hit: bool,
}

#[derive(Default)]
struct WalkState {
    visited: HashSet<String>,
    harvested: HashSet<String>,
    report: DecomposeReport,
}

const SIGNATURE_CARDS: usize = 5;

pub fn view_signature(result_count: Option<u64>, labels: &[String], card_keys: &[String]) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(result_count.map(|c| c.to_string()).unwrap_or_default().as_bytes());
    for label in labels {
        hasher.update(b"|");
        hasher.update(label.as_bytes());
    }
    hasher.update(b"#");
    for key in card_keys.iter().take(SIGNATURE_CARDS) {
        hasher.update(b"|");
        hasher.update(key.as_bytes());
    }
    hasher.finalize().to_hex()[..16].to_string()
}

pub struct ClusterDecomposer {
    selectors: SelectorConfig,
    config: DecomposerConfig,
    nav_timeout: Duration,
    action_timeout: Duration,
}

impl ClusterDecomposer {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            selectors: config.selectors.clone(),
            config: config.decomposer.clone(),
            nav_timeout: config.dashboard.nav_timeout(),
            action_timeout: config.dashboard.action_timeout(),
        }
    }

    async fn cluster_labels(&self, context: &dyn AutomationContext) -> HarvestResult<Vec<String>> {
        if self.selectors.dashboard.cluster.is_empty() {
            return Ok(Vec::new());
        }
        let clusters = context
            .snapshot_all(DomScope::Main, &join(&self.selectors.dashboard.cluster), &[])
            .await?;
        Ok(clusters.into_iter().map(|c| c.text.trim().to_string()).collect())
    }

    async fn leading_card_keys(&self, context: &dyn AutomationContext) -> HarvestResult<Vec<String>> {
        let cards = context
            .snapshot_all(
                DomScope::Main,
                &join(&self.selectors.dashboard.card),
                &self.selectors.card.field_selectors(),
            )
            .await?;
        Ok(cards
            .iter()
            .filter_map(card_from_snapshot)
            .take(SIGNATURE_CARDS)
            .map(|card| card.merge_key())
            .collect())
    }

    /// Walk the current view, calling `visitor` for every leaf.
    pub async fn decompose(
        &self,
        context: &dyn AutomationContext,
        visitor: &mut dyn LeafVisitor,
        pause: &PauseSignal,
    ) -> HarvestResult<DecomposeReport> {
        let mut state = WalkState::default();
        self.expand(context, visitor, pause, &mut state, Vec::new(), 0)
            .await?;
        info!(
            "🗺️ Decomposed into {} leaves ({} views, {} clicks, {} repeats)",
            state.report.leaves,
            state.report.views_visited,
            state.report.clusters_clicked,
            state.report.repeated_views
        );
        Ok(state.report)
    }

    async fn harvest_leaf(
        &self,
        context: &dyn AutomationContext,
        visitor: &mut dyn LeafVisitor,
        state: &mut WalkState,
        leaf: LeafView,
    ) -> HarvestResult<()> {
        if state.harvested.contains(&leaf.signature) {
            return Ok(());
        }
        if state.report.leaves >= self.config.max_leaves {
            state.report.leaf_cap_hit = true;
            return Ok(());
        }
        debug!("Harvesting leaf {:?} ({:?} results)", leaf.path, leaf.result_count);
        state.harvested.insert(leaf.signature.clone());
        state.report.leaves += 1;
        visitor.visit_leaf(context, &leaf).await
    }

    fn expand<'a>(
        &'a self,
        context: &'a dyn AutomationContext,
        visitor: &'a mut dyn LeafVisitor,
        pause: &'a PauseSignal,
        state: &'a mut WalkState,
        path: Vec<String>,
        depth: u32,
    ) -> BoxFuture<'a, HarvestResult<()>> {
        Box::pin(async move {
            pause.check()?;
            if state.report.leaves >= self.config.max_leaves {
                state.report.leaf_cap_hit = true;
                return Ok(());
            }

            let result_count = read_result_count(context, &self.selectors).await?;
            let labels = self.cluster_labels(context).await?;
            let card_keys = self.leading_card_keys(context).await?;
            let signature = view_signature(result_count, &labels, &card_keys);
            let leaf = LeafView {
                path: path.clone(),
                depth,
                result_count,
                signature: signature.clone(),
            };

            if !state.visited.insert(signature) {
                // Zoom made no progress; harvest what is visible once.
                state.report.repeated_views += 1;
                return self.harvest_leaf(context, visitor, state, leaf).await;
            }
            state.report.views_visited += 1;

            let dense = result_count.is_some_and(|c| c > self.config.dense_threshold);
            if !dense || labels.is_empty() {
                return self.harvest_leaf(context, visitor, state, leaf).await;
            }
            if depth >= self.config.max_depth {
                warn!(
                    "⚠️ Depth limit {} reached at {:?} with {:?} results; harvesting visible subset",
                    self.config.max_depth, path, result_count
                );
                state.report.depth_limited += 1;
                return self.harvest_leaf(context, visitor, state, leaf).await;
            }

            let cluster_selector = join(&self.selectors.dashboard.cluster);
            let settle = Duration::from_millis(self.config.settle_ms);
            let mut opened = 0;
            for (index, label) in labels.iter().enumerate() {
                pause.check()?;
                if state.report.leaves >= self.config.max_leaves {
                    state.report.leaf_cap_hit = true;
                    break;
                }
                if !context.click(&cluster_selector, index, self.action_timeout).await? {
                    debug!("Cluster {} ({}) vanished before click", index, label);
                    continue;
                }
                state.report.clusters_clicked += 1;
                opened += 1;
                pause.sleep(settle).await?;

                let mut child_path = path.clone();
                child_path.push(label.clone());
                self.expand(context, &mut *visitor, pause, &mut *state, child_path, depth + 1)
                    .await?;

                context.go_back(self.nav_timeout).await?;
                pause.sleep(settle).await?;
            }

            if opened == 0 && !state.report.leaf_cap_hit {
                warn!("⚠️ No cluster at {:?} could be opened; harvesting the view as a leaf", path);
                return self.harvest_leaf(context, visitor, state, leaf).await;
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{ClusterNode, FakeHarness, SiteState};

    #[derive(Default)]
    struct RecordingVisitor {
        leaves: Vec<LeafView>,
    }

    #[async_trait]
    impl LeafVisitor for RecordingVisitor {
        async fn visit_leaf(&mut self, _context: &dyn AutomationContext, leaf: &LeafView) -> HarvestResult<()> {
            self.leaves.push(leaf.clone());
            Ok(())
        }
    }

    async fn decompose(site: SiteState, tweak: impl FnOnce(&mut AppConfig)) -> (DecomposeReport, Vec<LeafView>) {
        let mut harness = FakeHarness::new(site).await;
        tweak(&mut harness.config);
        let context = harness.session().ensure_context().await.unwrap();
        let mut visitor = RecordingVisitor::default();
        let report = ClusterDecomposer::new(&harness.config)
            .decompose(context.as_ref(), &mut visitor, &PauseSignal::default())
            .await
            .unwrap();
        (report, visitor.leaves)
    }

    #[test]
    fn test_signature_depends_on_count_labels_and_cards() {
        let labels = vec!["120".to_string(), "87".to_string()];
        let cards = vec!["1 main st, macon, ga".to_string()];
        let base = view_signature(Some(207), &labels, &cards);
        assert_eq!(base, view_signature(Some(207), &labels, &cards));
        assert_ne!(base, view_signature(Some(208), &labels, &cards));
        assert_ne!(base, view_signature(Some(207), &labels[..1], &cards));
        assert_ne!(base, view_signature(Some(207), &labels, &[]));
    }

    #[tokio::test]
    async fn test_sparse_view_is_single_leaf() {
        let (report, leaves) = decompose(SiteState::with_listings(5), |_| {}).await;
        assert_eq!(report.leaves, 1);
        assert!(leaves[0].path.is_empty());
    }

    #[tokio::test]
    async fn test_dense_view_splits_into_children() {
        let mut site = SiteState::with_listings(6);
        site.root = ClusterNode::dense(
            900,
            vec![ClusterNode::leaf("North", vec![0, 1, 2]), ClusterNode::leaf("South", vec![3, 4, 5])],
        );
        let (report, leaves) = decompose(site, |config| config.decomposer.dense_threshold = 500).await;
        assert_eq!(report.leaves, 2);
        assert_eq!(report.clusters_clicked, 2);
        let paths: Vec<_> = leaves.iter().map(|l| l.path.join("/")).collect();
        assert_eq!(paths, vec!["North", "South"]);
    }

    #[tokio::test]
    async fn test_dense_view_with_unclickable_clusters_is_harvested_as_leaf() {
        let mut site = SiteState::with_listings(6);
        site.root = ClusterNode::dense(
            900,
            vec![ClusterNode::leaf("North", vec![0, 1, 2]), ClusterNode::leaf("South", vec![3, 4, 5])],
        );
        site.clusters_unclickable = true;
        let (report, leaves) = decompose(site, |config| config.decomposer.dense_threshold = 500).await;
        assert_eq!(report.clusters_clicked, 0);
        assert_eq!(report.leaves, 1);
        assert!(leaves[0].path.is_empty());
        assert_eq!(leaves[0].result_count, Some(900));
    }

    #[tokio::test]
    async fn test_repeated_view_is_harvested_once() {
        let mut site = SiteState::with_listings(4);
        // Clicking the only cluster shows the same dense view again.
        site.root = ClusterNode::dense(900, vec![ClusterNode::dense_labeled("Stuck", 900, Vec::new())]);
        site.clusters_repeat_forever = true;
        let (report, leaves) = decompose(site, |config| config.decomposer.max_depth = 10).await;
        assert_eq!(leaves.len(), 1);
        assert_eq!(report.repeated_views, 1);
    }

    #[tokio::test]
    async fn test_leaf_cap_bounds_walk() {
        let mut site = SiteState::with_listings(8);
        site.root = ClusterNode::dense(
            900,
            (0..8).map(|i| ClusterNode::leaf(&format!("C{i}"), vec![i])).collect(),
        );
        let (report, leaves) = decompose(site, |config| config.decomposer.max_leaves = 3).await;
        assert_eq!(leaves.len(), 3);
        assert!(report.leaf_cap_hit);
    }

    #[tokio::test]
    async fn test_depth_limit_harvests_visible_subset() {
        let mut site = SiteState::with_listings(3);
        site.root = ClusterNode::dense(
            900,
            vec![ClusterNode::dense_labeled("Inner", 800, vec![ClusterNode::leaf("Deep", vec![0])])],
        );
        let (report, leaves) = decompose(site, |config| config.decomposer.max_depth = 1).await;
        assert_eq!(report.depth_limited, 1);
        assert_eq!(leaves.len(), 1);
        assert_eq!(leaves[0].path, vec!["Inner".to_string()]);
    }
}

//! Virtualized list harvester
//!
//! The dashboard only mounts the cards near the viewport, so the full result
//! set has to be accumulated across scroll steps. Cards are merged by their
//! case-insensitive address key; later sightings only fill gaps.

use std::collections::HashMap;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info};

use crate::crawling::pause::PauseSignal;
use crate::domain::RawCard;
use crate::infrastructure::browser::{AutomationContext, DomScope, ScrollMetrics};
use crate::infrastructure::config::{AppConfig, HarvesterConfig};
use crate::infrastructure::harvest_error::HarvestResult;
use crate::infrastructure::parsing::card_parser::card_from_snapshot;
use crate::infrastructure::parsing::config::{SelectorConfig, join};

static COUNT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d[\d,]*)").expect("valid count regex"));

/// First number in a result-count indicator ("1,234 homes" → 1234).
pub fn parse_count(text: &str) -> Option<u64> {
    COUNT_RE
        .captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().replace(',', "").parse().ok())
}

/// Read the result-count indicator of the current view.
pub async fn read_result_count(
    context: &dyn AutomationContext,
    selectors: &SelectorConfig,
) -> HarvestResult<Option<u64>> {
    if selectors.dashboard.result_count.is_empty() {
        return Ok(None);
    }
    let text = context
        .text_of(DomScope::Main, &join(&selectors.dashboard.result_count))
        .await?;
    Ok(text.as_deref().and_then(parse_count))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    TargetReached,
    /// Neither the card set nor the scroll height changed for N loops
    Stagnated,
    LoopLimit,
}

#[derive(Debug, Clone)]
pub struct HarvestReport {
    pub cards: Vec<RawCard>,
    /// DOM reads performed, micro-pass included
    pub reads: u32,
    pub stop_reason: StopReason,
    pub micro_pass_used: bool,
}

/// Insertion-ordered card set keyed by merge key.
#[derive(Default)]
struct CardAccumulator {
    cards: Vec<RawCard>,
    index: HashMap<String, usize>,
}

impl CardAccumulator {
    fn len(&self) -> usize {
        self.cards.len()
    }

    fn add(&mut self, card: RawCard) {
        let key = card.merge_key();
        match self.index.get(&key) {
            Some(&i) => self.cards[i].absorb(card),
            None => {
                self.index.insert(key, self.cards.len());
                self.cards.push(card);
            }
        }
    }
}

pub struct ListHarvester {
    selectors: SelectorConfig,
    config: HarvesterConfig,
}

impl ListHarvester {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            selectors: config.selectors.clone(),
            config: config.harvester.clone(),
        }
    }

    pub fn selectors(&self) -> &SelectorConfig {
        &self.selectors
    }

    async fn read_mounted(
        &self,
        context: &dyn AutomationContext,
        accumulator: &mut CardAccumulator,
    ) -> HarvestResult<()> {
        let snapshots = context
            .snapshot_all(
                DomScope::Main,
                &join(&self.selectors.dashboard.card),
                &self.selectors.card.field_selectors(),
            )
            .await?;
        for card in snapshots.iter().filter_map(card_from_snapshot) {
            accumulator.add(card);
        }
        Ok(())
    }

    /// Scroll the list container, or the page when there is none.
    async fn scroll(&self, context: &dyn AutomationContext, by_px: i64) -> HarvestResult<ScrollMetrics> {
        let container = join(&self.selectors.dashboard.list_container);
        if !container.is_empty() {
            if let Some(metrics) = context.scroll_container(&container, by_px).await? {
                return Ok(metrics);
            }
        }
        Ok(context.scroll_page(by_px).await?)
    }

    /// Accumulate mounted cards until `target` is reached, the list stagnates,
    /// or `max_loops` reads have been spent.
    ///
    /// Below `fast_chase_ratio` of the target the loop waits `fast_wait_ms`
    /// between steps, then `slow_wait_ms`. A small final deficit gets one
    /// bounded micro-pass from the top with half-size steps.
    pub async fn collect(
        &self,
        context: &dyn AutomationContext,
        target: Option<usize>,
        pause: &PauseSignal,
    ) -> HarvestResult<HarvestReport> {
        let max_loops = self.config.max_loops.max(1);
        let fast_cutoff = target.map(|t| (t as f64 * self.config.fast_chase_ratio).ceil() as usize);
        let mut accumulator = CardAccumulator::default();
        let mut reads = 0;
        let mut stagnant = 0;
        let mut last_len = 0;
        let mut last_height: Option<u64> = None;

        let stop_reason = loop {
            pause.check()?;
            if reads >= max_loops {
                break StopReason::LoopLimit;
            }
            reads += 1;
            self.read_mounted(context, &mut accumulator).await?;
            if target.is_some_and(|t| accumulator.len() >= t) {
                break StopReason::TargetReached;
            }

            let metrics = self.scroll(context, self.config.scroll_step_px).await?;
            let grew = accumulator.len() > last_len;
            let height_changed = last_height != Some(metrics.scroll_height);
            stagnant = if grew || height_changed { 0 } else { stagnant + 1 };
            last_len = accumulator.len();
            last_height = Some(metrics.scroll_height);
            if stagnant >= self.config.stagnation_loops.max(1) {
                break StopReason::Stagnated;
            }

            let fast = fast_cutoff.is_some_and(|cutoff| accumulator.len() < cutoff);
            let wait = if fast {
                self.config.fast_wait_ms
            } else {
                self.config.slow_wait_ms
            };
            pause.sleep(Duration::from_millis(wait)).await?;
        };

        let mut stop_reason = stop_reason;
        let mut micro_pass_used = false;
        if let Some(target) = target {
            let deficit = target.saturating_sub(accumulator.len());
            if stop_reason == StopReason::Stagnated
                && deficit > 0
                && deficit <= self.config.micro_pass_max_deficit
                && reads < max_loops
            {
                micro_pass_used = true;
                debug!("Micro-pass for {} missing cards", deficit);
                self.scroll(context, -i64::MAX / 2).await?;
                let step = (self.config.scroll_step_px / 2).max(1);
                for _ in 0..self.config.micro_pass_loops {
                    if reads >= max_loops {
                        break;
                    }
                    pause.check()?;
                    reads += 1;
                    self.read_mounted(context, &mut accumulator).await?;
                    if accumulator.len() >= target {
                        stop_reason = StopReason::TargetReached;
                        break;
                    }
                    let metrics = self.scroll(context, step).await?;
                    if metrics.at_bottom() {
                        if reads < max_loops {
                            reads += 1;
                            self.read_mounted(context, &mut accumulator).await?;
                            if accumulator.len() >= target {
                                stop_reason = StopReason::TargetReached;
                            }
                        }
                        break;
                    }
                    pause.sleep(Duration::from_millis(self.config.slow_wait_ms)).await?;
                }
            }
        }

        info!(
            "📋 Collected {} cards in {} reads ({:?}{})",
            accumulator.len(),
            reads,
            stop_reason,
            if micro_pass_used { ", micro-pass" } else { "" }
        );
        Ok(HarvestReport {
            cards: accumulator.cards,
            reads,
            stop_reason,
            micro_pass_used,
        })
    }
}

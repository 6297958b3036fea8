//! Work plan: partitions × sub-areas × filter variants
//!
//! Turns a [`CrawlProgress`] document into the next [`WorkItem`]. The plan
//! itself is stateless; all position lives in the progress document so a
//! restarted process resumes exactly where the last checkpoint left it.

use std::collections::HashMap;

use url::form_urlencoded;

use crate::domain::{CrawlProgress, WorkItem, partitions};
use crate::infrastructure::config::AppConfig;
use crate::infrastructure::harvest_error::{HarvestError, HarvestResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanStep {
    Work { item: WorkItem, sub_area_index: usize },
    /// Every sub-area of this partition is done; mark it complete
    PartitionExhausted(String),
    /// Every partition is done; close the cycle
    CycleComplete,
    /// The plan has no partitions at all
    Empty,
}

#[derive(Debug, Clone)]
pub struct WorkPlan {
    partitions: Vec<String>,
    sub_areas: HashMap<String, Vec<String>>,
    default_sub_areas: Vec<String>,
    filter_variants: Vec<String>,
    url_template: String,
}

impl WorkPlan {
    pub fn from_config(config: &AppConfig) -> Self {
        let partitions = if config.plan.partitions.is_empty() {
            partitions::all_codes()
        } else {
            config.plan.partitions.iter().map(|p| p.to_uppercase()).collect()
        };
        Self {
            partitions,
            sub_areas: config
                .plan
                .sub_areas
                .iter()
                .map(|(code, areas)| (code.to_uppercase(), areas.clone()))
                .collect(),
            default_sub_areas: config.plan.default_sub_areas.clone(),
            filter_variants: config.plan.filter_variants.clone(),
            url_template: config.dashboard.url_template.clone(),
        }
    }

    pub fn partitions(&self) -> &[String] {
        &self.partitions
    }

    pub fn sub_areas_for(&self, partition_code: &str) -> &[String] {
        self.sub_areas
            .get(&partition_code.to_uppercase())
            .unwrap_or(&self.default_sub_areas)
    }

    /// Filter variant for the progress' current cycle.
    pub fn filter_for(&self, progress: &CrawlProgress) -> String {
        if self.filter_variants.is_empty() {
            return String::new();
        }
        self.filter_variants[progress.filter_cycle_index % self.filter_variants.len()].clone()
    }

    fn step_in(&self, partition: &str, sub_area_index: usize, progress: &CrawlProgress) -> PlanStep {
        match self.sub_areas_for(partition).get(sub_area_index) {
            Some(sub_area) => PlanStep::Work {
                item: WorkItem {
                    partition_code: partition.to_string(),
                    sub_area_name: sub_area.clone(),
                    filter_variant: self.filter_for(progress),
                },
                sub_area_index,
            },
            None => PlanStep::PartitionExhausted(partition.to_string()),
        }
    }

    /// Next step for `progress`. The in-flight partition is always finished
    /// first; completed partitions are never revisited within a cycle.
    pub fn next_step(&self, progress: &CrawlProgress) -> PlanStep {
        if self.partitions.is_empty() {
            return PlanStep::Empty;
        }

        if let Some(current) = progress.current_partition.as_deref() {
            let planned = self.partitions.iter().any(|p| p.eq_ignore_ascii_case(current));
            if planned && !progress.is_partition_complete(current) {
                return self.step_in(&current.to_uppercase(), progress.current_sub_area_index, progress);
            }
        }

        match self
            .partitions
            .iter()
            .find(|p| !progress.is_partition_complete(p))
        {
            Some(partition) => self.step_in(partition, 0, progress),
            None => PlanStep::CycleComplete,
        }
    }

    /// Fill the URL template for `item`; every value is URL-encoded.
    pub fn url_for(&self, item: &WorkItem) -> HarvestResult<String> {
        if self.url_template.is_empty() {
            return Err(HarvestError::config("dashboard.url_template is not set"));
        }
        let encode = |value: &str| form_urlencoded::byte_serialize(value.as_bytes()).collect::<String>();
        let partition_name = partitions::name_for(&item.partition_code).unwrap_or(item.partition_code.as_str());
        Ok(self
            .url_template
            .replace("{partition}", &encode(&item.partition_code))
            .replace("{partition_name}", &encode(partition_name))
            .replace("{sub_area}", &encode(&item.sub_area_name))
            .replace("{filter}", &encode(&item.filter_variant)))
    }
}

//! # Crawling Module
//!
//! Harvest pipeline for both sources:
//! - `work_plan`: partition × sub-area × filter iteration driven by the checkpoint
//! - `cluster_decomposer` → `list_harvester` → `record_extractor` → `normalizer`
//!   for every dashboard leaf view
//! - `orchestrator` / `api_runner`: one resumable pass per source

// 명시적 모듈 선언 (mod.rs 비사용)
pub mod pause;
pub mod work_plan;
pub mod list_harvester;
pub mod cluster_decomposer;
pub mod record_extractor;
pub mod normalizer;
pub mod orchestrator;
pub mod api_runner;

pub use api_runner::ApiHarvestRunner;
pub use cluster_decomposer::{ClusterDecomposer, DecomposeReport, LeafView, LeafVisitor};
pub use list_harvester::{HarvestReport, ListHarvester, StopReason};
pub use normalizer::{CardOutcome, LeafSummary, Normalizer, NormalizerStats};
pub use orchestrator::{HarvestOrchestrator, PassCounters, PassOutcome, PassStatus};
pub use pause::PauseSignal;
pub use record_extractor::{EnrichReport, RecordExtractor};
pub use work_plan::{PlanStep, WorkPlan};

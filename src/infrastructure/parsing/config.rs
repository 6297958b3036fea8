//! Selector configuration for dashboard extraction
//!
//! Centralized CSS selectors for every DOM read the harvester performs. Each
//! entry is an ordered fallback list; the target's markup is not stable, so
//! these are meant to be overridden from the config file.

use serde::{Deserialize, Serialize};

use crate::infrastructure::browser::FieldSelector;

/// Main selector configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorConfig {
    /// Readiness signals and list plumbing
    pub dashboard: DashboardSelectors,

    /// Fields read from a mounted result card
    pub card: CardSelectors,

    /// Agent fields inside the opened detail view
    pub detail: DetailSelectors,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            dashboard: DashboardSelectors::default(),
            card: CardSelectors::default(),
            detail: DetailSelectors::default(),
        }
    }
}

/// Selectors used by navigation, the cluster decomposer and the list harvester
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardSelectors {
    /// "1,234 results" indicator
    pub result_count: Vec<String>,

    /// Scrollable list container
    pub list_container: Vec<String>,

    /// One result card
    pub card: Vec<String>,

    /// Application root mount (weakest readiness signal)
    pub app_root: Vec<String>,

    /// Loading/skeleton markers that must be gone for the weak signal
    pub loading_markers: Vec<String>,

    /// Clickable map cluster bubbles
    pub cluster: Vec<String>,
}

impl Default for DashboardSelectors {
    fn default() -> Self {
        Self {
            result_count: vec![
                "[data-testid='result-count']".to_string(),
                ".results-count".to_string(),
                ".search-results-count".to_string(),
                ".result-count".to_string(),
            ],
            list_container: vec![
                "[data-testid='results-list']".to_string(),
                ".results-list".to_string(),
                ".virtual-list".to_string(),
                "[role='feed']".to_string(),
            ],
            card: vec![
                "[data-testid='property-card']".to_string(),
                ".property-card".to_string(),
                ".listing-card".to_string(),
                "article.result".to_string(),
            ],
            app_root: vec!["#root".to_string(), "#app".to_string(), "[data-reactroot]".to_string()],
            loading_markers: vec![
                ".skeleton".to_string(),
                ".loading".to_string(),
                ".spinner".to_string(),
                "[aria-busy='true']".to_string(),
            ],
            cluster: vec![
                "[data-testid='map-cluster']".to_string(),
                ".marker-cluster".to_string(),
                ".cluster-marker".to_string(),
            ],
        }
    }
}

/// Field selectors evaluated relative to one card element
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CardSelectors {
    pub address_line1: Vec<String>,
    pub address_line2: Vec<String>,
    pub price: Vec<String>,
    pub stats: Vec<String>,
    pub agent_name: Vec<String>,
    pub agent_email: Vec<String>,
    pub agent_phone: Vec<String>,
    pub detail_link: Vec<String>,
}

impl Default for CardSelectors {
    fn default() -> Self {
        Self {
            address_line1: vec![
                "[data-testid='address-line1']".to_string(),
                ".address-line1".to_string(),
                ".street-address".to_string(),
            ],
            address_line2: vec![
                "[data-testid='address-line2']".to_string(),
                ".address-line2".to_string(),
                ".city-state-zip".to_string(),
            ],
            price: vec![
                "[data-testid='price']".to_string(),
                ".price".to_string(),
                ".list-price".to_string(),
            ],
            stats: vec![
                "[data-testid='quick-stats']".to_string(),
                ".quick-stats".to_string(),
                ".property-stats".to_string(),
            ],
            agent_name: vec![".agent-name".to_string(), "[data-testid='agent-name']".to_string()],
            agent_email: vec![".agent-email".to_string(), "a[href^='mailto:']".to_string()],
            agent_phone: vec![".agent-phone".to_string(), "a[href^='tel:']".to_string()],
            detail_link: vec![
                "a[href*='/property/']".to_string(),
                "a[href*='/listing/']".to_string(),
                "a.card-link".to_string(),
            ],
        }
    }
}

impl CardSelectors {
    /// Field reads for one snapshot pass over mounted cards.
    pub fn field_selectors(&self) -> Vec<FieldSelector> {
        vec![
            FieldSelector::text("address_line1", &join(&self.address_line1)),
            FieldSelector::text("address_line2", &join(&self.address_line2)),
            FieldSelector::text("price", &join(&self.price)),
            FieldSelector::text("stats", &join(&self.stats)),
            FieldSelector::text("agent_name", &join(&self.agent_name)),
            FieldSelector::text("agent_email", &join(&self.agent_email)),
            FieldSelector::attr("agent_email_href", &join(&self.agent_email), "href"),
            FieldSelector::text("agent_phone", &join(&self.agent_phone)),
            FieldSelector::attr("agent_phone_href", &join(&self.agent_phone), "href"),
            FieldSelector::attr("detail_url", &join(&self.detail_link), "href"),
        ]
    }
}

/// Selectors for the listing detail view
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetailSelectors {
    /// Panel roots searched in the main document and every frame
    pub panel_roots: Vec<String>,
    pub agent_name: Vec<String>,
    pub agent_email: Vec<String>,
    pub agent_phone: Vec<String>,
}

impl Default for DetailSelectors {
    fn default() -> Self {
        Self {
            panel_roots: vec![
                "[data-testid='listing-detail']".to_string(),
                ".listing-detail".to_string(),
                ".property-detail".to_string(),
                "[role='dialog']".to_string(),
            ],
            agent_name: vec![
                ".listing-agent-name".to_string(),
                ".agent-name".to_string(),
                "[data-testid='agent-name']".to_string(),
            ],
            agent_email: vec![
                ".listing-agent-email".to_string(),
                ".agent-email".to_string(),
                "a[href^='mailto:']".to_string(),
            ],
            agent_phone: vec![
                ".listing-agent-phone".to_string(),
                ".agent-phone".to_string(),
                "a[href^='tel:']".to_string(),
            ],
        }
    }
}

impl DetailSelectors {
    pub fn field_selectors(&self) -> Vec<FieldSelector> {
        vec![
            FieldSelector::text("agent_name", &join(&self.agent_name)),
            FieldSelector::text("agent_email", &join(&self.agent_email)),
            FieldSelector::attr("agent_email_href", &join(&self.agent_email), "href"),
            FieldSelector::text("agent_phone", &join(&self.agent_phone)),
            FieldSelector::attr("agent_phone_href", &join(&self.agent_phone), "href"),
        ]
    }
}

/// Collapse a fallback list into one CSS selector list.
pub fn join(selectors: &[String]) -> String {
    selectors.join(", ")
}

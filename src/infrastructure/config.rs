//! Configuration infrastructure
//!
//! Contains configuration loading and validation for the harvester.
//!
//! Values come from three layers, later ones winning:
//! 1. Built-in defaults (see [`defaults`])
//! 2. An optional TOML/JSON config file
//! 3. Environment variables prefixed `LEAD_HARVESTER`, nested with `__`
//!    (e.g. `LEAD_HARVESTER__PROXY__MODE=auto`)

#![allow(clippy::derivable_impls)]

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

use crate::domain::{ProxyAuth, ProxyDescriptor};
use crate::infrastructure::browser::Credentials;
use crate::infrastructure::parsing::SelectorConfig;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load config: {source}")]
    Load {
        #[from]
        source: config::ConfigError,
    },

    #[error("Configuration validation failed: {message}")]
    Validation { message: String },
}

impl ConfigError {
    fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }
}

/// Complete application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub dashboard: DashboardConfig,
    pub proxy: ProxyConfig,
    pub session: SessionConfig,
    pub hydration: HydrationConfig,
    pub harvester: HarvesterConfig,
    pub decomposer: DecomposerConfig,
    pub extraction: ExtractionConfig,
    pub selectors: SelectorConfig,
    pub retry: RetryConfig,
    pub secondary_api: SecondaryApiConfig,
    pub plan: PlanConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// sqlx connection URL; empty means `<data dir>/harvest.db`
    pub url: String,
}

/// Logging configuration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "error", "warn", "info", "debug", "trace"
    pub level: String,

    /// Enable JSON formatted logs
    pub json_format: bool,

    /// Enable console output
    pub console_output: bool,

    /// Enable file output
    pub file_output: bool,

    /// Directory for log files; empty means `<data dir>/logs`
    pub log_dir: String,

    /// Number of log files to keep (older files will be deleted)
    pub max_files: u32,

    /// Enable automatic log cleanup on startup
    pub auto_cleanup_logs: bool,

    /// Module-specific log level filters (e.g., "sqlx": "warn")
    pub module_filters: HashMap<String, String>,
}

/// The authenticated dashboard source
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardConfig {
    /// Checkpoint key for this source
    pub source_name: String,
    pub login_url: String,
    /// Explicit clean landing view loaded after login
    pub landing_url: String,
    /// Work item URL with `{partition}`, `{partition_name}`, `{sub_area}` and `{filter}` placeholders
    pub url_template: String,
    /// URL fragments that mean "you were sent to sign in / verify"
    pub login_cues: Vec<String>,
    pub username: String,
    pub password: String,
    pub nav_timeout_ms: u64,
    pub action_timeout_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyMode {
    Off,
    Paid,
    Auto,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyEntry {
    pub endpoint: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl ProxyEntry {
    pub fn descriptor(&self, stickiness_key: &str) -> ProxyDescriptor {
        let auth_credentials = match (&self.username, &self.password) {
            (Some(username), Some(password)) => Some(ProxyAuth {
                username: username.clone(),
                password: password.clone(),
            }),
            _ => None,
        };
        ProxyDescriptor {
            endpoint: self.endpoint.clone(),
            auth_credentials,
            stickiness_key: stickiness_key.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub mode: ProxyMode,
    pub pool_key: String,
    pub endpoints: Vec<ProxyEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub credential_ttl_hours: u64,
    /// URL substrings blocked on every new context
    pub blocked_request_patterns: Vec<String>,
    pub health_check_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HydrationConfig {
    pub timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub max_reloads: u32,
    /// Navigation attempts that may be spent on login redirects
    pub login_retries: u32,
    pub capture_snapshots: bool,
    /// Empty means `<data dir>/snapshots`
    pub snapshot_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarvesterConfig {
    pub max_loops: u32,
    pub stagnation_loops: u32,
    pub scroll_step_px: i64,
    pub fast_wait_ms: u64,
    pub slow_wait_ms: u64,
    /// Share of the target chased at fast pace
    pub fast_chase_ratio: f64,
    /// Deficit (in cards) small enough for a micro-pass top-up
    pub micro_pass_max_deficit: usize,
    pub micro_pass_loops: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecomposerConfig {
    /// Result counts above this are split through cluster clicks
    pub dense_threshold: u64,
    pub max_depth: u32,
    pub max_leaves: u32,
    pub settle_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Open the detail view when the card itself carries no contact
    pub open_detail_view: bool,
    pub detail_settle_ms: u64,
    /// Substrings that mark system or placeholder addresses
    pub excluded_email_patterns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Jitter as a fraction of the computed delay
    pub jitter_ratio: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecondaryApiConfig {
    pub enabled: bool,
    pub base_url: String,
    pub autocomplete_path: String,
    pub gis_path: String,
    pub state_region_type: String,
    pub city_region_type: String,
    pub limit: u32,
    pub max_requests_per_second: u32,
    pub timeout_seconds: u64,
    pub user_agent: String,
}

/// The iteration space: partitions × sub-areas × filter variants
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanConfig {
    /// Partition codes to crawl; empty means all 52
    pub partitions: Vec<String>,
    /// Sub-areas per partition code
    pub sub_areas: HashMap<String, Vec<String>>,
    /// Used for partitions with no entry in `sub_areas`
    pub default_sub_areas: Vec<String>,
    pub filter_variants: Vec<String>,
    /// Work items per pass before pausing; 0 means unlimited
    pub batch_limit: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            logging: LoggingConfig::default(),
            dashboard: DashboardConfig::default(),
            proxy: ProxyConfig::default(),
            session: SessionConfig::default(),
            hydration: HydrationConfig::default(),
            harvester: HarvesterConfig::default(),
            decomposer: DecomposerConfig::default(),
            extraction: ExtractionConfig::default(),
            selectors: SelectorConfig::default(),
            retry: RetryConfig::default(),
            secondary_api: SecondaryApiConfig::default(),
            plan: PlanConfig::default(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { url: String::new() }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::LOG_LEVEL.to_string(),
            json_format: defaults::LOG_JSON_FORMAT,
            console_output: defaults::LOG_CONSOLE_OUTPUT,
            file_output: defaults::LOG_FILE_OUTPUT,
            log_dir: String::new(),
            max_files: defaults::LOG_MAX_FILES,
            auto_cleanup_logs: defaults::LOG_AUTO_CLEANUP,
            module_filters: {
                let mut filters = HashMap::new();
                filters.insert("sqlx".to_string(), "warn".to_string());
                filters.insert("reqwest".to_string(), "info".to_string());
                filters.insert("hyper".to_string(), "warn".to_string());
                filters.insert("tokio".to_string(), "info".to_string());
                filters.insert("lead_harvester_lib".to_string(), "info".to_string());
                filters
            },
        }
    }
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            source_name: defaults::DASHBOARD_SOURCE.to_string(),
            login_url: String::new(),
            landing_url: String::new(),
            url_template: String::new(),
            login_cues: defaults::LOGIN_CUES.iter().map(|s| s.to_string()).collect(),
            username: String::new(),
            password: String::new(),
            nav_timeout_ms: defaults::NAV_TIMEOUT_MS,
            action_timeout_ms: defaults::ACTION_TIMEOUT_MS,
        }
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            mode: ProxyMode::Off,
            pool_key: defaults::PROXY_POOL_KEY.to_string(),
            endpoints: Vec::new(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            credential_ttl_hours: defaults::CREDENTIAL_TTL_HOURS,
            blocked_request_patterns: defaults::BLOCKED_REQUEST_PATTERNS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            health_check_timeout_ms: defaults::HEALTH_CHECK_TIMEOUT_MS,
        }
    }
}

impl Default for HydrationConfig {
    fn default() -> Self {
        Self {
            timeout_ms: defaults::HYDRATE_TIMEOUT_MS,
            poll_interval_ms: defaults::HYDRATE_POLL_INTERVAL_MS,
            max_reloads: defaults::HYDRATE_MAX_RELOADS,
            login_retries: defaults::LOGIN_RETRIES,
            capture_snapshots: true,
            snapshot_dir: String::new(),
        }
    }
}

impl Default for HarvesterConfig {
    fn default() -> Self {
        Self {
            max_loops: defaults::HARVEST_MAX_LOOPS,
            stagnation_loops: defaults::HARVEST_STAGNATION_LOOPS,
            scroll_step_px: defaults::HARVEST_SCROLL_STEP_PX,
            fast_wait_ms: defaults::HARVEST_FAST_WAIT_MS,
            slow_wait_ms: defaults::HARVEST_SLOW_WAIT_MS,
            fast_chase_ratio: defaults::HARVEST_FAST_CHASE_RATIO,
            micro_pass_max_deficit: defaults::HARVEST_MICRO_PASS_MAX_DEFICIT,
            micro_pass_loops: defaults::HARVEST_MICRO_PASS_LOOPS,
        }
    }
}

impl Default for DecomposerConfig {
    fn default() -> Self {
        Self {
            dense_threshold: defaults::CLUSTER_DENSE_THRESHOLD,
            max_depth: defaults::CLUSTER_MAX_DEPTH,
            max_leaves: defaults::CLUSTER_MAX_LEAVES,
            settle_ms: defaults::CLUSTER_SETTLE_MS,
        }
    }
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            open_detail_view: true,
            detail_settle_ms: defaults::DETAIL_SETTLE_MS,
            excluded_email_patterns: defaults::EXCLUDED_EMAIL_PATTERNS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: defaults::RETRY_ATTEMPTS,
            base_delay_ms: defaults::RETRY_BASE_DELAY_MS,
            max_delay_ms: defaults::RETRY_MAX_DELAY_MS,
            jitter_ratio: defaults::RETRY_JITTER_RATIO,
        }
    }
}

impl Default for SecondaryApiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: String::new(),
            autocomplete_path: defaults::API_AUTOCOMPLETE_PATH.to_string(),
            gis_path: defaults::API_GIS_PATH.to_string(),
            state_region_type: defaults::API_STATE_REGION_TYPE.to_string(),
            city_region_type: defaults::API_CITY_REGION_TYPE.to_string(),
            limit: defaults::API_LIMIT,
            max_requests_per_second: defaults::API_MAX_REQUESTS_PER_SECOND,
            timeout_seconds: defaults::REQUEST_TIMEOUT_SECONDS,
            user_agent: defaults::USER_AGENT.to_string(),
        }
    }
}

impl Default for PlanConfig {
    fn default() -> Self {
        Self {
            partitions: Vec::new(),
            sub_areas: HashMap::new(),
            default_sub_areas: vec![defaults::DEFAULT_SUB_AREA.to_string()],
            filter_variants: vec![defaults::DEFAULT_FILTER_VARIANT.to_string()],
            batch_limit: 0,
        }
    }
}

impl DashboardConfig {
    pub fn credentials(&self) -> Credentials {
        Credentials {
            username: self.username.clone(),
            password: self.password.clone(),
        }
    }

    pub fn nav_timeout(&self) -> Duration {
        Duration::from_millis(self.nav_timeout_ms)
    }

    pub fn action_timeout(&self) -> Duration {
        Duration::from_millis(self.action_timeout_ms)
    }
}

impl SessionConfig {
    pub fn credential_ttl(&self) -> Duration {
        Duration::from_secs(self.credential_ttl_hours * 3600)
    }
}

impl AppConfig {
    /// Load defaults, then an optional file, then `LEAD_HARVESTER__*` overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?);
        if let Some(path) = path {
            info!("📋 Loading config from {}", path.display());
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let settings = builder
            .add_source(
                config::Environment::with_prefix(defaults::ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make a pass loop forever or never start.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.plan.filter_variants.is_empty() {
            return Err(ConfigError::validation("plan.filter_variants cannot be empty"));
        }
        if self.plan.default_sub_areas.is_empty() && self.plan.sub_areas.is_empty() {
            return Err(ConfigError::validation("plan needs at least one sub-area"));
        }
        if let Some(code) = self
            .plan
            .partitions
            .iter()
            .find(|code| !crate::domain::partitions::is_known(code))
        {
            return Err(ConfigError::validation(format!("unknown partition code {code}")));
        }
        if self.harvester.max_loops == 0 {
            return Err(ConfigError::validation("harvester.max_loops must be greater than 0"));
        }
        if !(0.0..=1.0).contains(&self.harvester.fast_chase_ratio) {
            return Err(ConfigError::validation("harvester.fast_chase_ratio must be within 0..=1"));
        }
        if self.decomposer.max_depth == 0 || self.decomposer.max_leaves == 0 {
            return Err(ConfigError::validation("decomposer bounds must be greater than 0"));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(ConfigError::validation("retry.base_delay_ms cannot exceed retry.max_delay_ms"));
        }
        if self.proxy.mode != ProxyMode::Off && self.proxy.endpoints.is_empty() {
            return Err(ConfigError::validation("proxy.endpoints required when proxy.mode is not off"));
        }
        if self.secondary_api.enabled && self.secondary_api.base_url.is_empty() {
            return Err(ConfigError::validation("secondary_api.base_url required when enabled"));
        }
        if self.secondary_api.max_requests_per_second == 0 {
            return Err(ConfigError::validation(
                "secondary_api.max_requests_per_second must be greater than 0",
            ));
        }
        Ok(())
    }

    pub fn database_url(&self) -> String {
        if self.database.url.is_empty() {
            format!("sqlite:{}", data_dir().join("harvest.db").display())
        } else {
            self.database.url.clone()
        }
    }

    pub fn log_dir(&self) -> PathBuf {
        if self.logging.log_dir.is_empty() {
            data_dir().join("logs")
        } else {
            PathBuf::from(&self.logging.log_dir)
        }
    }

    pub fn snapshot_dir(&self) -> PathBuf {
        if self.hydration.snapshot_dir.is_empty() {
            data_dir().join("snapshots")
        } else {
            PathBuf::from(&self.hydration.snapshot_dir)
        }
    }
}

/// Platform data directory for the database, logs and snapshots.
pub fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(defaults::APP_DIR_NAME)
}

/// Default configuration values
pub mod defaults {
    pub const APP_DIR_NAME: &str = "lead-harvester";
    pub const ENV_PREFIX: &str = "LEAD_HARVESTER";

    pub const DASHBOARD_SOURCE: &str = "dashboard";
    pub const SECONDARY_API_SOURCE: &str = "secondary_api";

    /// URL fragments of the sign-in and verification screens
    pub const LOGIN_CUES: &[&str] = &["/login", "/signin", "/sign-in", "/verify", "/mfa", "/auth"];

    pub const NAV_TIMEOUT_MS: u64 = 45_000;
    pub const ACTION_TIMEOUT_MS: u64 = 10_000;

    pub const PROXY_POOL_KEY: &str = "residential";

    pub const CREDENTIAL_TTL_HOURS: u64 = 24;
    pub const HEALTH_CHECK_TIMEOUT_MS: u64 = 5_000;
    pub const BLOCKED_REQUEST_PATTERNS: &[&str] = &[
        "google-analytics.com",
        "googletagmanager.com",
        "doubleclick.net",
        "facebook.net",
        "hotjar.com",
        ".mp4",
        ".woff2",
    ];

    pub const HYDRATE_TIMEOUT_MS: u64 = 20_000;
    pub const HYDRATE_POLL_INTERVAL_MS: u64 = 500;
    pub const HYDRATE_MAX_RELOADS: u32 = 2;
    pub const LOGIN_RETRIES: u32 = 2;

    pub const HARVEST_MAX_LOOPS: u32 = 120;
    pub const HARVEST_STAGNATION_LOOPS: u32 = 4;
    pub const HARVEST_SCROLL_STEP_PX: i64 = 800;
    pub const HARVEST_FAST_WAIT_MS: u64 = 400;
    pub const HARVEST_SLOW_WAIT_MS: u64 = 800;
    pub const HARVEST_FAST_CHASE_RATIO: f64 = 0.4;
    pub const HARVEST_MICRO_PASS_MAX_DEFICIT: usize = 5;
    pub const HARVEST_MICRO_PASS_LOOPS: u32 = 6;

    pub const CLUSTER_DENSE_THRESHOLD: u64 = 500;
    pub const CLUSTER_MAX_DEPTH: u32 = 4;
    pub const CLUSTER_MAX_LEAVES: u32 = 200;
    pub const CLUSTER_SETTLE_MS: u64 = 1_500;

    pub const DETAIL_SETTLE_MS: u64 = 1_000;
    pub const EXCLUDED_EMAIL_PATTERNS: &[&str] = &[
        "noreply",
        "no-reply",
        "donotreply",
        "support@",
        "help@",
        "example.com",
        "sentry.io",
    ];

    pub const RETRY_ATTEMPTS: u32 = 3;
    pub const RETRY_BASE_DELAY_MS: u64 = 1_000;
    pub const RETRY_MAX_DELAY_MS: u64 = 60_000;
    pub const RETRY_JITTER_RATIO: f64 = 0.25;

    pub const API_AUTOCOMPLETE_PATH: &str = "/stingray/do/location-autocomplete";
    pub const API_GIS_PATH: &str = "/stingray/api/gis";
    /// Autocomplete row type codes for state and city granularity
    pub const API_STATE_REGION_TYPE: &str = "4";
    pub const API_CITY_REGION_TYPE: &str = "6";
    pub const API_LIMIT: u32 = 350;
    pub const API_MAX_REQUESTS_PER_SECOND: u32 = 2;
    pub const REQUEST_TIMEOUT_SECONDS: u64 = 30;
    pub const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

    pub const DEFAULT_SUB_AREA: &str = "statewide";
    pub const DEFAULT_FILTER_VARIANT: &str = "default";

    pub const LOG_LEVEL: &str = "info";
    pub const LOG_JSON_FORMAT: bool = false;
    pub const LOG_CONSOLE_OUTPUT: bool = true;
    pub const LOG_FILE_OUTPUT: bool = true;
    pub const LOG_MAX_FILES: u32 = 5;
    pub const LOG_AUTO_CLEANUP: bool = true;
}

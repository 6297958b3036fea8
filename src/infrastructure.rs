//! Infrastructure layer for persistence, browser sessions, parsing and external APIs
//!
//! This module provides the SQLite stores, the automation-context session
//! lifecycle, navigation with hydration checks, listing parsing, and the
//! secondary JSON/GIS API client.

pub mod browser;  // Automation capability traits consumed by the engine
pub mod harvest_error;  // Error taxonomy shared by every layer
pub mod config;  // Configuration loading and defaults
pub mod logging;  // Logging infrastructure
pub mod database_connection;
pub mod checkpoint_store;  // Resumable crawl progress
pub mod credential_store;  // Persisted session cookies
pub mod property_repository;  // Dedup index / record store
pub mod proxy_pool;
pub mod retry_policy;
pub mod session_manager;  // Authenticated context lifecycle + proxy fallback
pub mod navigation;  // Navigate and wait for hydration
pub mod parsing;  // Card parsing and contact extraction chain
pub mod http_client;
pub mod secondary_api;  // JSON/GIS listing API

// Re-export commonly used items
pub use browser::{AutomationContext, Authenticator, BrowserDriver, BrowserError, Credentials, DomScope};
pub use checkpoint_store::{CheckpointStore, SqliteCheckpointStore};
pub use config::{AppConfig, ConfigError, ProxyMode};
pub use credential_store::{CredentialStore, SqliteCredentialStore};
pub use database_connection::DatabaseConnection;
pub use harvest_error::{HarvestError, HarvestResult};
pub use http_client::{HttpClient, HttpClientConfig};
pub use logging::init_logging_with_config;
pub use navigation::{HydrationWaiter, NavigationController, ReadySignal};
pub use property_repository::{PropertyStore, SqlitePropertyStore, UpsertOutcome};
pub use proxy_pool::{ProxyProvider, StaticProxyPool};
pub use retry_policy::{ErrorClass, RetryDecision, RetryPolicy};
pub use secondary_api::{ListingQuery, RegionRef, SecondaryApiClient};
pub use session_manager::{SessionManager, SessionSettings};

//! Listing parsing infrastructure
//!
//! Pattern-based parsing of dashboard cards and the tiered agent contact
//! extraction chain.

pub mod card_parser;
pub mod config;
pub mod contact_extractors;

// Re-export public types
pub use card_parser::{QuickStats, card_from_snapshot, parse_price, parse_quick_stats, record_from_card};
pub use config::SelectorConfig;
pub use contact_extractors::{ContactChain, ContactStrategy, EmailFilter, ExtractionContext};

//! Domain module - Core harvesting entities
//!
//! Each module is its own file in the domain/ directory; commonly used
//! types are re-exported here for convenience.

pub mod address;
pub mod entities;
pub mod partitions;

pub use address::{canonical_key, parse_address, trailing_state_token, ParsedAddress};
pub use entities::{
    ContactInfo, Cookie, CrawlProgress, PropertyRecord, ProxyAuth, ProxyDescriptor, RawCard,
    SessionCredential, WorkItem,
};

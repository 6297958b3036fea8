//! Lead Harvester - Resumable listing harvester
//!
//! Crawls a property dashboard through an injected automation backend and a
//! JSON/GIS listing API, merging everything into one deduplicated record store.
//! Progress is checkpointed per source so a pass can stop at any point and the
//! next one resumes where it left off.

// Module declarations
pub mod domain;
pub mod infrastructure;
pub mod crawling;

#[cfg(test)]
mod test_utils;

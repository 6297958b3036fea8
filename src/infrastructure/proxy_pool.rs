//! Proxy provisioning
//!
//! The session manager asks a [`ProxyProvider`] for a descriptor whenever it
//! builds or rotates a context. `None` means the pool is exhausted.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::domain::ProxyDescriptor;
use crate::infrastructure::config::ProxyEntry;

#[async_trait]
pub trait ProxyProvider: Send + Sync {
    /// Next descriptor for `pool_key`, tagged with `stickiness_key`.
    async fn acquire(&self, pool_key: &str, stickiness_key: &str) -> Option<ProxyDescriptor>;
}

/// Round-robin over the endpoints listed in the config file.
pub struct StaticProxyPool {
    entries: Vec<ProxyEntry>,
    cursor: AtomicUsize,
}

impl StaticProxyPool {
    pub fn new(entries: Vec<ProxyEntry>) -> Self {
        Self {
            entries,
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl ProxyProvider for StaticProxyPool {
    async fn acquire(&self, _pool_key: &str, stickiness_key: &str) -> Option<ProxyDescriptor> {
        if self.entries.is_empty() {
            return None;
        }
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.entries.len();
        Some(self.entries[index].descriptor(stickiness_key))
    }
}

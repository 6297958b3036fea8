//! Cooperative pause signal
//!
//! A batch-size counter plus a cancellation token. The orchestrator counts
//! finished work items; once the batch limit is reached, or someone calls
//! [`PauseSignal::pause`], every check point returns [`HarvestError::Paused`].

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::infrastructure::harvest_error::{HarvestError, HarvestResult};

#[derive(Debug, Clone)]
pub struct PauseSignal {
    token: CancellationToken,
    /// 0 = unlimited
    batch_limit: u64,
    processed: Arc<AtomicU64>,
}

impl Default for PauseSignal {
    fn default() -> Self {
        Self::new(0)
    }
}

impl PauseSignal {
    pub fn new(batch_limit: u64) -> Self {
        Self {
            token: CancellationToken::new(),
            batch_limit,
            processed: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_paused(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn pause(&self) {
        if !self.token.is_cancelled() {
            info!("⏸️ Pause requested");
            self.token.cancel();
        }
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::SeqCst)
    }

    /// Count one finished work item; pauses once the batch limit is reached.
    pub fn record_item(&self) -> u64 {
        let processed = self.processed.fetch_add(1, Ordering::SeqCst) + 1;
        if self.batch_limit > 0 && processed >= self.batch_limit {
            info!("⏸️ Batch limit {} reached", self.batch_limit);
            self.token.cancel();
        }
        processed
    }

    pub fn check(&self) -> HarvestResult<()> {
        if self.is_paused() {
            Err(HarvestError::Paused)
        } else {
            Ok(())
        }
    }

    /// Sleep that wakes early (with `Paused`) when the signal fires.
    pub async fn sleep(&self, duration: Duration) -> HarvestResult<()> {
        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            _ = self.token.cancelled() => Err(HarvestError::Paused),
        }
    }
}

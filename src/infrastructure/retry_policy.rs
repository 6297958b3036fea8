//! Retry policy shared by navigation, the API fetcher and the orchestrator
//!
//! Classifies a [`HarvestError`], computes an exponential backoff with jitter,
//! and decides the recovery action for the caller.

use std::time::Duration;

use tracing::debug;

use crate::infrastructure::config::{ProxyMode, RetryConfig};
use crate::infrastructure::harvest_error::HarvestError;

/// Error classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Transport failure, maybe the proxy's fault
    Network { via_proxy: bool },
    /// Server asked us to slow down
    RateLimited,
    /// Temporary server-side failure (5xx) or a timed-out call
    Transient,
    /// Sent back to the sign-in screen
    SessionExpired,
    /// Context is gone; must be rebuilt
    Detached,
    /// Page never hydrated
    NotReady,
    /// Bad row, wrong partition, unparseable payload
    DataIntegrity,
    /// Cooperative stop
    Paused,
    Fatal,
}

/// Recovery action for the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    RotateProxy,
    Reauthenticate,
    RecreateContext,
    Reload,
    Skip,
    GiveUp,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    jitter_ratio: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            jitter_ratio: config.jitter_ratio.clamp(0.0, 1.0),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn classify(&self, error: &HarvestError) -> ErrorClass {
        match error {
            HarvestError::NetworkOrProxy { via_proxy, .. } => ErrorClass::Network {
                via_proxy: *via_proxy,
            },
            HarvestError::Http { status: 429, .. } => ErrorClass::RateLimited,
            HarvestError::Http { status, .. } if *status >= 500 => ErrorClass::Transient,
            HarvestError::Http { status: 401 | 403, .. } => ErrorClass::SessionExpired,
            HarvestError::Http { .. } => ErrorClass::DataIntegrity,
            HarvestError::SessionExpired { .. } => ErrorClass::SessionExpired,
            HarvestError::DetachedContext { .. } => ErrorClass::Detached,
            HarvestError::DashboardNotReady { .. } => ErrorClass::NotReady,
            HarvestError::DataIntegrity { .. } | HarvestError::Parse { .. } => {
                ErrorClass::DataIntegrity
            }
            HarvestError::Browser(_) if error.is_transient() => ErrorClass::Transient,
            HarvestError::Browser(_) => ErrorClass::DataIntegrity,
            HarvestError::Paused => ErrorClass::Paused,
            HarvestError::Fatal { .. } | HarvestError::Store(_) | HarvestError::Config { .. } => {
                ErrorClass::Fatal
            }
        }
    }

    /// `base * 2^(attempt-1)` capped at `max_delay`, plus up to `jitter_ratio` of it.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let exponential = self
            .base_delay
            .saturating_mul(2_u32.saturating_pow(exponent))
            .min(self.max_delay);
        let jitter = exponential.mul_f64(self.jitter_ratio * fastrand::f64());
        (exponential + jitter).min(self.max_delay)
    }

    /// Decide what to do about `error` on the given 1-based `attempt`.
    pub fn decide(&self, error: &HarvestError, attempt: u32, proxy_mode: ProxyMode) -> RetryDecision {
        let class = self.classify(error);
        let exhausted = attempt >= self.max_attempts;

        let decision = match class {
            ErrorClass::Fatal | ErrorClass::Paused => RetryDecision::GiveUp,
            ErrorClass::DataIntegrity => RetryDecision::Skip,
            ErrorClass::NotReady if exhausted => RetryDecision::Skip,
            ErrorClass::NotReady => RetryDecision::Reload,
            ErrorClass::Detached if exhausted => RetryDecision::GiveUp,
            ErrorClass::Detached => RetryDecision::RecreateContext,
            ErrorClass::SessionExpired if exhausted => RetryDecision::GiveUp,
            ErrorClass::SessionExpired => RetryDecision::Reauthenticate,
            ErrorClass::Network { via_proxy: true } if proxy_mode == ProxyMode::Auto => {
                RetryDecision::RotateProxy
            }
            _ if exhausted => RetryDecision::GiveUp,
            ErrorClass::RateLimited => {
                // Rate limits start one step further up the curve
                RetryDecision::RetryAfter(self.backoff(attempt + 1))
            }
            ErrorClass::Network { .. } | ErrorClass::Transient => {
                RetryDecision::RetryAfter(self.backoff(attempt))
            }
        };
        debug!("Retry decision for {:?} (attempt {}): {:?}", class, attempt, decision);
        decision
    }
}

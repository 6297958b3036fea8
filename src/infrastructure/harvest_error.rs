//! Harvest error taxonomy
//!
//! Every failure the engine reacts to differently has its own variant; the
//! [`RetryPolicy`](crate::infrastructure::retry_policy::RetryPolicy) maps them to
//! recovery actions.

use std::path::PathBuf;

use thiserror::Error;

use crate::infrastructure::browser::BrowserError;

#[derive(Error, Debug)]
pub enum HarvestError {
    #[error("Network or proxy failure: {message}")]
    NetworkOrProxy {
        message: String,
        via_proxy: bool,
    },

    #[error("Session expired: landed on {url}")]
    SessionExpired { url: String },

    #[error("Dashboard not ready after {reloads} reloads: {url}")]
    DashboardNotReady {
        url: String,
        reloads: u32,
        snapshot: Option<PathBuf>,
    },

    #[error("Automation context detached: {message}")]
    DetachedContext { message: String },

    #[error("Data integrity: {reason}")]
    DataIntegrity { reason: String },

    #[error("Fatal: {message}")]
    Fatal { message: String },

    #[error("Checkpoint/record store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("Browser error: {0}")]
    Browser(BrowserError),

    #[error("HTTP request failed: {status} - {message}")]
    Http { status: u16, message: String },

    #[error("Response parsing failed: {message}")]
    Parse { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Paused by batch signal")]
    Paused,
}

pub type HarvestResult<T> = Result<T, HarvestError>;

impl HarvestError {
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal {
            message: message.into(),
        }
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Errors that end the current pass. Progress must be checkpointed first.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal { .. } | Self::Store(_) | Self::Config { .. })
    }

    /// Errors worth another attempt after a backoff.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::NetworkOrProxy { .. } => true,
            Self::Http { status, .. } => *status == 429 || *status >= 500,
            Self::Browser(BrowserError::Timeout { .. }) => true,
            _ => false,
        }
    }
}

impl From<BrowserError> for HarvestError {
    fn from(err: BrowserError) -> Self {
        match err {
            BrowserError::Network { message, via_proxy } => {
                Self::NetworkOrProxy { message, via_proxy }
            }
            BrowserError::Closed { message } => Self::DetachedContext { message },
            other => Self::Browser(other),
        }
    }
}

impl From<reqwest::Error> for HarvestError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => Self::Http {
                status: status.as_u16(),
                message: err.to_string(),
            },
            None if err.is_decode() => Self::Parse {
                message: err.to_string(),
            },
            None => Self::NetworkOrProxy {
                message: err.to_string(),
                via_proxy: false,
            },
        }
    }
}

impl From<serde_json::Error> for HarvestError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse {
            message: err.to_string(),
        }
    }
}

//! Browser automation capability
//!
//! The engine never drives a browser directly. It consumes these traits, and
//! an adapter over whatever automation backend is deployed implements them.
//! Navigation-style calls take an explicit timeout; contexts handed out by the
//! session are wrapped in [`BoundedContext`], which puts every other call
//! under the action timeout. All calls return typed shapes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{Cookie, ProxyDescriptor};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BrowserError {
    #[error("network error: {message}")]
    Network { message: String, via_proxy: bool },

    #[error("context closed: {message}")]
    Closed { message: String },

    #[error("timed out after {elapsed_ms}ms: {operation}")]
    Timeout { operation: String, elapsed_ms: u64 },

    #[error("script failed: {message}")]
    Script { message: String },

    #[error("element not found: {selector}")]
    NotFound { selector: String },

    #[error("browser error: {message}")]
    Other { message: String },
}

pub type BrowserResult<T> = Result<T, BrowserError>;

const CLOSED_CUES: &[&str] = &[
    "target closed",
    "has been closed",
    "context closed",
    "page closed",
    "browser closed",
    "detached",
    "session closed",
];

const NETWORK_CUES: &[&str] = &[
    "net::err_proxy",
    "net::err_tunnel",
    "net::err_connection",
    "net::err_timed_out",
    "net::err_name_not_resolved",
    "net::err_empty_response",
    "econnrefused",
    "econnreset",
    "proxy",
    "407",
];

impl BrowserError {
    /// Map a raw backend error message onto the engine's classes.
    ///
    /// Adapters call this so "closed"/"detached" and transport failures are
    /// recognised no matter which automation backend produced them.
    pub fn classify_message(message: &str, via_proxy: bool) -> Self {
        let lower = message.to_lowercase();
        if CLOSED_CUES.iter().any(|cue| lower.contains(cue)) {
            Self::Closed {
                message: message.to_string(),
            }
        } else if NETWORK_CUES.iter().any(|cue| lower.contains(cue)) {
            Self::Network {
                message: message.to_string(),
                via_proxy,
            }
        } else {
            Self::Other {
                message: message.to_string(),
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed { .. })
    }
}

/// Where a DOM read runs: the top document or one of its embedded frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DomScope {
    Main,
    Frame(usize),
}

/// A named sub-read performed on every element matched by a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSelector {
    pub name: String,
    pub selector: String,
    /// Read this attribute instead of the text content.
    #[serde(default)]
    pub attribute: Option<String>,
}

impl FieldSelector {
    pub fn text(name: &str, selector: &str) -> Self {
        Self {
            name: name.to_string(),
            selector: selector.to_string(),
            attribute: None,
        }
    }

    pub fn attr(name: &str, selector: &str, attribute: &str) -> Self {
        Self {
            name: name.to_string(),
            selector: selector.to_string(),
            attribute: Some(attribute.to_string()),
        }
    }
}

/// Text plus requested field reads for one matched element.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementSnapshot {
    pub text: String,
    pub fields: HashMap<String, String>,
}

impl ElementSnapshot {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }
}

/// Scroll position of a container (or the page) after a scroll step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrollMetrics {
    pub scroll_top: u64,
    pub scroll_height: u64,
    pub client_height: u64,
}

impl ScrollMetrics {
    pub fn at_bottom(&self) -> bool {
        self.scroll_top + self.client_height >= self.scroll_height
    }
}

/// One live automation context (a browser context with its own cookie jar).
#[async_trait]
pub trait AutomationContext: Send + Sync {
    async fn goto(&self, url: &str, timeout: Duration) -> BrowserResult<()>;
    async fn reload(&self, timeout: Duration) -> BrowserResult<()>;
    async fn go_back(&self, timeout: Duration) -> BrowserResult<()>;
    async fn current_url(&self) -> BrowserResult<String>;

    async fn exists(&self, scope: DomScope, selector: &str) -> BrowserResult<bool>;
    async fn text_of(&self, scope: DomScope, selector: &str) -> BrowserResult<Option<String>>;
    async fn snapshot_all(
        &self,
        scope: DomScope,
        selector: &str,
        fields: &[FieldSelector],
    ) -> BrowserResult<Vec<ElementSnapshot>>;
    async fn page_text(&self) -> BrowserResult<String>;
    async fn content(&self) -> BrowserResult<String>;
    async fn frame_count(&self) -> BrowserResult<usize>;

    /// Scroll the first element matching `selector`; `None` when absent.
    async fn scroll_container(&self, selector: &str, by_px: i64)
    -> BrowserResult<Option<ScrollMetrics>>;
    async fn scroll_page(&self, by_px: i64) -> BrowserResult<ScrollMetrics>;
    /// Click the `index`-th element matching `selector`; `false` when absent.
    async fn click(&self, selector: &str, index: usize, timeout: Duration) -> BrowserResult<bool>;

    async fn cookies(&self) -> BrowserResult<Vec<Cookie>>;
    async fn set_cookies(&self, cookies: &[Cookie]) -> BrowserResult<()>;
    async fn block_requests(&self, url_patterns: &[String]) -> BrowserResult<()>;
    async fn evaluate(&self, script: &str, timeout: Duration) -> BrowserResult<serde_json::Value>;
    async fn close(&self) -> BrowserResult<()>;
}

/// Factory for automation contexts.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    async fn new_context(
        &self,
        proxy: Option<&ProxyDescriptor>,
    ) -> BrowserResult<Arc<dyn AutomationContext>>;
}

/// Dashboard login credentials. The password never appears in `Debug` output.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// The target's login sequence (including any one-time-code step).
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Returns `true` when the context ends up logged in.
    async fn login(
        &self,
        context: &dyn AutomationContext,
        credentials: &Credentials,
    ) -> BrowserResult<bool>;
}

/// Run a context call under a hard deadline, mapping expiry to [`BrowserError::Timeout`].
pub async fn with_timeout<T, F>(operation: &str, timeout: Duration, fut: F) -> BrowserResult<T>
where
    F: std::future::Future<Output = BrowserResult<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(BrowserError::Timeout {
            operation: operation.to_string(),
            elapsed_ms: timeout.as_millis() as u64,
        }),
    }
}

/// Wraps a context so calls without their own timeout run under `action_timeout`.
///
/// Calls that carry a timeout keep theirs, but still cannot outlive it.
pub struct BoundedContext {
    inner: Arc<dyn AutomationContext>,
    action_timeout: Duration,
}

impl BoundedContext {
    pub fn wrap(inner: Arc<dyn AutomationContext>, action_timeout: Duration) -> Arc<dyn AutomationContext> {
        Arc::new(Self { inner, action_timeout })
    }
}

#[async_trait]
impl AutomationContext for BoundedContext {
    async fn goto(&self, url: &str, timeout: Duration) -> BrowserResult<()> {
        with_timeout("goto", timeout, self.inner.goto(url, timeout)).await
    }

    async fn reload(&self, timeout: Duration) -> BrowserResult<()> {
        with_timeout("reload", timeout, self.inner.reload(timeout)).await
    }

    async fn go_back(&self, timeout: Duration) -> BrowserResult<()> {
        with_timeout("go back", timeout, self.inner.go_back(timeout)).await
    }

    async fn current_url(&self) -> BrowserResult<String> {
        with_timeout("current url", self.action_timeout, self.inner.current_url()).await
    }

    async fn exists(&self, scope: DomScope, selector: &str) -> BrowserResult<bool> {
        with_timeout(selector, self.action_timeout, self.inner.exists(scope, selector)).await
    }

    async fn text_of(&self, scope: DomScope, selector: &str) -> BrowserResult<Option<String>> {
        with_timeout(selector, self.action_timeout, self.inner.text_of(scope, selector)).await
    }

    async fn snapshot_all(
        &self,
        scope: DomScope,
        selector: &str,
        fields: &[FieldSelector],
    ) -> BrowserResult<Vec<ElementSnapshot>> {
        with_timeout(
            selector,
            self.action_timeout,
            self.inner.snapshot_all(scope, selector, fields),
        )
        .await
    }

    async fn page_text(&self) -> BrowserResult<String> {
        with_timeout("page text", self.action_timeout, self.inner.page_text()).await
    }

    async fn content(&self) -> BrowserResult<String> {
        with_timeout("page content", self.action_timeout, self.inner.content()).await
    }

    async fn frame_count(&self) -> BrowserResult<usize> {
        with_timeout("frame count", self.action_timeout, self.inner.frame_count()).await
    }

    async fn scroll_container(
        &self,
        selector: &str,
        by_px: i64,
    ) -> BrowserResult<Option<ScrollMetrics>> {
        with_timeout(
            selector,
            self.action_timeout,
            self.inner.scroll_container(selector, by_px),
        )
        .await
    }

    async fn scroll_page(&self, by_px: i64) -> BrowserResult<ScrollMetrics> {
        with_timeout("scroll page", self.action_timeout, self.inner.scroll_page(by_px)).await
    }

    async fn click(&self, selector: &str, index: usize, timeout: Duration) -> BrowserResult<bool> {
        with_timeout(selector, timeout, self.inner.click(selector, index, timeout)).await
    }

    async fn cookies(&self) -> BrowserResult<Vec<Cookie>> {
        with_timeout("read cookies", self.action_timeout, self.inner.cookies()).await
    }

    async fn set_cookies(&self, cookies: &[Cookie]) -> BrowserResult<()> {
        with_timeout("set cookies", self.action_timeout, self.inner.set_cookies(cookies)).await
    }

    async fn block_requests(&self, url_patterns: &[String]) -> BrowserResult<()> {
        with_timeout(
            "block requests",
            self.action_timeout,
            self.inner.block_requests(url_patterns),
        )
        .await
    }

    async fn evaluate(&self, script: &str, timeout: Duration) -> BrowserResult<serde_json::Value> {
        with_timeout("evaluate", timeout, self.inner.evaluate(script, timeout)).await
    }

    async fn close(&self) -> BrowserResult<()> {
        with_timeout("close", self.action_timeout, self.inner.close()).await
    }
}

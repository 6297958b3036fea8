//! Navigation & hydration controller
//!
//! Loads a dashboard URL and waits until the single-page app has actually
//! rendered something usable. Readiness is any one of several OR'd signals so a
//! single markup change on the target does not stall the crawl.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::infrastructure::browser::{AutomationContext, DomScope};
use crate::infrastructure::config::{AppConfig, HydrationConfig};
use crate::infrastructure::harvest_error::{HarvestError, HarvestResult};
use crate::infrastructure::parsing::config::{DashboardSelectors, join};
use crate::infrastructure::retry_policy::{RetryDecision, RetryPolicy};
use crate::infrastructure::session_manager::SessionManager;

/// Which readiness signal fired, strongest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadySignal {
    ResultCount,
    ListContainer,
    Card,
    /// App root mounted and no loading/skeleton markers left
    AppRootIdle,
}

/// Polls the OR'd readiness signals until one fires or the deadline passes.
#[derive(Debug, Clone)]
pub struct HydrationWaiter {
    selectors: DashboardSelectors,
    timeout: Duration,
    poll_interval: Duration,
}

impl HydrationWaiter {
    pub fn new(selectors: DashboardSelectors, config: &HydrationConfig) -> Self {
        Self {
            selectors,
            timeout: Duration::from_millis(config.timeout_ms),
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(1)),
        }
    }

    pub fn selectors(&self) -> &DashboardSelectors {
        &self.selectors
    }

    /// Check every signal once.
    pub async fn detect(&self, context: &dyn AutomationContext) -> HarvestResult<Option<ReadySignal>> {
        let strong = [
            (ReadySignal::ResultCount, &self.selectors.result_count),
            (ReadySignal::ListContainer, &self.selectors.list_container),
            (ReadySignal::Card, &self.selectors.card),
        ];
        for (signal, selectors) in strong {
            if !selectors.is_empty() && context.exists(DomScope::Main, &join(selectors)).await? {
                return Ok(Some(signal));
            }
        }

        let root_mounted = !self.selectors.app_root.is_empty()
            && context
                .exists(DomScope::Main, &join(&self.selectors.app_root))
                .await?;
        if root_mounted {
            let loading = !self.selectors.loading_markers.is_empty()
                && context
                    .exists(DomScope::Main, &join(&self.selectors.loading_markers))
                    .await?;
            if !loading {
                return Ok(Some(ReadySignal::AppRootIdle));
            }
        }
        Ok(None)
    }

    /// Poll until a signal fires; `None` once the timeout elapses.
    pub async fn wait_ready(
        &self,
        context: &dyn AutomationContext,
    ) -> HarvestResult<Option<ReadySignal>> {
        let deadline = Instant::now() + self.timeout;
        loop {
            if let Some(signal) = self.detect(context).await? {
                debug!("Hydrated via {:?}", signal);
                return Ok(Some(signal));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

enum LoadOutcome {
    Ready,
    LoginRedirect(String),
    NotReady { reloads: u32 },
}

pub struct NavigationController {
    session: Arc<SessionManager>,
    waiter: HydrationWaiter,
    retry: RetryPolicy,
    nav_timeout: Duration,
    max_reloads: u32,
    login_retries: u32,
    snapshot_dir: Option<PathBuf>,
}

impl NavigationController {
    pub fn new(session: Arc<SessionManager>, retry: RetryPolicy, config: &AppConfig) -> Self {
        Self {
            session,
            waiter: HydrationWaiter::new(config.selectors.dashboard.clone(), &config.hydration),
            retry,
            nav_timeout: config.dashboard.nav_timeout(),
            max_reloads: config.hydration.max_reloads,
            login_retries: config.hydration.login_retries,
            snapshot_dir: config
                .hydration
                .capture_snapshots
                .then(|| config.snapshot_dir()),
        }
    }

    pub fn waiter(&self) -> &HydrationWaiter {
        &self.waiter
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    /// Load `url` on the session's context and return it once hydrated.
    ///
    /// Login redirects re-authenticate (while `login_retries` remain), network
    /// failures go through the session's proxy fallback, timeouts back off via
    /// the retry policy. A page that never hydrates after the reload budget is
    /// a [`HarvestError::DashboardNotReady`].
    pub async fn navigate_and_wait_ready(
        &self,
        url: &str,
    ) -> HarvestResult<Arc<dyn AutomationContext>> {
        let mut login_retries_left = self.login_retries;
        let mut attempt = 0;
        loop {
            attempt += 1;
            let context = match self.session.ensure_context().await {
                Ok(context) => context,
                Err(e @ HarvestError::NetworkOrProxy { .. }) => {
                    if let Err(e) = self.session.handle_network_error(e).await {
                        self.back_off(url, e, attempt).await?;
                    }
                    continue;
                }
                Err(e) => return Err(e),
            };

            match self.load_once(context.as_ref(), url).await {
                Ok(LoadOutcome::Ready) => return Ok(context),
                Ok(LoadOutcome::LoginRedirect(landed)) => {
                    if login_retries_left == 0 {
                        return Err(HarvestError::SessionExpired { url: landed });
                    }
                    login_retries_left -= 1;
                    warn!("🔐 Redirected to sign-in ({}), re-authenticating", landed);
                    self.session.reauthenticate().await?;
                }
                Ok(LoadOutcome::NotReady { reloads }) => {
                    let snapshot = self.capture_snapshot(context.as_ref(), url).await;
                    return Err(HarvestError::DashboardNotReady {
                        url: url.to_string(),
                        reloads,
                        snapshot,
                    });
                }
                Err(e @ HarvestError::NetworkOrProxy { .. }) => {
                    // No fresh route from the session: plain backoff on the same one.
                    if let Err(e) = self.session.handle_network_error(e).await {
                        self.back_off(url, e, attempt).await?;
                    }
                }
                Err(e) => self.back_off(url, e, attempt).await?,
            }
        }
    }

    /// Sleep before the next attempt when the policy allows one; otherwise hand the error back.
    async fn back_off(&self, url: &str, error: HarvestError, attempt: u32) -> HarvestResult<()> {
        match self.retry.decide(&error, attempt, self.session.settings().proxy_mode) {
            RetryDecision::RetryAfter(delay) => {
                warn!("⚠️ Navigation to {} failed ({}), retrying in {:?}", url, error, delay);
                tokio::time::sleep(delay).await;
                Ok(())
            }
            _ => Err(error),
        }
    }

    /// Reload the current view and wait for it to hydrate again.
    pub async fn reload_and_wait(&self, context: &dyn AutomationContext) -> HarvestResult<bool> {
        context.reload(self.nav_timeout).await?;
        Ok(self.waiter.wait_ready(context).await?.is_some())
    }

    async fn load_once(&self, context: &dyn AutomationContext, url: &str) -> HarvestResult<LoadOutcome> {
        context.goto(url, self.nav_timeout).await?;
        let landed = context.current_url().await?;
        if self.session.is_login_url(&landed) {
            return Ok(LoadOutcome::LoginRedirect(landed));
        }
        if self.waiter.wait_ready(context).await?.is_some() {
            return Ok(LoadOutcome::Ready);
        }

        for reload in 1..=self.max_reloads {
            warn!("⚠️ {} not hydrated, reload {}/{}", url, reload, self.max_reloads);
            context.reload(self.nav_timeout).await?;
            let landed = context.current_url().await?;
            if self.session.is_login_url(&landed) {
                return Ok(LoadOutcome::LoginRedirect(landed));
            }
            if self.waiter.wait_ready(context).await?.is_some() {
                info!("✅ {} hydrated after {} reloads", url, reload);
                return Ok(LoadOutcome::Ready);
            }
        }
        Ok(LoadOutcome::NotReady {
            reloads: self.max_reloads,
        })
    }

    /// Write the page HTML for later diagnosis. Failures only log.
    async fn capture_snapshot(&self, context: &dyn AutomationContext, url: &str) -> Option<PathBuf> {
        let dir = self.snapshot_dir.as_ref()?;
        let html = match context.content().await {
            Ok(html) => html,
            Err(e) => {
                warn!("⚠️ Could not read page content for snapshot: {}", e);
                return None;
            }
        };

        let stamp = Utc::now().format("%Y%m%dT%H%M%S%.3f").to_string();
        let digest = blake3::hash(format!("{url}|{stamp}").as_bytes());
        let path = dir.join(format!("{}.html", &digest.to_hex()[..16]));
        let write = async {
            tokio::fs::create_dir_all(dir).await?;
            tokio::fs::write(&path, html).await
        };
        match write.await {
            Ok(()) => {
                info!("📸 Saved not-ready snapshot to {}", path.display());
                Some(path)
            }
            Err(e) => {
                warn!("⚠️ Failed to write snapshot {}: {}", path.display(), e);
                None
            }
        }
    }
}

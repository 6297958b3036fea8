//! Session & proxy manager
//!
//! Owns the single authenticated automation context of a dashboard source and
//! everything that can go wrong with it: proxy rotation with a one-time direct
//! fallback, login redirects, and detached contexts. All state changes are
//! serialized behind one async mutex.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::domain::{ProxyDescriptor, SessionCredential};
use crate::infrastructure::browser::{
    AutomationContext, Authenticator, BoundedContext, BrowserDriver, Credentials, DomScope,
    with_timeout,
};
use crate::infrastructure::config::{AppConfig, ProxyMode};
use crate::infrastructure::credential_store::CredentialStore;
use crate::infrastructure::harvest_error::{HarvestError, HarvestResult};
use crate::infrastructure::navigation::HydrationWaiter;
use crate::infrastructure::proxy_pool::ProxyProvider;

/// Settings the session manager reads from [`AppConfig`].
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub source_name: String,
    pub login_url: String,
    pub landing_url: String,
    pub login_cues: Vec<String>,
    pub credentials: Credentials,
    pub nav_timeout: Duration,
    pub action_timeout: Duration,
    pub health_check_timeout: Duration,
    pub credential_ttl: Duration,
    pub blocked_request_patterns: Vec<String>,
    pub proxy_mode: ProxyMode,
    pub pool_key: String,
}

impl SessionSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            source_name: config.dashboard.source_name.clone(),
            login_url: config.dashboard.login_url.clone(),
            landing_url: config.dashboard.landing_url.clone(),
            login_cues: config.dashboard.login_cues.clone(),
            credentials: config.dashboard.credentials(),
            nav_timeout: config.dashboard.nav_timeout(),
            action_timeout: config.dashboard.action_timeout(),
            health_check_timeout: Duration::from_millis(config.session.health_check_timeout_ms),
            credential_ttl: config.session.credential_ttl(),
            blocked_request_patterns: config.session.blocked_request_patterns.clone(),
            proxy_mode: config.proxy.mode,
            pool_key: config.proxy.pool_key.clone(),
        }
    }

    /// Whether `url` is a sign-in or verification screen.
    pub fn is_login_url(&self, url: &str) -> bool {
        let lower = url.to_lowercase();
        self.login_cues.iter().any(|cue| lower.contains(&cue.to_lowercase()))
    }
}

#[derive(Default)]
struct SessionState {
    context: Option<Arc<dyn AutomationContext>>,
    proxy: Option<ProxyDescriptor>,
    stickiness_key: String,
    // Per-work-item budget: one rotation, then one direct attempt.
    rotated: bool,
    direct_fallback_used: bool,
    force_direct: bool,
}

pub struct SessionManager {
    settings: SessionSettings,
    driver: Arc<dyn BrowserDriver>,
    authenticator: Arc<dyn Authenticator>,
    proxies: Arc<dyn ProxyProvider>,
    credentials: Arc<dyn CredentialStore>,
    waiter: HydrationWaiter,
    state: Mutex<SessionState>,
}

impl SessionManager {
    pub fn new(
        settings: SessionSettings,
        driver: Arc<dyn BrowserDriver>,
        authenticator: Arc<dyn Authenticator>,
        proxies: Arc<dyn ProxyProvider>,
        credentials: Arc<dyn CredentialStore>,
        waiter: HydrationWaiter,
    ) -> Self {
        Self {
            settings,
            driver,
            authenticator,
            proxies,
            credentials,
            waiter,
            state: Mutex::new(SessionState::default()),
        }
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn is_login_url(&self, url: &str) -> bool {
        self.settings.is_login_url(url)
    }

    /// Pin the proxy stickiness key for a work item and reset its fallback budget.
    pub async fn pin_for_work_item(&self, stickiness_key: &str) {
        let mut state = self.state.lock().await;
        if state.stickiness_key != stickiness_key {
            debug!("📌 Pinning session to work item {}", stickiness_key);
            state.stickiness_key = stickiness_key.to_string();
        }
        state.rotated = false;
        state.direct_fallback_used = false;
        state.force_direct = false;
    }

    pub async fn current_proxy(&self) -> Option<ProxyDescriptor> {
        self.state.lock().await.proxy.clone()
    }

    /// A live, logged-in context. Creates (and logs in) one if needed.
    pub async fn ensure_context(&self) -> HarvestResult<Arc<dyn AutomationContext>> {
        let mut state = self.state.lock().await;
        if let Some(context) = state.context.clone() {
            match self.health_check(context.as_ref()).await {
                Ok(()) => return Ok(context),
                Err(HarvestError::DetachedContext { message }) => {
                    warn!("⚠️ Context failed health check ({}), recreating", message);
                    state.context = None;
                }
                Err(e) => return Err(e),
            }
        }

        self.open_route(&mut state).await?;
        state
            .context
            .clone()
            .ok_or_else(|| HarvestError::fatal("context missing after creation"))
    }

    /// React to a network/proxy failure on the current route.
    ///
    /// In `auto` mode the first failure rotates to the next descriptor and the
    /// second falls back to a direct context, once per work item. `Ok` means a
    /// fresh route is in place and the caller may retry; otherwise the
    /// original error is handed back.
    pub async fn handle_network_error(&self, error: HarvestError) -> HarvestResult<()> {
        let via_proxy = matches!(error, HarvestError::NetworkOrProxy { via_proxy: true, .. });
        if self.settings.proxy_mode != ProxyMode::Auto || !via_proxy {
            return Err(error);
        }

        let mut state = self.state.lock().await;
        if !state.rotated {
            state.rotated = true;
            warn!("🔄 Proxy failure ({}), rotating to next descriptor", error);
            self.close_current(&mut state).await;
            match self.open_route(&mut state).await {
                Ok(()) => return Ok(()),
                Err(e) => warn!("⚠️ Rotated proxy failed too: {}", e),
            }
        }

        if state.direct_fallback_used {
            warn!("❌ Direct fallback already spent for {}", state.stickiness_key);
            return Err(error);
        }
        state.direct_fallback_used = true;
        state.force_direct = true;
        warn!("🔄 Proxy route exhausted, falling back to a direct context once");
        self.close_current(&mut state).await;
        self.open_route(&mut state).await
    }

    /// Rebuild a detached context: new context, stored cookies, fresh login.
    pub async fn recover_detached(&self) -> HarvestResult<Arc<dyn AutomationContext>> {
        let mut state = self.state.lock().await;
        info!("🔄 Recovering detached context for {}", self.settings.source_name);
        self.close_current(&mut state).await;
        let context = self.create_context(&mut state).await?;
        self.restore_cookies(context.as_ref()).await?;
        self.login(context.as_ref()).await?;
        Ok(context)
    }

    /// Re-run the login sequence on the current context.
    pub async fn reauthenticate(&self) -> HarvestResult<()> {
        let context = {
            let state = self.state.lock().await;
            state.context.clone()
        };
        match context {
            Some(context) => self.login(context.as_ref()).await,
            None => self.ensure_context().await.map(|_| ()),
        }
    }

    /// Drop stored cookies and the live context after an unrecoverable session failure.
    pub async fn discard_session(&self) -> HarvestResult<()> {
        let mut state = self.state.lock().await;
        self.close_current(&mut state).await;
        self.credentials.discard(&self.settings.source_name).await?;
        warn!("🗑️ Discarded session for {}", self.settings.source_name);
        Ok(())
    }

    pub async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        self.close_current(&mut state).await;
    }

    async fn health_check(&self, context: &dyn AutomationContext) -> HarvestResult<()> {
        with_timeout(
            "health check",
            self.settings.health_check_timeout,
            context.exists(DomScope::Main, "body"),
        )
        .await?;
        Ok(())
    }

    async fn create_context(
        &self,
        state: &mut SessionState,
    ) -> HarvestResult<Arc<dyn AutomationContext>> {
        let proxy = match self.settings.proxy_mode {
            ProxyMode::Off => None,
            ProxyMode::Auto if state.force_direct => None,
            ProxyMode::Paid => Some(
                self.proxies
                    .acquire(&self.settings.pool_key, &state.stickiness_key)
                    .await
                    .ok_or_else(|| HarvestError::fatal("proxy pool exhausted in paid mode"))?,
            ),
            ProxyMode::Auto => {
                let proxy = self
                    .proxies
                    .acquire(&self.settings.pool_key, &state.stickiness_key)
                    .await;
                if proxy.is_none() {
                    warn!("⚠️ Proxy pool exhausted, going direct");
                }
                proxy
            }
        };

        let context = BoundedContext::wrap(
            self.driver.new_context(proxy.as_ref()).await?,
            self.settings.action_timeout,
        );
        if !self.settings.blocked_request_patterns.is_empty() {
            context
                .block_requests(&self.settings.blocked_request_patterns)
                .await?;
        }
        debug!(
            "✅ New context created ({})",
            proxy.as_ref().map_or("direct", |p| p.endpoint.as_str())
        );

        state.proxy = proxy;
        state.context = Some(context.clone());
        Ok(context)
    }

    /// New context on the current route, authenticated by cookies or a login.
    async fn open_route(&self, state: &mut SessionState) -> HarvestResult<()> {
        let context = self.create_context(state).await?;
        let authenticated = match self.restore_cookies(context.as_ref()).await {
            Ok(true) => Ok(()),
            Ok(false) => self.login(context.as_ref()).await,
            Err(e) => Err(e),
        };
        if let Err(e) = authenticated {
            // A context that never authenticated must not be handed out later.
            self.close_current(state).await;
            return Err(e);
        }
        Ok(())
    }

    async fn close_current(&self, state: &mut SessionState) {
        if let Some(context) = state.context.take() {
            if let Err(e) = context.close().await {
                debug!("Ignoring error while closing context: {}", e);
            }
        }
        state.proxy = None;
    }

    /// Apply stored cookies if they are still fresh. Returns whether any were applied.
    async fn restore_cookies(&self, context: &dyn AutomationContext) -> HarvestResult<bool> {
        let Some(credential) = self.credentials.load(&self.settings.source_name).await? else {
            return Ok(false);
        };
        if !credential.is_fresh(self.settings.credential_ttl) || credential.cookies.is_empty() {
            debug!("Stored cookies for {} are stale", self.settings.source_name);
            return Ok(false);
        }
        context.set_cookies(&credential.cookies).await?;
        debug!("🍪 Restored {} cookies", credential.cookies.len());
        Ok(true)
    }

    async fn login(&self, context: &dyn AutomationContext) -> HarvestResult<()> {
        info!("🔐 Logging in to {}", self.settings.source_name);
        let current = context.current_url().await.unwrap_or_default();
        if !self.is_login_url(&current) {
            context.goto(&self.settings.login_url, self.settings.nav_timeout).await?;
        }

        let logged_in = self
            .authenticator
            .login(context, &self.settings.credentials)
            .await?;
        if !logged_in {
            self.credentials.discard(&self.settings.source_name).await?;
            return Err(HarvestError::fatal(format!(
                "login rejected for {}",
                self.settings.source_name
            )));
        }

        // Never trust the post-login default view; it may carry a stale saved filter.
        context
            .goto(&self.settings.landing_url, self.settings.nav_timeout)
            .await?;
        let landed = context.current_url().await?;
        if self.is_login_url(&landed) {
            return Err(HarvestError::SessionExpired { url: landed });
        }
        if self.waiter.wait_ready(context).await?.is_none() {
            return Err(HarvestError::DashboardNotReady {
                url: landed,
                reloads: 0,
                snapshot: None,
            });
        }

        let cookies = context.cookies().await?;
        self.credentials
            .save(&self.settings.source_name, &SessionCredential::new(cookies))
            .await?;
        info!("✅ Login complete, session cookies saved");
        Ok(())
    }
}

//! Test utilities for the harvester
//!
//! An in-process fake of the dashboard: a virtualized result list, clickable
//! map clusters, listing detail views (optionally rendered inside a frame)
//! and a cookie based login. Tests run the real session, navigation and
//! crawling code against it, backed by an in-memory SQLite store.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use crate::crawling::normalizer::Normalizer;
use crate::domain::{ContactInfo, Cookie, ProxyDescriptor, RawCard};
use crate::infrastructure::browser::{
    Authenticator, AutomationContext, BrowserDriver, BrowserError, BrowserResult, Credentials,
    DomScope, ElementSnapshot, FieldSelector, ScrollMetrics,
};
use crate::infrastructure::checkpoint_store::{CheckpointStore, SqliteCheckpointStore};
use crate::infrastructure::config::{AppConfig, ProxyEntry, ProxyMode};
use crate::infrastructure::credential_store::{CredentialStore, SqliteCredentialStore};
use crate::infrastructure::database_connection::DatabaseConnection;
use crate::infrastructure::navigation::{HydrationWaiter, NavigationController};
use crate::infrastructure::property_repository::{PropertyStore, SqlitePropertyStore};
use crate::infrastructure::proxy_pool::{ProxyProvider, StaticProxyPool};
use crate::infrastructure::retry_policy::RetryPolicy;
use crate::infrastructure::session_manager::{SessionManager, SessionSettings};

pub const LOGIN_URL: &str = "https://dash.test/login";
pub const LANDING_URL: &str = "https://dash.test/home";
pub const SEARCH_TEMPLATE: &str =
    "https://dash.test/search?state={partition}&area={sub_area}&filter={filter}";
const DETAIL_PREFIX: &str = "https://dash.test/listing/";
const SESSION_COOKIE: &str = "dash_session";

const ITEM_HEIGHT: u64 = 100;
const VIEWPORT_HEIGHT: u64 = 1_000;

/// One listing as the fake dashboard renders it.
#[derive(Debug, Clone)]
pub struct FakeListing {
    /// What the mounted card shows
    pub card: RawCard,
    /// Agent block of the detail view
    pub detail_contact: ContactInfo,
    pub detail_in_frame: bool,
    /// Free text of the detail view; defaults to the agent block
    pub detail_text: Option<String>,
}

/// Listing `i`: "{100+i} Main St, Atlanta, GA {30300+i}" with distinct card
/// and detail-view contacts.
pub fn listing(i: usize) -> FakeListing {
    FakeListing {
        card: RawCard {
            address_lines: vec![format!("{} Main St", 100 + i), format!("Atlanta, GA {}", 30300 + i)],
            price_text: Some(format!("${},000", 250 + i)),
            stats_text: vec!["3 bds | 2 ba | 1,850 sqft".to_string()],
            contact: ContactInfo {
                name: Some(format!("Agent {i}")),
                email: Some(format!("agent{i}@realty.test")),
                phone: Some(format!("(404) 555-{:04}", 1000 + i)),
            },
            detail_url: Some(format!("{DETAIL_PREFIX}{i}")),
        },
        detail_contact: ContactInfo {
            name: None,
            email: Some(format!("listing{i}@broker.test")),
            phone: Some(format!("(678) 555-{:04}", 2000 + i)),
        },
        detail_in_frame: false,
        detail_text: None,
    }
}

/// A map view. Dense nodes show their children as clickable clusters.
#[derive(Debug, Clone)]
pub struct ClusterNode {
    pub label: String,
    pub count: u64,
    pub children: Vec<ClusterNode>,
    pub listing_ids: Vec<usize>,
}

impl ClusterNode {
    pub fn leaf(label: &str, listing_ids: Vec<usize>) -> Self {
        Self {
            label: label.to_string(),
            count: listing_ids.len() as u64,
            children: Vec::new(),
            listing_ids,
        }
    }

    pub fn dense(count: u64, children: Vec<ClusterNode>) -> Self {
        Self::dense_labeled("", count, children)
    }

    pub fn dense_labeled(label: &str, count: u64, children: Vec<ClusterNode>) -> Self {
        Self {
            label: label.to_string(),
            count,
            children,
            listing_ids: Vec::new(),
        }
    }

    fn visible_ids(&self) -> Vec<usize> {
        if self.children.is_empty() {
            self.listing_ids.clone()
        } else {
            self.children.iter().flat_map(ClusterNode::visible_ids).collect()
        }
    }

    fn at(&self, path: &[usize]) -> &ClusterNode {
        path.iter()
            .try_fold(self, |node, &i| node.children.get(i))
            .unwrap_or(self)
    }
}

/// Site behaviour knobs plus the counters tests assert on.
pub struct SiteState {
    pub listings: Vec<FakeListing>,
    pub root: ClusterNode,
    /// Every navigation through a proxied context fails
    pub fail_via_proxy: bool,
    pub reject_login: bool,
    /// Loads (goto + reloads) of a search view before it hydrates
    pub hydrate_after_loads: u32,
    /// Result count and list container rendered
    pub show_list_chrome: bool,
    /// Cluster clicks leave the view unchanged
    pub clusters_repeat_forever: bool,
    /// Cluster clicks miss, as when the markers re-render mid-click
    pub clusters_unclickable: bool,
    /// Serve this state's addresses regardless of the requested partition
    pub serve_partition: Option<String>,
    /// The n-th following search navigation detaches the context
    pub detach_on_goto: Option<u32>,
    /// This many following search navigations fail with a connection reset
    pub reset_next_gotos: u32,
    /// Card reads never return
    pub hang_card_reads: bool,

    pub login_calls: u32,
    pub contexts_created: Vec<Option<String>>,
    pub reloads: u32,
    pub detail_opens: u32,

    session_token: u64,
    open_contexts: Vec<Arc<AtomicBool>>,
}

impl SiteState {
    pub fn with_listings(n: usize) -> Self {
        Self {
            listings: (0..n).map(listing).collect(),
            root: ClusterNode::leaf("", (0..n).collect()),
            fail_via_proxy: false,
            reject_login: false,
            hydrate_after_loads: 1,
            show_list_chrome: true,
            clusters_repeat_forever: false,
            clusters_unclickable: false,
            serve_partition: None,
            detach_on_goto: None,
            reset_next_gotos: 0,
            hang_card_reads: false,
            login_calls: 0,
            contexts_created: Vec::new(),
            reloads: 0,
            detail_opens: 0,
            session_token: 1,
            open_contexts: Vec::new(),
        }
    }

    /// Invalidate every issued session cookie.
    pub fn expire_session(&mut self) {
        self.session_token += 1;
    }

    fn session_cookie(&self) -> Cookie {
        Cookie {
            name: SESSION_COOKIE.to_string(),
            value: self.session_token.to_string(),
            domain: "dash.test".to_string(),
            path: "/".to_string(),
            expires: None,
            http_only: true,
            secure: true,
        }
    }
}

#[derive(Clone)]
pub struct FakeSite {
    inner: Arc<Mutex<SiteState>>,
}

impl FakeSite {
    pub fn new(state: SiteState) -> Self {
        Self {
            inner: Arc::new(Mutex::new(state)),
        }
    }

    pub fn state(&self) -> MutexGuard<'_, SiteState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Close every context handed out so far, as a crashed browser would.
    pub fn detach_existing(&self) {
        for flag in &self.state().open_contexts {
            flag.store(true, Ordering::SeqCst);
        }
    }
}

/// What a selector list is asking for, by the markers in the default selectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Body,
    ResultCount,
    ListContainer,
    Card,
    AppRoot,
    Loading,
    Cluster,
    DetailPanel,
    Other,
}

fn target_of(selector: &str) -> Target {
    let selector = selector.trim();
    if selector == "body" {
        Target::Body
    } else if selector.contains("result-count") {
        Target::ResultCount
    } else if selector.contains("results-list") {
        Target::ListContainer
    } else if selector.contains("property-card") {
        Target::Card
    } else if selector.contains("listing-detail") {
        Target::DetailPanel
    } else if selector.contains("map-cluster") {
        Target::Cluster
    } else if selector.contains("#root") {
        Target::AppRoot
    } else if selector.contains("skeleton") {
        Target::Loading
    } else {
        Target::Other
    }
}

#[derive(Debug, Clone)]
enum Page {
    Blank,
    Login,
    List {
        path: Vec<usize>,
        scroll_top: u64,
        loads: u32,
        landing: bool,
    },
    Detail {
        listing: usize,
    },
}

#[derive(Debug, Clone)]
struct View {
    url: String,
    page: Page,
}

struct ContextState {
    view: View,
    history: Vec<View>,
    token: Option<u64>,
}

pub struct FakeContext {
    site: FakeSite,
    via_proxy: bool,
    closed: Arc<AtomicBool>,
    state: Mutex<ContextState>,
}

fn closed_error() -> BrowserError {
    BrowserError::Closed {
        message: "Target page, context or browser has been closed".to_string(),
    }
}

fn pick(requested: &[FieldSelector], available: HashMap<&str, String>) -> HashMap<String, String> {
    requested
        .iter()
        .filter_map(|f| available.get(f.name.as_str()).map(|v| (f.name.clone(), v.clone())))
        .collect()
}

fn contact_fields(contact: &ContactInfo) -> HashMap<&'static str, String> {
    let mut fields = HashMap::new();
    if let Some(name) = &contact.name {
        fields.insert("agent_name", name.clone());
    }
    if let Some(email) = &contact.email {
        fields.insert("agent_email", email.clone());
        fields.insert("agent_email_href", format!("mailto:{email}"));
    }
    if let Some(phone) = &contact.phone {
        fields.insert("agent_phone", phone.clone());
        fields.insert("agent_phone_href", format!("tel:{phone}"));
    }
    fields
}

fn served_state(url: &str, site: &SiteState) -> Option<String> {
    site.serve_partition.clone().or_else(|| {
        url.split(['?', '&'])
            .find_map(|part| part.strip_prefix("state="))
            .map(str::to_uppercase)
    })
}

impl FakeContext {
    fn lock(&self) -> MutexGuard<'_, ContextState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_open(&self) -> BrowserResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(closed_error())
        } else {
            Ok(())
        }
    }

    fn authenticated(state: &ContextState, site: &SiteState) -> bool {
        state.token == Some(site.session_token)
    }

    fn hydrated(page: &Page, site: &SiteState) -> bool {
        match page {
            Page::List { loads, landing, .. } => *landing || *loads >= site.hydrate_after_loads,
            _ => false,
        }
    }

    fn visible_ids(page: &Page, site: &SiteState) -> Vec<usize> {
        match page {
            Page::List { path, .. } => site
                .root
                .at(path)
                .visible_ids()
                .into_iter()
                .filter(|id| *id < site.listings.len())
                .collect(),
            _ => Vec::new(),
        }
    }

    fn metrics(page: &Page, site: &SiteState) -> ScrollMetrics {
        let scroll_top = match page {
            Page::List { scroll_top, .. } => *scroll_top,
            _ => 0,
        };
        ScrollMetrics {
            scroll_top,
            scroll_height: Self::visible_ids(page, site).len() as u64 * ITEM_HEIGHT,
            client_height: VIEWPORT_HEIGHT,
        }
    }

    /// Listings inside the viewport; the rest of the list is not in the DOM.
    fn mounted_ids(page: &Page, site: &SiteState) -> Vec<usize> {
        if !Self::hydrated(page, site) {
            return Vec::new();
        }
        let ids = Self::visible_ids(page, site);
        let top = Self::metrics(page, site).scroll_top;
        let first = (top / ITEM_HEIGHT) as usize;
        let last = (top + VIEWPORT_HEIGHT).div_ceil(ITEM_HEIGHT) as usize;
        ids.into_iter().skip(first).take(last.saturating_sub(first)).collect()
    }

    fn render_card(view: &View, site: &SiteState, id: usize, requested: &[FieldSelector]) -> ElementSnapshot {
        let card = &site.listings[id].card;
        let mut lines = card.address_lines.clone();
        if let (Some(state), Some(line)) = (served_state(&view.url, site), lines.get_mut(1)) {
            *line = line.replace(", GA ", &format!(", {state} "));
        }

        let mut available = contact_fields(&card.contact);
        if let Some(first) = lines.first() {
            available.insert("address_line1", first.clone());
        }
        if let Some(second) = lines.get(1) {
            available.insert("address_line2", second.clone());
        }
        if let Some(price) = &card.price_text {
            available.insert("price", price.clone());
        }
        if !card.stats_text.is_empty() {
            available.insert("stats", card.stats_text.join(" | "));
        }
        if let Some(url) = &card.detail_url {
            available.insert("detail_url", url.clone());
        }

        let mut text = lines.clone();
        text.extend(card.price_text.clone());
        text.extend(card.stats_text.iter().cloned());
        ElementSnapshot {
            text: text.join("\n"),
            fields: pick(requested, available),
        }
    }

    fn detail_text(listing: &FakeListing) -> String {
        listing.detail_text.clone().unwrap_or_else(|| {
            let contact = &listing.detail_contact;
            [&contact.name, &contact.email, &contact.phone]
                .into_iter()
                .flatten()
                .cloned()
                .collect::<Vec<_>>()
                .join("\n")
        })
    }

    fn scroll(state: &mut ContextState, site: &SiteState, by_px: i64) -> ScrollMetrics {
        let metrics = Self::metrics(&state.view.page, site);
        let max_top = metrics.scroll_height.saturating_sub(metrics.client_height);
        if let Page::List { scroll_top, .. } = &mut state.view.page {
            *scroll_top = (*scroll_top as i64).saturating_add(by_px).clamp(0, max_top as i64) as u64;
        }
        Self::metrics(&state.view.page, site)
    }
}

#[async_trait]
impl AutomationContext for FakeContext {
    async fn goto(&self, url: &str, _timeout: Duration) -> BrowserResult<()> {
        self.check_open()?;
        let mut state = self.lock();
        let mut site = self.site.state();
        if self.via_proxy && site.fail_via_proxy {
            return Err(BrowserError::Network {
                message: format!("net::ERR_PROXY_CONNECTION_FAILED at {url}"),
                via_proxy: true,
            });
        }
        if url != LOGIN_URL && url != LANDING_URL {
            if let Some(remaining) = site.detach_on_goto {
                if remaining <= 1 {
                    site.detach_on_goto = None;
                    self.closed.store(true, Ordering::SeqCst);
                    return Err(closed_error());
                }
                site.detach_on_goto = Some(remaining - 1);
            }
            if site.reset_next_gotos > 0 {
                site.reset_next_gotos -= 1;
                return Err(BrowserError::Network {
                    message: format!("net::ERR_CONNECTION_RESET at {url}"),
                    via_proxy: self.via_proxy,
                });
            }
        }

        let previous = state.view.clone();
        if !matches!(previous.page, Page::Blank) {
            state.history.push(previous);
        }
        let listing_count = site.listings.len();
        let detail_id = url
            .strip_prefix(DETAIL_PREFIX)
            .and_then(|id| id.parse::<usize>().ok())
            .filter(|id| *id < listing_count);
        state.view = if url.starts_with(LOGIN_URL) || !Self::authenticated(&state, &site) {
            View {
                url: LOGIN_URL.to_string(),
                page: Page::Login,
            }
        } else if let Some(id) = detail_id {
            site.detail_opens += 1;
            View {
                url: url.to_string(),
                page: Page::Detail { listing: id },
            }
        } else {
            View {
                url: url.to_string(),
                page: Page::List {
                    path: Vec::new(),
                    scroll_top: 0,
                    loads: 1,
                    landing: url == LANDING_URL,
                },
            }
        };
        Ok(())
    }

    async fn reload(&self, _timeout: Duration) -> BrowserResult<()> {
        self.check_open()?;
        let mut state = self.lock();
        let mut site = self.site.state();
        site.reloads += 1;
        if !Self::authenticated(&state, &site) {
            state.view = View {
                url: LOGIN_URL.to_string(),
                page: Page::Login,
            };
            return Ok(());
        }
        if let Page::List { scroll_top, loads, .. } = &mut state.view.page {
            *scroll_top = 0;
            *loads = loads.saturating_add(1);
        }
        Ok(())
    }

    async fn go_back(&self, _timeout: Duration) -> BrowserResult<()> {
        self.check_open()?;
        let mut state = self.lock();
        if let Some(previous) = state.history.pop() {
            state.view = previous;
        }
        Ok(())
    }

    async fn current_url(&self) -> BrowserResult<String> {
        self.check_open()?;
        Ok(self.lock().view.url.clone())
    }

    async fn exists(&self, scope: DomScope, selector: &str) -> BrowserResult<bool> {
        self.check_open()?;
        let state = self.lock();
        let site = self.site.state();
        let page = &state.view.page;
        let target = target_of(selector);

        if let DomScope::Frame(index) = scope {
            return Ok(match page {
                Page::Detail { listing } => {
                    index == 0 && target == Target::DetailPanel && site.listings[*listing].detail_in_frame
                }
                _ => false,
            });
        }

        let hydrated = Self::hydrated(page, &site);
        Ok(match target {
            Target::Body => true,
            Target::AppRoot => !matches!(page, Page::Blank | Page::Login),
            Target::Loading => matches!(page, Page::List { .. }) && !hydrated,
            Target::ResultCount | Target::ListContainer => hydrated && site.show_list_chrome,
            Target::Card => !Self::mounted_ids(page, &site).is_empty(),
            Target::Cluster => {
                hydrated
                    && matches!(page, Page::List { path, .. } if !site.root.at(path).children.is_empty())
            }
            Target::DetailPanel => {
                matches!(page, Page::Detail { listing } if !site.listings[*listing].detail_in_frame)
            }
            Target::Other => false,
        })
    }

    async fn text_of(&self, scope: DomScope, selector: &str) -> BrowserResult<Option<String>> {
        self.check_open()?;
        let state = self.lock();
        let site = self.site.state();
        let page = &state.view.page;
        if scope != DomScope::Main
            || target_of(selector) != Target::ResultCount
            || !site.show_list_chrome
            || !Self::hydrated(page, &site)
        {
            return Ok(None);
        }
        Ok(match page {
            Page::List { path, .. } => Some(format!("{} homes", site.root.at(path).count)),
            _ => None,
        })
    }

    async fn snapshot_all(
        &self,
        scope: DomScope,
        selector: &str,
        fields: &[FieldSelector],
    ) -> BrowserResult<Vec<ElementSnapshot>> {
        self.check_open()?;
        let hang = matches!(target_of(selector), Target::Card) && self.site.state().hang_card_reads;
        if hang {
            std::future::pending::<()>().await;
        }
        let state = self.lock();
        let site = self.site.state();
        let page = &state.view.page;

        match (target_of(selector), page) {
            (Target::Card, Page::List { .. }) if scope == DomScope::Main => Ok(Self::mounted_ids(page, &site)
                .into_iter()
                .map(|id| Self::render_card(&state.view, &site, id, fields))
                .collect()),
            (Target::Cluster, Page::List { path, .. })
                if scope == DomScope::Main && Self::hydrated(page, &site) =>
            {
                Ok(site
                    .root
                    .at(path)
                    .children
                    .iter()
                    .map(|child| ElementSnapshot {
                        text: child.label.clone(),
                        fields: HashMap::new(),
                    })
                    .collect())
            }
            (Target::DetailPanel, Page::Detail { listing }) => {
                let listing = &site.listings[*listing];
                let expected = if listing.detail_in_frame {
                    DomScope::Frame(0)
                } else {
                    DomScope::Main
                };
                if scope != expected {
                    return Ok(Vec::new());
                }
                Ok(vec![ElementSnapshot {
                    text: Self::detail_text(listing),
                    fields: pick(fields, contact_fields(&listing.detail_contact)),
                }])
            }
            _ => Ok(Vec::new()),
        }
    }

    async fn page_text(&self) -> BrowserResult<String> {
        self.check_open()?;
        let state = self.lock();
        let site = self.site.state();
        Ok(match &state.view.page {
            Page::Blank => String::new(),
            Page::Login => "Sign in to continue".to_string(),
            Page::Detail { listing } => Self::detail_text(&site.listings[*listing]),
            page @ Page::List { .. } => Self::mounted_ids(page, &site)
                .into_iter()
                .map(|id| Self::render_card(&state.view, &site, id, &[]).text)
                .collect::<Vec<_>>()
                .join("\n"),
        })
    }

    async fn content(&self) -> BrowserResult<String> {
        self.check_open()?;
        let state = self.lock();
        let site = self.site.state();
        Ok(match &state.view.page {
            Page::Detail { listing } => {
                let listing = &site.listings[*listing];
                let contact = &listing.detail_contact;
                let mut links = String::new();
                if let Some(email) = &contact.email {
                    links.push_str(&format!(r#"<a href="mailto:{email}">Email agent</a>"#));
                }
                if let Some(phone) = &contact.phone {
                    links.push_str(&format!(r#"<a href="tel:{phone}">Call agent</a>"#));
                }
                format!(
                    r#"<html><body><div id="root"><div class="listing-detail">{}{}</div></div></body></html>"#,
                    Self::detail_text(listing),
                    links
                )
            }
            _ => r#"<html><body><div id="root"></div></body></html>"#.to_string(),
        })
    }

    async fn frame_count(&self) -> BrowserResult<usize> {
        self.check_open()?;
        let state = self.lock();
        let site = self.site.state();
        Ok(match &state.view.page {
            Page::Detail { listing } if site.listings[*listing].detail_in_frame => 1,
            _ => 0,
        })
    }

    async fn scroll_container(&self, selector: &str, by_px: i64) -> BrowserResult<Option<ScrollMetrics>> {
        self.check_open()?;
        let mut state = self.lock();
        let site = self.site.state();
        let has_container = target_of(selector) == Target::ListContainer
            && site.show_list_chrome
            && Self::hydrated(&state.view.page, &site);
        if !has_container {
            return Ok(None);
        }
        Ok(Some(Self::scroll(&mut state, &site, by_px)))
    }

    async fn scroll_page(&self, by_px: i64) -> BrowserResult<ScrollMetrics> {
        self.check_open()?;
        let mut state = self.lock();
        let site = self.site.state();
        Ok(Self::scroll(&mut state, &site, by_px))
    }

    async fn click(&self, selector: &str, index: usize, _timeout: Duration) -> BrowserResult<bool> {
        self.check_open()?;
        let mut state = self.lock();
        let mut site = self.site.state();
        match target_of(selector) {
            Target::Cluster => {
                let Page::List { path, .. } = &state.view.page else {
                    return Ok(false);
                };
                if site.clusters_unclickable || index >= site.root.at(path).children.len() {
                    return Ok(false);
                }
                let previous = state.view.clone();
                state.history.push(previous);
                if let Page::List { path, scroll_top, .. } = &mut state.view.page {
                    if !site.clusters_repeat_forever {
                        path.push(index);
                    }
                    *scroll_top = 0;
                }
                Ok(true)
            }
            Target::Card => {
                let Some(&id) = Self::mounted_ids(&state.view.page, &site).get(index) else {
                    return Ok(false);
                };
                site.detail_opens += 1;
                let previous = state.view.clone();
                state.history.push(previous);
                state.view = View {
                    url: format!("{DETAIL_PREFIX}{id}"),
                    page: Page::Detail { listing: id },
                };
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn cookies(&self) -> BrowserResult<Vec<Cookie>> {
        self.check_open()?;
        let state = self.lock();
        let site = self.site.state();
        if Self::authenticated(&state, &site) {
            Ok(vec![site.session_cookie()])
        } else {
            Ok(Vec::new())
        }
    }

    async fn set_cookies(&self, cookies: &[Cookie]) -> BrowserResult<()> {
        self.check_open()?;
        let token = cookies
            .iter()
            .find(|c| c.name == SESSION_COOKIE)
            .and_then(|c| c.value.parse().ok());
        if token.is_some() {
            self.lock().token = token;
        }
        Ok(())
    }

    async fn block_requests(&self, _url_patterns: &[String]) -> BrowserResult<()> {
        self.check_open()
    }

    async fn evaluate(&self, _script: &str, _timeout: Duration) -> BrowserResult<serde_json::Value> {
        self.check_open()?;
        Ok(serde_json::Value::Null)
    }

    async fn close(&self) -> BrowserResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

pub struct FakeDriver {
    site: FakeSite,
}

#[async_trait]
impl BrowserDriver for FakeDriver {
    async fn new_context(&self, proxy: Option<&ProxyDescriptor>) -> BrowserResult<Arc<dyn AutomationContext>> {
        let closed = Arc::new(AtomicBool::new(false));
        {
            let mut site = self.site.state();
            site.contexts_created.push(proxy.map(|p| p.endpoint.clone()));
            site.open_contexts.push(closed.clone());
        }
        Ok(Arc::new(FakeContext {
            site: self.site.clone(),
            via_proxy: proxy.is_some(),
            closed,
            state: Mutex::new(ContextState {
                view: View {
                    url: "about:blank".to_string(),
                    page: Page::Blank,
                },
                history: Vec::new(),
                token: None,
            }),
        }))
    }
}

/// Accepts any credentials unless the site rejects logins.
pub struct FakeAuthenticator {
    site: FakeSite,
}

#[async_trait]
impl Authenticator for FakeAuthenticator {
    async fn login(&self, context: &dyn AutomationContext, _credentials: &Credentials) -> BrowserResult<bool> {
        let (rejected, cookie) = {
            let mut site = self.site.state();
            site.login_calls += 1;
            (site.reject_login, site.session_cookie())
        };
        if rejected {
            return Ok(false);
        }
        context.set_cookies(&[cookie]).await?;
        Ok(true)
    }
}

/// Config pointed at the fake site with every wait shrunk to milliseconds.
pub fn test_config(snapshot_dir: &Path) -> AppConfig {
    let mut config = AppConfig::default();
    config.dashboard.login_url = LOGIN_URL.to_string();
    config.dashboard.landing_url = LANDING_URL.to_string();
    config.dashboard.url_template = SEARCH_TEMPLATE.to_string();
    config.dashboard.username = "ops@harvest.test".to_string();
    config.dashboard.password = "secret".to_string();
    config.dashboard.nav_timeout_ms = 1_000;
    config.dashboard.action_timeout_ms = 1_000;
    config.session.health_check_timeout_ms = 1_000;
    config.hydration.timeout_ms = 30;
    config.hydration.poll_interval_ms = 5;
    config.hydration.snapshot_dir = snapshot_dir.display().to_string();
    config.harvester.fast_wait_ms = 1;
    config.harvester.slow_wait_ms = 2;
    config.decomposer.settle_ms = 1;
    config.extraction.detail_settle_ms = 0;
    config.retry.base_delay_ms = 1;
    config.retry.max_delay_ms = 10;
    config.plan.partitions = vec!["GA".to_string()];
    config
}

/// Fake site, real stores and a session manager wired together.
pub struct FakeHarness {
    pub site: FakeSite,
    pub config: AppConfig,
    pub credentials: Arc<dyn CredentialStore>,
    pub checkpoints: Arc<dyn CheckpointStore>,
    pub store: Arc<dyn PropertyStore>,
    pub normalizer: Arc<Normalizer>,
    proxies: Arc<dyn ProxyProvider>,
    session: Arc<SessionManager>,
    _dir: TempDir,
}

impl FakeHarness {
    pub async fn new(site: SiteState) -> Self {
        Self::with_proxies(site, ProxyMode::Off, 0).await
    }

    pub async fn with_proxies(site: SiteState, mode: ProxyMode, proxy_count: usize) -> Self {
        let dir = tempfile::tempdir().expect("temp dir");
        let mut config = test_config(&dir.path().join("snapshots"));
        config.proxy.mode = mode;
        config.proxy.endpoints = (0..proxy_count)
            .map(|i| ProxyEntry {
                endpoint: format!("http://proxy{i}.test:8000"),
                username: None,
                password: None,
            })
            .collect();

        let db = DatabaseConnection::new("sqlite::memory:").await.expect("in-memory db");
        db.migrate().await.expect("migrations");
        let pool = db.pool().clone();
        let credentials: Arc<dyn CredentialStore> = Arc::new(SqliteCredentialStore::new(pool.clone()));
        let checkpoints: Arc<dyn CheckpointStore> = Arc::new(SqliteCheckpointStore::new(pool.clone()));
        let store: Arc<dyn PropertyStore> = Arc::new(SqlitePropertyStore::new(pool));
        let proxies: Arc<dyn ProxyProvider> = Arc::new(StaticProxyPool::new(config.proxy.endpoints.clone()));

        let site = FakeSite::new(site);
        let session = build_session(&config, &site, proxies.clone(), credentials.clone());
        Self {
            site,
            normalizer: Arc::new(Normalizer::new(store.clone())),
            config,
            credentials,
            checkpoints,
            store,
            proxies,
            session,
            _dir: dir,
        }
    }

    pub fn session(&self) -> Arc<SessionManager> {
        self.session.clone()
    }

    /// A second session manager over the same site and cookie store, as after a restart.
    pub fn rebuild_session(&self) -> Arc<SessionManager> {
        build_session(&self.config, &self.site, self.proxies.clone(), self.credentials.clone())
    }

    pub fn navigation(&self) -> NavigationController {
        NavigationController::new(self.session(), RetryPolicy::new(&self.config.retry), &self.config)
    }
}

fn build_session(
    config: &AppConfig,
    site: &FakeSite,
    proxies: Arc<dyn ProxyProvider>,
    credentials: Arc<dyn CredentialStore>,
) -> Arc<SessionManager> {
    Arc::new(SessionManager::new(
        SessionSettings::from_config(config),
        Arc::new(FakeDriver { site: site.clone() }),
        Arc::new(FakeAuthenticator { site: site.clone() }),
        proxies,
        credentials,
        HydrationWaiter::new(config.selectors.dashboard.clone(), &config.hydration),
    ))
}

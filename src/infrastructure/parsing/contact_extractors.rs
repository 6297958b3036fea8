//! Agent contact extraction chain
//!
//! An ordered list of [`ContactStrategy`] tiers applied first-match-wins:
//!
//! 1. fields already read from the mounted card
//! 2. the listing's detail view (main document and every embedded frame)
//! 3. a free-text scan of the captured detail page
//! 4. `mailto:`/`tel:` links in the captured detail page
//!
//! System and placeholder addresses are dropped in every tier.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use tracing::{debug, warn};

use crate::crawling::PauseSignal;
use crate::domain::{ContactInfo, RawCard};
use crate::infrastructure::browser::{AutomationContext, DomScope, ElementSnapshot};
use crate::infrastructure::config::AppConfig;
use crate::infrastructure::harvest_error::{HarvestError, HarvestResult};
use crate::infrastructure::parsing::card_parser::card_from_snapshot;
use crate::infrastructure::parsing::config::{SelectorConfig, join};

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b[A-Z0-9._%+\-]+@[A-Z0-9.\-]+\.[A-Z]{2,}\b").expect("valid email regex")
});
static PHONE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:\+?1[\s.\-]?)?(?:\(\d{3}\)|\b\d{3})[\s.\-]?\d{3}[\s.\-]?\d{4}\b")
        .expect("valid phone regex")
});
static LISTED_BY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\b(?i:listed\s+by|listing\s+agent|agent)[ \t]*:?[ \t]*([A-Z][A-Za-z.'\-]+(?:[ \t]+[A-Z][A-Za-z.'\-]+){0,3})",
    )
    .expect("valid listed-by regex")
});
static LINK_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("a[href]").expect("valid link selector"));

/// Drops platform, system and operator addresses.
#[derive(Debug, Clone, Default)]
pub struct EmailFilter {
    patterns: Vec<String>,
}

impl EmailFilter {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            patterns: patterns
                .into_iter()
                .map(|p| p.as_ref().trim().to_lowercase())
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    /// Configured patterns plus the operator's own login address.
    pub fn from_config(config: &AppConfig) -> Self {
        let mut patterns = config.extraction.excluded_email_patterns.clone();
        if config.dashboard.username.contains('@') {
            patterns.push(config.dashboard.username.clone());
        }
        Self::new(patterns)
    }

    pub fn allows(&self, email: &str) -> bool {
        let lower = email.trim().to_lowercase();
        !lower.is_empty() && !self.patterns.iter().any(|p| lower.contains(p.as_str()))
    }

    pub fn sanitize(&self, mut contact: ContactInfo) -> ContactInfo {
        if contact.email.as_deref().is_some_and(|e| !self.allows(e)) {
            contact.email = None;
        }
        contact
    }
}

/// Detail page text and markup captured while the detail view was open.
#[derive(Debug, Clone, Default)]
pub struct CapturedPage {
    pub text: String,
    pub html: String,
}

/// Everything a tier may look at for one card.
pub struct ExtractionContext<'a> {
    pub context: &'a dyn AutomationContext,
    pub card: &'a RawCard,
    pub selectors: &'a SelectorConfig,
    pub filter: &'a EmailFilter,
    pub open_detail_view: bool,
    pub detail_settle: Duration,
    pub nav_timeout: Duration,
    pub action_timeout: Duration,
    pub pause: &'a PauseSignal,
    captured: Mutex<Option<CapturedPage>>,
}

impl ExtractionContext<'_> {
    pub fn captured(&self) -> Option<CapturedPage> {
        self.captured.lock().ok().and_then(|guard| guard.clone())
    }

    fn capture(&self, page: CapturedPage) {
        if let Ok(mut guard) = self.captured.lock() {
            *guard = Some(page);
        }
    }
}

#[async_trait]
pub trait ContactStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    async fn extract(&self, cx: &ExtractionContext<'_>) -> HarvestResult<Option<ContactInfo>>;
}

fn strip_scheme(href: &str, scheme: &str) -> Option<String> {
    let href = href.trim();
    let head = href.get(..scheme.len())?;
    if !head.eq_ignore_ascii_case(scheme) {
        return None;
    }
    let value = href[scheme.len()..].split('?').next().unwrap_or_default().trim();
    (!value.is_empty()).then(|| value.to_string())
}

fn contact_from_fields(snapshot: &ElementSnapshot, filter: &EmailFilter) -> ContactInfo {
    let email = snapshot
        .field("agent_email_href")
        .and_then(|href| strip_scheme(href, "mailto:"))
        .or_else(|| {
            snapshot
                .field("agent_email")
                .and_then(|text| EMAIL_RE.find(text))
                .map(|m| m.as_str().to_string())
        })
        .filter(|e| filter.allows(e));
    let phone = snapshot
        .field("agent_phone_href")
        .and_then(|href| strip_scheme(href, "tel:"))
        .or_else(|| {
            snapshot
                .field("agent_phone")
                .and_then(|text| PHONE_RE.find(text))
                .map(|m| m.as_str().to_string())
        });
    ContactInfo {
        name: snapshot.field("agent_name").map(str::to_string),
        email,
        phone,
    }
}

/// Free-text scan: "Listed by / Agent: Name", first allowed email, first US phone.
pub fn scan_text(text: &str, filter: &EmailFilter) -> ContactInfo {
    ContactInfo {
        name: LISTED_BY_RE
            .captures(text)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string()),
        email: EMAIL_RE
            .find_iter(text)
            .map(|m| m.as_str())
            .find(|e| filter.allows(e))
            .map(str::to_string),
        phone: PHONE_RE.find(text).map(|m| m.as_str().trim().to_string()),
    }
}

/// Every `mailto:`/`tel:` link in the markup; first allowed one of each wins.
pub fn scan_links(html: &str, filter: &EmailFilter) -> ContactInfo {
    let document = Html::parse_document(html);
    let mut contact = ContactInfo::default();
    for link in document.select(&LINK_SELECTOR) {
        let Some(href) = link.value().attr("href") else {
            continue;
        };
        if contact.email.is_none() {
            contact.email = strip_scheme(href, "mailto:").filter(|e| filter.allows(e));
        }
        if contact.phone.is_none() {
            contact.phone = strip_scheme(href, "tel:");
        }
        if contact.email.is_some() && contact.phone.is_some() {
            break;
        }
    }
    contact
}

fn actionable(contact: ContactInfo) -> Option<ContactInfo> {
    (!contact.is_empty()).then_some(contact)
}

/// Tier 1: the card as it was read while mounted.
pub struct MountedCardStrategy;

#[async_trait]
impl ContactStrategy for MountedCardStrategy {
    fn name(&self) -> &'static str {
        "mounted_card"
    }

    async fn extract(&self, cx: &ExtractionContext<'_>) -> HarvestResult<Option<ContactInfo>> {
        Ok(actionable(cx.filter.sanitize(cx.card.contact.clone())))
    }
}

/// Tier 2: open the detail view and read the agent block from every plausible panel root.
pub struct DetailPanelStrategy;

impl DetailPanelStrategy {
    /// Click the card if it is still mounted, otherwise follow its detail link.
    async fn open(&self, cx: &ExtractionContext<'_>) -> HarvestResult<bool> {
        let card_selector = join(&cx.selectors.dashboard.card);
        let mounted = cx
            .context
            .snapshot_all(DomScope::Main, &card_selector, &cx.selectors.card.field_selectors())
            .await?;
        let key = cx.card.merge_key();
        let index = mounted
            .iter()
            .position(|s| card_from_snapshot(s).is_some_and(|c| c.merge_key() == key));
        if let Some(index) = index {
            if cx.context.click(&card_selector, index, cx.action_timeout).await? {
                return Ok(true);
            }
        }
        if let Some(url) = cx.card.detail_url.as_deref() {
            cx.context.goto(url, cx.nav_timeout).await?;
            return Ok(true);
        }
        Ok(false)
    }

    async fn read_panels(&self, cx: &ExtractionContext<'_>) -> HarvestResult<(Option<ContactInfo>, String)> {
        let roots = join(&cx.selectors.detail.panel_roots);
        let fields = cx.selectors.detail.field_selectors();
        let frames = cx.context.frame_count().await?;
        let scopes = std::iter::once(DomScope::Main).chain((0..frames).map(DomScope::Frame));

        let mut panel_text = String::new();
        let mut best: Option<ContactInfo> = None;
        for scope in scopes {
            let panels = cx.context.snapshot_all(scope, &roots, &fields).await?;
            for panel in &panels {
                panel_text.push_str(&panel.text);
                panel_text.push('\n');
                let contact = contact_from_fields(panel, cx.filter);
                if contact.is_actionable() {
                    debug!("Detail panel hit in {:?}", scope);
                    return Ok((Some(contact), panel_text));
                }
                if best.as_ref().is_none_or(|b| contact.richness() > b.richness()) {
                    best = Some(contact);
                }
            }
        }
        Ok((best.and_then(actionable), panel_text))
    }
}

#[async_trait]
impl ContactStrategy for DetailPanelStrategy {
    fn name(&self) -> &'static str {
        "detail_panel"
    }

    async fn extract(&self, cx: &ExtractionContext<'_>) -> HarvestResult<Option<ContactInfo>> {
        if !cx.open_detail_view {
            return Ok(None);
        }
        let before = cx.context.current_url().await?;
        if !self.open(cx).await? {
            return Ok(None);
        }
        if !cx.detail_settle.is_zero() {
            cx.pause.sleep(cx.detail_settle).await?;
        }

        let read = self.read_panels(cx).await;
        if let Ok((_, panel_text)) = &read {
            let text = match cx.context.page_text().await {
                Ok(page) => format!("{page}\n{panel_text}"),
                Err(_) => panel_text.clone(),
            };
            let html = cx.context.content().await.unwrap_or_default();
            cx.capture(CapturedPage { text, html });
        }

        if cx.context.current_url().await? != before {
            cx.context.go_back(cx.nav_timeout).await?;
        }
        read.map(|(contact, _)| contact)
    }
}

/// Tier 3: pattern scan of the captured detail page text.
pub struct PageTextStrategy;

#[async_trait]
impl ContactStrategy for PageTextStrategy {
    fn name(&self) -> &'static str {
        "page_text"
    }

    async fn extract(&self, cx: &ExtractionContext<'_>) -> HarvestResult<Option<ContactInfo>> {
        Ok(cx
            .captured()
            .and_then(|page| actionable(scan_text(&page.text, cx.filter))))
    }
}

/// Tier 4: mail/phone links anywhere in the captured detail page.
pub struct ContactLinkStrategy;

#[async_trait]
impl ContactStrategy for ContactLinkStrategy {
    fn name(&self) -> &'static str {
        "contact_links"
    }

    async fn extract(&self, cx: &ExtractionContext<'_>) -> HarvestResult<Option<ContactInfo>> {
        Ok(cx
            .captured()
            .and_then(|page| actionable(scan_links(&page.html, cx.filter))))
    }
}

/// Ordered tiers plus the settings they share.
pub struct ContactChain {
    strategies: Vec<Box<dyn ContactStrategy>>,
    selectors: SelectorConfig,
    filter: EmailFilter,
    open_detail_view: bool,
    detail_settle: Duration,
    nav_timeout: Duration,
    action_timeout: Duration,
}

impl ContactChain {
    pub fn standard(config: &AppConfig) -> Self {
        Self::with_strategies(
            config,
            vec![
                Box::new(MountedCardStrategy),
                Box::new(DetailPanelStrategy),
                Box::new(PageTextStrategy),
                Box::new(ContactLinkStrategy),
            ],
        )
    }

    pub fn with_strategies(config: &AppConfig, strategies: Vec<Box<dyn ContactStrategy>>) -> Self {
        Self {
            strategies,
            selectors: config.selectors.clone(),
            filter: EmailFilter::from_config(config),
            open_detail_view: config.extraction.open_detail_view,
            detail_settle: Duration::from_millis(config.extraction.detail_settle_ms),
            nav_timeout: config.dashboard.nav_timeout(),
            action_timeout: config.dashboard.action_timeout(),
        }
    }

    pub fn filter(&self) -> &EmailFilter {
        &self.filter
    }

    /// Run the tiers in order. The first actionable contact wins; a name found
    /// by an earlier tier fills a winner that lacks one. When nothing is
    /// actionable the best partial contact is returned.
    ///
    /// Detached contexts, pauses and fatal errors propagate; any other tier
    /// failure is logged and the next tier runs.
    pub async fn extract(
        &self,
        context: &dyn AutomationContext,
        card: &RawCard,
        pause: &PauseSignal,
    ) -> HarvestResult<ContactInfo> {
        let cx = ExtractionContext {
            context,
            card,
            selectors: &self.selectors,
            filter: &self.filter,
            open_detail_view: self.open_detail_view,
            detail_settle: self.detail_settle,
            nav_timeout: self.nav_timeout,
            action_timeout: self.action_timeout,
            pause,
            captured: Mutex::new(None),
        };

        let mut partial = self.filter.sanitize(card.contact.clone());
        for strategy in &self.strategies {
            match strategy.extract(&cx).await {
                Ok(Some(mut contact)) => {
                    contact = self.filter.sanitize(contact);
                    if contact.is_actionable() {
                        if contact.name.is_none() {
                            contact.name = partial.name.take();
                        }
                        debug!("📇 Contact for {} via {}", card.full_address(), strategy.name());
                        return Ok(contact);
                    }
                    if partial.name.is_none() {
                        partial.name = contact.name;
                    }
                }
                Ok(None) => {}
                Err(e @ (HarvestError::DetachedContext { .. } | HarvestError::Paused)) => {
                    return Err(e);
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => warn!(
                    "⚠️ Contact tier {} failed for {}: {}",
                    strategy.name(),
                    card.full_address(),
                    e
                ),
            }
        }
        Ok(partial)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{FakeHarness, SiteState, listing};

    fn filter() -> EmailFilter {
        EmailFilter::new(["noreply", "support@", "ops@harvest.test"])
    }

    #[test]
    fn test_scan_text_skips_system_addresses() {
        let text = "Questions? support@platform.com\nListed by Dana Smith, Acme Realty\n\
                    dana@acme-realty.com | (404) 555-0188";
        let contact = scan_text(text, &filter());
        assert_eq!(contact.name.as_deref(), Some("Dana Smith"));
        assert_eq!(contact.email.as_deref(), Some("dana@acme-realty.com"));
        assert_eq!(contact.phone.as_deref(), Some("(404) 555-0188"));
    }

    #[test]
    fn test_scan_links_reads_mailto_and_tel() {
        let html = r#"<html><body>
            <a href="mailto:noreply@platform.com">Help</a>
            <a href="MAILTO:lee@broker.com?subject=Listing">Email</a>
            <a href="tel:+14045550100">Call</a>
        </body></html>"#;
        let contact = scan_links(html, &filter());
        assert_eq!(contact.email.as_deref(), Some("lee@broker.com"));
        assert_eq!(contact.phone.as_deref(), Some("+14045550100"));
    }

    #[test]
    fn test_operator_address_is_excluded() {
        let mut config = AppConfig::default();
        config.dashboard.username = "Ops@Harvest.test".into();
        let filter = EmailFilter::from_config(&config);
        assert!(!filter.allows("ops@harvest.test"));
        assert!(filter.allows("agent@realty.com"));
    }

    #[tokio::test]
    async fn test_mounted_card_wins_without_opening_detail() {
        let harness = FakeHarness::new(SiteState::with_listings(1)).await;
        let context = harness.session().ensure_context().await.unwrap();
        let mut card = listing(0).card;
        card.contact.email = Some("agent0@realty.test".into());

        let chain = ContactChain::standard(&harness.config);
        let contact = chain.extract(context.as_ref(), &card, &PauseSignal::default()).await.unwrap();
        assert_eq!(contact.email.as_deref(), Some("agent0@realty.test"));
        assert_eq!(harness.site.state().detail_opens, 0);
    }

    #[tokio::test]
    async fn test_detail_panel_in_frame_fills_contact() {
        let mut site = SiteState::with_listings(1);
        site.listings[0].detail_in_frame = true;
        let harness = FakeHarness::new(site).await;
        let context = harness.session().ensure_context().await.unwrap();
        let mut card = listing(0).card;
        card.contact = ContactInfo {
            name: Some("Agent Zero".into()),
            ..ContactInfo::default()
        };

        let chain = ContactChain::standard(&harness.config);
        let contact = chain.extract(context.as_ref(), &card, &PauseSignal::default()).await.unwrap();
        assert_eq!(contact.email, listing(0).detail_contact.email);
        assert_eq!(contact.name.as_deref(), Some("Agent Zero"));
        assert_eq!(harness.site.state().detail_opens, 1);
    }

    #[tokio::test]
    async fn test_falls_through_to_page_text() {
        let mut site = SiteState::with_listings(1);
        site.listings[0].detail_contact = ContactInfo::default();
        site.listings[0].detail_text = Some("Listed by Rae Park\nrae.park@homes.test".into());
        let harness = FakeHarness::new(site).await;
        let context = harness.session().ensure_context().await.unwrap();
        let mut card = listing(0).card;
        card.contact = ContactInfo::default();

        let chain = ContactChain::standard(&harness.config);
        let contact = chain.extract(context.as_ref(), &card, &PauseSignal::default()).await.unwrap();
        assert_eq!(contact.email.as_deref(), Some("rae.park@homes.test"));
        assert_eq!(contact.name.as_deref(), Some("Rae Park"));
    }

    #[tokio::test]
    async fn test_detail_settle_wakes_on_pause() {
        let mut harness = FakeHarness::new(SiteState::with_listings(1)).await;
        harness.config.extraction.detail_settle_ms = 60_000;
        let context = harness.session().ensure_context().await.unwrap();
        let mut card = listing(0).card;
        card.contact = ContactInfo::default();
        let pause = PauseSignal::default();
        pause.pause();

        let chain = ContactChain::standard(&harness.config);
        let result = tokio::time::timeout(
            Duration::from_secs(5),
            chain.extract(context.as_ref(), &card, &pause),
        )
        .await
        .expect("settle wait is cut short");
        assert!(matches!(result, Err(HarvestError::Paused)));
    }
}

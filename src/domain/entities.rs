//! Domain entities
//!
//! Contains the core harvesting entities and their invariants.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::address::{canonical_key, ParsedAddress};

/// One schedulable unit of crawl: partition × sub-area × filter variant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkItem {
    pub partition_code: String,
    pub sub_area_name: String,
    pub filter_variant: String,
}

impl std::fmt::Display for WorkItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{} [{}]",
            self.partition_code, self.sub_area_name, self.filter_variant
        )
    }
}

/// Durable, resumable progress record for one source.
///
/// Within a cycle a partition listed in `completed_partitions` is never
/// revisited, and `current_sub_area_index` only moves forward until
/// [`CrawlProgress::begin_partition`] switches partitions or the document is reset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlProgress {
    pub source_name: String,
    pub current_partition: Option<String>,
    pub current_sub_area_index: usize,
    pub completed_partitions: Vec<String>,
    pub filter_cycle_index: usize,
    pub total_harvested: u64,
    pub cycle_count: u64,
    pub updated_at: DateTime<Utc>,
}

impl CrawlProgress {
    /// Fresh progress document for a source that has never run.
    pub fn new(source_name: &str) -> Self {
        Self {
            source_name: source_name.to_string(),
            current_partition: None,
            current_sub_area_index: 0,
            completed_partitions: Vec::new(),
            filter_cycle_index: 0,
            total_harvested: 0,
            cycle_count: 0,
            updated_at: Utc::now(),
        }
    }

    pub fn is_partition_complete(&self, partition_code: &str) -> bool {
        self.completed_partitions
            .iter()
            .any(|p| p.eq_ignore_ascii_case(partition_code))
    }

    /// Switch to `partition_code`. Re-entering the current partition keeps the
    /// sub-area cursor where it was.
    pub fn begin_partition(&mut self, partition_code: &str) {
        let same = self
            .current_partition
            .as_deref()
            .is_some_and(|p| p.eq_ignore_ascii_case(partition_code));
        if !same {
            self.current_partition = Some(partition_code.to_uppercase());
            self.current_sub_area_index = 0;
        }
        self.touch();
    }

    pub fn mark_sub_area_complete(&mut self) {
        self.current_sub_area_index += 1;
        self.touch();
    }

    pub fn mark_partition_complete(&mut self, partition_code: &str) {
        if !self.is_partition_complete(partition_code) {
            self.completed_partitions.push(partition_code.to_uppercase());
        }
        let is_current = self
            .current_partition
            .as_deref()
            .is_some_and(|p| p.eq_ignore_ascii_case(partition_code));
        if is_current {
            self.current_partition = None;
            self.current_sub_area_index = 0;
        }
        self.touch();
    }

    pub fn record_harvested(&mut self, count: u64) {
        self.total_harvested += count;
        self.touch();
    }

    /// Close out a full cycle and rotate to the next filter variant.
    pub fn complete_cycle(&mut self) {
        self.cycle_count += 1;
        self.completed_partitions.clear();
        self.current_partition = None;
        self.current_sub_area_index = 0;
        self.filter_cycle_index += 1;
        self.touch();
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// A browser cookie as persisted between sessions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    #[serde(default = "default_cookie_path")]
    pub path: String,
    #[serde(default)]
    pub expires: Option<f64>,
    #[serde(default)]
    pub http_only: bool,
    #[serde(default)]
    pub secure: bool,
}

fn default_cookie_path() -> String {
    "/".to_string()
}

/// Cookies captured after a successful login.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCredential {
    pub cookies: Vec<Cookie>,
    pub saved_at: DateTime<Utc>,
}

impl SessionCredential {
    pub fn new(cookies: Vec<Cookie>) -> Self {
        Self {
            cookies,
            saved_at: Utc::now(),
        }
    }

    pub fn is_fresh(&self, ttl: Duration) -> bool {
        self.is_fresh_at(Utc::now(), ttl)
    }

    pub fn is_fresh_at(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        match chrono::Duration::from_std(ttl) {
            Ok(ttl) => now.signed_duration_since(self.saved_at) < ttl,
            Err(_) => true,
        }
    }
}

/// Proxy endpoint handed out by the provisioning service.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyDescriptor {
    pub endpoint: String,
    #[serde(default)]
    pub auth_credentials: Option<ProxyAuth>,
    #[serde(default)]
    pub stickiness_key: String,
}

impl std::fmt::Debug for ProxyDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyDescriptor")
            .field("endpoint", &self.endpoint)
            .field("has_auth", &self.auth_credentials.is_some())
            .field("stickiness_key", &self.stickiness_key)
            .finish()
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyAuth {
    pub username: String,
    pub password: String,
}

/// Agent contact details attached to a listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactInfo {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
}

impl ContactInfo {
    /// A contact is usable for outreach once it has an email or a phone.
    pub fn is_actionable(&self) -> bool {
        self.email.is_some() || self.phone.is_some()
    }

    pub fn richness(&self) -> usize {
        [&self.name, &self.email, &self.phone]
            .iter()
            .filter(|f| f.is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.richness() == 0
    }

    /// Combine two sightings of the same contact block. The richer block wins
    /// the fields both sides know (ties go to `newer`); a field only one side
    /// knows is always kept.
    pub fn merged_with(self, newer: ContactInfo) -> ContactInfo {
        let (mut base, rest) = if newer.richness() >= self.richness() {
            (newer, self)
        } else {
            (self, newer)
        };
        if base.name.is_none() {
            base.name = rest.name;
        }
        if base.email.is_none() {
            base.email = rest.email;
        }
        if base.phone.is_none() {
            base.phone = rest.phone;
        }
        base
    }
}

/// Per-card scrape result, captured while the card is still mounted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawCard {
    pub address_lines: Vec<String>,
    pub price_text: Option<String>,
    pub stats_text: Vec<String>,
    pub contact: ContactInfo,
    pub detail_url: Option<String>,
}

impl RawCard {
    pub fn full_address(&self) -> String {
        self.address_lines
            .iter()
            .map(|l| l.trim())
            .filter(|l| !l.is_empty())
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Case-insensitive key used to merge repeated sightings of a card.
    pub fn merge_key(&self) -> String {
        canonical_key(&self.full_address())
    }

    /// Fill fields this card is missing from a later sighting of the same listing.
    pub fn absorb(&mut self, other: RawCard) {
        if self.price_text.is_none() {
            self.price_text = other.price_text;
        }
        if self.stats_text.is_empty() {
            self.stats_text = other.stats_text;
        }
        if self.detail_url.is_none() {
            self.detail_url = other.detail_url;
        }
        // Ties keep the first sighting's values.
        let first = std::mem::take(&mut self.contact);
        self.contact = other.contact.merged_with(first);
    }
}

/// Canonical persisted listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyRecord {
    pub canonical_key: String,
    pub street_address: String,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip: Option<String>,
    pub list_price: Option<i64>,
    pub beds: Option<f64>,
    pub baths: Option<f64>,
    pub sqft: Option<i64>,
    pub agent_name: Option<String>,
    pub agent_email: Option<String>,
    pub agent_phone: Option<String>,
    pub source: String,
    pub scraped_at: DateTime<Utc>,
    // Filled later by the valuation lookup; the harvester only ever writes nulls.
    pub estimated_value: Option<i64>,
    pub value_source: Option<String>,
    pub value_updated_at: Option<DateTime<Utc>>,
}

impl PropertyRecord {
    pub fn from_address(address: &ParsedAddress, full_address: &str, source: &str) -> Self {
        Self {
            canonical_key: canonical_key(full_address),
            street_address: address.street.clone(),
            city: address.city.clone(),
            state: address.state.clone(),
            zip: address.zip.clone(),
            list_price: None,
            beds: None,
            baths: None,
            sqft: None,
            agent_name: None,
            agent_email: None,
            agent_phone: None,
            source: source.to_string(),
            scraped_at: Utc::now(),
            estimated_value: None,
            value_source: None,
            value_updated_at: None,
        }
    }

    pub fn contact(&self) -> ContactInfo {
        ContactInfo {
            name: self.agent_name.clone(),
            email: self.agent_email.clone(),
            phone: self.agent_phone.clone(),
        }
    }

    pub fn set_contact(&mut self, contact: ContactInfo) {
        self.agent_name = contact.name;
        self.agent_email = contact.email;
        self.agent_phone = contact.phone;
    }

    /// Merge a new sighting into this stored record without losing data.
    ///
    /// Listing fields take the newest non-null value. Contact fields merge one
    /// by one through [`ContactInfo::merged_with`], so a sparser sighting only
    /// ever fills gaps.
    pub fn merge_from(&mut self, newer: &PropertyRecord) {
        fn coalesce<T: Clone>(old: &mut Option<T>, new: &Option<T>) {
            if new.is_some() {
                old.clone_from(new);
            }
        }

        if !newer.street_address.trim().is_empty() {
            self.street_address.clone_from(&newer.street_address);
        }
        coalesce(&mut self.city, &newer.city);
        coalesce(&mut self.state, &newer.state);
        coalesce(&mut self.zip, &newer.zip);
        coalesce(&mut self.list_price, &newer.list_price);
        coalesce(&mut self.beds, &newer.beds);
        coalesce(&mut self.baths, &newer.baths);
        coalesce(&mut self.sqft, &newer.sqft);

        let merged = self.contact().merged_with(newer.contact());
        self.set_contact(merged);

        self.source.clone_from(&newer.source);
        self.scraped_at = newer.scraped_at;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(key: &str, email: Option<&str>) -> PropertyRecord {
        let address = ParsedAddress {
            street: "1 Elm St".to_string(),
            city: Some("X".to_string()),
            state: Some("Y".to_string()),
            zip: None,
        };
        let mut r = PropertyRecord::from_address(&address, key, "dashboard");
        r.agent_email = email.map(str::to_string);
        r
    }

    #[test]
    fn test_progress_partition_lifecycle() {
        let mut progress = CrawlProgress::new("dashboard");
        progress.begin_partition("ga");
        assert_eq!(progress.current_partition.as_deref(), Some("GA"));

        progress.mark_sub_area_complete();
        progress.mark_sub_area_complete();
        progress.begin_partition("GA");
        assert_eq!(progress.current_sub_area_index, 2, "re-entering keeps cursor");

        progress.mark_partition_complete("GA");
        assert!(progress.is_partition_complete("ga"));
        assert_eq!(progress.current_partition, None);
        assert_eq!(progress.current_sub_area_index, 0);

        progress.mark_partition_complete("GA");
        assert_eq!(progress.completed_partitions.len(), 1);
    }

    #[test]
    fn test_complete_cycle_rotates_filter() {
        let mut progress = CrawlProgress::new("dashboard");
        progress.mark_partition_complete("AL");
        progress.complete_cycle();
        assert_eq!(progress.cycle_count, 1);
        assert_eq!(progress.filter_cycle_index, 1);
        assert!(progress.completed_partitions.is_empty());
    }

    #[test]
    fn test_credential_freshness() {
        let credential = SessionCredential::new(Vec::new());
        let ttl = Duration::from_secs(24 * 3600);
        assert!(credential.is_fresh(ttl));

        let later = credential.saved_at + chrono::Duration::hours(25);
        assert!(!credential.is_fresh_at(later, ttl));
    }

    #[test]
    fn test_merge_keeps_richest_contact() {
        let mut stored = record("1 elm st, x, y", None);
        stored.merge_from(&record("1 elm st, x, y", Some("a@b.com")));
        assert_eq!(stored.agent_email.as_deref(), Some("a@b.com"));

        // A sparser sighting never erases what we already have.
        let mut sparse = record("1 elm st, x, y", None);
        sparse.list_price = Some(300_000);
        stored.merge_from(&sparse);
        assert_eq!(stored.agent_email.as_deref(), Some("a@b.com"));
        assert_eq!(stored.list_price, Some(300_000));
    }

    #[test]
    fn test_raw_card_absorb_prefers_richer_contact() {
        let mut first = RawCard {
            address_lines: vec!["123 Main St".into(), "Springfield, IL".into()],
            ..Default::default()
        };
        let second = RawCard {
            address_lines: vec!["123 MAIN ST".into(), "SPRINGFIELD, IL".into()],
            price_text: Some("$100,000".into()),
            contact: ContactInfo {
                name: Some("Pat Agent".into()),
                email: Some("pat@realty.com".into()),
                phone: None,
            },
            ..Default::default()
        };
        assert_eq!(first.merge_key(), second.merge_key());
        first.absorb(second);
        assert_eq!(first.price_text.as_deref(), Some("$100,000"));
        assert_eq!(first.contact.email.as_deref(), Some("pat@realty.com"));
    }

    #[test]
    fn test_contact_merge_never_drops_a_known_field() {
        let email_only = ContactInfo {
            email: Some("a@b.com".into()),
            ..Default::default()
        };
        let name_only = ContactInfo {
            name: Some("Jo".into()),
            ..Default::default()
        };
        let merged = email_only.merged_with(name_only);
        assert_eq!(merged.name.as_deref(), Some("Jo"));
        assert_eq!(merged.email.as_deref(), Some("a@b.com"));

        let mut stored = record("1 elm st, x, y", Some("a@b.com"));
        stored.agent_name = Some("Jo".into());
        let mut later = record("1 elm st, x, y", None);
        later.agent_name = Some("Jo".into());
        later.agent_phone = Some("(404) 555-0100".into());
        stored.merge_from(&later);
        assert_eq!(stored.agent_email.as_deref(), Some("a@b.com"));
        assert_eq!(stored.agent_phone.as_deref(), Some("(404) 555-0100"));
    }
}

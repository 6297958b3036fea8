//! Card parser
//!
//! Turns a mounted card snapshot into a [`RawCard`] and a [`RawCard`] into a
//! [`PropertyRecord`]. Price and quick stats are free text on the dashboard
//! ("$1.2M", "3 bds | 2.5 ba | 1,850 sqft"), so everything here is regex based.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::domain::{ContactInfo, PropertyRecord, RawCard, parse_address};
use crate::infrastructure::browser::ElementSnapshot;

static PRICE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\$\s*([\d,]+(?:\.\d+)?)\s*([KMB])?\b").expect("valid price regex")
});
static BEDS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(\d+(?:\.\d+)?)\s*(?:bds?|beds?|bedrooms?|br)\b").expect("valid beds regex")
});
static BATHS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(\d+(?:\.\d+)?)\s*(?:ba|baths?|bathrooms?)\b").expect("valid baths regex")
});
static SQFT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)([\d,]+)\s*(?:sq\.?\s*ft\.?|sqft|square\s+feet)").expect("valid sqft regex")
});
static STREET_START_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d+[A-Za-z]?\s+\S").expect("valid street regex"));
static CITY_STATE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r",\s*[A-Za-z]{2}(?:\s+\d{5}(?:-\d{4})?)?\s*$").expect("valid city/state regex")
});

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct QuickStats {
    pub beds: Option<f64>,
    pub baths: Option<f64>,
    pub sqft: Option<i64>,
}

/// `"$1,250,000"` → 1250000, `"$1.2M"` → 1200000, `"$450K"` → 450000.
pub fn parse_price(text: &str) -> Option<i64> {
    let caps = PRICE_RE.captures(text)?;
    let number: f64 = caps.get(1)?.as_str().replace(',', "").parse().ok()?;
    let multiplier = match caps.get(2).map(|m| m.as_str().to_ascii_uppercase()) {
        Some(ref s) if s == "K" => 1_000.0,
        Some(ref s) if s == "M" => 1_000_000.0,
        Some(ref s) if s == "B" => 1_000_000_000.0,
        _ => 1.0,
    };
    Some((number * multiplier).round() as i64)
}

pub fn parse_quick_stats<S: AsRef<str>>(texts: &[S]) -> QuickStats {
    let joined = texts
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join(" | ");
    let number = |re: &Regex| {
        re.captures(&joined)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().replace(',', ""))
    };
    QuickStats {
        beds: number(&BEDS_RE).and_then(|s| s.parse().ok()),
        baths: number(&BATHS_RE).and_then(|s| s.parse().ok()),
        sqft: number(&SQFT_RE).and_then(|s| s.parse().ok()),
    }
}

fn strip_scheme(value: &str, scheme: &str) -> String {
    let value = value.trim();
    let stripped = value
        .get(..scheme.len())
        .filter(|prefix| prefix.eq_ignore_ascii_case(scheme))
        .map_or(value, |_| &value[scheme.len()..]);
    stripped.split('?').next().unwrap_or(stripped).trim().to_string()
}

/// Address lines recovered from the card's full text when the field selectors miss.
fn address_from_text(text: &str) -> Vec<String> {
    let lines: Vec<&str> = text.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    for (i, line) in lines.iter().enumerate() {
        if STREET_START_RE.is_match(line) && !line.starts_with('$') {
            if CITY_STATE_RE.is_match(line) {
                return vec![(*line).to_string()];
            }
            if let Some(next) = lines.get(i + 1).filter(|next| CITY_STATE_RE.is_match(next)) {
                return vec![(*line).to_string(), (*next).to_string()];
            }
        }
    }
    Vec::new()
}

/// Build a raw card from one snapshot; `None` when no address can be found.
pub fn card_from_snapshot(snapshot: &ElementSnapshot) -> Option<RawCard> {
    let mut address_lines: Vec<String> = ["address_line1", "address_line2"]
        .iter()
        .filter_map(|name| snapshot.field(name))
        .map(str::to_string)
        .collect();
    if address_lines.is_empty() {
        address_lines = address_from_text(&snapshot.text);
    }
    if address_lines.is_empty() {
        return None;
    }

    let price_text = snapshot
        .field("price")
        .map(str::to_string)
        .or_else(|| PRICE_RE.find(&snapshot.text).map(|m| m.as_str().to_string()));
    let stats_text = match snapshot.field("stats") {
        Some(stats) => vec![stats.to_string()],
        None => snapshot
            .text
            .lines()
            .map(str::trim)
            .filter(|l| BEDS_RE.is_match(l) || BATHS_RE.is_match(l) || SQFT_RE.is_match(l))
            .map(str::to_string)
            .collect(),
    };

    let email = snapshot
        .field("agent_email_href")
        .map(|href| strip_scheme(href, "mailto:"))
        .or_else(|| snapshot.field("agent_email").map(str::to_string))
        .filter(|e| e.contains('@'));
    let phone = snapshot
        .field("agent_phone_href")
        .map(|href| strip_scheme(href, "tel:"))
        .or_else(|| snapshot.field("agent_phone").map(str::to_string))
        .filter(|p| p.chars().filter(char::is_ascii_digit).count() >= 10);

    Some(RawCard {
        address_lines,
        price_text,
        stats_text,
        contact: ContactInfo {
            name: snapshot.field("agent_name").map(str::to_string),
            email,
            phone,
        },
        detail_url: snapshot.field("detail_url").map(str::to_string),
    })
}

/// Parse a raw card into a record; `None` when the address is unusable.
pub fn record_from_card(card: &RawCard, source: &str) -> Option<PropertyRecord> {
    let full_address = card.full_address();
    let address = parse_address(&full_address)?;
    let mut record = PropertyRecord::from_address(&address, &full_address, source);
    record.list_price = card.price_text.as_deref().and_then(parse_price);
    let stats = parse_quick_stats(&card.stats_text);
    record.beds = stats.beds;
    record.baths = stats.baths;
    record.sqft = stats.sqft;
    record.set_contact(card.contact.clone());
    Some(record)
}

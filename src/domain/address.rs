//! Address canonicalization
//!
//! The canonical key is the dedup/upsert key for every listing, so both the
//! dashboard and the API paths must derive it through [`canonical_key`].

use serde::{Deserialize, Serialize};

/// Lowercased, trimmed full address with runs of whitespace collapsed.
pub fn canonical_key(full_address: &str) -> String {
    full_address
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedAddress {
    pub street: String,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip: Option<String>,
}

fn is_zip(token: &str) -> bool {
    let (five, plus_four) = match token.split_once('-') {
        Some((a, b)) => (a, Some(b)),
        None => (token, None),
    };
    five.len() == 5
        && five.chars().all(|c| c.is_ascii_digit())
        && plus_four.is_none_or(|p| p.len() == 4 && p.chars().all(|c| c.is_ascii_digit()))
}

fn is_state_token(token: &str) -> bool {
    token.len() == 2 && token.chars().all(|c| c.is_ascii_alphabetic())
}

/// Split a one- or multi-line US address into street / city / state / zip.
///
/// Accepts `"123 Main St, Springfield, IL 62701"`, `"123 Main St, Springfield IL"`
/// and the two-line card form `["123 Main St", "Springfield, IL 62701"]`.
pub fn parse_address(full_address: &str) -> Option<ParsedAddress> {
    let parts: Vec<&str> = full_address
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();
    let street = (*parts.first()?).to_string();
    if parts.len() == 1 {
        return Some(ParsedAddress {
            street,
            city: None,
            state: None,
            zip: None,
        });
    }

    let mut tail: Vec<&str> = parts[parts.len() - 1].split_whitespace().collect();
    let zip = match tail.last() {
        Some(token) if is_zip(token) => tail.pop().map(str::to_string),
        _ => None,
    };
    let state = match tail.last() {
        Some(token) if is_state_token(token) => tail.pop().map(str::to_uppercase),
        _ => None,
    };

    let city = if !tail.is_empty() {
        Some(tail.join(" "))
    } else if parts.len() >= 3 {
        Some(parts[parts.len() - 2].to_string())
    } else {
        None
    };

    Some(ParsedAddress {
        street,
        city,
        state,
        zip,
    })
}

/// Trailing two-letter state token of an address, uppercased.
pub fn trailing_state_token(full_address: &str) -> Option<String> {
    parse_address(full_address).and_then(|a| a.state)
}

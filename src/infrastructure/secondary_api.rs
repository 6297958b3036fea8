//! Secondary listing API
//!
//! The JSON/GIS query API answers with a non-standard envelope: the body is
//! prefixed with `{}&&`, and the actual data sits under `payload` next to a
//! numeric `resultCode`. Row fields come either raw or wrapped as
//! `{ "value": ... }`.
//!
//! The GIS endpoint occasionally returns homes from an unrelated region, so
//! every result set is filtered down to the requested partition.

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::{ContactInfo, PropertyRecord, parse_address};
use crate::infrastructure::config::{ProxyMode, SecondaryApiConfig, defaults};
use crate::infrastructure::harvest_error::{HarvestError, HarvestResult};
use crate::infrastructure::http_client::{HttpClient, HttpClientConfig};
use crate::infrastructure::retry_policy::{RetryDecision, RetryPolicy};

const ENVELOPE_PREFIX: &str = "{}&&";

/// A region as the API identifies it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionRef {
    pub region_id: String,
    pub region_type: String,
}

/// Region granularity requested from the autocomplete endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionGranularity {
    State,
    City,
}

#[derive(Debug, Clone)]
pub struct ListingQuery {
    pub region_id: String,
    pub region_type: String,
    pub limit: u32,
    /// Partition code rows must belong to
    pub filter_partition: String,
}

/// Strip the `{}&&` prefix and return `payload` after checking `resultCode`.
pub fn unwrap_envelope(body: &str) -> HarvestResult<Value> {
    let trimmed = body.trim_start();
    let json = trimmed.strip_prefix(ENVELOPE_PREFIX).unwrap_or(trimmed);
    let mut document: Value = serde_json::from_str(json)?;

    if let Some(code) = document.get("resultCode").and_then(Value::as_i64) {
        if code != 0 {
            let message = document
                .get("errorMessage")
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            return Err(HarvestError::DataIntegrity {
                reason: format!("API resultCode {code}: {message}"),
            });
        }
    }

    match document.get_mut("payload") {
        Some(payload) => Ok(payload.take()),
        None => Err(HarvestError::parse("API response has no payload")),
    }
}

/// Unwrap `{ "value": x }` to `x`; anything else is returned as is.
fn flex(value: &Value) -> &Value {
    match value {
        Value::Object(map) if map.contains_key("value") => &map["value"],
        other => other,
    }
}

fn flex_str(row: &Value, key: &str) -> Option<String> {
    match flex(row.get(key)?) {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn flex_f64(row: &Value, key: &str) -> Option<f64> {
    match flex(row.get(key)?) {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.replace([',', '$'], "").trim().parse().ok(),
        _ => None,
    }
}

/// Pick the autocomplete row of the requested type. Row ids look like `"4_11"`
/// (type, id); the explicit `type` field wins when present.
pub fn parse_region(body: &str, region_type: &str) -> HarvestResult<Option<RegionRef>> {
    let payload = unwrap_envelope(body)?;

    let mut rows: Vec<&Value> = Vec::new();
    if let Some(exact) = payload.get("exactMatch") {
        rows.push(exact);
    }
    if let Some(sections) = payload.get("sections").and_then(Value::as_array) {
        for section in sections {
            if let Some(section_rows) = section.get("rows").and_then(Value::as_array) {
                rows.extend(section_rows);
            }
        }
    }

    for row in rows {
        let Some(raw_id) = flex_str(row, "id") else {
            continue;
        };
        let (id_type, id) = match raw_id.split_once('_') {
            Some((t, id)) => (Some(t.to_string()), id.to_string()),
            None => (None, raw_id.clone()),
        };
        let row_type = flex_str(row, "type").or(id_type);
        if row_type.as_deref() == Some(region_type) {
            return Ok(Some(RegionRef {
                region_id: id,
                region_type: region_type.to_string(),
            }));
        }
    }
    Ok(None)
}

fn record_from_row(row: &Value) -> Option<PropertyRecord> {
    let street = flex_str(row, "streetLine").or_else(|| flex_str(row, "address"))?;
    let city = flex_str(row, "city");
    let state = flex_str(row, "state");
    let zip = flex_str(row, "zip").or_else(|| flex_str(row, "postalCode"));

    let mut full = street;
    if let Some(city) = &city {
        full.push_str(", ");
        full.push_str(city);
    }
    if let Some(state) = &state {
        full.push_str(", ");
        full.push_str(state);
        if let Some(zip) = &zip {
            full.push(' ');
            full.push_str(zip);
        }
    }

    let address = parse_address(&full)?;
    let mut record = PropertyRecord::from_address(&address, &full, defaults::SECONDARY_API_SOURCE);
    record.list_price = flex_f64(row, "price").map(|p| p.round() as i64);
    record.beds = flex_f64(row, "beds");
    record.baths = flex_f64(row, "baths");
    record.sqft = flex_f64(row, "sqFt")
        .or_else(|| flex_f64(row, "sqft"))
        .map(|s| s.round() as i64);

    if let Some(agent) = row.get("listingAgent") {
        record.set_contact(ContactInfo {
            name: flex_str(agent, "name"),
            email: flex_str(agent, "email"),
            phone: flex_str(agent, "phone"),
        });
    }
    Some(record)
}

/// Parse GIS `payload.homes` and keep only rows in `filter_partition`.
///
/// When every row belongs to another region the whole set is dropped with a
/// warning; stale wrong-region data is never returned.
pub fn parse_listings(body: &str, filter_partition: &str) -> HarvestResult<Vec<PropertyRecord>> {
    let payload = unwrap_envelope(body)?;
    let homes = payload
        .get("homes")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let parsed: Vec<PropertyRecord> = homes.iter().filter_map(record_from_row).collect();
    let unparseable = homes.len() - parsed.len();
    let total = parsed.len();
    let kept: Vec<PropertyRecord> = parsed
        .into_iter()
        .filter(|r| {
            r.state
                .as_deref()
                .is_some_and(|s| s.eq_ignore_ascii_case(filter_partition))
        })
        .collect();

    if unparseable > 0 {
        debug!("Skipped {} unparseable API rows", unparseable);
    }
    if total > 0 && kept.is_empty() {
        warn!(
            "⚠️ All {} API rows were outside {}; discarding result set",
            total, filter_partition
        );
    } else if kept.len() < total {
        warn!(
            "⚠️ Dropped {} of {} API rows outside {}",
            total - kept.len(),
            total,
            filter_partition
        );
    }
    Ok(kept)
}

/// Region lookup and listing fetch against the secondary API.
pub struct SecondaryApiClient {
    http: HttpClient,
    config: SecondaryApiConfig,
    retry: RetryPolicy,
}

impl SecondaryApiClient {
    pub fn new(config: SecondaryApiConfig, retry: RetryPolicy) -> HarvestResult<Self> {
        if config.base_url.is_empty() {
            return Err(HarvestError::config("secondary_api.base_url is not set"));
        }
        Ok(Self {
            http: HttpClient::new(HttpClientConfig::from(&config))?,
            config,
            retry,
        })
    }

    pub fn config(&self) -> &SecondaryApiConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// GET with the shared retry policy; 429/5xx/network failures back off.
    async fn get_with_retry(
        &self,
        url: &str,
        query: &[(&str, String)],
        cancel: &CancellationToken,
    ) -> HarvestResult<String> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.http.get_text_with_cancellation(url, query, cancel).await {
                Ok(body) => return Ok(body),
                Err(e) => match self.retry.decide(&e, attempt, ProxyMode::Off) {
                    RetryDecision::RetryAfter(delay) => {
                        warn!("🔄 {} failed ({}), retry {} in {:?}", url, e, attempt, delay);
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => {}
                            _ = cancel.cancelled() => return Err(HarvestError::Paused),
                        }
                    }
                    _ => return Err(e),
                },
            }
        }
    }

    async fn resolve(
        &self,
        query_text: &str,
        granularity: RegionGranularity,
        cancel: &CancellationToken,
    ) -> HarvestResult<Option<RegionRef>> {
        let region_type = match granularity {
            RegionGranularity::State => &self.config.state_region_type,
            RegionGranularity::City => &self.config.city_region_type,
        };
        let body = self
            .get_with_retry(
                &self.url(&self.config.autocomplete_path),
                &[("location", query_text.to_string()), ("v", "2".to_string())],
                cancel,
            )
            .await?;
        parse_region(&body, region_type)
    }

    /// State-level region for a partition.
    pub async fn resolve_region(
        &self,
        partition_code: &str,
        partition_name: &str,
        cancel: &CancellationToken,
    ) -> HarvestResult<RegionRef> {
        let region = self
            .resolve(partition_name, RegionGranularity::State, cancel)
            .await?
            .ok_or_else(|| HarvestError::DataIntegrity {
                reason: format!("no state region for {partition_code} ({partition_name})"),
            })?;
        info!(
            "📌 {} resolved to region {} (type {})",
            partition_code, region.region_id, region.region_type
        );
        Ok(region)
    }

    /// City-level region inside a partition.
    pub async fn resolve_city(
        &self,
        city: &str,
        partition_code: &str,
        cancel: &CancellationToken,
    ) -> HarvestResult<Option<RegionRef>> {
        self.resolve(&format!("{city}, {partition_code}"), RegionGranularity::City, cancel)
            .await
    }

    pub async fn fetch_listings(
        &self,
        query: &ListingQuery,
        cancel: &CancellationToken,
    ) -> HarvestResult<Vec<PropertyRecord>> {
        let body = self
            .get_with_retry(
                &self.url(&self.config.gis_path),
                &[
                    ("al", "1".to_string()),
                    ("region_id", query.region_id.clone()),
                    ("region_type", query.region_type.clone()),
                    ("num_homes", query.limit.to_string()),
                    ("status", "9".to_string()),
                    ("v", "8".to_string()),
                ],
                cancel,
            )
            .await?;
        let records = parse_listings(&body, &query.filter_partition)?;
        info!(
            "✅ API region {} returned {} rows for {}",
            query.region_id,
            records.len(),
            query.filter_partition
        );
        Ok(records)
    }
}

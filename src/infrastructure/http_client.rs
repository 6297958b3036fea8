//! HTTP client for the public listing API with rate limiting and error handling
//!
//! Every request waits on a `governor` quota first, so callers never need their
//! own pacing.

use std::num::NonZeroU32;
use std::time::Duration;

use governor::{
    Quota, RateLimiter,
    clock::DefaultClock,
    state::{InMemoryState, direct::NotKeyed},
};
use reqwest::{
    Client,
    header::{ACCEPT, HeaderMap, HeaderValue, USER_AGENT},
};
use tokio_util::sync::CancellationToken;

use crate::infrastructure::config::SecondaryApiConfig;
use crate::infrastructure::harvest_error::{HarvestError, HarvestResult};

/// HTTP client configuration
#[derive(Debug, Clone, serde::Serialize)]
pub struct HttpClientConfig {
    pub user_agent: String,
    pub timeout_seconds: u64,
    pub max_requests_per_second: u32,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self::from(&SecondaryApiConfig::default())
    }
}

impl From<&SecondaryApiConfig> for HttpClientConfig {
    fn from(config: &SecondaryApiConfig) -> Self {
        Self {
            user_agent: config.user_agent.clone(),
            timeout_seconds: config.timeout_seconds,
            max_requests_per_second: config.max_requests_per_second,
        }
    }
}

/// Rate-limited HTTP client with a cookie jar
pub struct HttpClient {
    client: Client,
    rate_limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
    config: HttpClientConfig,
}

impl HttpClient {
    pub fn new(config: HttpClientConfig) -> HarvestResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent)
                .map_err(|e| HarvestError::config(format!("Invalid user agent: {e}")))?,
        );
        headers.insert(ACCEPT, HeaderValue::from_static("application/json, text/plain, */*"));

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .default_headers(headers)
            .cookie_store(true)
            .gzip(true)
            .brotli(true)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|e| HarvestError::config(format!("Failed to create HTTP client: {e}")))?;

        let quota = Quota::per_second(
            NonZeroU32::new(config.max_requests_per_second)
                .ok_or_else(|| HarvestError::config("Rate limit must be greater than 0"))?,
        );

        Ok(Self {
            client,
            rate_limiter: RateLimiter::direct(quota),
            config,
        })
    }

    /// GET `url` with `query` and return the body as text.
    pub async fn get_text(&self, url: &str, query: &[(&str, String)]) -> HarvestResult<String> {
        self.rate_limiter.until_ready().await;
        tracing::debug!("Fetching URL: {}", url);

        let response = self.client.get(url).query(query).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(HarvestError::Http {
                status: status.as_u16(),
                message: format!("GET {url}"),
            });
        }

        let text = response.text().await?;
        tracing::debug!("Successfully fetched: {} ({} chars)", url, text.len());
        Ok(text)
    }

    /// Same as [`HttpClient::get_text`], abandoning the request when `cancellation_token` fires.
    pub async fn get_text_with_cancellation(
        &self,
        url: &str,
        query: &[(&str, String)],
        cancellation_token: &CancellationToken,
    ) -> HarvestResult<String> {
        if cancellation_token.is_cancelled() {
            return Err(HarvestError::Paused);
        }

        tokio::select! {
            result = self.get_text(url, query) => result,
            _ = cancellation_token.cancelled() => {
                tracing::warn!("🛑 HTTP request cancelled for URL: {}", url);
                Err(HarvestError::Paused)
            }
        }
    }

    pub fn config(&self) -> &HttpClientConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_client_creation() {
        let client = HttpClient::new(HttpClientConfig::default());
        assert!(client.is_ok());
    }

    #[test]
    fn test_zero_rate_is_config_error() {
        let config = HttpClientConfig {
            max_requests_per_second: 0,
            ..Default::default()
        };
        assert!(matches!(HttpClient::new(config), Err(HarvestError::Config { .. })));
    }

    #[tokio::test]
    async fn test_cancelled_request_returns_paused() {
        let client = HttpClient::new(HttpClientConfig::default()).unwrap();
        let token = CancellationToken::new();
        token.cancel();
        let result = client
            .get_text_with_cancellation("http://127.0.0.1:9/never", &[], &token)
            .await;
        assert!(matches!(result, Err(HarvestError::Paused)));
    }
}

//! Gamma API REST client
//!
//! Base URL: https://gamma-api.polymarket.com
//!
//! # Endpoints
//! - GET /markets?slug={slug} - Query by slug (array, occasionally a bare object)
//! - GET /markets/slug/{slug} - Direct lookup by slug
//!
//! # Source
//! - https://docs.polymarket.com/developers/gamma-markets-api/markets

use anyhow::{Context, Result};
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::httpws::{FetchError, RetryPolicy};
use crate::types::GammaMarket;
use crate::GAMMA_API_BASE;

/// Gamma API REST client
#[derive(Clone)]
pub struct GammaClient {
    client: Client,
    base_url: String,
    request_timeout: Duration,
    retry: RetryPolicy,
}

/// Per-request timeout for Gamma lookups
pub const DEFAULT_GAMMA_TIMEOUT: Duration = Duration::from_secs(10);

impl GammaClient {
    /// Create a new Gamma client with default base URL
    pub fn new() -> Result<Self> {
        Self::with_base_url(GAMMA_API_BASE)
    }

    /// Create a new Gamma client with custom base URL
    pub fn with_base_url(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            request_timeout: DEFAULT_GAMMA_TIMEOUT,
            retry: RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(500),
                max_delay: Duration::from_secs(4),
            },
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// GET returning raw JSON; 404 maps to `None`
    async fn get_json(&self, url: &str, query: &[(&str, &str)]) -> Result<Option<Value>> {
        let result = self
            .retry
            .run(url, move || async move {
                debug!("GET {} {:?}", url, query);
                let response = self
                    .client
                    .get(url)
                    .query(query)
                    .timeout(self.request_timeout)
                    .send()
                    .await
                    .map_err(|source| FetchError::Transport { url: url.to_string(), source })?;

                let status = response.status();
                if !status.is_success() {
                    let body = response.text().await.unwrap_or_default();
                    return Err(FetchError::Status { url: url.to_string(), status, body });
                }

                response
                    .json::<Value>()
                    .await
                    .map_err(|source| FetchError::Decode { url: url.to_string(), source })
            })
            .await;

        match result {
            Ok(value) => Ok(Some(value)),
            // 404 = market not found (normal case for wrong or not-yet-listed slug)
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// GET /markets?slug={slug} - first matching market, if any
    pub async fn query_market_by_slug(&self, slug: &str) -> Result<Option<GammaMarket>> {
        let url = format!("{}/markets", self.base_url);
        match self.get_json(&url, &[("slug", slug)]).await? {
            Some(value) => first_market(value),
            None => Ok(None),
        }
    }

    /// GET /markets/slug/{slug}
    pub async fn get_market_by_slug(&self, slug: &str) -> Result<Option<GammaMarket>> {
        let url = format!("{}/markets/slug/{}", self.base_url, slug);
        match self.get_json(&url, &[]).await? {
            Some(value) => first_market(value),
            None => Ok(None),
        }
    }
}

/// Accept a bare market object or a collection of candidates; the first one wins
fn first_market(value: Value) -> Result<Option<GammaMarket>> {
    let candidate = match value {
        Value::Array(items) => match items.into_iter().next() {
            Some(first) => first,
            None => return Ok(None),
        },
        other => other,
    };

    match candidate {
        Value::Null => Ok(None),
        Value::Object(ref map) if map.is_empty() => Ok(None),
        Value::Object(_) => {
            let market: GammaMarket =
                serde_json::from_value(candidate).context("Failed to parse GammaMarket")?;
            Ok(Some(market))
        }
        other => anyhow::bail!("Unexpected Gamma payload: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_client_creation() {
        let client = GammaClient::new();
        assert!(client.is_ok());
    }

    #[test]
    fn test_custom_base_url() {
        let client = GammaClient::with_base_url("https://example.com/").unwrap();
        assert_eq!(client.base_url, "https://example.com");
    }

    #[test]
    fn test_first_market_shapes() {
        let arr = json!([{"slug": "a", "question": "A"}, {"slug": "b", "question": "B"}]);
        assert_eq!(first_market(arr).unwrap().unwrap().slug, "a");

        let obj = json!({"slug": "c", "question": "C"});
        assert_eq!(first_market(obj).unwrap().unwrap().slug, "c");

        assert!(first_market(json!([])).unwrap().is_none());
        assert!(first_market(json!({})).unwrap().is_none());
        assert!(first_market(Value::Null).unwrap().is_none());
        assert!(first_market(json!("oops")).is_err());
    }

    #[tokio::test]
    async fn test_query_market_by_slug() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/markets"))
            .and(query_param("slug", "btc-updown-5m-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
                "slug": "btc-updown-5m-1",
                "question": "Bitcoin Up or Down",
                "clobTokenIds": "[\"1\", \"2\"]"
            }])))
            .mount(&server)
            .await;

        let client = GammaClient::with_base_url(&server.uri()).unwrap();
        let market = client.query_market_by_slug("btc-updown-5m-1").await.unwrap().unwrap();
        assert_eq!(market.clob_token_ids, vec!["1", "2"]);
    }

    #[tokio::test]
    async fn test_get_market_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/markets/slug/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = GammaClient::with_base_url(&server.uri()).unwrap();
        assert!(client.get_market_by_slug("missing").await.unwrap().is_none());
    }
}

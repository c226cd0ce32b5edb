//! REST client for Polymarket CLOB API
//!
//! Base URL: https://clob.polymarket.com
//!
//! # Public Endpoints (no auth required)
//! - GET /midpoint - Midpoint for a token
//! - GET /price - Best price for a token on one side
//! - GET /book - Orderbook for a token
//!
//! # Source
//! - Endpoints: https://docs.polymarket.com/quickstart/reference/endpoints

use anyhow::{Context, Result};
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use super::retry::{FetchError, RetryPolicy};
use crate::CLOB_REST_BASE;

/// Per-request timeout for price lookups
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// REST client for CLOB API
#[derive(Clone)]
pub struct RestClient {
    client: Client,
    base_url: String,
    request_timeout: Duration,
    retry: RetryPolicy,
}

impl RestClient {
    /// Create a new REST client with default base URL
    pub fn new() -> Result<Self> {
        Self::with_base_url(CLOB_REST_BASE)
    }

    /// Create a new REST client with custom base URL
    pub fn with_base_url(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            retry: RetryPolicy::default(),
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

    /// GET request returning raw JSON, retried per the client's policy
    pub async fn get_raw(&self, path: &str, query: &[(&str, &str)]) -> Result<Value, FetchError> {
        let url = format!("{}{}", self.base_url, path);
        let url = &url;
        self.retry
            .run(url, move || async move {
                debug!("GET {} {:?}", url, query);

                let response = self
                    .client
                    .get(url)
                    .query(query)
                    .timeout(self.request_timeout)
                    .send()
                    .await
                    .map_err(|source| FetchError::Transport { url: url.clone(), source })?;

                let status = response.status();
                if !status.is_success() {
                    let body = response.text().await.unwrap_or_default();
                    return Err(FetchError::Status { url: url.clone(), status, body });
                }

                response
                    .json::<Value>()
                    .await
                    .map_err(|source| FetchError::Decode { url: url.clone(), source })
            })
            .await
    }

    /// Get midpoint for a token
    ///
    /// Endpoint: GET /midpoint?token_id={token_id}
    pub async fn get_midpoint(&self, token_id: &str) -> Result<Value, FetchError> {
        self.get_raw("/midpoint", &[("token_id", token_id)]).await
    }

    /// Get best price for a token on one side ("buy" or "sell")
    ///
    /// Endpoint: GET /price?token_id={token_id}&side={side}
    pub async fn get_price(&self, token_id: &str, side: &str) -> Result<Value, FetchError> {
        self.get_raw("/price", &[("token_id", token_id), ("side", side)]).await
    }

    /// Get orderbook for a token
    ///
    /// Endpoint: GET /book?token_id={token_id}
    pub async fn get_book(&self, token_id: &str) -> Result<Value, FetchError> {
        self.get_raw("/book", &[("token_id", token_id)]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        }
    }

    #[test]
    fn test_client_creation() {
        let client = RestClient::new();
        assert!(client.is_ok());
    }

    #[test]
    fn test_custom_base_url() {
        let client = RestClient::with_base_url("https://example.com/").unwrap();
        assert_eq!(client.base_url, "https://example.com");
    }

    #[tokio::test]
    async fn test_get_midpoint_sends_token_id() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/midpoint"))
            .and(query_param("token_id", "123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"mid": "0.42"})))
            .mount(&server)
            .await;

        let client = RestClient::with_base_url(&server.uri()).unwrap();
        let body = client.get_midpoint("123").await.unwrap();
        assert_eq!(body["mid"], "0.42");
    }

    #[tokio::test]
    async fn test_retries_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/price"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/price"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"price": "0.6"})))
            .mount(&server)
            .await;

        let client = RestClient::with_base_url(&server.uri()).unwrap().with_retry(fast_retry());
        let body = client.get_price("123", "buy").await.unwrap();
        assert_eq!(body["price"], "0.6");
    }

    #[tokio::test]
    async fn test_not_found_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/book"))
            .respond_with(ResponseTemplate::new(404).set_body_string("no orderbook"))
            .expect(1)
            .mount(&server)
            .await;

        let client = RestClient::with_base_url(&server.uri()).unwrap().with_retry(fast_retry());
        let err = client.get_book("123").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_slow_response_hits_request_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/midpoint"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"mid": "0.5"}))
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let client = RestClient::with_base_url(&server.uri())
            .unwrap()
            .with_timeout(Duration::from_millis(100))
            .with_retry(RetryPolicy::none());

        let started = std::time::Instant::now();
        let err = client.get_midpoint("123").await.unwrap_err();
        assert!(matches!(err, FetchError::Transport { .. }));
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}

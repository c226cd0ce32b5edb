//! Best-effort price for one token
//!
//! Strategies are tried in strict order until one yields a valid price:
//! 1. `GET /midpoint`
//! 2. `GET /price?side=buy`
//! 3. `GET /book`, mid of best bid / best ask (or whichever side exists)
//!
//! Every failure is soft: the next strategy runs, and exhausting all three gives `None`.

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::httpws::RestClient;
use crate::types::{valid_price, value_as_f64};

/// Anything that can quote a token
#[async_trait]
pub trait PriceSource: Send + Sync {
    /// Valid price in `(0.001, 0.999)` rounded to 6 decimals, or `None`
    async fn price(&self, token_id: &str) -> Option<f64>;
}

/// CLOB REST fallback chain
#[derive(Clone)]
pub struct ClobPriceSource {
    rest: RestClient,
}

impl ClobPriceSource {
    pub fn new(rest: RestClient) -> Self {
        Self { rest }
    }

    async fn try_midpoint(&self, token_id: &str) -> Option<f64> {
        match self.rest.get_midpoint(token_id).await {
            Ok(body) => parse_midpoint(&body, token_id),
            Err(e) => {
                debug!("midpoint lookup failed for {}: {}", token_id, e);
                None
            }
        }
    }

    async fn try_buy_price(&self, token_id: &str) -> Option<f64> {
        match self.rest.get_price(token_id, "buy").await {
            Ok(body) => body.get("price").and_then(value_as_f64).and_then(valid_price),
            Err(e) => {
                debug!("buy price lookup failed for {}: {}", token_id, e);
                None
            }
        }
    }

    async fn try_book(&self, token_id: &str) -> Option<f64> {
        match self.rest.get_book(token_id).await {
            Ok(body) => book_price(&body),
            Err(e) => {
                debug!("book lookup failed for {}: {}", token_id, e);
                None
            }
        }
    }
}

#[async_trait]
impl PriceSource for ClobPriceSource {
    async fn price(&self, token_id: &str) -> Option<f64> {
        if let Some(p) = self.try_midpoint(token_id).await {
            return Some(p);
        }
        if let Some(p) = self.try_buy_price(token_id).await {
            debug!("{}: midpoint unavailable, using buy price", token_id);
            return Some(p);
        }
        let p = self.try_book(token_id).await;
        if p.is_none() {
            debug!("{}: no price from any strategy", token_id);
        }
        p
    }
}

/// `{"mid": "0.5"}`, `{"midpoint": 0.5}` or `{"<token_id>": "0.5"}`
pub fn parse_midpoint(body: &Value, token_id: &str) -> Option<f64> {
    ["mid", "midpoint", token_id]
        .iter()
        .find_map(|key| body.get(*key).and_then(value_as_f64))
        .and_then(valid_price)
}

/// Best bid (highest) and best ask (lowest) from `bids`/`asks` or `buys`/`sells` levels
pub fn top_of_book(body: &Value) -> (Option<f64>, Option<f64>) {
    let levels = |primary: &str, alt: &str| -> Vec<f64> {
        body.get(primary)
            .or_else(|| body.get(alt))
            .and_then(Value::as_array)
            .map(|levels| {
                levels
                    .iter()
                    .filter_map(|level| level.get("price").and_then(value_as_f64))
                    .filter(|p| p.is_finite())
                    .collect()
            })
            .unwrap_or_default()
    };

    let best_bid = levels("bids", "buys").into_iter().reduce(f64::max);
    let best_ask = levels("asks", "sells").into_iter().reduce(f64::min);
    (best_bid, best_ask)
}

/// Mid of the top of book, or the single side present
pub fn book_price(body: &Value) -> Option<f64> {
    match top_of_book(body) {
        (Some(bid), Some(ask)) => valid_price((bid + ask) / 2.0),
        (Some(one), None) | (None, Some(one)) => valid_price(one),
        (None, None) => None,
    }
}

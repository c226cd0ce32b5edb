//! Wire and session types for the tracker
//!
//! # Design Principles
//! 1. Provider payloads are decoded leniently: a field may arrive as a native array or as a
//!    stringified JSON array, as a number or as a numeric string, or as `null`
//! 2. Prices are `f64` in `(0.001, 0.999)`; anything else is treated as absent, never clamped
//! 3. Unknown fields are preserved via `#[serde(flatten)] extra` so saves never drop data
//!
//! # Sources
//! - Market Channel: https://docs.polymarket.com/developers/CLOB/websocket/market-channel
//! - Gamma Structure: https://docs.polymarket.com/developers/gamma-markets-api/gamma-structure

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};

// ============================================================================
// Price Helpers
// ============================================================================

/// Exclusive lower bound for an accepted price
pub const MIN_VALID_PRICE: f64 = 0.001;

/// Exclusive upper bound for an accepted price
pub const MAX_VALID_PRICE: f64 = 0.999;

/// Decimal digits kept on every accepted price
pub const PRICE_DECIMALS: i32 = 6;

/// Round to `PRICE_DECIMALS` digits
pub fn round_price(value: f64) -> f64 {
    let scale = 10f64.powi(PRICE_DECIMALS);
    (value * scale).round() / scale
}

/// Accept a raw price only if it lies strictly inside `(0.001, 0.999)`, rounded
pub fn valid_price(value: f64) -> Option<f64> {
    if value.is_finite() && value > MIN_VALID_PRICE && value < MAX_VALID_PRICE {
        Some(round_price(value))
    } else {
        None
    }
}

/// Inferred price of the other side of a binary market
pub fn complement(known: f64) -> f64 {
    round_price(1.0 - known)
}

/// Read a JSON number or numeric string as f64
pub fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Read a JSON string or number as an identifier string
pub fn value_as_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

// ============================================================================
// WebSocket Subscription Messages (Outbound)
// ============================================================================

/// Channel type for WebSocket subscription
/// Source: https://docs.polymarket.com/developers/CLOB/websocket/wss-overview
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChannelType {
    Market,
}

/// Initial subscription request for the market channel
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SubscribeRequest {
    /// Token IDs to receive updates for
    pub asset_ids: Vec<String>,

    /// Channel type: "MARKET"
    #[serde(rename = "type")]
    pub channel_type: ChannelType,

    /// Enable feature-flagged messages (best_bid_ask, market_resolved)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_feature_enabled: Option<bool>,
}

impl SubscribeRequest {
    /// Create a market channel subscription request
    pub fn market(asset_ids: Vec<String>, enable_features: bool) -> Self {
        Self {
            asset_ids,
            channel_type: ChannelType::Market,
            custom_feature_enabled: if enable_features { Some(true) } else { None },
        }
    }
}

/// Counters kept by the streaming listener
#[derive(Clone, Debug, Default)]
pub struct StreamStats {
    pub total_messages: u64,
    pub price_updates: u64,
    pub dropped_entries: u64,
    pub reconnects: u64,
    pub type_counts: HashMap<String, u64>,
}

impl StreamStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_type(&mut self, event_type: Option<&str>) {
        self.total_messages += 1;
        *self.type_counts.entry(event_type.unwrap_or("_no_type").to_string()).or_insert(0) += 1;
    }
}

// ============================================================================
// Gamma API Types
// Source: https://docs.polymarket.com/developers/gamma-markets-api/gamma-structure
// ============================================================================

/// Treat an explicit `null` like a missing field
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Deserialize a list of strings sent either as a native JSON array or as a
/// stringified one (e.g. `"[\"a\", \"b\"]"`). Null, missing and empty string give `[]`.
fn deserialize_string_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    fn from_items<E: Error>(items: Vec<Value>) -> Result<Vec<String>, E> {
        items
            .iter()
            .map(|v| value_as_id(v).ok_or_else(|| E::custom(format!("Invalid list entry: {}", v))))
            .collect()
    }

    match Value::deserialize(deserializer)? {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => from_items(items),
        Value::String(s) if s.trim().is_empty() => Ok(Vec::new()),
        Value::String(s) => {
            let items: Vec<Value> = serde_json::from_str(&s)
                .map_err(|e| D::Error::custom(format!("Invalid JSON array '{}': {}", s, e)))?;
            from_items(items)
        }
        other => Err(D::Error::custom(format!("Expected list, got {}", other))),
    }
}

fn deserialize_optional_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Value>::deserialize(deserializer)?.as_ref().and_then(value_as_id))
}

/// Per-token entry of a Gamma market (carries the settlement flag)
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct GammaToken {
    #[serde(default, alias = "tokenId", deserialize_with = "deserialize_optional_id")]
    pub token_id: Option<String>,

    #[serde(default)]
    pub outcome: Option<String>,

    #[serde(default)]
    pub winner: Option<bool>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Gamma Market response from GET /markets?slug={slug}
///
/// Note: `clobTokenIds` and `outcomes` show up both as stringified JSON arrays and as
/// native arrays depending on the endpoint; both decode to `Vec<String>`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GammaMarket {
    /// URL-friendly market name
    #[serde(default, deserialize_with = "null_as_default")]
    pub slug: String,

    /// Market question/title
    #[serde(default, deserialize_with = "null_as_default")]
    pub question: String,

    /// CLOB token IDs for each outcome
    #[serde(default, deserialize_with = "deserialize_string_list")]
    pub clob_token_ids: Vec<String>,

    /// Outcome labels (e.g., ["Up", "Down"] or ["Yes", "No"])
    #[serde(default, deserialize_with = "deserialize_string_list")]
    pub outcomes: Vec<String>,

    /// Outcome prices as decimal strings; a closed market reports `["1", "0"]`
    #[serde(default, deserialize_with = "deserialize_string_list")]
    pub outcome_prices: Vec<String>,

    /// Per-token records with winner flags
    #[serde(default, deserialize_with = "null_as_default")]
    pub tokens: Vec<GammaToken>,

    /// Market end time (ISO 8601)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,

    /// Whether market is closed
    #[serde(default, deserialize_with = "null_as_default")]
    pub closed: bool,

    /// Extra fields for forward compatibility
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl GammaMarket {
    /// Parse end_date as Unix timestamp (seconds)
    pub fn end_timestamp(&self) -> Option<i64> {
        self.end_date.as_deref().and_then(parse_iso_timestamp)
    }
}

/// Parse an ISO-8601 timestamp ("2025-01-01T12:05:00Z", with or without offset)
pub fn parse_iso_timestamp(s: &str) -> Option<i64> {
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp());
    }
    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|dt| dt.and_utc().timestamp())
}

// ============================================================================
// Market Resolver Types
// ============================================================================

/// One tradable side of a market
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenRef {
    /// CLOB token id
    pub id: String,
    /// Provider's outcome label ("Up", "Yes", ...)
    pub label: String,
    /// Column name used in `priceHistory` ("up"/"down" for binary markets)
    pub key: String,
}

/// Normalized market metadata for one tracking run
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct MarketDescriptor {
    pub slug: String,
    pub question: String,
    /// Market end time (ISO 8601) as reported by Gamma
    pub end_date: Option<String>,
    /// `[up, down]` for binary markets, provider order otherwise
    pub tokens: Vec<TokenRef>,
    pub closed: bool,
    /// Label of the token the provider flagged as winner
    pub winner_label: Option<String>,
}

impl MarketDescriptor {
    pub fn is_binary(&self) -> bool {
        self.tokens.len() == 2
    }

    pub fn token_ids(&self) -> Vec<String> {
        self.tokens.iter().map(|t| t.id.clone()).collect()
    }

    pub fn end_ts(&self) -> Option<i64> {
        self.end_date.as_deref().and_then(parse_iso_timestamp)
    }

    /// Settled with a usable winner label
    pub fn settled_winner(&self) -> Option<&str> {
        if !self.closed {
            return None;
        }
        self.winner_label.as_deref().map(str::trim).filter(|l| !l.is_empty())
    }

    /// Map free-form input ("u", "DOWN", "yes", "Up") to a token label
    pub fn match_label(&self, input: &str) -> Option<&str> {
        let needle = input.trim().to_lowercase();
        if needle.is_empty() {
            return None;
        }
        if let Some(token) = self.tokens.iter().find(|t| t.label.to_lowercase() == needle) {
            return Some(&token.label);
        }
        if !self.is_binary() {
            return None;
        }
        let key = match needle.as_str() {
            "u" | "up" | "y" | "yes" => "up",
            "d" | "down" | "n" | "no" => "down",
            _ => return None,
        };
        self.tokens.iter().find(|t| t.key == key).map(|t| t.label.as_str())
    }
}

/// Result of a market lookup
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ResolveResult {
    /// Market found and normalized
    Ok(MarketDescriptor),

    /// Nothing usable for this slug (not yet listed, mistyped, or unreachable)
    NotFound { slug: String, message: String },
}

impl ResolveResult {
    pub fn is_ok(&self) -> bool {
        matches!(self, ResolveResult::Ok(_))
    }

    pub fn into_market(self) -> Option<MarketDescriptor> {
        match self {
            ResolveResult::Ok(m) => Some(m),
            ResolveResult::NotFound { .. } => None,
        }
    }
}

// ============================================================================
// Session Types (persisted as pm_session_<slug>.json)
// ============================================================================

/// One sample of the time series
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PricePoint {
    /// Unix seconds
    pub t: i64,
    /// Seconds since window start, clamped to `[0, window]`
    #[serde(default)]
    pub elapsed: u64,
    /// Price per token key (`up`, `down`, ...); `null` when unknown
    #[serde(flatten)]
    pub prices: BTreeMap<String, Option<f64>>,
}

impl PricePoint {
    pub fn price(&self, key: &str) -> Option<f64> {
        self.prices.get(key).copied().flatten()
    }
}

/// How the stored outcome was obtained
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeSource {
    /// Provider reported the market closed with a winner
    Settlement,
    /// Entered by an operator
    Manual,
    /// Guessed from pre-settlement prices; low confidence
    PriceInference,
}

/// Durable record of one tracked window
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub slug: String,
    pub resolution_ts: i64,
    #[serde(default)]
    pub question: String,
    #[serde(default)]
    pub outcome: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome_source: Option<OutcomeSource>,
    #[serde(default)]
    pub price_history: Vec<PricePoint>,
    /// Fields written by other tools (e.g. `savedAt`)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Session {
    pub fn new(slug: &str, resolution_ts: i64, question: &str) -> Self {
        Self {
            slug: slug.to_string(),
            resolution_ts,
            question: question.to_string(),
            outcome: None,
            outcome_source: None,
            price_history: Vec::new(),
            extra: Map::new(),
        }
    }

    pub fn last_point(&self) -> Option<&PricePoint> {
        self.price_history.last()
    }

    pub fn set_outcome(&mut self, label: String, source: OutcomeSource) {
        self.outcome = Some(label);
        self.outcome_source = Some(source);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_valid_price_bounds() {
        assert_eq!(valid_price(0.5), Some(0.5));
        assert_eq!(valid_price(0.001), None);
        assert_eq!(valid_price(0.999), None);
        assert_eq!(valid_price(0.0), None);
        assert_eq!(valid_price(1.2), None);
        assert_eq!(valid_price(f64::NAN), None);
        assert_eq!(valid_price(0.1234567), Some(0.123457));
    }

    #[test]
    fn test_complement_rounding() {
        assert_eq!(complement(0.3), 0.7);
        assert_eq!(complement(0.123457), 0.876543);
    }

    #[test]
    fn test_value_as_f64() {
        assert_eq!(value_as_f64(&json!("0.52")), Some(0.52));
        assert_eq!(value_as_f64(&json!(0.52)), Some(0.52));
        assert_eq!(value_as_f64(&json!(null)), None);
        assert_eq!(value_as_f64(&json!("abc")), None);
    }

    #[test]
    fn test_subscribe_request_market() {
        let req = SubscribeRequest::market(vec!["asset1".to_string()], true);
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("MARKET"));
        assert!(json.contains("asset1"));
        assert!(json.contains("custom_feature_enabled"));
    }

    #[test]
    fn test_gamma_market_stringified_lists() {
        let raw = json!({
            "slug": "btc-up-or-down-in-5-minutes-1767603600",
            "question": "Bitcoin Up or Down?",
            "clobTokenIds": "[\"111\", \"222\"]",
            "outcomes": "[\"Up\", \"Down\"]",
            "endDate": "2026-01-05T09:00:00Z",
            "closed": false
        });
        let market: GammaMarket = serde_json::from_value(raw).unwrap();
        assert_eq!(market.clob_token_ids, vec!["111", "222"]);
        assert_eq!(market.outcomes, vec!["Up", "Down"]);
        assert_eq!(market.end_timestamp(), Some(1767603600));
    }

    #[test]
    fn test_gamma_market_native_lists_and_nulls() {
        let raw = json!({
            "slug": "s",
            "question": null,
            "clobTokenIds": ["111", 222],
            "outcomes": null,
            "tokens": [{"tokenId": "111", "outcome": "Yes", "winner": true}],
            "closed": null
        });
        let market: GammaMarket = serde_json::from_value(raw).unwrap();
        assert_eq!(market.clob_token_ids, vec!["111", "222"]);
        assert!(market.outcomes.is_empty());
        assert_eq!(market.question, "");
        assert!(!market.closed);
        assert_eq!(market.tokens[0].token_id.as_deref(), Some("111"));
        assert_eq!(market.tokens[0].winner, Some(true));
    }

    #[test]
    fn test_session_file_shape() {
        let mut session = Session::new("slug-1", 1_700_000_300, "Q?");
        let mut prices = BTreeMap::new();
        prices.insert("up".to_string(), Some(0.55));
        prices.insert("down".to_string(), None);
        session.price_history.push(PricePoint { t: 1_700_000_010, elapsed: 10, prices });

        let value = serde_json::to_value(&session).unwrap();
        assert_eq!(value["resolutionTs"], json!(1_700_000_300));
        assert_eq!(value["outcome"], Value::Null);
        assert!(value.get("outcomeSource").is_none());
        assert_eq!(value["priceHistory"][0]["up"], json!(0.55));
        assert_eq!(value["priceHistory"][0]["down"], Value::Null);

        let back: Session = serde_json::from_value(value).unwrap();
        assert_eq!(back, session);
    }

    #[test]
    fn test_session_preserves_unknown_fields() {
        let raw = json!({
            "slug": "s", "resolutionTs": 10, "question": "q", "outcome": "Up",
            "priceHistory": [], "savedAt": 12345
        });
        let session: Session = serde_json::from_value(raw).unwrap();
        assert_eq!(session.extra.get("savedAt"), Some(&json!(12345)));
        let again = serde_json::to_value(&session).unwrap();
        assert_eq!(again["savedAt"], json!(12345));
    }

    #[test]
    fn test_match_label_aliases() {
        let market = MarketDescriptor {
            slug: "s".into(),
            question: "q".into(),
            end_date: None,
            tokens: vec![
                TokenRef { id: "1".into(), label: "Yes".into(), key: "up".into() },
                TokenRef { id: "2".into(), label: "No".into(), key: "down".into() },
            ],
            closed: false,
            winner_label: None,
        };
        assert_eq!(market.match_label("u"), Some("Yes"));
        assert_eq!(market.match_label(" NO "), Some("No"));
        assert_eq!(market.match_label("maybe"), None);
        assert_eq!(market.match_label(""), None);
    }
}

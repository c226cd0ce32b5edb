//! Market Resolver - slug to normalized market descriptor
//!
//! # Algorithm
//! 1. Query Gamma by slug (`/markets?slug=`, then `/markets/slug/{slug}`)
//! 2. Token ids from `clobTokenIds`, else from `tokens[]`
//! 3. Labels from `outcomes[i]`, else the matching token's `outcome`, else positional
//! 4. Binary markets are ordered `[up, down]` by alias (up/yes, down/no), falling back to
//!    provider order; larger markets keep provider order and raw labels
//! 5. Settlement is read from per-token `winner` flags, or from `outcomePrices` once the
//!    market is closed (the single outcome priced at 1 won)
//!
//! A missing market is an expected outcome (`ResolveResult::NotFound`), never an error.

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::gamma::GammaClient;
use crate::types::{GammaMarket, MarketDescriptor, ResolveResult, TokenRef};

const UP_ALIASES: &[&str] = &["up", "yes"];
const DOWN_ALIASES: &[&str] = &["down", "no"];

/// Field names of a stored price point; outcome keys must not shadow them
const RESERVED_KEYS: &[&str] = &["t", "elapsed"];

/// Anything that can look a market up by slug
#[async_trait]
pub trait MarketLookup: Send + Sync {
    async fn resolve(&self, slug: &str) -> ResolveResult;
}

/// Gamma-backed resolver
#[derive(Clone)]
pub struct MarketResolver {
    gamma: GammaClient,
}

impl MarketResolver {
    pub fn new(gamma: GammaClient) -> Self {
        Self { gamma }
    }

    async fn fetch(&self, slug: &str) -> anyhow::Result<Option<GammaMarket>> {
        if let Some(market) = self.gamma.query_market_by_slug(slug).await? {
            return Ok(Some(market));
        }
        debug!("Slug query empty for {}, trying direct lookup", slug);
        self.gamma.get_market_by_slug(slug).await
    }
}

#[async_trait]
impl MarketLookup for MarketResolver {
    async fn resolve(&self, slug: &str) -> ResolveResult {
        let market = match self.fetch(slug).await {
            Ok(Some(market)) => market,
            Ok(None) => {
                debug!("Market not found for slug: {}", slug);
                return ResolveResult::NotFound {
                    slug: slug.to_string(),
                    message: "No market returned for slug".to_string(),
                };
            }
            Err(e) => {
                warn!("Gamma lookup failed for {}: {:#}", slug, e);
                return ResolveResult::NotFound {
                    slug: slug.to_string(),
                    message: format!("Gamma API error: {:#}", e),
                };
            }
        };

        match describe(&market, slug) {
            Some(descriptor) => {
                info!(
                    "Resolved {}: {} token(s), closed={}, winner={:?}",
                    descriptor.slug,
                    descriptor.tokens.len(),
                    descriptor.closed,
                    descriptor.winner_label
                );
                ResolveResult::Ok(descriptor)
            }
            None => ResolveResult::NotFound {
                slug: slug.to_string(),
                message: "Market has no token ids".to_string(),
            },
        }
    }
}

/// Index of the only outcome priced at 1 in a resolved market
fn settled_index(outcome_prices: &[String]) -> Option<usize> {
    let mut winners = outcome_prices
        .iter()
        .enumerate()
        .filter(|(_, p)| p.trim().parse::<f64>().is_ok_and(|v| (v - 1.0).abs() < 1e-9))
        .map(|(i, _)| i);
    let first = winners.next()?;
    if winners.next().is_some() {
        return None;
    }
    Some(first)
}

fn positional_label(index: usize) -> String {
    match index {
        0 => "Up".to_string(),
        1 => "Down".to_string(),
        n => format!("Outcome {}", n + 1),
    }
}

fn matches_alias(label: &str, aliases: &[&str]) -> bool {
    let label = label.trim().to_lowercase();
    aliases.iter().any(|a| *a == label)
}

/// Normalize a Gamma market; `None` when it carries no token ids
pub fn describe(market: &GammaMarket, requested_slug: &str) -> Option<MarketDescriptor> {
    let ids: Vec<String> = if market.clob_token_ids.is_empty() {
        market.tokens.iter().filter_map(|t| t.token_id.clone()).collect()
    } else {
        market.clob_token_ids.clone()
    };
    if ids.is_empty() {
        return None;
    }

    let priced_winner = if market.closed { settled_index(&market.outcome_prices) } else { None };

    let mut labels = Vec::with_capacity(ids.len());
    let mut winner_label = None;
    for (i, id) in ids.iter().enumerate() {
        let raw = market.tokens.iter().find(|t| t.token_id.as_deref() == Some(id.as_str()));
        let label = market
            .outcomes
            .get(i)
            .filter(|l| !l.trim().is_empty())
            .cloned()
            .or_else(|| raw.and_then(|t| t.outcome.clone()))
            .unwrap_or_else(|| positional_label(i));
        let flagged = raw.and_then(|t| t.winner).unwrap_or(false) || priced_winner == Some(i);
        if winner_label.is_none() && flagged {
            winner_label = Some(label.clone());
        }
        labels.push(label);
    }

    // Winner flags on tokens whose ids we could not line up
    if winner_label.is_none() {
        winner_label = market
            .tokens
            .iter()
            .find(|t| t.winner == Some(true))
            .and_then(|t| t.outcome.clone());
    }

    let tokens = if ids.len() == 2 {
        let up = labels.iter().position(|l| matches_alias(l, UP_ALIASES));
        let down = labels.iter().position(|l| matches_alias(l, DOWN_ALIASES));
        let (u, d) = match (up, down) {
            (Some(u), Some(d)) if u != d => (u, d),
            (Some(u), _) => (u, 1 - u),
            (None, Some(d)) => (1 - d, d),
            (None, None) => (0, 1),
        };
        vec![
            TokenRef { id: ids[u].clone(), label: labels[u].clone(), key: "up".to_string() },
            TokenRef { id: ids[d].clone(), label: labels[d].clone(), key: "down".to_string() },
        ]
    } else {
        let mut tokens: Vec<TokenRef> = Vec::with_capacity(ids.len());
        for (i, (id, label)) in ids.iter().zip(labels.iter()).enumerate() {
            let taken = RESERVED_KEYS.contains(&label.as_str()) || tokens.iter().any(|t| &t.key == label);
            let key = if taken {
                format!("{}_{}", label, i)
            } else {
                label.clone()
            };
            tokens.push(TokenRef { id: id.clone(), label: label.clone(), key });
        }
        tokens
    };

    let slug = if market.slug.is_empty() { requested_slug.to_string() } else { market.slug.clone() };

    Some(MarketDescriptor {
        slug,
        question: market.question.clone(),
        end_date: market.end_date.clone(),
        tokens,
        closed: market.closed,
        winner_label,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn gamma(value: serde_json::Value) -> GammaMarket {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_binary_up_down() {
        let m = gamma(json!({
            "slug": "btc-updown-5m-1",
            "question": "BTC Up or Down?",
            "clobTokenIds": "[\"A\", \"B\"]",
            "outcomes": "[\"Up\", \"Down\"]"
        }));
        let d = describe(&m, "btc-updown-5m-1").unwrap();
        assert_eq!(d.tokens[0], TokenRef { id: "A".into(), label: "Up".into(), key: "up".into() });
        assert_eq!(d.tokens[1].key, "down");
        assert!(!d.closed);
        assert_eq!(d.winner_label, None);
    }

    #[test]
    fn test_binary_reordered_by_alias() {
        let m = gamma(json!({
            "slug": "s",
            "clobTokenIds": ["N", "Y"],
            "outcomes": ["NO", "yes"]
        }));
        let d = describe(&m, "s").unwrap();
        assert_eq!(d.tokens[0].id, "Y");
        assert_eq!(d.tokens[0].label, "yes");
        assert_eq!(d.tokens[0].key, "up");
        assert_eq!(d.tokens[1].id, "N");
    }

    #[test]
    fn test_binary_positional_fallback() {
        let m = gamma(json!({
            "slug": "s",
            "clobTokenIds": ["1", "2"],
            "outcomes": ["Lakers", "Celtics"]
        }));
        let d = describe(&m, "s").unwrap();
        assert_eq!(d.tokens[0].label, "Lakers");
        assert_eq!(d.tokens[0].key, "up");
        assert_eq!(d.tokens[1].label, "Celtics");
        assert_eq!(d.tokens[1].key, "down");
    }

    #[test]
    fn test_one_side_matched_other_inferred() {
        let m = gamma(json!({"slug": "s", "clobTokenIds": ["1", "2"], "outcomes": ["Other", "Down"]}));
        let d = describe(&m, "s").unwrap();
        assert_eq!(d.tokens[0].id, "1");
        assert_eq!(d.tokens[1].id, "2");
    }

    #[test]
    fn test_multi_outcome_keeps_order() {
        let m = gamma(json!({
            "slug": "s",
            "clobTokenIds": ["1", "2", "3"],
            "outcomes": ["Red", "Green", "Blue"]
        }));
        let d = describe(&m, "s").unwrap();
        let labels: Vec<_> = d.tokens.iter().map(|t| t.key.as_str()).collect();
        assert_eq!(labels, vec!["Red", "Green", "Blue"]);
        assert!(!d.is_binary());
    }

    #[test]
    fn test_tokens_array_and_winner() {
        let m = gamma(json!({
            "slug": "s",
            "question": "Q",
            "closed": true,
            "tokens": [
                {"token_id": "T1", "outcome": "Up", "winner": true},
                {"token_id": "T2", "outcome": "Down", "winner": false}
            ]
        }));
        let d = describe(&m, "s").unwrap();
        assert_eq!(d.token_ids(), vec!["T1", "T2"]);
        assert_eq!(d.settled_winner(), Some("Up"));
    }

    #[test]
    fn test_closed_market_settles_from_outcome_prices() {
        let m = gamma(json!({
            "slug": "btc-updown-5m-300",
            "closed": true,
            "clobTokenIds": "[\"U\", \"D\"]",
            "outcomes": "[\"Up\", \"Down\"]",
            "outcomePrices": "[\"1\", \"0\"]"
        }));
        let d = describe(&m, "btc-updown-5m-300").unwrap();
        assert_eq!(d.winner_label.as_deref(), Some("Up"));
        assert_eq!(d.settled_winner(), Some("Up"));

        let down = gamma(json!({
            "closed": true,
            "clobTokenIds": ["U", "D"],
            "outcomes": ["Up", "Down"],
            "outcomePrices": ["0", "1.0"]
        }));
        assert_eq!(describe(&down, "s").unwrap().settled_winner(), Some("Down"));
    }

    #[test]
    fn test_open_or_ambiguous_prices_do_not_settle() {
        let open = gamma(json!({
            "closed": false,
            "clobTokenIds": ["U", "D"],
            "outcomes": ["Up", "Down"],
            "outcomePrices": ["1", "0"]
        }));
        assert_eq!(describe(&open, "s").unwrap().winner_label, None);

        let live_prices = gamma(json!({
            "closed": true,
            "clobTokenIds": ["U", "D"],
            "outcomes": ["Up", "Down"],
            "outcomePrices": ["0.55", "0.45"]
        }));
        assert_eq!(describe(&live_prices, "s").unwrap().settled_winner(), None);
    }

    #[test]
    fn test_reserved_labels_get_suffixed_keys() {
        let m = gamma(json!({
            "slug": "s",
            "clobTokenIds": ["1", "2", "3"],
            "outcomes": ["t", "elapsed", "Other"]
        }));
        let d = describe(&m, "s").unwrap();
        let keys: Vec<_> = d.tokens.iter().map(|t| t.key.as_str()).collect();
        assert_eq!(keys, vec!["t_0", "elapsed_1", "Other"]);
        assert_eq!(d.tokens[0].label, "t");
    }

    #[test]
    fn test_no_tokens() {
        let m = gamma(json!({"slug": "s", "question": "Q"}));
        assert!(describe(&m, "s").is_none());
    }

    #[test]
    fn test_positional_labels_when_missing() {
        let m = gamma(json!({"clobTokenIds": ["1", "2"]}));
        let d = describe(&m, "fallback-slug").unwrap();
        assert_eq!(d.slug, "fallback-slug");
        assert_eq!(d.tokens[0].label, "Up");
        assert_eq!(d.tokens[1].label, "Down");
    }

    #[tokio::test]
    async fn test_resolve_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/markets"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/markets/slug/nope"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let resolver = MarketResolver::new(GammaClient::with_base_url(&server.uri()).unwrap());
        let result = resolver.resolve("nope").await;
        assert!(!result.is_ok());
        assert!(matches!(result, ResolveResult::NotFound { ref slug, .. } if slug == "nope"));
    }

    #[tokio::test]
    async fn test_resolve_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/markets"))
            .and(query_param("slug", "btc-updown-5m-300"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "slug": "btc-updown-5m-300",
                "question": "Bitcoin Up or Down",
                "clobTokenIds": "[\"U\", \"D\"]",
                "outcomes": "[\"Up\", \"Down\"]",
                "endDate": "1970-01-01T00:10:00Z",
                "closed": true,
                "outcomePrices": "[\"0\", \"1\"]"
            })))
            .mount(&server)
            .await;

        let resolver = MarketResolver::new(GammaClient::with_base_url(&server.uri()).unwrap());
        let market = resolver.resolve("btc-updown-5m-300").await.into_market().unwrap();
        assert_eq!(market.token_ids(), vec!["U", "D"]);
        assert_eq!(market.end_ts(), Some(600));
        assert_eq!(market.settled_winner(), Some("Down"));
    }
}

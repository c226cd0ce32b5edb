//! Post-expiry outcome resolution
//!
//! `Pending` moves to `Settled` or `Unknown`, trying in order:
//! 1. provider settlement (poll until the market is closed with a winner)
//! 2. the operator, through an `OutcomeOracle`
//! 3. price-threshold inference on the last recorded point, only when configured
//!
//! Settlement is authoritative. Inference is a low-confidence guess and is never the
//! default.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::TrackerConfig;
use crate::gamma::MarketLookup;
use crate::types::{MarketDescriptor, OutcomeSource, PricePoint, ResolveResult, Session};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OutcomeState {
    Pending,
    Settled { label: String, source: OutcomeSource },
    Unknown,
}

impl OutcomeState {
    /// Record a settled outcome on the session; other states leave it untouched
    pub fn apply(&self, session: &mut Session) {
        if let OutcomeState::Settled { label, source } = self {
            session.set_outcome(label.clone(), *source);
        }
    }
}

/// Source of a manually supplied outcome
#[async_trait]
pub trait OutcomeOracle: Send + Sync {
    /// Free-form outcome text, `None` to skip
    async fn ask(&self, market: &MarketDescriptor) -> Option<String>;
}

/// Never answers
#[derive(Clone, Copy, Debug, Default)]
pub struct NoOracle;

#[async_trait]
impl OutcomeOracle for NoOracle {
    async fn ask(&self, _market: &MarketDescriptor) -> Option<String> {
        None
    }
}

/// Fixed answer; counts how often it was asked
#[derive(Debug, Default)]
pub struct CannedOracle {
    answer: Option<String>,
    asked: AtomicUsize,
}

impl CannedOracle {
    pub fn new(answer: Option<&str>) -> Self {
        Self { answer: answer.map(str::to_string), asked: AtomicUsize::new(0) }
    }

    pub fn times_asked(&self) -> usize {
        self.asked.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OutcomeOracle for CannedOracle {
    async fn ask(&self, _market: &MarketDescriptor) -> Option<String> {
        self.asked.fetch_add(1, Ordering::SeqCst);
        self.answer.clone()
    }
}

pub struct OutcomeResolver {
    lookup: Arc<dyn MarketLookup>,
    clock: Arc<dyn Clock>,
    oracle: Arc<dyn OutcomeOracle>,
    poll_interval: Duration,
    poll_attempts: u32,
    infer_threshold: Option<f64>,
    interrupted: Option<Arc<AtomicBool>>,
}

impl OutcomeResolver {
    pub fn new(
        config: &TrackerConfig,
        lookup: Arc<dyn MarketLookup>,
        clock: Arc<dyn Clock>,
        oracle: Arc<dyn OutcomeOracle>,
    ) -> Self {
        Self {
            lookup,
            clock,
            oracle,
            poll_interval: config.outcome_poll_interval,
            poll_attempts: config.outcome_poll_attempts.max(1),
            infer_threshold: config.infer_threshold,
            interrupted: None,
        }
    }

    /// Stop polling and skip the remaining steps once `flag` is set
    pub fn with_interrupt(mut self, flag: Arc<AtomicBool>) -> Self {
        self.interrupted = Some(flag);
        self
    }

    fn interrupted(&self) -> bool {
        self.interrupted.as_ref().is_some_and(|f| f.load(Ordering::Relaxed))
    }

    /// Run the state machine once for an expired window
    pub async fn resolve(&self, market: &MarketDescriptor, session: &Session) -> OutcomeState {
        if let Some(label) = self.poll_settlement(market).await {
            info!("{} settled: {}", market.slug, label);
            return OutcomeState::Settled { label, source: OutcomeSource::Settlement };
        }

        if self.interrupted() {
            info!("{} outcome skipped, interrupted", market.slug);
            return OutcomeState::Unknown;
        }

        if let Some(label) = self.ask_oracle(market).await {
            info!("{} outcome entered manually: {}", market.slug, label);
            return OutcomeState::Settled { label, source: OutcomeSource::Manual };
        }

        if let Some(threshold) = self.infer_threshold {
            if let Some(label) = session.last_point().and_then(|p| infer_from_point(market, p, threshold)) {
                warn!("{} outcome inferred from prices (low confidence): {}", market.slug, label);
                return OutcomeState::Settled { label, source: OutcomeSource::PriceInference };
            }
        }

        info!("{} outcome unknown", market.slug);
        OutcomeState::Unknown
    }

    async fn poll_settlement(&self, market: &MarketDescriptor) -> Option<String> {
        for attempt in 1..=self.poll_attempts {
            if self.interrupted() {
                return None;
            }

            // A slow lookup must not stretch the poll schedule
            let result = tokio::time::timeout(self.poll_interval, self.lookup.resolve(&market.slug)).await;
            match result {
                Err(_) => {
                    debug!(
                        "Settlement poll {}/{} for {}: no answer within {}ms",
                        attempt,
                        self.poll_attempts,
                        market.slug,
                        self.poll_interval.as_millis()
                    );
                }
                Ok(ResolveResult::Ok(latest)) => {
                    if let Some(winner) = latest.settled_winner() {
                        let label = market.match_label(winner).unwrap_or(winner);
                        return Some(label.to_string());
                    }
                    debug!(
                        "Settlement poll {}/{} for {}: closed={}",
                        attempt, self.poll_attempts, market.slug, latest.closed
                    );
                }
                Ok(ResolveResult::NotFound { message, .. }) => {
                    debug!("Settlement poll {}/{} for {}: {}", attempt, self.poll_attempts, market.slug, message);
                }
            }

            if attempt < self.poll_attempts {
                self.clock.sleep(self.poll_interval).await;
            }
        }
        None
    }

    async fn ask_oracle(&self, market: &MarketDescriptor) -> Option<String> {
        let answer = self.oracle.ask(market).await?;
        let answer = answer.trim();
        if answer.is_empty() {
            return None;
        }
        Some(market.match_label(answer).unwrap_or(answer).to_string())
    }
}

/// Label of the only side priced at or above `threshold`
pub fn infer_from_point(market: &MarketDescriptor, point: &PricePoint, threshold: f64) -> Option<String> {
    let mut above = market
        .tokens
        .iter()
        .filter(|t| point.price(&t.key).is_some_and(|p| p >= threshold));
    let first = above.next()?;
    if above.next().is_some() {
        return None;
    }
    Some(first.label.clone())
}

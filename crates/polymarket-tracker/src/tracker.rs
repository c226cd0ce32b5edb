//! Sampling loop
//!
//! One `track` call follows a single window from lookup to outcome:
//! 1. resolve the market (not found: nothing is written)
//! 2. sample every tick until the first tick at or past the resolution instant
//! 3. checkpoint to disk on a time basis while sampling
//! 4. stop the stream listener, save, resolve the outcome once, save again
//!
//! `run` repeats this for consecutive windows until interrupted.

use anyhow::Result;
use futures_util::future::join_all;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::TrackerConfig;
use crate::gamma::{GammaClient, MarketLookup, MarketResolver};
use crate::httpws::{PriceCacheHandle, RestClient, StreamingPriceCache};
use crate::outcome::{OutcomeOracle, OutcomeResolver, OutcomeState};
use crate::price::{ClobPriceSource, PriceSource};
use crate::store::SessionStore;
use crate::types::{complement, MarketDescriptor, PricePoint, ResolveResult, Session};
use crate::window::{slug_from_input, window_for_slug, TimeWindow};

/// Everything a tracking run depends on
pub struct TrackerContext {
    pub config: TrackerConfig,
    pub clock: Arc<dyn Clock>,
    pub lookup: Arc<dyn MarketLookup>,
    pub prices: Arc<dyn PriceSource>,
    pub store: SessionStore,
    pub oracle: Arc<dyn OutcomeOracle>,
    /// Set on Ctrl+C
    pub interrupted: Arc<AtomicBool>,
}

impl TrackerContext {
    /// Context wired to the real Gamma and CLOB endpoints
    pub fn live(
        config: TrackerConfig,
        oracle: Arc<dyn OutcomeOracle>,
        interrupted: Arc<AtomicBool>,
    ) -> Result<Self> {
        config.validate()?;

        let gamma = GammaClient::with_base_url(&config.gamma_base)?
            .with_timeout(config.request_timeout)
            .with_retry(config.retry.clone());
        let rest = RestClient::with_base_url(&config.clob_base)?
            .with_timeout(config.request_timeout)
            .with_retry(config.retry.clone());

        Ok(Self {
            clock: Arc::new(SystemClock),
            lookup: Arc::new(MarketResolver::new(gamma)),
            prices: Arc::new(ClobPriceSource::new(rest)),
            store: SessionStore::new(config.out_dir.clone()),
            oracle,
            interrupted,
            config,
        })
    }
}

/// How a `track` call ended
#[derive(Debug, Clone, PartialEq)]
pub enum TrackReport {
    NotFound { slug: String },
    Completed { path: PathBuf, points: usize, outcome: OutcomeState },
    Interrupted { path: PathBuf, points: usize },
}

pub struct Tracker {
    ctx: TrackerContext,
}

impl Tracker {
    pub fn new(ctx: TrackerContext) -> Result<Self> {
        ctx.config.validate()?;
        Ok(Self { ctx })
    }

    pub fn context(&self) -> &TrackerContext {
        &self.ctx
    }

    fn interrupted(&self) -> bool {
        self.ctx.interrupted.load(Ordering::Relaxed)
    }

    /// Track a market named by slug or URL
    pub async fn track_input(&self, input: &str) -> Result<TrackReport> {
        let Some(slug) = slug_from_input(input) else {
            anyhow::bail!("Could not read a market slug from '{}'", input);
        };
        self.track(&slug, None).await
    }

    /// Continuous mode: current window, then the next, until interrupted
    pub async fn run(&self) -> Result<()> {
        let config = &self.ctx.config;
        info!(
            "Continuous mode: {:?} windows of {}s, prefix {}, saving to {}",
            config.policy,
            config.window_secs,
            config.slug_prefix,
            self.ctx.store.dir().display()
        );

        while !self.interrupted() {
            let window = TimeWindow::resolve(self.ctx.clock.now(), config.window_secs, config.policy);
            let slug = window.slug(&config.slug_prefix, config.policy);

            match self.track(&slug, Some(window)).await {
                Ok(TrackReport::NotFound { slug }) => info!("No market for {} yet", slug),
                Ok(report) => debug!("Finished {}: {:?}", slug, report),
                Err(e) => error!("Tracking {} failed: {:#}", slug, e),
            }

            if self.interrupted() {
                break;
            }
            self.ctx.clock.sleep(config.run_gap).await;
        }

        info!("Tracker stopped");
        Ok(())
    }

    /// Track one window to completion
    ///
    /// `window` is derived from the market's end date (or the slug) when not given.
    pub async fn track(&self, slug: &str, window: Option<TimeWindow>) -> Result<TrackReport> {
        let ctx = &self.ctx;
        let config = &ctx.config;

        let market = match ctx.lookup.resolve(slug).await {
            ResolveResult::Ok(market) => market,
            ResolveResult::NotFound { slug, message } => {
                warn!("Market not found: {} ({})", slug, message);
                return Ok(TrackReport::NotFound { slug });
            }
        };

        let window = window
            .or_else(|| window_for_slug(&market.slug, market.end_ts(), config.window_secs, config.policy))
            .unwrap_or_else(|| {
                warn!("No end date or timestamp for {}, using the current window", market.slug);
                TimeWindow::resolve(ctx.clock.now(), config.window_secs, config.policy)
            });

        info!("Tracking {}: {}", market.slug, market.question);
        info!(
            "Window {} -> {} ({}s left)",
            window.start,
            window.end,
            window.remaining(ctx.clock.now())
        );
        for token in &market.tokens {
            info!("  {} token: {}", token.label, token.id);
        }

        let mut session = Session::new(&market.slug, window.end, &market.question);

        let stream = if config.streaming {
            let shutdown = Arc::new(AtomicBool::new(false));
            let (handle, _task) = StreamingPriceCache::with_endpoint(&config.clob_wss, market.token_ids())
                .with_reconnect_delay(config.reconnect_delay)
                .spawn(shutdown.clone());
            Some((handle, shutdown))
        } else {
            None
        };

        let checkpoint_ms = config.checkpoint_interval.as_millis() as i64;
        let mut last_save_ms = ctx.clock.now_ms();
        let mut interrupted = false;

        loop {
            if self.interrupted() {
                interrupted = true;
                break;
            }

            let now = ctx.clock.now();
            let remaining = window.remaining(now);
            let elapsed = window.elapsed(now);

            if session.last_point().map_or(true, |p| now > p.t) {
                let prices = self.sample(&market, stream.as_ref().map(|(h, _)| h)).await;
                debug!(
                    "[{:>3}s elapsed | {:>3}s left] {} pts={}",
                    elapsed,
                    remaining,
                    format_prices(&prices),
                    session.price_history.len() + 1
                );
                session.price_history.push(PricePoint { t: now, elapsed, prices });
            } else {
                debug!("Tick landed on second {} again, skipping", now);
            }

            if remaining <= 0 {
                info!("Window resolved ({} points collected)", session.price_history.len());
                break;
            }

            let now_ms = ctx.clock.now_ms();
            if now_ms - last_save_ms >= checkpoint_ms {
                self.checkpoint(&session).await;
                last_save_ms = now_ms;
            }

            ctx.clock.sleep(config.tick_interval).await;
        }

        if let Some((_, shutdown)) = &stream {
            shutdown.store(true, Ordering::Relaxed);
        }

        if interrupted {
            let path = ctx.store.save(&session).await?;
            info!("Interrupted, saved {} points to {}", session.price_history.len(), path.display());
            return Ok(TrackReport::Interrupted { path, points: session.price_history.len() });
        }

        self.checkpoint(&session).await;

        let outcome = OutcomeResolver::new(config, ctx.lookup.clone(), ctx.clock.clone(), ctx.oracle.clone())
            .with_interrupt(ctx.interrupted.clone())
            .resolve(&market, &session)
            .await;
        outcome.apply(&mut session);

        let path = ctx.store.save(&session).await?;
        info!("Saved: {} (outcome: {:?})", path.display(), session.outcome);

        Ok(TrackReport::Completed { path, points: session.price_history.len(), outcome })
    }

    async fn checkpoint(&self, session: &Session) {
        match self.ctx.store.save(session).await {
            Ok(path) => info!("Checkpoint: {} points -> {}", session.price_history.len(), path.display()),
            Err(e) => warn!("Checkpoint failed: {:#}", e),
        }
    }

    /// One price per token key; stream first, REST for whatever the stream lacks
    ///
    /// Tokens are fetched concurrently and each fetch is cut off after one tick, so a
    /// slow endpoint costs a missing price rather than a late point.
    async fn sample(
        &self,
        market: &MarketDescriptor,
        stream: Option<&PriceCacheHandle>,
    ) -> BTreeMap<String, Option<f64>> {
        let snapshot = stream.map(|h| h.snapshot());
        let budget = self.ctx.config.tick_interval;

        let fetches = market.tokens.iter().map(|token| {
            let streamed = snapshot.as_ref().and_then(|s| s.get(&token.id).copied().flatten());
            async move {
                if streamed.is_some() {
                    return streamed;
                }
                match tokio::time::timeout(budget, self.ctx.prices.price(&token.id)).await {
                    Ok(price) => price,
                    Err(_) => {
                        debug!("No price for {} within {}ms", token.key, budget.as_millis());
                        None
                    }
                }
            }
        });
        let fetched = join_all(fetches).await;

        let mut prices: BTreeMap<String, Option<f64>> =
            market.tokens.iter().map(|t| t.key.clone()).zip(fetched).collect();

        if market.is_binary() {
            fill_complement(&mut prices);
        }
        prices
    }
}

/// Fill a missing `up`/`down` side from the other one
pub fn fill_complement(prices: &mut BTreeMap<String, Option<f64>>) {
    let up = prices.get("up").copied().flatten();
    let down = prices.get("down").copied().flatten();
    match (up, down) {
        (Some(u), None) => {
            prices.insert("down".to_string(), Some(complement(u)));
        }
        (None, Some(d)) => {
            prices.insert("up".to_string(), Some(complement(d)));
        }
        _ => {}
    }
}

fn format_prices(prices: &BTreeMap<String, Option<f64>>) -> String {
    prices
        .iter()
        .map(|(key, price)| match price {
            Some(p) => format!("{}={:.4}", key, p),
            None => format!("{}=N/A", key),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

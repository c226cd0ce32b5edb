//! Streaming price cache over the Polymarket market channel
//!
//! Endpoint: wss://ws-subscriptions-clob.polymarket.com/ws/market
//!
//! # Features
//! - Subscribe to the tracked asset_ids (no auth required)
//! - Pull `(token_id, price)` pairs out of any message shape we recognize
//! - Listener task owns the price map and publishes snapshots on a watch channel
//! - Fixed-delay reconnection until the shutdown flag is set
//!
//! # Source
//! - WSS Overview: https://docs.polymarket.com/developers/CLOB/websocket/wss-overview
//! - Market Channel: https://docs.polymarket.com/developers/CLOB/websocket/market-channel

use anyhow::{Context, Result};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::price::book_price;
use crate::types::{valid_price, value_as_f64, value_as_id, StreamStats, SubscribeRequest};

/// Delay between reconnect attempts
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Longest wait on a single read before re-checking shutdown and pinging
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(5);

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;
type WsWrite = SplitSink<WsStream, Message>;
type WsRead = SplitStream<WsStream>;

/// token_id -> last valid price
pub type PriceSnapshot = HashMap<String, Option<f64>>;

/// Read side of the cache; every read is a point-in-time copy
#[derive(Clone)]
pub struct PriceCacheHandle {
    rx: watch::Receiver<PriceSnapshot>,
}

impl PriceCacheHandle {
    pub fn snapshot(&self) -> PriceSnapshot {
        self.rx.borrow().clone()
    }

    pub fn price(&self, token_id: &str) -> Option<f64> {
        self.rx.borrow().get(token_id).copied().flatten()
    }

    /// Wait for the next published update; `false` once the listener is gone
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }
}

/// Price map owned by the listener
#[derive(Debug, Clone)]
pub struct PriceCacheState {
    prices: PriceSnapshot,
}

impl PriceCacheState {
    pub fn new(token_ids: &[String]) -> Self {
        Self { prices: token_ids.iter().map(|id| (id.clone(), None)).collect() }
    }

    pub fn snapshot(&self) -> PriceSnapshot {
        self.prices.clone()
    }

    /// Apply one inbound frame; returns true if any tracked price changed
    pub fn apply_text(&mut self, text: &str, stats: &mut StreamStats) -> bool {
        let value: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(_) => {
                stats.record_type(None);
                stats.dropped_entries += 1;
                return false;
            }
        };

        let event_type = match &value {
            Value::Array(_) => Some("_array"),
            other => other.get("event_type").and_then(Value::as_str),
        };
        stats.record_type(event_type);

        let mut changed = false;
        for (token_id, price) in extract_prices(&value) {
            match self.prices.get_mut(&token_id) {
                Some(slot) => {
                    stats.price_updates += 1;
                    if *slot != Some(price) {
                        *slot = Some(price);
                        changed = true;
                    }
                }
                None => stats.dropped_entries += 1,
            }
        }
        changed
    }
}

/// Extract `(token_id, price)` pairs from a market channel payload
///
/// Accepts single events or arrays of events, descends into `price_changes`, and reads
/// the token id from `asset_id`/`token_id`/`tokenId`. Entries without a valid price in
/// `(0.001, 0.999)` are skipped.
pub fn extract_prices(msg: &Value) -> Vec<(String, f64)> {
    let mut out = Vec::new();
    collect_prices(msg, None, &mut out);
    out
}

fn collect_prices(value: &Value, inherited_id: Option<&str>, out: &mut Vec<(String, f64)>) {
    match value {
        Value::Array(items) => {
            for item in items {
                collect_prices(item, inherited_id, out);
            }
        }
        Value::Object(map) => {
            let id = ["asset_id", "token_id", "tokenId", "assetId"]
                .iter()
                .find_map(|k| map.get(*k).and_then(value_as_id))
                .or_else(|| inherited_id.map(str::to_string));

            if let Some(changes) = map.get("price_changes") {
                collect_prices(changes, id.as_deref(), out);
            }

            if let Some(id) = id {
                if let Some(price) = object_price(value) {
                    out.push((id, price));
                }
            }
        }
        _ => {}
    }
}

fn object_price(obj: &Value) -> Option<f64> {
    let bid = obj.get("best_bid").and_then(value_as_f64);
    let ask = obj.get("best_ask").and_then(value_as_f64);
    if let (Some(b), Some(a)) = (bid, ask) {
        if let Some(p) = valid_price((b + a) / 2.0) {
            return Some(p);
        }
    }

    for key in ["price", "mid", "midpoint", "last_trade_price"] {
        if let Some(p) = obj.get(key).and_then(value_as_f64).and_then(valid_price) {
            return Some(p);
        }
    }

    if ["bids", "asks", "buys", "sells"].iter().any(|k| obj.get(*k).is_some()) {
        if let Some(p) = book_price(obj) {
            return Some(p);
        }
    }

    bid.or(ask).and_then(valid_price)
}

/// Background market channel listener
pub struct StreamingPriceCache {
    endpoint: String,
    token_ids: Vec<String>,
    reconnect_delay: Duration,
    read_timeout: Duration,
}

impl StreamingPriceCache {
    /// Listener for `endpoint` (`CLOB_WSS_ENDPOINT` in production)
    pub fn with_endpoint(endpoint: &str, token_ids: Vec<String>) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            token_ids,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Start the listener task; it runs until `shutdown` is set
    pub fn spawn(self, shutdown: Arc<AtomicBool>) -> (PriceCacheHandle, JoinHandle<StreamStats>) {
        let state = PriceCacheState::new(&self.token_ids);
        let (tx, rx) = watch::channel(state.snapshot());
        let task = tokio::spawn(self.run(state, tx, shutdown));
        (PriceCacheHandle { rx }, task)
    }

    async fn run(
        self,
        mut state: PriceCacheState,
        tx: watch::Sender<PriceSnapshot>,
        shutdown: Arc<AtomicBool>,
    ) -> StreamStats {
        let mut stats = StreamStats::new();

        info!("Starting market channel listener for {} token(s)", self.token_ids.len());

        while !shutdown.load(Ordering::Relaxed) {
            match self.connect_and_subscribe().await {
                Ok((mut write, mut read)) => {
                    info!("Connected and subscribed to market channel");

                    while !shutdown.load(Ordering::Relaxed) {
                        let msg = tokio::time::timeout(self.read_timeout, read.next()).await;

                        match msg {
                            Ok(Some(Ok(Message::Text(text)))) => {
                                if state.apply_text(text.as_str(), &mut stats) {
                                    tx.send_replace(state.snapshot());
                                }
                            }
                            Ok(Some(Ok(Message::Ping(data)))) => {
                                if let Err(e) = write.send(Message::Pong(data)).await {
                                    warn!("Failed to send pong: {}", e);
                                }
                            }
                            Ok(Some(Ok(Message::Close(_)))) => {
                                info!("Server closed connection");
                                break;
                            }
                            Ok(Some(Ok(_))) => {
                                // Binary, pong and raw frames carry no prices
                            }
                            Ok(Some(Err(e))) => {
                                warn!("WebSocket error: {}", e);
                                break;
                            }
                            Ok(None) => {
                                info!("WebSocket stream ended");
                                break;
                            }
                            Err(_) => {
                                debug!("Read timeout, sending ping");
                                if let Err(e) = write.send(Message::Ping(vec![].into())).await {
                                    warn!("Failed to send ping: {}", e);
                                    break;
                                }
                            }
                        }
                    }
                }
                Err(e) => {
                    error!("Connection failed: {:#}", e);
                }
            }

            if shutdown.load(Ordering::Relaxed) {
                break;
            }

            stats.reconnects += 1;
            warn!("Reconnecting in {}ms...", self.reconnect_delay.as_millis());
            tokio::time::sleep(self.reconnect_delay).await;
        }

        info!(
            "Market listener stopped. Messages: {}, price updates: {}, dropped: {}, reconnects: {}",
            stats.total_messages, stats.price_updates, stats.dropped_entries, stats.reconnects
        );
        let mut by_type: Vec<_> = stats.type_counts.iter().collect();
        by_type.sort();
        debug!("Message types: {:?}", by_type);

        stats
    }

    /// Connect and subscribe to the market channel
    async fn connect_and_subscribe(&self) -> Result<(WsWrite, WsRead)> {
        info!("Connecting to {}", self.endpoint);

        let (ws_stream, response) = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(&self.endpoint))
            .await
            .context("WebSocket connection timed out")?
            .context("WebSocket connection failed")?;

        debug!("WebSocket connected, status: {}", response.status());

        let (mut write, read) = ws_stream.split();

        let subscribe_req = SubscribeRequest::market(self.token_ids.clone(), true);
        let subscribe_json = serde_json::to_string(&subscribe_req)?;

        debug!("Subscribe request: {}", subscribe_json);

        write
            .send(Message::Text(subscribe_json.into()))
            .await
            .context("Failed to send subscribe request")?;

        Ok((write, read))
    }
}

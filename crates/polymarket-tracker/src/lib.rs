//! Polymarket window session tracker
//!
//! Samples a rolling up/down market's two-sided price across its resolution window,
//! records the series, settles the outcome and persists one JSON session per market.
//!
//! - `window`: window arithmetic and slug derivation
//! - `gamma`: market lookup and token/label normalization
//! - `price`: REST price fallback chain
//! - `httpws`: CLOB REST client, retry policy, market channel price cache
//! - `tracker`: sampling loop and continuous mode
//! - `store`: merge-on-save session files
//! - `outcome`: settlement polling, manual oracle, optional price inference
//!
//! # Official Documentation
//! - Endpoints: https://docs.polymarket.com/quickstart/reference/endpoints
//! - Market Channel: https://docs.polymarket.com/developers/CLOB/websocket/market-channel
//! - Gamma Structure: https://docs.polymarket.com/developers/gamma-markets-api/gamma-structure

pub mod clock;
pub mod config;
pub mod gamma;
pub mod httpws;
pub mod outcome;
pub mod price;
pub mod store;
pub mod tracker;
pub mod types;
pub mod window;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::TrackerConfig;
pub use outcome::{CannedOracle, NoOracle, OutcomeOracle, OutcomeResolver, OutcomeState};
pub use store::SessionStore;
pub use tracker::{TrackReport, Tracker, TrackerContext};
pub use types::*;
pub use window::{TimeWindow, WindowPolicy};

/// Official CLOB REST API base URL
/// Source: https://docs.polymarket.com/quickstart/reference/endpoints
pub const CLOB_REST_BASE: &str = "https://clob.polymarket.com";

/// Official Gamma API base URL (market discovery)
/// Source: https://docs.polymarket.com/quickstart/reference/endpoints
pub const GAMMA_API_BASE: &str = "https://gamma-api.polymarket.com";

/// Official CLOB WebSocket endpoint for Market Channel
/// Source: https://docs.polymarket.com/developers/CLOB/websocket/market-channel
pub const CLOB_WSS_ENDPOINT: &str = "wss://ws-subscriptions-clob.polymarket.com/ws/market";

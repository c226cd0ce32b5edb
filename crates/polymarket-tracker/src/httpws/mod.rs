//! HTTP/WebSocket transport
//!
//! Custom implementation using reqwest + tokio-tungstenite:
//! - `rest`: CLOB REST lookups (midpoint, price, book)
//! - `retry`: explicit retry/backoff policy shared by the REST clients
//! - `ws_market`: market channel listener feeding the streaming price cache

pub mod rest;
pub mod retry;
pub mod ws_market;

pub use rest::*;
pub use retry::*;
pub use ws_market::*;

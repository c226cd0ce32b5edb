//! Gamma API client and Market Resolver
//!
//! # Components
//! - `GammaClient`: REST client for Gamma API (market metadata by slug)
//! - `MarketResolver`: slug -> `MarketDescriptor` with token/label normalization
//!
//! # Source
//! - Gamma Structure: https://docs.polymarket.com/developers/gamma-markets-api/gamma-structure
//! - Gamma Endpoints: https://docs.polymarket.com/developers/gamma-markets-api/markets

mod client;
pub mod resolver;

pub use client::GammaClient;
pub use resolver::{describe, MarketLookup, MarketResolver};

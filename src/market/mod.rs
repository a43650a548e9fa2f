// src/market/mod.rs
//! Market quotes, read through the process cache with a short TTL.

pub mod provider;
pub mod service;

pub use provider::{AssetType, HttpQuoteProvider, MarketQuote, QuoteProvider};
pub use service::{quote_cache_key, MarketDataService, DEFAULT_QUOTE_TTL};

// src/market/provider.rs
//! Upstream market-data provider. Quotes are passed through as-is; no financial
//! interpretation happens here.

use crate::error::CoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetType {
    Stock,
    Crypto,
    Etf,
    Forex,
}

impl AssetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetType::Stock => "stock",
            AssetType::Crypto => "crypto",
            AssetType::Etf => "etf",
            AssetType::Forex => "forex",
        }
    }
}

impl fmt::Display for AssetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AssetType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stock" | "equity" => Ok(AssetType::Stock),
            "crypto" => Ok(AssetType::Crypto),
            "etf" => Ok(AssetType::Etf),
            "forex" | "fx" => Ok(AssetType::Forex),
            other => Err(CoreError::Parse(format!("Unknown asset type: {}", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketQuote {
    pub symbol: String,
    pub asset_type: AssetType,
    pub price: f64,
    pub change: f64,
    pub change_percent: f64,
    pub volume: u64,
    pub fetched_at: DateTime<Utc>,
}

#[async_trait]
pub trait QuoteProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch_quote(&self, symbol: &str, asset_type: AssetType) -> Result<MarketQuote, CoreError>;
}

/// Provider body; only `price` is mandatory.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuoteBody {
    price: Option<f64>,
    #[serde(default)]
    change: Option<f64>,
    #[serde(default, alias = "changePct", alias = "percentChange")]
    change_percent: Option<f64>,
    #[serde(default)]
    volume: Option<f64>,
}

/// JSON quote endpoint: `GET {base_url}/quote?symbol=..&type=..`.
pub struct HttpQuoteProvider {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl HttpQuoteProvider {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, timeout: Duration) -> Result<Self, CoreError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            client,
        })
    }
}

#[async_trait]
impl QuoteProvider for HttpQuoteProvider {
    fn name(&self) -> &str {
        &self.base_url
    }

    async fn fetch_quote(&self, symbol: &str, asset_type: AssetType) -> Result<MarketQuote, CoreError> {
        let url = format!("{}/quote", self.base_url);
        debug!("Fetching {} quote for {} from {}", asset_type, symbol, url);

        let mut request = self
            .client
            .get(&url)
            .query(&[("symbol", symbol), ("type", asset_type.as_str())]);
        if let Some(key) = &self.api_key {
            request = request.header("x-api-key", key);
        }
        let body: QuoteBody = request.send().await?.error_for_status()?.json().await?;
        quote_from_body(symbol, asset_type, body)
    }
}

fn quote_from_body(symbol: &str, asset_type: AssetType, body: QuoteBody) -> Result<MarketQuote, CoreError> {
    let price = body
        .price
        .filter(|p| p.is_finite())
        .ok_or_else(|| CoreError::Upstream(format!("Quote for {} has no price", symbol)))?;
    Ok(MarketQuote {
        symbol: symbol.to_string(),
        asset_type,
        price,
        change: body.change.unwrap_or(0.0),
        change_percent: body.change_percent.unwrap_or(0.0),
        volume: body.volume.filter(|v| v.is_finite() && *v > 0.0).map(|v| v as u64).unwrap_or(0),
        fetched_at: Utc::now(),
    })
}

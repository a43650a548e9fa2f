// src/market/service.rs
//! Cached quote reads. Each request fills the cache directly under a key derived from
//! its parameters; there is no background refresh for quotes.

use super::provider::{AssetType, MarketQuote, QuoteProvider};
use crate::cache::{cache_key, AppCache};
use crate::error::CoreError;
use futures::future::join_all;
use log::{debug, warn};
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_QUOTE_TTL: Duration = Duration::from_secs(30);

pub fn quote_cache_key(symbol: &str, asset_type: AssetType) -> String {
    cache_key("market", &[asset_type.as_str(), symbol])
}

pub struct MarketDataService {
    cache: Arc<AppCache>,
    provider: Option<Arc<dyn QuoteProvider>>,
    ttl: Duration,
}

impl MarketDataService {
    pub fn new(cache: Arc<AppCache>, provider: Option<Arc<dyn QuoteProvider>>, ttl: Duration) -> Self {
        Self { cache, provider, ttl }
    }

    pub fn is_enabled(&self) -> bool {
        self.provider.is_some()
    }

    /// Cached quote, fetching on miss. Errors from the provider are returned and
    /// nothing is cached for them.
    pub async fn try_quote(&self, symbol: &str, asset_type: AssetType) -> Result<MarketQuote, CoreError> {
        let provider = self
            .provider
            .as_ref()
            .ok_or_else(|| CoreError::Config("No market data provider configured".to_string()))?;
        let symbol = symbol.trim().to_ascii_uppercase();
        if symbol.is_empty() {
            return Err(CoreError::Parse("Empty symbol".to_string()));
        }

        let key = quote_cache_key(&symbol, asset_type);
        self.cache
            .memoize_json(&key, self.ttl, || provider.fetch_quote(&symbol, asset_type))
            .await
    }

    /// `try_quote`, with any failure logged and reported as "no data".
    pub async fn quote(&self, symbol: &str, asset_type: AssetType) -> Option<MarketQuote> {
        match self.try_quote(symbol, asset_type).await {
            Ok(quote) => Some(quote),
            Err(CoreError::Config(msg)) => {
                debug!("Quote for {} skipped: {}", symbol, msg);
                None
            }
            Err(e) => {
                warn!("Quote for {} ({}) unavailable: {}", symbol, asset_type, e);
                None
            }
        }
    }

    /// Several quotes fetched concurrently, in request order.
    pub async fn quotes(&self, requests: &[(String, AssetType)]) -> Vec<Option<MarketQuote>> {
        join_all(
            requests
                .iter()
                .map(|(symbol, asset_type)| self.quote(symbol, *asset_type)),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingProvider {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl QuoteProvider for CountingProvider {
        fn name(&self) -> &str {
            "counting"
        }

        async fn fetch_quote(&self, symbol: &str, asset_type: AssetType) -> Result<MarketQuote, CoreError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(CoreError::Timeout("provider hung".into()));
            }
            Ok(MarketQuote {
                symbol: symbol.to_string(),
                asset_type,
                price: 100.0 + n as f64,
                change: 0.5,
                change_percent: 0.5,
                volume: 10,
                fetched_at: Utc::now(),
            })
        }
    }

    fn service(fail: bool) -> (MarketDataService, Arc<CountingProvider>, Arc<AppCache>) {
        let provider = Arc::new(CountingProvider { calls: AtomicUsize::new(0), fail });
        let cache = Arc::new(AppCache::default());
        let service = MarketDataService::new(cache.clone(), Some(provider.clone() as Arc<dyn QuoteProvider>), DEFAULT_QUOTE_TTL);
        (service, provider, cache)
    }

    #[tokio::test]
    async fn test_quote_is_cached_per_symbol_and_type() {
        let (service, provider, cache) = service(false);

        let first = service.quote("aapl", AssetType::Stock).await.unwrap();
        let second = service.quote(" AAPL ", AssetType::Stock).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.symbol, "AAPL");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        assert!(cache.has("market:stock:AAPL"));

        service.quote("AAPL", AssetType::Crypto).await.unwrap();
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_quote_expires_after_ttl() {
        let (service, provider, _) = service(false);
        service.quote("BTC", AssetType::Crypto).await;
        tokio::time::advance(DEFAULT_QUOTE_TTL).await;
        let refreshed = service.quote("BTC", AssetType::Crypto).await.unwrap();
        assert_eq!(refreshed.price, 101.0);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failure_is_no_data_and_not_cached() {
        let (service, provider, cache) = service(true);
        assert_eq!(service.quote("TSLA", AssetType::Stock).await, None);
        assert!(matches!(
            service.try_quote("TSLA", AssetType::Stock).await,
            Err(CoreError::Timeout(_))
        ));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_batch_preserves_order() {
        let (service, _, _) = service(false);
        let requests = vec![
            ("MSFT".to_string(), AssetType::Stock),
            ("ETH".to_string(), AssetType::Crypto),
        ];
        let quotes = service.quotes(&requests).await;
        let symbols: Vec<_> = quotes.iter().map(|q| q.as_ref().unwrap().symbol.as_str()).collect();
        assert_eq!(symbols, vec!["MSFT", "ETH"]);
    }

    #[tokio::test]
    async fn test_disabled_without_provider() {
        let service = MarketDataService::new(Arc::new(AppCache::default()), None, DEFAULT_QUOTE_TTL);
        assert!(!service.is_enabled());
        assert_eq!(service.quote("AAPL", AssetType::Stock).await, None);
    }
}

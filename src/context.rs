// src/context.rs
//! Wiring for the process-wide components. Built once at startup and shared by `Arc`;
//! tests build their own.

use crate::api::{self, client_identifier, RateLimitConfig, RateLimitDecision, RateLimiterManager};
use crate::cache::{self, AppCache};
use crate::config::Config;
use crate::error::CoreError;
use crate::market::{HttpQuoteProvider, MarketDataService, QuoteProvider};
use crate::news::{FeedSource, FileSnapshotStore, HttpFeedSource, NewsRefreshJob, RefreshConfig, SnapshotStore};
use log::{debug, info};
use reqwest::header::HeaderMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;

pub struct AppContext {
    pub config: Arc<Config>,
    pub cache: Arc<AppCache>,
    pub limiters: Arc<RateLimiterManager>,
    pub news: Arc<NewsRefreshJob>,
    pub market: Arc<MarketDataService>,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl AppContext {
    /// Builds every component from `config` with HTTP upstreams.
    pub fn build(config: Arc<Config>) -> Result<Self, CoreError> {
        let timeout = config.upstream_timeout();
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("finboard-core/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let sources: Vec<Arc<dyn FeedSource>> = config
            .news_feeds
            .iter()
            .map(|feed| Arc::new(HttpFeedSource::from_config(feed, client.clone())) as Arc<dyn FeedSource>)
            .collect();

        let provider = match &config.market_data_url {
            Some(url) => Some(Arc::new(HttpQuoteProvider::new(
                url.clone(),
                config.market_data_api_key.clone(),
                timeout,
            )?) as Arc<dyn QuoteProvider>),
            None => None,
        };

        let store = config
            .news_snapshot_path
            .as_ref()
            .map(|path| Arc::new(FileSnapshotStore::new(path.clone())) as Arc<dyn SnapshotStore>);

        Ok(Self::with_components(config, sources, store, provider))
    }

    /// Builds the context around caller-supplied upstreams.
    pub fn with_components(
        config: Arc<Config>,
        sources: Vec<Arc<dyn FeedSource>>,
        store: Option<Arc<dyn SnapshotStore>>,
        provider: Option<Arc<dyn QuoteProvider>>,
    ) -> Self {
        let cache = Arc::new(AppCache::new(config.cache_capacity, config.cache_default_ttl()));

        let limiters = Arc::new(RateLimiterManager::with_standard_limiters(
            RateLimitConfig::new(
                config.api_rate_limit_max,
                Duration::from_secs(config.api_rate_limit_window_secs),
            ),
            RateLimitConfig::new(
                config.news_rate_limit_max,
                Duration::from_secs(config.news_rate_limit_window_secs),
            ),
            RateLimitConfig::new(
                config.auth_rate_limit_max,
                Duration::from_secs(config.auth_rate_limit_window_secs),
            ),
        ));

        let news = Arc::new(NewsRefreshJob::new(
            sources,
            cache.clone(),
            store,
            RefreshConfig::from_config(&config),
        ));

        let market = Arc::new(MarketDataService::new(
            cache.clone(),
            provider,
            Duration::from_secs(config.market_quote_ttl_secs),
        ));

        Self {
            config,
            cache,
            limiters,
            news,
            market,
            background: Mutex::new(Vec::new()),
        }
    }

    /// Spawns the cache sweeper and limiter cleaner, restores the stored snapshot,
    /// then starts the news schedule. Calling it again only re-logs the duplicate
    /// start of the news job.
    pub async fn start(&self) {
        {
            let mut background = self.background.lock().unwrap_or_else(PoisonError::into_inner);
            if background.is_empty() {
                background.push(cache::spawn_sweeper(
                    &self.cache,
                    Duration::from_secs(self.config.cache_sweep_interval_secs),
                ));
                background.push(api::spawn_cleaner(
                    &self.limiters,
                    Duration::from_secs(self.config.rate_limit_cleanup_interval_secs),
                ));
            }
        }

        self.news.restore_or_warn().await;
        self.news.start();
        info!("Application context started");
    }

    /// Admission check for a request in the `limiter` pool, keyed by the client address
    /// found in `headers`.
    pub fn check_rate_limit(&self, limiter: &str, headers: &HeaderMap) -> Result<RateLimitDecision, CoreError> {
        let client = client_identifier(headers);
        let decision = self.limiters.check(limiter, &client)?;
        if !decision.allowed {
            debug!(
                "Rate limit hit in '{}' for {} (retry in {}s)",
                limiter,
                client,
                decision.retry_after_secs()
            );
        }
        Ok(decision)
    }

    /// Stops the news schedule and background maintenance tasks.
    pub fn shutdown(&self) {
        self.news.stop();
        let mut background = self.background.lock().unwrap_or_else(PoisonError::into_inner);
        for handle in background.drain(..) {
            handle.abort();
        }
        info!("Application context shut down");
    }
}

// src/news/refresh.rs
//! Scheduled news refresh.
//!
//! One pass fans out to every configured feed concurrently, flattens the results in
//! source order, drops case-insensitive duplicate titles, then publishes a random
//! selection as the new snapshot. Each feed is its own failure domain: an error,
//! timeout or panic in one feed contributes zero items and never aborts the pass.
//!
//! An empty pass publishes nothing (the previous snapshot keeps serving) and schedules
//! one supplementary pass after `retry_delay`.

use super::sources::FeedSource;
use super::store::SnapshotStore;
use super::types::{dedup_by_title, select_items, NewsItem, NewsSnapshot};
use crate::cache::AppCache;
use crate::config::Config;
use crate::utils::clamp_period;
use chrono::Utc;
use futures::future::join_all;
use log::{debug, error, info, warn};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};

/// Cache key of the published snapshot
pub const NEWS_SNAPSHOT_KEY: &str = "news:latest";

#[derive(Debug, Clone)]
pub struct RefreshConfig {
    /// Period between scheduled passes
    pub interval: Duration,
    /// Delay before the supplementary pass after an empty one
    pub retry_delay: Duration,
    pub min_items: usize,
    pub max_items: usize,
    /// Ceiling on each feed fetch
    pub fetch_timeout: Duration,
    /// Lifetime of the snapshot's cache entry
    pub snapshot_ttl: Duration,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15 * 60),
            retry_delay: Duration::from_secs(60),
            min_items: 5,
            max_items: 10,
            fetch_timeout: Duration::from_secs(10),
            snapshot_ttl: Duration::from_secs(30 * 60),
        }
    }
}

impl RefreshConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            interval: config.news_refresh_interval(),
            retry_delay: Duration::from_secs(config.news_retry_delay_secs),
            min_items: config.news_min_items,
            max_items: config.news_max_items,
            fetch_timeout: config.upstream_timeout(),
            snapshot_ttl: Duration::from_secs(config.news_snapshot_ttl_secs),
        }
    }
}

/// Result of one refresh pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Published { items: usize },
    Empty { retry_scheduled: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PassTrigger {
    Scheduled,
    Forced,
    Retry,
}

impl fmt::Display for PassTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PassTrigger::Scheduled => "scheduled",
            PassTrigger::Forced => "forced",
            PassTrigger::Retry => "retry",
        };
        f.write_str(label)
    }
}

pub struct NewsRefreshJob {
    sources: Vec<Arc<dyn FeedSource>>,
    cache: Arc<AppCache>,
    store: Option<Arc<dyn SnapshotStore>>,
    config: RefreshConfig,
    current: RwLock<Option<Arc<NewsSnapshot>>>,
    /// Set once the store has been read, so reads stop falling through to it
    store_checked: AtomicBool,
    started: AtomicBool,
    retry_pending: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl NewsRefreshJob {
    pub fn new(
        sources: Vec<Arc<dyn FeedSource>>,
        cache: Arc<AppCache>,
        store: Option<Arc<dyn SnapshotStore>>,
        config: RefreshConfig,
    ) -> Self {
        info!(
            "News refresh job configured: {} sources, every {:?}, store: {}",
            sources.len(),
            config.interval,
            store.as_ref().map(|s| s.describe()).unwrap_or_else(|| "none".to_string())
        );
        Self {
            sources,
            cache,
            store,
            config,
            current: RwLock::new(None),
            store_checked: AtomicBool::new(false),
            started: AtomicBool::new(false),
            retry_pending: AtomicBool::new(false),
            task: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &RefreshConfig {
        &self.config
    }

    pub fn source_names(&self) -> Vec<String> {
        self.sources.iter().map(|s| s.name().to_string()).collect()
    }

    /// Starts the periodic schedule with an immediate first pass. Returns `false`
    /// (and does nothing) if the job is already running.
    pub fn start(self: &Arc<Self>) -> bool {
        if self
            .started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            info!("News refresh job already running; start ignored");
            return false;
        }

        let job: Weak<Self> = Arc::downgrade(self);
        let period = clamp_period(self.config.interval);
        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(active) = job.upgrade() else { break };
                active.run_pass(PassTrigger::Scheduled).await;
            }
            debug!("News refresh schedule stopped");
        });

        *self.task.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        info!("News refresh job started (period {:?})", period);
        true
    }

    /// Stops the periodic schedule. A pending supplementary retry still runs.
    pub fn stop(&self) {
        if let Some(handle) = self.task.lock().unwrap_or_else(PoisonError::into_inner).take() {
            handle.abort();
            info!("News refresh job stopped");
        }
        self.started.store(false, Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    pub fn retry_pending(&self) -> bool {
        self.retry_pending.load(Ordering::Acquire)
    }

    /// Runs one pass now, outside the schedule, and waits for it to finish. The
    /// periodic timer is unaffected.
    pub async fn force_now(self: &Arc<Self>) -> RefreshOutcome {
        self.run_pass(PassTrigger::Forced).await
    }

    /// Latest snapshot: the cache first, then the in-memory published snapshot, then
    /// the secondary store (cold start, read at most once). `None` until something has
    /// been published or restored.
    pub async fn snapshot(&self) -> Option<Arc<NewsSnapshot>> {
        if let Some(snapshot) = self.cached_snapshot() {
            return Some(snapshot);
        }
        if let Some(snapshot) = self.current_snapshot() {
            self.write_cache(&snapshot);
            return Some(snapshot);
        }
        if self.store_checked.load(Ordering::Acquire) {
            return None;
        }
        match self.restore().await {
            Ok(_) => self.current_snapshot(),
            Err(e) => {
                warn!("Could not load stored snapshot: {}", e);
                None
            }
        }
    }

    /// `snapshot()`, or an empty snapshot when nothing has been published yet.
    pub async fn snapshot_or_empty(&self) -> Arc<NewsSnapshot> {
        self.snapshot()
            .await
            .unwrap_or_else(|| Arc::new(NewsSnapshot::empty()))
    }

    /// The snapshot published by this process, without consulting the cache or store.
    pub fn current_snapshot(&self) -> Option<Arc<NewsSnapshot>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Loads the stored snapshot into memory and the cache, unless this process has
    /// already published one. Returns whether a snapshot was installed.
    pub async fn restore(&self) -> Result<bool, crate::error::CoreError> {
        let Some(store) = &self.store else {
            return Ok(false);
        };
        self.store_checked.store(true, Ordering::Release);
        let Some(stored) = store.load().await? else {
            return Ok(false);
        };
        let stored = Arc::new(stored);
        {
            let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
            if current.is_some() {
                return Ok(false);
            }
            *current = Some(stored.clone());
        }
        self.write_cache(&stored);
        info!("Restored news snapshot with {} items from {}", stored.len(), store.describe());
        Ok(true)
    }

    /// `restore`, with a store failure logged instead of returned.
    pub async fn restore_or_warn(&self) -> bool {
        match self.restore().await {
            Ok(installed) => installed,
            Err(e) => {
                warn!("Stored news snapshot unavailable: {}", e);
                false
            }
        }
    }

    fn cached_snapshot(&self) -> Option<Arc<NewsSnapshot>> {
        match self.cache.get_json::<NewsSnapshot>(NEWS_SNAPSHOT_KEY) {
            Ok(snapshot) => snapshot.map(Arc::new),
            Err(e) => {
                warn!("Ignoring unreadable cached snapshot: {}", e);
                None
            }
        }
    }

    fn write_cache(&self, snapshot: &NewsSnapshot) {
        if let Err(e) = self
            .cache
            .set_json(NEWS_SNAPSHOT_KEY, snapshot, Some(self.config.snapshot_ttl))
        {
            error!("Failed to cache news snapshot: {}", e);
        }
    }

    async fn run_pass(self: &Arc<Self>, trigger: PassTrigger) -> RefreshOutcome {
        let started = tokio::time::Instant::now();
        let pool = self.collect_items().await;

        if pool.is_empty() {
            let retry_scheduled = trigger != PassTrigger::Retry && self.schedule_retry();
            warn!(
                "News refresh ({}) found no items; keeping previous snapshot{}",
                trigger,
                if retry_scheduled { ", retry scheduled" } else { "" }
            );
            return RefreshOutcome::Empty { retry_scheduled };
        }

        let pooled = pool.len();
        let selection = select_items(pool, self.config.min_items, self.config.max_items, &mut rand::thread_rng());
        let snapshot = NewsSnapshot::published(selection, Utc::now());
        let published = snapshot.len();
        self.publish(snapshot).await;

        info!(
            "News refresh ({}) published {} of {} unique items in {:?}",
            trigger,
            published,
            pooled,
            started.elapsed()
        );
        RefreshOutcome::Published { items: published }
    }

    /// Fetches every source concurrently; results keep source order.
    async fn collect_items(&self) -> Vec<NewsItem> {
        let timeout = self.config.fetch_timeout;
        let fetches: Vec<_> = self
            .sources
            .iter()
            .map(|source| {
                let source = Arc::clone(source);
                tokio::spawn(async move { tokio::time::timeout(timeout, source.fetch()).await })
            })
            .collect();

        let results = join_all(fetches).await;
        let mut per_source = Vec::with_capacity(results.len());
        for (source, result) in self.sources.iter().zip(results) {
            let items = match result {
                Ok(Ok(Ok(items))) => {
                    debug!("Feed '{}' returned {} items", source.name(), items.len());
                    items
                }
                Ok(Ok(Err(e))) => {
                    warn!("Feed '{}' failed ({}): {}", source.name(), e.category(), e);
                    Vec::new()
                }
                Ok(Err(_)) => {
                    warn!("Feed '{}' timed out after {:?}", source.name(), timeout);
                    Vec::new()
                }
                Err(e) => {
                    error!("Feed '{}' task panicked: {}", source.name(), e);
                    Vec::new()
                }
            };
            per_source.push(items);
        }

        dedup_by_title(per_source.into_iter().flatten())
    }

    /// Swaps in the new snapshot, then writes the cache and (best effort) the store.
    async fn publish(&self, snapshot: NewsSnapshot) {
        let snapshot = Arc::new(snapshot);
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(snapshot.clone());
        self.write_cache(&snapshot);

        if let Some(store) = &self.store {
            if let Err(e) = store.save(&snapshot).await {
                error!("Failed to persist news snapshot to {}: {}", store.describe(), e);
            }
        }
    }

    /// Schedules one supplementary pass unless one is already pending.
    fn schedule_retry(self: &Arc<Self>) -> bool {
        if self.retry_pending.swap(true, Ordering::AcqRel) {
            debug!("News refresh retry already pending");
            return false;
        }
        let job: Weak<Self> = Arc::downgrade(self);
        let delay = self.config.retry_delay;
        tokio::spawn(async move {
            sleep(delay).await;
            if let Some(active) = job.upgrade() {
                active.retry_pending.store(false, Ordering::Release);
                active.run_pass(PassTrigger::Retry).await;
            }
        });
        true
    }
}

impl Drop for NewsRefreshJob {
    fn drop(&mut self) {
        let task = self.task.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = task.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;
    use crate::news::types::sample_item;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    struct FixedSource {
        name: String,
        titles: Vec<&'static str>,
        calls: AtomicUsize,
    }

    impl FixedSource {
        fn new(name: &str, titles: Vec<&'static str>) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                titles,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl FeedSource for FixedSource {
        fn name(&self) -> &str {
            &self.name
        }

        async fn fetch(&self) -> Result<Vec<NewsItem>, CoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.titles.iter().map(|t| sample_item(&self.name, t)).collect())
        }
    }

    struct FailingSource;

    #[async_trait]
    impl FeedSource for FailingSource {
        fn name(&self) -> &str {
            "broken"
        }

        async fn fetch(&self) -> Result<Vec<NewsItem>, CoreError> {
            Err(CoreError::Network("connection refused".into()))
        }
    }

    fn job(sources: Vec<Arc<dyn FeedSource>>) -> Arc<NewsRefreshJob> {
        Arc::new(NewsRefreshJob::new(
            sources,
            Arc::new(AppCache::default()),
            None,
            RefreshConfig::default(),
        ))
    }

    #[tokio::test]
    async fn test_failing_source_does_not_abort_pass() {
        let good = FixedSource::new("good", vec!["A", "B", "C"]);
        let job = job(vec![Arc::new(FailingSource) as Arc<dyn FeedSource>, good.clone()]);

        assert_eq!(job.force_now().await, RefreshOutcome::Published { items: 3 });
        let snapshot = job.snapshot().await.unwrap();
        assert_eq!(snapshot.len(), 3);
        assert!(snapshot.last_update.is_some());
    }

    #[tokio::test]
    async fn test_duplicate_titles_across_sources_collapse_to_first() {
        let first = FixedSource::new("first", vec!["Fed Raises Rates"]);
        let second = FixedSource::new("second", vec!["fed raises rates"]);
        let job = job(vec![first as Arc<dyn FeedSource>, second]);

        job.force_now().await;
        let snapshot = job.snapshot().await.unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.items[0].source_name, "first");
        assert_eq!(snapshot.items[0].title, "Fed Raises Rates");
    }

    #[tokio::test]
    async fn test_snapshot_is_written_to_cache() {
        let job = job(vec![FixedSource::new("s", vec!["A"]) as Arc<dyn FeedSource>]);
        job.force_now().await;
        let cached: NewsSnapshot = job.cache.get_json(NEWS_SNAPSHOT_KEY).unwrap().unwrap();
        assert_eq!(cached.items[0].title, "A");
    }

    #[tokio::test]
    async fn test_snapshot_survives_cache_expiry() {
        let job = job(vec![FixedSource::new("s", vec!["A", "B"]) as Arc<dyn FeedSource>]);
        job.force_now().await;
        job.cache.delete(NEWS_SNAPSHOT_KEY);

        let snapshot = job.snapshot().await.unwrap();
        assert_eq!(snapshot.len(), 2);
        // read path re-populates the cache
        assert!(job.cache.has(NEWS_SNAPSHOT_KEY));
    }

    #[tokio::test]
    async fn test_no_snapshot_before_first_publish() {
        let job = job(vec![]);
        assert!(job.snapshot().await.is_none());
        assert!(job.snapshot_or_empty().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_is_idempotent_and_runs_immediately() {
        let source = FixedSource::new("s", vec!["A"]);
        let job = job(vec![source.clone() as Arc<dyn FeedSource>]);

        assert!(job.start());
        assert!(!job.start());
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(15 * 60)).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);

        job.stop();
        assert!(!job.is_running());
        tokio::time::sleep(Duration::from_secs(60 * 60)).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    struct CountingStore {
        loads: AtomicUsize,
    }

    #[async_trait]
    impl SnapshotStore for CountingStore {
        async fn load(&self) -> Result<Option<NewsSnapshot>, CoreError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        }

        async fn save(&self, _snapshot: &NewsSnapshot) -> Result<(), CoreError> {
            Ok(())
        }

        fn describe(&self) -> String {
            "counting".to_string()
        }
    }

    #[tokio::test]
    async fn test_cold_reads_consult_store_once() {
        let store = Arc::new(CountingStore { loads: AtomicUsize::new(0) });
        let job = Arc::new(NewsRefreshJob::new(
            vec![Arc::new(FailingSource) as Arc<dyn FeedSource>],
            Arc::new(AppCache::default()),
            Some(store.clone() as Arc<dyn SnapshotStore>),
            RefreshConfig::default(),
        ));

        for _ in 0..5 {
            assert!(job.snapshot().await.is_none());
        }
        assert_eq!(store.loads.load(Ordering::SeqCst), 1);
    }
}

// src/api/rate_limiter.rs
//! Fixed-window rate limiting per client identifier.
//!
//! Each named limiter is an independent quota pool. A window opens on a client's first
//! request, counts up to `max_requests`, and is replaced wholesale by a fresh window on
//! the first request after it ends. Denied requests do not touch the window.

use crate::error::CoreError;
use crate::utils::{clamp_period, deadline_after};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Limiter for general API reads
pub const API_LIMITER: &str = "api";
/// Limiter for the news endpoint
pub const NEWS_LIMITER: &str = "news";
/// Limiter for authentication attempts
pub const AUTH_LIMITER: &str = "auth";

pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window: Duration,
}

impl RateLimitConfig {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self { max_requests, window }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 100,
            window: Duration::from_secs(60),
        }
    }
}

/// Outcome of a single `check`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// Requests left in the current window; 0 when denied
    pub remaining: u32,
    /// Wall-clock end of the current window
    pub reset_at: DateTime<Utc>,
    /// Time until the window ends when denied, zero when allowed
    pub retry_after: Duration,
}

impl RateLimitDecision {
    /// Whole seconds for a `Retry-After` header, never less than one on denial.
    pub fn retry_after_secs(&self) -> u64 {
        if self.allowed {
            return 0;
        }
        let secs = self.retry_after.as_secs();
        if self.retry_after.subsec_nanos() > 0 || secs == 0 {
            secs + 1
        } else {
            secs
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct RateLimitWindow {
    count: u32,
    window_end: Instant,
    reset_at: DateTime<Utc>,
}

impl RateLimitWindow {
    fn open(now: Instant, window: Duration) -> Self {
        let window_end = deadline_after(now, window);
        let reset_at = chrono::Duration::from_std(window_end.duration_since(now))
            .ok()
            .and_then(|remaining| Utc::now().checked_add_signed(remaining))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self {
            count: 0,
            window_end,
            reset_at,
        }
    }
}

/// Rate limiting statistics
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitStats {
    pub name: String,
    pub max_requests: u32,
    pub window_secs: u64,
    pub tracked_clients: usize,
    pub allowed: u64,
    pub denied: u64,
}

impl std::fmt::Display for RateLimitStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {}req/{}s, clients:{}, allowed:{}, denied:{}",
            self.name, self.max_requests, self.window_secs, self.tracked_clients, self.allowed, self.denied
        )
    }
}

/// One named quota pool.
pub struct RateLimiter {
    name: String,
    config: RateLimitConfig,
    windows: DashMap<String, RateLimitWindow>,
    allowed: std::sync::atomic::AtomicU64,
    denied: std::sync::atomic::AtomicU64,
}

impl RateLimiter {
    pub fn new(name: impl Into<String>, config: RateLimitConfig) -> Self {
        let name = name.into();
        info!(
            "Initializing rate limiter '{}': {} requests per {:?}",
            name, config.max_requests, config.window
        );
        Self {
            name,
            config,
            windows: DashMap::new(),
            allowed: Default::default(),
            denied: Default::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> RateLimitConfig {
        self.config
    }

    /// Counts one request from `identifier` against this pool.
    pub fn check(&self, identifier: &str) -> RateLimitDecision {
        use std::sync::atomic::Ordering;

        let now = Instant::now();
        let mut window = self
            .windows
            .entry(identifier.to_string())
            .or_insert_with(|| RateLimitWindow::open(now, self.config.window));

        if now >= window.window_end {
            *window = RateLimitWindow::open(now, self.config.window);
        }

        if window.count >= self.config.max_requests {
            let decision = RateLimitDecision {
                allowed: false,
                remaining: 0,
                reset_at: window.reset_at,
                retry_after: window.window_end.saturating_duration_since(now),
            };
            drop(window);
            self.denied.fetch_add(1, Ordering::Relaxed);
            debug!(
                "Rate limit '{}' denied {} (retry in {:?})",
                self.name, identifier, decision.retry_after
            );
            return decision;
        }

        window.count += 1;
        let decision = RateLimitDecision {
            allowed: true,
            remaining: self.config.max_requests - window.count,
            reset_at: window.reset_at,
            retry_after: Duration::ZERO,
        };
        drop(window);
        self.allowed.fetch_add(1, Ordering::Relaxed);
        decision
    }

    /// Drops windows that have ended; returns how many were removed.
    pub fn cleanup(&self) -> usize {
        let now = Instant::now();
        let before = self.windows.len();
        self.windows.retain(|_, window| now <= window.window_end);
        let removed = before.saturating_sub(self.windows.len());
        if removed > 0 {
            debug!("Rate limiter '{}' cleanup: removed {} expired windows", self.name, removed);
        }
        removed
    }

    pub fn tracked_clients(&self) -> usize {
        self.windows.len()
    }

    pub fn stats(&self) -> RateLimitStats {
        use std::sync::atomic::Ordering;
        RateLimitStats {
            name: self.name.clone(),
            max_requests: self.config.max_requests,
            window_secs: self.config.window.as_secs(),
            tracked_clients: self.windows.len(),
            allowed: self.allowed.load(Ordering::Relaxed),
            denied: self.denied.load(Ordering::Relaxed),
        }
    }
}

/// Registry of named limiters, one independent pool per use case.
#[derive(Default)]
pub struct RateLimiterManager {
    limiters: HashMap<String, Arc<RateLimiter>>,
}

impl RateLimiterManager {
    pub fn new() -> Self {
        Self {
            limiters: HashMap::new(),
        }
    }

    /// Creates the `api`, `news` and `auth` pools.
    pub fn with_standard_limiters(api: RateLimitConfig, news: RateLimitConfig, auth: RateLimitConfig) -> Self {
        let mut manager = Self::new();
        manager.add_limiter(RateLimiter::new(API_LIMITER, api));
        manager.add_limiter(RateLimiter::new(NEWS_LIMITER, news));
        manager.add_limiter(RateLimiter::new(AUTH_LIMITER, auth));
        manager
    }

    /// Registers `limiter` under its own name, replacing any previous one.
    pub fn add_limiter(&mut self, limiter: RateLimiter) -> Arc<RateLimiter> {
        let limiter = Arc::new(limiter);
        self.limiters.insert(limiter.name().to_string(), limiter.clone());
        limiter
    }

    pub fn get_limiter(&self, name: &str) -> Option<Arc<RateLimiter>> {
        self.limiters.get(name).cloned()
    }

    pub fn check(&self, name: &str, identifier: &str) -> Result<RateLimitDecision, CoreError> {
        self.limiters
            .get(name)
            .map(|limiter| limiter.check(identifier))
            .ok_or_else(|| CoreError::NotFound(format!("rate limiter '{}'", name)))
    }

    pub fn cleanup_all(&self) -> usize {
        self.limiters.values().map(|limiter| limiter.cleanup()).sum()
    }

    pub fn all_stats(&self) -> Vec<RateLimitStats> {
        let mut stats: Vec<_> = self.limiters.values().map(|limiter| limiter.stats()).collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }
}

/// Runs `cleanup_all` every `period` until the manager is dropped.
pub fn spawn_cleaner(manager: &Arc<RateLimiterManager>, period: Duration) -> JoinHandle<()> {
    let manager: Weak<RateLimiterManager> = Arc::downgrade(manager);
    let period = clamp_period(period);
    tokio::spawn(async move {
        let mut ticker = interval_at(deadline_after(Instant::now(), period), period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match manager.upgrade() {
                Some(manager) => {
                    manager.cleanup_all();
                }
                None => break,
            }
        }
        debug!("Rate limiter cleaner stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::advance;

    #[tokio::test(start_paused = true)]
    async fn test_window_counts_down_then_denies_then_resets() {
        let limiter = RateLimiter::new("test", RateLimitConfig::new(5, Duration::from_secs(60)));

        let remaining: Vec<u32> = (0..5)
            .map(|_| {
                let d = limiter.check("client");
                assert!(d.allowed);
                d.remaining
            })
            .collect();
        assert_eq!(remaining, vec![4, 3, 2, 1, 0]);

        let denied = limiter.check("client");
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
        assert_eq!(denied.retry_after, Duration::from_secs(60));
        assert_eq!(denied.retry_after_secs(), 60);

        advance(Duration::from_secs(60)).await;
        let fresh = limiter.check("client");
        assert!(fresh.allowed);
        assert_eq!(fresh.remaining, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_request_window() {
        let limiter = RateLimiter::new("one", RateLimitConfig::new(1, Duration::from_millis(1000)));

        let first = limiter.check("x");
        assert!(first.allowed);
        assert_eq!(first.remaining, 0);

        let second = limiter.check("x");
        assert!(!second.allowed);
        assert_eq!(second.remaining, 0);
        assert_eq!(second.reset_at, first.reset_at);

        tokio::time::sleep(Duration::from_millis(1000)).await;
        let third = limiter.check("x");
        assert!(third.allowed);
        assert_eq!(third.remaining, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_denial_does_not_extend_window() {
        let limiter = RateLimiter::new("t", RateLimitConfig::new(1, Duration::from_secs(10)));
        limiter.check("c");
        advance(Duration::from_secs(5)).await;
        let denied = limiter.check("c");
        assert_eq!(denied.retry_after, Duration::from_secs(5));
        advance(Duration::from_secs(5)).await;
        assert!(limiter.check("c").allowed);
    }

    #[test]
    fn test_clients_have_separate_windows() {
        let limiter = RateLimiter::new("t", RateLimitConfig::new(1, Duration::from_secs(60)));
        assert!(limiter.check("a").allowed);
        assert!(!limiter.check("a").allowed);
        assert!(limiter.check("b").allowed);
    }

    #[test]
    fn test_named_pools_are_independent() {
        let manager = RateLimiterManager::with_standard_limiters(
            RateLimitConfig::new(2, Duration::from_secs(60)),
            RateLimitConfig::new(2, Duration::from_secs(60)),
            RateLimitConfig::new(1, Duration::from_secs(900)),
        );
        for _ in 0..2 {
            assert!(manager.check(API_LIMITER, "1.2.3.4").unwrap().allowed);
        }
        assert!(!manager.check(API_LIMITER, "1.2.3.4").unwrap().allowed);

        let news = manager.check(NEWS_LIMITER, "1.2.3.4").unwrap();
        assert!(news.allowed);
        assert_eq!(news.remaining, 1);
        assert_eq!(manager.get_limiter(AUTH_LIMITER).unwrap().tracked_clients(), 0);
    }

    #[test]
    fn test_unknown_limiter_is_not_found() {
        let manager = RateLimiterManager::new();
        assert!(matches!(manager.check("missing", "x"), Err(CoreError::NotFound(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_removes_only_elapsed_windows() {
        let limiter = RateLimiter::new("t", RateLimitConfig::new(3, Duration::from_secs(60)));
        limiter.check("old");
        advance(Duration::from_secs(30)).await;
        limiter.check("new");
        advance(Duration::from_secs(31)).await;

        assert_eq!(limiter.cleanup(), 1);
        assert_eq!(limiter.tracked_clients(), 1);
        let stats = limiter.stats();
        assert_eq!((stats.allowed, stats.denied), (2, 0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_cleaner() {
        let mut manager = RateLimiterManager::new();
        let limiter = manager.add_limiter(RateLimiter::new("t", RateLimitConfig::new(3, Duration::from_secs(1))));
        let manager = Arc::new(manager);
        let _handle = spawn_cleaner(&manager, Duration::from_secs(60));

        limiter.check("a");
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(limiter.tracked_clients(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_window_does_not_overflow() {
        let limiter = RateLimiter::new("forever", RateLimitConfig::new(1, Duration::MAX));
        let first = limiter.check("client");
        assert!(first.allowed);
        let second = limiter.check("client");
        assert!(!second.allowed);
        assert!(second.retry_after > Duration::from_secs(365 * 86_400));
        assert!(second.reset_at > Utc::now());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleaner_accepts_huge_period() {
        let manager = Arc::new(RateLimiterManager::new());
        let handle = spawn_cleaner(&manager, Duration::MAX);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(!handle.is_finished());
        handle.abort();
    }
}

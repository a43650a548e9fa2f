// src/cache/ttl.rs
//! In-process TTL cache with bounded size.
//!
//! - Lazy expiry: `get`/`has` drop an entry the first time they see it stale
//! - Periodic `sweep` bounds memory for keys that are never read again
//! - Capacity is enforced at insertion by evicting the oldest inserted key
//! - `memoize` is single-flight per key: concurrent misses share one producer run

use crate::utils::{clamp_period, deadline_after};
use dashmap::DashMap;
use log::debug;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

pub const DEFAULT_TTL: Duration = Duration::from_secs(60);
pub const DEFAULT_CAPACITY: usize = 1000;
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Shortest TTL an entry can carry, so that `expires_at > inserted_at` always holds.
const MIN_TTL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    #[allow(dead_code)]
    inserted_at: Instant,
    expires_at: Instant,
    /// Insertion sequence, the eviction order
    seq: u64,
}

impl<V> CacheEntry<V> {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// Cache counters since construction (or the last `clear`)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub inserts: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub entries: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct CacheState<V> {
    entries: HashMap<String, CacheEntry<V>>,
    order: BTreeMap<u64, String>,
    next_seq: u64,
    stats: CacheStats,
}

impl<V> CacheState<V> {
    fn remove(&mut self, key: &str) -> Option<CacheEntry<V>> {
        let entry = self.entries.remove(key)?;
        self.order.remove(&entry.seq);
        Some(entry)
    }

    /// Returns the live entry for `key`, dropping it first if it has expired.
    fn live_entry(&mut self, key: &str, now: Instant) -> Option<&CacheEntry<V>> {
        let expired = match self.entries.get(key) {
            Some(entry) => !entry.is_live(now),
            None => return None,
        };
        if expired {
            self.remove(key);
            self.stats.expirations += 1;
            return None;
        }
        self.entries.get(key)
    }
}

/// A caller's share of a key's in-flight gate. The gate leaves the map when its last
/// holder goes away, including callers whose `memoize` future was dropped mid-wait.
struct InflightSlot<'a> {
    inflight: &'a DashMap<String, Arc<AsyncMutex<()>>>,
    key: &'a str,
    gate: Arc<AsyncMutex<()>>,
}

impl<'a> InflightSlot<'a> {
    fn join(inflight: &'a DashMap<String, Arc<AsyncMutex<()>>>, key: &'a str) -> Self {
        let gate = inflight
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone();
        Self { inflight, key, gate }
    }
}

impl Drop for InflightSlot<'_> {
    fn drop(&mut self) {
        // held by the map and by this slot only
        self.inflight.remove_if(self.key, |_, gate| {
            Arc::ptr_eq(gate, &self.gate) && Arc::strong_count(gate) == 2
        });
    }
}

/// Generic key → value store with per-entry expiry.
///
/// All operations except `memoize` are synchronous and hold the internal lock only for
/// the duration of one map mutation.
pub struct TtlCache<V> {
    state: Mutex<CacheState<V>>,
    inflight: DashMap<String, Arc<AsyncMutex<()>>>,
    capacity: usize,
    default_ttl: Duration,
}

impl<V> Default for TtlCache<V> {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_TTL)
    }
}

impl<V> TtlCache<V> {
    /// A capacity of zero is treated as one.
    pub fn new(capacity: usize, default_ttl: Duration) -> Self {
        Self {
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                order: BTreeMap::new(),
                next_seq: 0,
                stats: CacheStats::default(),
            }),
            inflight: DashMap::new(),
            capacity: capacity.max(1),
            default_ttl,
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState<V>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Number of stored entries, live or not yet swept.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stores `value` under `key` with the default TTL.
    pub fn set(&self, key: impl Into<String>, value: V) {
        self.set_with_ttl(key, value, self.default_ttl);
    }

    /// Stores `value` under `key`, expiring `ttl` from now.
    ///
    /// Overwriting an existing key keeps its original insertion position and never
    /// evicts. Inserting a new key into a full cache evicts the earliest inserted entry.
    pub fn set_with_ttl(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let key = key.into();
        let now = Instant::now();
        let expires_at = deadline_after(now, ttl.max(MIN_TTL));
        let mut state = self.lock();
        state.stats.inserts += 1;

        if let Some(existing) = state.entries.get_mut(&key) {
            existing.value = value;
            existing.inserted_at = now;
            existing.expires_at = expires_at;
            return;
        }

        if state.entries.len() >= self.capacity {
            if let Some((_, oldest)) = state.order.pop_first() {
                state.entries.remove(&oldest);
                state.stats.evictions += 1;
                debug!("Cache full ({} entries), evicted oldest key: {}", self.capacity, oldest);
            }
        }

        let seq = state.next_seq;
        state.next_seq += 1;
        state.order.insert(seq, key.clone());
        state.entries.insert(
            key,
            CacheEntry {
                value,
                inserted_at: now,
                expires_at,
                seq,
            },
        );
    }

    /// True if `key` holds a live entry. A stale entry is removed as a side effect.
    pub fn has(&self, key: &str) -> bool {
        let now = Instant::now();
        self.lock().live_entry(key, now).is_some()
    }

    /// Remaining lifetime of a live entry.
    pub fn ttl_remaining(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.lock()
            .live_entry(key, now)
            .map(|entry| entry.expires_at.duration_since(now))
    }

    pub fn delete(&self, key: &str) -> bool {
        self.lock().remove(key).is_some()
    }

    pub fn clear(&self) {
        let mut state = self.lock();
        state.entries.clear();
        state.order.clear();
        state.stats = CacheStats::default();
    }

    /// Removes every expired entry and returns how many were dropped.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut state = self.lock();
        let expired: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, entry)| !entry.is_live(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            state.remove(key);
        }
        state.stats.expirations += expired.len() as u64;
        if !expired.is_empty() {
            debug!("Cache sweep: removed {} expired entries, {} remain", expired.len(), state.entries.len());
        }
        expired.len()
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.lock();
        let mut stats = state.stats.clone();
        stats.entries = state.entries.len();
        stats
    }
}

impl<V: Clone> TtlCache<V> {
    /// Returns a clone of the live value for `key`. A stale entry is removed and
    /// reported as absent.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let mut state = self.lock();
        let value = state.live_entry(key, now).map(|entry| entry.value.clone());
        if value.is_some() {
            state.stats.hits += 1;
        } else {
            state.stats.misses += 1;
        }
        value
    }

    /// Returns the cached value for `key`, or runs `producer`, caches its result for
    /// `ttl` and returns it.
    ///
    /// Concurrent callers missing on the same key wait for the first caller's producer
    /// instead of starting their own. A producer error is returned to its caller and
    /// nothing is cached; the next waiter then runs its own producer.
    pub async fn memoize<F, Fut, E>(&self, key: &str, ttl: Duration, producer: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.get(key) {
            return Ok(value);
        }

        let slot = InflightSlot::join(&self.inflight, key);
        let _turn = slot.gate.lock().await;
        match self.get(key) {
            Some(value) => Ok(value),
            None => {
                debug!("Cache MISS for key: {}. Running producer", key);
                let produced = producer().await;
                if let Ok(value) = &produced {
                    self.set_with_ttl(key, value.clone(), ttl);
                }
                produced
            }
        }
    }

    /// `memoize` with the cache's default TTL.
    pub async fn memoize_default<F, Fut, E>(&self, key: &str, producer: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        self.memoize(key, self.default_ttl, producer).await
    }
}

/// Runs `sweep` every `period` until the cache is dropped.
pub fn spawn_sweeper<V>(cache: &Arc<TtlCache<V>>, period: Duration) -> JoinHandle<()>
where
    V: Send + 'static,
{
    let cache: Weak<TtlCache<V>> = Arc::downgrade(cache);
    let period = clamp_period(period);
    tokio::spawn(async move {
        let mut ticker = interval_at(deadline_after(Instant::now(), period), period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match cache.upgrade() {
                Some(cache) => {
                    cache.sweep();
                }
                None => break,
            }
        }
        debug!("Cache sweeper stopped");
    })
}

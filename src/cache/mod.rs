// src/cache/mod.rs
//! Process-local caching layer in front of slow or rate-limited upstream reads.

pub mod json;
pub mod ttl;

pub use json::{cache_key, AppCache};
pub use ttl::{spawn_sweeper, CacheStats, TtlCache, DEFAULT_CAPACITY, DEFAULT_SWEEP_INTERVAL, DEFAULT_TTL};

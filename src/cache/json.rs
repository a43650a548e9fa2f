// src/cache/json.rs
//! Typed JSON facade over the process cache, so differently-shaped payloads (news
//! snapshots, market quotes) can share one bounded cache.

use super::ttl::TtlCache;
use crate::error::CoreError;
use log::{debug, warn};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::future::Future;
use std::time::Duration;

/// The process-wide cache type handed out by `AppContext`.
pub type AppCache = TtlCache<Value>;

/// Builds a cache key as `prefix:part1:part2...`.
pub fn cache_key(prefix: &str, parts: &[&str]) -> String {
    let mut key = prefix.to_string();
    for part in parts {
        key.push(':');
        key.push_str(part);
    }
    key
}

impl TtlCache<Value> {
    /// Reads and deserializes a live entry. An entry that no longer matches `T` is
    /// dropped and reported as an error.
    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CoreError> {
        let value = match self.get(key) {
            Some(value) => value,
            None => {
                debug!("Cache MISS for key: {}", key);
                return Ok(None);
            }
        };
        match serde_json::from_value::<T>(value) {
            Ok(typed) => Ok(Some(typed)),
            Err(e) => {
                warn!("Failed to deserialize cached JSON for key {}: {}", key, e);
                self.delete(key);
                Err(CoreError::Parse(format!("Cache deserialization error for key {}: {}", key, e)))
            }
        }
    }

    /// Serializes and stores `value`; `ttl` of `None` uses the cache default.
    pub fn set_json<T: Serialize>(&self, key: &str, value: &T, ttl: Option<Duration>) -> Result<(), CoreError> {
        let json = serde_json::to_value(value)?;
        self.set_with_ttl(key, json, ttl.unwrap_or_else(|| self.default_ttl()));
        Ok(())
    }

    /// Typed `memoize`: the producer's result is stored as JSON and handed back as `T`.
    pub async fn memoize_json<T, F, Fut, E>(&self, key: &str, ttl: Duration, producer: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<CoreError>,
    {
        let value = self
            .memoize(key, ttl, || async move {
                let produced = producer().await?;
                serde_json::to_value(&produced).map_err(|e| E::from(CoreError::from(e)))
            })
            .await?;
        serde_json::from_value(value).map_err(|e| E::from(CoreError::from(e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Price {
        symbol: String,
        last: f64,
    }

    #[test]
    fn test_cache_key_joins_parts() {
        assert_eq!(cache_key("market", &["stock", "AAPL"]), "market:stock:AAPL");
        assert_eq!(cache_key("news", &[]), "news");
    }

    #[test]
    fn test_json_round_trip_through_cache() {
        let cache = AppCache::default();
        let price = Price { symbol: "MSFT".into(), last: 411.5 };
        cache.set_json("p", &price, None).unwrap();
        assert_eq!(cache.get_json::<Price>("p").unwrap(), Some(price));
        assert_eq!(cache.get_json::<Price>("missing").unwrap(), None);
    }

    #[test]
    fn test_shape_mismatch_is_dropped() {
        let cache = AppCache::default();
        cache.set("p", serde_json::json!({ "unexpected": true }));
        assert!(cache.get_json::<Price>("p").is_err());
        assert!(!cache.has("p"));
    }

    #[tokio::test]
    async fn test_memoize_json_returns_typed_value() {
        let cache = AppCache::default();
        let first: Result<Price, CoreError> = cache
            .memoize_json("p", Duration::from_secs(5), || async {
                Ok(Price { symbol: "BTC".into(), last: 64000.0 })
            })
            .await;
        let second: Result<Price, CoreError> = cache
            .memoize_json("p", Duration::from_secs(5), || async {
                Err(CoreError::Upstream("should not be called".into()))
            })
            .await;
        assert_eq!(first.unwrap(), second.unwrap());
    }
}

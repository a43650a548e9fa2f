use crate::error::CoreError;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Upper bound for every `*_SECS` knob: one year.
pub const MAX_DURATION_SECS: u64 = 365 * 24 * 60 * 60;

/// One upstream news feed, configured as `name=url` in `NEWS_FEEDS`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedConfig {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub app_env: String,
    pub log_level: String,
    pub cache_default_ttl_secs: u64,
    pub cache_capacity: usize,
    pub cache_sweep_interval_secs: u64,
    pub rate_limit_cleanup_interval_secs: u64,
    pub api_rate_limit_max: u32,
    pub api_rate_limit_window_secs: u64,
    pub news_rate_limit_max: u32,
    pub news_rate_limit_window_secs: u64,
    pub auth_rate_limit_max: u32,
    pub auth_rate_limit_window_secs: u64,
    pub news_refresh_interval_secs: u64,
    pub news_retry_delay_secs: u64,
    pub news_min_items: usize,
    pub news_max_items: usize,
    pub news_snapshot_ttl_secs: u64,
    pub news_feeds: Vec<FeedConfig>,
    pub news_snapshot_path: Option<PathBuf>,
    pub upstream_timeout_secs: u64,
    pub market_data_url: Option<String>,
    pub market_data_api_key: Option<String>,
    pub market_quote_ttl_secs: u64,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same parser as `from_env`, reading values from `lookup` instead of the process
    /// environment. Unparseable values fall back to their defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let num = |key: &str, default: u64| -> u64 { parse_or(lookup(key), default) };
        let opt_string = |key: &str| -> Option<String> {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let app_env = opt_string("APP_ENV").unwrap_or_else(|| "development".to_string());
        let default_refresh = if is_development(&app_env) { 15 * 60 } else { 60 * 60 };
        let news_refresh_interval_secs = num("NEWS_REFRESH_INTERVAL_SECS", default_refresh);

        let news_snapshot_path = match lookup("NEWS_SNAPSHOT_PATH") {
            Some(v) if v.trim().is_empty() => None,
            Some(v) => Some(PathBuf::from(v.trim())),
            None => Some(PathBuf::from("data/news-snapshot.json")),
        };

        Config {
            log_level: opt_string("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            cache_default_ttl_secs: num("CACHE_DEFAULT_TTL_SECS", 60),
            cache_capacity: parse_or(lookup("CACHE_CAPACITY"), 1000usize),
            cache_sweep_interval_secs: num("CACHE_SWEEP_INTERVAL_SECS", 300),
            rate_limit_cleanup_interval_secs: num("RATE_LIMIT_CLEANUP_INTERVAL_SECS", 60),
            api_rate_limit_max: parse_or(lookup("API_RATE_LIMIT_MAX"), 100u32),
            api_rate_limit_window_secs: num("API_RATE_LIMIT_WINDOW_SECS", 60),
            news_rate_limit_max: parse_or(lookup("NEWS_RATE_LIMIT_MAX"), 30u32),
            news_rate_limit_window_secs: num("NEWS_RATE_LIMIT_WINDOW_SECS", 60),
            auth_rate_limit_max: parse_or(lookup("AUTH_RATE_LIMIT_MAX"), 5u32),
            auth_rate_limit_window_secs: num("AUTH_RATE_LIMIT_WINDOW_SECS", 15 * 60),
            news_refresh_interval_secs,
            news_retry_delay_secs: num("NEWS_RETRY_DELAY_SECS", 60),
            news_min_items: parse_or(lookup("NEWS_MIN_ITEMS"), 5usize),
            news_max_items: parse_or(lookup("NEWS_MAX_ITEMS"), 10usize),
            news_snapshot_ttl_secs: num("NEWS_SNAPSHOT_TTL_SECS", news_refresh_interval_secs.saturating_mul(2)),
            news_feeds: lookup("NEWS_FEEDS")
                .map(|s| parse_feeds(&s))
                .unwrap_or_default(),
            news_snapshot_path,
            upstream_timeout_secs: num("UPSTREAM_TIMEOUT_SECS", 10),
            market_data_url: opt_string("MARKET_DATA_URL"),
            market_data_api_key: opt_string("MARKET_DATA_API_KEY"),
            market_quote_ttl_secs: num("MARKET_QUOTE_TTL_SECS", 30),
            app_env,
        }
    }

    pub fn is_development(&self) -> bool {
        is_development(&self.app_env)
    }

    pub fn cache_default_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_default_ttl_secs)
    }

    pub fn news_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.news_refresh_interval_secs)
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout_secs)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.cache_capacity == 0 {
            return Err(CoreError::Config("CACHE_CAPACITY must be greater than 0".to_string()));
        }
        let positive = [
            ("CACHE_DEFAULT_TTL_SECS", self.cache_default_ttl_secs),
            ("CACHE_SWEEP_INTERVAL_SECS", self.cache_sweep_interval_secs),
            ("RATE_LIMIT_CLEANUP_INTERVAL_SECS", self.rate_limit_cleanup_interval_secs),
            ("API_RATE_LIMIT_WINDOW_SECS", self.api_rate_limit_window_secs),
            ("NEWS_RATE_LIMIT_WINDOW_SECS", self.news_rate_limit_window_secs),
            ("AUTH_RATE_LIMIT_WINDOW_SECS", self.auth_rate_limit_window_secs),
            ("NEWS_REFRESH_INTERVAL_SECS", self.news_refresh_interval_secs),
            ("NEWS_RETRY_DELAY_SECS", self.news_retry_delay_secs),
            ("NEWS_SNAPSHOT_TTL_SECS", self.news_snapshot_ttl_secs),
            ("UPSTREAM_TIMEOUT_SECS", self.upstream_timeout_secs),
            ("MARKET_QUOTE_TTL_SECS", self.market_quote_ttl_secs),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(CoreError::Config(format!("{} must be greater than 0", name)));
            }
            if value > MAX_DURATION_SECS {
                return Err(CoreError::Config(format!(
                    "{} must be at most {} ({} given)",
                    name, MAX_DURATION_SECS, value
                )));
            }
        }
        let maxima = [
            ("API_RATE_LIMIT_MAX", self.api_rate_limit_max),
            ("NEWS_RATE_LIMIT_MAX", self.news_rate_limit_max),
            ("AUTH_RATE_LIMIT_MAX", self.auth_rate_limit_max),
        ];
        for (name, value) in maxima {
            if value == 0 {
                return Err(CoreError::Config(format!("{} must be greater than 0", name)));
            }
        }
        if self.news_min_items == 0 || self.news_min_items > self.news_max_items {
            return Err(CoreError::Config(format!(
                "NEWS_MIN_ITEMS ({}) must be between 1 and NEWS_MAX_ITEMS ({})",
                self.news_min_items, self.news_max_items
            )));
        }
        for feed in &self.news_feeds {
            url::Url::parse(&feed.url)
                .map_err(|e| CoreError::Config(format!("Feed '{}' has invalid URL: {}", feed.name, e)))?;
        }
        if let Some(market_url) = &self.market_data_url {
            url::Url::parse(market_url)?;
        }
        Ok(())
    }

    pub fn validate_and_log(&self) {
        log::info!(
            "Application Configuration Loaded: env={}, cache={}x{}s, feeds={}, refresh={}s, market_data={}",
            self.app_env,
            self.cache_capacity,
            self.cache_default_ttl_secs,
            self.news_feeds.len(),
            self.news_refresh_interval_secs,
            self.market_data_url.as_deref().unwrap_or("<disabled>")
        );
        if let Err(e) = self.validate() {
            log::error!("{}", e);
        }
        if self.news_feeds.is_empty() {
            log::warn!("NEWS_FEEDS is empty; the news snapshot will never be refreshed");
        }
    }
}

/// Parses `raw` as `T`; missing or unparseable (including out of range) values fall back
/// to `default`.
fn parse_or<T: FromStr>(raw: Option<String>, default: T) -> T {
    raw.and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

fn is_development(app_env: &str) -> bool {
    matches!(app_env.to_ascii_lowercase().as_str(), "development" | "dev" | "local")
}

fn parse_feeds(raw: &str) -> Vec<FeedConfig> {
    raw.split(',')
        .filter_map(|part| {
            let part = part.trim();
            if part.is_empty() {
                return None;
            }
            match part.split_once('=') {
                Some((name, url)) => Some(FeedConfig {
                    name: name.trim().to_string(),
                    url: url.trim().to_string(),
                }),
                None => Some(FeedConfig {
                    name: part.to_string(),
                    url: part.to_string(),
                }),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]);
        assert_eq!(config.cache_capacity, 1000);
        assert_eq!(config.cache_default_ttl_secs, 60);
        assert_eq!(config.news_refresh_interval_secs, 900);
        assert_eq!(config.news_snapshot_ttl_secs, 1800);
        assert_eq!(config.news_min_items, 5);
        assert_eq!(config.news_max_items, 10);
        assert!(config.news_feeds.is_empty());
        assert_eq!(
            config.news_snapshot_path,
            Some(PathBuf::from("data/news-snapshot.json"))
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_production_uses_longer_refresh_period() {
        let config = config_from(&[("APP_ENV", "production")]);
        assert!(!config.is_development());
        assert_eq!(config.news_refresh_interval_secs, 3600);
    }

    #[test]
    fn test_feed_list_parsing() {
        let config = config_from(&[(
            "NEWS_FEEDS",
            "wire=https://example.com/wire.json, markets = https://example.org/m.json,,",
        )]);
        assert_eq!(
            config.news_feeds,
            vec![
                FeedConfig { name: "wire".into(), url: "https://example.com/wire.json".into() },
                FeedConfig { name: "markets".into(), url: "https://example.org/m.json".into() },
            ]
        );
    }

    #[test]
    fn test_invalid_values_fall_back_and_validation_rejects_zero() {
        let config = config_from(&[("CACHE_DEFAULT_TTL_SECS", "soon"), ("CACHE_CAPACITY", "0")]);
        assert_eq!(config.cache_default_ttl_secs, 60);
        assert!(matches!(config.validate(), Err(CoreError::Config(_))));
    }

    #[test]
    fn test_min_items_above_max_is_rejected() {
        let config = config_from(&[("NEWS_MIN_ITEMS", "12")]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_snapshot_path_disables_store() {
        let config = config_from(&[("NEWS_SNAPSHOT_PATH", "")]);
        assert_eq!(config.news_snapshot_path, None);
    }

    #[test]
    fn test_bad_feed_url_is_rejected() {
        let config = config_from(&[("NEWS_FEEDS", "broken=not a url")]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rate_limit_max_out_of_range_is_not_truncated() {
        let config = config_from(&[("API_RATE_LIMIT_MAX", "4294967296")]);
        assert_eq!(config.api_rate_limit_max, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_rate_limit_max_is_rejected() {
        for key in ["API_RATE_LIMIT_MAX", "NEWS_RATE_LIMIT_MAX", "AUTH_RATE_LIMIT_MAX"] {
            let config = config_from(&[(key, "0")]);
            match config.validate() {
                Err(CoreError::Config(msg)) => assert!(msg.contains(key), "{}", msg),
                other => panic!("{} = 0 accepted: {:?}", key, other),
            }
        }
    }

    #[test]
    fn test_huge_durations_are_rejected_without_overflow() {
        let config = config_from(&[("AUTH_RATE_LIMIT_WINDOW_SECS", "18446744073709551615")]);
        assert!(matches!(config.validate(), Err(CoreError::Config(_))));

        let config = config_from(&[("NEWS_REFRESH_INTERVAL_SECS", "18446744073709551615")]);
        assert_eq!(config.news_snapshot_ttl_secs, u64::MAX);
        assert!(matches!(config.validate(), Err(CoreError::Config(_))));

        let year = MAX_DURATION_SECS.to_string();
        let config = config_from(&[("CACHE_DEFAULT_TTL_SECS", year.as_str())]);
        assert!(config.validate().is_ok());
    }
}

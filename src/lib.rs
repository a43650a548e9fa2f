pub mod api; // Rate limiting and client identity
pub mod cache; // Process-local TTL cache
pub mod config;
pub mod context; // Startup wiring shared by the binary and tests
pub mod error;
pub mod market;
pub mod news; // Feed aggregation and the scheduled refresh job
pub mod utils;

pub use context::AppContext;
pub use error::{CoreError, CoreResult};

// Re-export the types most callers touch
pub use api::{client_identifier, RateLimitConfig, RateLimitDecision, RateLimiter, RateLimiterManager};
pub use cache::{cache_key, AppCache, CacheStats, TtlCache};
pub use config::{load_config, Config};
pub use market::{AssetType, MarketDataService, MarketQuote};
pub use news::{NewsItem, NewsRefreshJob, NewsSnapshot, RefreshOutcome};

// src/api/mod.rs
//! Request admission for the HTTP layer:
//! - Fixed-window rate limiting, one independent pool per endpoint group
//! - Client identity derivation from proxy headers

pub mod identity;
pub mod rate_limiter;

pub use identity::{client_identifier, UNKNOWN_CLIENT};

pub use rate_limiter::{
    spawn_cleaner,
    RateLimitConfig,
    RateLimitDecision,
    RateLimitStats,
    RateLimiter,
    RateLimiterManager,
    API_LIMITER,
    AUTH_LIMITER,
    NEWS_LIMITER,
};

// src/news/mod.rs
//! Aggregated news: upstream feeds, the scheduled refresh job, and snapshot storage.

pub mod refresh;
pub mod sources;
pub mod store;
pub mod types;

pub use refresh::{NewsRefreshJob, RefreshConfig, RefreshOutcome, NEWS_SNAPSHOT_KEY};
pub use sources::{normalize_feed, FeedSource, HttpFeedSource};
pub use store::{FileSnapshotStore, SnapshotStore};
pub use types::{dedup_by_title, select_items, NewsItem, NewsSnapshot};

// src/news/types.rs
//! News items, published snapshots, and the dedup/selection steps of a refresh pass.

use chrono::{DateTime, Utc};
use itertools::Itertools;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// One normalized upstream article. `id` is assigned per refresh pass and is not
/// stable across passes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewsItem {
    pub id: String,
    pub title: String,
    pub link: String,
    pub published_at: DateTime<Utc>,
    pub source_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

impl NewsItem {
    /// Key under which two items count as the same story.
    pub fn dedup_key(&self) -> String {
        self.title.to_lowercase()
    }
}

/// Immutable published view of the news feed. Items are in selection order.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewsSnapshot {
    pub last_update: Option<DateTime<Utc>>,
    pub items: Vec<NewsItem>,
}

impl NewsSnapshot {
    /// The "no news yet" snapshot served before the first publish.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn published(items: Vec<NewsItem>, at: DateTime<Utc>) -> Self {
        Self {
            last_update: Some(at),
            items,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Drops items whose title matches an earlier one, ignoring case. The first
/// occurrence in iteration order is kept.
pub fn dedup_by_title<I>(items: I) -> Vec<NewsItem>
where
    I: IntoIterator<Item = NewsItem>,
{
    items.into_iter().unique_by(NewsItem::dedup_key).collect()
}

/// Shuffles `pool` and keeps a count drawn uniformly from `min..=max`, clamped to the
/// pool size.
pub fn select_items<R: Rng + ?Sized>(mut pool: Vec<NewsItem>, min: usize, max: usize, rng: &mut R) -> Vec<NewsItem> {
    pool.shuffle(rng);
    let (low, high) = if min <= max { (min, max) } else { (max, min) };
    let target = rng.gen_range(low..=high);
    pool.truncate(target.min(pool.len()));
    pool
}

#[cfg(test)]
pub(crate) fn sample_item(source: &str, title: &str) -> NewsItem {
    NewsItem {
        id: uuid::Uuid::new_v4().to_string(),
        title: title.to_string(),
        link: format!("https://news.example/{}", title.to_lowercase().replace(' ', "-")),
        published_at: Utc::now(),
        source_name: source.to_string(),
        summary: None,
        body: None,
    }
}

// src/news/sources.rs
//! Upstream news feeds.
//!
//! Feeds are untrusted: any field may be missing or oddly typed, so entries are read
//! from loose JSON and normalized into `NewsItem`s. Entries without a title are dropped.

use super::types::NewsItem;
use crate::config::FeedConfig;
use crate::error::CoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::debug;
use serde_json::Value;
use std::time::Duration;
use uuid::Uuid;

const USER_AGENT: &str = concat!("finboard-core/", env!("CARGO_PKG_VERSION"));

#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Name stamped onto every item as `source_name`.
    fn name(&self) -> &str;

    async fn fetch(&self) -> Result<Vec<NewsItem>, CoreError>;
}

/// A JSON feed fetched over HTTP.
pub struct HttpFeedSource {
    name: String,
    url: String,
    client: reqwest::Client,
}

impl HttpFeedSource {
    pub fn new(name: impl Into<String>, url: impl Into<String>, timeout: Duration) -> Result<Self, CoreError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self::with_client(name, url, client))
    }

    pub fn with_client(name: impl Into<String>, url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            client,
        }
    }

    pub fn from_config(feed: &FeedConfig, client: reqwest::Client) -> Self {
        Self::with_client(feed.name.clone(), feed.url.clone(), client)
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl FeedSource for HttpFeedSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self) -> Result<Vec<NewsItem>, CoreError> {
        debug!("Fetching feed '{}' from {}", self.name, self.url);
        let body: Value = self
            .client
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(normalize_feed(&self.name, &body, Utc::now()))
    }
}

/// Extracts items from a feed document. Accepts a JSON Feed (`items`), an
/// `articles` wrapper, or a bare array; anything else yields no items.
pub fn normalize_feed(source_name: &str, body: &Value, fetched_at: DateTime<Utc>) -> Vec<NewsItem> {
    let entries = body
        .get("items")
        .or_else(|| body.get("articles"))
        .unwrap_or(body)
        .as_array();

    match entries {
        Some(entries) => entries
            .iter()
            .filter_map(|entry| normalize_item(source_name, entry, fetched_at))
            .collect(),
        None => {
            debug!("Feed '{}' returned no item list", source_name);
            Vec::new()
        }
    }
}

fn normalize_item(source_name: &str, entry: &Value, fetched_at: DateTime<Utc>) -> Option<NewsItem> {
    let title = first_text(entry, &["title", "headline"])?;
    let link = first_text(entry, &["url", "link", "external_url"]).unwrap_or_default();
    let published_at = first_text(entry, &["date_published", "pubDate", "published", "publishedAt"])
        .and_then(|raw| parse_timestamp(&raw))
        .unwrap_or(fetched_at);

    Some(NewsItem {
        id: Uuid::new_v4().to_string(),
        title,
        link,
        published_at,
        source_name: source_name.to_string(),
        summary: first_text(entry, &["summary", "description"]),
        body: first_text(entry, &["content_text", "content", "content_html"]),
    })
}

/// First field among `keys` holding a non-blank string, trimmed.
fn first_text(entry: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| entry.get(*key)?.as_str())
        .map(str::trim)
        .find(|text| !text.is_empty())
        .map(str::to_string)
}

/// RFC 3339 (JSON Feed) or RFC 2822 (RSS-style `pubDate`).
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .or_else(|_| DateTime::parse_from_rfc2822(raw))
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

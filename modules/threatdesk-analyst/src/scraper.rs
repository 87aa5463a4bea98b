use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{info, warn};

use threatdesk_store::{NewCandidate, Store};

/// Collaborator that pulls fresh candidates into the store before a run.
/// Failures are the coordinator's call: logged and skipped by default,
/// fatal under --require-fresh.
#[async_trait]
pub trait Scraper: Send + Sync {
    /// Fetch new items, insert them, return how many were actually new.
    async fn scrape_new(&self) -> Result<u32>;
    fn name(&self) -> &str;
}

/// Security news feeds polled by the default scraper.
const SECURITY_FEEDS: &[&str] = &[
    "https://krebsonsecurity.com/feed/",
    "https://feeds.feedburner.com/TheHackersNews",
    "https://www.bleepingcomputer.com/feed/",
    "https://www.darkreading.com/rss.xml",
    "https://feeds.feedburner.com/securityweek",
    "https://www.csoonline.com/feed/",
    "https://www.cyberscoop.com/feed/",
    "https://gbhackers.com/feed/",
    "https://www.schneier.com/feed/atom/",
];

/// Ignore feed entries older than this; the pipeline's lookback window is
/// hours, not weeks.
const FEED_MAX_AGE_DAYS: i64 = 7;

/// RSS/Atom scraper over reqwest + feed-rs. Feeds are plain XML; no
/// browser rendering involved.
pub struct FeedScraper {
    store: Store,
    client: reqwest::Client,
    feeds: Vec<String>,
}

impl FeedScraper {
    pub fn new(store: Store) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .user_agent("threatdesk/0.1")
            .build()
            .expect("Failed to build feed HTTP client");
        Self {
            store,
            client,
            feeds: SECURITY_FEEDS.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn with_feeds(mut self, feeds: Vec<String>) -> Self {
        self.feeds = feeds;
        self
    }

    /// Fetch and parse one feed into insertable candidates.
    async fn fetch_feed(&self, feed_url: &str) -> Result<Vec<NewCandidate>> {
        let resp = self
            .client
            .get(feed_url)
            .send()
            .await
            .context("Feed fetch failed")?;
        let bytes = resp.bytes().await.context("Failed to read feed body")?;
        let feed = feed_rs::parser::parse(&bytes[..]).context("Failed to parse RSS/Atom feed")?;

        let cutoff = chrono::Utc::now() - chrono::Duration::days(FEED_MAX_AGE_DAYS);

        let items = feed
            .entries
            .into_iter()
            .filter_map(|entry| {
                let link = entry.links.first().map(|l| l.href.clone())?;
                let parsed = url::Url::parse(&link).ok()?;
                if parsed.scheme() != "http" && parsed.scheme() != "https" {
                    return None;
                }

                let published = entry
                    .published
                    .or(entry.updated)
                    .map(|dt| dt.with_timezone(&chrono::Utc));
                if let Some(date) = published {
                    if date < cutoff {
                        return None;
                    }
                }

                let title = entry.title.map(|t| t.content)?;
                let summary = entry.summary.map(|t| t.content).unwrap_or_default();
                let content = entry
                    .content
                    .and_then(|c| c.body)
                    .unwrap_or_default();
                let source = parsed.host_str().unwrap_or("unknown").to_string();

                Some(NewCandidate {
                    source,
                    url: link,
                    title,
                    summary,
                    content,
                    published_at: published,
                })
            })
            .collect();

        Ok(items)
    }
}

#[async_trait]
impl Scraper for FeedScraper {
    async fn scrape_new(&self) -> Result<u32> {
        let mut created = 0u32;
        let mut failed_feeds = 0u32;

        for feed_url in &self.feeds {
            match self.fetch_feed(feed_url).await {
                Ok(items) => {
                    let mut new_from_feed = 0u32;
                    for item in items {
                        if self.store.insert_candidate(&item).await? {
                            new_from_feed += 1;
                        }
                    }
                    info!(feed = feed_url.as_str(), new_items = new_from_feed, "Feed scanned");
                    created += new_from_feed;
                }
                Err(e) => {
                    warn!(feed = feed_url.as_str(), error = %e, "Failed to fetch feed");
                    failed_feeds += 1;
                }
            }
        }

        if failed_feeds as usize == self.feeds.len() && !self.feeds.is_empty() {
            anyhow::bail!("all {failed_feeds} feeds failed");
        }
        info!(created, failed_feeds, "Scrape complete");
        Ok(created)
    }

    fn name(&self) -> &str {
        "rss"
    }
}

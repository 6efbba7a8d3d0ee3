// src/ingest/providers/rss.rs
//! Generic RSS-backed source provider. Sources come from `[[feeds]]` in config;
//! each feed URL is fetched over HTTP (or served from an in-memory fixture).
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use quick_xml::de::from_str;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use time::{format_description::well_known::Rfc2822, OffsetDateTime};

use crate::config::FeedSource;
use crate::ingest::types::SourceProvider;
use crate::model::{RawItem, Source};

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    item: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    guid: Option<Guid>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Guid {
    #[serde(rename = "$text")]
    value: Option<String>,
}

fn parse_rfc2822(ts: &str) -> Option<DateTime<Utc>> {
    let dt = OffsetDateTime::parse(ts.trim(), &Rfc2822).ok()?;
    DateTime::<Utc>::from_timestamp(dt.unix_timestamp(), dt.nanosecond())
}

fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
}

pub struct RssFeedProvider {
    feeds: Vec<FeedSource>,
    mode: Mode,
}

enum Mode {
    Http(reqwest::Client),
    /// Raw XML per `source_id`.
    Fixture(HashMap<String, String>),
}

impl RssFeedProvider {
    pub fn from_feeds(feeds: Vec<FeedSource>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("heat-engine/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(4).min(timeout))
            .timeout(timeout)
            .build()
            .context("building feed http client")?;
        Ok(Self {
            feeds,
            mode: Mode::Http(client),
        })
    }

    pub fn from_fixtures(feeds: Vec<FeedSource>, fixtures: HashMap<String, String>) -> Self {
        Self {
            feeds,
            mode: Mode::Fixture(fixtures),
        }
    }

    fn feed(&self, source_id: &str) -> Result<&FeedSource> {
        self.feeds
            .iter()
            .find(|f| f.source_id == source_id)
            .ok_or_else(|| anyhow!("unknown feed `{source_id}`"))
    }

    fn parse_items(
        source_id: &str,
        xml: &str,
        limit: usize,
        fetched_at: DateTime<Utc>,
    ) -> Result<Vec<RawItem>> {
        let t0 = std::time::Instant::now();
        let xml_clean = scrub_html_entities_for_xml(xml);
        let rss: Rss =
            from_str(&xml_clean).with_context(|| format!("parsing rss xml for `{source_id}`"))?;

        let mut out = Vec::with_capacity(rss.channel.item.len().min(limit));
        for it in rss.channel.item.into_iter().take(limit) {
            let title = it.title.unwrap_or_default();
            if title.trim().is_empty() {
                continue;
            }
            let link = it.link.unwrap_or_default();
            let external_id = it
                .guid
                .and_then(|g| g.value)
                .filter(|g| !g.trim().is_empty())
                .unwrap_or_else(|| link.clone());
            out.push(RawItem {
                source_id: source_id.to_string(),
                external_id,
                title,
                body: it.description,
                url: link,
                // Undated entries are first seen at fetch time.
                published_at: it
                    .pub_date
                    .as_deref()
                    .and_then(parse_rfc2822)
                    .unwrap_or(fetched_at),
                platform_metrics: None,
            });
        }

        let ms = t0.elapsed().as_secs_f64() * 1_000.0;
        histogram!("ingest_parse_ms").record(ms);
        Ok(out)
    }
}

#[async_trait]
impl SourceProvider for RssFeedProvider {
    async fn list_sources(&self) -> Result<Vec<Source>> {
        Ok(self
            .feeds
            .iter()
            .map(|f| Source {
                source_id: f.source_id.clone(),
                name: f.name.clone(),
                category: f.category.clone(),
                weight: f.weight,
            })
            .collect())
    }

    async fn fetch_items(&self, source_id: &str, limit: usize) -> Result<Vec<RawItem>> {
        let feed = self.feed(source_id)?;
        let body = match &self.mode {
            Mode::Fixture(map) => map
                .get(source_id)
                .cloned()
                .ok_or_else(|| anyhow!("no fixture for `{source_id}`"))?,
            Mode::Http(client) => {
                let resp = client
                    .get(&feed.url)
                    .send()
                    .await
                    .with_context(|| format!("GET {}", feed.url))?;
                let status = resp.status();
                if !status.is_success() {
                    counter!("ingest_provider_errors_total").increment(1);
                    anyhow::bail!("GET {} returned {status}", feed.url);
                }
                resp.text().await.context("reading feed body")?
            }
        };
        Self::parse_items(source_id, &body, limit, Utc::now())
    }

    fn name(&self) -> &'static str {
        "rss"
    }
}

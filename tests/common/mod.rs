// tests/common/mod.rs
#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use heat_engine::cache::{CacheStore, MemoryCache};
use heat_engine::ingest::types::SourceProvider;
use heat_engine::keywords::FrequencyExtractor;
use heat_engine::store::{HeatQuery, HeatStore, MemoryStore, UpsertSummary};
use heat_engine::{HeatConfig, HeatEngine, HeatScoreRecord, RawItem, Source};

pub fn as_of() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 4, 14, 12, 0, 0).unwrap()
}

pub fn source(id: &str, category: &str, weight: f64) -> Source {
    Source {
        source_id: id.into(),
        name: id.to_uppercase(),
        category: category.into(),
        weight,
    }
}

pub fn item(source_id: &str, external_id: &str, title: &str, published_at: DateTime<Utc>) -> RawItem {
    RawItem {
        source_id: source_id.into(),
        external_id: external_id.into(),
        title: title.into(),
        body: None,
        url: format!("https://{source_id}.test/{external_id}"),
        published_at,
        platform_metrics: None,
    }
}

/// Provider whose behaviour per source is scripted by the test.
#[derive(Default)]
pub struct ScriptedProvider {
    sources: Vec<Source>,
    items: Mutex<HashMap<String, Vec<RawItem>>>,
    hanging: HashSet<String>,
    failing: HashSet<String>,
    catalogue_down: bool,
    panic_on_list: bool,
    list_delay: Option<Duration>,
}

impl ScriptedProvider {
    pub fn new(sources: Vec<Source>) -> Self {
        Self {
            sources,
            ..Self::default()
        }
    }

    pub fn with_items(self, source_id: &str, items: Vec<RawItem>) -> Self {
        self.set_items(source_id, items);
        self
    }

    pub fn set_items(&self, source_id: &str, items: Vec<RawItem>) {
        self.items
            .lock()
            .unwrap()
            .insert(source_id.to_string(), items);
    }

    pub fn hanging(mut self, source_id: &str) -> Self {
        self.hanging.insert(source_id.to_string());
        self
    }

    pub fn failing(mut self, source_id: &str) -> Self {
        self.failing.insert(source_id.to_string());
        self
    }

    pub fn catalogue_down(mut self) -> Self {
        self.catalogue_down = true;
        self
    }

    pub fn panic_on_list(mut self) -> Self {
        self.panic_on_list = true;
        self
    }

    pub fn list_delay(mut self, d: Duration) -> Self {
        self.list_delay = Some(d);
        self
    }
}

#[async_trait]
impl SourceProvider for ScriptedProvider {
    async fn list_sources(&self) -> Result<Vec<Source>> {
        if let Some(d) = self.list_delay {
            tokio::time::sleep(d).await;
        }
        if self.panic_on_list {
            panic!("catalogue exploded");
        }
        if self.catalogue_down {
            anyhow::bail!("catalogue service returned 503");
        }
        Ok(self.sources.clone())
    }

    async fn fetch_items(&self, source_id: &str, limit: usize) -> Result<Vec<RawItem>> {
        if self.hanging.contains(source_id) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            return Ok(Vec::new());
        }
        if self.failing.contains(source_id) {
            anyhow::bail!("HTTP 502 from {source_id}");
        }
        let mut items = self
            .items
            .lock()
            .unwrap()
            .get(source_id)
            .cloned()
            .unwrap_or_default();
        items.truncate(limit);
        Ok(items)
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

/// Cache backend that is always down.
pub struct BrokenCache;

#[async_trait]
impl CacheStore for BrokenCache {
    async fn get(&self, _key: &str) -> Result<Option<String>> {
        anyhow::bail!("cache connection refused")
    }
    async fn set(&self, _key: &str, _value: String, _ttl: Duration) -> Result<()> {
        anyhow::bail!("cache connection refused")
    }
    fn name(&self) -> &'static str {
        "broken"
    }
}

/// Store that reads fine but refuses every write.
pub struct ReadOnlyStore;

#[async_trait]
impl HeatStore for ReadOnlyStore {
    async fn upsert_batch(&self, _records: Vec<HeatScoreRecord>) -> Result<UpsertSummary> {
        anyhow::bail!("disk full")
    }
    async fn query(&self, _q: &HeatQuery) -> Result<Vec<HeatScoreRecord>> {
        Ok(Vec::new())
    }
    async fn get_by_news_ids(&self, _news_ids: &[String]) -> Result<Vec<HeatScoreRecord>> {
        Ok(Vec::new())
    }
    fn name(&self) -> &'static str {
        "read_only"
    }
}

/// Memory store that counts history scans (`query` calls).
#[derive(Default)]
pub struct CountingStore {
    inner: MemoryStore,
    queries: AtomicUsize,
}

impl CountingStore {
    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HeatStore for CountingStore {
    async fn upsert_batch(&self, records: Vec<HeatScoreRecord>) -> Result<UpsertSummary> {
        self.inner.upsert_batch(records).await
    }
    async fn query(&self, q: &HeatQuery) -> Result<Vec<HeatScoreRecord>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.inner.query(q).await
    }
    async fn get_by_news_ids(&self, news_ids: &[String]) -> Result<Vec<HeatScoreRecord>> {
        self.inner.get_by_news_ids(news_ids).await
    }
    fn name(&self) -> &'static str {
        "counting"
    }
}

pub fn engine_with(
    provider: Arc<dyn SourceProvider>,
    cache: Arc<dyn CacheStore>,
    store: Arc<dyn HeatStore>,
    cfg: HeatConfig,
) -> HeatEngine {
    let processor = FrequencyExtractor::from_config(&cfg.keywords);
    HeatEngine::new(provider, Arc::new(processor), cache, store, cfg)
}

pub fn engine(provider: Arc<dyn SourceProvider>, store: Arc<MemoryStore>) -> HeatEngine {
    engine_with(
        provider,
        Arc::new(MemoryCache::new()),
        store,
        HeatConfig::default(),
    )
}

pub fn by_news_id(records: Vec<HeatScoreRecord>) -> HashMap<String, HeatScoreRecord> {
    records.into_iter().map(|r| (r.news_id.clone(), r)).collect()
}

//! Persistence gateway for heat score records.
//!
//! One record per `news_id`. Upserts keep the existing `id` and first-seen
//! `published_at`, overwrite the scores, and push `calculated_at` strictly
//! forward. A batch is validated as a whole and then applied all at once.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use metrics::counter;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use uuid::Uuid;

use crate::model::HeatScoreRecord;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UpsertSummary {
    pub inserted: usize,
    pub updated: usize,
}

impl UpsertSummary {
    pub fn total(&self) -> usize {
        self.inserted + self.updated
    }
}

/// Filter over stored records. Results are always ordered by `heat_score`
/// descending, ties by `news_id`.
#[derive(Debug, Clone, Default)]
pub struct HeatQuery {
    pub ids: Option<Vec<Uuid>>,
    pub news_ids: Option<Vec<String>>,
    pub min_score: Option<f64>,
    /// Only records with `published_at >= published_after`.
    pub published_after: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl HeatQuery {
    pub fn top(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Self::default()
        }
    }

    pub fn with_ids(mut self, ids: Vec<Uuid>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn with_news_ids(mut self, news_ids: Vec<String>) -> Self {
        self.news_ids = Some(news_ids);
        self
    }

    pub fn min_score(mut self, min: f64) -> Self {
        self.min_score = Some(min);
        self
    }

    /// Keep records published no more than `max_age` before `now`.
    pub fn max_age(mut self, now: DateTime<Utc>, max_age: Duration) -> Self {
        self.published_after = Some(now - max_age);
        self
    }

    fn matches(&self, r: &HeatScoreRecord, ids: &Option<HashSet<Uuid>>, news: &Option<HashSet<&str>>) -> bool {
        if let Some(ids) = ids {
            if !ids.contains(&r.id) {
                return false;
            }
        }
        if let Some(news) = news {
            if !news.contains(r.news_id.as_str()) {
                return false;
            }
        }
        if let Some(min) = self.min_score {
            if r.heat_score < min {
                return false;
            }
        }
        if let Some(after) = self.published_after {
            if r.published_at < after {
                return false;
            }
        }
        true
    }
}

#[async_trait]
pub trait HeatStore: Send + Sync {
    async fn upsert_batch(&self, records: Vec<HeatScoreRecord>) -> Result<UpsertSummary>;
    async fn query(&self, q: &HeatQuery) -> Result<Vec<HeatScoreRecord>>;
    async fn get_by_news_ids(&self, news_ids: &[String]) -> Result<Vec<HeatScoreRecord>>;
    fn name(&self) -> &'static str;
}

type Table = BTreeMap<String, HeatScoreRecord>;

fn validate_batch(records: &[HeatScoreRecord]) -> Result<()> {
    if let Some(bad) = records.iter().find(|r| !r.is_well_formed()) {
        bail!(
            "rejecting batch of {}: malformed record `{}` (heat={})",
            records.len(),
            bad.news_id,
            bad.heat_score
        );
    }
    Ok(())
}

/// Merge a validated batch into a copy of `table`.
fn merged(table: &Table, records: Vec<HeatScoreRecord>) -> (Table, UpsertSummary) {
    let mut next = table.clone();
    let mut summary = UpsertSummary::default();
    let mut seen = HashSet::new();
    for rec in records {
        // Counted once per news_id even if the batch repeats it.
        if seen.insert(rec.news_id.clone()) {
            if table.contains_key(&rec.news_id) {
                summary.updated += 1;
            } else {
                summary.inserted += 1;
            }
        }
        let rec = match next.get(&rec.news_id) {
            Some(existing) => rec.merged_onto(existing),
            None => rec,
        };
        next.insert(rec.news_id.clone(), rec);
    }
    (next, summary)
}

fn select(table: &Table, q: &HeatQuery) -> Vec<HeatScoreRecord> {
    let ids: Option<HashSet<Uuid>> = q.ids.as_ref().map(|v| v.iter().copied().collect());
    let news: Option<HashSet<&str>> = q
        .news_ids
        .as_ref()
        .map(|v| v.iter().map(String::as_str).collect());
    let mut out: Vec<HeatScoreRecord> = table
        .values()
        .filter(|r| q.matches(r, &ids, &news))
        .cloned()
        .collect();
    out.sort_by(|a, b| {
        b.heat_score
            .total_cmp(&a.heat_score)
            .then_with(|| a.news_id.cmp(&b.news_id))
    });
    if let Some(limit) = q.limit {
        out.truncate(limit);
    }
    out
}

fn by_news_ids(table: &Table, news_ids: &[String]) -> Vec<HeatScoreRecord> {
    news_ids
        .iter()
        .collect::<std::collections::BTreeSet<_>>()
        .into_iter()
        .filter_map(|id| table.get(id).cloned())
        .collect()
}

/// Process-local store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    table: Mutex<Table>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.table.lock().map(|t| t.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl HeatStore for MemoryStore {
    async fn upsert_batch(&self, records: Vec<HeatScoreRecord>) -> Result<UpsertSummary> {
        validate_batch(&records)?;
        let mut table = self
            .table
            .lock()
            .map_err(|_| anyhow!("memory store mutex poisoned"))?;
        let (next, summary) = merged(&table, records);
        *table = next;
        counter!("store_records_upserted_total").increment(summary.total() as u64);
        Ok(summary)
    }

    async fn query(&self, q: &HeatQuery) -> Result<Vec<HeatScoreRecord>> {
        let table = self
            .table
            .lock()
            .map_err(|_| anyhow!("memory store mutex poisoned"))?;
        Ok(select(&table, q))
    }

    async fn get_by_news_ids(&self, news_ids: &[String]) -> Result<Vec<HeatScoreRecord>> {
        let table = self
            .table
            .lock()
            .map_err(|_| anyhow!("memory store mutex poisoned"))?;
        Ok(by_news_ids(&table, news_ids))
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Whole-table JSON snapshot on disk.
///
/// Every upsert rewrites the file through a `.tmp` sibling and a rename, so a
/// crash mid-write leaves the previous snapshot in place.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    table: tokio::sync::Mutex<Table>,
}

impl JsonFileStore {
    /// Open (or lazily create) the snapshot at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let table = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("reading heat store {}", path.display()))?;
            let rows: Vec<HeatScoreRecord> = if raw.trim().is_empty() {
                Vec::new()
            } else {
                serde_json::from_str(&raw)
                    .with_context(|| format!("parsing heat store {}", path.display()))?
            };
            rows.into_iter().map(|r| (r.news_id.clone(), r)).collect()
        } else {
            Table::new()
        };
        tracing::info!(target: "store", path = %path.display(), records = table.len(), "heat store opened");
        Ok(Self {
            path,
            table: tokio::sync::Mutex::new(table),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn write_snapshot(&self, table: &Table) -> Result<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("creating {}", dir.display()))?;
        }
        let rows: Vec<&HeatScoreRecord> = table.values().collect();
        let json = serde_json::to_vec_pretty(&rows).context("serializing heat store")?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .with_context(|| format!("writing {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("renaming {} into place", tmp.display()))?;
        Ok(())
    }
}

#[async_trait]
impl HeatStore for JsonFileStore {
    async fn upsert_batch(&self, records: Vec<HeatScoreRecord>) -> Result<UpsertSummary> {
        validate_batch(&records)?;
        let mut table = self.table.lock().await;
        let (next, summary) = merged(&table, records);
        // In-memory state only moves once the snapshot is on disk.
        self.write_snapshot(&next).await?;
        *table = next;
        counter!("store_records_upserted_total").increment(summary.total() as u64);
        tracing::debug!(target: "store", inserted = summary.inserted, updated = summary.updated, "snapshot written");
        Ok(summary)
    }

    async fn query(&self, q: &HeatQuery) -> Result<Vec<HeatScoreRecord>> {
        let table = self.table.lock().await;
        Ok(select(&table, q))
    }

    async fn get_by_news_ids(&self, news_ids: &[String]) -> Result<Vec<HeatScoreRecord>> {
        let table = self.table.lock().await;
        Ok(by_news_ids(&table, news_ids))
    }

    fn name(&self) -> &'static str {
        "json_file"
    }
}

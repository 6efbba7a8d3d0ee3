//! One heat-score run: catalogue → fetch → keywords → clustering → scoring → persist.
//!
//! Only the fetch stage fans out. Everything after it runs on the calling task
//! against an immutable `HeatConfig` snapshot and a single as-of time, so two
//! runs over the same inputs with the same `now` produce the same scores.

use chrono::{DateTime, Duration, Utc};
use metrics::{counter, histogram};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::cache::{CacheStats, CacheStore, CacheTier};
use crate::cluster::cluster_items;
use crate::config::HeatConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::history::RunHistory;
use crate::ingest::catalogue::{SourceCatalogue, SourceMeta};
use crate::ingest::fetch_all;
use crate::ingest::types::{SourceFetchReport, SourceProvider};
use crate::keywords::{extract_for_item, TextProcessor};
use crate::model::{AnalyzedItem, HeatScoreRecord, RawItem};
use crate::scoring::{ScoreContext, Scorer};
use crate::store::{HeatQuery, HeatStore, UpsertSummary};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    /// Persisted, but some sources or extractions failed.
    Partial,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::Partial => "partial",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub as_of: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub status: RunStatus,
    pub sources: Vec<SourceFetchReport>,
    pub items_fetched: usize,
    /// Items left after dropping repeated `news_id`s.
    pub items_unique: usize,
    pub clusters: usize,
    pub extraction_degraded: usize,
    pub cache: CacheStats,
    pub upsert: UpsertSummary,
    pub error: Option<String>,
}

impl RunReport {
    fn begin(as_of: DateTime<Utc>) -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4(),
            as_of,
            started_at: now,
            finished_at: now,
            status: RunStatus::Success,
            sources: Vec::new(),
            items_fetched: 0,
            items_unique: 0,
            clusters: 0,
            extraction_degraded: 0,
            cache: CacheStats::default(),
            upsert: UpsertSummary::default(),
            error: None,
        }
    }

    /// Report for a run that never produced one (e.g. it panicked).
    pub fn aborted(reason: impl Into<String>) -> Self {
        let mut r = Self::begin(Utc::now());
        r.status = RunStatus::Failed;
        r.error = Some(reason.into());
        r
    }

    pub fn sources_ok(&self) -> usize {
        self.sources.iter().filter(|s| s.is_ok()).count()
    }

    pub fn sources_failed(&self) -> usize {
        self.sources.len() - self.sources_ok()
    }

    pub fn records_persisted(&self) -> usize {
        self.upsert.total()
    }

    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }
}

pub struct HeatEngine {
    provider: Arc<dyn SourceProvider>,
    processor: Arc<dyn TextProcessor>,
    cache: CacheTier,
    store: Arc<dyn HeatStore>,
    cfg: HeatConfig,
    history: RunHistory,
}

impl HeatEngine {
    pub fn new(
        provider: Arc<dyn SourceProvider>,
        processor: Arc<dyn TextProcessor>,
        cache_store: Arc<dyn CacheStore>,
        store: Arc<dyn HeatStore>,
        cfg: HeatConfig,
    ) -> Self {
        let cache = CacheTier::new(cache_store, cfg.cache.clone());
        let history = RunHistory::with_capacity(cfg.scheduler.history_capacity);
        tracing::info!(
            target: "scheduler",
            provider = provider.name(),
            processor = processor.name(),
            cache = cache.store_name(),
            store = store.name(),
            "heat engine ready"
        );
        Self {
            provider,
            processor,
            cache,
            store,
            cfg,
            history,
        }
    }

    pub fn config(&self) -> &HeatConfig {
        &self.cfg
    }

    pub fn history(&self) -> &RunHistory {
        &self.history
    }

    /// Ranked records straight from the store.
    pub async fn query(&self, q: &HeatQuery) -> PipelineResult<Vec<HeatScoreRecord>> {
        self.store
            .query(q)
            .await
            .map_err(|e| PipelineError::PersistenceFailure(format!("{e:#}")))
    }

    pub async fn run_once(&self, cancel: &CancellationToken) -> RunReport {
        self.run_at(Utc::now(), cancel).await
    }

    /// Full run with an explicit as-of time used for recency and `calculated_at`.
    pub async fn run_at(&self, now: DateTime<Utc>, cancel: &CancellationToken) -> RunReport {
        let t0 = Instant::now();
        let mut report = RunReport::begin(now);
        self.cache.reset_stats();
        tracing::info!(target: "scheduler", run_id = %report.run_id, as_of = %now, "run started");

        let result = self.execute(now, cancel, &mut report).await;

        report.cache = self.cache.stats();
        report.finished_at = Utc::now();
        match result {
            Ok(()) => {
                let degraded = report.sources_failed() > 0 || report.extraction_degraded > 0;
                report.status = if degraded {
                    RunStatus::Partial
                } else {
                    RunStatus::Success
                };
            }
            Err(PipelineError::Cancelled) => {
                report.status = RunStatus::Cancelled;
                report.error = Some(PipelineError::Cancelled.to_string());
            }
            Err(e) => {
                report.status = RunStatus::Failed;
                report.error = Some(e.to_string());
            }
        }

        let ms = t0.elapsed().as_secs_f64() * 1_000.0;
        histogram!("pipeline_run_ms").record(ms);
        counter!("pipeline_runs_total", "status" => report.status.as_str()).increment(1);
        match report.status {
            RunStatus::Failed => tracing::error!(
                target: "scheduler",
                run_id = %report.run_id,
                error = report.error.as_deref().unwrap_or_default(),
                "run failed"
            ),
            _ => tracing::info!(
                target: "scheduler",
                run_id = %report.run_id,
                status = report.status.as_str(),
                sources_ok = report.sources_ok(),
                sources_failed = report.sources_failed(),
                items = report.items_unique,
                clusters = report.clusters,
                persisted = report.records_persisted(),
                cache_degraded = report.cache.degraded,
                ms,
                "run finished"
            ),
        }

        self.history.push(report.clone());
        report
    }

    async fn execute(
        &self,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
        report: &mut RunReport,
    ) -> PipelineResult<()> {
        let catalogue = SourceCatalogue::load(
            self.provider.as_ref(),
            self.cfg.fetch.catalogue_timeout(),
            cancel,
        )
        .await?;

        let outcome = fetch_all(
            self.provider.clone(),
            catalogue.sources(),
            &self.cfg.fetch,
            cancel,
        )
        .await?;
        report.sources = outcome.reports;
        report.items_fetched = outcome.items.len();

        let mut items = dedup_by_news_id(outcome.items);
        report.items_unique = items.len();
        self.pin_first_seen(&mut items).await?;

        let analyzed = self.analyze(items, report);
        let clustering = cluster_items(&analyzed, &self.cfg.cluster);
        report.clusters = clustering.clusters.len();

        let coverage = self.coverage_counts(&analyzed, now).await?;

        let mut metas: HashMap<&str, SourceMeta> = HashMap::new();
        for a in &analyzed {
            let sid = a.item.source_id.as_str();
            if !metas.contains_key(sid) {
                let meta = catalogue.meta_for(sid, &self.cache).await;
                metas.insert(sid, meta);
            }
        }

        let scorer = Scorer::new(&self.cfg.scoring, now);
        let mut records = Vec::with_capacity(analyzed.len());
        for (idx, a) in analyzed.iter().enumerate() {
            let meta = &metas[a.item.source_id.as_str()];
            let counts: Vec<u64> = a
                .keywords
                .iter()
                .map(|k| coverage.get(&k.term).copied().unwrap_or(1))
                .collect();
            let ctx = ScoreContext {
                category: &meta.category,
                source_weight: meta.weight,
                cross_source_score: clustering.cluster_of(idx).cross_source_score,
                coverage: &counts,
            };
            let breakdown = scorer.score(a, &ctx);
            records.push(scorer.to_record(a, &breakdown, meta.weight));
        }

        // Nothing from a cancelled run reaches the store.
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        report.upsert = self
            .store
            .upsert_batch(records)
            .await
            .map_err(|e| PipelineError::PersistenceFailure(format!("{e:#}")))?;
        Ok(())
    }

    /// Items already stored keep their first-seen `published_at` for scoring too.
    async fn pin_first_seen(&self, items: &mut [RawItem]) -> PipelineResult<()> {
        if items.is_empty() {
            return Ok(());
        }
        let ids: Vec<String> = items.iter().map(RawItem::news_id).collect();
        let stored: HashMap<String, DateTime<Utc>> = self
            .store
            .get_by_news_ids(&ids)
            .await
            .map_err(|e| PipelineError::PersistenceFailure(format!("reading records: {e:#}")))?
            .into_iter()
            .map(|r| (r.news_id, r.published_at))
            .collect();
        for (it, id) in items.iter_mut().zip(&ids) {
            if let Some(first_seen) = stored.get(id) {
                it.published_at = *first_seen;
            }
        }
        Ok(())
    }

    fn analyze(&self, items: Vec<RawItem>, report: &mut RunReport) -> Vec<AnalyzedItem> {
        let max_terms = self.cfg.keywords.max_terms;
        items
            .into_iter()
            .map(|item| {
                let keywords = match extract_for_item(self.processor.as_ref(), &item, max_terms) {
                    Ok(k) => k,
                    Err(e) => {
                        report.extraction_degraded += 1;
                        counter!("keywords_degraded_total").increment(1);
                        tracing::warn!(target: "keywords", error = %e, "continuing without keywords");
                        Vec::new()
                    }
                };
                AnalyzedItem { item, keywords }
            })
            .collect()
    }

    /// Distinct items per keyword over this run's corpus plus stored history
    /// inside the history window. Warm `coverage:{term}` keys skip the history
    /// scan; it runs once for the terms that missed and refills their keys.
    async fn coverage_counts(
        &self,
        analyzed: &[AnalyzedItem],
        now: DateTime<Utc>,
    ) -> PipelineResult<HashMap<String, u64>> {
        let mut index: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for a in analyzed {
            let id = a.item.news_id();
            for k in &a.keywords {
                index.entry(k.term.clone()).or_default().insert(id.clone());
            }
        }

        let mut missed: BTreeSet<String> = BTreeSet::new();
        for (term, ids) in index.iter_mut() {
            match self.cache.coverage_ids(term).await {
                Some(cached) => ids.extend(cached),
                None => {
                    missed.insert(term.clone());
                }
            }
        }

        if !missed.is_empty() {
            let window = Duration::hours(self.cfg.store.history_window_hours as i64);
            let stored = self
                .store
                .query(&HeatQuery::default().max_age(now, window))
                .await
                .map_err(|e| PipelineError::PersistenceFailure(format!("reading history: {e:#}")))?;
            for rec in &stored {
                for k in &rec.keywords {
                    if missed.contains(&k.term) {
                        if let Some(ids) = index.get_mut(&k.term) {
                            ids.insert(rec.news_id.clone());
                        }
                    }
                }
            }
            for term in &missed {
                if let Some(ids) = index.get(term) {
                    self.cache.put_coverage_ids(term, ids).await;
                }
            }
            tracing::debug!(target: "cache", missed = missed.len(), terms = index.len(), "coverage history scanned");
        }

        Ok(index
            .into_iter()
            .map(|(term, ids)| (term, (ids.len() as u64).max(1)))
            .collect())
    }
}

/// First occurrence of each `news_id` wins.
fn dedup_by_news_id(items: Vec<RawItem>) -> Vec<RawItem> {
    let mut seen = HashSet::with_capacity(items.len());
    items
        .into_iter()
        .filter(|it| seen.insert(it.news_id()))
        .collect()
}

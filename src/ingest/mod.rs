// src/ingest/mod.rs
//! Fetch orchestration: bounded fan-out over sources with per-source failure isolation.
pub mod catalogue;
pub mod providers;
pub mod types;

use crate::config::FetchConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::ingest::types::{FetchOutcome, FetchStatus, SourceFetchReport, SourceProvider};
use crate::model::{RawItem, Source};
use metrics::{counter, describe_counter, describe_histogram, histogram};
use once_cell::sync::OnceCell;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// One-time metrics registration (so series show up on /metrics).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("ingest_items_total", "Items kept after normalization.");
        describe_counter!(
            "ingest_items_dropped_total",
            "Items dropped (empty title or missing identity)."
        );
        describe_counter!("ingest_sources_ok_total", "Sources fetched successfully.");
        describe_counter!(
            "ingest_sources_failed_total",
            "Sources that failed or timed out."
        );
        describe_histogram!("ingest_batch_ms", "Wall time of one fetch batch in milliseconds.");
    });
}

/// Normalize text: decode entities, strip tags, straighten quotes, collapse whitespace.
pub fn normalize_text(s: &str) -> String {
    // 1) HTML entity decode
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags
    static RE_TAGS: OnceCell<regex::Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").expect("tag regex"));
    out = re_tags.replace_all(&out, "").to_string();

    // 3) Normalize “ ” ‘ ’ « » to ASCII quotes
    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    // 4) Collapse whitespace
    out = out.split_whitespace().collect::<Vec<_>>().join(" ");

    // 5) Length cap: 1500 chars
    if out.chars().count() > 1500 {
        out = out.chars().take(1500).collect();
    }

    out
}

/// Clean up one provider item. Returns `None` if it has no usable title or identity.
fn normalize_item(mut item: RawItem, source_id: &str) -> Option<RawItem> {
    item.source_id = source_id.to_string();
    item.title = normalize_text(&item.title);
    if item.title.is_empty() {
        return None;
    }
    item.body = item
        .body
        .as_deref()
        .map(normalize_text)
        .filter(|b| !b.is_empty());
    item.url = item.url.trim().to_string();
    item.external_id = item.external_id.trim().to_string();
    if item.external_id.is_empty() {
        if item.url.is_empty() {
            return None;
        }
        item.external_id = item.url.clone();
    }
    item.platform_metrics = item.platform_metrics.filter(|m| m.is_finite() && *m >= 0.0);
    Some(item)
}

type FetchResult = Result<anyhow::Result<Vec<RawItem>>, tokio::time::error::Elapsed>;

/// Fetch every source in sequential batches of `cfg.concurrency`.
///
/// Within a batch each source gets its own task and its own timeout; the batch as a
/// whole is cut off at `cfg.batch_timeout()`. A failing source yields zero items and a
/// report entry, never an error. Only cancellation aborts the pass.
pub async fn fetch_all(
    provider: Arc<dyn SourceProvider>,
    sources: &[Source],
    cfg: &FetchConfig,
    cancel: &CancellationToken,
) -> PipelineResult<FetchOutcome> {
    ensure_metrics_described();

    let mut outcome = FetchOutcome::default();
    let batch_size = cfg.concurrency.max(1);

    for (batch_no, batch) in sources.chunks(batch_size).enumerate() {
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        let t0 = Instant::now();

        let mut set: JoinSet<(usize, FetchResult, u64)> = JoinSet::new();
        let mut pending: HashMap<tokio::task::Id, usize> = HashMap::new();
        for (idx, src) in batch.iter().enumerate() {
            let p = provider.clone();
            let id = src.source_id.clone();
            let limit = cfg.page_size;
            let per_source = cfg.per_source_timeout();
            let handle = set.spawn(async move {
                let started = Instant::now();
                let res = tokio::time::timeout(per_source, p.fetch_items(&id, limit)).await;
                (idx, res, started.elapsed().as_millis() as u64)
            });
            pending.insert(handle.id(), idx);
        }

        let mut results: Vec<Option<(FetchStatus, Vec<RawItem>, u64)>> = vec![None; batch.len()];
        let deadline = tokio::time::Instant::now() + cfg.batch_timeout();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    set.abort_all();
                    tracing::info!(target: "ingest", batch = batch_no, "fetch cancelled, abandoning in-flight sources");
                    return Err(PipelineError::Cancelled);
                }
                joined = tokio::time::timeout_at(deadline, set.join_next_with_id()) => {
                    match joined {
                        Err(_) => {
                            set.abort_all();
                            tracing::warn!(
                                target: "ingest",
                                batch = batch_no,
                                pending = pending.len(),
                                "batch timeout reached, abandoning remaining sources"
                            );
                            break;
                        }
                        Ok(None) => break,
                        Ok(Some(Ok((task_id, (idx, res, elapsed_ms))))) => {
                            pending.remove(&task_id);
                            let src = &batch[idx];
                            results[idx] = Some(settle(src, res, elapsed_ms, cfg.page_size));
                        }
                        Ok(Some(Err(join_err))) => {
                            if let Some(idx) = pending.remove(&join_err.id()) {
                                let reason = format!("fetch task failed: {join_err}");
                                results[idx] = Some((FetchStatus::Failed { reason }, Vec::new(), 0));
                            }
                        }
                    }
                }
            }
        }

        let batch_ms = t0.elapsed().as_millis() as u64;
        for (src, res) in batch.iter().zip(results) {
            let (status, mut items, elapsed_ms) =
                res.unwrap_or((FetchStatus::TimedOut, Vec::new(), batch_ms));
            match &status {
                FetchStatus::Ok { .. } => counter!("ingest_sources_ok_total").increment(1),
                FetchStatus::Failed { reason } => {
                    tracing::warn!(target: "ingest", source_id = %src.source_id, %reason, "source unavailable");
                    counter!("ingest_sources_failed_total").increment(1);
                }
                FetchStatus::TimedOut => {
                    tracing::warn!(target: "ingest", source_id = %src.source_id, "source timed out");
                    counter!("ingest_sources_failed_total").increment(1);
                }
            }
            outcome.items.append(&mut items);
            outcome.reports.push(SourceFetchReport {
                source_id: src.source_id.clone(),
                status,
                elapsed_ms,
            });
        }
        histogram!("ingest_batch_ms").record(batch_ms as f64);
    }

    counter!("ingest_items_total").increment(outcome.items.len() as u64);
    tracing::info!(
        target: "ingest",
        sources = sources.len(),
        ok = outcome.sources_ok(),
        failed = outcome.sources_failed(),
        items = outcome.items.len(),
        "fetch pass finished"
    );
    Ok(outcome)
}

fn settle(
    src: &Source,
    res: FetchResult,
    elapsed_ms: u64,
    limit: usize,
) -> (FetchStatus, Vec<RawItem>, u64) {
    match res {
        Err(_) => (FetchStatus::TimedOut, Vec::new(), elapsed_ms),
        Ok(Err(e)) => (
            FetchStatus::Failed {
                reason: format!("{e:#}"),
            },
            Vec::new(),
            elapsed_ms,
        ),
        Ok(Ok(raw)) => {
            let total = raw.len();
            let items: Vec<RawItem> = raw
                .into_iter()
                .take(limit)
                .filter_map(|it| normalize_item(it, &src.source_id))
                .collect();
            let dropped = total.min(limit) - items.len();
            if dropped > 0 {
                counter!("ingest_items_dropped_total").increment(dropped as u64);
            }
            (FetchStatus::Ok { items: items.len() }, items, elapsed_ms)
        }
    }
}

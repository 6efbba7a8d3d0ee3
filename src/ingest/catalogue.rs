//! # Source Catalogue
//!
//! Snapshot of the upstream source list for one run, plus cache-aside lookups of
//! per-source metadata (weight, category).
//!
//! - Loaded once at pipeline start; read-only for the rest of the run.
//! - Duplicate ids keep the first entry; blank ids are dropped.
//! - Weights are clamped to `[0.0, 1.0]`.

use anyhow::anyhow;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::cache::CacheTier;
use crate::error::{PipelineError, PipelineResult};
use crate::ingest::types::SourceProvider;
use crate::model::Source;

/// Metadata the scoring stage needs about a source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceMeta {
    pub weight: f64,
    pub category: String,
}

impl SourceMeta {
    fn unknown() -> Self {
        Self {
            weight: 0.0,
            category: String::new(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SourceCatalogue {
    sources: Vec<Source>,
    by_id: HashMap<String, usize>,
}

impl SourceCatalogue {
    /// Pull the source list from the provider. Failure or timeout here fails the run.
    pub async fn load(
        provider: &dyn SourceProvider,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> PipelineResult<Self> {
        let listed = tokio::select! {
            _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
            res = tokio::time::timeout(timeout, provider.list_sources()) => res,
        };
        let reason = match listed {
            Ok(Ok(sources)) => return Ok(Self::from_sources(sources)),
            Ok(Err(e)) => format!("{e:#}"),
            Err(_) => format!("listing sources timed out after {}s", timeout.as_secs()),
        };
        tracing::error!(target: "ingest", provider = provider.name(), error = %reason, "listing sources failed");
        Err(PipelineError::CatalogueUnavailable(reason))
    }

    pub fn from_sources(listed: Vec<Source>) -> Self {
        let mut sources = Vec::with_capacity(listed.len());
        let mut by_id = HashMap::with_capacity(listed.len());
        for mut s in listed {
            s.source_id = s.source_id.trim().to_string();
            if s.source_id.is_empty() || by_id.contains_key(&s.source_id) {
                tracing::debug!(target: "ingest", source_id = %s.source_id, "skipping blank or duplicate source");
                continue;
            }
            s.weight = clamp01(s.weight);
            by_id.insert(s.source_id.clone(), sources.len());
            sources.push(s);
        }
        Self { sources, by_id }
    }

    pub fn sources(&self) -> &[Source] {
        &self.sources
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn get(&self, source_id: &str) -> Option<&Source> {
        self.by_id.get(source_id).map(|&i| &self.sources[i])
    }

    /// Weight/category for a source, read through the cache.
    ///
    /// On a miss the in-run snapshot is authoritative. Sources absent from the
    /// snapshot get weight 0 and no category.
    pub async fn meta_for(&self, source_id: &str, cache: &CacheTier) -> SourceMeta {
        let snapshot = self.get(source_id).map(|s| SourceMeta {
            weight: s.weight,
            category: s.category.clone(),
        });
        let looked_up = cache
            .source_meta(source_id, || async {
                snapshot
                    .clone()
                    .ok_or_else(|| anyhow!("source `{source_id}` not in catalogue"))
            })
            .await;
        match looked_up {
            Ok(mut meta) => {
                meta.weight = clamp01(meta.weight);
                meta
            }
            Err(_) => SourceMeta::unknown(),
        }
    }
}

/// Clamp to [0.0, 1.0]; NaN counts as 0.
fn clamp01(x: f64) -> f64 {
    if x.is_nan() {
        0.0
    } else {
        x.clamp(0.0, 1.0)
    }
}

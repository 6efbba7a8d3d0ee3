// src/ingest/types.rs
use anyhow::Result;
use serde::Serialize;

use crate::model::{RawItem, Source};

/// Upstream catalogue + per-source fetch. Calls may fail individually and
/// nothing may be assumed about ordering across sources.
#[async_trait::async_trait]
pub trait SourceProvider: Send + Sync {
    async fn list_sources(&self) -> Result<Vec<Source>>;
    async fn fetch_items(&self, source_id: &str, limit: usize) -> Result<Vec<RawItem>>;
    fn name(&self) -> &'static str;
}

/// How one source fared during a fetch pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FetchStatus {
    Ok { items: usize },
    Failed { reason: String },
    TimedOut,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceFetchReport {
    pub source_id: String,
    #[serde(flatten)]
    pub status: FetchStatus,
    pub elapsed_ms: u64,
}

impl SourceFetchReport {
    pub fn is_ok(&self) -> bool {
        matches!(self.status, FetchStatus::Ok { .. })
    }
}

/// Output of one fetch pass over all sources.
#[derive(Debug, Default)]
pub struct FetchOutcome {
    pub items: Vec<RawItem>,
    pub reports: Vec<SourceFetchReport>,
}

impl FetchOutcome {
    pub fn sources_ok(&self) -> usize {
        self.reports.iter().filter(|r| r.is_ok()).count()
    }

    pub fn sources_failed(&self) -> usize {
        self.reports.len() - self.sources_ok()
    }
}

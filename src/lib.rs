// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod cache;
pub mod cluster;
pub mod config;
pub mod error;
pub mod history;
pub mod keywords;
pub mod metrics;
pub mod model;
pub mod pipeline;
pub mod scheduler;
pub mod scoring;
pub mod store;

// Catalogue, fetch orchestration, normalization, providers
pub mod ingest;

// ---- Re-exports for stable public API ----
pub use crate::config::HeatConfig;
pub use crate::error::{PipelineError, PipelineResult};
pub use crate::model::{HeatScoreRecord, HeatTier, Keyword, RawItem, Source};
pub use crate::pipeline::{HeatEngine, RunReport, RunStatus};
pub use crate::scheduler::{Scheduler, SchedulerState, TriggerOutcome};
pub use crate::store::{HeatQuery, HeatStore};

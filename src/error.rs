//! Error taxonomy for a pipeline run.
//!
//! Only `PersistenceFailure`, `CatalogueUnavailable` and `Cancelled` end a run;
//! the rest are absorbed by the stage that hit them and counted in the run report.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("source `{source_id}` unavailable: {reason}")]
    SourceUnavailable { source_id: String, reason: String },

    #[error("keyword extraction degraded for `{news_id}`: {reason}")]
    ExtractionDegraded { news_id: String, reason: String },

    #[error("cache unavailable: {0}")]
    CacheUnavailable(String),

    #[error("persistence failure: {0}")]
    PersistenceFailure(String),

    #[error("source catalogue unavailable: {0}")]
    CatalogueUnavailable(String),

    #[error("a run is already in progress")]
    RunAlreadyInProgress,

    #[error("run cancelled")]
    Cancelled,
}

impl PipelineError {
    /// Whether this error aborts the whole run.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PipelineError::PersistenceFailure(_)
                | PipelineError::CatalogueUnavailable(_)
                | PipelineError::Cancelled
        )
    }
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

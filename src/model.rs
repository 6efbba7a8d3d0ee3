//! Core data types shared by every pipeline stage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A content source as described by the catalogue.
///
/// `weight` is an operator-assigned trust multiplier; the engine never computes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub source_id: String,
    pub name: String,
    #[serde(default)]
    pub category: String,
    #[serde(default = "default_source_weight")]
    pub weight: f64,
}

fn default_source_weight() -> f64 {
    0.5
}

/// One item as returned by a source provider. Consumed by the pipeline, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawItem {
    pub source_id: String,
    pub external_id: String,
    pub title: String,
    pub body: Option<String>,
    pub url: String,
    pub published_at: DateTime<Utc>,
    /// Opaque, platform-specific popularity indicator (views, reposts, ...).
    pub platform_metrics: Option<f64>,
}

impl RawItem {
    /// Identity of the item across runs: `source_id:external_id`.
    pub fn news_id(&self) -> String {
        format!("{}:{}", self.source_id, self.external_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Keyword {
    pub term: String,
    pub weight: f64,
}

/// Ordered keywords, highest weight first.
pub type KeywordSet = Vec<Keyword>;

/// A fetched item after keyword extraction.
#[derive(Debug, Clone)]
pub struct AnalyzedItem {
    pub item: RawItem,
    pub keywords: KeywordSet,
}

impl AnalyzedItem {
    pub fn top_keyword(&self) -> Option<&str> {
        self.keywords.first().map(|k| k.term.as_str())
    }
}

/// Fixed-threshold bucketing of the composite score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeatTier {
    Viral,
    Hot,
    Trending,
    Moderate,
    Low,
    Unlabeled,
}

impl HeatTier {
    pub fn from_score(score: f64) -> Self {
        if score >= 90.0 {
            HeatTier::Viral
        } else if score >= 70.0 {
            HeatTier::Hot
        } else if score >= 50.0 {
            HeatTier::Trending
        } else if score >= 30.0 {
            HeatTier::Moderate
        } else if score > 0.0 {
            HeatTier::Low
        } else {
            HeatTier::Unlabeled
        }
    }

    pub fn label(&self) -> Option<&'static str> {
        match self {
            HeatTier::Viral => Some("viral"),
            HeatTier::Hot => Some("hot"),
            HeatTier::Trending => Some("trending"),
            HeatTier::Moderate => Some("moderate"),
            HeatTier::Low => Some("low"),
            HeatTier::Unlabeled => None,
        }
    }
}

/// The persisted entity: one row per `news_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeatScoreRecord {
    pub id: Uuid,
    pub news_id: String,
    pub source_id: String,
    pub title: String,
    pub url: String,
    pub heat_score: f64,
    pub relevance_score: f64,
    pub recency_score: f64,
    pub popularity_score: f64,
    pub cross_source_score: f64,
    /// Catalogue weight as seen at scoring time (not the scaled sub-score).
    pub source_weight: f64,
    pub keywords: KeywordSet,
    pub tier: HeatTier,
    pub calculated_at: DateTime<Utc>,
    pub published_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl HeatScoreRecord {
    /// True when every score is finite and the composite is inside [0,100].
    pub fn is_well_formed(&self) -> bool {
        let scores = [
            self.heat_score,
            self.relevance_score,
            self.recency_score,
            self.popularity_score,
            self.cross_source_score,
            self.source_weight,
        ];
        !self.news_id.is_empty()
            && scores.iter().all(|s| s.is_finite())
            && (0.0..=100.0).contains(&self.heat_score)
    }

    /// Apply this freshly computed record on top of an existing one.
    ///
    /// Keeps the existing `id` and first-seen `published_at`; `calculated_at` is
    /// bumped if the clock did not move past the previous value.
    pub fn merged_onto(mut self, existing: &HeatScoreRecord) -> Self {
        self.id = existing.id;
        self.published_at = existing.published_at;
        if self.calculated_at <= existing.calculated_at {
            self.calculated_at = existing.calculated_at + chrono::Duration::microseconds(1);
        }
        if self.updated_at < self.calculated_at {
            self.updated_at = self.calculated_at;
        }
        self
    }
}

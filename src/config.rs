// src/config.rs
//! Engine configuration, loaded from TOML with env overrides.
//!
//! Everything the scoring engine tunes (decay constants, popularity baselines,
//! component weights) lives here as plain immutable values. A run takes a
//! snapshot of `HeatConfig` and never looks at ambient state.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

// --- env defaults & names ---
pub const DEFAULT_HEAT_CONFIG_PATH: &str = "config/heat.toml";
pub const ENV_HEAT_CONFIG_PATH: &str = "HEAT_CONFIG_PATH";
pub const ENV_FETCH_CONCURRENCY: &str = "HEAT_FETCH_CONCURRENCY";
pub const ENV_CLUSTER_THRESHOLD: &str = "HEAT_CLUSTER_THRESHOLD";
pub const ENV_SCHEDULER_INTERVAL_SECS: &str = "HEAT_SCHEDULER_INTERVAL_SECS";
pub const ENV_STORE_PATH: &str = "HEAT_STORE_PATH";

/// One year; longer windows overflow chrono's duration arithmetic.
pub const MAX_HISTORY_WINDOW_HOURS: u64 = 24 * 365;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HeatConfig {
    pub fetch: FetchConfig,
    pub keywords: KeywordConfig,
    pub cluster: ClusterConfig,
    pub scoring: ScoringConfig,
    pub cache: CacheConfig,
    pub scheduler: SchedulerConfig,
    pub store: StoreConfig,
    pub feeds: Vec<FeedSource>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Max sources fetched concurrently (batch size).
    pub concurrency: usize,
    /// Items requested per source.
    pub page_size: usize,
    pub per_source_timeout_secs: u64,
    /// Hard bound for one batch, independent of per-source timeouts.
    pub batch_timeout_secs: u64,
    /// Bound on listing the source catalogue at the start of a run.
    pub catalogue_timeout_secs: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            page_size: 50,
            per_source_timeout_secs: 10,
            batch_timeout_secs: 15,
            catalogue_timeout_secs: 10,
        }
    }
}

impl FetchConfig {
    pub fn per_source_timeout(&self) -> Duration {
        Duration::from_secs(self.per_source_timeout_secs)
    }
    pub fn batch_timeout(&self) -> Duration {
        Duration::from_secs(self.batch_timeout_secs)
    }
    pub fn catalogue_timeout(&self) -> Duration {
        Duration::from_secs(self.catalogue_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeywordConfig {
    pub max_terms: usize,
    pub min_term_len: usize,
    /// Multiplier applied to term counts found in the title.
    pub title_boost: f64,
}

impl Default for KeywordConfig {
    fn default() -> Self {
        Self {
            max_terms: 5,
            min_term_len: 3,
            title_boost: 2.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub similarity_threshold: f64,
    /// Items published further apart than this are only compared if they share a top keyword.
    pub candidate_window_hours: f64,
    /// Distinct-source count at which the cross-source score saturates at 100.
    pub cross_source_saturation: usize,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.65,
            candidate_window_hours: 6.0,
            cross_source_saturation: 5,
        }
    }
}

/// Weights of the five sub-scores in the composite.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComponentWeights {
    pub relevance: f64,
    pub recency: f64,
    pub popularity: f64,
    pub cross_source: f64,
    pub source_weight: f64,
}

impl Default for ComponentWeights {
    fn default() -> Self {
        // Relevance and recency lead; raw popularity stays small so one outlier can't dominate.
        Self {
            relevance: 0.30,
            recency: 0.30,
            popularity: 0.10,
            cross_source: 0.20,
            source_weight: 0.10,
        }
    }
}

impl ComponentWeights {
    fn sanitized(self) -> Self {
        fn nn(x: f64) -> f64 {
            if x.is_finite() && x > 0.0 {
                x
            } else {
                0.0
            }
        }
        Self {
            relevance: nn(self.relevance),
            recency: nn(self.recency),
            popularity: nn(self.popularity),
            cross_source: nn(self.cross_source),
            source_weight: nn(self.source_weight),
        }
    }
}

/// Recency decay shape. One shape applies to the whole run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DecayShape {
    /// `100 * e^(-h / tau)` with a per-category tau, zero from `cutoff_hours` on.
    Exponential { cutoff_hours: f64 },
    /// 100 -> 50 over `[0, full_window_hours]`, 50 -> 0 over `[full_window_hours, cutoff_hours]`.
    TwoStageLinear {
        full_window_hours: f64,
        cutoff_hours: f64,
    },
}

impl Default for DecayShape {
    fn default() -> Self {
        DecayShape::Exponential { cutoff_hours: 72.0 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub weights: ComponentWeights,
    /// Per-category overrides of `weights`.
    pub category_weights: BTreeMap<String, ComponentWeights>,
    pub decay: DecayShape,
    pub default_tau_hours: f64,
    pub decay_tau_hours: BTreeMap<String, f64>,
    pub default_popularity_baseline: f64,
    /// Per-source metric scale, keyed by `source_id`.
    pub popularity_baselines: BTreeMap<String, f64>,
    /// Average number of other items sharing a keyword that maps to relevance 100.
    pub relevance_baseline: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            weights: ComponentWeights::default(),
            category_weights: BTreeMap::new(),
            decay: DecayShape::default(),
            default_tau_hours: 24.0,
            decay_tau_hours: BTreeMap::new(),
            default_popularity_baseline: 10_000.0,
            popularity_baselines: BTreeMap::new(),
            relevance_baseline: 3.0,
        }
    }
}

impl ScoringConfig {
    pub fn weights_for(&self, category: &str) -> ComponentWeights {
        self.category_weights
            .get(category)
            .copied()
            .unwrap_or(self.weights)
    }

    pub fn tau_for(&self, category: &str) -> f64 {
        self.decay_tau_hours
            .get(category)
            .copied()
            .filter(|t| t.is_finite() && *t > 0.0)
            .unwrap_or(self.default_tau_hours)
    }

    pub fn popularity_baseline_for(&self, source_id: &str) -> f64 {
        self.popularity_baselines
            .get(source_id)
            .copied()
            .filter(|b| b.is_finite() && *b > 0.0)
            .unwrap_or(self.default_popularity_baseline)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub coverage_ttl_secs: u64,
    pub source_ttl_secs: u64,
    pub op_timeout_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            coverage_ttl_secs: 10 * 60,
            source_ttl_secs: 6 * 3600,
            op_timeout_ms: 250,
        }
    }
}

impl CacheConfig {
    pub fn coverage_ttl(&self) -> Duration {
        Duration::from_secs(self.coverage_ttl_secs)
    }
    pub fn source_ttl(&self) -> Duration {
        Duration::from_secs(self.source_ttl_secs)
    }
    pub fn op_timeout(&self) -> Duration {
        Duration::from_millis(self.op_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub interval_secs: u64,
    /// Run once immediately on start instead of waiting a full interval.
    pub run_on_start: bool,
    pub history_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30 * 60,
            run_on_start: true,
            history_capacity: 100,
        }
    }
}

impl SchedulerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub path: PathBuf,
    /// How far back stored records count towards keyword coverage.
    pub history_window_hours: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("state/heat_scores.json"),
            history_window_hours: 72,
        }
    }
}

/// A feed-backed source declared in config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedSource {
    pub source_id: String,
    pub name: String,
    #[serde(default)]
    pub category: String,
    #[serde(default = "default_feed_weight")]
    pub weight: f64,
    pub url: String,
}

fn default_feed_weight() -> f64 {
    0.5
}

impl HeatConfig {
    /// Load using env var + fallbacks:
    /// 1) $HEAT_CONFIG_PATH (must exist)
    /// 2) config/heat.toml
    /// 3) built-in defaults
    ///
    /// Env overrides are applied last, then values are sanitized.
    pub fn load() -> Result<Self> {
        let mut cfg = if let Ok(p) = std::env::var(ENV_HEAT_CONFIG_PATH) {
            Self::load_from(Path::new(&p))?
        } else {
            let default_path = PathBuf::from(DEFAULT_HEAT_CONFIG_PATH);
            if default_path.exists() {
                Self::load_from(&default_path)?
            } else {
                Self::default()
            }
        };
        cfg.apply_env_overrides();
        cfg.validate();
        Ok(cfg)
    }

    /// Load from an explicit TOML file (no env overrides).
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading heat config from {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("parsing heat config {}", path.display()))
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        let mut cfg: HeatConfig = toml::from_str(s)?;
        cfg.validate();
        Ok(cfg)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Some(n) = parse_env::<usize>(ENV_FETCH_CONCURRENCY) {
            self.fetch.concurrency = n;
        }
        if let Some(t) = parse_env::<f64>(ENV_CLUSTER_THRESHOLD) {
            self.cluster.similarity_threshold = t;
        }
        if let Some(s) = parse_env::<u64>(ENV_SCHEDULER_INTERVAL_SECS) {
            self.scheduler.interval_secs = s;
        }
        if let Ok(p) = std::env::var(ENV_STORE_PATH) {
            if !p.trim().is_empty() {
                self.store.path = PathBuf::from(p.trim());
            }
        }
    }

    /// Clamp everything into a usable range instead of failing on odd input.
    pub fn validate(&mut self) {
        self.fetch.concurrency = self.fetch.concurrency.max(1);
        self.fetch.page_size = self.fetch.page_size.max(1);
        self.fetch.per_source_timeout_secs = self.fetch.per_source_timeout_secs.max(1);
        self.fetch.batch_timeout_secs = self.fetch.batch_timeout_secs.max(1);
        self.fetch.catalogue_timeout_secs = self.fetch.catalogue_timeout_secs.max(1);
        self.store.history_window_hours = self
            .store
            .history_window_hours
            .clamp(1, MAX_HISTORY_WINDOW_HOURS);

        self.keywords.max_terms = self.keywords.max_terms.clamp(1, 32);
        if !self.keywords.title_boost.is_finite() || self.keywords.title_boost < 1.0 {
            self.keywords.title_boost = 1.0;
        }

        let t = self.cluster.similarity_threshold;
        self.cluster.similarity_threshold = if t.is_finite() {
            t.clamp(0.0, 1.0)
        } else {
            ClusterConfig::default().similarity_threshold
        };
        if !self.cluster.candidate_window_hours.is_finite()
            || self.cluster.candidate_window_hours < 0.0
        {
            self.cluster.candidate_window_hours = ClusterConfig::default().candidate_window_hours;
        }
        self.cluster.cross_source_saturation = self.cluster.cross_source_saturation.max(2);

        let sc = &mut self.scoring;
        sc.weights = sc.weights.sanitized();
        for w in sc.category_weights.values_mut() {
            *w = w.sanitized();
        }
        if !sc.default_tau_hours.is_finite() || sc.default_tau_hours <= 0.0 {
            sc.default_tau_hours = ScoringConfig::default().default_tau_hours;
        }
        if !sc.default_popularity_baseline.is_finite() || sc.default_popularity_baseline <= 0.0 {
            sc.default_popularity_baseline = ScoringConfig::default().default_popularity_baseline;
        }
        if !sc.relevance_baseline.is_finite() || sc.relevance_baseline <= 0.0 {
            sc.relevance_baseline = ScoringConfig::default().relevance_baseline;
        }
        sc.decay = match sc.decay {
            DecayShape::Exponential { cutoff_hours } => DecayShape::Exponential {
                cutoff_hours: positive_or(cutoff_hours, 72.0),
            },
            DecayShape::TwoStageLinear {
                full_window_hours,
                cutoff_hours,
            } => {
                let full = positive_or(full_window_hours, 24.0);
                let cutoff = positive_or(cutoff_hours, 48.0).max(full);
                DecayShape::TwoStageLinear {
                    full_window_hours: full,
                    cutoff_hours: cutoff,
                }
            }
        };

        self.scheduler.interval_secs = self.scheduler.interval_secs.max(1);
        self.scheduler.history_capacity = self.scheduler.history_capacity.clamp(1, 10_000);
    }
}

fn positive_or(x: f64, fallback: f64) -> f64 {
    if x.is_finite() && x > 0.0 {
        x
    } else {
        fallback
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name)
        .ok()
        .and_then(|s| s.trim().parse::<T>().ok())
}

//! Heat scoring.
//!
//! Five sub-scores, each in [0,100]:
//! - `relevance`    : how widely the item's keywords are covered by other items
//! - `recency`      : time decay since `published_at`
//! - `popularity`   : platform metric relative to a per-source baseline
//! - `cross_source` : taken from the item's dedup cluster
//! - `source_weight`: catalogue weight scaled to 100
//!
//! heat = Σ wᵢ·subᵢ (clamped). All tuning comes from `ScoringConfig`; the
//! functions here are pure given an explicit `now`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::config::{ComponentWeights, DecayShape, ScoringConfig};
use crate::model::{AnalyzedItem, HeatScoreRecord, HeatTier, Keyword};

/// Clamp into [0,100]; NaN maps to 0.
pub fn clamp_score(x: f64) -> f64 {
    if x.is_nan() {
        0.0
    } else {
        x.clamp(0.0, 100.0)
    }
}

fn clamp01(x: f64) -> f64 {
    if x.is_nan() {
        0.0
    } else {
        x.clamp(0.0, 1.0)
    }
}

/// Hours elapsed between `published_at` and `now`; future timestamps count as 0.
pub fn hours_since(published_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let ms = (now - published_at).num_milliseconds();
    (ms.max(0) as f64) / 3_600_000.0
}

/// Recency for `hours` elapsed under the given shape. Non-increasing in `hours`.
pub fn recency_score(hours: f64, shape: &DecayShape, tau_hours: f64) -> f64 {
    let h = if hours.is_finite() { hours.max(0.0) } else { f64::INFINITY };
    let raw = match *shape {
        DecayShape::Exponential { cutoff_hours } => {
            if h >= cutoff_hours || tau_hours <= 0.0 {
                0.0
            } else {
                100.0 * (-h / tau_hours).exp()
            }
        }
        DecayShape::TwoStageLinear {
            full_window_hours,
            cutoff_hours,
        } => {
            if h >= cutoff_hours {
                0.0
            } else if h <= full_window_hours {
                let frac = if full_window_hours > 0.0 {
                    h / full_window_hours
                } else {
                    1.0
                };
                100.0 - 50.0 * frac
            } else {
                let span = cutoff_hours - full_window_hours;
                50.0 * (1.0 - (h - full_window_hours) / span)
            }
        }
    };
    clamp_score(raw)
}

/// `100 × metrics / baseline`; absent or non-finite metrics score 0.
pub fn popularity_score(platform_metrics: Option<f64>, baseline: f64) -> f64 {
    match platform_metrics {
        Some(m) if m.is_finite() && baseline > 0.0 => clamp_score(100.0 * m / baseline),
        _ => 0.0,
    }
}

pub fn source_weight_score(weight: f64) -> f64 {
    100.0 * clamp01(weight)
}

/// Weighted mean of "other items sharing this term", scaled by `baseline`.
///
/// `coverage[i]` is the number of distinct items (this one included) carrying
/// `keywords[i]`.
pub fn relevance_score(keywords: &[Keyword], coverage: &[u64], baseline: f64) -> f64 {
    let mut num = 0.0;
    let mut den = 0.0;
    for (k, &c) in keywords.iter().zip(coverage) {
        let w = clamp01(k.weight);
        num += w * c.saturating_sub(1) as f64;
        den += w;
    }
    if den <= 0.0 || baseline <= 0.0 {
        return 0.0;
    }
    clamp_score(100.0 * (num / den) / baseline)
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct ScoreBreakdown {
    pub relevance: f64,
    pub recency: f64,
    pub popularity: f64,
    pub cross_source: f64,
    pub source_weight: f64,
    pub heat: f64,
}

impl ScoreBreakdown {
    pub fn tier(&self) -> HeatTier {
        HeatTier::from_score(self.heat)
    }
}

/// Weighted sum of sub-scores, clamped to [0,100].
pub fn composite(
    relevance: f64,
    recency: f64,
    popularity: f64,
    cross_source: f64,
    source_weight: f64,
    w: &ComponentWeights,
) -> ScoreBreakdown {
    let relevance = clamp_score(relevance);
    let recency = clamp_score(recency);
    let popularity = clamp_score(popularity);
    let cross_source = clamp_score(cross_source);
    let source_weight = clamp_score(source_weight);
    let heat = clamp_score(
        w.relevance * relevance
            + w.recency * recency
            + w.popularity * popularity
            + w.cross_source * cross_source
            + w.source_weight * source_weight,
    );
    ScoreBreakdown {
        relevance,
        recency,
        popularity,
        cross_source,
        source_weight,
        heat,
    }
}

/// Everything about one item the scorer needs besides the item itself.
#[derive(Debug, Clone, Copy)]
pub struct ScoreContext<'a> {
    pub category: &'a str,
    /// Raw catalogue weight; clamped here.
    pub source_weight: f64,
    pub cross_source_score: f64,
    /// Coverage count per keyword, aligned with `item.keywords`.
    pub coverage: &'a [u64],
}

/// Scores items against one config snapshot and one as-of time.
#[derive(Debug, Clone)]
pub struct Scorer<'a> {
    cfg: &'a ScoringConfig,
    now: DateTime<Utc>,
}

impl<'a> Scorer<'a> {
    pub fn new(cfg: &'a ScoringConfig, now: DateTime<Utc>) -> Self {
        Self { cfg, now }
    }

    pub fn score(&self, item: &AnalyzedItem, ctx: &ScoreContext<'_>) -> ScoreBreakdown {
        let raw = &item.item;
        let relevance =
            relevance_score(&item.keywords, ctx.coverage, self.cfg.relevance_baseline);
        let recency = recency_score(
            hours_since(raw.published_at, self.now),
            &self.cfg.decay,
            self.cfg.tau_for(ctx.category),
        );
        let popularity = popularity_score(
            raw.platform_metrics,
            self.cfg.popularity_baseline_for(&raw.source_id),
        );
        let out = composite(
            relevance,
            recency,
            popularity,
            ctx.cross_source_score,
            source_weight_score(ctx.source_weight),
            &self.cfg.weights_for(ctx.category),
        );
        tracing::trace!(target: "scoring", news_id = %raw.news_id(), heat = out.heat, "scored");
        out
    }

    /// Build the record to persist. `id` is fresh; the store keeps the old one on upsert.
    pub fn to_record(
        &self,
        item: &AnalyzedItem,
        breakdown: &ScoreBreakdown,
        source_weight: f64,
    ) -> HeatScoreRecord {
        let raw = &item.item;
        HeatScoreRecord {
            id: Uuid::new_v4(),
            news_id: raw.news_id(),
            source_id: raw.source_id.clone(),
            title: raw.title.clone(),
            url: raw.url.clone(),
            heat_score: breakdown.heat,
            relevance_score: breakdown.relevance,
            recency_score: breakdown.recency,
            popularity_score: breakdown.popularity,
            cross_source_score: breakdown.cross_source,
            source_weight: clamp01(source_weight),
            keywords: item.keywords.clone(),
            tier: breakdown.tier(),
            calculated_at: self.now,
            published_at: raw.published_at,
            updated_at: self.now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RawItem;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 4, 12, 0, 0).unwrap()
    }

    fn analyzed(age_hours: i64, metrics: Option<f64>, kws: &[(&str, f64)]) -> AnalyzedItem {
        AnalyzedItem {
            item: RawItem {
                source_id: "blog".into(),
                external_id: "7".into(),
                title: "Budget talks".into(),
                body: None,
                url: "https://blog.test/7".into(),
                published_at: now() - Duration::hours(age_hours),
                platform_metrics: metrics,
            },
            keywords: kws
                .iter()
                .map(|(t, w)| Keyword {
                    term: t.to_string(),
                    weight: *w,
                })
                .collect(),
        }
    }

    #[test]
    fn exponential_decay_and_cutoff() {
        let shape = DecayShape::Exponential { cutoff_hours: 72.0 };
        assert!((recency_score(0.0, &shape, 24.0) - 100.0).abs() < 1e-9);
        let one_tau = recency_score(24.0, &shape, 24.0);
        assert!((one_tau - 100.0 / std::f64::consts::E).abs() < 1e-9);
        assert_eq!(recency_score(72.0, &shape, 24.0), 0.0);
        assert_eq!(recency_score(f64::NAN, &shape, 24.0), 0.0);
    }

    #[test]
    fn two_stage_linear_breakpoints() {
        let shape = DecayShape::TwoStageLinear {
            full_window_hours: 24.0,
            cutoff_hours: 48.0,
        };
        assert!((recency_score(0.0, &shape, 1.0) - 100.0).abs() < 1e-9);
        assert!((recency_score(12.0, &shape, 1.0) - 75.0).abs() < 1e-9);
        assert!((recency_score(24.0, &shape, 1.0) - 50.0).abs() < 1e-9);
        assert!((recency_score(36.0, &shape, 1.0) - 25.0).abs() < 1e-9);
        assert_eq!(recency_score(48.0, &shape, 1.0), 0.0);
        assert_eq!(recency_score(71.0, &shape, 1.0), 0.0);
    }

    #[test]
    fn future_items_count_as_fresh() {
        assert_eq!(hours_since(now() + Duration::hours(2), now()), 0.0);
    }

    #[test]
    fn popularity_and_relevance() {
        assert_eq!(popularity_score(None, 1000.0), 0.0);
        assert!((popularity_score(Some(250.0), 1000.0) - 25.0).abs() < 1e-9);
        assert_eq!(popularity_score(Some(5e9), 1000.0), 100.0);

        let kws = vec![
            Keyword {
                term: "budget".into(),
                weight: 1.0,
            },
            Keyword {
                term: "senate".into(),
                weight: 0.5,
            },
        ];
        // budget shared with 3 others, senate with none: (3 + 0) / 1.5 = 2 -> 2/4 of baseline 4.
        let r = relevance_score(&kws, &[4, 1], 4.0);
        assert!((r - 50.0).abs() < 1e-9);
        assert_eq!(relevance_score(&[], &[], 3.0), 0.0);
    }

    #[test]
    fn zero_weight_stale_item_keeps_relevance() {
        let cfg = ScoringConfig {
            decay: DecayShape::TwoStageLinear {
                full_window_hours: 24.0,
                cutoff_hours: 48.0,
            },
            ..ScoringConfig::default()
        };
        let scorer = Scorer::new(&cfg, now());
        let item = analyzed(71, None, &[("budget", 1.0)]);
        let b = scorer.score(
            &item,
            &ScoreContext {
                category: "",
                source_weight: 0.0,
                cross_source_score: 0.0,
                coverage: &[4],
            },
        );
        assert_eq!(b.recency, 0.0);
        assert_eq!(b.popularity, 0.0);
        assert_eq!(b.source_weight, 0.0);
        assert!((b.relevance - 100.0).abs() < 1e-9);
        assert!((b.heat - 30.0).abs() < 1e-9);
        assert_eq!(b.tier(), HeatTier::Moderate);
    }

    #[test]
    fn category_overrides_apply() {
        let mut cfg = ScoringConfig::default();
        cfg.decay_tau_hours.insert("sports".into(), 6.0);
        cfg.category_weights.insert(
            "sports".into(),
            ComponentWeights {
                relevance: 0.0,
                recency: 1.0,
                popularity: 0.0,
                cross_source: 0.0,
                source_weight: 0.0,
            },
        );
        let scorer = Scorer::new(&cfg, now());
        let item = analyzed(6, None, &[]);
        let ctx = ScoreContext {
            category: "sports",
            source_weight: 1.0,
            cross_source_score: 0.0,
            coverage: &[],
        };
        let b = scorer.score(&item, &ctx);
        assert!((b.heat - 100.0 / std::f64::consts::E).abs() < 1e-9);
    }

    #[test]
    fn composite_is_clamped() {
        let heavy = ComponentWeights {
            relevance: 2.0,
            recency: 2.0,
            popularity: 2.0,
            cross_source: 2.0,
            source_weight: 2.0,
        };
        let b = composite(100.0, 100.0, f64::NAN, 250.0, -4.0, &heavy);
        assert_eq!(b.popularity, 0.0);
        assert_eq!(b.cross_source, 100.0);
        assert_eq!(b.source_weight, 0.0);
        assert_eq!(b.heat, 100.0);
    }

    #[test]
    fn record_carries_breakdown_and_raw_weight() {
        let cfg = ScoringConfig::default();
        let scorer = Scorer::new(&cfg, now());
        let item = analyzed(1, Some(500.0), &[("budget", 1.0)]);
        let b = scorer.score(
            &item,
            &ScoreContext {
                category: "",
                source_weight: 0.4,
                cross_source_score: 25.0,
                coverage: &[1],
            },
        );
        let rec = scorer.to_record(&item, &b, 0.4);
        assert_eq!(rec.news_id, "blog:7");
        assert!((rec.source_weight - 0.4).abs() < 1e-12);
        assert!((rec.cross_source_score - 25.0).abs() < 1e-12);
        assert_eq!(rec.calculated_at, now());
        assert!(rec.is_well_formed());
    }
}

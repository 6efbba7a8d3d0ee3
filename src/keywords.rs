//! Keyword extraction.
//!
//! `TextProcessor` is the pluggable seam; `FrequencyExtractor` is the built-in
//! implementation: Unicode word segmentation, English stop-word removal, and
//! frequency ranking where the first line (the headline) counts `title_boost`
//! times as much as the rest.

use anyhow::Result;
use once_cell::sync::OnceCell;
use std::collections::{BTreeMap, HashSet};
use unicode_segmentation::UnicodeSegmentation;

use crate::config::KeywordConfig;
use crate::error::PipelineError;
use crate::model::{Keyword, KeywordSet, RawItem};

/// Deterministic, pure keyword extraction.
pub trait TextProcessor: Send + Sync {
    fn extract_keywords(&self, text: &str, max_terms: usize) -> Result<Vec<Keyword>>;
    fn name(&self) -> &'static str;
}

fn stop_words() -> &'static HashSet<String> {
    static STOP: OnceCell<HashSet<String>> = OnceCell::new();
    STOP.get_or_init(|| {
        let mut set: HashSet<String> = stop_words::get(stop_words::LANGUAGE::English)
            .into_iter()
            .map(|w| w.to_lowercase())
            .collect();
        // Newswire filler the generic list misses.
        for w in ["said", "says", "new", "news", "report", "reports", "update"] {
            set.insert(w.to_string());
        }
        set
    })
}

#[derive(Debug, Clone)]
pub struct FrequencyExtractor {
    min_term_len: usize,
    title_boost: f64,
}

impl Default for FrequencyExtractor {
    fn default() -> Self {
        Self::from_config(&KeywordConfig::default())
    }
}

impl FrequencyExtractor {
    pub fn from_config(cfg: &KeywordConfig) -> Self {
        Self {
            min_term_len: cfg.min_term_len.max(1),
            title_boost: cfg.title_boost.max(1.0),
        }
    }

    fn keep(&self, token: &str) -> bool {
        if token.chars().all(|c| c.is_numeric()) {
            return false;
        }
        let n = token.chars().count();
        // Non-Latin scripts pack more meaning per character.
        let min = if token.is_ascii() {
            self.min_term_len
        } else {
            self.min_term_len.min(2)
        };
        n >= min && !stop_words().contains(token)
    }

    fn count_into(&self, text: &str, boost: f64, scores: &mut BTreeMap<String, f64>) {
        for w in text.unicode_words() {
            let token = w.to_lowercase();
            if self.keep(&token) {
                *scores.entry(token).or_insert(0.0) += boost;
            }
        }
    }
}

impl TextProcessor for FrequencyExtractor {
    fn extract_keywords(&self, text: &str, max_terms: usize) -> Result<Vec<Keyword>> {
        let (head, rest) = text.split_once('\n').unwrap_or((text, ""));
        let mut scores: BTreeMap<String, f64> = BTreeMap::new();
        self.count_into(head, self.title_boost, &mut scores);
        self.count_into(rest, 1.0, &mut scores);

        let max = scores.values().copied().fold(0.0_f64, f64::max);
        if max <= 0.0 {
            return Ok(Vec::new());
        }

        let mut ranked: Vec<(String, f64)> = scores.into_iter().collect();
        // Highest score first; BTreeMap order already makes ties alphabetical, sort is stable.
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        Ok(ranked
            .into_iter()
            .take(max_terms)
            .map(|(term, s)| Keyword {
                term,
                weight: s / max,
            })
            .collect())
    }

    fn name(&self) -> &'static str {
        "frequency"
    }
}

/// Extract keywords for one item (headline on the first line, body after).
///
/// The result is clamped to `max_terms` terms with weights in `[0,1]`. Any
/// processor error comes back as `ExtractionDegraded`; callers continue with an
/// empty set.
pub fn extract_for_item(
    processor: &dyn TextProcessor,
    item: &RawItem,
    max_terms: usize,
) -> std::result::Result<KeywordSet, PipelineError> {
    let text = match item.body.as_deref() {
        Some(body) => format!("{}\n{}", item.title, body),
        None => item.title.clone(),
    };
    let raw = processor
        .extract_keywords(&text, max_terms)
        .map_err(|e| PipelineError::ExtractionDegraded {
            news_id: item.news_id(),
            reason: format!("{e:#}"),
        })?;

    let mut seen = HashSet::new();
    Ok(raw
        .into_iter()
        .filter(|k| !k.term.is_empty() && seen.insert(k.term.clone()))
        .map(|k| Keyword {
            weight: if k.weight.is_finite() {
                k.weight.clamp(0.0, 1.0)
            } else {
                0.0
            },
            term: k.term,
        })
        .take(max_terms)
        .collect())
}

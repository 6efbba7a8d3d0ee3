//! Near-duplicate clustering across sources.
//!
//! Titles are reduced to fingerprints (lowercase alphanumerics of any script),
//! compared only inside a candidate window (close publish times or a shared top
//! keyword), and pairs at or above the threshold are merged with union-find.
//!
//! Union-find takes connected components, so A~B and B~C puts A and C together
//! even when A and C alone would fall under the threshold. Components only grow
//! when edges are added, which keeps clustering monotonic in the threshold.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::Serialize;

use crate::config::ClusterConfig;
use crate::model::AnalyzedItem;

/// Similarity assigned to pairs whose lengths differ too much to compare.
pub const LENGTH_MISMATCH_SIMILARITY: f64 = 0.1;
/// Length gap (relative to the shorter fingerprint) beyond which pairs are not compared.
pub const MAX_LENGTH_GAP_RATIO: f64 = 0.4;

/// Lowercase, keep only alphanumeric characters (any script).
pub fn fingerprint(title: &str) -> String {
    title
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Edit-distance similarity of two fingerprints in `[0,1]`.
pub fn similarity(a: &str, b: &str) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a == b {
        return 1.0;
    }
    let la = a.chars().count();
    let lb = b.chars().count();
    let (shorter, longer) = if la < lb { (la, lb) } else { (lb, la) };
    if (longer - shorter) as f64 > MAX_LENGTH_GAP_RATIO * shorter as f64 {
        return LENGTH_MISMATCH_SIMILARITY;
    }
    1.0 - strsim::levenshtein(a, b) as f64 / longer as f64
}

/// Cross-source score for a cluster covered by `distinct_sources` sources.
pub fn cross_source_score(distinct_sources: usize, saturation: usize) -> f64 {
    if distinct_sources <= 1 {
        return 0.0;
    }
    let sat = saturation.max(2);
    (100.0 * (distinct_sources - 1) as f64 / (sat - 1) as f64).min(100.0)
}

#[derive(Debug, Clone)]
struct UnionFind {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            rank: vec![0; n],
        }
    }

    fn find(&mut self, x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        // Path compression.
        let mut cur = x;
        while self.parent[cur] != root {
            let next = self.parent[cur];
            self.parent[cur] = root;
            cur = next;
        }
        root
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return;
        }
        match self.rank[ra].cmp(&self.rank[rb]) {
            std::cmp::Ordering::Less => self.parent[ra] = rb,
            std::cmp::Ordering::Greater => self.parent[rb] = ra,
            std::cmp::Ordering::Equal => {
                self.parent[rb] = ra;
                self.rank[ra] = self.rank[ra].saturating_add(1);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DedupCluster {
    /// Indices into the clustered item slice, ascending.
    pub members: Vec<usize>,
    pub distinct_sources: usize,
    pub cross_source_score: f64,
}

#[derive(Debug, Clone, Default)]
pub struct Clustering {
    /// Ordered by smallest member index.
    pub clusters: Vec<DedupCluster>,
    /// Item index -> cluster index.
    pub assignment: Vec<usize>,
    pub pairs_compared: usize,
}

impl Clustering {
    pub fn cluster_of(&self, item_idx: usize) -> &DedupCluster {
        &self.clusters[self.assignment[item_idx]]
    }
}

/// Pairs worth comparing: publish times within the window, or same top keyword.
fn candidate_pairs(items: &[AnalyzedItem], window_hours: f64) -> BTreeSet<(usize, usize)> {
    let mut pairs = BTreeSet::new();
    let window_ms = (window_hours * 3_600_000.0) as i64;

    let mut by_time: Vec<usize> = (0..items.len()).collect();
    by_time.sort_by_key(|&i| (items[i].item.published_at, i));
    for (pos, &i) in by_time.iter().enumerate() {
        let ti = items[i].item.published_at;
        for &j in &by_time[pos + 1..] {
            if (items[j].item.published_at - ti).num_milliseconds() > window_ms {
                break;
            }
            pairs.insert((i.min(j), i.max(j)));
        }
    }

    let mut by_keyword: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for (i, it) in items.iter().enumerate() {
        if let Some(k) = it.top_keyword() {
            by_keyword.entry(k).or_default().push(i);
        }
    }
    for group in by_keyword.values() {
        for (a, &i) in group.iter().enumerate() {
            for &j in &group[a + 1..] {
                pairs.insert((i.min(j), i.max(j)));
            }
        }
    }
    pairs
}

/// Group items into dedup clusters. Runs on a single thread; the result depends only on the input.
pub fn cluster_items(items: &[AnalyzedItem], cfg: &ClusterConfig) -> Clustering {
    let prints: Vec<String> = items.iter().map(|it| fingerprint(&it.item.title)).collect();
    let pairs = candidate_pairs(items, cfg.candidate_window_hours);

    let mut uf = UnionFind::new(items.len());
    for &(i, j) in &pairs {
        if similarity(&prints[i], &prints[j]) >= cfg.similarity_threshold {
            uf.union(i, j);
        }
    }

    let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for i in 0..items.len() {
        let root = uf.find(i);
        groups.entry(root).or_default().push(i);
    }
    let mut member_lists: Vec<Vec<usize>> = groups.into_values().collect();
    member_lists.sort_by_key(|m| m[0]);

    let mut assignment = vec![0; items.len()];
    let clusters = member_lists
        .into_iter()
        .enumerate()
        .map(|(ci, members)| {
            for &m in &members {
                assignment[m] = ci;
            }
            let distinct_sources = members
                .iter()
                .map(|&m| items[m].item.source_id.as_str())
                .collect::<HashSet<_>>()
                .len();
            DedupCluster {
                cross_source_score: cross_source_score(
                    distinct_sources,
                    cfg.cross_source_saturation,
                ),
                distinct_sources,
                members,
            }
        })
        .collect::<Vec<_>>();

    tracing::debug!(
        target: "cluster",
        items = items.len(),
        clusters = clusters.len(),
        pairs = pairs.len(),
        "clustering done"
    );

    Clustering {
        clusters,
        assignment,
        pairs_compared: pairs.len(),
    }
}

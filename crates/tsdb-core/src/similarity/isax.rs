//! In-memory iSAX symbolic tree (spec 4.8).
//!
//! Grounded on `original_source/tsdb/isax.py`'s `iSaxTree`/`get_isax_word`,
//! adapted per design notes §9's re-architecture of the original's cyclic
//! parent/child object references into an arena: nodes live in a flat
//! `Vec<Node>` indexed by id, parents hold child ids, and a leaf's series
//! list is carried directly on the node rather than in a separate
//! content-addressed side table (small enough per leaf, `TH` bounded, to
//! not warrant one).
//!
//! Not persisted structurally: per SPEC_FULL 4.9, topology is a pure
//! function of insertion order plus the deterministic split rule, so the
//! facade rebuilds it from the primary index on load rather than
//! serializing nodes.

use std::collections::BTreeMap;

use statrs::distribution::{ContinuousCDF, Normal};

use crate::types::TimeSeries;

const W: usize = 4;
const BASE_CARDINALITY: usize = 4;
const TH: usize = 5;
const MAX_LEVEL: u32 = 10;

/// Quantile breakpoints of the standard normal for cardinality `a`, per
/// `isax.py`'s `get_breakpoints`.
fn breakpoints(a: usize) -> Vec<f64> {
    let normal = Normal::new(0.0, 1.0).expect("standard normal always constructs");
    (1..a).map(|i| normal.inverse_cdf(i as f64 / a as f64)).collect()
}

/// iSAX word for a series at a given chunk count `w` and cardinality `a`,
/// matching `isax.py`'s `get_isax_word` bit for bit (including its
/// unusual label ordering: the *lowest* chunk mean gets the *highest*
/// label value).
fn isax_word(ts: &TimeSeries, w: usize, a: usize) -> String {
    let series = ts.standardized();
    let lenchunk = if series.len() >= w { series.len() / w } else { 1 };

    let means: Vec<f64> = (0..w)
        .map(|chunk| {
            let start = (lenchunk * chunk).min(series.len());
            let end = (lenchunk * (chunk + 1)).min(series.len());
            let slice = &series[start..end.max(start)];
            if slice.is_empty() {
                0.0
            } else {
                slice.iter().sum::<f64>() / slice.len() as f64
            }
        })
        .collect();

    let bps = breakpoints(a);
    let digits = (a as f64).log2().round() as usize;

    let mut word = String::with_capacity(w * digits);
    for mean in means {
        let mut label = a - 1;
        for (j, b) in bps.iter().enumerate() {
            if mean < *b {
                label = a - 1 - j;
                break;
            }
            if j == bps.len() - 1 {
                label = 0;
            }
        }
        word.push_str(&format!("{label:0digits$b}"));
    }
    word
}

pub(crate) fn euclidean(a: &TimeSeries, b: &TimeSeries) -> f64 {
    a.values.iter().zip(&b.values).map(|(x, y)| (x - y).powi(2)).sum::<f64>().sqrt()
}

struct Node {
    word: String,
    level: u32,
    is_leaf: bool,
    children: BTreeMap<String, usize>,
    series: Vec<(String, TimeSeries)>,
}

/// Arena-backed n-ary iSAX tree. Index 0 is always the (wordless) root.
pub struct IsaxTree {
    nodes: Vec<Node>,
}

impl IsaxTree {
    pub fn new() -> Self {
        Self {
            nodes: vec![Node {
                word: String::new(),
                level: 0,
                is_leaf: true,
                children: BTreeMap::new(),
                series: Vec::new(),
            }],
        }
    }

    fn cardinality(level: u32) -> usize {
        BASE_CARDINALITY * 2usize.pow(level - 1)
    }

    /// Inserts `ts` under `pk`. Bit-identical series already present are
    /// ignored, per spec 4.8.
    pub fn insert(&mut self, ts: &TimeSeries, pk: &str) {
        self.insert_at(0, ts, pk, 1);
    }

    fn insert_at(&mut self, node_idx: usize, ts: &TimeSeries, pk: &str, level: u32) {
        let word = isax_word(ts, W, Self::cardinality(level));

        if let Some(&child_idx) = self.nodes[node_idx].children.get(&word) {
            if self.nodes[child_idx].is_leaf {
                if self.nodes[child_idx].series.iter().any(|(_, s)| s == ts) {
                    return;
                }
                let under_threshold = self.nodes[child_idx].series.len() < TH;
                if under_threshold || level == MAX_LEVEL {
                    self.nodes[child_idx].series.push((pk.to_string(), ts.clone()));
                } else {
                    let to_move = std::mem::take(&mut self.nodes[child_idx].series);
                    self.nodes[child_idx].is_leaf = false;
                    for (moved_pk, moved_ts) in to_move {
                        self.insert_at(child_idx, &moved_ts, &moved_pk, level + 1);
                    }
                    self.insert_at(child_idx, ts, pk, level + 1);
                }
            } else {
                self.insert_at(child_idx, ts, pk, level + 1);
            }
        } else {
            let new_idx = self.nodes.len();
            self.nodes.push(Node {
                word: word.clone(),
                level,
                is_leaf: true,
                children: BTreeMap::new(),
                series: vec![(pk.to_string(), ts.clone())],
            });
            self.nodes[node_idx].children.insert(word, new_idx);
        }
    }

    /// Removes `ts` from the tree. A no-op if not present.
    pub fn delete(&mut self, ts: &TimeSeries) {
        self.delete_at(0, ts, 1);
    }

    fn delete_at(&mut self, node_idx: usize, ts: &TimeSeries, level: u32) -> bool {
        let word = isax_word(ts, W, Self::cardinality(level));
        let Some(&child_idx) = self.nodes[node_idx].children.get(&word) else {
            return false;
        };
        if self.nodes[child_idx].is_leaf {
            let before = self.nodes[child_idx].series.len();
            self.nodes[child_idx].series.retain(|(_, s)| s != ts);
            self.nodes[child_idx].series.len() != before
        } else {
            self.delete_at(child_idx, ts, level + 1)
        }
    }

    /// Approximate nearest neighbor, descending to the leaf matching `ts`'s
    /// word; falls back to sibling leaves under the same parent if empty.
    pub fn nearest(&self, ts: &TimeSeries) -> Option<String> {
        self.nearest_at(0, ts, 1)
    }

    fn nearest_at(&self, node_idx: usize, ts: &TimeSeries, level: u32) -> Option<String> {
        let word = isax_word(ts, W, Self::cardinality(level));
        let &child_idx = self.nodes[node_idx].children.get(&word)?;

        if self.nodes[child_idx].is_leaf {
            if !self.nodes[child_idx].series.is_empty() {
                return Self::closest(&self.nodes[child_idx].series, ts);
            }
            let siblings: Vec<&(String, TimeSeries)> = self.nodes[node_idx]
                .children
                .values()
                .flat_map(|&idx| self.nodes[idx].series.iter())
                .collect();
            if siblings.is_empty() {
                None
            } else {
                Self::closest_ref(&siblings, ts)
            }
        } else {
            self.nearest_at(child_idx, ts, level + 1)
        }
    }

    fn closest(candidates: &[(String, TimeSeries)], ts: &TimeSeries) -> Option<String> {
        candidates
            .iter()
            .min_by(|(_, a), (_, b)| euclidean(ts, a).partial_cmp(&euclidean(ts, b)).unwrap())
            .map(|(pk, _)| pk.clone())
    }

    fn closest_ref(candidates: &[&(String, TimeSeries)], ts: &TimeSeries) -> Option<String> {
        candidates
            .iter()
            .min_by(|(_, a), (_, b)| euclidean(ts, a).partial_cmp(&euclidean(ts, b)).unwrap())
            .map(|(pk, _)| pk.clone())
    }

    /// Textual preorder rendering with per-leaf series counts and pks, for
    /// the `isax_tree` operation.
    pub fn render(&self) -> String {
        let mut out = String::from("root\n");
        self.render_at(0, &mut out);
        out
    }

    fn render_at(&self, node_idx: usize, out: &mut String) {
        for &child_idx in self.nodes[node_idx].children.values() {
            let node = &self.nodes[child_idx];
            let mut pks: Vec<&str> = node.series.iter().map(|(pk, _)| pk.as_str()).collect();
            pks.sort_unstable();
            out.push_str(&format!(
                "{}{}: {} {:?}\n",
                "---".repeat(node.level as usize),
                node.word,
                node.series.len(),
                pks
            ));
            self.render_at(child_idx, out);
        }
    }
}

impl Default for IsaxTree {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(seed: f64) -> TimeSeries {
        let timestamps: Vec<f64> = (0..20).map(|i| i as f64).collect();
        let values: Vec<f64> = (0..20).map(|i| (i as f64 * 0.3).sin() + seed).collect();
        TimeSeries::new(timestamps, values)
    }

    #[test]
    fn nearest_returns_previously_inserted_pk() {
        let mut tree = IsaxTree::new();
        tree.insert(&series(0.0), "a");
        tree.insert(&series(50.0), "b");
        assert_eq!(tree.nearest(&series(0.0)), Some("a".to_string()));
        assert_eq!(tree.nearest(&series(50.0)), Some("b".to_string()));
    }

    #[test]
    fn duplicate_series_are_ignored() {
        let mut tree = IsaxTree::new();
        tree.insert(&series(1.0), "a");
        tree.insert(&series(1.0), "b");
        assert_eq!(tree.nearest(&series(1.0)), Some("a".to_string()));
    }

    #[test]
    fn delete_removes_series() {
        let mut tree = IsaxTree::new();
        let ts = series(2.0);
        tree.insert(&ts, "a");
        tree.delete(&ts);
        // With the only series removed, a later query for the same shape
        // has nothing to find at that leaf (and no siblings either).
        assert_eq!(tree.nearest(&ts), None);
    }

    #[test]
    fn splits_leaf_beyond_threshold() {
        let mut tree = IsaxTree::new();
        for i in 0..(TH + 3) {
            tree.insert(&series(i as f64 * 0.001), &format!("pk{i}"));
        }
        // All series are nearly identical in shape; the tree should still
        // resolve a nearest neighbor for each inserted pk.
        for i in 0..(TH + 3) {
            assert!(tree.nearest(&series(i as f64 * 0.001)).is_some());
        }
    }

    proptest::proptest! {
        /// `isax_word`'s output length is a pure function of `w` and `a`
        /// (`w` digit-groups of `log2(a)` bits each), independent of the
        /// series' actual values, for every cardinality used along a
        /// descent (`BASE_CARDINALITY * 2^(level-1)` up to `MAX_LEVEL`).
        #[test]
        fn isax_word_length_is_fixed_by_w_and_a(
            values in proptest::collection::vec(-1000i32..1000, 20),
            level in 1u32..=MAX_LEVEL,
        ) {
            let ts = TimeSeries::new((0..values.len()).map(|i| i as f64).collect(), values.into_iter().map(|v| v as f64).collect());
            let a = IsaxTree::cardinality(level);
            let digits = (a as f64).log2().round() as usize;
            let word = isax_word(&ts, W, a);
            proptest::prop_assert_eq!(word.len(), W * digits);
        }

        /// The standard normal's quantile breakpoints are always sorted
        /// ascending, for every cardinality the tree can descend to.
        #[test]
        fn breakpoints_are_sorted_ascending(level in 1u32..=MAX_LEVEL) {
            let a = IsaxTree::cardinality(level);
            let bps = breakpoints(a);
            proptest::prop_assert!(bps.windows(2).all(|w| w[0] < w[1]), "breakpoints not sorted: {bps:?}");
        }
    }
}

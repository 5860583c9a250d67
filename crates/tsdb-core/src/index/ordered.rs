//! Ordered (balanced-tree) secondary index for high-cardinality fields
//! (spec 4.4). Grounded on the teacher's `btree_index.rs` (a `BTreeSet`
//! keyed for range scans) and on `original_source/tsdb/indexes_log.py`'s
//! `BinTreeIndex`, generalized from "set of pks per key" (in memory) to the
//! same durability harness every index in this crate shares.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::IndexError;
use crate::persist::Durable;
use crate::types::Value;

#[derive(Clone, Default, Serialize, Deserialize)]
struct OrderedState {
    /// Keyed by [`Value`], an externally tagged enum that `serde_json`
    /// refuses as a map key; persisted as an array of pairs instead (see
    /// [`crate::persist::btreemap_as_pairs`]), kept as a `BTreeMap` in
    /// memory so range scans and `sort_by` rely on `Value`'s `Ord`, not
    /// string order.
    #[serde(with = "crate::persist::btreemap_as_pairs")]
    tree: BTreeMap<Value, BTreeSet<String>>,
}

pub struct OrderedIndex {
    field: String,
    durable: Durable<OrderedState>,
}

impl OrderedIndex {
    pub fn open(dir: impl AsRef<Path>, field: &str) -> Result<Self, IndexError> {
        Ok(Self {
            field: field.to_string(),
            durable: Durable::open(dir, field)?,
        })
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn add_key(&mut self, value: Value) -> Result<(), IndexError> {
        self.durable.mutate(|s| {
            s.tree.entry(value).or_default();
        })
    }

    pub fn remove_key(&mut self, value: &Value) -> Result<(), IndexError> {
        self.durable.mutate(|s| {
            s.tree.remove(value);
        })
    }

    pub fn add_pk(&mut self, value: Value, pk: &str) -> Result<(), IndexError> {
        self.durable.mutate(|s| {
            s.tree.entry(value).or_default().insert(pk.to_string());
        })
    }

    pub fn remove_pk(&mut self, value: &Value, pk: &str) -> Result<(), IndexError> {
        self.durable.mutate(|s| {
            if let Some(set) = s.tree.get_mut(value) {
                set.remove(pk);
            }
        })
    }

    pub fn lookup(&self, value: &Value) -> BTreeSet<String> {
        self.durable.state().tree.get(value).cloned().unwrap_or_default()
    }

    /// In-order scan of `(value, pks)` pairs, used both for range
    /// predicates and for `sort_by` on an indexed field.
    pub fn items(&self) -> impl Iterator<Item = (&Value, &BTreeSet<String>)> {
        self.durable.state().tree.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &Value> {
        self.durable.state().tree.keys()
    }

    pub fn values(&self) -> impl Iterator<Item = &BTreeSet<String>> {
        self.durable.state().tree.values()
    }

    /// All pks whose value falls within `(lower, upper)`, honoring the
    /// comparator form of a predicate.
    pub fn range(&self, lower: Bound<Value>, upper: Bound<Value>) -> BTreeSet<String> {
        self.durable
            .state()
            .tree
            .range((lower, upper))
            .flat_map(|(_, pks)| pks.iter().cloned())
            .collect()
    }

    pub fn commit(&mut self) -> Result<(), IndexError> {
        self.durable.commit()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn range_scan_respects_bounds() {
        let dir = TempDir::new().unwrap();
        let mut idx = OrderedIndex::open(dir.path(), "order").unwrap();
        for (v, pk) in [(1, "a"), (3, "b"), (5, "c"), (7, "d")] {
            idx.add_pk(Value::Int(v), pk).unwrap();
        }
        let got = idx.range(Bound::Included(Value::Int(3)), Bound::Unbounded);
        assert_eq!(got, ["b", "c", "d"].into_iter().map(String::from).collect());
    }

    #[test]
    fn remove_pk_then_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let mut idx = OrderedIndex::open(dir.path(), "order").unwrap();
            idx.add_pk(Value::Int(3), "a").unwrap();
            idx.add_pk(Value::Int(3), "b").unwrap();
            idx.remove_pk(&Value::Int(3), "a").unwrap();
            idx.commit().unwrap();
        }
        let idx = OrderedIndex::open(dir.path(), "order").unwrap();
        assert_eq!(idx.lookup(&Value::Int(3)), BTreeSet::from(["b".to_string()]));
    }
}

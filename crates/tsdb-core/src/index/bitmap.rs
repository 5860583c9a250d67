//! Bitmap secondary index for low-cardinality (enumerated) fields,
//! always used for `deleted` and `vp` (spec 4.4).
//!
//! Grounded directly on `original_source/tsdb/indexes_log.py`'s
//! `BitMapIndex`: one bit string per possible value, the i-th bit set iff
//! the i-th live pk has that value; a `pks -> column` map tracks which
//! column belongs to which primary key so `add_pk`/`remove_pk` can rewrite
//! or shift columns. The Python version stores bit strings as `str`; this
//! rewrite uses `bitvec::BitVec` for the same one-bit-per-pk layout.

use std::collections::BTreeMap;
use std::path::Path;

use bitvec::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::IndexError;
use crate::persist::Durable;
use crate::types::Value;

#[derive(Clone, Default, Serialize, Deserialize)]
struct BitmapState {
    /// Keyed by [`Value`], an externally tagged enum that `serde_json`
    /// refuses as a map key; persisted as an array of pairs instead (see
    /// [`crate::persist::btreemap_as_pairs`]), kept as a `BTreeMap` in
    /// memory for `Value`'s `Ord`-based lookup.
    #[serde(with = "crate::persist::btreemap_as_pairs")]
    bits: BTreeMap<Value, BitVec<u8, Lsb0>>,
    /// Primary key -> column position within every bit string.
    pks: indexmap::IndexMap<String, usize>,
}

pub struct BitmapIndex {
    field: String,
    durable: Durable<BitmapState>,
}

impl BitmapIndex {
    pub fn open(dir: impl AsRef<Path>, field: &str, possible_values: &[Value]) -> Result<Self, IndexError> {
        let mut durable: Durable<BitmapState> = Durable::open(dir, field)?;
        // Seed any possible value that isn't already present (fresh index,
        // or a value added to the schema after the index was first built).
        let missing: Vec<Value> = possible_values
            .iter()
            .filter(|v| !durable.state().bits.contains_key(v))
            .cloned()
            .collect();
        if !missing.is_empty() {
            let width = durable.state().pks.len();
            durable.mutate(|s| {
                for v in missing {
                    s.bits.insert(v, bitvec![u8, Lsb0; 0; width]);
                }
            })?;
        }
        Ok(Self {
            field: field.to_string(),
            durable,
        })
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn add_key(&mut self, value: Value) -> Result<(), IndexError> {
        let width = self.durable.state().pks.len();
        self.durable.mutate(|s| {
            s.bits.entry(value).or_insert_with(|| bitvec![u8, Lsb0; 0; width]);
        })
    }

    pub fn remove_key(&mut self, value: &Value) -> Result<(), IndexError> {
        self.durable.mutate(|s| {
            s.bits.remove(value);
        })
    }

    /// Appends a new column for `pk` (if unseen) or rewrites its existing
    /// column to `value`.
    pub fn add_pk(&mut self, value: Value, pk: &str) -> Result<(), IndexError> {
        self.durable.mutate(|s| {
            let col = match s.pks.get(pk) {
                Some(&col) => col,
                None => {
                    let col = s.pks.len();
                    s.pks.insert(pk.to_string(), col);
                    for bits in s.bits.values_mut() {
                        bits.push(false);
                    }
                    col
                }
            };
            for (v, bits) in s.bits.iter_mut() {
                bits.set(col, *v == value);
            }
        })
    }

    /// Deletes `pk`'s column from every bit string and shifts higher
    /// columns down by one, per spec 4.4.
    pub fn remove_pk(&mut self, pk: &str) -> Result<(), IndexError> {
        self.durable.mutate(|s| {
            let Some(col) = s.pks.shift_remove(pk) else {
                return;
            };
            for other_col in s.pks.values_mut() {
                if *other_col > col {
                    *other_col -= 1;
                }
            }
            for bits in s.bits.values_mut() {
                bits.remove(col);
            }
        })
    }

    pub fn lookup(&self, value: &Value) -> std::collections::BTreeSet<String> {
        let state = self.durable.state();
        let Some(bits) = state.bits.get(value) else {
            return Default::default();
        };
        state
            .pks
            .iter()
            .filter(|(_, &col)| bits[col])
            .map(|(pk, _)| pk.clone())
            .collect()
    }

    /// Possible values that currently have at least one live pk set,
    /// matching the original `BitMapIndex.keys()`'s filtering of empty
    /// columns.
    pub fn keys(&self) -> Vec<Value> {
        self.durable
            .state()
            .bits
            .iter()
            .filter(|(_, bits)| bits.any())
            .map(|(v, _)| v.clone())
            .collect()
    }

    pub fn contains_pk(&self, pk: &str) -> bool {
        self.durable.state().pks.contains_key(pk)
    }

    pub fn commit(&mut self) -> Result<(), IndexError> {
        self.durable.commit()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn values() -> Vec<Value> {
        vec![Value::Bool(true), Value::Bool(false)]
    }

    #[test]
    fn add_and_lookup() {
        let dir = TempDir::new().unwrap();
        let mut idx = BitmapIndex::open(dir.path(), "deleted", &values()).unwrap();
        idx.add_pk(Value::Bool(false), "a").unwrap();
        idx.add_pk(Value::Bool(false), "b").unwrap();
        idx.add_pk(Value::Bool(true), "c").unwrap();

        assert_eq!(
            idx.lookup(&Value::Bool(false)),
            std::collections::BTreeSet::from(["a".to_string(), "b".to_string()])
        );
        assert_eq!(idx.lookup(&Value::Bool(true)), std::collections::BTreeSet::from(["c".to_string()]));
    }

    #[test]
    fn remove_pk_shifts_columns() {
        let dir = TempDir::new().unwrap();
        let mut idx = BitmapIndex::open(dir.path(), "deleted", &values()).unwrap();
        idx.add_pk(Value::Bool(false), "a").unwrap();
        idx.add_pk(Value::Bool(true), "b").unwrap();
        idx.add_pk(Value::Bool(false), "c").unwrap();

        idx.remove_pk("a").unwrap();
        assert_eq!(idx.lookup(&Value::Bool(true)), std::collections::BTreeSet::from(["b".to_string()]));
        assert_eq!(idx.lookup(&Value::Bool(false)), std::collections::BTreeSet::from(["c".to_string()]));
    }

    #[test]
    fn rewrite_existing_column() {
        let dir = TempDir::new().unwrap();
        let mut idx = BitmapIndex::open(dir.path(), "deleted", &values()).unwrap();
        idx.add_pk(Value::Bool(false), "a").unwrap();
        idx.add_pk(Value::Bool(true), "a").unwrap();
        assert!(idx.lookup(&Value::Bool(false)).is_empty());
        assert_eq!(idx.lookup(&Value::Bool(true)), std::collections::BTreeSet::from(["a".to_string()]));
    }
}

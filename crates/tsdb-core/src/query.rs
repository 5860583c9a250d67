//! Predicate evaluation, sort/limit, and projection (spec 4.5).
//!
//! Grounded on `original_source/tsdb/persistent_db.py`'s `select`: a
//! dict-of-comparators constraint narrows the running candidate set by
//! intersection once per comparator (so multiple comparators on one field
//! AND together); a list constraint unions matches across its values before
//! intersecting; a scalar constraint is a single lookup. Fields with no
//! secondary index fall back to a row-wise meta-heap scan over whatever
//! candidates already survived.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::error::DbError;
use crate::heap::{MetaHeap, TsHeap};
use crate::index::{IndexSet, SecondaryIndex};
use crate::schema::{Schema, DELETED_FIELD, PK_FIELD, TS_FIELD};
use crate::types::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Comparator {
    Lt,
    Gt,
    Eq,
    Ne,
    Le,
    Ge,
}

impl Comparator {
    fn matches(self, key: &Value, target: &Value) -> bool {
        match self {
            Comparator::Lt => key < target,
            Comparator::Gt => key > target,
            Comparator::Eq => key == target,
            Comparator::Ne => key != target,
            Comparator::Le => key <= target,
            Comparator::Ge => key >= target,
        }
    }
}

/// One field's constraint, per spec 4.5.
#[derive(Clone, Debug)]
pub enum Constraint {
    /// comparator -> value, ANDed together.
    Cmp(Vec<(Comparator, Value)>),
    /// membership, ORed together.
    List(Vec<Value>),
    /// equality.
    Scalar(Value),
}

pub type Predicate = BTreeMap<String, Constraint>;
pub type Row = HashMap<String, Value>;

#[derive(Clone, Debug, Default)]
pub struct SelectRequest {
    pub predicate: Predicate,
    /// `None` -> pks only. `Some(vec![])` -> all metadata fields plus pk,
    /// excluding ts/deleted. `Some(fields)` -> exactly those fields.
    pub fields: Option<Vec<String>>,
    /// `(field, descending)`.
    pub sort_by: Option<(String, bool)>,
    pub limit: Option<usize>,
}

fn index_matches(index: &SecondaryIndex, matches: impl Fn(&Value) -> bool) -> BTreeSet<String> {
    match index {
        SecondaryIndex::Ordered(ordered) => ordered
            .items()
            .filter(|(key, _)| matches(key))
            .flat_map(|(_, pks)| pks.iter().cloned())
            .collect(),
        SecondaryIndex::Bitmap(bitmap) => bitmap
            .keys()
            .into_iter()
            .filter(|key| matches(key))
            .flat_map(|key| bitmap.lookup(&key))
            .collect(),
    }
}

/// Loads the metadata record for every candidate pk, for an unindexed-field
/// row scan.
fn load_rows(candidates: &BTreeSet<String>, indexes: &IndexSet, meta_heap: &MetaHeap) -> Result<HashMap<String, Row>, DbError> {
    let mut rows = HashMap::with_capacity(candidates.len());
    for pk in candidates {
        let (_, meta_off) = indexes
            .primary
            .get(pk)
            .ok_or_else(|| DbError::Invariant(format!("pk `{pk}` missing from primary index mid-select")))?;
        rows.insert(pk.clone(), meta_heap.read(meta_off)?);
    }
    Ok(rows)
}

/// Narrows `candidates` by one predicate entry, per spec 4.5 step 3.
fn narrow_by_field(
    field: &str,
    constraint: &Constraint,
    candidates: BTreeSet<String>,
    schema: &Schema,
    indexes: &IndexSet,
    meta_heap: &MetaHeap,
) -> Result<BTreeSet<String>, DbError> {
    if field == PK_FIELD {
        return Ok(match constraint {
            Constraint::Scalar(Value::Str(pk)) => {
                if candidates.contains(pk) {
                    BTreeSet::from([pk.clone()])
                } else {
                    BTreeSet::new()
                }
            }
            Constraint::List(values) => {
                let wanted: BTreeSet<String> = values
                    .iter()
                    .filter_map(|v| match v {
                        Value::Str(s) => Some(s.clone()),
                        _ => None,
                    })
                    .collect();
                candidates.intersection(&wanted).cloned().collect()
            }
            _ => BTreeSet::new(),
        });
    }

    if schema.field(field).is_none() {
        // Unknown predicate fields are ignored, matching the reference
        // implementation's `if field in self.schema:` guard.
        return Ok(candidates);
    }

    if let Constraint::Cmp(clauses) = constraint {
        let mut narrowed = candidates;
        for (cmp, target) in clauses {
            let matched = match indexes.secondary(field) {
                Some(idx) => index_matches(idx, |key| cmp.matches(key, target)),
                None => {
                    let rows = load_rows(&narrowed, indexes, meta_heap)?;
                    narrowed
                        .iter()
                        .filter(|pk| rows.get(*pk).and_then(|r| r.get(field)).is_some_and(|v| cmp.matches(v, target)))
                        .cloned()
                        .collect()
                }
            };
            narrowed = narrowed.intersection(&matched).cloned().collect();
        }
        return Ok(narrowed);
    }

    let matched: BTreeSet<String> = match (constraint, indexes.secondary(field)) {
        (Constraint::List(values), Some(idx)) => values.iter().flat_map(|v| idx.lookup(v)).collect(),
        (Constraint::List(values), None) => {
            let rows = load_rows(&candidates, indexes, meta_heap)?;
            candidates
                .iter()
                .filter(|pk| rows.get(*pk).and_then(|r| r.get(field)).is_some_and(|v| values.contains(v)))
                .cloned()
                .collect()
        }
        (Constraint::Scalar(value), Some(idx)) => idx.lookup(value),
        (Constraint::Scalar(value), None) => {
            let rows = load_rows(&candidates, indexes, meta_heap)?;
            candidates
                .iter()
                .filter(|pk| rows.get(*pk).and_then(|r| r.get(field)) == Some(value))
                .cloned()
                .collect()
        }
        (Constraint::Cmp(_), _) => unreachable!("handled above"),
    };
    Ok(candidates.intersection(&matched).cloned().collect())
}

/// Evaluates a full select request (spec 4.5 steps 1-5).
pub fn select(
    schema: &Schema,
    indexes: &IndexSet,
    meta_heap: &MetaHeap,
    ts_heap: &TsHeap,
    req: &SelectRequest,
) -> Result<Vec<(String, Row)>, DbError> {
    // Step 1: all pks.
    let mut candidates: BTreeSet<String> = indexes.primary.keys().into_iter().collect();

    // Step 2: not-deleted. Deletion already removes the pk from every index
    // including the primary one, so this is a no-op under our uniform
    // removal semantics, but kept for literal fidelity to spec 4.5.
    if let Some(deleted_idx) = indexes.secondary(DELETED_FIELD) {
        let deleted = deleted_idx.lookup(&Value::Bool(true));
        candidates = candidates.difference(&deleted).cloned().collect();
    }

    // Step 3: narrow by predicate.
    for (field, constraint) in &req.predicate {
        candidates = narrow_by_field(field, constraint, candidates, schema, indexes, meta_heap)?;
    }

    let mut pks: Vec<String> = candidates.into_iter().collect();

    // Step 4: sort + limit.
    if let Some((field, descending)) = &req.sort_by {
        if field == PK_FIELD {
            pks.sort();
        } else {
            if !(indexes.has_secondary(field) || field == PK_FIELD) {
                return Err(DbError::UnknownSortField(field.clone()));
            }
            let mut keyed: Vec<(Value, String)> = Vec::with_capacity(pks.len());
            for pk in &pks {
                let (_, meta_off) = indexes
                    .primary
                    .get(pk)
                    .ok_or_else(|| DbError::Invariant(format!("pk `{pk}` missing from primary index mid-select")))?;
                let record = meta_heap.read(meta_off)?;
                let value = record
                    .get(field)
                    .cloned()
                    .ok_or_else(|| DbError::UnknownSortField(field.clone()))?;
                keyed.push((value, pk.clone()));
            }
            keyed.sort_by(|a, b| a.0.cmp(&b.0));
            pks = keyed.into_iter().map(|(_, pk)| pk).collect();
        }
        if *descending {
            pks.reverse();
        }
    } else {
        pks.sort();
    }

    if let Some(limit) = req.limit {
        pks.truncate(limit);
    }

    // Step 5: projection.
    let mut out = Vec::with_capacity(pks.len());
    for pk in pks {
        let row = project(&pk, &req.fields, indexes, meta_heap, ts_heap)?;
        out.push((pk, row));
    }

    Ok(out)
}

fn project(
    pk: &str,
    fields: &Option<Vec<String>>,
    indexes: &IndexSet,
    meta_heap: &MetaHeap,
    ts_heap: &TsHeap,
) -> Result<Row, DbError> {
    let (ts_off, meta_off) = indexes
        .primary
        .get(pk)
        .ok_or_else(|| DbError::Invariant(format!("pk `{pk}` missing from primary index mid-select")))?;

    Ok(match fields {
        None => Row::new(),
        Some(fields) if fields.is_empty() => {
            let mut record = meta_heap.read(meta_off)?;
            record.remove(TS_FIELD);
            record.remove(DELETED_FIELD);
            record.insert(PK_FIELD.to_string(), Value::Str(pk.to_string()));
            record
        }
        Some(fields) => {
            let mut row = Row::new();
            if fields.iter().any(|f| f == PK_FIELD) {
                row.insert(PK_FIELD.to_string(), Value::Str(pk.to_string()));
            }
            if fields.iter().any(|f| f == TS_FIELD) {
                let series = ts_heap.read(ts_off)?;
                row.insert(
                    TS_FIELD.to_string(),
                    Value::Str(serde_json::to_string(&series).expect("time series serializes")),
                );
            }
            let wanted_meta: Vec<&String> = fields.iter().filter(|f| f.as_str() != PK_FIELD && f.as_str() != TS_FIELD).collect();
            if !wanted_meta.is_empty() {
                let record = meta_heap.read(meta_off)?;
                for field in wanted_meta {
                    if let Some(value) = record.get(field) {
                        row.insert(field.clone(), value.clone());
                    }
                }
            }
            row
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldDescriptor, FieldType, IndexKind};
    use crate::types::TimeSeries;
    use std::collections::HashMap as Map;
    use tempfile::TempDir;

    fn fixture() -> (TempDir, Schema, IndexSet, MetaHeap, TsHeap) {
        let dir = TempDir::new().unwrap();
        let mut schema = Schema::new();
        schema
            .set_field("order", FieldDescriptor::new(FieldType::Int, IndexKind::Ordered))
            .unwrap();
        let indexes = IndexSet::open(dir.path().join("idx"), &schema).unwrap();
        let meta_heap = MetaHeap::open(dir.path().join("heap_meta"), dir.path().join("schema.idx"), &schema).unwrap();
        let ts_heap = TsHeap::open(dir.path().join("heap_ts"), 4).unwrap();
        (dir, schema, indexes, meta_heap, ts_heap)
    }

    fn insert_row(indexes: &mut IndexSet, meta_heap: &mut MetaHeap, ts_heap: &mut TsHeap, pk: &str, order: i64) {
        let series = TimeSeries::new(vec![0.0; 4], vec![order as f64; 4]);
        let ts_off = ts_heap.write(&series).unwrap();
        let mut meta = Map::new();
        meta.insert("order".to_string(), Value::Int(order));
        let meta_off = meta_heap.write(&meta, None).unwrap();
        indexes.primary.set(pk.to_string(), ts_off, meta_off).unwrap();
        if let Some(idx) = indexes.secondary_mut("order") {
            idx.add_pk(Value::Int(order), pk).unwrap();
        }
    }

    #[test]
    fn scalar_predicate_on_indexed_field() {
        let (_dir, schema, mut indexes, mut meta_heap, mut ts_heap) = fixture();
        insert_row(&mut indexes, &mut meta_heap, &mut ts_heap, "a", 3);
        insert_row(&mut indexes, &mut meta_heap, &mut ts_heap, "b", 7);

        let mut predicate = Predicate::new();
        predicate.insert("order".to_string(), Constraint::Scalar(Value::Int(3)));
        let req = SelectRequest {
            predicate,
            fields: None,
            sort_by: None,
            limit: None,
        };
        let got = select(&schema, &indexes, &meta_heap, &ts_heap, &req).unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].0, "a");
    }

    #[test]
    fn comparator_predicate_narrows_after_update() {
        let (_dir, schema, mut indexes, mut meta_heap, mut ts_heap) = fixture();
        insert_row(&mut indexes, &mut meta_heap, &mut ts_heap, "a", 7);

        let mut predicate = Predicate::new();
        predicate.insert("order".to_string(), Constraint::Cmp(vec![(Comparator::Ge, Value::Int(5))]));
        let req = SelectRequest {
            predicate,
            fields: None,
            sort_by: None,
            limit: None,
        };
        let got = select(&schema, &indexes, &meta_heap, &ts_heap, &req).unwrap();
        assert_eq!(got.iter().map(|(pk, _)| pk.clone()).collect::<Vec<_>>(), vec!["a"]);
    }

    #[test]
    fn sort_by_indexed_field_descending_with_limit() {
        let (_dir, schema, mut indexes, mut meta_heap, mut ts_heap) = fixture();
        insert_row(&mut indexes, &mut meta_heap, &mut ts_heap, "a", 1);
        insert_row(&mut indexes, &mut meta_heap, &mut ts_heap, "b", 5);
        insert_row(&mut indexes, &mut meta_heap, &mut ts_heap, "c", 3);

        let req = SelectRequest {
            predicate: Predicate::new(),
            fields: Some(vec![]),
            sort_by: Some(("order".to_string(), true)),
            limit: Some(2),
        };
        let got = select(&schema, &indexes, &meta_heap, &ts_heap, &req).unwrap();
        assert_eq!(got.iter().map(|(pk, _)| pk.clone()).collect::<Vec<_>>(), vec!["b", "c"]);
    }

    #[test]
    fn select_ts_field_round_trips_as_json_string() {
        let (_dir, schema, mut indexes, mut meta_heap, mut ts_heap) = fixture();
        insert_row(&mut indexes, &mut meta_heap, &mut ts_heap, "a", 3);

        let req = SelectRequest {
            predicate: Predicate::new(),
            fields: Some(vec![TS_FIELD.to_string()]),
            sort_by: None,
            limit: None,
        };
        let got = select(&schema, &indexes, &meta_heap, &ts_heap, &req).unwrap();
        assert_eq!(got.len(), 1);
        let encoded = match got[0].1.get(TS_FIELD) {
            Some(Value::Str(s)) => s,
            other => panic!("expected ts field as an encoded string, got {other:?}"),
        };
        let decoded: TimeSeries = serde_json::from_str(encoded).unwrap();
        assert_eq!(decoded, TimeSeries::new(vec![0.0; 4], vec![3.0; 4]));
    }

    #[test]
    fn unknown_sort_field_is_rejected() {
        let (_dir, schema, indexes, meta_heap, ts_heap) = fixture();
        let req = SelectRequest {
            predicate: Predicate::new(),
            fields: None,
            sort_by: Some(("nope".to_string(), false)),
            limit: None,
        };
        let err = select(&schema, &indexes, &meta_heap, &ts_heap, &req).unwrap_err();
        assert!(matches!(err, DbError::UnknownSortField(f) if f == "nope"));
    }
}

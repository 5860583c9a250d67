//! Serde-derived mirrors of the request/response payload shapes in spec §6,
//! kept for test parity with the length-prefixed JSON wire framing between
//! client and server (explicitly out of scope per spec §1: this module
//! carries no socket code, only the shapes a real dispatcher would encode).
//!
//! [`Value`] itself serializes internally as an externally-tagged enum (it
//! also backs the on-disk schema/index snapshots, where that tagging is
//! wanted); the wire protocol instead carries plain JSON scalars, so
//! [`WireValue`] is the untagged mirror used only at this boundary.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::{DbError, DbResult, Status};
use crate::query::{Comparator, Constraint, Predicate};
use crate::types::{TimeSeries, Value};

/// Untagged JSON mirror of [`Value`], matching the wire protocol's plain
/// scalar encoding (a bare JSON number/bool/string rather than `Value`'s
/// internal `{"Int": 5}` tagging).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
}

impl From<WireValue> for Value {
    fn from(v: WireValue) -> Self {
        match v {
            WireValue::Int(i) => Value::Int(i),
            WireValue::Float(f) => Value::Float(f),
            WireValue::Bool(b) => Value::Bool(b),
            WireValue::Str(s) => Value::Str(s),
        }
    }
}

impl From<Value> for WireValue {
    fn from(v: Value) -> Self {
        match v {
            Value::Int(i) => WireValue::Int(i),
            Value::Float(f) => WireValue::Float(f),
            Value::Bool(b) => WireValue::Bool(b),
            Value::Str(s) => WireValue::Str(s),
        }
    }
}

/// One field's constraint as it arrives over the wire, per spec §4.5: a
/// dict of comparator -> value, a list (membership), or a bare scalar
/// (equality).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireConstraint {
    Cmp(BTreeMap<String, WireValue>),
    List(Vec<WireValue>),
    Scalar(WireValue),
}

fn parse_comparator(s: &str) -> DbResult<Comparator> {
    match s {
        "<" => Ok(Comparator::Lt),
        ">" => Ok(Comparator::Gt),
        "==" => Ok(Comparator::Eq),
        "!=" => Ok(Comparator::Ne),
        "<=" => Ok(Comparator::Le),
        ">=" => Ok(Comparator::Ge),
        other => Err(DbError::Invariant(format!("unknown comparator `{other}`"))),
    }
}

impl WireConstraint {
    pub fn into_constraint(self) -> DbResult<Constraint> {
        Ok(match self {
            WireConstraint::Cmp(clauses) => Constraint::Cmp(
                clauses
                    .into_iter()
                    .map(|(cmp, v)| Ok((parse_comparator(&cmp)?, v.into())))
                    .collect::<DbResult<Vec<_>>>()?,
            ),
            WireConstraint::List(values) => Constraint::List(values.into_iter().map(Value::from).collect()),
            WireConstraint::Scalar(v) => Constraint::Scalar(v.into()),
        })
    }
}

pub type WirePredicate = BTreeMap<String, WireConstraint>;

pub fn predicate_from_wire(wire: WirePredicate) -> DbResult<Predicate> {
    wire.into_iter().map(|(field, c)| Ok((field, c.into_constraint()?))).collect()
}

/// The `additional` argument to `select`/`augmented_select`: `sort_by` as
/// `"+field"`/`"-field"` (default ascending) and a positive `limit`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Additional {
    pub sort_by: Option<String>,
    pub limit: Option<usize>,
}

impl Additional {
    /// Splits `"+field"`/`"-field"` (or a bare field name, ascending by
    /// default) into `(field, descending)`.
    pub fn sort_by_parsed(&self) -> Option<(String, bool)> {
        self.sort_by.as_ref().map(|s| match s.strip_prefix('-') {
            Some(field) => (field.to_string(), true),
            None => (s.strip_prefix('+').unwrap_or(s).to_string(), false),
        })
    }
}

/// One decoded client request, per the operation table in spec §6.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    InsertTs {
        pk: String,
        ts: TimeSeries,
    },
    DeleteTs {
        pk: String,
    },
    UpsertMeta {
        pk: String,
        meta: HashMap<String, WireValue>,
    },
    Select {
        #[serde(default)]
        predicate: WirePredicate,
        fields: Option<Vec<String>>,
        #[serde(default)]
        additional: Additional,
    },
    AugmentedSelect {
        proc: String,
        target: Vec<String>,
        #[serde(default)]
        arg: serde_json::Value,
        #[serde(default)]
        predicate: WirePredicate,
        #[serde(default)]
        additional: Additional,
    },
    InsertVp {
        pk: String,
    },
    DeleteVp {
        pk: String,
    },
    VpSimilaritySearch {
        ts: TimeSeries,
        k: usize,
    },
    IsaxSimilaritySearch {
        ts: TimeSeries,
    },
    IsaxTree,
    AddTrigger {
        proc: String,
        event: String,
        #[serde(default)]
        target: Vec<String>,
        #[serde(default)]
        arg: serde_json::Value,
    },
    RemoveTrigger {
        proc: String,
        event: String,
        target: Option<Vec<String>>,
    },
}

/// The wire-level outcome of any request: a [`Status`] plus an optional
/// JSON payload, per spec §6 ("every response carries a status ... and an
/// optional payload").
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Response {
    pub status: Status,
    pub payload: Option<serde_json::Value>,
}

impl Response {
    pub fn ok(payload: Option<serde_json::Value>) -> Self {
        Self {
            status: Status::Ok,
            payload,
        }
    }

    pub fn from_error(err: &DbError) -> Self {
        Self {
            status: err.status(),
            payload: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn additional_parses_sort_direction() {
        let a = Additional {
            sort_by: Some("-order".to_string()),
            limit: Some(2),
        };
        assert_eq!(a.sort_by_parsed(), Some(("order".to_string(), true)));

        let b = Additional {
            sort_by: Some("+order".to_string()),
            limit: None,
        };
        assert_eq!(b.sort_by_parsed(), Some(("order".to_string(), false)));

        let c = Additional {
            sort_by: Some("order".to_string()),
            limit: None,
        };
        assert_eq!(c.sort_by_parsed(), Some(("order".to_string(), false)));
    }

    #[test]
    fn scalar_constraint_round_trips_through_json() {
        let json = serde_json::json!({"order": 3});
        let predicate: WirePredicate = serde_json::from_value(json).unwrap();
        let constraint = predicate.get("order").cloned().unwrap().into_constraint().unwrap();
        assert!(matches!(constraint, Constraint::Scalar(Value::Int(3))));
    }

    #[test]
    fn comparator_constraint_round_trips_through_json() {
        let json = serde_json::json!({"order": {">=": 5}});
        let predicate: WirePredicate = serde_json::from_value(json).unwrap();
        let constraint = predicate.get("order").cloned().unwrap().into_constraint().unwrap();
        match constraint {
            Constraint::Cmp(clauses) => {
                assert_eq!(clauses, vec![(Comparator::Ge, Value::Int(5))]);
            }
            other => panic!("expected Cmp, got {other:?}"),
        }
    }

    #[test]
    fn list_constraint_round_trips_through_json() {
        let json = serde_json::json!({"order": [1, 2, 3]});
        let predicate: WirePredicate = serde_json::from_value(json).unwrap();
        let constraint = predicate.get("order").cloned().unwrap().into_constraint().unwrap();
        assert!(matches!(constraint, Constraint::List(values) if values.len() == 3));
    }

    #[test]
    fn request_tags_on_op_field() {
        let req = Request::DeleteTs { pk: "a".to_string() };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["op"], "delete_ts");
        assert_eq!(json["pk"], "a");
    }
}

//! Schema definitions: field descriptors, the closed set of storage types,
//! and the small coercer table that stands in for the reference
//! implementation's runtime conversion functions (design notes §9).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::SchemaError;
use crate::types::Value;

pub const PK_FIELD: &str = "pk";
pub const TS_FIELD: &str = "ts";
pub const DELETED_FIELD: &str = "deleted";
pub const VP_FIELD: &str = "vp";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldType {
    Int,
    Float,
    Bool,
    String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexKind {
    None,
    Ordered,
    Bitmap,
}

/// Closed set of coercers standing in for the reference implementation's
/// runtime conversion functions. `Identity` is the sentinel persisted when a
/// field carries no real conversion, per spec 4.2's note about serializing
/// the identity function and re-hydrating it on load.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Conversion {
    #[default]
    Identity,
    ToInt,
    ToFloat,
    ToBool,
    ToStr,
}

impl Conversion {
    pub fn apply(&self, field: &str, value: Value) -> Result<Value, SchemaError> {
        use Value::*;
        let from = value.type_of();
        match (self, &value) {
            (Conversion::Identity, _) => Ok(value),
            (Conversion::ToInt, Int(_)) => Ok(value),
            (Conversion::ToInt, Float(f)) => Ok(Int(*f as i64)),
            (Conversion::ToInt, Bool(b)) => Ok(Int(*b as i64)),
            (Conversion::ToFloat, Float(_)) => Ok(value),
            (Conversion::ToFloat, Int(i)) => Ok(Float(*i as f64)),
            (Conversion::ToBool, Bool(_)) => Ok(value),
            (Conversion::ToBool, Int(i)) => Ok(Bool(*i != 0)),
            (Conversion::ToStr, Str(_)) => Ok(value),
            (Conversion::ToStr, Int(i)) => Ok(Str(i.to_string())),
            (Conversion::ToStr, Float(f)) => Ok(Str(f.to_string())),
            (Conversion::ToStr, Bool(b)) => Ok(Str(b.to_string())),
            _ => Err(SchemaError::Conversion {
                field: field.to_string(),
                from,
                to: match self {
                    Conversion::ToInt => FieldType::Int,
                    Conversion::ToFloat => FieldType::Float,
                    Conversion::ToBool => FieldType::Bool,
                    Conversion::ToStr => FieldType::String,
                    Conversion::Identity => from,
                },
            }),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub ty: FieldType,
    pub index: IndexKind,
    /// Required iff `index == Bitmap`: the closed set of values the column
    /// may take, used to seed the bitmap index's per-value bit strings.
    pub enum_values: Option<Vec<Value>>,
    pub convert: Conversion,
}

impl FieldDescriptor {
    pub fn new(ty: FieldType, index: IndexKind) -> Self {
        Self {
            ty,
            index,
            enum_values: None,
            convert: Conversion::Identity,
        }
    }

    pub fn with_enum_values(mut self, values: Vec<Value>) -> Self {
        self.enum_values = Some(values);
        self
    }

    pub fn with_conversion(mut self, convert: Conversion) -> Self {
        self.convert = convert;
        self
    }

    pub fn default_value(&self) -> Value {
        match self.ty {
            FieldType::Int => Value::Int(0),
            FieldType::Float => Value::Float(0.0),
            FieldType::Bool => Value::Bool(false),
            FieldType::String => Value::Str(String::new()),
        }
    }
}

/// The database's current schema: a map from non-reserved field name to its
/// descriptor. `deleted` and `vp` are always present and bitmap-indexed
/// (spec 3).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Schema {
    fields: BTreeMap<String, FieldDescriptor>,
}

impl Schema {
    pub fn new() -> Self {
        let mut fields = BTreeMap::new();
        fields.insert(
            DELETED_FIELD.to_string(),
            FieldDescriptor::new(FieldType::Bool, IndexKind::Bitmap)
                .with_enum_values(vec![Value::Bool(true), Value::Bool(false)]),
        );
        fields.insert(
            VP_FIELD.to_string(),
            FieldDescriptor::new(FieldType::Bool, IndexKind::Bitmap)
                .with_enum_values(vec![Value::Bool(true), Value::Bool(false)]),
        );
        Self { fields }
    }

    pub fn is_reserved(name: &str) -> bool {
        name == PK_FIELD || name == TS_FIELD
    }

    /// Adds or replaces a user field. Errors on the two hard-reserved names;
    /// `deleted`/`vp` may be overwritten only by the internal bookkeeping
    /// that manages them (vp subsystem schema changes).
    pub fn set_field(&mut self, name: impl Into<String>, descriptor: FieldDescriptor) -> Result<(), SchemaError> {
        let name = name.into();
        if Self::is_reserved(&name) {
            return Err(SchemaError::ReservedFieldName(name));
        }
        if matches!(descriptor.index, IndexKind::Bitmap) && descriptor.enum_values.is_none() {
            return Err(SchemaError::MissingEnumValues { field: name });
        }
        self.fields.insert(name, descriptor);
        Ok(())
    }

    pub fn remove_field(&mut self, name: &str) -> Option<FieldDescriptor> {
        self.fields.remove(name)
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.get(name)
    }

    pub fn contains_field(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// Non-reserved field names in the lexicographic order the metadata
    /// heap lays out records in (spec 4.2).
    pub fn ordered_field_names(&self) -> Vec<&str> {
        self.fields.keys().map(String::as_str).collect()
    }

    pub fn fields(&self) -> &BTreeMap<String, FieldDescriptor> {
        &self.fields
    }

    pub fn indexed_fields(&self) -> impl Iterator<Item = (&str, &FieldDescriptor)> {
        self.fields
            .iter()
            .filter(|(_, d)| !matches!(d.index, IndexKind::None))
            .map(|(n, d)| (n.as_str(), d))
    }
}

impl Default for Schema {
    fn default() -> Self {
        Self::new()
    }
}

//! Append-only heap of schema-shaped metadata records (spec 4.2).
//!
//! Grounded on `original_source/tsdb/heaps.py`'s `MetaHeap`
//! (`_build_format_string`/`write_meta`/`reset_schema`), generalized to a
//! fourth storage type the Python original never needed: `string`. Records
//! are laid out field-by-field in lexicographic field-name order; every
//! string field reserves a fixed capacity so that, for a given schema, every
//! record has the same byte length and in-place rewrite is always safe (see
//! `SPEC_FULL.md` for why this departs from a literal length-prefixed
//! encoding).

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::error::HeapError;
use crate::index::PrimaryIndex;
use crate::schema::{FieldType, Schema};
use crate::types::Value;

/// Default capacity, in bytes, reserved for a `string` field's payload.
pub const DEFAULT_STRING_CAPACITY: usize = 256;

#[derive(Clone, Debug)]
struct FieldLayout {
    name: String,
    ty: FieldType,
    offset: usize,
    width: usize,
}

pub struct MetaHeap {
    file: File,
    path: PathBuf,
    schema_path: PathBuf,
    fields: Vec<FieldLayout>,
    record_width: usize,
    string_capacity: usize,
}

impl MetaHeap {
    #[tracing::instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>, schema_path: impl AsRef<Path>, schema: &Schema) -> Result<Self, HeapError> {
        let path = path.as_ref().to_path_buf();
        let schema_path = schema_path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)
            .with_context(|| format!("opening meta heap at {}", path.display()))
            .map_err(|source| HeapError::Open {
                path: path.clone(),
                source,
            })?;

        let (fields, record_width) = build_layout(schema, DEFAULT_STRING_CAPACITY);
        let mut heap = Self {
            file,
            path,
            schema_path,
            fields,
            record_width,
            string_capacity: DEFAULT_STRING_CAPACITY,
        };
        heap.save_schema(schema)?;
        Ok(heap)
    }

    fn save_schema(&self, schema: &Schema) -> Result<(), HeapError> {
        write_schema_atomic(&self.schema_path, schema)
    }

    /// Loads a previously persisted schema snapshot, if one exists.
    pub fn load_schema(schema_path: impl AsRef<Path>) -> Result<Option<Schema>, HeapError> {
        let path = schema_path.as_ref();
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(path)?;
        let schema: Schema = serde_json::from_slice(&bytes)
            .with_context(|| format!("decoding schema snapshot at {}", path.display()))
            .map_err(|source| HeapError::Open {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(Some(schema))
    }

    /// Writes (appending if `offset` is `None`, else overwriting in place)
    /// a record initialized to defaults and overlaid with the fields
    /// supplied in `meta`. Returns the offset used.
    #[tracing::instrument(skip_all)]
    pub fn write(&mut self, meta: &HashMap<String, Value>, offset: Option<u64>) -> Result<u64, HeapError> {
        let mut values: HashMap<String, Value> = match offset {
            None => self
                .fields
                .iter()
                .map(|f| (f.name.clone(), default_for(f.ty)))
                .collect(),
            Some(off) => self.read(off)?,
        };
        for (k, v) in meta {
            values.insert(k.clone(), v.clone());
        }

        let mut record = vec![0u8; self.record_width];
        for field in &self.fields {
            let value = values.get(&field.name).cloned().unwrap_or_else(|| default_for(field.ty));
            encode_field(field, &value, self.string_capacity, &mut record)?;
        }

        let write_offset = match offset {
            Some(off) => off,
            None => self.file.seek(SeekFrom::End(0))?,
        };
        self.file.seek(SeekFrom::Start(write_offset))?;
        self.file.write_all(&record)?;
        self.file.flush()?;
        Ok(write_offset)
    }

    /// Decodes the record at `offset` into a field-name -> value map.
    #[tracing::instrument(skip_all)]
    pub fn read(&self, offset: u64) -> Result<HashMap<String, Value>, HeapError> {
        let mut buf = vec![0u8; self.record_width];
        let mut file = self.file.try_clone()?;
        file.seek(SeekFrom::Start(offset))?;
        let read = file.read(&mut buf)?;
        let mut total = read;
        while total < buf.len() {
            let n = file.read(&mut buf[total..])?;
            if n == 0 {
                break;
            }
            total += n;
        }
        if total != buf.len() {
            return Err(HeapError::ShortRead {
                offset,
                expected: buf.len(),
                actual: total,
            });
        }

        let mut out = HashMap::with_capacity(self.fields.len());
        for field in &self.fields {
            let slice = &buf[field.offset..field.offset + field.width];
            out.insert(field.name.clone(), decode_field(field.ty, slice));
        }
        Ok(out)
    }

    /// Rewrites every live record under `new_schema`'s layout, updating
    /// `primary_index`'s `meta_offset` for each primary key in place, per
    /// spec 4.2. Bracketed with a staging file + atomic rename so a crash
    /// mid-rewrite cannot leave a half-migrated heap (design notes' open
    /// question on `reset_schema` atomicity).
    #[tracing::instrument(skip_all)]
    pub fn reset_schema(&mut self, new_schema: &Schema, primary_index: &mut PrimaryIndex) -> Result<(), HeapError> {
        let (new_fields, new_width) = build_layout(new_schema, self.string_capacity);

        let staging_path = self.path.with_extension("staging");
        let mut staging = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&staging_path)?;

        let mut new_offsets = Vec::new();
        for pk in primary_index.keys() {
            let (ts_off, meta_off) = primary_index.get(&pk).expect("pk came from keys()");
            let old = self.read(meta_off)?;

            let mut record = vec![0u8; new_width];
            for field in &new_fields {
                let value = old.get(&field.name).cloned().unwrap_or_else(|| default_for(field.ty));
                encode_field(field, &value, self.string_capacity, &mut record)?;
            }
            let write_offset = staging.stream_position()?;
            staging.write_all(&record)?;
            new_offsets.push((pk, ts_off, write_offset));
        }
        staging.flush()?;
        staging.sync_all()?;
        drop(staging);

        fs::rename(&staging_path, &self.path)?;
        self.file = OpenOptions::new().read(true).write(true).open(&self.path)?;
        self.fields = new_fields;
        self.record_width = new_width;

        for (pk, ts_off, meta_off) in new_offsets {
            primary_index.set(pk, ts_off, meta_off)?;
        }

        self.save_schema(new_schema)?;
        Ok(())
    }
}

fn write_schema_atomic(schema_path: &Path, schema: &Schema) -> Result<(), HeapError> {
    let tmp = schema_path.with_extension("tmp");
    {
        let mut f = File::create(&tmp)?;
        let bytes = serde_json::to_vec_pretty(schema).expect("schema serializes");
        f.write_all(&bytes)?;
        f.flush()?;
        f.sync_all()?;
    }
    fs::rename(&tmp, schema_path)?;
    Ok(())
}

fn build_layout(schema: &Schema, string_capacity: usize) -> (Vec<FieldLayout>, usize) {
    let mut fields = Vec::new();
    let mut offset = 0;
    for name in schema.ordered_field_names() {
        let descriptor = schema.field(name).expect("name came from schema");
        let width = field_width(descriptor.ty, string_capacity);
        fields.push(FieldLayout {
            name: name.to_string(),
            ty: descriptor.ty,
            offset,
            width,
        });
        offset += width;
    }
    (fields, offset)
}

fn field_width(ty: FieldType, string_capacity: usize) -> usize {
    match ty {
        FieldType::Int | FieldType::Float => 8,
        FieldType::Bool => 1,
        FieldType::String => 4 + string_capacity,
    }
}

fn default_for(ty: FieldType) -> Value {
    match ty {
        FieldType::Int => Value::Int(0),
        FieldType::Float => Value::Float(0.0),
        FieldType::Bool => Value::Bool(false),
        FieldType::String => Value::Str(String::new()),
    }
}

/// Encodes `value` into `field`'s slot, coercing across storage types the
/// same way the reference implementation's untyped `struct.pack` tolerates a
/// bool/int/float written into any numeric-ish slot: a trigger's result list
/// is positional, not schema-checked, so a procedure may legitimately hand
/// back a `Float` for a `Bool`-typed target (see `insert_ts_trigger_writes_
/// back_stats`). Only a string exceeding its reserved capacity is rejected.
fn encode_field(field: &FieldLayout, value: &Value, string_capacity: usize, out: &mut [u8]) -> Result<(), HeapError> {
    let slice = &mut out[field.offset..field.offset + field.width];
    match field.ty {
        FieldType::Int => slice.copy_from_slice(&coerce_int(value).to_le_bytes()),
        FieldType::Float => slice.copy_from_slice(&coerce_float(value).to_le_bytes()),
        FieldType::Bool => slice[0] = coerce_bool(value) as u8,
        FieldType::String => {
            let owned;
            let s = match value {
                Value::Str(s) => s.as_str(),
                other => {
                    owned = coerce_string(other);
                    owned.as_str()
                }
            };
            let bytes = s.as_bytes();
            if bytes.len() > string_capacity {
                return Err(HeapError::StringTooLong {
                    field: field.name.clone(),
                    len: bytes.len(),
                    capacity: string_capacity,
                });
            }
            slice[..4].copy_from_slice(&(bytes.len() as u32).to_le_bytes());
            slice[4..4 + bytes.len()].copy_from_slice(bytes);
        }
    }
    Ok(())
}

fn coerce_int(value: &Value) -> i64 {
    match value {
        Value::Int(i) => *i,
        Value::Float(f) => *f as i64,
        Value::Bool(b) => *b as i64,
        Value::Str(s) => s.parse().unwrap_or(0),
    }
}

fn coerce_float(value: &Value) -> f64 {
    match value {
        Value::Float(f) => *f,
        Value::Int(i) => *i as f64,
        Value::Bool(b) => *b as u8 as f64,
        Value::Str(s) => s.parse().unwrap_or(0.0),
    }
}

fn coerce_bool(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Int(i) => *i != 0,
        Value::Float(f) => *f != 0.0,
        Value::Str(s) => !s.is_empty(),
    }
}

fn coerce_string(value: &Value) -> String {
    match value {
        Value::Str(s) => s.clone(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => f.to_string(),
        Value::Bool(b) => b.to_string(),
    }
}

fn decode_field(ty: FieldType, slice: &[u8]) -> Value {
    match ty {
        FieldType::Int => Value::Int(i64::from_le_bytes(slice.try_into().unwrap())),
        FieldType::Float => Value::Float(f64::from_le_bytes(slice.try_into().unwrap())),
        FieldType::Bool => Value::Bool(slice[0] != 0),
        FieldType::String => {
            let len = u32::from_le_bytes(slice[..4].try_into().unwrap()) as usize;
            let s = String::from_utf8_lossy(&slice[4..4 + len]).into_owned();
            Value::Str(s)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldDescriptor, IndexKind};
    use tempfile::TempDir;

    fn schema_with_order_field() -> Schema {
        let mut schema = Schema::new();
        schema
            .set_field("order", FieldDescriptor::new(FieldType::Int, IndexKind::Ordered))
            .unwrap();
        schema
            .set_field("name", FieldDescriptor::new(FieldType::String, IndexKind::None))
            .unwrap();
        schema
    }

    #[test]
    fn write_append_then_read() {
        let dir = TempDir::new().unwrap();
        let schema = schema_with_order_field();
        let mut heap = MetaHeap::open(dir.path().join("heap_meta"), dir.path().join("schema.idx"), &schema).unwrap();

        let mut meta = HashMap::new();
        meta.insert("order".to_string(), Value::Int(3));
        meta.insert("name".to_string(), Value::Str("hello".to_string()));
        let offset = heap.write(&meta, None).unwrap();

        let read_back = heap.read(offset).unwrap();
        assert_eq!(read_back["order"], Value::Int(3));
        assert_eq!(read_back["name"], Value::Str("hello".to_string()));
        assert_eq!(read_back["deleted"], Value::Bool(false));
    }

    #[test]
    fn write_in_place_preserves_record_width() {
        let dir = TempDir::new().unwrap();
        let schema = schema_with_order_field();
        let mut heap = MetaHeap::open(dir.path().join("heap_meta"), dir.path().join("schema.idx"), &schema).unwrap();

        let mut meta = HashMap::new();
        meta.insert("order".to_string(), Value::Int(3));
        let offset = heap.write(&meta, None).unwrap();

        let mut update = HashMap::new();
        update.insert("order".to_string(), Value::Int(7));
        let offset2 = heap.write(&update, Some(offset)).unwrap();
        assert_eq!(offset, offset2);

        let read_back = heap.read(offset).unwrap();
        assert_eq!(read_back["order"], Value::Int(7));
    }

    #[test]
    fn string_over_capacity_is_rejected() {
        let dir = TempDir::new().unwrap();
        let schema = schema_with_order_field();
        let mut heap = MetaHeap::open(dir.path().join("heap_meta"), dir.path().join("schema.idx"), &schema).unwrap();

        let mut meta = HashMap::new();
        meta.insert("name".to_string(), Value::Str("x".repeat(DEFAULT_STRING_CAPACITY + 1)));
        let err = heap.write(&meta, None).unwrap_err();
        assert!(matches!(err, HeapError::StringTooLong { .. }));
    }
}

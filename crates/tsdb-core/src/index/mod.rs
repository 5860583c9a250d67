//! Index subsystem (spec 4.3/4.4): the primary index plus one secondary
//! index per indexed metadata field, opened and kept in sync by
//! [`IndexSet`] as the schema evolves.

mod bitmap;
mod ordered;
mod primary;

pub use bitmap::BitmapIndex;
pub use ordered::OrderedIndex;
pub use primary::PrimaryIndex;

use std::collections::BTreeMap;
use std::ops::Bound;
use std::path::{Path, PathBuf};

use crate::error::IndexError;
use crate::schema::{IndexKind, Schema};
use crate::types::Value;

/// A secondary index for one field, dispatching to whichever backing
/// structure the field's [`IndexKind`] calls for.
pub enum SecondaryIndex {
    Ordered(OrderedIndex),
    Bitmap(BitmapIndex),
}

impl SecondaryIndex {
    pub fn add_pk(&mut self, value: Value, pk: &str) -> Result<(), IndexError> {
        match self {
            SecondaryIndex::Ordered(idx) => idx.add_pk(value, pk),
            SecondaryIndex::Bitmap(idx) => idx.add_pk(value, pk),
        }
    }

    pub fn remove_pk(&mut self, value: &Value, pk: &str) -> Result<(), IndexError> {
        match self {
            SecondaryIndex::Ordered(idx) => idx.remove_pk(value, pk),
            SecondaryIndex::Bitmap(idx) => idx.remove_pk(pk),
        }
    }

    pub fn lookup(&self, value: &Value) -> std::collections::BTreeSet<String> {
        match self {
            SecondaryIndex::Ordered(idx) => idx.lookup(value),
            SecondaryIndex::Bitmap(idx) => idx.lookup(value),
        }
    }

    /// Range scan; only meaningful for an ordered index. A bitmap index
    /// answers only equality, so a non-trivial bound is treated as "no
    /// match" rather than a panic.
    pub fn range(&self, lower: Bound<Value>, upper: Bound<Value>) -> std::collections::BTreeSet<String> {
        match self {
            SecondaryIndex::Ordered(idx) => idx.range(lower, upper),
            SecondaryIndex::Bitmap(idx) => match (lower, upper) {
                (Bound::Included(v), Bound::Included(u)) if v == u => idx.lookup(&v),
                _ => Default::default(),
            },
        }
    }

    pub fn commit(&mut self) -> Result<(), IndexError> {
        match self {
            SecondaryIndex::Ordered(idx) => idx.commit(),
            SecondaryIndex::Bitmap(idx) => idx.commit(),
        }
    }
}

/// Owns the primary index and the current set of secondary indexes,
/// reopening/creating them as the schema's indexed fields change.
pub struct IndexSet {
    dir: PathBuf,
    pub primary: PrimaryIndex,
    secondary: BTreeMap<String, SecondaryIndex>,
}

impl IndexSet {
    pub fn open(dir: impl AsRef<Path>, schema: &Schema) -> Result<Self, IndexError> {
        let dir = dir.as_ref().to_path_buf();
        let primary = PrimaryIndex::open(&dir)?;
        let mut secondary = BTreeMap::new();
        for (name, descriptor) in schema.indexed_fields() {
            let idx = match descriptor.index {
                IndexKind::Ordered => SecondaryIndex::Ordered(OrderedIndex::open(&dir, name)?),
                IndexKind::Bitmap => SecondaryIndex::Bitmap(BitmapIndex::open(
                    &dir,
                    name,
                    descriptor.enum_values.as_deref().unwrap_or_default(),
                )?),
                IndexKind::None => continue,
            };
            secondary.insert(name.to_string(), idx);
        }
        Ok(Self { dir, primary, secondary })
    }

    pub fn secondary(&self, field: &str) -> Option<&SecondaryIndex> {
        self.secondary.get(field)
    }

    pub fn secondary_mut(&mut self, field: &str) -> Option<&mut SecondaryIndex> {
        self.secondary.get_mut(field)
    }

    pub fn has_secondary(&self, field: &str) -> bool {
        self.secondary.contains_key(field)
    }

    /// Opens (or reopens) the secondary index for a field just given an
    /// index kind in the schema, e.g. after `reset_schema` or when the
    /// similarity subsystem adds a `d_vp_<pk>` field.
    pub fn ensure_secondary(&mut self, field: &str, kind: IndexKind, enum_values: &[Value]) -> Result<(), IndexError> {
        if self.secondary.contains_key(field) {
            return Ok(());
        }
        let idx = match kind {
            IndexKind::Ordered => SecondaryIndex::Ordered(OrderedIndex::open(&self.dir, field)?),
            IndexKind::Bitmap => SecondaryIndex::Bitmap(BitmapIndex::open(&self.dir, field, enum_values)?),
            IndexKind::None => return Ok(()),
        };
        self.secondary.insert(field.to_string(), idx);
        Ok(())
    }

    pub fn drop_secondary(&mut self, field: &str) {
        self.secondary.remove(field);
    }

    pub fn commit_all(&mut self) -> Result<(), IndexError> {
        self.primary.commit()?;
        for idx in self.secondary.values_mut() {
            idx.commit()?;
        }
        Ok(())
    }
}

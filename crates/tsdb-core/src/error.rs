//! Error taxonomy for the database. Leaf errors are grouped per subsystem and
//! composed into [`DbError`], mirroring the `TableError`/`IndexError` ->
//! `DBError` composition of the teacher crate's `error.rs`.

use std::path::PathBuf;

use thiserror::Error;

use crate::schema::FieldType;

/// The five wire-level outcomes a client-facing operation can report.
///
/// Out of scope to actually serialize onto a socket (see `wire.rs`), but
/// every [`DbError`] maps onto exactly one of these for test parity with the
/// external protocol described in the specification's interface table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Status {
    Ok,
    InvalidKey,
    InvalidOperation,
    NoMatch,
    UnknownError,
}

#[derive(Debug, Error)]
pub enum HeapError {
    #[error("could not open heap file {path}")]
    Open {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },
    #[error("heap was created with ts_length {expected} but opened with {actual}")]
    LengthMismatch { expected: u32, actual: u32 },
    #[error("short read at offset {offset}: expected {expected} bytes, got {actual}")]
    ShortRead { offset: u64, expected: usize, actual: usize },
    #[error("string field {field} value of {len} bytes exceeds capacity {capacity}")]
    StringTooLong { field: String, len: usize, capacity: usize },
    #[error("time series has length {actual}, heap expects {expected}")]
    WrongSeriesLength { expected: u32, actual: usize },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Index(#[from] IndexError),
}

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("field name `{0}` is reserved")]
    ReservedFieldName(String),
    #[error("field `{0}` not found in schema")]
    UnknownField(String),
    #[error("field `{field}` requires enumerated values because it is bitmap-indexed")]
    MissingEnumValues { field: String },
    #[error("cannot convert value of type {from:?} to {to:?} for field `{field}`")]
    Conversion {
        field: String,
        from: FieldType,
        to: FieldType,
    },
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("index for field `{0}` not found")]
    NotFound(String),
    #[error("index for field `{0}` already exists")]
    AlreadyExists(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("failed to (de)serialize index state at {path}")]
    Serde {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("unknown event `{0}`, expected one of insert_ts, upsert_meta, select")]
    UnknownEvent(String),
    #[error("procedure `{0}` is not registered in the process-local procedure table")]
    UnknownProcedure(String),
    #[error("trigger target field `{0}` is not a valid metadata field")]
    UnknownTarget(String),
    #[error("trigger procedure `{proc}` failed: {reason}")]
    ProcedureFailed { proc: String, reason: String },
}

#[derive(Debug, Error)]
pub enum SimilarityError {
    #[error("pk `{0}` is already a vantage point")]
    AlreadyVantagePoint(String),
    #[error("pk `{0}` is not a vantage point")]
    NotVantagePoint(String),
    #[error("no vantage points registered")]
    NoVantagePoints,
    #[error("query series could not be decoded")]
    UndecodableQuery,
}

/// The top-level error type every `Database` operation returns.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("primary key `{0}` already exists")]
    KeyExists(String),
    #[error("primary key `{0}` not found")]
    KeyNotFound(String),
    #[error("primary key must be a non-empty string")]
    InvalidKey,
    #[error("sort_by references unknown field `{0}`")]
    UnknownSortField(String),
    #[error(transparent)]
    Heap(#[from] HeapError),
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error(transparent)]
    Trigger(#[from] TriggerError),
    #[error(transparent)]
    Similarity(#[from] SimilarityError),
    #[error("no match within search radius")]
    NoMatch,
    #[error("internal invariant violated: {0}")]
    Invariant(String),
}

impl DbError {
    /// Maps an internal error onto the wire-level status it would surface
    /// as, per the specification's error handling design.
    pub fn status(&self) -> Status {
        match self {
            DbError::KeyExists(_) | DbError::KeyNotFound(_) | DbError::InvalidKey => Status::InvalidKey,
            DbError::UnknownSortField(_) | DbError::Trigger(TriggerError::UnknownEvent(_)) => {
                Status::InvalidOperation
            }
            DbError::Trigger(TriggerError::UnknownTarget(_)) => Status::InvalidOperation,
            DbError::Similarity(SimilarityError::UndecodableQuery) => Status::InvalidOperation,
            DbError::NoMatch => Status::NoMatch,
            _ => Status::UnknownError,
        }
    }
}

pub type DbResult<T> = Result<T, DbError>;

//! Storage, index, query, trigger and similarity-search engine for a
//! fixed-length time-series database (spec §1-§9).
//!
//! This crate is the core described in the specification: the wire framing
//! between client and server, the HTTP gateway, and the pipeline DSL are
//! explicitly out of scope and modeled only as the [`wire`] module's
//! serde-derived request/response shapes, for test parity with the external
//! protocol. [`db::Database`] is the single facade every operation in spec §6
//! hangs off of.

pub mod db;
pub mod error;
pub mod heap;
pub mod index;
pub mod persist;
pub mod query;
pub mod schema;
pub mod similarity;
pub mod trigger;
pub mod types;
pub mod wire;

pub use db::Database;
pub use error::{DbError, DbResult, Status};
pub use schema::Schema;
pub use types::{TimeSeries, Value};

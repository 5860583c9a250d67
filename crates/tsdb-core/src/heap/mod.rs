//! Append-only heap storage (spec 4.1/4.2): one file holding fixed-length
//! time series, one holding schema-driven metadata records.

mod meta_heap;
mod ts_heap;

pub use meta_heap::MetaHeap;
pub use ts_heap::TsHeap;

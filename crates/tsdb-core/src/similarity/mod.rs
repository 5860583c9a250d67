//! Similarity-search subsystem (spec 4.7/4.8): kernelized cross-correlation
//! distance, vantage-point bookkeeping helpers, and the iSAX symbolic tree.

pub mod distance;
pub mod isax;
pub mod vp;

pub use isax::{euclidean, IsaxTree};
pub use vp::{distance_field, VpMatch};

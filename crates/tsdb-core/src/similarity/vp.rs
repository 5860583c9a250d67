//! Vantage-point bookkeeping helpers (spec 4.7).
//!
//! The stateful parts of VP management (schema extension, meta-heap reset,
//! trigger registration, backfill) need simultaneous `&mut` access to the
//! schema, meta heap, indexes, and trigger registry, so they live on
//! [`crate::db::Database`] rather than here; this module holds the pure
//! naming/shape helpers shared by those methods and by tests, grounded on
//! `original_source/tsdb/persistent_db.py`'s `insert_vp`/`delete_vp`
//! (`"d_vp_" + pk` field naming) and `vp_similarity_search`'s
//! `argmin` + `2 * d(Q, v*)` radius rule.

/// The schema field name carrying a row's distance to vantage point `pk`.
pub fn distance_field(pk: &str) -> String {
    format!("d_vp_{pk}")
}

/// A candidate result from a vantage-point similarity search.
#[derive(Clone, Debug, PartialEq)]
pub struct VpMatch {
    pub pk: String,
    pub distance: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_name_matches_reference_convention() {
        assert_eq!(distance_field("a"), "d_vp_a");
    }
}

//! Structured capability flags a consumer (or the specialized builders) can
//! branch on without matching on `Dialect` directly.

use crate::sql::dialect::Dialect;

/// Snapshot of what a `DatabaseAdapter` can do, returned by
/// `DatabaseAdapter::capabilities()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdapterCapabilities {
    pub dialect: Dialect,
    /// `FILTER (WHERE ...)` on aggregates, vs. `CASE WHEN` emulation.
    pub supports_aggregate_filter: bool,
    /// Exact `PERCENTILE_CONT`/`PERCENTILE_DISC` in aggregate position.
    pub supports_native_percentile: bool,
    /// When `supports_native_percentile` is false, percentile metrics must
    /// be computed via an `ORDER BY ... LIMIT/OFFSET` subquery instead.
    pub supports_percentile_subqueries: bool,
    pub supports_nulls_ordering: bool,
    pub supports_lateral: bool,
}

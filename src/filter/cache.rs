//! `FilterCacheManager`: dedupes the SQL fragment built for a given
//! `(member, operator, values, dateRange)` so it is rendered once however
//! many times the query plan re-emits it (main query WHERE, propagating
//! `IN` subqueries, CTE predicates).

use std::collections::HashMap;

use crate::model::query::{DateRange, FilterOperator};
use crate::sql::expr::Expr;

/// A canonical cache key for a single `Filter::Simple` leaf.
///
/// Values are sorted before hashing so `values: ["b", "a"]` and `["a", "b"]`
/// share a cache entry; this is sound because every operator this cache
/// serves (everything except the array operators, which bypass it
/// entirely) treats its value list as an unordered set.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    member: String,
    operator: FilterOperator,
    values: Vec<String>,
    date_range: Option<NormalizedDateRange>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum NormalizedDateRange {
    Absolute { from: String, to: String },
    Relative(String),
}

impl From<&DateRange> for NormalizedDateRange {
    fn from(r: &DateRange) -> Self {
        match r {
            DateRange::Absolute { from, to } => NormalizedDateRange::Absolute {
                from: from.clone(),
                to: to.clone(),
            },
            DateRange::Relative(s) => NormalizedDateRange::Relative(s.clone()),
        }
    }
}

impl CacheKey {
    fn new(
        member: &str,
        operator: FilterOperator,
        values: &[String],
        date_range: Option<&DateRange>,
    ) -> Self {
        let mut values: Vec<String> = values.to_vec();
        values.sort();
        Self {
            member: member.to_string(),
            operator,
            values,
            date_range: date_range.map(NormalizedDateRange::from),
        }
    }
}

/// Per-request cache of rendered filter-leaf SQL fragments.
///
/// Owned per-request rather than shared, per the concurrency model: a
/// cached fragment may embed bind-parameter placeholders whose indices are
/// only valid within the `ParamBinder` the same request is threading
/// through, so sharing this cache across requests would cross-contaminate
/// parameter numbering.
#[derive(Debug, Default)]
pub struct FilterCacheManager {
    entries: HashMap<CacheKey, Expr>,
}

impl FilterCacheManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a previously rendered fragment for this leaf, if any.
    pub fn get(
        &self,
        member: &str,
        operator: FilterOperator,
        values: &[String],
        date_range: Option<&DateRange>,
    ) -> Option<Expr> {
        if operator.is_array_operator() {
            return None;
        }
        let key = CacheKey::new(member, operator, values, date_range);
        self.entries.get(&key).cloned()
    }

    /// Record the fragment rendered for this leaf so subsequent lookups
    /// (across the main query and any CTEs referencing the same filter)
    /// reuse it instead of re-rendering.
    pub fn insert(
        &mut self,
        member: &str,
        operator: FilterOperator,
        values: &[String],
        date_range: Option<&DateRange>,
        expr: Expr,
    ) {
        if operator.is_array_operator() {
            return;
        }
        let key = CacheKey::new(member, operator, values, date_range);
        self.entries.insert(key, expr);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

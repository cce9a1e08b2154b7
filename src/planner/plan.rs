//! `QueryPlan`: the compiled, dialect-agnostic shape of a query, produced by
//! `QueryPlanner` and consumed by the SQL builders.

use crate::model::Filter;
use crate::sql::expr::Expr;
use crate::sql::query::JoinType;

/// The kind of pre-aggregation CTE. Currently the planner only ever emits
/// `FanOutAggregate` CTEs (a `hasMany`/`belongsToMany` edge contributing an
/// aggregate measure); the variant exists so a future pre-aggregation
/// strategy (e.g. materialized rollups) has somewhere to live without
/// reshaping every consumer of `QueryPlan`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CteType {
    FanOutAggregate,
}

/// A cube joined into the main query (as opposed to pulled in through a
/// pre-aggregation CTE).
#[derive(Debug, Clone)]
pub struct JoinCubePlan {
    pub cube: String,
    pub join_type: JoinType,
    pub join_condition: Expr,
    /// Present when this hop was resolved through a `belongsToMany`
    /// junction; the junction cube is joined in first, under this alias.
    pub junction_table: Option<String>,
}

/// A pre-aggregation CTE: a `hasMany`/`belongsToMany` target cube's
/// contributing aggregate measures, grouped by the join key(s) before being
/// joined back into the main query, so row fan-out cannot double-count
/// other aggregates.
#[derive(Debug, Clone)]
pub struct PreAggregationCte {
    pub cube: String,
    pub cte_alias: String,
    /// The cube on the "one" side of the fan-out edge this CTE collapses;
    /// the outer query joins this cube (or its own alias, if it is itself a
    /// CTE) to `cte_alias` using `join_condition`.
    pub anchor_cube: String,
    /// The fully resolved join condition between `anchor_cube` and
    /// `cte_alias`, aliases already baked in.
    pub join_condition: Expr,
    /// Columns (in the CTE cube's own column space) the CTE groups by and
    /// the outer query joins on.
    pub join_keys: Vec<String>,
    /// Measure names (unqualified, on `cube`) pre-aggregated inside the CTE.
    pub measures: Vec<String>,
    /// Filters on this cube pushed into the CTE's own `WHERE`, rather than
    /// applied as a correlated `IN (SELECT ...)` from the outer query.
    pub propagating_filters: Vec<Filter>,
    /// Additional join keys projected so a cube on the far side of this one
    /// can still be joined through the CTE rather than requiring its own
    /// separate CTE.
    pub downstream_join_keys: Vec<String>,
    pub cte_type: CteType,
}

/// The compiled plan for a `SemanticQuery`: which cube anchors the `FROM`
/// clause, which cubes are joined directly, and which are pre-aggregated.
#[derive(Debug, Clone)]
pub struct QueryPlan {
    pub primary_cube: String,
    pub join_cubes: Vec<JoinCubePlan>,
    pub pre_aggregation_ctes: Vec<PreAggregationCte>,
    /// Calculated measures in dependency order (dependencies first), ready
    /// for sequential `{member}` substitution while building SELECT.
    pub calculated_measure_order: Vec<String>,
}

impl QueryPlan {
    /// Every cube this plan touches: the primary, every directly joined
    /// cube, and every CTE cube.
    pub fn all_cubes(&self) -> Vec<&str> {
        let mut cubes = vec![self.primary_cube.as_str()];
        cubes.extend(self.join_cubes.iter().map(|j| j.cube.as_str()));
        cubes.extend(self.pre_aggregation_ctes.iter().map(|c| c.cube.as_str()));
        cubes
    }

    pub fn cte_for_cube(&self, cube: &str) -> Option<&PreAggregationCte> {
        self.pre_aggregation_ctes.iter().find(|c| c.cube == cube)
    }

    pub fn is_joined_directly(&self, cube: &str) -> bool {
        self.join_cubes.iter().any(|j| j.cube == cube)
    }
}

//! `QueryAnalysis`: a read-only mirror of `QueryPlan` for debugging and
//! `explainQuery`. Never generates or executes SQL.

use super::plan::{CteType, QueryPlan};

/// A human-inspectable summary of a single joined cube, independent of the
/// `sql::Expr` representation used internally.
#[derive(Debug, Clone)]
pub struct JoinSummary {
    pub cube: String,
    pub join_type: String,
    pub junction_table: Option<String>,
}

/// A human-inspectable summary of a pre-aggregation CTE.
#[derive(Debug, Clone)]
pub struct CteSummary {
    pub cube: String,
    pub cte_alias: String,
    pub join_keys: Vec<String>,
    pub measures: Vec<String>,
    pub has_propagating_filters: bool,
    pub downstream_join_keys: Vec<String>,
    pub cte_type: CteType,
}

/// A read-only view of a `QueryPlan`, intended for `explainQuery` and
/// similar debugging surfaces. Building one never mutates planner caches
/// and never touches a database.
#[derive(Debug, Clone)]
pub struct QueryAnalysis {
    pub primary_cube: String,
    pub joined_cubes: Vec<JoinSummary>,
    pub pre_aggregation_ctes: Vec<CteSummary>,
    pub calculated_measure_order: Vec<String>,
}

impl From<&QueryPlan> for QueryAnalysis {
    fn from(plan: &QueryPlan) -> Self {
        QueryAnalysis {
            primary_cube: plan.primary_cube.clone(),
            joined_cubes: plan
                .join_cubes
                .iter()
                .map(|j| JoinSummary {
                    cube: j.cube.clone(),
                    join_type: format!("{:?}", j.join_type),
                    junction_table: j.junction_table.clone(),
                })
                .collect(),
            pre_aggregation_ctes: plan
                .pre_aggregation_ctes
                .iter()
                .map(|c| CteSummary {
                    cube: c.cube.clone(),
                    cte_alias: c.cte_alias.clone(),
                    join_keys: c.join_keys.clone(),
                    measures: c.measures.clone(),
                    has_propagating_filters: !c.propagating_filters.is_empty(),
                    downstream_join_keys: c.downstream_join_keys.clone(),
                    cte_type: c.cte_type,
                })
                .collect(),
            calculated_measure_order: plan.calculated_measure_order.clone(),
        }
    }
}

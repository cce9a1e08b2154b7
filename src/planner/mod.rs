//! Query planning: turns a `SemanticQuery` into a `QueryPlan` against a
//! `CubeRegistry` — primary cube selection, join path resolution, calculated
//! measure ordering, and pre-aggregation CTE placement.

pub mod analysis;
pub mod calculated_measure;
pub mod join_resolver;
pub mod plan;
pub mod planner;

pub use analysis::{CteSummary, JoinSummary, QueryAnalysis};
pub use calculated_measure::{extract_template_refs, CalculatedMeasureResolver};
pub use join_resolver::{build_join_condition, JoinHop, JoinPathResolver};
pub use plan::{CteType, JoinCubePlan, PreAggregationCte, QueryPlan};
pub use planner::QueryPlanner;

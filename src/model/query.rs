//! `SemanticQuery`: the abstract, cube-agnostic request shape that the
//! planner compiles into a `QueryPlan`.

use serde::{Deserialize, Serialize};

use super::types::Granularity;
use crate::sql::query::SortDir;

/// A date range bound, either an absolute pair or a relative expression
/// (`"last 7 days"`, `"this month"`) resolved by the date-time builder at
/// plan time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DateRange {
    Absolute { from: String, to: String },
    Relative(String),
}

/// A requested time dimension, with optional truncation granularity and
/// date range(s).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeDimensionRequest {
    pub dimension: String,
    #[serde(default)]
    pub granularity: Option<Granularity>,
    #[serde(default)]
    pub date_range: Option<DateRange>,
    /// One or more ranges to compare against `date_range`, each producing an
    /// independent sub-query merged by period index.
    #[serde(default)]
    pub compare_date_range: Option<Vec<DateRange>>,
}

/// Comparison and membership operators a filter may apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FilterOperator {
    Equals,
    NotEquals,
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
    Gt,
    Gte,
    Lt,
    Lte,
    Set,
    NotSet,
    InDateRange,
    NotInDateRange,
    BeforeDate,
    AfterDate,
    /// `arrayContains`/`arrayOverlaps`/`arrayContained`: operate against a
    /// column that is itself an array, not a scalar. Their bind encoding
    /// requires the raw typed column object, so they bypass the filter
    /// fragment cache entirely (per §4.3).
    ArrayContains,
    ArrayOverlaps,
    ArrayContained,
}

impl FilterOperator {
    /// Array-valued-column operators, whose bind encoding requires the raw
    /// typed column object rather than a scalar placeholder. Per §4.3 these
    /// bypass the filter-fragment cache rather than sharing it.
    pub fn is_array_operator(&self) -> bool {
        matches!(
            self,
            FilterOperator::ArrayContains
                | FilterOperator::ArrayOverlaps
                | FilterOperator::ArrayContained
        )
    }

    pub fn is_date_range_operator(&self) -> bool {
        matches!(
            self,
            FilterOperator::InDateRange | FilterOperator::NotInDateRange
        )
    }

    pub fn requires_no_values(&self) -> bool {
        matches!(self, FilterOperator::Set | FilterOperator::NotSet)
    }
}

/// A filter on a measure, dimension, or segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Filter {
    Simple {
        member: String,
        operator: FilterOperator,
        #[serde(default)]
        values: Vec<String>,
    },
    And {
        and: Vec<Filter>,
    },
    Or {
        or: Vec<Filter>,
    },
}

impl Filter {
    pub fn simple(
        member: impl Into<String>,
        operator: FilterOperator,
        values: Vec<String>,
    ) -> Self {
        Filter::Simple {
            member: member.into(),
            operator,
            values,
        }
    }

    /// Every member name this filter (or any filter nested under it)
    /// references, used for cube-usage extraction and reachability checks.
    pub fn member_refs(&self) -> Vec<&str> {
        match self {
            Filter::Simple { member, .. } => vec![member.as_str()],
            Filter::And { and } => and.iter().flat_map(Filter::member_refs).collect(),
            Filter::Or { or } => or.iter().flat_map(Filter::member_refs).collect(),
        }
    }

    /// Every leaf (`Simple`) filter nested under this one, depth-first. Used
    /// by the filter cache, which dedupes leaves but not the logical tree
    /// shape around them.
    pub fn leaves(&self) -> Vec<&Filter> {
        match self {
            Filter::Simple { .. } => vec![self],
            Filter::And { and } => and.iter().flat_map(Filter::leaves).collect(),
            Filter::Or { or } => or.iter().flat_map(Filter::leaves).collect(),
        }
    }
}

/// A requested sort order entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderEntry {
    pub member: String,
    #[serde(default)]
    pub direction: SortDirSerde,
}

/// Serde-friendly mirror of `crate::sql::SortDir`, since the SQL-layer type
/// does not derive `Serialize`/`Deserialize`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirSerde {
    #[default]
    Asc,
    Desc,
}

impl From<SortDirSerde> for SortDir {
    fn from(d: SortDirSerde) -> Self {
        match d {
            SortDirSerde::Asc => SortDir::Asc,
            SortDirSerde::Desc => SortDir::Desc,
        }
    }
}

/// One step of a funnel query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunnelStep {
    pub name: String,
    pub cube: String,
    #[serde(default)]
    pub filters: Vec<Filter>,
    /// Overrides the `<Cube>.createdAt` convention fallback for this step.
    #[serde(default)]
    pub time_dimension: Option<String>,
}

/// A funnel query: a sequence of steps joined on a shared binding key,
/// optionally bounded by a time-to-convert window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunnelQuery {
    pub steps: Vec<FunnelStep>,
    /// Dimension (as `Cube.member`) that identifies the same actor across
    /// steps, e.g. a user id.
    pub binding_key: String,
    /// ISO-8601 duration bounding how long after step N a user may complete
    /// step N+1.
    #[serde(default)]
    pub time_to_convert: Option<String>,
    /// Whether `funnel_metrics` should compute per-step time-to-convert
    /// figures (avg/min/max, plus median/P90 when the adapter supports
    /// percentile subqueries) alongside the step counts.
    #[serde(default)]
    pub include_time_metrics: bool,
    /// ISO-8601 duration bounding how long after step 0 the *entire* funnel
    /// may take, independent of `time_to_convert`'s step-to-step window.
    #[serde(default)]
    pub global_time_window: Option<String>,
}

/// Retention cohorting mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetentionMode {
    /// Retained iff the actor had any activity in exactly period N.
    Classic,
    /// Retained iff the actor's last observed period is >= N.
    Rolling,
}

/// A retention query: cohorts actors by their first-activity period and
/// measures return activity over subsequent periods.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetentionQuery {
    pub cube: String,
    pub binding_key: String,
    pub time_dimension: String,
    pub granularity: Granularity,
    pub periods: u32,
    pub mode: RetentionMode,
    #[serde(default)]
    pub breakdown: Option<String>,
    pub date_range: DateRange,
    /// Filters restricting which actors enter the cohort (applied to the
    /// first-activity row), as opposed to `activity_filters` which restrict
    /// which later rows count as returning activity.
    #[serde(default)]
    pub cohort_filters: Vec<Filter>,
    #[serde(default)]
    pub activity_filters: Vec<Filter>,
}

/// A flow (Sankey) query: transitions between values of a step dimension
/// over time, for the same actor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowQuery {
    pub cube: String,
    pub binding_key: String,
    pub step_dimension: String,
    pub time_dimension: String,
}

/// At most one specialized query shape may accompany a `SemanticQuery`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SpecializedQuery {
    Funnel(FunnelQuery),
    Flow(FlowQuery),
    Retention(RetentionQuery),
}

/// The abstract analytical query the planner compiles into SQL.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SemanticQuery {
    pub measures: Vec<String>,
    pub dimensions: Vec<String>,
    pub time_dimensions: Vec<TimeDimensionRequest>,
    pub filters: Vec<Filter>,
    pub order: Vec<OrderEntry>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub segments: Vec<String>,
    pub specialized: Option<SpecializedQuery>,
}

impl SemanticQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// All member references across measures, dimensions, time dimensions,
    /// and filters, used by `QueryPlanner` to derive the set of cubes
    /// a query touches.
    pub fn all_member_refs(&self) -> Vec<&str> {
        let mut refs: Vec<&str> = self.measures.iter().map(String::as_str).collect();
        refs.extend(self.dimensions.iter().map(String::as_str));
        refs.extend(self.time_dimensions.iter().map(|t| t.dimension.as_str()));
        refs.extend(self.segments.iter().map(String::as_str));
        for f in &self.filters {
            refs.extend(f.member_refs());
        }
        refs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_leaves_flattens_logical_tree() {
        let f = Filter::And {
            and: vec![
                Filter::simple("Orders.status", FilterOperator::Equals, vec!["done".into()]),
                Filter::Or {
                    or: vec![
                        Filter::simple("Orders.amount", FilterOperator::Gt, vec!["10".into()]),
                        Filter::simple("Orders.amount", FilterOperator::Lt, vec!["1".into()]),
                    ],
                },
            ],
        };
        assert_eq!(f.leaves().len(), 3);
    }

    #[test]
    fn member_refs_collects_all_sources() {
        let q = SemanticQuery {
            measures: vec!["Orders.count".into()],
            dimensions: vec!["Orders.status".into()],
            filters: vec![Filter::simple(
                "Orders.region",
                FilterOperator::Equals,
                vec!["US".into()],
            )],
            ..Default::default()
        };
        let refs = q.all_member_refs();
        assert_eq!(refs.len(), 3);
    }

    #[test]
    fn set_operator_requires_no_values() {
        assert!(FilterOperator::Set.requires_no_values());
        assert!(!FilterOperator::Equals.requires_no_values());
    }
}

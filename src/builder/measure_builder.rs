//! `MeasureBuilder`: renders a single measure's SQL expression.
//!
//! Simple, countDistinct, and number measures resolve directly against a
//! table alias. Calculated and window measures go through their own
//! dedicated methods instead of [`MeasureBuilder::build_measure_expr`],
//! since both need inputs (already-rendered dependency SQL, a resolved
//! base-measure expression) that the planner assembles ahead of time.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::adapter::DatabaseAdapter;
use crate::error::{EngineError, PlanningError};
use crate::model::measure::{Measure, MeasureType, WindowConfig, WindowMeasureKind, WindowOperation};
use crate::model::types::AggregationType;
use crate::sql::expr::{self, func, lit_float, lit_int, raw_sql, table_col, Expr, ExprExt};

static TEMPLATE_REF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z_][A-Za-z0-9_]*)?)\}").unwrap());

pub struct MeasureBuilder<'a> {
    adapter: &'a dyn DatabaseAdapter,
}

impl<'a> MeasureBuilder<'a> {
    pub fn new(adapter: &'a dyn DatabaseAdapter) -> Self {
        Self { adapter }
    }

    /// Render `measure`'s aggregate expression against `alias`'s column
    /// space. `measure.filter`, when present, guards the aggregated value
    /// with a `CASE WHEN` rather than wrapping the whole aggregate call, so
    /// it composes with every aggregation kind including `COUNT(DISTINCT)`.
    ///
    /// Panics on `Calculated`/`Window` measures; callers must route those
    /// through [`Self::build_calculated_expr`] / [`Self::build_window_measure`].
    pub fn build_measure_expr(&self, measure: &Measure, alias: &str) -> Expr {
        let filter_cond = measure.filter.as_ref().map(|f| f.resolve(alias));

        match &measure.measure_type {
            MeasureType::Count => match filter_cond {
                None => self.adapter.build_count(expr::star()),
                Some(cond) => self
                    .adapter
                    .build_count(guarded(lit_int(1), Some(cond))),
            },
            MeasureType::CountDistinct { expr: inner } => {
                let inner = guarded(inner.resolve(alias), filter_cond);
                self.adapter.build_count_distinct(inner)
            }
            MeasureType::Aggregate { agg, expr: inner } => {
                let inner = guarded(inner.resolve(alias), filter_cond);
                match agg {
                    AggregationType::Sum => self.adapter.build_sum(inner),
                    AggregationType::Avg => self.adapter.build_avg(inner),
                    AggregationType::Min => self.adapter.build_min(inner),
                    AggregationType::Max => self.adapter.build_max(inner),
                    AggregationType::Count => self.adapter.build_count(inner),
                    AggregationType::CountDistinct => self.adapter.build_count_distinct(inner),
                }
            }
            MeasureType::Number { expr: inner } => guarded(inner.resolve(alias), filter_cond),
            MeasureType::Calculated { .. } => {
                panic!(
                    "calculated measure {} must be rendered via build_calculated_expr",
                    measure.name
                )
            }
            MeasureType::Window { .. } => {
                panic!(
                    "window measure {} must be rendered via build_window_measure",
                    measure.name
                )
            }
        }
    }

    /// Re-aggregate a measure already pre-aggregated inside a CTE, reading
    /// `cte_alias.<measure>` instead of the base column. Additive measures
    /// (counts, sums, numbers) re-sum; everything else re-applies its own
    /// aggregate over the per-group value the CTE already produced (an
    /// average of averages, not a true global average, per the grouping
    /// convention this engine documents for CTE-backed non-additive measures).
    pub fn build_cte_reaggregation(&self, measure: &Measure, cte_alias: &str) -> Expr {
        let col = table_col(cte_alias, &measure.name);
        if measure.is_additive() {
            return self.adapter.build_sum(col);
        }
        match &measure.measure_type {
            MeasureType::Aggregate { agg: AggregationType::Avg, .. } => self.adapter.build_avg(col),
            MeasureType::Aggregate { agg: AggregationType::Min, .. } => self.adapter.build_min(col),
            MeasureType::Aggregate { agg: AggregationType::Max, .. } => self.adapter.build_max(col),
            _ => self.adapter.build_sum(col),
        }
    }

    /// Build a window measure's SQL: the dialect-specific window function
    /// call from the adapter, then combined with `base` per
    /// `config.operation`.
    pub fn build_window_measure(
        &self,
        kind: WindowMeasureKind,
        config: &WindowConfig,
        base: Option<Expr>,
        partition_by: Vec<Expr>,
        order_by: Vec<Expr>,
    ) -> Expr {
        let window_expr = self
            .adapter
            .build_window_function(kind, base.clone(), config, partition_by, order_by);

        match config.operation {
            WindowOperation::Raw => window_expr,
            WindowOperation::Difference => {
                let base = base.expect("difference window operation requires a base measure");
                base.sub(window_expr)
            }
            WindowOperation::Ratio => {
                let base = base.expect("ratio window operation requires a base measure");
                base.div(nullif_zero(window_expr))
            }
            WindowOperation::PercentChange => {
                let base = base.expect("percentChange window operation requires a base measure");
                base.clone()
                    .sub(window_expr.clone())
                    .div(nullif_zero(window_expr))
                    .mul(lit_float(100.0))
            }
        }
    }

    /// Substitute `{member}`/`{Cube.member}` refs in a calculated measure's
    /// template with the already-rendered SQL text of each dependency (keyed
    /// by fully-qualified `Cube.member`, in whatever order
    /// `calculated_measure_order` produced them).
    pub fn build_calculated_expr(
        &self,
        measure_name: &str,
        template: &str,
        owner_cube: &str,
        rendered: &HashMap<String, String>,
    ) -> Result<Expr, EngineError> {
        let mut missing: Option<String> = None;
        let substituted = TEMPLATE_REF
            .replace_all(template, |caps: &regex::Captures| {
                let raw = caps[1].to_string();
                let qualified = if raw.contains('.') {
                    raw
                } else {
                    format!("{owner_cube}.{raw}")
                };
                match rendered.get(&qualified) {
                    Some(sql) => format!("({sql})"),
                    None => {
                        missing.get_or_insert(qualified);
                        String::new()
                    }
                }
            })
            .into_owned();

        if let Some(reference) = missing {
            return Err(
                PlanningError::UnknownCalculatedMeasureRef(measure_name.to_string(), reference).into(),
            );
        }

        Ok(raw_sql(substituted))
    }
}

fn guarded(inner: Expr, condition: Option<Expr>) -> Expr {
    match condition {
        None => inner,
        Some(cond) => Expr::Case {
            operand: None,
            when_clauses: vec![(cond, inner)],
            else_clause: None,
        },
    }
}

fn nullif_zero(e: Expr) -> Expr {
    func("NULLIF", vec![e, lit_int(0)])
}

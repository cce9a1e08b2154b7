//! `DatabaseAdapter`: the dialect-specific rendering and capability layer
//! between the dialect-agnostic `sql::Query`/`Expr` AST and a concrete SQL
//! dialect.
//!
//! The planner and builders assemble expressions with the free functions in
//! [`crate::sql::expr`]; whenever a fragment has no portable representation
//! (date truncation, interval arithmetic, percentiles) they call through a
//! `DatabaseAdapter` instead. [`SqlDialectAdapter`] is the default
//! implementation, driven entirely by a `Dialect` value plus the capability
//! flags already exposed by `SqlDialect`.

pub mod capabilities;
pub mod duration;

use crate::error::ValidationError;
use crate::model::measure::{WindowConfig, WindowMeasureKind};
use crate::model::types::Granularity;
use crate::sql::dialect::{Dialect, SqlDialect};
use crate::sql::expr::{
    self, avg, count, count_distinct, dense_rank, lag_default, lead_default, max, min, ntile,
    percent_rank, rank, raw_sql, sum, Expr, ExprExt, WindowExt, WindowOrderBy,
};
use crate::sql::query::{Query, SelectExpr, SetOperation};

pub use capabilities::AdapterCapabilities;
pub use duration::{parse_iso8601_duration, IsoDuration};

/// Dialect-specific SQL construction a consumer supplies so the rest of the
/// engine never needs to match on `Dialect` itself.
pub trait DatabaseAdapter: std::fmt::Debug + Send + Sync {
    fn dialect(&self) -> Dialect;

    fn build_count(&self, expr: Expr) -> Expr {
        count(expr)
    }

    fn build_count_distinct(&self, expr: Expr) -> Expr {
        count_distinct(expr)
    }

    fn build_sum(&self, expr: Expr) -> Expr {
        sum(expr)
    }

    fn build_avg(&self, expr: Expr) -> Expr {
        avg(expr)
    }

    fn build_min(&self, expr: Expr) -> Expr {
        min(expr)
    }

    fn build_max(&self, expr: Expr) -> Expr {
        max(expr)
    }

    /// Build `agg(expr)` restricted to rows matching `condition`: `FILTER
    /// (WHERE ...)` where the dialect supports it, `CASE WHEN` otherwise.
    fn build_conditional_aggregation(&self, agg_name: &str, expr: Expr, condition: Expr) -> Expr {
        if self.dialect().dialect().supports_aggregate_filter() {
            raw_sql(format!(
                "{agg}({expr}) FILTER (WHERE {cond})",
                agg = agg_name,
                expr = expr.to_sql(self.dialect()),
                cond = condition.to_sql(self.dialect()),
            ))
        } else {
            let guarded = Expr::Case {
                operand: None,
                when_clauses: vec![(condition, expr)],
                else_clause: None,
            };
            expr::func(agg_name, vec![guarded])
        }
    }

    /// Truncate `expr` (a timestamp/date column) to `granularity`.
    fn build_time_dimension(&self, granularity: Granularity, expr: Expr) -> Expr {
        let e = expr.to_sql(self.dialect());
        let unit = granularity.as_str();
        match self.dialect() {
            Dialect::DuckDb
            | Dialect::Postgres
            | Dialect::Redshift
            | Dialect::Databricks
            | Dialect::Snowflake
            | Dialect::Ansi => raw_sql(format!("DATE_TRUNC('{unit}', {e})")),
            Dialect::BigQuery => {
                raw_sql(format!("TIMESTAMP_TRUNC({e}, {})", unit.to_uppercase()))
            }
            Dialect::TSql => raw_sql(format!(
                "DATEADD({unit}, DATEDIFF({unit}, 0, {e}), 0)",
                unit = unit,
                e = e
            )),
            Dialect::MySql => raw_sql(mysql_truncate(granularity, &e)),
        }
    }

    /// Count whole `granularity` units between `a` and `b` (`b - a`).
    fn build_date_diff_periods(&self, a: Expr, b: Expr, granularity: Granularity) -> Expr {
        let a_sql = a.to_sql(self.dialect());
        let b_sql = b.to_sql(self.dialect());
        let unit = granularity.as_str();
        match self.dialect() {
            Dialect::DuckDb => raw_sql(format!("DATE_DIFF('{unit}', {a_sql}, {b_sql})")),
            Dialect::Postgres | Dialect::Ansi => {
                raw_sql(postgres_date_diff(&a_sql, &b_sql, granularity))
            }
            Dialect::TSql | Dialect::Snowflake | Dialect::Redshift | Dialect::Databricks => {
                raw_sql(format!("DATEDIFF({unit}, {a_sql}, {b_sql})"))
            }
            Dialect::MySql => raw_sql(format!(
                "TIMESTAMPDIFF({}, {a_sql}, {b_sql})",
                unit.to_uppercase()
            )),
            Dialect::BigQuery => raw_sql(format!(
                "DATE_DIFF({b_sql}, {a_sql}, {})",
                unit.to_uppercase()
            )),
        }
    }

    /// Add an ISO-8601 duration to `expr`.
    fn build_date_add_interval(&self, expr: Expr, iso_duration: &str) -> Result<Expr, ValidationError> {
        let duration = parse_iso8601_duration(iso_duration)?;
        if duration.is_zero() {
            return Ok(expr);
        }
        let mut sql = expr.to_sql(self.dialect());
        for (amount, unit) in [
            (duration.total_months(), "month"),
            (duration.total_days(), "day"),
            (duration.total_seconds(), "second"),
        ] {
            if amount == 0 {
                continue;
            }
            sql = self.add_interval_unit(sql, amount, unit);
        }
        Ok(raw_sql(sql))
    }

    /// Render `sql + amount unit` for a single fixed unit (`month`, `day`, or
    /// `second`). Split out so `build_date_add_interval` can chain calendar
    /// and fixed-length components independently.
    fn add_interval_unit(&self, sql: String, amount: i64, unit: &str) -> String {
        match self.dialect() {
            Dialect::Postgres
            | Dialect::DuckDb
            | Dialect::Redshift
            | Dialect::Databricks
            | Dialect::Ansi => format!("({sql} + INTERVAL '{amount} {unit}')"),
            Dialect::MySql => format!("DATE_ADD({sql}, INTERVAL {amount} {})", unit.to_uppercase()),
            Dialect::TSql | Dialect::Snowflake => format!("DATEADD({unit}, {amount}, {sql})"),
            Dialect::BigQuery => format!("DATE_ADD({sql}, INTERVAL {amount} {})", unit.to_uppercase()),
        }
    }

    /// Seconds elapsed between `a` and `b` (`b - a`).
    fn build_time_difference_seconds(&self, a: Expr, b: Expr) -> Expr {
        let a_sql = a.to_sql(self.dialect());
        let b_sql = b.to_sql(self.dialect());
        match self.dialect() {
            Dialect::Postgres
            | Dialect::DuckDb
            | Dialect::Redshift
            | Dialect::Databricks
            | Dialect::Ansi => raw_sql(format!("EXTRACT(EPOCH FROM ({b_sql} - {a_sql}))")),
            Dialect::TSql | Dialect::Snowflake => {
                raw_sql(format!("DATEDIFF(second, {a_sql}, {b_sql})"))
            }
            Dialect::MySql => raw_sql(format!("TIMESTAMPDIFF(SECOND, {a_sql}, {b_sql})")),
            Dialect::BigQuery => raw_sql(format!("TIMESTAMP_DIFF({b_sql}, {a_sql}, SECOND)")),
        }
    }

    /// `PERCENTILE_CONT(p) WITHIN GROUP (ORDER BY expr)` where the dialect
    /// supports it directly; `None` when the caller must fall back to a
    /// subquery (see `capabilities().supports_percentile_subqueries`).
    fn build_percentile(&self, expr: Expr, p: f64) -> Option<Expr> {
        match self.dialect() {
            Dialect::Postgres
            | Dialect::DuckDb
            | Dialect::Redshift
            | Dialect::Databricks
            | Dialect::Snowflake
            | Dialect::Ansi => Some(raw_sql(format!(
                "PERCENTILE_CONT({p}) WITHIN GROUP (ORDER BY {})",
                expr.to_sql(self.dialect())
            ))),
            Dialect::TSql | Dialect::MySql | Dialect::BigQuery => None,
        }
    }

    /// A `0..n` integer series as a one-column derived query, for joining
    /// against a rolling-retention cohort's max observed period.
    fn build_period_series_subquery(&self, n: u32) -> Query {
        fn row(i: u32) -> Query {
            Query::new().select(vec![SelectExpr::new(expr::lit_int(i as i64)).with_alias("period")])
        }

        let mut acc = row(0);
        for i in 1..n.max(1) {
            acc = Query {
                set_op: Some(Box::new(SetOperation::union_all(acc, row(i)))),
                ..Default::default()
            };
        }
        acc
    }

    /// Build a window-function expression for a window measure.
    fn build_window_function(
        &self,
        kind: WindowMeasureKind,
        base: Option<Expr>,
        config: &WindowConfig,
        partition_by: Vec<Expr>,
        order_by: Vec<Expr>,
    ) -> Expr {
        let function = match kind {
            WindowMeasureKind::RunningTotal => sum(base.expect("runningTotal requires a base measure")),
            WindowMeasureKind::Lag => lag_default(
                base.expect("lag requires a base measure"),
                config.offset.unwrap_or(1),
                config
                    .default_value
                    .map(expr::lit_float)
                    .unwrap_or_else(expr::lit_null),
            ),
            WindowMeasureKind::Lead => lead_default(
                base.expect("lead requires a base measure"),
                config.offset.unwrap_or(1),
                config
                    .default_value
                    .map(expr::lit_float)
                    .unwrap_or_else(expr::lit_null),
            ),
            WindowMeasureKind::Rank => rank(),
            WindowMeasureKind::DenseRank => dense_rank(),
            WindowMeasureKind::PercentRank => percent_rank(),
            WindowMeasureKind::NTile => ntile(config.n_tile_buckets.unwrap_or(4) as u64),
            WindowMeasureKind::FirstValue => {
                expr::first_value(base.expect("firstValue requires a base measure"))
            }
            WindowMeasureKind::LastValue => {
                expr::last_value(base.expect("lastValue requires a base measure"))
            }
            WindowMeasureKind::MovingAverage => avg(base.expect("movingAverage requires a base measure")),
            WindowMeasureKind::PercentOfTotal => sum(base.expect("percentOfTotal requires a base measure")),
        };

        let order_by: Vec<WindowOrderBy> = order_by.into_iter().map(WindowOrderBy::new).collect();
        let mut builder = function.over().partition_by(partition_by).order_by(order_by.clone());

        builder = match kind {
            WindowMeasureKind::RunningTotal => builder.rows_unbounded_preceding(),
            WindowMeasureKind::MovingAverage => match (config.frame, order_by.is_empty()) {
                (Some(frame), false) => {
                    use crate::sql::expr::{WindowFrame, WindowFrameBound, WindowFrameKind};
                    let start = if frame.preceding == 0 {
                        WindowFrameBound::CurrentRow
                    } else {
                        WindowFrameBound::Preceding(frame.preceding as u64)
                    };
                    let end = if frame.following == 0 {
                        WindowFrameBound::CurrentRow
                    } else {
                        WindowFrameBound::Following(frame.following as u64)
                    };
                    builder.frame(WindowFrame::between(WindowFrameKind::Rows, start, end))
                }
                _ => builder,
            },
            _ => builder,
        };

        builder.build()
    }

    /// Normalize a raw time-dimension value returned by the database into
    /// the engine's canonical string form. The default implementation is a
    /// pass-through: this crate has no concrete DB driver, so any
    /// driver-specific type conversion happens in the embedding application
    /// before the value reaches the executor.
    fn convert_time_dimension_result(&self, value: &str) -> String {
        value.to_string()
    }

    fn capabilities(&self) -> AdapterCapabilities {
        let dialect = self.dialect();
        let d = dialect.dialect();
        AdapterCapabilities {
            dialect,
            supports_aggregate_filter: d.supports_aggregate_filter(),
            supports_native_percentile: !matches!(
                dialect,
                Dialect::TSql | Dialect::MySql | Dialect::BigQuery
            ),
            supports_percentile_subqueries: true,
            supports_nulls_ordering: d.supports_nulls_ordering(),
            supports_lateral: d.supports_lateral(),
        }
    }
}

fn mysql_truncate(granularity: Granularity, e: &str) -> String {
    match granularity {
        Granularity::Second => format!("DATE_FORMAT({e}, '%Y-%m-%d %H:%i:%s')"),
        Granularity::Minute => format!("DATE_FORMAT({e}, '%Y-%m-%d %H:%i:00')"),
        Granularity::Hour => format!("DATE_FORMAT({e}, '%Y-%m-%d %H:00:00')"),
        Granularity::Day => format!("DATE({e})"),
        Granularity::Week => format!("DATE_SUB(DATE({e}), INTERVAL WEEKDAY({e}) DAY)"),
        Granularity::Month => format!("DATE_FORMAT({e}, '%Y-%m-01')"),
        Granularity::Quarter => format!(
            "STR_TO_DATE(CONCAT(YEAR({e}), '-', LPAD((QUARTER({e}) - 1) * 3 + 1, 2, '0'), '-01'), '%Y-%m-%d')"
        ),
        Granularity::Year => format!("DATE_FORMAT({e}, '%Y-01-01')"),
    }
}

/// Compute `b - a` in whole `granularity` units for dialects without a
/// native `DATEDIFF`/`DATE_DIFF` function (Postgres, and the `Ansi`
/// reference dialect, which mirrors it).
fn postgres_date_diff(a_sql: &str, b_sql: &str, granularity: Granularity) -> String {
    match granularity {
        Granularity::Year => format!(
            "(EXTRACT(YEAR FROM {b_sql}) - EXTRACT(YEAR FROM {a_sql}))"
        ),
        Granularity::Quarter => format!(
            "(((EXTRACT(YEAR FROM {b_sql}) - EXTRACT(YEAR FROM {a_sql})) * 12 + \
             (EXTRACT(MONTH FROM {b_sql}) - EXTRACT(MONTH FROM {a_sql}))) / 3)"
        ),
        Granularity::Month => format!(
            "((EXTRACT(YEAR FROM {b_sql}) - EXTRACT(YEAR FROM {a_sql})) * 12 + \
             (EXTRACT(MONTH FROM {b_sql}) - EXTRACT(MONTH FROM {a_sql})))"
        ),
        Granularity::Week => format!(
            "FLOOR(EXTRACT(EPOCH FROM ({b_sql} - {a_sql})) / 604800)"
        ),
        Granularity::Day => format!(
            "FLOOR(EXTRACT(EPOCH FROM ({b_sql} - {a_sql})) / 86400)"
        ),
        Granularity::Hour => format!(
            "FLOOR(EXTRACT(EPOCH FROM ({b_sql} - {a_sql})) / 3600)"
        ),
        Granularity::Minute => format!(
            "FLOOR(EXTRACT(EPOCH FROM ({b_sql} - {a_sql})) / 60)"
        ),
        Granularity::Second => format!("FLOOR(EXTRACT(EPOCH FROM ({b_sql} - {a_sql})))"),
    }
}

/// Default `DatabaseAdapter`, backed by one of the built-in dialects. This is
/// what `EngineConfig::default_dialect` resolves to when a consumer does not
/// supply its own adapter.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlDialectAdapter {
    dialect: Dialect,
}

impl SqlDialectAdapter {
    pub fn new(dialect: Dialect) -> Self {
        Self { dialect }
    }
}

impl DatabaseAdapter for SqlDialectAdapter {
    fn dialect(&self) -> Dialect {
        self.dialect
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::expr::col;

    fn adapter(dialect: Dialect) -> SqlDialectAdapter {
        SqlDialectAdapter::new(dialect)
    }

    #[test]
    fn time_dimension_truncation_per_dialect() {
        let a = adapter(Dialect::Postgres);
        let sql = a
            .build_time_dimension(Granularity::Month, col("created_at"))
            .to_sql(Dialect::Postgres);
        assert!(sql.contains("DATE_TRUNC('month'"));

        let a = adapter(Dialect::BigQuery);
        let sql = a
            .build_time_dimension(Granularity::Day, col("created_at"))
            .to_sql(Dialect::BigQuery);
        assert!(sql.contains("TIMESTAMP_TRUNC"));

        let a = adapter(Dialect::TSql);
        let sql = a
            .build_time_dimension(Granularity::Day, col("created_at"))
            .to_sql(Dialect::TSql);
        assert!(sql.starts_with("DATEADD"));
    }

    #[test]
    fn conditional_aggregation_uses_filter_when_supported() {
        let a = adapter(Dialect::DuckDb);
        let sql = a
            .build_conditional_aggregation("COUNT", col("id"), col("status").eq(expr::lit_str("done")))
            .to_sql(Dialect::DuckDb);
        assert!(sql.contains("FILTER (WHERE"));
    }

    #[test]
    fn conditional_aggregation_falls_back_to_case_when() {
        let a = adapter(Dialect::MySql);
        let sql = a
            .build_conditional_aggregation("COUNT", col("id"), col("status").eq(expr::lit_str("done")))
            .to_sql(Dialect::MySql);
        assert!(sql.contains("CASE WHEN"));
    }

    #[test]
    fn date_add_interval_parses_and_chains() {
        let a = adapter(Dialect::Postgres);
        let result = a
            .build_date_add_interval(col("started_at"), "P7D")
            .unwrap();
        let sql = result.to_sql(Dialect::Postgres);
        assert!(sql.contains("INTERVAL '7 day'"));
    }

    #[test]
    fn date_add_interval_rejects_malformed_duration() {
        let a = adapter(Dialect::Postgres);
        assert!(a.build_date_add_interval(col("x"), "not-a-duration").is_err());
    }

    #[test]
    fn percentile_is_none_for_dialects_without_native_support() {
        let a = adapter(Dialect::MySql);
        assert!(a.build_percentile(col("value"), 0.5).is_none());
        assert!(!a.capabilities().supports_native_percentile);

        let a = adapter(Dialect::Postgres);
        assert!(a.build_percentile(col("value"), 0.5).is_some());
    }

    #[test]
    fn period_series_subquery_produces_n_rows_via_union_all() {
        let a = adapter(Dialect::Postgres);
        let query = a.build_period_series_subquery(3);
        let sql = query.to_sql(Dialect::Postgres);
        assert_eq!(sql.matches("UNION ALL").count(), 2);
    }
}

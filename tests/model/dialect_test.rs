//! Integration coverage for `SqlDialectAdapter`'s per-dialect rendering and
//! capability flags across the full `Dialect` set.

use cubeplan::adapter::{DatabaseAdapter, SqlDialectAdapter};
use cubeplan::dialect::Dialect;
use cubeplan::model::types::Granularity;
use cubeplan::sql::expr::col;

#[test]
fn postgres_truncates_with_date_trunc() {
    let adapter = SqlDialectAdapter::new(Dialect::Postgres);
    let expr = adapter.build_time_dimension(Granularity::Month, col("created_at"));
    assert_eq!(expr.to_sql(Dialect::Postgres), "DATE_TRUNC('month', \"created_at\")");
}

#[test]
fn bigquery_truncates_with_timestamp_trunc() {
    let adapter = SqlDialectAdapter::new(Dialect::BigQuery);
    let expr = adapter.build_time_dimension(Granularity::Day, col("created_at"));
    assert_eq!(expr.to_sql(Dialect::BigQuery), "TIMESTAMP_TRUNC(`created_at`, DAY)");
}

#[test]
fn tsql_truncates_via_dateadd_datediff() {
    let adapter = SqlDialectAdapter::new(Dialect::TSql);
    let sql = adapter
        .build_time_dimension(Granularity::Week, col("created_at"))
        .to_sql(Dialect::TSql);
    assert!(sql.starts_with("DATEADD(week, DATEDIFF(week,"));
}

#[test]
fn percentile_is_none_for_dialects_without_percentile_cont() {
    let expr = col("latency_ms");
    for dialect in [Dialect::TSql, Dialect::MySql, Dialect::BigQuery] {
        let adapter = SqlDialectAdapter::new(dialect);
        assert!(adapter.build_percentile(expr.clone(), 0.95).is_none());
    }
}

#[test]
fn percentile_is_some_for_dialects_with_percentile_cont() {
    let expr = col("latency_ms");
    for dialect in [Dialect::Postgres, Dialect::DuckDb, Dialect::Snowflake] {
        let adapter = SqlDialectAdapter::new(dialect);
        let built = adapter.build_percentile(expr.clone(), 0.5).unwrap();
        assert!(built.to_sql(dialect).contains("PERCENTILE_CONT(0.5)"));
    }
}

#[test]
fn period_series_subquery_unions_n_rows() {
    let adapter = SqlDialectAdapter::new(Dialect::Postgres);
    let sql = adapter.build_period_series_subquery(3).to_sql(Dialect::Postgres);
    assert_eq!(sql.matches("UNION ALL").count(), 2);
}

#[test]
fn date_add_interval_is_zero_duration_noop() {
    let adapter = SqlDialectAdapter::new(Dialect::Postgres);
    let expr = col("created_at");
    let built = adapter.build_date_add_interval(expr.clone(), "P0D").unwrap();
    assert_eq!(built, expr);
}

#[test]
fn date_add_interval_rejects_malformed_duration() {
    let adapter = SqlDialectAdapter::new(Dialect::Postgres);
    assert!(adapter.build_date_add_interval(col("created_at"), "not-a-duration").is_err());
}

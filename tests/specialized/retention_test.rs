//! Integration coverage for `RetentionBuilder`: out-of-range period counts,
//! cross-cube binding-key rejection, classic-with-breakdown SQL shape, and
//! cohort/activity filter rendering.

use chrono::Utc;
use cubeplan::adapter::SqlDialectAdapter;
use cubeplan::dialect::Dialect;
use cubeplan::error::{EngineError, ValidationError};
use cubeplan::filter::{DateTimeBuilder, FilterCacheManager};
use cubeplan::model::types::Granularity;
use cubeplan::model::{
    Cube, CubeExpr, CubeRegistry, DateRange, Dimension, Filter, FilterOperator, RetentionMode,
    RetentionQuery, SecurityContext,
};
use cubeplan::specialized::RetentionBuilder;
use cubeplan::sql::params::ParamBinder;

fn registry() -> CubeRegistry {
    let mut reg = CubeRegistry::new();
    reg.register(
        Cube::new("Events", CubeExpr::raw("events"))
            .with_dimension(Dimension::string("userId", CubeExpr::column("user_id")))
            .with_dimension(Dimension::time("occurredAt", CubeExpr::column("occurred_at")))
            .with_dimension(Dimension::string("platform", CubeExpr::column("platform"))),
    );
    reg.register(
        Cube::new("Customers", CubeExpr::raw("customers")).with_dimension(Dimension::string(
            "id",
            CubeExpr::column("id"),
        )),
    );
    reg
}

fn base_query() -> RetentionQuery {
    RetentionQuery {
        cube: "Events".into(),
        binding_key: "Events.userId".into(),
        time_dimension: "Events.occurredAt".into(),
        granularity: Granularity::Week,
        periods: 8,
        mode: RetentionMode::Classic,
        breakdown: None,
        date_range: DateRange::Relative("last 90 days".into()),
        cohort_filters: vec![],
        activity_filters: vec![],
    }
}

#[test]
fn rejects_periods_beyond_the_configured_max() {
    let reg = registry();
    let adapter = SqlDialectAdapter::new(Dialect::Postgres);
    let sec = SecurityContext::new();
    let builder = RetentionBuilder::new(&reg, &adapter, &sec, 52);
    let mut q = base_query();
    q.periods = 53;
    assert!(matches!(
        builder.validate(&q).unwrap_err(),
        EngineError::Validation(ValidationError::RetentionPeriodsOutOfRange { requested: 53, max: 52 })
    ));
}

#[test]
fn binding_key_from_a_different_cube_is_rejected() {
    let reg = registry();
    let adapter = SqlDialectAdapter::new(Dialect::Postgres);
    let sec = SecurityContext::new();
    let builder = RetentionBuilder::new(&reg, &adapter, &sec, 52);
    let mut q = base_query();
    q.binding_key = "Customers.id".into();
    assert!(matches!(
        builder.validate(&q).unwrap_err(),
        EngineError::Validation(ValidationError::IllegalFilterTarget(_))
    ));
}

#[test]
fn classic_mode_with_breakdown_groups_by_breakdown_column() {
    let reg = registry();
    let adapter = SqlDialectAdapter::new(Dialect::Postgres);
    let sec = SecurityContext::new();
    let builder = RetentionBuilder::new(&reg, &adapter, &sec, 52);
    let datetime = DateTimeBuilder::new(Utc::now());
    let mut cache = FilterCacheManager::new();
    let mut binder = ParamBinder::new();

    let mut q = base_query();
    q.breakdown = Some("Events.platform".into());
    let query = builder.build(&q, &datetime, &mut cache, &mut binder).unwrap();
    let sql = query.to_sql(Dialect::Postgres);
    assert!(sql.contains("breakdown"));
    assert!(!sql.contains("max_period"));
}

#[test]
fn rolling_mode_without_breakdown_has_no_breakdown_column() {
    let reg = registry();
    let adapter = SqlDialectAdapter::new(Dialect::Postgres);
    let sec = SecurityContext::new();
    let builder = RetentionBuilder::new(&reg, &adapter, &sec, 52);
    let datetime = DateTimeBuilder::new(Utc::now());
    let mut cache = FilterCacheManager::new();
    let mut binder = ParamBinder::new();

    let mut q = base_query();
    q.mode = RetentionMode::Rolling;
    let query = builder.build(&q, &datetime, &mut cache, &mut binder).unwrap();
    let sql = query.to_sql(Dialect::Postgres);
    assert!(sql.contains("max_period"));
    assert!(!sql.contains("\"breakdown\""));
}

#[test]
fn cohort_and_activity_filters_render_into_distinct_ctes() {
    let reg = registry();
    let adapter = SqlDialectAdapter::new(Dialect::Postgres);
    let sec = SecurityContext::new();
    let builder = RetentionBuilder::new(&reg, &adapter, &sec, 52);
    let datetime = DateTimeBuilder::new(Utc::now());
    let mut cache = FilterCacheManager::new();
    let mut binder = ParamBinder::new();

    let mut q = base_query();
    q.cohort_filters.push(Filter::simple("Events.platform", FilterOperator::Equals, vec!["ios".into()]));
    q.activity_filters.push(Filter::simple("Events.platform", FilterOperator::Equals, vec!["android".into()]));

    let query = builder.build(&q, &datetime, &mut cache, &mut binder).unwrap();
    let sql = query.to_sql(Dialect::Postgres);
    assert!(sql.contains("'ios'"));
    assert!(sql.contains("'android'"));
}

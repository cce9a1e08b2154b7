//! Integration coverage for `FunnelBuilder`: three-step funnels, step
//! filters, binding keys resolved through a join hop, and the no-deadline
//! and no-join-path edge cases.

use chrono::Utc;
use cubeplan::adapter::SqlDialectAdapter;
use cubeplan::dialect::Dialect;
use cubeplan::error::{EngineError, ValidationError};
use cubeplan::filter::{DateTimeBuilder, FilterCacheManager};
use cubeplan::model::{
    Cube, CubeExpr, CubeRegistry, Dimension, Filter, FilterOperator, FunnelQuery, FunnelStep,
    Join, JoinOn, JoinRelationship, SecurityContext,
};
use cubeplan::specialized::FunnelBuilder;
use cubeplan::sql::params::ParamBinder;

fn registry() -> CubeRegistry {
    let mut reg = CubeRegistry::new();
    reg.register(
        Cube::new("Signups", CubeExpr::raw("signups"))
            .with_dimension(Dimension::string("userId", CubeExpr::column("user_id")))
            .with_dimension(Dimension::time("createdAt", CubeExpr::column("created_at")))
            .with_join(Join::new(
                "Purchases",
                JoinRelationship::HasMany,
                vec![JoinOn::new(CubeExpr::column("user_id"), CubeExpr::column("user_id"))],
            )),
    );
    reg.register(
        Cube::new("Purchases", CubeExpr::raw("purchases"))
            .with_dimension(Dimension::string("status", CubeExpr::column("status")))
            .with_dimension(Dimension::time("purchasedAt", CubeExpr::column("purchased_at"))),
    );
    reg.register(
        Cube::new("Referrals", CubeExpr::raw("referrals"))
            .with_dimension(Dimension::time("createdAt", CubeExpr::column("created_at")))
            .with_join(Join::new(
                "Signups",
                JoinRelationship::BelongsTo,
                vec![JoinOn::new(CubeExpr::column("user_id"), CubeExpr::column("user_id"))],
            )),
    );
    reg
}

fn three_step_funnel() -> FunnelQuery {
    FunnelQuery {
        steps: vec![
            FunnelStep { name: "signup".into(), cube: "Signups".into(), filters: vec![], time_dimension: None },
            FunnelStep {
                name: "purchase".into(),
                cube: "Purchases".into(),
                filters: vec![Filter::simple("Purchases.status", FilterOperator::Equals, vec!["paid".into()])],
                time_dimension: Some("Purchases.purchasedAt".into()),
            },
            FunnelStep { name: "referral".into(), cube: "Referrals".into(), filters: vec![], time_dimension: None },
        ],
        binding_key: "Signups.userId".into(),
        time_to_convert: None,
        include_time_metrics: false,
        global_time_window: None,
    }
}

#[test]
fn three_step_funnel_builds_one_cte_per_step() {
    let reg = registry();
    let adapter = SqlDialectAdapter::new(Dialect::Postgres);
    let sec = SecurityContext::new();
    let builder = FunnelBuilder::new(&reg, &adapter, &sec, 10);
    let datetime = DateTimeBuilder::new(Utc::now());
    let mut cache = FilterCacheManager::new();
    let mut binder = ParamBinder::new();

    let query = builder.build(&three_step_funnel(), &datetime, &mut cache, &mut binder).unwrap();
    let sql = query.to_sql(Dialect::Postgres);
    assert!(sql.contains("step_0"));
    assert!(sql.contains("step_1"));
    assert!(sql.contains("step_2"));
    assert!(sql.contains("funnel_joined"));
    assert!(sql.contains("funnel_metrics"));
}

#[test]
fn no_time_to_convert_means_no_interval_clause() {
    let reg = registry();
    let adapter = SqlDialectAdapter::new(Dialect::Postgres);
    let sec = SecurityContext::new();
    let builder = FunnelBuilder::new(&reg, &adapter, &sec, 10);
    let datetime = DateTimeBuilder::new(Utc::now());
    let mut cache = FilterCacheManager::new();
    let mut binder = ParamBinder::new();

    let query = builder.build(&three_step_funnel(), &datetime, &mut cache, &mut binder).unwrap();
    let sql = query.to_sql(Dialect::Postgres);
    assert!(!sql.contains("INTERVAL"));
}

#[test]
fn time_metrics_are_omitted_unless_include_time_metrics_is_set() {
    let reg = registry();
    let adapter = SqlDialectAdapter::new(Dialect::Postgres);
    let sec = SecurityContext::new();
    let builder = FunnelBuilder::new(&reg, &adapter, &sec, 10);
    let datetime = DateTimeBuilder::new(Utc::now());
    let mut cache = FilterCacheManager::new();
    let mut binder = ParamBinder::new();

    let query = builder.build(&three_step_funnel(), &datetime, &mut cache, &mut binder).unwrap();
    let sql = query.to_sql(Dialect::Postgres);
    assert!(!sql.contains("avg_time_to_convert_seconds"));

    let mut with_metrics = three_step_funnel();
    with_metrics.include_time_metrics = true;
    let query = builder.build(&with_metrics, &datetime, &mut cache, &mut binder).unwrap();
    let sql = query.to_sql(Dialect::Postgres);
    assert!(sql.contains("step_1_avg_time_to_convert_seconds"));
    assert!(sql.contains("step_1_min_time_to_convert_seconds"));
    assert!(sql.contains("step_1_max_time_to_convert_seconds"));
    assert!(sql.contains("step_1_median_time_to_convert_seconds"));
    assert!(sql.contains("step_1_p90_time_to_convert_seconds"));
}

#[test]
fn global_time_window_bounds_every_step_against_step_zero() {
    let reg = registry();
    let adapter = SqlDialectAdapter::new(Dialect::Postgres);
    let sec = SecurityContext::new();
    let builder = FunnelBuilder::new(&reg, &adapter, &sec, 10);
    let datetime = DateTimeBuilder::new(Utc::now());
    let mut cache = FilterCacheManager::new();
    let mut binder = ParamBinder::new();

    let mut f = three_step_funnel();
    f.global_time_window = Some("P30D".into());
    let query = builder.build(&f, &datetime, &mut cache, &mut binder).unwrap();
    let sql = query.to_sql(Dialect::Postgres);
    assert!(sql.contains("INTERVAL"));
    assert!(sql.contains("\"step_0\".\"occurred_at\""));
}

#[test]
fn step_filter_is_rendered_into_its_own_cte() {
    let reg = registry();
    let adapter = SqlDialectAdapter::new(Dialect::Postgres);
    let sec = SecurityContext::new();
    let builder = FunnelBuilder::new(&reg, &adapter, &sec, 10);
    let datetime = DateTimeBuilder::new(Utc::now());
    let mut cache = FilterCacheManager::new();
    let mut binder = ParamBinder::new();

    let query = builder.build(&three_step_funnel(), &datetime, &mut cache, &mut binder).unwrap();
    let sql = query.to_sql(Dialect::Postgres);
    assert!(sql.contains("\"purchases\".\"status\""));
}

#[test]
fn binding_key_resolves_through_a_single_join_hop() {
    let reg = registry();
    let adapter = SqlDialectAdapter::new(Dialect::Postgres);
    let sec = SecurityContext::new();
    let builder = FunnelBuilder::new(&reg, &adapter, &sec, 10);
    let mut f = three_step_funnel();
    f.steps.truncate(2);
    let datetime = DateTimeBuilder::new(Utc::now());
    let mut cache = FilterCacheManager::new();
    let mut binder = ParamBinder::new();
    assert!(builder.build(&f, &datetime, &mut cache, &mut binder).is_ok());
}

#[test]
fn binding_key_with_no_join_path_is_rejected() {
    let mut reg = registry();
    reg.register(Cube::new("Isolated", CubeExpr::raw("isolated")).with_dimension(Dimension::time(
        "createdAt",
        CubeExpr::column("created_at"),
    )));
    let adapter = SqlDialectAdapter::new(Dialect::Postgres);
    let sec = SecurityContext::new();
    let builder = FunnelBuilder::new(&reg, &adapter, &sec, 10);
    let mut f = three_step_funnel();
    // `Isolated` has no `userId` dimension and no join to `Signups`.
    f.steps[2].cube = "Isolated".into();
    let datetime = DateTimeBuilder::new(Utc::now());
    let mut cache = FilterCacheManager::new();
    let mut binder = ParamBinder::new();
    let err = builder.build(&f, &datetime, &mut cache, &mut binder).unwrap_err();
    assert!(matches!(
        err,
        EngineError::Validation(ValidationError::MissingJoinPathForFilter { .. })
    ));
}

//! Integration coverage for `QueryBuilder`: time-dimension date ranges,
//! ordering/pagination, and dimension resolution through a fan-out CTE.

use chrono::Utc;
use cubeplan::adapter::SqlDialectAdapter;
use cubeplan::builder::QueryBuilder;
use cubeplan::dialect::Dialect;
use cubeplan::error::{EngineError, PlanningError};
use cubeplan::filter::{DateTimeBuilder, FilterCacheManager};
use cubeplan::model::{
    AggregationType, Cube, CubeExpr, CubeRegistry, DateRange, Dimension, Join, JoinOn,
    JoinRelationship, Measure, OrderEntry, SecurityContext, SemanticQuery, SortDirSerde,
    TimeDimensionRequest, WindowConfig, WindowMeasureKind,
};
use cubeplan::planner::QueryPlanner;
use cubeplan::sql::params::ParamBinder;
use cubeplan::sql::query::Query;

fn two_cube_registry() -> CubeRegistry {
    let mut reg = CubeRegistry::new();
    reg.register(
        Cube::new("Orders", CubeExpr::raw("orders"))
            .with_measure(Measure::count("count"))
            .with_measure(Measure::simple("revenue", AggregationType::Sum, CubeExpr::column("amount")))
            .with_dimension(Dimension::string("status", CubeExpr::column("status")))
            .with_dimension(Dimension::time("created_at", CubeExpr::column("created_at")))
            .with_join(Join::new(
                "Customers",
                JoinRelationship::BelongsTo,
                vec![JoinOn::new(CubeExpr::column("customer_id"), CubeExpr::column("id"))],
            )),
    );
    reg.register(
        Cube::new("Customers", CubeExpr::raw("customers")).with_dimension(Dimension::string(
            "region",
            CubeExpr::column("region"),
        )),
    );
    reg
}

fn build_query(reg: &CubeRegistry, query: &SemanticQuery) -> Result<Query, EngineError> {
    let planner = QueryPlanner::new(reg);
    let plan = planner.plan(query)?;
    let adapter = SqlDialectAdapter::new(Dialect::Postgres);
    let security = SecurityContext::new();
    let builder = QueryBuilder::new(reg, &adapter, &security);
    let datetime = DateTimeBuilder::new(Utc::now());
    let mut cache = FilterCacheManager::new();
    let mut binder = ParamBinder::new();
    builder.build(query, &plan, &datetime, &mut cache, &mut binder)
}

#[test]
fn time_dimension_date_range_lands_in_where() {
    let reg = two_cube_registry();
    let mut q = SemanticQuery::new();
    q.measures.push("Orders.count".to_string());
    q.time_dimensions.push(TimeDimensionRequest {
        dimension: "Orders.created_at".to_string(),
        granularity: None,
        date_range: Some(DateRange::Relative("this month".to_string())),
        compare_date_range: None,
    });
    let built = build_query(&reg, &q).unwrap();
    assert!(built.where_clause.is_some());
}

#[test]
fn order_by_limit_and_offset_are_applied() {
    let reg = two_cube_registry();
    let mut q = SemanticQuery::new();
    q.measures.push("Orders.count".to_string());
    q.dimensions.push("Orders.status".to_string());
    q.order.push(OrderEntry {
        member: "Orders.count".to_string(),
        direction: SortDirSerde::Desc,
    });
    q.limit = Some(10);
    q.offset = Some(5);
    let built = build_query(&reg, &q).unwrap();
    assert_eq!(built.order_by.len(), 1);
    let lo = built.limit_offset.unwrap();
    assert_eq!(lo.limit, Some(10));
    assert_eq!(lo.offset, Some(5));
}

#[test]
fn window_measure_on_the_primary_cube_renders_an_over_clause() {
    let mut reg = CubeRegistry::new();
    reg.register(
        Cube::new("Orders", CubeExpr::raw("orders"))
            .with_measure(Measure::count("count"))
            .with_measure(Measure::simple("revenue", AggregationType::Sum, CubeExpr::column("amount")))
            .with_measure(Measure::window(
                "runningRevenue",
                WindowMeasureKind::RunningTotal,
                WindowConfig {
                    measure: Some("revenue".into()),
                    partition_by: vec!["status".into()],
                    order_by: vec!["created_at".into()],
                    ..Default::default()
                },
            ))
            .with_dimension(Dimension::string("status", CubeExpr::column("status")))
            .with_dimension(Dimension::time("created_at", CubeExpr::column("created_at"))),
    );

    let mut q = SemanticQuery::new();
    q.measures.push("Orders.runningRevenue".to_string());
    q.dimensions.push("Orders.status".to_string());

    let built = build_query(&reg, &q).unwrap();
    let sql = built.to_sql(Dialect::Postgres);
    assert!(sql.contains("OVER ("));
    assert!(sql.contains("PARTITION BY"));
}

#[test]
fn requesting_a_fan_out_dimension_not_a_join_key_is_rejected() {
    let mut reg = CubeRegistry::new();
    reg.register(
        Cube::new("Customers", CubeExpr::raw("customers"))
            .with_measure(Measure::count("count"))
            .with_dimension(Dimension::string("region", CubeExpr::column("region")))
            .with_dimension(Dimension::string("tier", CubeExpr::column("tier")))
            .with_join(Join::new(
                "Orders",
                JoinRelationship::HasMany,
                vec![JoinOn::new(CubeExpr::column("id"), CubeExpr::column("customer_id"))],
            )),
    );
    reg.register(
        Cube::new("Orders", CubeExpr::raw("orders"))
            .with_measure(Measure::simple("revenue", AggregationType::Sum, CubeExpr::column("amount")))
            .with_dimension(Dimension::string("status", CubeExpr::column("status"))),
    );
    let mut q = SemanticQuery::new();
    q.measures.push("Customers.count".to_string());
    q.measures.push("Orders.revenue".to_string());
    q.dimensions.push("Customers.region".to_string());
    q.dimensions.push("Customers.tier".to_string());
    q.dimensions.push("Orders.status".to_string());
    let err = build_query(&reg, &q).unwrap_err();
    assert!(matches!(
        err,
        EngineError::Planning(PlanningError::UnprojectedCteDimension { .. })
    ));
}

//! Integration coverage for `CteBuilder`: downstream join-key projection,
//! unknown-measure rejection, and a missing propagating join path.

use chrono::Utc;
use cubeplan::adapter::SqlDialectAdapter;
use cubeplan::builder::CteBuilder;
use cubeplan::dialect::Dialect;
use cubeplan::error::{EngineError, ValidationError};
use cubeplan::filter::{DateTimeBuilder, FilterCacheManager};
use cubeplan::model::{
    AggregationType, Cube, CubeExpr, CubeRegistry, Dimension, Filter, FilterOperator, Join,
    JoinOn, JoinRelationship, Measure, SecurityContext, SemanticQuery,
};
use cubeplan::planner::{CteType, PreAggregationCte};
use cubeplan::sql::expr::table_col;
use cubeplan::sql::params::ParamBinder;

fn registry() -> CubeRegistry {
    let mut reg = CubeRegistry::new();
    reg.register(
        Cube::new("Customers", CubeExpr::raw("customers"))
            .with_dimension(Dimension::string("name", CubeExpr::column("name")))
            .with_join(Join::new(
                "Orders",
                JoinRelationship::HasMany,
                vec![JoinOn::new(CubeExpr::column("id"), CubeExpr::column("customer_id"))],
            )),
    );
    reg.register(
        Cube::new("Orders", CubeExpr::raw("orders"))
            .with_measure(Measure::count("count"))
            .with_measure(Measure::simple("revenue", AggregationType::Sum, CubeExpr::column("amount")))
            .with_dimension(Dimension::string("status", CubeExpr::column("status")))
            .with_dimension(Dimension::string("customer_id", CubeExpr::column("customer_id")))
            .with_dimension(Dimension::string("order_item_id", CubeExpr::column("order_item_id"))),
    );
    reg
}

fn cte_builder<'a>(reg: &'a CubeRegistry, adapter: &'a SqlDialectAdapter, security: &'a cubeplan::model::SecurityContext) -> CteBuilder<'a> {
    CteBuilder::new(reg, adapter, security)
}

#[test]
fn downstream_join_key_is_selected_once_and_not_double_grouped() {
    let reg = registry();
    let adapter = SqlDialectAdapter::new(Dialect::Postgres);
    let security = SecurityContext::new();
    let builder = cte_builder(&reg, &adapter, &security);
    let datetime = DateTimeBuilder::new(Utc::now());
    let mut cache = FilterCacheManager::new();
    let mut binder = ParamBinder::new();
    let query = SemanticQuery::new();

    let cte = PreAggregationCte {
        cube: "Orders".to_string(),
        cte_alias: "orders_cte".to_string(),
        anchor_cube: "Customers".to_string(),
        join_condition: table_col("Customers", "id"),
        join_keys: vec!["customer_id".to_string()],
        measures: vec!["count".to_string()],
        propagating_filters: Vec::new(),
        downstream_join_keys: vec!["customer_id".to_string(), "order_item_id".to_string()],
        cte_type: CteType::FanOutAggregate,
    };

    let built = builder.build(&cte, &query, &datetime, &mut cache, &mut binder).unwrap();
    let sql = built.query.to_sql(Dialect::Postgres);
    assert_eq!(sql.matches("\"orders\".\"customer_id\"").count(), 2);
    assert!(sql.contains("\"orders\".\"order_item_id\""));
}

#[test]
fn unknown_measure_on_the_cte_cube_is_rejected() {
    let reg = registry();
    let adapter = SqlDialectAdapter::new(Dialect::Postgres);
    let security = SecurityContext::new();
    let builder = cte_builder(&reg, &adapter, &security);
    let datetime = DateTimeBuilder::new(Utc::now());
    let mut cache = FilterCacheManager::new();
    let mut binder = ParamBinder::new();
    let query = SemanticQuery::new();

    let cte = PreAggregationCte {
        cube: "Orders".to_string(),
        cte_alias: "orders_cte".to_string(),
        anchor_cube: "Customers".to_string(),
        join_condition: table_col("Customers", "id"),
        join_keys: vec!["customer_id".to_string()],
        measures: vec!["nonexistent".to_string()],
        propagating_filters: Vec::new(),
        downstream_join_keys: Vec::new(),
        cte_type: CteType::FanOutAggregate,
    };

    let err = builder.build(&cte, &query, &datetime, &mut cache, &mut binder).unwrap_err();
    assert!(matches!(err, EngineError::Validation(ValidationError::UnknownMember { .. })));
}

#[test]
fn propagating_filter_with_no_join_path_to_the_cte_cube_is_rejected() {
    let mut reg = registry();
    reg.register(Cube::new("Campaigns", CubeExpr::raw("campaigns")).with_dimension(Dimension::string(
        "channel",
        CubeExpr::column("channel"),
    )));
    let adapter = SqlDialectAdapter::new(Dialect::Postgres);
    let security = SecurityContext::new();
    let builder = cte_builder(&reg, &adapter, &security);
    let datetime = DateTimeBuilder::new(Utc::now());
    let mut cache = FilterCacheManager::new();
    let mut binder = ParamBinder::new();
    let query = SemanticQuery::new();

    let mut cte = PreAggregationCte {
        cube: "Orders".to_string(),
        cte_alias: "orders_cte".to_string(),
        anchor_cube: "Customers".to_string(),
        join_condition: table_col("Customers", "id"),
        join_keys: vec!["customer_id".to_string()],
        measures: vec!["count".to_string()],
        propagating_filters: Vec::new(),
        downstream_join_keys: Vec::new(),
        cte_type: CteType::FanOutAggregate,
    };
    cte.propagating_filters.push(Filter::simple("Campaigns.channel", FilterOperator::Equals, vec!["email".into()]));

    let err = builder.build(&cte, &query, &datetime, &mut cache, &mut binder).unwrap_err();
    assert!(matches!(err, EngineError::Validation(ValidationError::MissingJoinPathForFilter { .. })));
}

//! Integration coverage for `QueryPlanner`'s primary-cube selection: the
//! dimension-count tiebreak, the join-degree fallback, and rejection of
//! queries whose members don't share a reachable cube.

use cubeplan::error::{EngineError, PlanningError};
use cubeplan::model::{AggregationType, Cube, CubeExpr, CubeRegistry, Dimension, Join, JoinOn, JoinRelationship, Measure, SemanticQuery};
use cubeplan::planner::QueryPlanner;

/// `Orders` requests the most dimensions and can reach both siblings, so it
/// should win over `Customers` even though `Customers` has a higher join
/// out-degree.
fn star_registry() -> CubeRegistry {
    let mut reg = CubeRegistry::new();
    reg.register(
        Cube::new("Orders", CubeExpr::raw("orders"))
            .with_measure(Measure::count("count"))
            .with_dimension(Dimension::string("status", CubeExpr::column("status")))
            .with_join(Join::new(
                "Customers",
                JoinRelationship::BelongsTo,
                vec![JoinOn::new(CubeExpr::column("customer_id"), CubeExpr::column("id"))],
            )),
    );
    reg.register(
        Cube::new("Customers", CubeExpr::raw("customers"))
            .with_dimension(Dimension::string("region", CubeExpr::column("region")))
            .with_join(Join::new(
                "Plans",
                JoinRelationship::BelongsTo,
                vec![JoinOn::new(CubeExpr::column("plan_id"), CubeExpr::column("id"))],
            )),
    );
    reg.register(Cube::new("Plans", CubeExpr::raw("plans")).with_dimension(Dimension::string("tier", CubeExpr::column("tier"))));
    reg
}

#[test]
fn most_requested_dimensions_wins_primary_cube() {
    let reg = star_registry();
    let planner = QueryPlanner::new(&reg);
    let query = SemanticQuery {
        measures: vec!["Orders.count".into()],
        dimensions: vec!["Orders.status".into(), "Customers.region".into()],
        ..Default::default()
    };
    let plan = planner.plan(&query).unwrap();
    assert_eq!(plan.primary_cube, "Orders");
}

#[test]
fn no_dimensions_falls_back_to_highest_join_degree() {
    let mut reg = CubeRegistry::new();
    reg.register(
        Cube::new("Orders", CubeExpr::raw("orders"))
            .with_measure(Measure::simple("revenue", AggregationType::Sum, CubeExpr::column("amount")))
            .with_join(Join::new(
                "Customers",
                JoinRelationship::BelongsTo,
                vec![JoinOn::new(CubeExpr::column("customer_id"), CubeExpr::column("id"))],
            )),
    );
    reg.register(
        Cube::new("Customers", CubeExpr::raw("customers"))
            .with_measure(Measure::count("count"))
            .with_join(Join::new(
                "Orders",
                JoinRelationship::HasMany,
                vec![JoinOn::new(CubeExpr::column("id"), CubeExpr::column("customer_id"))],
            ))
            .with_join(Join::new(
                "Plans",
                JoinRelationship::BelongsTo,
                vec![JoinOn::new(CubeExpr::column("plan_id"), CubeExpr::column("id"))],
            )),
    );
    reg.register(Cube::new("Plans", CubeExpr::raw("plans")));

    let planner = QueryPlanner::new(&reg);
    let query = SemanticQuery {
        measures: vec!["Orders.revenue".into(), "Customers.count".into()],
        ..Default::default()
    };
    let plan = planner.plan(&query).unwrap();
    assert_eq!(plan.primary_cube, "Customers");
}

#[test]
fn single_member_query_is_its_own_primary_cube() {
    let reg = star_registry();
    let planner = QueryPlanner::new(&reg);
    let query = SemanticQuery {
        measures: vec!["Orders.count".into()],
        ..Default::default()
    };
    let plan = planner.plan(&query).unwrap();
    assert_eq!(plan.primary_cube, "Orders");
}

#[test]
fn empty_query_is_rejected() {
    let reg = star_registry();
    let planner = QueryPlanner::new(&reg);
    let err = planner.plan(&SemanticQuery::default()).unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
}

#[test]
fn disjoint_cubes_with_no_join_path_are_rejected() {
    let mut reg = star_registry();
    reg.register(Cube::new("Islands", CubeExpr::raw("islands")).with_measure(Measure::count("count")));
    let planner = QueryPlanner::new(&reg);
    let query = SemanticQuery {
        measures: vec!["Orders.count".into(), "Islands.count".into()],
        ..Default::default()
    };
    let err = planner.plan(&query).unwrap_err();
    assert!(matches!(err, EngineError::Planning(PlanningError::UnreachableJoin(_))));
}

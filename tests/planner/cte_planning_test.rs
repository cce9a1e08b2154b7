//! Integration coverage for `QueryPlanner`'s fan-out pre-aggregation CTEs:
//! join-key derivation, propagating filters, and downstream join keys.

use cubeplan::model::{
    AggregationType, Cube, CubeExpr, CubeRegistry, Dimension, Filter, FilterOperator, Join,
    JoinOn, JoinRelationship, Measure, SemanticQuery,
};
use cubeplan::planner::QueryPlanner;

/// `Customers` (primary) `hasMany` `Orders`, and `Orders` in turn `hasMany`
/// `OrderItems` — two fan-out hops deep.
fn two_hop_fan_out_registry() -> CubeRegistry {
    let mut reg = CubeRegistry::new();
    reg.register(
        Cube::new("Customers", CubeExpr::raw("customers"))
            .with_measure(Measure::count("count"))
            .with_join(Join::new(
                "Orders",
                JoinRelationship::HasMany,
                vec![JoinOn::new(CubeExpr::column("id"), CubeExpr::column("customer_id"))],
            )),
    );
    reg.register(
        Cube::new("Orders", CubeExpr::raw("orders"))
            .with_measure(Measure::simple("revenue", AggregationType::Sum, CubeExpr::column("amount")))
            .with_dimension(Dimension::string("status", CubeExpr::column("status")))
            .with_join(Join::new(
                "OrderItems",
                JoinRelationship::HasMany,
                vec![JoinOn::new(CubeExpr::column("id"), CubeExpr::column("order_id"))],
            )),
    );
    reg.register(
        Cube::new("OrderItems", CubeExpr::raw("order_items"))
            .with_dimension(Dimension::string("sku", CubeExpr::column("sku"))),
    );
    reg
}

#[test]
fn cte_join_keys_derive_from_the_fan_out_foreign_key() {
    let reg = two_hop_fan_out_registry();
    let planner = QueryPlanner::new(&reg);
    let query = SemanticQuery {
        measures: vec!["Customers.count".into(), "Orders.revenue".into()],
        ..Default::default()
    };
    let plan = planner.plan(&query).unwrap();
    let cte = plan.cte_for_cube("Orders").unwrap();
    assert_eq!(cte.anchor_cube, "Customers");
    assert_eq!(cte.join_keys, vec!["customer_id".to_string()]);
    assert_eq!(cte.measures, vec!["revenue".to_string()]);
}

#[test]
fn own_cube_filter_on_a_fan_out_cube_propagates() {
    let reg = two_hop_fan_out_registry();
    let planner = QueryPlanner::new(&reg);
    let query = SemanticQuery {
        measures: vec!["Customers.count".into(), "Orders.revenue".into()],
        filters: vec![Filter::simple("Orders.status", FilterOperator::Equals, vec!["done".into()])],
        ..Default::default()
    };
    let plan = planner.plan(&query).unwrap();
    let cte = plan.cte_for_cube("Orders").unwrap();
    assert_eq!(cte.propagating_filters.len(), 1);
}

#[test]
fn downstream_dimension_is_reached_through_the_cte() {
    let reg = two_hop_fan_out_registry();
    let planner = QueryPlanner::new(&reg);
    let query = SemanticQuery {
        measures: vec!["Customers.count".into()],
        dimensions: vec!["OrderItems.sku".into()],
        ..Default::default()
    };
    let plan = planner.plan(&query).unwrap();
    let cte = plan.cte_for_cube("Orders").unwrap();
    assert!(cte.downstream_join_keys.contains(&"order_id".to_string()));
    assert!(!plan.is_joined_directly("OrderItems"));
}

#[test]
fn all_cubes_lists_primary_and_cte_cubes() {
    let reg = two_hop_fan_out_registry();
    let planner = QueryPlanner::new(&reg);
    let query = SemanticQuery {
        measures: vec!["Customers.count".into(), "Orders.revenue".into()],
        ..Default::default()
    };
    let plan = planner.plan(&query).unwrap();
    let mut cubes = plan.all_cubes();
    cubes.sort();
    assert_eq!(cubes, vec!["Customers", "Orders"]);
}

//! Integration coverage for `CalculatedMeasureResolver`: cross-cube template
//! refs, explicit `dependencies` overrides, and cycle/unknown-ref rejection.

use cubeplan::error::PlanningError;
use cubeplan::model::{AggregationType, Cube, CubeExpr, CubeRegistry, Measure};
use cubeplan::planner::{extract_template_refs, CalculatedMeasureResolver};

fn cross_cube_registry() -> CubeRegistry {
    let mut reg = CubeRegistry::new();
    reg.register(
        Cube::new("Orders", CubeExpr::raw("orders"))
            .with_measure(Measure::simple("revenue", AggregationType::Sum, CubeExpr::column("amount")))
            .with_measure(Measure::calculated("revenue_per_customer", "{revenue} / {Customers.count}")),
    );
    reg.register(Cube::new("Customers", CubeExpr::raw("customers")).with_measure(Measure::count("count")));
    reg
}

#[test]
fn bare_ref_normalizes_to_owner_cube() {
    let refs = extract_template_refs("{revenue} / {Customers.count}", "Orders");
    assert_eq!(refs, vec!["Orders.revenue", "Customers.count"]);
}

#[test]
fn cross_cube_dependency_resolves_in_order() {
    let reg = cross_cube_registry();
    let resolver = CalculatedMeasureResolver::new(&reg);
    let order = resolver.resolve_order(&["Orders.revenue_per_customer".to_string()]).unwrap();
    let pos = |name: &str| order.iter().position(|n| n == name).unwrap();
    assert!(pos("Orders.revenue") < pos("Orders.revenue_per_customer"));
    assert!(pos("Customers.count") < pos("Orders.revenue_per_customer"));
}

#[test]
fn explicit_dependencies_override_template_scan() {
    let mut reg = CubeRegistry::new();
    let overridden = Measure {
        dependencies: Some(vec!["Orders.revenue".to_string()]),
        ..Measure::calculated("flagged", "1 = 1")
    };
    reg.register(
        Cube::new("Orders", CubeExpr::raw("orders"))
            .with_measure(Measure::simple("revenue", AggregationType::Sum, CubeExpr::column("amount")))
            .with_measure(overridden),
    );
    let resolver = CalculatedMeasureResolver::new(&reg);
    let order = resolver.resolve_order(&["Orders.flagged".to_string()]).unwrap();
    assert_eq!(order, vec!["Orders.revenue".to_string(), "Orders.flagged".to_string()]);
}

#[test]
fn non_calculated_measures_are_emitted_with_no_dependencies() {
    let reg = cross_cube_registry();
    let resolver = CalculatedMeasureResolver::new(&reg);
    let order = resolver.resolve_order(&["Orders.revenue".to_string()]).unwrap();
    assert_eq!(order, vec!["Orders.revenue".to_string()]);
}

#[test]
fn unresolvable_cube_in_ref_is_rejected() {
    let reg = cross_cube_registry();
    let resolver = CalculatedMeasureResolver::new(&reg);
    let err = resolver.resolve_order(&["Orders.does_not_exist".to_string()]).unwrap_err();
    assert!(matches!(err, PlanningError::UnknownCalculatedMeasureRef(..)));
}

#[test]
fn three_cycle_is_reported_with_full_path() {
    let mut reg = CubeRegistry::new();
    reg.register(
        Cube::new("Orders", CubeExpr::raw("orders"))
            .with_measure(Measure::calculated("a", "{Orders.b} + 1"))
            .with_measure(Measure::calculated("b", "{Orders.c} + 1"))
            .with_measure(Measure::calculated("c", "{Orders.a} + 1")),
    );
    let resolver = CalculatedMeasureResolver::new(&reg);
    let err = resolver.resolve_order(&["Orders.a".to_string()]).unwrap_err();
    match err {
        PlanningError::CircularCalculatedMeasure(path) => {
            assert!(path.contains("Orders.a"));
            assert!(path.contains("Orders.b"));
            assert!(path.contains("Orders.c"));
        }
        other => panic!("expected circular dependency error, got {other:?}"),
    }
}

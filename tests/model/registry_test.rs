//! Integration coverage for `CubeRegistry`'s lookup surface: registration,
//! per-kind member resolution, and `split_member_ref` parsing.

use cubeplan::model::{
    split_member_ref, AggregationType, Cube, CubeExpr, CubeRegistry, Dimension, Join, JoinOn,
    JoinRelationship, Measure, MemberKind,
};

fn registry() -> CubeRegistry {
    let mut reg = CubeRegistry::new();
    reg.register(
        Cube::new("Orders", CubeExpr::raw("orders"))
            .with_measure(Measure::count("count"))
            .with_measure(Measure::simple("revenue", AggregationType::Sum, CubeExpr::column("amount")))
            .with_dimension(Dimension::string("status", CubeExpr::column("status")))
            .with_dimension(Dimension::time("createdAt", CubeExpr::column("created_at")))
            .with_segment("completed", CubeExpr::raw("status = 'completed'"))
            .with_join(Join::new(
                "Customers",
                JoinRelationship::BelongsTo,
                vec![JoinOn::new(CubeExpr::column("customer_id"), CubeExpr::column("id"))],
            )),
    );
    reg.register(
        Cube::new("Customers", CubeExpr::raw("customers"))
            .with_dimension(Dimension::string("region", CubeExpr::column("region")))
            .public(),
    );
    reg
}

#[test]
fn contains_and_cube_names_reflect_registrations() {
    let reg = registry();
    assert!(reg.contains("Orders"));
    assert!(reg.contains("Customers"));
    assert!(!reg.contains("Nope"));
    let mut names: Vec<&str> = reg.cube_names().collect();
    names.sort();
    assert_eq!(names, vec!["Customers", "Orders"]);
    assert_eq!(reg.cubes().count(), 2);
}

#[test]
fn measure_and_dimension_lookup_resolve_by_cube_and_name() {
    let reg = registry();
    assert!(reg.measure("Orders", "revenue").is_some());
    assert!(reg.measure("Orders", "missing").is_none());
    assert!(reg.dimension("Orders", "status").is_some());
    assert!(reg.dimension("Customers", "status").is_none());
}

#[test]
fn resolve_member_distinguishes_measure_dimension_and_segment() {
    let reg = registry();
    assert!(matches!(reg.resolve_member("Orders.count"), Some(MemberKind::Measure(_))));
    assert!(matches!(reg.resolve_member("Orders.status"), Some(MemberKind::Dimension(_))));
    assert!(matches!(reg.resolve_member("Orders.completed"), Some(MemberKind::Segment(_))));
    assert!(reg.resolve_member("Orders.nonexistent").is_none());
    assert!(reg.resolve_member("Nope.count").is_none());
}

#[test]
fn split_member_ref_requires_a_dot() {
    let r = split_member_ref("Orders.revenue").unwrap();
    assert_eq!(r.cube, "Orders");
    assert_eq!(r.member, "revenue");
    assert!(split_member_ref("revenue").is_none());
}

#[test]
fn public_flag_is_per_cube() {
    let reg = registry();
    assert!(!reg.cube("Orders").unwrap().is_public);
    assert!(reg.cube("Customers").unwrap().is_public);
}

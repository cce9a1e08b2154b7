//! Integration coverage for `JoinPathResolver`: shortest-path resolution,
//! exclusion sets, and preference-weighted tie-breaking across a star schema.

use std::collections::HashSet;

use cubeplan::model::{Cube, CubeExpr, CubeRegistry, Join, JoinOn, JoinRelationship};
use cubeplan::planner::JoinPathResolver;

/// A star with two equally-short routes from `Orders` to `Regions`: directly
/// through `Customers`, or through `Warehouses`.
fn diamond_registry() -> CubeRegistry {
    let mut reg = CubeRegistry::new();
    reg.register(
        Cube::new("Orders", CubeExpr::raw("orders"))
            .with_join(Join::new(
                "Customers",
                JoinRelationship::BelongsTo,
                vec![JoinOn::new(CubeExpr::column("customer_id"), CubeExpr::column("id"))],
            ))
            .with_join(Join::new(
                "Warehouses",
                JoinRelationship::BelongsTo,
                vec![JoinOn::new(CubeExpr::column("warehouse_id"), CubeExpr::column("id"))],
            )),
    );
    reg.register(
        Cube::new("Customers", CubeExpr::raw("customers")).with_join(Join::new(
            "Regions",
            JoinRelationship::BelongsTo,
            vec![JoinOn::new(CubeExpr::column("region_id"), CubeExpr::column("id"))],
        )),
    );
    reg.register(
        Cube::new("Warehouses", CubeExpr::raw("warehouses")).with_join(Join::new(
            "Regions",
            JoinRelationship::BelongsTo,
            vec![JoinOn::new(CubeExpr::column("region_id"), CubeExpr::column("id"))],
        )),
    );
    reg.register(Cube::new("Regions", CubeExpr::raw("regions")));
    reg
}

#[test]
fn no_path_when_every_neighbor_is_excluded() {
    let reg = diamond_registry();
    let resolver = JoinPathResolver::new(&reg);
    let mut excluded = HashSet::new();
    excluded.insert("Customers".to_string());
    excluded.insert("Warehouses".to_string());
    assert!(resolver.find_path("Orders", "Regions", &excluded).is_none());
}

#[test]
fn preferring_a_cube_picks_the_path_through_it() {
    let reg = diamond_registry();
    let resolver = JoinPathResolver::new(&reg);
    let mut preferred = HashSet::new();
    preferred.insert("Warehouses".to_string());
    let path = resolver
        .find_path_preferring("Orders", "Regions", &HashSet::new(), &preferred, &HashSet::new())
        .unwrap();
    assert_eq!(path[0].to_cube, "Warehouses");
}

#[test]
fn reusing_an_already_processed_cube_breaks_a_tie() {
    let reg = diamond_registry();
    let resolver = JoinPathResolver::new(&reg);
    let mut already_processed = HashSet::new();
    already_processed.insert("Customers".to_string());
    let path = resolver
        .find_path_preferring(
            "Orders",
            "Regions",
            &HashSet::new(),
            &HashSet::new(),
            &already_processed,
        )
        .unwrap();
    assert_eq!(path[0].to_cube, "Customers");
}

#[test]
fn self_path_is_empty() {
    let reg = diamond_registry();
    let resolver = JoinPathResolver::new(&reg);
    let path = resolver.find_path("Orders", "Orders", &HashSet::new()).unwrap();
    assert!(path.is_empty());
}

#[test]
fn unreachable_cube_yields_none() {
    let mut reg = diamond_registry();
    reg.register(Cube::new("Orphan", CubeExpr::raw("orphan")));
    let resolver = JoinPathResolver::new(&reg);
    assert!(resolver.find_path("Orders", "Orphan", &HashSet::new()).is_none());
}

#[test]
fn can_reach_all_fails_if_any_single_target_is_unreachable() {
    let mut reg = diamond_registry();
    reg.register(Cube::new("Orphan", CubeExpr::raw("orphan")));
    let resolver = JoinPathResolver::new(&reg);
    assert!(!resolver.can_reach_all("Orders", &["Regions", "Orphan"], &HashSet::new()));
}

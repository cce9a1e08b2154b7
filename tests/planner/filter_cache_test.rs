//! Integration coverage for `FilterCacheManager`'s dedup key: member and
//! operator discrimination, absolute vs relative date ranges, and the
//! `len`/`is_empty` counters.

use cubeplan::model::{DateRange, FilterOperator};
use cubeplan::sql::expr::{col, lit_str, ExprExt};

#[test]
fn distinct_members_do_not_collide() {
    let mut cache = cubeplan::filter::FilterCacheManager::new();
    cache.insert("Orders.status", FilterOperator::Equals, &["done".into()], None, col("a"));
    cache.insert("Customers.status", FilterOperator::Equals, &["done".into()], None, col("b"));
    assert_eq!(cache.len(), 2);
    assert_eq!(cache.get("Orders.status", FilterOperator::Equals, &["done".into()], None), Some(col("a")));
    assert_eq!(cache.get("Customers.status", FilterOperator::Equals, &["done".into()], None), Some(col("b")));
}

#[test]
fn distinct_operators_on_the_same_member_do_not_collide() {
    let mut cache = cubeplan::filter::FilterCacheManager::new();
    let eq = col("status").eq(lit_str("done"));
    cache.insert("Orders.status", FilterOperator::Equals, &["done".into()], None, eq.clone());
    assert!(cache
        .get("Orders.status", FilterOperator::NotEquals, &["done".into()], None)
        .is_none());
    assert_eq!(cache.get("Orders.status", FilterOperator::Equals, &["done".into()], None), Some(eq));
}

#[test]
fn absolute_date_ranges_differ_by_bounds() {
    let mut cache = cubeplan::filter::FilterCacheManager::new();
    let range_a = DateRange::Absolute { from: "2026-01-01".into(), to: "2026-01-31".into() };
    let range_b = DateRange::Absolute { from: "2026-02-01".into(), to: "2026-02-28".into() };
    cache.insert("Orders.createdAt", FilterOperator::InDateRange, &[], Some(&range_a), col("created_at"));
    assert!(cache
        .get("Orders.createdAt", FilterOperator::InDateRange, &[], Some(&range_b))
        .is_none());
    assert!(cache
        .get("Orders.createdAt", FilterOperator::InDateRange, &[], Some(&range_a))
        .is_some());
}

#[test]
fn empty_cache_reports_zero_len() {
    let cache = cubeplan::filter::FilterCacheManager::new();
    assert!(cache.is_empty());
    assert_eq!(cache.len(), 0);
}

#[test]
fn overwriting_the_same_key_does_not_grow_len() {
    let mut cache = cubeplan::filter::FilterCacheManager::new();
    cache.insert("Orders.status", FilterOperator::Equals, &["done".into()], None, col("a"));
    cache.insert("Orders.status", FilterOperator::Equals, &["done".into()], None, col("b"));
    assert_eq!(cache.len(), 1);
    assert_eq!(cache.get("Orders.status", FilterOperator::Equals, &["done".into()], None), Some(col("b")));
}

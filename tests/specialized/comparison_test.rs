//! Integration coverage for period comparison: expansion into independent
//! sub-queries, row tagging (including day-index computation), and merge
//! ordering across more than two periods.

use chrono::Utc;
use cubeplan::executor::DataRow;
use cubeplan::filter::DateTimeBuilder;
use cubeplan::model::query::{DateRange, SemanticQuery, TimeDimensionRequest};
use cubeplan::model::types::Granularity;
use cubeplan::specialized::comparison::{
    expand_period_comparisons, merge_period_results, tag_period_rows,
};
use serde_json::Value;

fn query_with_absolute_comparison() -> SemanticQuery {
    SemanticQuery {
        measures: vec!["Orders.count".into()],
        time_dimensions: vec![TimeDimensionRequest {
            dimension: "Orders.createdAt".into(),
            granularity: Some(Granularity::Day),
            date_range: None,
            compare_date_range: Some(vec![
                DateRange::Absolute { from: "2026-01-01".into(), to: "2026-01-31".into() },
                DateRange::Absolute { from: "2025-12-01".into(), to: "2025-12-31".into() },
            ]),
        }],
        ..Default::default()
    }
}

#[test]
fn absolute_ranges_expand_with_bounds_as_the_label() {
    let expansions = expand_period_comparisons(&query_with_absolute_comparison());
    assert_eq!(expansions.len(), 2);
    assert_eq!(expansions[0].label, "2026-01-01..2026-01-31");
    assert_eq!(expansions[1].label, "2025-12-01..2025-12-31");
}

#[test]
fn single_period_comparison_still_expands_to_one_sub_query() {
    let query = SemanticQuery {
        measures: vec!["Orders.count".into()],
        time_dimensions: vec![TimeDimensionRequest {
            dimension: "Orders.createdAt".into(),
            granularity: None,
            date_range: None,
            compare_date_range: Some(vec![DateRange::Relative("today".into())]),
        }],
        ..Default::default()
    };
    let expansions = expand_period_comparisons(&query);
    assert_eq!(expansions.len(), 1);
    assert_eq!(expansions[0].granularity, Granularity::Day);
}

#[test]
fn day_index_is_omitted_when_the_time_dimension_value_is_unparseable() {
    let expansions = expand_period_comparisons(&query_with_absolute_comparison());
    let datetime = DateTimeBuilder::new(Utc::now());
    let mut rows = vec![DataRow::from([(
        "Orders.createdAt".to_string(),
        Value::String("not-a-date".to_string()),
    )])];
    tag_period_rows(&mut rows, &expansions[0], &datetime).unwrap();
    assert!(rows[0].contains_key("__period"));
    assert!(!rows[0].contains_key("__periodDayIndex"));
}

#[test]
fn day_index_advances_with_distance_from_period_start() {
    let expansions = expand_period_comparisons(&query_with_absolute_comparison());
    let datetime = DateTimeBuilder::new(Utc::now());
    let mut rows = vec![DataRow::from([(
        "Orders.createdAt".to_string(),
        Value::String("2026-01-03".to_string()),
    )])];
    tag_period_rows(&mut rows, &expansions[0], &datetime).unwrap();
    assert_eq!(rows[0].get("__periodDayIndex").unwrap(), &Value::Number(2.into()));
}

#[test]
fn merge_preserves_insertion_order_within_the_same_period_and_time() {
    let rows: Vec<Vec<DataRow>> = (0..3)
        .map(|period_index| {
            vec![DataRow::from([
                ("Orders.createdAt".to_string(), Value::String("2026-01-01".to_string())),
                ("__periodIndex".to_string(), Value::Number((2 - period_index).into())),
            ])]
        })
        .collect();
    let merged = merge_period_results(rows, "Orders.createdAt");
    let indices: Vec<u64> = merged
        .iter()
        .map(|r| r.get("__periodIndex").unwrap().as_u64().unwrap())
        .collect();
    assert_eq!(indices, vec![0, 1, 2]);
}

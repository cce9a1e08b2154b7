//! Gap-filling: for time-series results, emit a zero-valued row for every
//! period in `[from, to)` at the query's granularity that the database
//! returned no data for.

use chrono::{Months, NaiveDateTime};
use serde_json::Value;

use crate::model::types::Granularity;

use super::result::DataRow;

/// Fill missing periods of `rows` between `from` and `to` (exclusive) at
/// `granularity`, zeroing every measure in `measure_names` on the inserted
/// rows. Existing rows are left untouched; the result is re-sorted by
/// `time_dimension`.
pub fn fill_gaps(
    mut rows: Vec<DataRow>,
    time_dimension: &str,
    measure_names: &[String],
    granularity: Granularity,
    from: NaiveDateTime,
    to: NaiveDateTime,
) -> Vec<DataRow> {
    let existing: std::collections::HashSet<String> = rows
        .iter()
        .filter_map(|r| r.get(time_dimension))
        .filter_map(Value::as_str)
        .map(str::to_string)
        .collect();

    let mut cursor = from;
    while cursor < to {
        let key = cursor.format("%Y-%m-%dT%H:%M:%S").to_string();
        if !existing.contains(&key) {
            let mut row = DataRow::new();
            row.insert(time_dimension.to_string(), Value::String(key));
            for measure in measure_names {
                row.insert(measure.clone(), Value::Number(0.into()));
            }
            rows.push(row);
        }
        cursor = step(cursor, granularity);
    }

    rows.sort_by(|a, b| {
        let a_time = a.get(time_dimension).and_then(Value::as_str).unwrap_or("");
        let b_time = b.get(time_dimension).and_then(Value::as_str).unwrap_or("");
        a_time.cmp(b_time)
    });
    rows
}

fn step(instant: NaiveDateTime, granularity: Granularity) -> NaiveDateTime {
    match granularity {
        Granularity::Second => instant + chrono::Duration::seconds(1),
        Granularity::Minute => instant + chrono::Duration::minutes(1),
        Granularity::Hour => instant + chrono::Duration::hours(1),
        Granularity::Day => instant + chrono::Duration::days(1),
        Granularity::Week => instant + chrono::Duration::days(7),
        Granularity::Month => instant
            .checked_add_months(Months::new(1))
            .unwrap_or(instant),
        Granularity::Quarter => instant
            .checked_add_months(Months::new(3))
            .unwrap_or(instant),
        Granularity::Year => instant
            .checked_add_months(Months::new(12))
            .unwrap_or(instant),
    }
}

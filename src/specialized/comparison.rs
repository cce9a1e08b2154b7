//! Period comparison: splits a `SemanticQuery` whose time dimension carries
//! a `compareDateRange` into one independent sub-query per period, and tags
//! the merged result rows with `__period`/`__periodIndex`/`__periodDayIndex`
//! once every sub-query has returned.

use chrono::NaiveDate;
use serde_json::Value;

use crate::executor::result::DataRow;
use crate::filter::DateTimeBuilder;
use crate::model::query::{DateRange, SemanticQuery};
use crate::model::types::Granularity;

/// One period of a comparison query: the sub-query to run and the label to
/// tag its rows with once results come back.
#[derive(Debug, Clone)]
pub struct PeriodExpansion {
    pub index: usize,
    pub label: String,
    pub time_dimension: String,
    pub granularity: Granularity,
    pub date_range: DateRange,
    pub query: SemanticQuery,
}

/// Split `query` into one sub-query per entry of its first time dimension's
/// `compareDateRange`, with that dimension's `dateRange` substituted and
/// `compareDateRange` cleared on each. Returns an empty vec if no time
/// dimension declares one.
pub fn expand_period_comparisons(query: &SemanticQuery) -> Vec<PeriodExpansion> {
    let Some((td_index, ranges)) = query
        .time_dimensions
        .iter()
        .enumerate()
        .find_map(|(i, td)| td.compare_date_range.as_ref().map(|r| (i, r.clone())))
    else {
        return Vec::new();
    };

    let granularity = query.time_dimensions[td_index]
        .granularity
        .unwrap_or(Granularity::Day);
    let dimension = query.time_dimensions[td_index].dimension.clone();

    ranges
        .into_iter()
        .enumerate()
        .map(|(index, range)| {
            let mut sub_query = query.clone();
            sub_query.time_dimensions[td_index].date_range = Some(range.clone());
            sub_query.time_dimensions[td_index].compare_date_range = None;
            PeriodExpansion {
                index,
                label: period_label(&range),
                time_dimension: dimension.clone(),
                granularity,
                date_range: range,
                query: sub_query,
            }
        })
        .collect()
}

fn period_label(range: &DateRange) -> String {
    match range {
        DateRange::Absolute { from, to } => format!("{from}..{to}"),
        DateRange::Relative(expr) => expr.clone(),
    }
}

/// Tag every row of one period's result rows with `__period`, `__periodIndex`,
/// and `__periodDayIndex`. `__periodDayIndex` is omitted when the row's time
/// dimension value cannot be parsed as a date (e.g. the dimension was not
/// projected).
pub fn tag_period_rows(
    rows: &mut [DataRow],
    expansion: &PeriodExpansion,
    datetime: &DateTimeBuilder,
) -> Result<(), crate::error::ValidationError> {
    let (period_start, _) = datetime.resolve(&expansion.date_range)?;
    let period_start_date = period_start.date();

    for row in rows.iter_mut() {
        row.insert("__period".to_string(), Value::String(expansion.label.clone()));
        row.insert(
            "__periodIndex".to_string(),
            Value::Number(expansion.index.into()),
        );
        if let Some(day_index) = row
            .get(&expansion.time_dimension)
            .and_then(Value::as_str)
            .and_then(parse_date)
            .map(|day| datetime.day_index(period_start_date, day, expansion.granularity))
        {
            row.insert("__periodDayIndex".to_string(), Value::Number(day_index.into()));
        }
    }
    Ok(())
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .or_else(|_| s.split('T').next().unwrap_or(s).parse::<NaiveDate>())
        .ok()
}

/// Merge already-tagged per-period result sets, sorted by `(periodIndex,
/// timeDimension)` regardless of the order sub-queries completed in.
pub fn merge_period_results(mut periods: Vec<Vec<DataRow>>, time_dimension: &str) -> Vec<DataRow> {
    let mut merged: Vec<DataRow> = periods.drain(..).flatten().collect();
    merged.sort_by(|a, b| {
        let a_idx = a.get("__periodIndex").and_then(Value::as_u64).unwrap_or(0);
        let b_idx = b.get("__periodIndex").and_then(Value::as_u64).unwrap_or(0);
        a_idx.cmp(&b_idx).then_with(|| {
            let a_time = a.get(time_dimension).and_then(Value::as_str).unwrap_or("");
            let b_time = b.get(time_dimension).and_then(Value::as_str).unwrap_or("");
            a_time.cmp(b_time)
        })
    });
    merged
}

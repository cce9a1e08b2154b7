//! `DateTimeBuilder`: resolves a `DateRange` (absolute or relative) to a
//! concrete `[from, to)` timestamp pair, and builds the truncation/interval
//! expressions `FilterBuilder` and the specialized query builders need for
//! date-range filters and period-over-period comparison.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Utc};

use crate::adapter::DatabaseAdapter;
use crate::error::ValidationError;
use crate::model::query::DateRange;
use crate::model::types::Granularity;
use crate::sql::expr::Expr;

/// Resolves relative and absolute date ranges against a reference instant.
///
/// The reference instant is threaded in explicitly (rather than read from
/// the system clock inside each call) so that a single query touching
/// several date ranges — e.g. a period comparison splitting `dateRange` and
/// `compareDateRange` into sibling sub-queries — resolves every range
/// against the same "now".
pub struct DateTimeBuilder {
    now: DateTime<Utc>,
}

impl DateTimeBuilder {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self { now }
    }

    /// Build a `DateTimeBuilder` pinned to the current instant.
    pub fn now() -> Self {
        Self::new(Utc::now())
    }

    pub fn reference_instant(&self) -> DateTime<Utc> {
        self.now
    }

    /// Resolve a `DateRange` to an inclusive-start, exclusive-end pair of
    /// naive timestamps (the engine deals in whatever timezone the
    /// underlying columns are stored in; tenant-level timezone handling is
    /// the embedding application's responsibility per the adapter's
    /// `convert_time_dimension_result`).
    pub fn resolve(&self, range: &DateRange) -> Result<(NaiveDateTime, NaiveDateTime), ValidationError> {
        match range {
            DateRange::Absolute { from, to } => {
                let from = parse_boundary(from, false)?;
                let to = parse_boundary(to, true)?;
                Ok((from, to))
            }
            DateRange::Relative(expr) => self.resolve_relative(expr),
        }
    }

    fn resolve_relative(&self, expr: &str) -> Result<(NaiveDateTime, NaiveDateTime), ValidationError> {
        let today = self.now.date_naive();
        let start_of_today = today.and_time(NaiveTime::MIN);
        let tomorrow = start_of_today + Duration::days(1);

        let normalized = expr.trim().to_lowercase();
        let tokens: Vec<&str> = normalized.split_whitespace().collect();

        let range = match tokens.as_slice() {
            ["today"] => (start_of_today, tomorrow),
            ["yesterday"] => (start_of_today - Duration::days(1), start_of_today),
            ["this", "week"] => (start_of_week(today), tomorrow),
            ["last", "week"] => {
                let this_week = start_of_week(today);
                (this_week - Duration::days(7), this_week)
            }
            ["this", "month"] => (start_of_month(today), tomorrow),
            ["last", "month"] => {
                let first_of_this_month =
                    NaiveDate::from_ymd_opt(today.year(), today.month(), 1).expect("valid month boundary");
                let last_day_of_prev_month = first_of_this_month.pred_opt().expect("not year 1");
                (
                    start_of_month(last_day_of_prev_month),
                    first_of_this_month.and_time(NaiveTime::MIN),
                )
            }
            ["this", "quarter"] => (start_of_quarter(today), tomorrow),
            ["this", "year"] => (start_of_year(today), tomorrow),
            ["last", "year"] => {
                let this_year = start_of_year(today);
                let prev_year_start =
                    NaiveDate::from_ymd_opt(today.year() - 1, 1, 1).expect("valid year boundary");
                (prev_year_start.and_time(NaiveTime::MIN), this_year)
            }
            ["last", n, unit] => {
                let n: i64 = n
                    .parse()
                    .map_err(|_| ValidationError::InvalidDateRange(expr.to_string()))?;
                let span = relative_span(n, unit)
                    .ok_or_else(|| ValidationError::InvalidDateRange(expr.to_string()))?;
                (tomorrow - span, tomorrow)
            }
            _ => return Err(ValidationError::InvalidDateRange(expr.to_string())),
        };

        Ok(range)
    }

    /// Truncate `expr` to `granularity` via the adapter.
    pub fn truncate(&self, adapter: &dyn DatabaseAdapter, granularity: Granularity, expr: Expr) -> Expr {
        adapter.build_time_dimension(granularity, expr)
    }

    /// `expr + iso_duration` via the adapter.
    pub fn add_duration(
        &self,
        adapter: &dyn DatabaseAdapter,
        expr: Expr,
        iso_duration: &str,
    ) -> Result<Expr, ValidationError> {
        adapter.build_date_add_interval(expr, iso_duration)
    }

    /// Whole `granularity` units between `a` and `b` (`b - a`) via the
    /// adapter, used to align comparison-query periods and compute
    /// retention period indices.
    pub fn period_diff(
        &self,
        adapter: &dyn DatabaseAdapter,
        a: Expr,
        b: Expr,
        granularity: Granularity,
    ) -> Expr {
        adapter.build_date_diff_periods(a, b, granularity)
    }

    /// Day-of-period index for `__periodDayIndex` tagging in period
    /// comparisons: how many whole `granularity` units `day` lies past
    /// `period_start`.
    pub fn day_index(&self, period_start: NaiveDate, day: NaiveDate, granularity: Granularity) -> i64 {
        match granularity {
            Granularity::Year => i64::from(day.ordinal()) - i64::from(period_start.ordinal()),
            Granularity::Month => i64::from(day.day()) - i64::from(period_start.day()),
            Granularity::Quarter | Granularity::Week | Granularity::Day => {
                (day - period_start).num_days()
            }
            Granularity::Hour | Granularity::Minute | Granularity::Second => 0,
        }
    }
}

fn relative_span(n: i64, unit: &str) -> Option<Duration> {
    let singular = unit.strip_suffix('s').unwrap_or(unit);
    match singular {
        "day" => Some(Duration::days(n)),
        "week" => Some(Duration::days(n * 7)),
        "month" => Some(Duration::days(n * 30)),
        "quarter" => Some(Duration::days(n * 91)),
        "year" => Some(Duration::days(n * 365)),
        "hour" => Some(Duration::hours(n)),
        "minute" => Some(Duration::minutes(n)),
        _ => None,
    }
}

fn start_of_week(day: NaiveDate) -> NaiveDateTime {
    let back = day.weekday().num_days_from_monday();
    (day - Duration::days(back as i64)).and_time(NaiveTime::MIN)
}

fn start_of_month(day: NaiveDate) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(day.year(), day.month(), 1)
        .expect("valid month boundary")
        .and_time(NaiveTime::MIN)
}

fn start_of_quarter(day: NaiveDate) -> NaiveDateTime {
    let quarter_month = ((day.month0() / 3) * 3) + 1;
    NaiveDate::from_ymd_opt(day.year(), quarter_month, 1)
        .expect("valid quarter boundary")
        .and_time(NaiveTime::MIN)
}

fn start_of_year(day: NaiveDate) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(day.year(), 1, 1)
        .expect("valid year boundary")
        .and_time(NaiveTime::MIN)
}

/// Parse an absolute boundary (`"2024-01-01"` or `"2024-01-01 12:00:00"`);
/// a bare date used as a range end is treated as the start of the following
/// day so `["2024-01-01", "2024-01-01"]` still covers the whole day.
fn parse_boundary(s: &str, is_end: bool) -> Result<NaiveDateTime, ValidationError> {
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Ok(dt);
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
        return Ok(dt);
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        let at_midnight = date.and_time(NaiveTime::MIN);
        return Ok(if is_end {
            at_midnight + Duration::days(1)
        } else {
            at_midnight
        });
    }
    Err(ValidationError::InvalidDateRange(s.to_string()))
}

//! ISO-8601 duration parsing for `timeToConvert`, window frames expressed as
//! durations, and `DatabaseAdapter::build_date_add_interval`.

use crate::error::ValidationError;

/// A parsed `PnYnMnDTnHnMnS` duration, calendar fields kept separate from
/// fixed-length fields since "a month" has no constant number of seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IsoDuration {
    pub years: i64,
    pub months: i64,
    pub weeks: i64,
    pub days: i64,
    pub hours: i64,
    pub minutes: i64,
    pub seconds: i64,
}

impl IsoDuration {
    /// Calendar months, combining `years`/`months` (for `DATE_ADD`-style
    /// month-granularity addition).
    pub fn total_months(&self) -> i64 {
        self.years * 12 + self.months
    }

    /// Fixed-length days, combining `weeks`/`days`.
    pub fn total_days(&self) -> i64 {
        self.weeks * 7 + self.days
    }

    /// Fixed-length seconds, combining `hours`/`minutes`/`seconds`.
    pub fn total_seconds(&self) -> i64 {
        self.hours * 3600 + self.minutes * 60 + self.seconds
    }

    pub fn is_zero(&self) -> bool {
        *self == IsoDuration::default()
    }
}

/// Parse an ISO-8601 duration string (`P7D`, `P1Y2M`, `PT1H30M`, `P1DT2H`).
///
/// Supports the designators `Y M W D T H M S`; fractional values are
/// rejected (the engine only ever needs whole-unit offsets).
pub fn parse_iso8601_duration(input: &str) -> Result<IsoDuration, ValidationError> {
    let bytes = input.as_bytes();
    if bytes.first() != Some(&b'P') {
        return Err(ValidationError::MalformedDuration(input.to_string()));
    }

    let mut duration = IsoDuration::default();
    let mut rest = &input[1..];
    let mut in_time_part = false;
    let mut saw_any_designator = false;

    while !rest.is_empty() {
        if let Some(stripped) = rest.strip_prefix('T') {
            in_time_part = true;
            rest = stripped;
            continue;
        }

        let digit_end = rest
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| ValidationError::MalformedDuration(input.to_string()))?;
        if digit_end == 0 {
            return Err(ValidationError::MalformedDuration(input.to_string()));
        }
        let amount: i64 = rest[..digit_end]
            .parse()
            .map_err(|_| ValidationError::MalformedDuration(input.to_string()))?;

        let designator = rest[digit_end..]
            .chars()
            .next()
            .ok_or_else(|| ValidationError::MalformedDuration(input.to_string()))?;
        rest = &rest[digit_end + designator.len_utf8()..];
        saw_any_designator = true;

        match (in_time_part, designator) {
            (false, 'Y') => duration.years += amount,
            (false, 'M') => duration.months += amount,
            (false, 'W') => duration.weeks += amount,
            (false, 'D') => duration.days += amount,
            (true, 'H') => duration.hours += amount,
            (true, 'M') => duration.minutes += amount,
            (true, 'S') => duration.seconds += amount,
            _ => return Err(ValidationError::MalformedDuration(input.to_string())),
        }
    }

    if !saw_any_designator {
        return Err(ValidationError::MalformedDuration(input.to_string()));
    }

    Ok(duration)
}

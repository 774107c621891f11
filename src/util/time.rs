//! Time parsing and storage conversion utilities.
//!
//! Timestamps are stored as epoch milliseconds so range comparisons and rank
//! scores are plain integer arithmetic on both the SQL and in-memory paths.

use crate::error::{Result, SearchError};
use chrono::{DateTime, NaiveDate, TimeDelta, TimeZone, Utc};

/// Convert a timestamp into its stored form (epoch milliseconds).
#[must_use]
pub fn to_millis(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

/// Convert a stored epoch-milliseconds value back into a timestamp.
///
/// Out-of-range values clamp to the Unix epoch rather than failing a read.
#[must_use]
pub fn from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .unwrap_or(DateTime::UNIX_EPOCH)
}

/// Parse a search bound timestamp.
///
/// Supports:
/// - RFC3339: `2025-01-15T12:00:00Z`, `2025-01-15T12:00:00.250+02:00`
/// - Simple date: `2025-01-15` (midnight UTC)
/// - Relative duration into the past: `-30m`, `-2h`, `-7d`, `-1w`
///
/// # Errors
///
/// Returns `InvalidParameter` naming `field_name` if the value is not in one
/// of the supported forms or a lookback reaches past the representable range.
pub fn parse_search_timestamp(s: &str, field_name: &str) -> Result<DateTime<Utc>> {
    let s = s.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        let naive_dt = date.and_hms_opt(0, 0, 0).ok_or_else(|| {
            SearchError::invalid_parameter(field_name, "date out of range")
        })?;
        return Ok(Utc.from_utc_datetime(&naive_dt));
    }

    if let Some((amount, unit)) = parse_lookback(s) {
        return lookback_delta(amount, unit)
            .and_then(|delta| Utc::now().checked_sub_signed(delta))
            .ok_or_else(|| SearchError::invalid_parameter(field_name, "lookback out of range"));
    }

    Err(SearchError::invalid_parameter(
        field_name,
        "invalid time format (try: 2025-01-15, 2025-01-15T12:00:00Z, -2h, -7d)",
    ))
}

/// Split a `-<n><unit>` lookback (units: m, h, d, w).
fn parse_lookback(s: &str) -> Option<(i64, char)> {
    let rest = s.strip_prefix('-')?;
    let unit = rest.chars().last()?;
    if !matches!(unit, 'm' | 'h' | 'd' | 'w') {
        return None;
    }
    let amount = rest[..rest.len() - unit.len_utf8()].parse::<i64>().ok()?;
    (amount >= 0).then_some((amount, unit))
}

fn lookback_delta(amount: i64, unit: char) -> Option<TimeDelta> {
    match unit {
        'm' => TimeDelta::try_minutes(amount),
        'h' => TimeDelta::try_hours(amount),
        'd' => TimeDelta::try_days(amount),
        'w' => TimeDelta::try_weeks(amount),
        _ => None,
    }
}

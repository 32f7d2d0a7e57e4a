//! # Temporal Types
//!
//! Two kinds of time flow through the engine:
//!
//! - [`Timestamp`] — a UTC instant stamped on cases, claims, and events.
//! - [`CalculationDate`] — the calendar date a rule is evaluated "as of".
//!   Rule versions are selected by it and rules may reference the dates
//!   derived from it (`$calculation_date`, `$january_first`,
//!   `$prev_january_first`, `$year`).
//!
//! Calculation dates are plain calendar dates without a time zone. Rule
//! texts express them as `YYYY-MM-DD`; RFC 3339 strings are accepted and
//! truncated to their date part.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ValueError;
use crate::value::Value;

/// A UTC timestamp.
///
/// Serializes to ISO 8601 with a `Z` suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Create a timestamp representing the current UTC time.
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Create a timestamp from a `chrono::DateTime<Utc>`.
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Access the underlying `chrono::DateTime<Utc>`.
    pub fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%dT%H:%M:%SZ"))
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }
}

/// The calendar date an evaluation is performed "as of".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CalculationDate(NaiveDate);

impl CalculationDate {
    /// Wrap an existing calendar date.
    pub fn from_naive(date: NaiveDate) -> Self {
        Self(date)
    }

    /// Today's date in UTC.
    pub fn today() -> Self {
        Self(Utc::now().date_naive())
    }

    /// Parse `YYYY-MM-DD`, or an RFC 3339 timestamp truncated to its date.
    pub fn parse(input: &str) -> Result<Self, ValueError> {
        let trimmed = input.trim();
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
            return Ok(Self(date));
        }
        if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
            return Ok(Self(dt.with_timezone(&Utc).date_naive()));
        }
        Err(ValueError::InvalidDate {
            value: input.to_string(),
        })
    }

    /// Interpret a rule value as a date. Only strings are accepted.
    pub fn from_value(value: &Value) -> Result<Self, ValueError> {
        match value {
            Value::String(s) => Self::parse(s),
            other => Err(ValueError::NotADate {
                type_name: other.type_name(),
                value: other.to_string(),
            }),
        }
    }

    /// Access the underlying `chrono::NaiveDate`.
    pub fn as_naive(&self) -> &NaiveDate {
        &self.0
    }

    /// The calendar year.
    pub fn year(&self) -> i32 {
        self.0.year()
    }

    /// January 1st of the same year.
    pub fn january_first(&self) -> Self {
        Self(NaiveDate::from_yo_opt(self.0.year(), 1).unwrap_or(self.0))
    }

    /// January 1st of the previous year.
    pub fn prev_january_first(&self) -> Self {
        Self(NaiveDate::from_yo_opt(self.0.year() - 1, 1).unwrap_or(self.0))
    }

    /// Whole days from `earlier` to `self` (negative if `earlier` is later).
    pub fn days_since(&self, earlier: &CalculationDate) -> i64 {
        (self.0 - earlier.0).num_days()
    }

    /// Calendar-month difference, ignoring the day of month.
    pub fn months_since(&self, earlier: &CalculationDate) -> i64 {
        let years = i64::from(self.0.year() - earlier.0.year());
        let months = i64::from(self.0.month()) - i64::from(earlier.0.month());
        years * 12 + months
    }

    /// Completed years from `earlier` to `self` (an age computation).
    pub fn years_since(&self, earlier: &CalculationDate) -> i64 {
        let mut years = i64::from(self.0.year() - earlier.0.year());
        if (self.0.month(), self.0.day()) < (earlier.0.month(), earlier.0.day()) {
            years -= 1;
        }
        years
    }

    /// Render as a rule value (`YYYY-MM-DD` string).
    pub fn to_value(&self) -> Value {
        Value::String(self.to_string())
    }
}

impl std::fmt::Display for CalculationDate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d"))
    }
}

impl std::str::FromStr for CalculationDate {
    type Err = ValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for CalculationDate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for CalculationDate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> CalculationDate {
        CalculationDate::parse(s).unwrap()
    }

    #[test]
    fn parses_plain_and_rfc3339_dates() {
        assert_eq!(date("2025-03-15").to_string(), "2025-03-15");
        assert_eq!(date("2025-03-15T23:10:00Z").to_string(), "2025-03-15");
    }

    #[test]
    fn rejects_garbage() {
        let err = CalculationDate::parse("15/03/2025").unwrap_err();
        assert!(matches!(err, ValueError::InvalidDate { .. }));
    }

    #[test]
    fn derived_dates() {
        let d = date("2025-03-15");
        assert_eq!(d.january_first().to_string(), "2025-01-01");
        assert_eq!(d.prev_january_first().to_string(), "2024-01-01");
        assert_eq!(d.year(), 2025);
    }

    #[test]
    fn years_since_counts_completed_years() {
        let birth = date("2000-06-10");
        assert_eq!(date("2025-06-09").years_since(&birth), 24);
        assert_eq!(date("2025-06-10").years_since(&birth), 25);
    }

    #[test]
    fn months_and_days_since() {
        let start = date("2024-11-20");
        let end = date("2025-02-01");
        assert_eq!(end.months_since(&start), 3);
        assert_eq!(end.days_since(&start), 73);
    }

    #[test]
    fn from_value_requires_string() {
        assert!(CalculationDate::from_value(&Value::Int(20250101)).is_err());
        assert_eq!(
            CalculationDate::from_value(&Value::from("2025-01-01")).unwrap(),
            date("2025-01-01")
        );
    }

    #[test]
    fn serde_roundtrip_as_string() {
        let d = date("2025-01-01");
        let json = serde_json::to_string(&d).unwrap();
        assert_eq!(json, "\"2025-01-01\"");
    }
}

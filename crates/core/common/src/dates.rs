//! Venue date encoding and days-to-expiration arithmetic
//!
//! Venues encode expirations as `YYYYMMDD` strings. Everything past the
//! provider boundary works with `NaiveDate`.

use chrono::{Local, NaiveDate};
use thiserror::Error;

/// Venue date format (e.g. "20240621")
pub const VENUE_DATE_FORMAT: &str = "%Y%m%d";

/// Venue date could not be parsed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid venue date '{input}': expected YYYYMMDD")]
pub struct DateParseError {
    /// The rejected input
    pub input: String,
}

/// Parse a venue date string into a calendar date
pub fn parse_venue_date(input: &str) -> Result<NaiveDate, DateParseError> {
    let trimmed = input.trim();
    if trimmed.len() != 8 {
        return Err(DateParseError {
            input: input.to_string(),
        });
    }
    NaiveDate::parse_from_str(trimmed, VENUE_DATE_FORMAT).map_err(|_| DateParseError {
        input: input.to_string(),
    })
}

/// Parse several venue dates, failing on the first malformed one
pub fn parse_venue_dates<I, S>(inputs: I) -> Result<Vec<NaiveDate>, DateParseError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    inputs
        .into_iter()
        .map(|s| parse_venue_date(s.as_ref()))
        .collect()
}

/// Format a calendar date in venue encoding
#[must_use]
pub fn format_venue_date(date: NaiveDate) -> String {
    date.format(VENUE_DATE_FORMAT).to_string()
}

/// Whole days from `today` until `expiration` (negative once expired)
#[must_use]
pub fn days_to_expiration(expiration: NaiveDate, today: NaiveDate) -> i64 {
    (expiration - today).num_days()
}

/// Source of "today" for expiry arithmetic
pub trait Clock: Send + Sync {
    /// Current calendar date
    fn today(&self) -> NaiveDate;

    /// Days until `expiration` relative to [`Clock::today`]
    fn days_to_expiration(&self, expiration: NaiveDate) -> i64 {
        days_to_expiration(expiration, self.today())
    }
}

/// Local wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        Local::now().date_naive()
    }
}

/// Clock pinned to a single date
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub NaiveDate);

impl Clock for FixedClock {
    fn today(&self) -> NaiveDate {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_venue_date_parse_and_format() {
        let parsed = parse_venue_date("20240621").unwrap();
        assert_eq!(parsed, date(2024, 6, 21));
        assert_eq!(format_venue_date(parsed), "20240621");
    }

    #[rstest]
    #[case("2024-06-21")]
    #[case("20241341")]
    #[case("240621")]
    #[case("")]
    fn test_malformed_venue_dates(#[case] input: &str) {
        let err = parse_venue_date(input).unwrap_err();
        assert_eq!(err.input, input);
    }

    #[test]
    fn test_parse_many_stops_at_first_error() {
        let ok = parse_venue_dates(["20240621", "20240719"]).unwrap();
        assert_eq!(ok, vec![date(2024, 6, 21), date(2024, 7, 19)]);
        assert!(parse_venue_dates(["20240621", "bogus"]).is_err());
    }

    #[rstest]
    #[case(date(2024, 6, 21), date(2024, 6, 1), 20)]
    #[case(date(2024, 6, 1), date(2024, 6, 1), 0)]
    #[case(date(2024, 5, 31), date(2024, 6, 1), -1)]
    fn test_days_to_expiration(
        #[case] expiration: NaiveDate,
        #[case] today: NaiveDate,
        #[case] expected: i64,
    ) {
        assert_eq!(days_to_expiration(expiration, today), expected);
        assert_eq!(FixedClock(today).days_to_expiration(expiration), expected);
    }
}

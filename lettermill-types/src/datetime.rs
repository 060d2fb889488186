//! IMAP date and date-time formats.
//!
//! `date-time = DQUOTE date-day-fixed "-" date-month "-" date-year SP time SP zone DQUOTE`

use std::fmt::{Display, Formatter};

use chrono::{DateTime as ChronoDateTime, FixedOffset, NaiveDate as ChronoNaiveDate};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("not a valid IMAP date or date-time")]
pub struct DateTimeError;

/// An INTERNALDATE-style timestamp with zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DateTime(pub ChronoDateTime<FixedOffset>);

impl DateTime {
    /// Parse the unquoted form, e.g. ` 1-Jul-2026 13:45:01 +0000`.
    pub fn parse(value: &str) -> Result<Self, DateTimeError> {
        let trimmed = value.trim_start();
        ChronoDateTime::parse_from_str(trimmed, "%d-%b-%Y %H:%M:%S %z")
            .or_else(|_| {
                ChronoDateTime::parse_from_str(trimmed, "%e-%b-%Y %H:%M:%S %z")
            })
            .map(Self)
            .map_err(|_| DateTimeError)
    }
}

impl Display for DateTime {
    /// Unquoted wire form; the day of month is space-padded.
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0.format("%e-%b-%Y %H:%M:%S %z"))
    }
}

/// A zone-less search date, e.g. `1-Feb-1994`.
///
/// `date = date-text / DQUOTE date-text DQUOTE`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NaiveDate(pub ChronoNaiveDate);

impl NaiveDate {
    pub fn parse(value: &str) -> Result<Self, DateTimeError> {
        ChronoNaiveDate::parse_from_str(value.trim_start(), "%d-%b-%Y")
            .map(Self)
            .map_err(|_| DateTimeError)
    }
}

impl Display for NaiveDate {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0.format("%-d-%b-%Y"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn date_time_roundtrip() {
        let parsed = DateTime::parse("01-Jul-2026 13:45:01 +0200").unwrap();
        assert_eq!(parsed.to_string(), " 1-Jul-2026 13:45:01 +0200");

        let padded = DateTime::parse(" 1-Jul-2026 13:45:01 +0200").unwrap();
        assert_eq!(parsed, padded);
    }

    #[test]
    fn date_parse() {
        let parsed = NaiveDate::parse("1-Feb-1994").unwrap();
        assert_eq!(parsed.to_string(), "1-Feb-1994");
        assert!(NaiveDate::parse("31-Foo-1994").is_err());
    }
}

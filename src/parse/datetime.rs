//! Date and date-time grammar.

use abnf_core::streaming::dquote;
use lettermill_types::datetime::{DateTime, NaiveDate};
use nom::{
    branch::alt,
    bytes::streaming::take_while1,
    combinator::map_res,
    sequence::delimited,
    IResult,
};

/// date-time = DQUOTE date-day-fixed "-" date-month "-" date-year SP time SP zone DQUOTE
pub fn date_time(input: &[u8]) -> IResult<&[u8], DateTime> {
    delimited(
        dquote,
        map_res(take_while1(|b| b != b'"'), |raw: &[u8]| {
            DateTime::parse(&String::from_utf8_lossy(raw))
        }),
        dquote,
    )(input)
}

/// date = date-text / DQUOTE date-text DQUOTE
pub fn date(input: &[u8]) -> IResult<&[u8], NaiveDate> {
    alt((
        delimited(dquote, date_text, dquote),
        date_text,
    ))(input)
}

/// date-text = date-day "-" date-month "-" date-year
fn date_text(input: &[u8]) -> IResult<&[u8], NaiveDate> {
    map_res(
        take_while1(|b: u8| b.is_ascii_alphanumeric() || b == b'-'),
        |raw: &[u8]| NaiveDate::parse(&String::from_utf8_lossy(raw)),
    )(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_date_time() {
        let (rem, parsed) =
            date_time(b"\"01-Jul-2026 13:45:01 +0000\" ").unwrap();
        assert_eq!(rem, b" ");
        assert_eq!(parsed.to_string(), " 1-Jul-2026 13:45:01 +0000");

        assert!(date_time(b"\"garbage\" ").is_err());
    }

    #[test]
    fn test_date() {
        assert_eq!(date(b"1-Feb-1994 ").unwrap().1.to_string(), "1-Feb-1994");
        assert_eq!(
            date(b"\"1-Feb-1994\" ").unwrap().1.to_string(),
            "1-Feb-1994"
        );
    }
}

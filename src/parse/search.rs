//! SEARCH key grammar.

use lettermill_types::search::SearchKey;
use nom::{
    branch::alt,
    bytes::streaming::{tag, tag_no_case},
    combinator::{map, value},
    multi::separated_list1,
    sequence::{delimited, preceded, tuple},
    IResult,
};

use crate::parse::core::{astring, atom, number};
use crate::parse::datetime::date;
use crate::parse::sequence::sequence_set;
use crate::parse::sp;

/// search-key, one criterion. Simple keys, keys with an argument, and the
/// recursive NOT / OR / parenthesized forms.
pub fn search_key(input: &[u8]) -> IResult<&[u8], SearchKey> {
    alt((search_key_flags, search_key_args, search_key_recursive))(input)
}

/// The argument-less flag-state keys.
fn search_key_flags(input: &[u8]) -> IResult<&[u8], SearchKey> {
    alt((
        value(SearchKey::Answered, tag_no_case(b"ANSWERED")),
        value(SearchKey::Deleted, tag_no_case(b"DELETED")),
        value(SearchKey::Draft, tag_no_case(b"DRAFT")),
        value(SearchKey::Flagged, tag_no_case(b"FLAGGED")),
        value(SearchKey::New, tag_no_case(b"NEW")),
        value(SearchKey::Old, tag_no_case(b"OLD")),
        value(SearchKey::Recent, tag_no_case(b"RECENT")),
        value(SearchKey::Unanswered, tag_no_case(b"UNANSWERED")),
        value(SearchKey::Undeleted, tag_no_case(b"UNDELETED")),
        value(SearchKey::Undraft, tag_no_case(b"UNDRAFT")),
        value(SearchKey::Unflagged, tag_no_case(b"UNFLAGGED")),
        map(
            preceded(tuple((tag_no_case(b"UNKEYWORD"), sp)), atom),
            |keyword| SearchKey::Unkeyword(keyword.as_str().to_owned()),
        ),
        value(SearchKey::Unseen, tag_no_case(b"UNSEEN")),
        map(
            preceded(tuple((tag_no_case(b"KEYWORD"), sp)), atom),
            |keyword| SearchKey::Keyword(keyword.as_str().to_owned()),
        ),
        value(SearchKey::Seen, tag_no_case(b"SEEN")),
        value(SearchKey::All, tag_no_case(b"ALL")),
    ))(input)
}

/// Keys taking a string, date, size or sequence-set argument.
fn search_key_args(input: &[u8]) -> IResult<&[u8], SearchKey> {
    alt((
        map(string_arg(b"BCC"), SearchKey::Bcc),
        map(preceded(tuple((tag_no_case(b"BEFORE"), sp)), date), SearchKey::Before),
        map(string_arg(b"BODY"), SearchKey::Body),
        map(string_arg(b"CC"), SearchKey::Cc),
        map(string_arg(b"FROM"), SearchKey::From),
        map(
            tuple((tag_no_case(b"HEADER"), sp, astring, sp, astring)),
            |(_, _, name, _, value)| SearchKey::Header(
                name.to_text().into_owned(),
                value.to_text().into_owned(),
            ),
        ),
        map(
            preceded(tuple((tag_no_case(b"LARGER"), sp)), number),
            SearchKey::Larger,
        ),
        map(preceded(tuple((tag_no_case(b"ON"), sp)), date), SearchKey::On),
        map(
            preceded(tuple((tag_no_case(b"SENTBEFORE"), sp)), date),
            SearchKey::SentBefore,
        ),
        map(
            preceded(tuple((tag_no_case(b"SENTON"), sp)), date),
            SearchKey::SentOn,
        ),
        map(
            preceded(tuple((tag_no_case(b"SENTSINCE"), sp)), date),
            SearchKey::SentSince,
        ),
        map(preceded(tuple((tag_no_case(b"SINCE"), sp)), date), SearchKey::Since),
        map(
            preceded(tuple((tag_no_case(b"SMALLER"), sp)), number),
            SearchKey::Smaller,
        ),
        map(string_arg(b"SUBJECT"), SearchKey::Subject),
        map(string_arg(b"TEXT"), SearchKey::Text),
        map(string_arg(b"TO"), SearchKey::To),
        map(
            preceded(tuple((tag_no_case(b"UID"), sp)), sequence_set),
            SearchKey::Uid,
        ),
    ))(input)
}

/// NOT / OR / `(...)` conjunction / bare sequence-set.
fn search_key_recursive(input: &[u8]) -> IResult<&[u8], SearchKey> {
    alt((
        map(
            preceded(tuple((tag_no_case(b"NOT"), sp)), search_key),
            |key| SearchKey::Not(Box::new(key)),
        ),
        map(
            tuple((tag_no_case(b"OR"), sp, search_key, sp, search_key)),
            |(_, _, left, _, right)| {
                SearchKey::Or(Box::new(left), Box::new(right))
            },
        ),
        map(
            delimited(tag(b"("), separated_list1(sp, search_key), tag(b")")),
            and_key,
        ),
        map(sequence_set, SearchKey::SequenceSet),
    ))(input)
}

/// Collapse a one-element conjunction.
pub fn and_key(mut keys: Vec<SearchKey>) -> SearchKey {
    if keys.len() == 1 {
        keys.remove(0)
    } else {
        SearchKey::And(keys)
    }
}

fn string_arg(
    name: &'static [u8],
) -> impl Fn(&[u8]) -> IResult<&[u8], String> {
    move |input| {
        map(preceded(tuple((tag_no_case(name), sp)), astring), |value| {
            value.to_text().into_owned()
        })(input)
    }
}

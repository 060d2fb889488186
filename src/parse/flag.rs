//! Flag grammar.

use lettermill_types::flag::Flag;
use nom::{
    branch::alt,
    bytes::streaming::tag,
    combinator::map,
    multi::separated_list0,
    sequence::{delimited, preceded},
    IResult,
};

use crate::parse::core::atom;
use crate::parse::sp;

/// flag = "\Answered" / "\Flagged" / "\Deleted" / "\Seen" / "\Draft" /
///        flag-keyword / flag-extension
pub fn flag(input: &[u8]) -> IResult<&[u8], Flag> {
    alt((
        map(preceded(tag(b"\\"), atom), |name| {
            Flag::system(name.as_str())
                .unwrap_or_else(|| Flag::Keyword(format!("\\{name}")))
        }),
        map(atom, |name| Flag::Keyword(name.as_str().to_owned())),
    ))(input)
}

/// flag-list = "(" [flag *(SP flag)] ")"
pub fn flag_list(input: &[u8]) -> IResult<&[u8], Vec<Flag>> {
    delimited(tag(b"("), separated_list0(sp, flag), tag(b")"))(input)
}

//! Sequence set grammar.

use std::num::NonZeroU32;

use lettermill_types::sequence::{SeqOrUid, Sequence, SequenceSet};
use nom::{
    branch::alt,
    bytes::streaming::tag,
    combinator::{map, map_opt},
    multi::separated_list1,
    sequence::separated_pair,
    IResult,
};

use crate::parse::core::number;

/// seq-number = nz-number / "*"
pub fn seq_or_uid(input: &[u8]) -> IResult<&[u8], SeqOrUid> {
    alt((
        map(tag(b"*"), |_| SeqOrUid::Asterisk),
        map_opt(number, |n| NonZeroU32::new(n).map(SeqOrUid::Value)),
    ))(input)
}

/// seq-range = seq-number ":" seq-number
fn seq_range(input: &[u8]) -> IResult<&[u8], Sequence> {
    map(
        separated_pair(seq_or_uid, tag(b":"), seq_or_uid),
        |(start, end)| Sequence::Range(start, end),
    )(input)
}

/// sequence-set = (seq-number / seq-range) *("," (seq-number / seq-range))
pub fn sequence_set(input: &[u8]) -> IResult<&[u8], SequenceSet> {
    map(
        separated_list1(
            tag(b","),
            alt((seq_range, map(seq_or_uid, Sequence::Single))),
        ),
        SequenceSet,
    )(input)
}

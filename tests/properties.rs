//! Property checks over the parser and the sequence-set codec.

use std::num::NonZeroU32;

use lettermill::parse::{parse_command, sequence::sequence_set};
use lettermill_types::sequence::{SeqOrUid, Sequence, SequenceSet};
use proptest::prelude::*;

fn seq_or_uid() -> impl Strategy<Value = SeqOrUid> {
    prop_oneof![
        9 => (1u32..100_000).prop_map(|n| {
            SeqOrUid::Value(NonZeroU32::new(n).expect("non-zero range"))
        }),
        1 => Just(SeqOrUid::Asterisk),
    ]
}

fn sequence() -> impl Strategy<Value = Sequence> {
    prop_oneof![
        seq_or_uid().prop_map(Sequence::Single),
        (seq_or_uid(), seq_or_uid())
            .prop_map(|(start, end)| Sequence::Range(start, end)),
    ]
}

proptest! {
    /// Arbitrary bytes never panic the command parser, and either parse
    /// fully or produce a typed error.
    #[test]
    fn parser_copes_with_arbitrary_input(mut input in proptest::collection::vec(any::<u8>(), 0..256)) {
        input.extend_from_slice(b"\r\n");
        let _ = parse_command(&input);
    }

    /// Plausible command-shaped lines never panic either.
    #[test]
    fn parser_copes_with_ascii_lines(line in "[ -~]{0,120}") {
        let mut input = line.into_bytes();
        input.extend_from_slice(b"\r\n");
        let _ = parse_command(&input);
    }

    /// Serialization is canonical: parsing it back yields the normalized set.
    #[test]
    fn sequence_set_roundtrip(sequences in proptest::collection::vec(sequence(), 1..12)) {
        let set = SequenceSet(sequences);
        let serialized = format!("{set} ");
        let (rest, parsed) = sequence_set(serialized.as_bytes())
            .expect("serialized set must parse");
        prop_assert_eq!(rest, b" ");
        prop_assert_eq!(parsed, set.normalize());
    }

    /// Compaction merges consecutive runs and covers exactly the input.
    #[test]
    fn from_values_covers_input(mut uids in proptest::collection::vec(1u32..10_000, 1..64)) {
        uids.sort_unstable();
        uids.dedup();
        let set = SequenceSet::from_values(uids.iter().copied())
            .expect("non-empty input");
        let largest = *uids.last().expect("non-empty");
        for uid in &uids {
            prop_assert!(set.contains(*uid, largest));
        }
        prop_assert_eq!(set.resolve_uids(&uids), uids);
    }
}

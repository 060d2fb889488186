//! Message sequence sets.
//!
//! `sequence-set = (seq-number / seq-range) *("," (seq-number / seq-range))`

use std::fmt::{Display, Formatter};
use std::num::NonZeroU32;

/// One endpoint of a sequence range.
///
/// `seq-number = nz-number / "*"`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SeqOrUid {
    Value(NonZeroU32),
    Asterisk,
}

impl SeqOrUid {
    /// The concrete value, with `*` standing for `largest`.
    pub fn expand(&self, largest: u32) -> u32 {
        match self {
            Self::Value(value) => value.get(),
            Self::Asterisk => largest,
        }
    }
}

impl Display for SeqOrUid {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            Self::Value(value) => write!(f, "{value}"),
            Self::Asterisk => f.write_str("*"),
        }
    }
}

/// `seq-range = seq-number ":" seq-number`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sequence {
    Single(SeqOrUid),
    Range(SeqOrUid, SeqOrUid),
}

// Serialization is canonical: reversed numeric ranges come out low-to-high,
// so parsing a serialized set yields the normalized set.
impl Display for Sequence {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            Self::Single(value) => value.fmt(f),
            Self::Range(
                SeqOrUid::Value(start),
                SeqOrUid::Value(end),
            ) if start > end => write!(f, "{end}:{start}"),
            Self::Range(start, end) => write!(f, "{start}:{end}"),
        }
    }
}

/// A non-empty set of sequences.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SequenceSet(pub Vec<Sequence>);

impl SequenceSet {
    /// Build a compact set from message numbers, merging consecutive runs.
    ///
    /// Used for `APPENDUID`/`COPYUID` encodings; input order is preserved
    /// run-wise, matching the order messages were processed in.
    pub fn from_values(values: impl IntoIterator<Item = u32>) -> Option<Self> {
        let mut sequences: Vec<(u32, u32)> = Vec::new();
        for value in values {
            match sequences.last_mut() {
                Some((_, end)) if *end + 1 == value => *end = value,
                _ => sequences.push((value, value)),
            }
        }
        if sequences.is_empty() {
            return None;
        }
        Some(Self(
            sequences
                .into_iter()
                .map(|(start, end)| {
                    let start = SeqOrUid::Value(NonZeroU32::new(start)?);
                    if start.expand(0) == end {
                        Some(Sequence::Single(start))
                    } else {
                        Some(Sequence::Range(
                            start,
                            SeqOrUid::Value(NonZeroU32::new(end)?),
                        ))
                    }
                })
                .collect::<Option<Vec<_>>>()?,
        ))
    }

    /// Order every numeric range low-to-high. `parse(serialize(s))` equals
    /// `s.normalize()` for all sets.
    pub fn normalize(&self) -> Self {
        Self(
            self.0
                .iter()
                .map(|seq| match *seq {
                    Sequence::Range(
                        SeqOrUid::Value(start),
                        SeqOrUid::Value(end),
                    ) if start > end => Sequence::Range(
                        SeqOrUid::Value(end),
                        SeqOrUid::Value(start),
                    ),
                    other => other,
                })
                .collect(),
        )
    }

    /// Whether `value` is a member, with `*` expanded to `largest`.
    pub fn contains(&self, value: u32, largest: u32) -> bool {
        self.0.iter().any(|seq| match *seq {
            Sequence::Single(single) => single.expand(largest) == value,
            Sequence::Range(start, end) => {
                let (start, end) = ordered(start.expand(largest), end.expand(largest));
                (start..=end).contains(&value)
            }
        })
    }

    /// Resolve to ascending sequence numbers within `1..=exists`.
    pub fn resolve_sequence(&self, exists: u32) -> Vec<u32> {
        let mut out: Vec<u32> = (1..=exists)
            .filter(|&seq| self.contains(seq, exists))
            .collect();
        out.dedup();
        out
    }

    /// Resolve to the subset of `uids` (ascending) selected by this set, with
    /// `*` standing for the highest known UID.
    pub fn resolve_uids(&self, uids: &[u32]) -> Vec<u32> {
        let largest = uids.last().copied().unwrap_or(0);
        uids.iter()
            .copied()
            .filter(|&uid| self.contains(uid, largest))
            .collect()
    }
}

impl Display for SequenceSet {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        for (i, seq) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            seq.fmt(f)?;
        }
        Ok(())
    }
}

fn ordered(a: u32, b: u32) -> (u32, u32) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(raw: &[(u32, u32)]) -> SequenceSet {
        SequenceSet(
            raw.iter()
                .map(|&(start, end)| {
                    let start = SeqOrUid::Value(NonZeroU32::new(start).unwrap());
                    if start.expand(0) == end {
                        Sequence::Single(start)
                    } else {
                        Sequence::Range(
                            start,
                            SeqOrUid::Value(NonZeroU32::new(end).unwrap()),
                        )
                    }
                })
                .collect(),
        )
    }

    #[test]
    fn from_values_merges_runs() {
        let got = SequenceSet::from_values([101, 102, 103, 105]).unwrap();
        assert_eq!(got.to_string(), "101:103,105");

        let got = SequenceSet::from_values([7]).unwrap();
        assert_eq!(got.to_string(), "7");

        assert!(SequenceSet::from_values([]).is_none());
    }

    #[test]
    fn contains_expands_asterisk() {
        let all = SequenceSet(vec![Sequence::Range(
            SeqOrUid::Value(NonZeroU32::new(1).unwrap()),
            SeqOrUid::Asterisk,
        )]);
        assert!(all.contains(1, 4));
        assert!(all.contains(4, 4));
        assert!(!all.contains(5, 4));

        let star = SequenceSet(vec![Sequence::Single(SeqOrUid::Asterisk)]);
        assert!(star.contains(4, 4));
        assert!(!star.contains(3, 4));
    }

    #[test]
    fn resolve_sequence_clamps_to_exists() {
        assert_eq!(set(&[(2, 10)]).resolve_sequence(4), vec![2, 3, 4]);
        assert_eq!(set(&[(1, 1), (3, 3)]).resolve_sequence(4), vec![1, 3]);
    }

    #[test]
    fn resolve_uids_selects_known_uids() {
        let uids = [101, 102, 104, 107];
        assert_eq!(set(&[(102, 105)]).resolve_uids(&uids), vec![102, 104]);

        let star = SequenceSet(vec![Sequence::Single(SeqOrUid::Asterisk)]);
        assert_eq!(star.resolve_uids(&uids), vec![107]);
    }

    #[test]
    fn normalize_orders_ranges() {
        let reversed = set(&[(9, 2)]);
        assert_eq!(reversed.normalize(), set(&[(2, 9)]));
        // Serialization already normalizes.
        assert_eq!(reversed.to_string(), "2:9");
    }
}

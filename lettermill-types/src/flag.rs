//! Message flags.

use std::cmp::Ordering;
use std::fmt::{Display, Formatter};

/// A message flag.
///
/// `flag = "\Answered" / "\Flagged" / "\Deleted" / "\Seen" / "\Draft" / flag-keyword / flag-extension`
///
/// `\Recent` is session-only: it is never stored by a backend and must be
/// stripped silently from client-supplied flag sets.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Flag {
    Answered,
    Deleted,
    Draft,
    Flagged,
    Recent,
    Seen,
    Keyword(String),
}

impl Flag {
    /// Parse a flag name without the backslash dispatch done by the wire
    /// parser. `name` excludes a leading `\` for system flags.
    pub fn system(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "ANSWERED" => Some(Self::Answered),
            "DELETED" => Some(Self::Deleted),
            "DRAFT" => Some(Self::Draft),
            "FLAGGED" => Some(Self::Flagged),
            "RECENT" => Some(Self::Recent),
            "SEEN" => Some(Self::Seen),
            _ => None,
        }
    }

    pub fn is_recent(&self) -> bool {
        matches!(self, Self::Recent)
    }
}

impl Display for Flag {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            Self::Answered => f.write_str("\\Answered"),
            Self::Deleted => f.write_str("\\Deleted"),
            Self::Draft => f.write_str("\\Draft"),
            Self::Flagged => f.write_str("\\Flagged"),
            Self::Recent => f.write_str("\\Recent"),
            Self::Seen => f.write_str("\\Seen"),
            Self::Keyword(name) => f.write_str(name),
        }
    }
}

// Flag lists are emitted sorted by their wire form.
impl Ord for Flag {
    fn cmp(&self, other: &Self) -> Ordering {
        self.to_string().cmp(&other.to_string())
    }
}

impl PartialOrd for Flag {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Entry of a `PERMANENTFLAGS` list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlagPerm {
    Flag(Flag),
    /// `\*`, keywords may be created by STORE.
    Asterisk,
}

impl Display for FlagPerm {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            Self::Flag(flag) => flag.fmt(f),
            Self::Asterisk => f.write_str("\\*"),
        }
    }
}

/// Mailbox name attribute in LIST/LSUB responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagNameAttribute {
    Noinferiors,
    Noselect,
    Marked,
    Unmarked,
}

impl Display for FlagNameAttribute {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            Self::Noinferiors => f.write_str("\\Noinferiors"),
            Self::Noselect => f.write_str("\\Noselect"),
            Self::Marked => f.write_str("\\Marked"),
            Self::Unmarked => f.write_str("\\Unmarked"),
        }
    }
}

/// STORE operation: replace, add or remove.
///
/// `store-att-flags = (["+" / "-"] "FLAGS" [".SILENT"]) SP (flag-list / (flag *(SP flag)))`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreType {
    Replace,
    Add,
    Remove,
}

/// Whether the STORE echoes per-message FETCH responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreResponse {
    Answer,
    Silent,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_flag_lookup_is_case_insensitive() {
        assert_eq!(Flag::system("seen"), Some(Flag::Seen));
        assert_eq!(Flag::system("SEEN"), Some(Flag::Seen));
        assert_eq!(Flag::system("Junk"), None);
    }

    #[test]
    fn flags_sort_by_wire_form() {
        let mut flags = vec![Flag::Seen, Flag::Recent, Flag::Deleted];
        flags.sort();
        assert_eq!(flags, vec![Flag::Deleted, Flag::Recent, Flag::Seen]);
    }
}

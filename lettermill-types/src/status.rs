//! STATUS attributes.

use std::fmt::{Display, Formatter};

/// `status-att = "MESSAGES" / "RECENT" / "UIDNEXT" / "UIDVALIDITY" / "UNSEEN"`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusAttribute {
    Messages,
    Recent,
    UidNext,
    UidValidity,
    Unseen,
}

impl Display for StatusAttribute {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            Self::Messages => f.write_str("MESSAGES"),
            Self::Recent => f.write_str("RECENT"),
            Self::UidNext => f.write_str("UIDNEXT"),
            Self::UidValidity => f.write_str("UIDVALIDITY"),
            Self::Unseen => f.write_str("UNSEEN"),
        }
    }
}

/// An attribute/value pair of a `STATUS` data response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusItem {
    pub attribute: StatusAttribute,
    pub value: u32,
}

//! Server responses.
//!
//! A [`Response`] is the complete answer to one command: an ordered list of
//! untagged children followed by the tagged (or `*`/`+`) line itself.
//! Serialization to bytes lives in the server's encoder; this module only
//! models the values.

use std::fmt::{Display, Formatter};

use crate::core::Tag;
use crate::fetch::MessageDataItem;
use crate::flag::{Flag, FlagNameAttribute, FlagPerm};
use crate::mailbox::Mailbox;
use crate::sequence::SequenceSet;
use crate::status::StatusItem;

/// Result condition of a status response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    Ok,
    No,
    Bad,
    Bye,
    PreAuth,
}

impl Display for Condition {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            Self::Ok => f.write_str("OK"),
            Self::No => f.write_str("NO"),
            Self::Bad => f.write_str("BAD"),
            Self::Bye => f.write_str("BYE"),
            Self::PreAuth => f.write_str("PREAUTH"),
        }
    }
}

/// An advertised capability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Capability {
    Imap4rev1,
    StartTls,
    LoginDisabled,
    Idle,
    Move,
    Unselect,
    Id,
    UidPlus,
    MultiAppend,
    Auth(String),
    Other(String),
}

impl Display for Capability {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            Self::Imap4rev1 => f.write_str("IMAP4rev1"),
            Self::StartTls => f.write_str("STARTTLS"),
            Self::LoginDisabled => f.write_str("LOGINDISABLED"),
            Self::Idle => f.write_str("IDLE"),
            Self::Move => f.write_str("MOVE"),
            Self::Unselect => f.write_str("UNSELECT"),
            Self::Id => f.write_str("ID"),
            Self::UidPlus => f.write_str("UIDPLUS"),
            Self::MultiAppend => f.write_str("MULTIAPPEND"),
            Self::Auth(mech) => write!(f, "AUTH={mech}"),
            Self::Other(name) => f.write_str(name),
        }
    }
}

/// `resp-text-code`, the bracketed machine-readable part of a status line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Code {
    Alert,
    Capability(Vec<Capability>),
    Parse,
    PermanentFlags(Vec<FlagPerm>),
    ReadOnly,
    ReadWrite,
    TryCreate,
    UidNext(u32),
    UidValidity(u32),
    Unseen(u32),
    AppendUid {
        validity: u32,
        uids: SequenceSet,
    },
    CopyUid {
        validity: u32,
        source: SequenceSet,
        destination: SequenceSet,
    },
    ExpungeIssued,
    Timeout,
    ServerBug,
    Unavailable,
    Nonexistent,
    AlreadyExists,
    Cannot,
    /// An unregistered single-word code, e.g. `NOTALLOWED`.
    Other(String),
}

/// An untagged data response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Data {
    Capability(Vec<Capability>),
    List {
        attributes: Vec<FlagNameAttribute>,
        delimiter: Option<char>,
        mailbox: Mailbox,
    },
    Lsub {
        attributes: Vec<FlagNameAttribute>,
        delimiter: Option<char>,
        mailbox: Mailbox,
    },
    Status {
        mailbox: Mailbox,
        items: Vec<StatusItem>,
    },
    Search(Vec<u32>),
    Flags(Vec<Flag>),
    Exists(u32),
    Recent(u32),
    Expunge(u32),
    Fetch {
        seq: u32,
        items: Vec<MessageDataItem>,
    },
    /// `* ID NIL` or `* ID (field value ...)`.
    Id {
        parameters: Option<Vec<(String, Option<String>)>>,
    },
}

/// An untagged child of a [`Response`]: either data, or a `*` status line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Untagged {
    Data(Data),
    Status {
        condition: Condition,
        code: Option<Code>,
        text: String,
    },
}

/// Tag slot of the final line of a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseTag {
    /// A client tag.
    Tagged(Tag),
    /// `*`, for greetings and unsolicited responses.
    Untagged,
    /// `+`, a continuation prompt.
    Continuation,
}

/// A complete response: untagged children plus the final line.
///
/// Invariants: untagged children always render with tag `*`; continuations
/// carry no condition; the final line of a tagged response echoes the client
/// tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub tag: ResponseTag,
    pub condition: Option<Condition>,
    pub code: Option<Code>,
    pub text: String,
    pub untagged: Vec<Untagged>,
}

impl Response {
    fn status(
        tag: ResponseTag,
        condition: Condition,
        text: impl Into<String>,
    ) -> Self {
        Self {
            tag,
            condition: Some(condition),
            code: None,
            text: text.into(),
            untagged: Vec::new(),
        }
    }

    pub fn ok(tag: Tag, text: impl Into<String>) -> Self {
        Self::status(ResponseTag::Tagged(tag), Condition::Ok, text)
    }

    pub fn no(tag: Tag, text: impl Into<String>) -> Self {
        Self::status(ResponseTag::Tagged(tag), Condition::No, text)
    }

    pub fn bad(tag: Tag, text: impl Into<String>) -> Self {
        Self::status(ResponseTag::Tagged(tag), Condition::Bad, text)
    }

    /// An untagged `BAD`, for errors with no recoverable tag.
    pub fn bad_untagged(text: impl Into<String>) -> Self {
        Self::status(ResponseTag::Untagged, Condition::Bad, text)
    }

    pub fn bye(text: impl Into<String>) -> Self {
        Self::status(ResponseTag::Untagged, Condition::Bye, text)
    }

    /// The greeting, `* OK ...` or `* PREAUTH ...`.
    pub fn greeting(condition: Condition, text: impl Into<String>) -> Self {
        Self::status(ResponseTag::Untagged, condition, text)
    }

    /// A `+ text` continuation prompt.
    pub fn continuation(text: impl Into<String>) -> Self {
        Self {
            tag: ResponseTag::Continuation,
            condition: None,
            code: None,
            text: text.into(),
            untagged: Vec::new(),
        }
    }

    pub fn with_code(mut self, code: Code) -> Self {
        self.code = Some(code);
        self
    }

    /// Append an untagged child; children render before the final line in
    /// insertion order.
    pub fn add_untagged(&mut self, data: Data) {
        self.untagged.push(Untagged::Data(data));
    }

    /// Append an untagged `* OK [code] text` child.
    pub fn add_untagged_ok(&mut self, text: impl Into<String>, code: Option<Code>) {
        self.untagged.push(Untagged::Status {
            condition: Condition::Ok,
            code,
            text: text.into(),
        });
    }

    /// Append an untagged `* BYE text` child.
    pub fn add_untagged_bye(&mut self, text: impl Into<String>) {
        self.untagged.push(Untagged::Status {
            condition: Condition::Bye,
            code: None,
            text: text.into(),
        });
    }

    pub fn is_ok(&self) -> bool {
        self.condition == Some(Condition::Ok)
    }

    pub fn is_bad(&self) -> bool {
        self.condition == Some(Condition::Bad)
    }

    /// Whether the connection closes after this response is written.
    pub fn is_terminal(&self) -> bool {
        self.condition == Some(Condition::Bye)
            || self.untagged.iter().any(|untagged| {
                matches!(
                    untagged,
                    Untagged::Status {
                        condition: Condition::Bye,
                        ..
                    }
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag(value: &str) -> Tag {
        Tag::try_from(value).unwrap()
    }

    #[test]
    fn terminal_when_bye_attached() {
        let mut resp = Response::ok(tag("a1"), "LOGOUT completed.");
        assert!(!resp.is_terminal());
        resp.add_untagged_bye("Logging out.");
        assert!(resp.is_terminal());
        assert!(Response::bye("Server shutting down.").is_terminal());
    }

    #[test]
    fn untagged_children_keep_insertion_order() {
        let mut resp = Response::ok(tag("s1"), "Selected mailbox.");
        resp.add_untagged(Data::Exists(4));
        resp.add_untagged(Data::Recent(1));
        assert_eq!(
            resp.untagged,
            vec![
                Untagged::Data(Data::Exists(4)),
                Untagged::Data(Data::Recent(1)),
            ]
        );
    }
}

//! Client commands.
//!
//! See <https://tools.ietf.org/html/rfc3501#section-6>.

use crate::core::Tag;
use crate::datetime::DateTime;
use crate::fetch::MacroOrFetchAttributes;
use crate::flag::{Flag, StoreResponse, StoreType};
use crate::mailbox::{ListMailbox, Mailbox};
use crate::search::SearchKey;
use crate::sequence::SequenceSet;
use crate::status::StatusAttribute;

/// A fully parsed command: client tag plus typed body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub tag: Tag,
    pub body: CommandBody,
}

impl Command {
    pub fn new(tag: Tag, body: CommandBody) -> Self {
        Self { tag, body }
    }

    pub fn name(&self) -> &'static str {
        self.body.name()
    }
}

/// The phase a command requires, per the RFC 3501 state tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandCategory {
    /// Valid in every phase.
    Any,
    /// Valid only before authentication.
    NonAuth,
    /// Valid once authenticated (also while selected).
    Auth,
    /// Valid only with a mailbox selected.
    Select,
}

/// One message of a (multi-)APPEND.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendMessage {
    pub flags: Vec<Flag>,
    pub date: Option<DateTime>,
    pub message: Vec<u8>,
}

/// Closed sum over the supported verbs; arguments are per-verb variants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandBody {
    // Any phase.
    Capability,
    Noop,
    Logout,
    Id {
        parameters: Option<Vec<(String, Option<String>)>>,
    },

    // Not authenticated.
    StartTls,
    Authenticate {
        mechanism: String,
    },
    Login {
        username: String,
        password: String,
    },

    // Authenticated.
    Select {
        mailbox: Mailbox,
    },
    Examine {
        mailbox: Mailbox,
    },
    Create {
        mailbox: Mailbox,
    },
    Delete {
        mailbox: Mailbox,
    },
    Rename {
        from: Mailbox,
        to: Mailbox,
    },
    Subscribe {
        mailbox: Mailbox,
    },
    Unsubscribe {
        mailbox: Mailbox,
    },
    List {
        reference: Mailbox,
        pattern: ListMailbox,
    },
    Lsub {
        reference: Mailbox,
        pattern: ListMailbox,
    },
    Status {
        mailbox: Mailbox,
        attributes: Vec<StatusAttribute>,
    },
    Append {
        mailbox: Mailbox,
        messages: Vec<AppendMessage>,
    },

    // Selected.
    Check,
    Close,
    Unselect,
    Expunge {
        /// `UID EXPUNGE` restricts the expunge to this set.
        uid_set: Option<SequenceSet>,
    },
    Copy {
        sequence_set: SequenceSet,
        mailbox: Mailbox,
        uid: bool,
    },
    Move {
        sequence_set: SequenceSet,
        mailbox: Mailbox,
        uid: bool,
    },
    Fetch {
        sequence_set: SequenceSet,
        attributes: MacroOrFetchAttributes,
        uid: bool,
    },
    Store {
        sequence_set: SequenceSet,
        kind: StoreType,
        response: StoreResponse,
        flags: Vec<Flag>,
        uid: bool,
    },
    Search {
        charset: Option<String>,
        criteria: SearchKey,
        uid: bool,
    },
    Idle,
}

impl CommandBody {
    /// The verb, without any `UID ` prefix; used in `<VERB> completed.` texts.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Capability => "CAPABILITY",
            Self::Noop => "NOOP",
            Self::Logout => "LOGOUT",
            Self::Id { .. } => "ID",
            Self::StartTls => "STARTTLS",
            Self::Authenticate { .. } => "AUTHENTICATE",
            Self::Login { .. } => "LOGIN",
            Self::Select { .. } => "SELECT",
            Self::Examine { .. } => "EXAMINE",
            Self::Create { .. } => "CREATE",
            Self::Delete { .. } => "DELETE",
            Self::Rename { .. } => "RENAME",
            Self::Subscribe { .. } => "SUBSCRIBE",
            Self::Unsubscribe { .. } => "UNSUBSCRIBE",
            Self::List { .. } => "LIST",
            Self::Lsub { .. } => "LSUB",
            Self::Status { .. } => "STATUS",
            Self::Append { .. } => "APPEND",
            Self::Check => "CHECK",
            Self::Close => "CLOSE",
            Self::Unselect => "UNSELECT",
            Self::Expunge { .. } => "EXPUNGE",
            Self::Copy { .. } => "COPY",
            Self::Move { .. } => "MOVE",
            Self::Fetch { .. } => "FETCH",
            Self::Store { .. } => "STORE",
            Self::Search { .. } => "SEARCH",
            Self::Idle => "IDLE",
        }
    }

    pub fn category(&self) -> CommandCategory {
        match self {
            Self::Capability | Self::Noop | Self::Logout | Self::Id { .. } => {
                CommandCategory::Any
            }
            Self::StartTls | Self::Authenticate { .. } | Self::Login { .. } => {
                CommandCategory::NonAuth
            }
            Self::Select { .. }
            | Self::Examine { .. }
            | Self::Create { .. }
            | Self::Delete { .. }
            | Self::Rename { .. }
            | Self::Subscribe { .. }
            | Self::Unsubscribe { .. }
            | Self::List { .. }
            | Self::Lsub { .. }
            | Self::Status { .. }
            | Self::Append { .. } => CommandCategory::Auth,
            Self::Check
            | Self::Close
            | Self::Unselect
            | Self::Expunge { .. }
            | Self::Copy { .. }
            | Self::Move { .. }
            | Self::Fetch { .. }
            | Self::Store { .. }
            | Self::Search { .. }
            | Self::Idle => CommandCategory::Select,
        }
    }

    /// Whether this command arrived with the `UID` prefix.
    pub fn is_uid(&self) -> bool {
        match self {
            Self::Copy { uid, .. }
            | Self::Move { uid, .. }
            | Self::Fetch { uid, .. }
            | Self::Store { uid, .. }
            | Self::Search { uid, .. } => *uid,
            Self::Expunge { uid_set } => uid_set.is_some(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories_follow_the_state_table() {
        assert_eq!(CommandBody::Noop.category(), CommandCategory::Any);
        assert_eq!(CommandBody::StartTls.category(), CommandCategory::NonAuth);
        assert_eq!(
            CommandBody::Select {
                mailbox: Mailbox::Inbox
            }
            .category(),
            CommandCategory::Auth
        );
        assert_eq!(CommandBody::Idle.category(), CommandCategory::Select);
    }
}

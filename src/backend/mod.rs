//! The backend contract.
//!
//! The protocol core is generic over a [`Backend`]: anything that can log a
//! user in and hand out [`Session`]s owning the actual message store. The
//! bundled [`memory`] backend implements the whole contract in process
//! memory and doubles as the test fixture.

use std::future::Future;

use lettermill_types::command::AppendMessage;
use lettermill_types::core::Tag;
use lettermill_types::datetime::DateTime;
use lettermill_types::flag::{Flag, FlagNameAttribute, StoreType};
use lettermill_types::mailbox::{ListMailbox, Mailbox};
use lettermill_types::response::{Code, Response};
use lettermill_types::search::SearchKey;
use thiserror::Error;
use tokio::sync::watch;

use crate::auth::Credentials;

pub mod memory;
pub mod selected;

pub use selected::SelectedMailbox;

/// Semantic failure raised by a backend operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("Mailbox does not exist.")]
    MailboxNotFound {
        name: Mailbox,
        /// Whether `CREATE` would make the failing operation succeed.
        try_create: bool,
    },
    #[error("Mailbox already exists.")]
    MailboxExists { name: Mailbox },
    #[error("Mailbox is read-only.")]
    MailboxReadOnly { name: Mailbox },
    #[error("APPEND cancelled.")]
    AppendFailure,
    #[error("Invalid authentication credentials.")]
    AuthenticationFailed,
    #[error("{0}")]
    NotAllowed(String),
    #[error("Search key cannot be used.")]
    CannotSearch,
}

impl BackendError {
    /// Map to the tagged response the client sees, per the error taxonomy.
    pub fn to_response(&self, tag: Tag) -> Response {
        match self {
            Self::MailboxNotFound { try_create, .. } => {
                let code = if *try_create {
                    Code::TryCreate
                } else {
                    Code::Nonexistent
                };
                Response::no(tag, self.to_string()).with_code(code)
            }
            Self::MailboxExists { .. } => {
                Response::no(tag, self.to_string()).with_code(Code::AlreadyExists)
            }
            Self::MailboxReadOnly { .. } => {
                Response::no(tag, self.to_string()).with_code(Code::ReadOnly)
            }
            Self::AppendFailure | Self::AuthenticationFailed => {
                Response::no(tag, self.to_string())
            }
            Self::NotAllowed(_) => Response::bad(tag, self.to_string())
                .with_code(Code::Other("NOTALLOWED".into())),
            Self::CannotSearch => {
                Response::no(tag, self.to_string()).with_code(Code::Cannot)
            }
        }
    }
}

/// One mailbox's stored state, as observed at a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailboxView {
    pub name: Mailbox,
    pub uid_validity: u32,
    pub next_uid: u32,
    /// Monotonic change counter; bumps on every mutation.
    pub epoch: u64,
    /// Unclaimed `\Recent` count at view time, for read-only selections.
    pub recent: u32,
    /// Flags defined in the mailbox, `\Recent` excluded.
    pub flags: Vec<Flag>,
    /// Messages in UID order with their stored flags.
    pub messages: Vec<MessageSummary>,
}

impl MailboxView {
    pub fn exists(&self) -> u32 {
        self.messages.len() as u32
    }

    /// Sequence number of the first message without `\Seen`.
    pub fn first_unseen(&self) -> Option<u32> {
        self.messages
            .iter()
            .position(|message| !message.flags.contains(&Flag::Seen))
            .map(|index| index as u32 + 1)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageSummary {
    pub uid: u32,
    pub flags: Vec<Flag>,
}

/// Result of a poll: the fresh view (if the mailbox still exists) plus the
/// `\Recent` UIDs newly claimed for this session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailboxUpdate {
    pub view: Option<MailboxView>,
    pub claimed: Vec<u32>,
}

/// Counters backing a `STATUS` response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MailboxStatus {
    pub messages: u32,
    pub recent: u32,
    pub unseen: u32,
    pub uid_next: u32,
    pub uid_validity: u32,
}

/// One `LIST`/`LSUB` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailboxListing {
    pub name: Mailbox,
    pub delimiter: Option<char>,
    pub attributes: Vec<FlagNameAttribute>,
}

/// Full message content for FETCH.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageData {
    pub uid: u32,
    pub flags: Vec<Flag>,
    pub internal_date: Option<DateTime>,
    pub body: Vec<u8>,
}

/// `APPENDUID` payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendUidInfo {
    pub validity: u32,
    pub uids: Vec<u32>,
}

/// `COPYUID` payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyUidInfo {
    pub validity: u32,
    pub source: Vec<u32>,
    pub destination: Vec<u32>,
}

/// Session-side inputs a backend needs to evaluate search keys.
#[derive(Debug, Clone, Default)]
pub struct SearchContext {
    /// UIDs in sequence-number order (index + 1 = sequence number).
    pub seq_uids: Vec<u32>,
    /// UIDs carrying the session `\Recent` flag.
    pub recent: Vec<u32>,
}

/// Entry point: authenticates users.
pub trait Backend: Send + Sync + 'static {
    type Session: Session;

    fn login(
        &self,
        credentials: &Credentials,
    ) -> impl Future<Output = Result<Self::Session, BackendError>> + Send;
}

/// An authenticated user's handle on the message store.
///
/// Methods return plain results; untagged-response bookkeeping happens in
/// [`SelectedMailbox`], which diffs consecutive [`MailboxView`]s.
pub trait Session: Send + Sync + 'static {
    fn list_mailboxes(
        &self,
        reference: &Mailbox,
        pattern: &ListMailbox,
        subscribed_only: bool,
    ) -> impl Future<Output = Result<Vec<MailboxListing>, BackendError>> + Send;

    fn status_mailbox(
        &self,
        name: &Mailbox,
    ) -> impl Future<Output = Result<MailboxStatus, BackendError>> + Send;

    fn create_mailbox(
        &self,
        name: &Mailbox,
    ) -> impl Future<Output = Result<(), BackendError>> + Send;

    fn delete_mailbox(
        &self,
        name: &Mailbox,
    ) -> impl Future<Output = Result<(), BackendError>> + Send;

    fn rename_mailbox(
        &self,
        from: &Mailbox,
        to: &Mailbox,
    ) -> impl Future<Output = Result<(), BackendError>> + Send;

    fn subscribe(
        &self,
        name: &Mailbox,
    ) -> impl Future<Output = Result<(), BackendError>> + Send;

    fn unsubscribe(
        &self,
        name: &Mailbox,
    ) -> impl Future<Output = Result<(), BackendError>> + Send;

    /// Open a mailbox; claims the unclaimed `\Recent` set unless read-only.
    fn select_mailbox(
        &self,
        name: &Mailbox,
        readonly: bool,
    ) -> impl Future<Output = Result<(MailboxView, Vec<u32>), BackendError>> + Send;

    /// Refresh the view of an open mailbox; `claim` hands new `\Recent`
    /// messages to this session.
    fn poll_mailbox(
        &self,
        name: &Mailbox,
        claim: bool,
    ) -> impl Future<Output = Result<MailboxUpdate, BackendError>> + Send;

    /// Block until the mailbox changes past `epoch`, the mailbox disappears,
    /// or `done` flips to true.
    fn wait_for_changes(
        &self,
        name: &Mailbox,
        epoch: u64,
        done: watch::Receiver<bool>,
    ) -> impl Future<Output = Result<(), BackendError>> + Send;

    fn append_messages(
        &self,
        name: &Mailbox,
        messages: &[AppendMessage],
    ) -> impl Future<Output = Result<AppendUidInfo, BackendError>> + Send;

    /// Full content of the given UIDs; silently skips UIDs no longer present.
    fn fetch_messages(
        &self,
        name: &Mailbox,
        uids: &[u32],
    ) -> impl Future<Output = Result<Vec<MessageData>, BackendError>> + Send;

    /// Apply a flag update; returns `(uid, new stored flags)` for each UID
    /// still present.
    fn update_flags(
        &self,
        name: &Mailbox,
        uids: &[u32],
        flags: &[Flag],
        kind: StoreType,
    ) -> impl Future<Output = Result<Vec<(u32, Vec<Flag>)>, BackendError>> + Send;

    /// Remove `\Deleted` messages (restricted to `uids` when given); returns
    /// the expunged UIDs.
    fn expunge_mailbox(
        &self,
        name: &Mailbox,
        uids: Option<&[u32]>,
    ) -> impl Future<Output = Result<Vec<u32>, BackendError>> + Send;

    fn copy_messages(
        &self,
        from: &Mailbox,
        uids: &[u32],
        to: &Mailbox,
    ) -> impl Future<Output = Result<CopyUidInfo, BackendError>> + Send;

    /// Copy then expunge the sources in one step.
    fn move_messages(
        &self,
        from: &Mailbox,
        uids: &[u32],
        to: &Mailbox,
    ) -> impl Future<Output = Result<CopyUidInfo, BackendError>> + Send;

    /// Evaluate search criteria; returns matching UIDs in mailbox order.
    fn search_mailbox(
        &self,
        name: &Mailbox,
        criteria: &SearchKey,
        context: &SearchContext,
    ) -> impl Future<Output = Result<Vec<u32>, BackendError>> + Send;
}

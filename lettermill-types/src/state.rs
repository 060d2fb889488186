//! Connection phases.
//!
//! ```text
//! NotAuthenticated -> Authenticated -> Selected -> Logout
//!         \________________\______________\__________^
//! ```
//!
//! Most commands are only valid in certain phases; the server answers `BAD`
//! when a command arrives in the wrong one.

/// Phase of an IMAP connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    /// Credentials required before most commands are permitted.
    NotAuthenticated,
    /// Authenticated, no mailbox selected yet.
    Authenticated,
    /// A mailbox is open.
    Selected,
    /// The connection is being torn down.
    Logout,
}

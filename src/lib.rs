//! An IMAP4rev1 server with pluggable mailbox backends.
//!
//! The crate layers cleanly along the data flow: bytes are framed by
//! [`codec::wire`], parsed by [`parse`], dispatched by
//! [`server::ConnectionState`], executed against a [`backend::Backend`], and
//! answered through [`codec::encode`]. The bundled
//! [`backend::memory::MemoryBackend`] keeps everything in process memory and
//! backs the test suite and the demo binary.

#![forbid(unsafe_code)]

pub mod auth;
pub mod backend;
pub mod codec;
pub mod config;
pub mod mime;
pub mod parse;
pub mod server;

pub use config::ImapConfig;
pub use server::{handle_connection, ImapServer};

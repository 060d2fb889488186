//! Wire codec: byte-stream framing on the way in, response serialization on
//! the way out.

pub mod encode;
pub mod wire;

pub use encode::Encoder;
pub use wire::{ImapStream, WireError};

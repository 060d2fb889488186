//! Wire parsing: one complete command buffer in, one typed [`Command`] out.
//!
//! The buffer handed to [`parse_command`] holds the full command, with every
//! literal body already inline after its `{N}\r\n` marker; the wire codec in
//! [`crate::codec`] is responsible for assembling it and for prompting the
//! client for synchronizing literals.

use lettermill_types::command::Command;
use lettermill_types::core::Tag;
use lettermill_types::response::Response;
use thiserror::Error;

pub mod command;
pub mod core;
pub mod datetime;
pub mod fetch;
pub mod flag;
pub mod search;
pub mod sequence;

pub(crate) use abnf_core::streaming::{crlf, sp};

/// Buffer limits applied while assembling commands.
#[derive(Debug, Clone, Copy)]
pub struct ParsingParams {
    /// Longest accepted command line, literals excluded.
    pub max_line_length: usize,
    /// Longest accepted single literal.
    pub max_literal_length: usize,
}

impl Default for ParsingParams {
    fn default() -> Self {
        Self {
            max_line_length: 8 * 1024,
            max_literal_length: 16 * 1024 * 1024,
        }
    }
}

/// Why a command buffer failed to parse. All variants answer `BAD`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandParseError {
    /// A tag alone, or nothing at all.
    #[error("command not given")]
    CommandMissing { tag: Option<Tag> },
    /// The verb is not in the command registry.
    #[error("{name}: command not implemented")]
    CommandNotFound { tag: Tag, name: String },
    /// Known verb, malformed arguments.
    #[error("{name}: invalid arguments")]
    CommandInvalid { tag: Tag, name: String },
}

impl CommandParseError {
    /// The `BAD` response for this error, tagged where a tag was recovered.
    pub fn to_response(&self) -> Response {
        match self {
            Self::CommandMissing { tag: Some(tag) } => {
                Response::bad(tag.clone(), "Command not given.")
            }
            Self::CommandMissing { tag: None } => {
                Response::bad_untagged("Command not given.")
            }
            Self::CommandNotFound { tag, name } => Response::bad(
                tag.clone(),
                format!("{name}: Command not implemented."),
            ),
            Self::CommandInvalid { tag, name } => {
                Response::bad(tag.clone(), format!("{name}: Invalid arguments."))
            }
        }
    }
}

/// Verbs the registry knows, including the `UID` prefix.
const KNOWN_VERBS: &[&str] = &[
    "CAPABILITY",
    "NOOP",
    "LOGOUT",
    "ID",
    "STARTTLS",
    "AUTHENTICATE",
    "LOGIN",
    "SELECT",
    "EXAMINE",
    "CREATE",
    "DELETE",
    "RENAME",
    "SUBSCRIBE",
    "UNSUBSCRIBE",
    "LIST",
    "LSUB",
    "STATUS",
    "APPEND",
    "CHECK",
    "CLOSE",
    "UNSELECT",
    "EXPUNGE",
    "COPY",
    "MOVE",
    "FETCH",
    "STORE",
    "SEARCH",
    "IDLE",
    "UID",
];

/// Parse one complete command buffer.
pub fn parse_command(input: &[u8]) -> Result<Command, CommandParseError> {
    match command::command(input) {
        Ok((remaining, command)) if remaining.is_empty() => Ok(command),
        Ok((_, command)) => Err(CommandParseError::CommandInvalid {
            name: command.name().to_owned(),
            tag: command.tag,
        }),
        Err(_) => Err(classify_failure(input)),
    }
}

/// Recover the tag (and verb, when present) from an unparseable buffer so the
/// `BAD` response can be addressed properly.
fn classify_failure(input: &[u8]) -> CommandParseError {
    let line = trim_crlf(input);
    let mut words = line
        .splitn(3, |&b| b == b' ')
        .map(|word| String::from_utf8_lossy(word).into_owned());
    let Some(tag) = words
        .next()
        .filter(|word| !word.is_empty())
        .and_then(|word| Tag::try_from(word.as_str()).ok())
    else {
        return CommandParseError::CommandMissing { tag: None };
    };
    let Some(verb) = words.next().filter(|word| !word.is_empty()) else {
        return CommandParseError::CommandMissing { tag: Some(tag) };
    };
    let name = verb.to_ascii_uppercase();
    if KNOWN_VERBS.contains(&name.as_str()) {
        CommandParseError::CommandInvalid { tag, name }
    } else {
        CommandParseError::CommandNotFound { tag, name }
    }
}

fn trim_crlf(input: &[u8]) -> &[u8] {
    let input = input.strip_suffix(b"\n").unwrap_or(input);
    input.strip_suffix(b"\r").unwrap_or(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_verb_recovers_tag() {
        let err = parse_command(b"a1 BOGUS\r\n").unwrap_err();
        assert_eq!(
            err,
            CommandParseError::CommandNotFound {
                tag: Tag::try_from("a1").unwrap(),
                name: "BOGUS".into(),
            }
        );
    }

    #[test]
    fn known_verb_with_bad_arguments() {
        let err = parse_command(b"a1 FETCH\r\n").unwrap_err();
        assert_eq!(
            err,
            CommandParseError::CommandInvalid {
                tag: Tag::try_from("a1").unwrap(),
                name: "FETCH".into(),
            }
        );
    }

    #[test]
    fn missing_verb_keeps_tag_when_present() {
        assert_eq!(
            parse_command(b"\r\n").unwrap_err(),
            CommandParseError::CommandMissing { tag: None }
        );
        assert_eq!(
            parse_command(b"lonely\r\n").unwrap_err(),
            CommandParseError::CommandMissing {
                tag: Some(Tag::try_from("lonely").unwrap())
            }
        );
    }
}

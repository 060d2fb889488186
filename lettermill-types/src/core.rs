//! Core IMAP string primitives.
//!
//! See <https://tools.ietf.org/html/rfc3501#section-4>.

use std::borrow::Cow;
use std::fmt::{Display, Formatter};

use thiserror::Error;

/// Error raised when constructing a core primitive from invalid input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("value must not be empty")]
    Empty,
    #[error("value contains a byte not allowed here")]
    InvalidByte,
}

/// `ATOM-CHAR = <any CHAR except atom-specials>`
pub fn is_atom_char(b: u8) -> bool {
    matches!(b, 0x21..=0x7e) && !is_atom_specials(b)
}

/// `atom-specials = "(" / ")" / "{" / SP / CTL / list-wildcards / quoted-specials / resp-specials`
pub fn is_atom_specials(b: u8) -> bool {
    matches!(b, b'(' | b')' | b'{' | b' ' | b'%' | b'*' | b'"' | b'\\' | b']') || b < 0x20
}

/// `ASTRING-CHAR = ATOM-CHAR / resp-specials`
pub fn is_astring_char(b: u8) -> bool {
    is_atom_char(b) || b == b']'
}

/// `TEXT-CHAR = %x01-09 / %x0B-0C / %x0E-7F`
pub fn is_text_char(b: u8) -> bool {
    matches!(b, 0x01..=0x09 | 0x0b..=0x0c | 0x0e..=0x7f)
}

/// Client-chosen command identifier, echoed on the tagged response.
///
/// `tag = 1*<any ASTRING-CHAR except "+">`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Tag(String);

impl Tag {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Construct without validation. Only for input already matched by the
    /// wire parser.
    pub fn unvalidated(value: impl Into<String>) -> Self {
        Self(value.into())
    }
}

impl TryFrom<&str> for Tag {
    type Error = ValidationError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        if value.is_empty() {
            return Err(ValidationError::Empty);
        }
        if !value
            .bytes()
            .all(|b| is_astring_char(b) && b != b'+')
        {
            return Err(ValidationError::InvalidByte);
        }
        Ok(Self(value.to_owned()))
    }
}

impl Display for Tag {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// `atom = 1*ATOM-CHAR`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Atom(String);

impl Atom {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn unvalidated(value: impl Into<String>) -> Self {
        Self(value.into())
    }
}

impl TryFrom<&str> for Atom {
    type Error = ValidationError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        if value.is_empty() {
            return Err(ValidationError::Empty);
        }
        if !value.bytes().all(is_atom_char) {
            return Err(ValidationError::InvalidByte);
        }
        Ok(Self(value.to_owned()))
    }
}

impl Display for Atom {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// `string = quoted / literal`
///
/// The variant records how the value arrived (or should leave) on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IString {
    Quoted(String),
    Literal(Vec<u8>),
}

impl IString {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Quoted(s) => s.as_bytes(),
            Self::Literal(b) => b,
        }
    }
}

/// `astring = 1*ASTRING-CHAR / string`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AString {
    Atom(String),
    String(IString),
}

impl AString {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Atom(s) => s.as_bytes(),
            Self::String(s) => s.as_bytes(),
        }
    }

    /// Lossy UTF-8 view, the form used for mailbox names and header fields.
    pub fn to_text(&self) -> Cow<str> {
        String::from_utf8_lossy(self.as_bytes())
    }
}

/// `nstring = string / nil`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct NString(pub Option<IString>);

impl NString {
    pub fn as_bytes(&self) -> Option<&[u8]> {
        self.0.as_ref().map(IString::as_bytes)
    }
}

/// `charset = atom / quoted`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Charset(pub String);

impl Display for Charset {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Escape `"` and `\` for inclusion in a quoted string.
pub fn escape_quoted(unescaped: &str) -> Cow<str> {
    if unescaped.contains('\\') || unescaped.contains('"') {
        Cow::Owned(
            unescaped
                .replace('\\', "\\\\")
                .replace('"', "\\\""),
        )
    } else {
        Cow::Borrowed(unescaped)
    }
}

/// Undo [`escape_quoted`].
pub fn unescape_quoted(escaped: &str) -> Cow<str> {
    if escaped.contains('\\') {
        Cow::Owned(escaped.replace("\\\"", "\"").replace("\\\\", "\\"))
    } else {
        Cow::Borrowed(escaped)
    }
}

/// Whether `value` can travel as a quoted string, or needs a literal.
pub fn is_quotable(value: &[u8]) -> bool {
    value.iter().all(|&b| is_text_char(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_rejects_plus_and_empty() {
        assert!(Tag::try_from("a1").is_ok());
        assert!(Tag::try_from("").is_err());
        assert!(Tag::try_from("a+b").is_err());
        assert!(Tag::try_from("a b").is_err());
    }

    #[test]
    fn escape_roundtrip() {
        let raw = r#"Hello "World" \ test"#;
        let escaped = escape_quoted(raw);
        assert_eq!(unescape_quoted(&escaped), raw);
    }

    #[test]
    fn atom_chars() {
        assert!(Atom::try_from("INBOX").is_ok());
        assert!(Atom::try_from("with space").is_err());
        assert!(Atom::try_from("br{ce").is_err());
    }
}

//! FETCH attributes, body sections and the per-message response items.

use crate::core::NString;
use crate::datetime::DateTime;
use crate::flag::Flag;

/// `section-part = nz-number *("." nz-number)` — a numbered MIME part path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Part(pub Vec<u32>);

impl Part {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// `section = "[" [section-spec] "]"`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Section {
    /// `BODY[1.2]`
    Part(Part),
    /// `BODY[HEADER]` / `BODY[1.HEADER]`
    Header(Option<Part>),
    /// `BODY[HEADER.FIELDS (...)]`
    HeaderFields(Option<Part>, Vec<String>),
    /// `BODY[HEADER.FIELDS.NOT (...)]`
    HeaderFieldsNot(Option<Part>, Vec<String>),
    /// `BODY[TEXT]` / `BODY[1.TEXT]`
    Text(Option<Part>),
    /// `BODY[1.MIME]`
    Mime(Part),
}

/// A single FETCH request attribute.
///
/// `fetch-att = "ENVELOPE" / "FLAGS" / "INTERNALDATE" / "RFC822" [".HEADER" / ".SIZE" / ".TEXT"] /
///              "BODY" ["STRUCTURE"] / "UID" / "BODY" section ["<" number "." nz-number ">"] /
///              "BODY.PEEK" section ["<" number "." nz-number ">"]`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FetchAttribute {
    Body,
    BodyExt {
        section: Option<Section>,
        partial: Option<(u32, u32)>,
        peek: bool,
    },
    BodyStructure,
    Envelope,
    Flags,
    InternalDate,
    Rfc822,
    Rfc822Header,
    Rfc822Size,
    Rfc822Text,
    Uid,
    Binary {
        part: Part,
        partial: Option<(u32, u32)>,
        peek: bool,
    },
    BinarySize {
        part: Part,
    },
}

impl FetchAttribute {
    /// Whether handling this attribute implicitly sets `\Seen`.
    pub fn sets_seen(&self) -> bool {
        match self {
            Self::BodyExt { peek, .. } | Self::Binary { peek, .. } => !peek,
            Self::Rfc822 | Self::Rfc822Text => true,
            _ => false,
        }
    }
}

/// `"ALL" / "FULL" / "FAST"`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Macro {
    All,
    Fast,
    Full,
}

impl Macro {
    pub fn expand(&self) -> Vec<FetchAttribute> {
        use FetchAttribute::*;

        match self {
            Self::All => vec![Flags, InternalDate, Rfc822Size, Envelope],
            Self::Fast => vec![Flags, InternalDate, Rfc822Size],
            Self::Full => vec![Flags, InternalDate, Rfc822Size, Envelope, Body],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MacroOrFetchAttributes {
    Macro(Macro),
    FetchAttributes(Vec<FetchAttribute>),
}

impl MacroOrFetchAttributes {
    pub fn resolve(self) -> Vec<FetchAttribute> {
        match self {
            Self::Macro(m) => m.expand(),
            Self::FetchAttributes(attrs) => attrs,
        }
    }
}

/// `env-from`, `env-to`, ... entries.
///
/// `address = "(" addr-name SP addr-adl SP addr-mailbox SP addr-host ")"`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Address {
    pub name: NString,
    pub adl: NString,
    pub mailbox: NString,
    pub host: NString,
}

/// `envelope = "(" env-date SP env-subject SP env-from SP env-sender SP env-reply-to SP env-to SP
///              env-cc SP env-bcc SP env-in-reply-to SP env-message-id ")"`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Envelope {
    pub date: NString,
    pub subject: NString,
    pub from: Vec<Address>,
    pub sender: Vec<Address>,
    pub reply_to: Vec<Address>,
    pub to: Vec<Address>,
    pub cc: Vec<Address>,
    pub bcc: Vec<Address>,
    pub in_reply_to: NString,
    pub message_id: NString,
}

/// Body structure reported for FETCH `BODY`/`BODYSTRUCTURE`.
///
/// The bundled backend only produces single-part structures; the type keeps
/// the multipart shape for backends that compute real MIME trees.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BodyStructure {
    Single {
        media_type: String,
        media_subtype: String,
        parameters: Vec<(String, String)>,
        id: NString,
        description: NString,
        encoding: String,
        size: u32,
        /// Line count, only present for `text/*` bodies.
        lines: Option<u32>,
    },
    Multi {
        parts: Vec<BodyStructure>,
        media_subtype: String,
    },
}

/// One item inside an untagged `FETCH` response.
///
/// `msg-att = "(" (msg-att-dynamic / msg-att-static) *(SP (msg-att-dynamic / msg-att-static)) ")"`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageDataItem {
    Uid(u32),
    Flags(Vec<Flag>),
    InternalDate(Option<DateTime>),
    Rfc822Size(u32),
    Envelope(Envelope),
    Body(BodyStructure),
    BodyStructure(BodyStructure),
    /// `BODY[section]<origin>` with a literal (or NIL) payload.
    BodyExt {
        section: Option<Section>,
        origin: Option<u32>,
        data: Option<Vec<u8>>,
    },
    Rfc822(Option<Vec<u8>>),
    Rfc822Header(Option<Vec<u8>>),
    Rfc822Text(Option<Vec<u8>>),
    /// `BINARY[part]` with a literal8 payload.
    Binary {
        part: Part,
        data: Option<Vec<u8>>,
    },
    BinarySize {
        part: Part,
        size: u32,
    },
}

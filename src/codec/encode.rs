//! Response serialization.
//!
//! One [`Encoder`] impl per wire surface; everything lands in a `Vec<u8>`
//! so a whole response can be flushed as one write.

use lettermill_types::core::{escape_quoted, is_astring_char, is_quotable};
use lettermill_types::fetch::{
    Address, BodyStructure, Envelope, MessageDataItem, Part, Section,
};
use lettermill_types::flag::Flag;
use lettermill_types::response::{
    Capability, Code, Condition, Data, Response, ResponseTag, Untagged,
};

pub trait Encoder {
    fn encode(&self, out: &mut Vec<u8>);
}

/// Serialize a complete response: untagged children first, final line last.
pub fn encode_response(response: &Response) -> Vec<u8> {
    let mut out = Vec::new();
    for untagged in &response.untagged {
        encode_untagged_line(untagged, &mut out);
    }
    match &response.tag {
        ResponseTag::Tagged(tag) => out.extend_from_slice(tag.as_str().as_bytes()),
        ResponseTag::Untagged => out.push(b'*'),
        ResponseTag::Continuation => out.push(b'+'),
    }
    out.push(b' ');
    if let Some(condition) = response.condition {
        encode_condition(condition, response.code.as_ref(), &response.text, &mut out);
    } else {
        out.extend_from_slice(response.text.as_bytes());
    }
    out.extend_from_slice(b"\r\n");
    out
}

/// One untagged line, CRLF included.
pub fn encode_untagged_line(untagged: &Untagged, out: &mut Vec<u8>) {
    out.extend_from_slice(b"* ");
    match untagged {
        Untagged::Data(data) => data.encode(out),
        Untagged::Status {
            condition,
            code,
            text,
        } => encode_condition(*condition, code.as_ref(), text, out),
    }
    out.extend_from_slice(b"\r\n");
}

fn encode_condition(
    condition: Condition,
    code: Option<&Code>,
    text: &str,
    out: &mut Vec<u8>,
) {
    out.extend_from_slice(condition.to_string().as_bytes());
    out.push(b' ');
    if let Some(code) = code {
        out.push(b'[');
        code.encode(out);
        out.extend_from_slice(b"] ");
    }
    out.extend_from_slice(text.as_bytes());
}

impl Encoder for Code {
    fn encode(&self, out: &mut Vec<u8>) {
        match self {
            Self::Alert => out.extend_from_slice(b"ALERT"),
            Self::Capability(capabilities) => {
                out.extend_from_slice(b"CAPABILITY");
                for capability in capabilities {
                    out.push(b' ');
                    capability.encode(out);
                }
            }
            Self::Parse => out.extend_from_slice(b"PARSE"),
            Self::PermanentFlags(flags) => {
                out.extend_from_slice(b"PERMANENTFLAGS (");
                join(out, flags.iter(), |flag, out| {
                    out.extend_from_slice(flag.to_string().as_bytes())
                });
                out.push(b')');
            }
            Self::ReadOnly => out.extend_from_slice(b"READ-ONLY"),
            Self::ReadWrite => out.extend_from_slice(b"READ-WRITE"),
            Self::TryCreate => out.extend_from_slice(b"TRYCREATE"),
            Self::UidNext(n) => {
                out.extend_from_slice(format!("UIDNEXT {n}").as_bytes())
            }
            Self::UidValidity(n) => {
                out.extend_from_slice(format!("UIDVALIDITY {n}").as_bytes())
            }
            Self::Unseen(n) => {
                out.extend_from_slice(format!("UNSEEN {n}").as_bytes())
            }
            Self::AppendUid { validity, uids } => out.extend_from_slice(
                format!("APPENDUID {validity} {uids}").as_bytes(),
            ),
            Self::CopyUid {
                validity,
                source,
                destination,
            } => out.extend_from_slice(
                format!("COPYUID {validity} {source} {destination}").as_bytes(),
            ),
            Self::ExpungeIssued => out.extend_from_slice(b"EXPUNGEISSUED"),
            Self::Timeout => out.extend_from_slice(b"TIMEOUT"),
            Self::ServerBug => out.extend_from_slice(b"SERVERBUG"),
            Self::Unavailable => out.extend_from_slice(b"UNAVAILABLE"),
            Self::Nonexistent => out.extend_from_slice(b"NONEXISTENT"),
            Self::AlreadyExists => out.extend_from_slice(b"ALREADYEXISTS"),
            Self::Cannot => out.extend_from_slice(b"CANNOT"),
            Self::Other(word) => out.extend_from_slice(word.as_bytes()),
        }
    }
}

impl Encoder for Capability {
    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.to_string().as_bytes());
    }
}

impl Encoder for Data {
    fn encode(&self, out: &mut Vec<u8>) {
        match self {
            Self::Capability(capabilities) => {
                out.extend_from_slice(b"CAPABILITY");
                for capability in capabilities {
                    out.push(b' ');
                    capability.encode(out);
                }
            }
            Self::List {
                attributes,
                delimiter,
                mailbox,
            }
            | Self::Lsub {
                attributes,
                delimiter,
                mailbox,
            } => {
                out.extend_from_slice(match self {
                    Self::List { .. } => b"LIST (",
                    _ => b"LSUB (",
                });
                join(out, attributes.iter(), |attr, out| {
                    out.extend_from_slice(attr.to_string().as_bytes())
                });
                out.extend_from_slice(b") ");
                match delimiter {
                    Some(delimiter) => {
                        out.push(b'"');
                        if *delimiter == '"' || *delimiter == '\\' {
                            out.push(b'\\');
                        }
                        out.extend_from_slice(
                            delimiter.to_string().as_bytes(),
                        );
                        out.push(b'"');
                    }
                    None => out.extend_from_slice(b"NIL"),
                }
                out.push(b' ');
                encode_mailbox(mailbox.as_str(), out);
            }
            Self::Status { mailbox, items } => {
                out.extend_from_slice(b"STATUS ");
                encode_mailbox(mailbox.as_str(), out);
                out.extend_from_slice(b" (");
                join(out, items.iter(), |item, out| {
                    out.extend_from_slice(
                        format!("{} {}", item.attribute, item.value).as_bytes(),
                    )
                });
                out.push(b')');
            }
            Self::Search(ids) => {
                out.extend_from_slice(b"SEARCH");
                for id in ids {
                    out.extend_from_slice(format!(" {id}").as_bytes());
                }
            }
            Self::Flags(flags) => {
                out.extend_from_slice(b"FLAGS (");
                join(out, flags.iter(), |flag, out| {
                    out.extend_from_slice(flag.to_string().as_bytes())
                });
                out.push(b')');
            }
            Self::Exists(n) => {
                out.extend_from_slice(format!("{n} EXISTS").as_bytes())
            }
            Self::Recent(n) => {
                out.extend_from_slice(format!("{n} RECENT").as_bytes())
            }
            Self::Expunge(n) => {
                out.extend_from_slice(format!("{n} EXPUNGE").as_bytes())
            }
            Self::Fetch { seq, items } => {
                out.extend_from_slice(format!("{seq} FETCH (").as_bytes());
                join(out, items.iter(), |item, out| item.encode(out));
                out.push(b')');
            }
            Self::Id { parameters } => {
                out.extend_from_slice(b"ID ");
                match parameters {
                    None => out.extend_from_slice(b"NIL"),
                    Some(parameters) => {
                        out.push(b'(');
                        join(out, parameters.iter(), |(field, value), out| {
                            encode_quoted(field, out);
                            out.push(b' ');
                            match value {
                                Some(value) => encode_quoted(value, out),
                                None => out.extend_from_slice(b"NIL"),
                            }
                        });
                        out.push(b')');
                    }
                }
            }
        }
    }
}

impl Encoder for MessageDataItem {
    fn encode(&self, out: &mut Vec<u8>) {
        match self {
            Self::Uid(uid) => {
                out.extend_from_slice(format!("UID {uid}").as_bytes())
            }
            Self::Flags(flags) => {
                out.extend_from_slice(b"FLAGS (");
                join(out, flags.iter(), |flag: &Flag, out| {
                    out.extend_from_slice(flag.to_string().as_bytes())
                });
                out.push(b')');
            }
            Self::InternalDate(date) => {
                out.extend_from_slice(b"INTERNALDATE ");
                match date {
                    Some(date) => {
                        out.push(b'"');
                        out.extend_from_slice(date.to_string().as_bytes());
                        out.push(b'"');
                    }
                    None => out.extend_from_slice(b"NIL"),
                }
            }
            Self::Rfc822Size(size) => {
                out.extend_from_slice(format!("RFC822.SIZE {size}").as_bytes())
            }
            Self::Envelope(envelope) => {
                out.extend_from_slice(b"ENVELOPE ");
                envelope.encode(out);
            }
            Self::Body(structure) => {
                out.extend_from_slice(b"BODY ");
                structure.encode(out);
            }
            Self::BodyStructure(structure) => {
                out.extend_from_slice(b"BODYSTRUCTURE ");
                structure.encode(out);
            }
            Self::BodyExt {
                section,
                origin,
                data,
            } => {
                out.extend_from_slice(b"BODY[");
                if let Some(section) = section {
                    section.encode(out);
                }
                out.push(b']');
                if let Some(origin) = origin {
                    out.extend_from_slice(format!("<{origin}>").as_bytes());
                }
                out.push(b' ');
                encode_literal_or_nil(data.as_deref(), false, out);
            }
            Self::Rfc822(data) => {
                out.extend_from_slice(b"RFC822 ");
                encode_literal_or_nil(data.as_deref(), false, out);
            }
            Self::Rfc822Header(data) => {
                out.extend_from_slice(b"RFC822.HEADER ");
                encode_literal_or_nil(data.as_deref(), false, out);
            }
            Self::Rfc822Text(data) => {
                out.extend_from_slice(b"RFC822.TEXT ");
                encode_literal_or_nil(data.as_deref(), false, out);
            }
            Self::Binary { part, data } => {
                out.extend_from_slice(b"BINARY[");
                encode_part(part, out);
                out.extend_from_slice(b"] ");
                encode_literal_or_nil(data.as_deref(), true, out);
            }
            Self::BinarySize { part, size } => {
                out.extend_from_slice(b"BINARY.SIZE[");
                encode_part(part, out);
                out.extend_from_slice(format!("] {size}").as_bytes());
            }
        }
    }
}

impl Encoder for Section {
    fn encode(&self, out: &mut Vec<u8>) {
        match self {
            Self::Part(part) => encode_part(part, out),
            Self::Header(part) => {
                encode_part_prefix(part.as_ref(), out);
                out.extend_from_slice(b"HEADER");
            }
            Self::HeaderFields(part, fields) => {
                encode_part_prefix(part.as_ref(), out);
                out.extend_from_slice(b"HEADER.FIELDS (");
                join(out, fields.iter(), |field, out| {
                    encode_astring(field, out)
                });
                out.push(b')');
            }
            Self::HeaderFieldsNot(part, fields) => {
                encode_part_prefix(part.as_ref(), out);
                out.extend_from_slice(b"HEADER.FIELDS.NOT (");
                join(out, fields.iter(), |field, out| {
                    encode_astring(field, out)
                });
                out.push(b')');
            }
            Self::Text(part) => {
                encode_part_prefix(part.as_ref(), out);
                out.extend_from_slice(b"TEXT");
            }
            Self::Mime(part) => {
                encode_part(part, out);
                out.extend_from_slice(b".MIME");
            }
        }
    }
}

impl Encoder for Envelope {
    fn encode(&self, out: &mut Vec<u8>) {
        out.push(b'(');
        encode_nstring(self.date.as_bytes(), out);
        out.push(b' ');
        encode_nstring(self.subject.as_bytes(), out);
        for addresses in [
            &self.from,
            &self.sender,
            &self.reply_to,
            &self.to,
            &self.cc,
            &self.bcc,
        ] {
            out.push(b' ');
            if addresses.is_empty() {
                out.extend_from_slice(b"NIL");
            } else {
                out.push(b'(');
                for address in addresses {
                    address.encode(out);
                }
                out.push(b')');
            }
        }
        out.push(b' ');
        encode_nstring(self.in_reply_to.as_bytes(), out);
        out.push(b' ');
        encode_nstring(self.message_id.as_bytes(), out);
        out.push(b')');
    }
}

impl Encoder for Address {
    fn encode(&self, out: &mut Vec<u8>) {
        out.push(b'(');
        encode_nstring(self.name.as_bytes(), out);
        out.push(b' ');
        encode_nstring(self.adl.as_bytes(), out);
        out.push(b' ');
        encode_nstring(self.mailbox.as_bytes(), out);
        out.push(b' ');
        encode_nstring(self.host.as_bytes(), out);
        out.push(b')');
    }
}

impl Encoder for BodyStructure {
    fn encode(&self, out: &mut Vec<u8>) {
        match self {
            Self::Single {
                media_type,
                media_subtype,
                parameters,
                id,
                description,
                encoding,
                size,
                lines,
            } => {
                out.push(b'(');
                encode_quoted(media_type, out);
                out.push(b' ');
                encode_quoted(media_subtype, out);
                out.push(b' ');
                if parameters.is_empty() {
                    out.extend_from_slice(b"NIL");
                } else {
                    out.push(b'(');
                    join(out, parameters.iter(), |(field, value), out| {
                        encode_quoted(field, out);
                        out.push(b' ');
                        encode_quoted(value, out);
                    });
                    out.push(b')');
                }
                out.push(b' ');
                encode_nstring(id.as_bytes(), out);
                out.push(b' ');
                encode_nstring(description.as_bytes(), out);
                out.push(b' ');
                encode_quoted(encoding, out);
                out.extend_from_slice(format!(" {size}").as_bytes());
                if let Some(lines) = lines {
                    out.extend_from_slice(format!(" {lines}").as_bytes());
                }
                out.push(b')');
            }
            Self::Multi {
                parts,
                media_subtype,
            } => {
                out.push(b'(');
                for part in parts {
                    part.encode(out);
                }
                out.push(b' ');
                encode_quoted(media_subtype, out);
                out.push(b')');
            }
        }
    }
}

fn encode_part(part: &Part, out: &mut Vec<u8>) {
    let mut first = true;
    for number in &part.0 {
        if !first {
            out.push(b'.');
        }
        first = false;
        out.extend_from_slice(number.to_string().as_bytes());
    }
}

fn encode_part_prefix(part: Option<&Part>, out: &mut Vec<u8>) {
    if let Some(part) = part {
        encode_part(part, out);
        out.push(b'.');
    }
}

/// `NIL`, or a literal (`{N}` / `~{N}` for literal8) followed by the body.
fn encode_literal_or_nil(data: Option<&[u8]>, binary: bool, out: &mut Vec<u8>) {
    match data {
        None => out.extend_from_slice(b"NIL"),
        Some(data) => {
            if binary {
                out.push(b'~');
            }
            out.extend_from_slice(format!("{{{}}}\r\n", data.len()).as_bytes());
            out.extend_from_slice(data);
        }
    }
}

/// `NIL`, a quoted string when the payload allows it, a literal otherwise.
pub fn encode_nstring(data: Option<&[u8]>, out: &mut Vec<u8>) {
    match data {
        None => out.extend_from_slice(b"NIL"),
        Some(data) => match std::str::from_utf8(data) {
            Ok(text) if is_quotable(data) => encode_quoted(text, out),
            _ => encode_literal_or_nil(Some(data), false, out),
        },
    }
}

pub fn encode_quoted(text: &str, out: &mut Vec<u8>) {
    out.push(b'"');
    out.extend_from_slice(escape_quoted(text).as_bytes());
    out.push(b'"');
}

/// Bare atom when possible, quoted or literal otherwise.
pub fn encode_astring(value: &str, out: &mut Vec<u8>) {
    if !value.is_empty() && value.bytes().all(is_astring_char) {
        out.extend_from_slice(value.as_bytes());
    } else if is_quotable(value.as_bytes()) {
        encode_quoted(value, out);
    } else {
        encode_literal_or_nil(Some(value.as_bytes()), false, out);
    }
}

pub fn encode_mailbox(name: &str, out: &mut Vec<u8>) {
    encode_astring(name, out);
}

fn join<T>(
    out: &mut Vec<u8>,
    items: impl Iterator<Item = T>,
    mut encode: impl FnMut(T, &mut Vec<u8>),
) {
    let mut first = true;
    for item in items {
        if !first {
            out.push(b' ');
        }
        first = false;
        encode(item, out);
    }
}

#[cfg(test)]
mod tests {
    use lettermill_types::core::Tag;
    use lettermill_types::response::Response;
    use lettermill_types::sequence::SequenceSet;
    use pretty_assertions::assert_eq;

    use super::*;

    fn tag(value: &str) -> Tag {
        Tag::try_from(value).unwrap()
    }

    fn encoded(response: &Response) -> String {
        String::from_utf8(encode_response(response)).unwrap()
    }

    #[test]
    fn tagged_ok_with_code() {
        let response = Response::ok(tag("select1"), "Selected mailbox.")
            .with_code(Code::ReadWrite);
        assert_eq!(
            encoded(&response),
            "select1 OK [READ-WRITE] Selected mailbox.\r\n"
        );
    }

    #[test]
    fn untagged_children_precede_the_tagged_line() {
        let mut response = Response::ok(tag("noop1"), "NOOP completed.");
        response.add_untagged(Data::Exists(5));
        response.add_untagged(Data::Recent(2));
        assert_eq!(
            encoded(&response),
            "* 5 EXISTS\r\n* 2 RECENT\r\nnoop1 OK NOOP completed.\r\n"
        );
    }

    #[test]
    fn copyuid_merges_consecutive_runs() {
        let code = Code::CopyUid {
            validity: 4200,
            source: SequenceSet::from_values([101, 102, 103]).unwrap(),
            destination: SequenceSet::from_values([201, 202, 203]).unwrap(),
        };
        let response =
            Response::ok(tag("copy1"), "COPY completed.").with_code(code);
        assert_eq!(
            encoded(&response),
            "copy1 OK [COPYUID 4200 101:103 201:203] COPY completed.\r\n"
        );
    }

    #[test]
    fn fetch_with_literal_body() {
        let mut response = Response::ok(tag("f1"), "FETCH completed.");
        response.add_untagged(Data::Fetch {
            seq: 1,
            items: vec![
                MessageDataItem::Uid(101),
                MessageDataItem::BodyExt {
                    section: None,
                    origin: None,
                    data: Some(b"abc".to_vec()),
                },
            ],
        });
        assert_eq!(
            encoded(&response),
            "* 1 FETCH (UID 101 BODY[] {3}\r\nabc)\r\nf1 OK FETCH completed.\r\n"
        );
    }

    #[test]
    fn continuation_line() {
        assert_eq!(
            encoded(&Response::continuation("Idling.")),
            "+ Idling.\r\n"
        );
    }

    #[test]
    fn greeting_with_capabilities() {
        let response = Response::greeting(Condition::Ok, "Server ready host")
            .with_code(Code::Capability(vec![
                Capability::Imap4rev1,
                Capability::Auth("PLAIN".into()),
            ]));
        assert_eq!(
            encoded(&response),
            "* OK [CAPABILITY IMAP4rev1 AUTH=PLAIN] Server ready host\r\n"
        );
    }
}

//! Pure functions over raw message bytes.
//!
//! Everything FETCH needs from a message body is computed here: header/body
//! split, header filtering, envelope and body-structure derivation, and
//! content-transfer-encoding decode for the BINARY attributes. No state, no
//! IO; backends feed bytes in and wire values come out.

use lettermill_types::core::{IString, NString};
use lettermill_types::fetch::{Address, BodyStructure, Envelope, Part, Section};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

/// Split a message at the first blank line. The header half keeps its
/// terminating blank line, matching what `BODY[HEADER]` returns.
pub fn split_message(message: &[u8]) -> (&[u8], &[u8]) {
    if let Some(pos) = find(message, b"\r\n\r\n") {
        message.split_at(pos + 4)
    } else if let Some(pos) = find(message, b"\n\n") {
        message.split_at(pos + 2)
    } else {
        (message, &[])
    }
}

/// Header fields as `(name, unfolded value)` pairs, in order.
pub fn parse_headers(header: &[u8]) -> Vec<(String, String)> {
    let mut fields: Vec<(String, String)> = Vec::new();
    for line in header.split(|&b| b == b'\n') {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.is_empty() {
            break;
        }
        if line[0] == b' ' || line[0] == b'\t' {
            if let Some((_, value)) = fields.last_mut() {
                value.push(' ');
                value.push_str(String::from_utf8_lossy(line).trim());
            }
            continue;
        }
        let Some(colon) = line.iter().position(|&b| b == b':') else {
            continue;
        };
        let name = String::from_utf8_lossy(&line[..colon]).trim().to_owned();
        let value = String::from_utf8_lossy(&line[colon + 1..])
            .trim()
            .to_owned();
        fields.push((name, value));
    }
    fields
}

/// First value of the named header, case-insensitive.
pub fn header_value(header: &[u8], name: &str) -> Option<String> {
    parse_headers(header)
        .into_iter()
        .find(|(field, _)| field.eq_ignore_ascii_case(name))
        .map(|(_, value)| value)
}

/// The raw lines of the selected (or deselected) header fields, blank line
/// appended, as `BODY[HEADER.FIELDS (...)]` requires.
pub fn filter_headers(header: &[u8], fields: &[String], negate: bool) -> Vec<u8> {
    let mut out = Vec::new();
    let mut keeping = false;
    for line in header.split_inclusive(|&b| b == b'\n') {
        let bare = line.strip_suffix(b"\n").unwrap_or(line);
        let bare = bare.strip_suffix(b"\r").unwrap_or(bare);
        if bare.is_empty() {
            break;
        }
        if bare[0] == b' ' || bare[0] == b'\t' {
            if keeping {
                out.extend_from_slice(line);
            }
            continue;
        }
        let name = bare
            .iter()
            .position(|&b| b == b':')
            .map(|colon| String::from_utf8_lossy(&bare[..colon]).trim().to_owned())
            .unwrap_or_default();
        let listed = fields
            .iter()
            .any(|field| field.eq_ignore_ascii_case(&name));
        keeping = listed != negate;
        if keeping {
            out.extend_from_slice(line);
        }
    }
    out.extend_from_slice(b"\r\n");
    out
}

/// Extract the bytes a `BODY[section]` requests, or `None` for parts the
/// message does not have.
pub fn section_bytes(message: &[u8], section: Option<&Section>) -> Option<Vec<u8>> {
    let (header, text) = split_message(message);
    match section {
        None => Some(message.to_vec()),
        Some(Section::Header(part)) => {
            part_is_whole(part.as_ref())?;
            Some(header.to_vec())
        }
        Some(Section::HeaderFields(part, fields)) => {
            part_is_whole(part.as_ref())?;
            Some(filter_headers(header, fields, false))
        }
        Some(Section::HeaderFieldsNot(part, fields)) => {
            part_is_whole(part.as_ref())?;
            Some(filter_headers(header, fields, true))
        }
        Some(Section::Text(part)) => {
            part_is_whole(part.as_ref())?;
            Some(text.to_vec())
        }
        Some(Section::Part(part)) => {
            // A non-multipart message has exactly one part, number 1.
            if part.0 == [1] {
                Some(text.to_vec())
            } else {
                None
            }
        }
        Some(Section::Mime(part)) => {
            if part.0 == [1] {
                Some(header.to_vec())
            } else {
                None
            }
        }
    }
}

fn part_is_whole(part: Option<&Part>) -> Option<()> {
    match part {
        None => Some(()),
        Some(part) if part.0.is_empty() => Some(()),
        Some(_) => None,
    }
}

/// Apply an origin/size window, as `BODY[...]<origin.size>` requests.
pub fn apply_partial(data: Vec<u8>, partial: Option<(u32, u32)>) -> Vec<u8> {
    match partial {
        None => data,
        Some((origin, size)) => {
            let start = (origin as usize).min(data.len());
            let end = (start + size as usize).min(data.len());
            data[start..end].to_vec()
        }
    }
}

/// Decode the named content-transfer-encoding; unknown encodings and decode
/// failures fall back to the raw bytes.
pub fn decode_transfer_encoding(encoding: &str, data: &[u8]) -> Vec<u8> {
    match encoding.to_ascii_lowercase().as_str() {
        "base64" => {
            let compact: Vec<u8> = data
                .iter()
                .copied()
                .filter(|b| !b.is_ascii_whitespace())
                .collect();
            BASE64.decode(&compact).unwrap_or_else(|_| data.to_vec())
        }
        "quoted-printable" => decode_quoted_printable(data),
        _ => data.to_vec(),
    }
}

fn decode_quoted_printable(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut bytes = data.iter().copied().peekable();
    while let Some(byte) = bytes.next() {
        if byte != b'=' {
            out.push(byte);
            continue;
        }
        match (bytes.next(), bytes.peek().copied()) {
            // Soft line break.
            (Some(b'\r'), Some(b'\n')) => {
                bytes.next();
            }
            (Some(b'\n'), _) => {}
            (Some(high), Some(low)) => {
                match (hex_value(high), hex_value(low)) {
                    (Some(high), Some(low)) => {
                        bytes.next();
                        out.push(high << 4 | low);
                    }
                    _ => {
                        out.push(b'=');
                        out.push(high);
                    }
                }
            }
            (Some(other), None) => {
                out.push(b'=');
                out.push(other);
            }
            (None, _) => out.push(b'='),
        }
    }
    out
}

fn hex_value(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        _ => None,
    }
}

/// Decoded octet count for `BINARY.SIZE`.
pub fn binary_size(message: &[u8], part: &Part) -> Option<u32> {
    let data = section_bytes(
        message,
        Some(&Section::Part(if part.0.is_empty() {
            Part(vec![1])
        } else {
            part.clone()
        })),
    )?;
    let encoding = transfer_encoding(message);
    Some(decode_transfer_encoding(&encoding, &data).len() as u32)
}

/// Decoded body bytes for `BINARY[part]`.
pub fn binary_bytes(message: &[u8], part: &Part) -> Option<Vec<u8>> {
    let data = if part.0.is_empty() {
        section_bytes(message, None)?
    } else {
        section_bytes(message, Some(&Section::Part(part.clone())))?
    };
    let encoding = transfer_encoding(message);
    Some(decode_transfer_encoding(&encoding, &data))
}

fn transfer_encoding(message: &[u8]) -> String {
    let (header, _) = split_message(message);
    header_value(header, "Content-Transfer-Encoding")
        .unwrap_or_else(|| "7bit".to_owned())
}

/// Derive the ENVELOPE from the message header.
pub fn envelope(message: &[u8]) -> Envelope {
    let (header, _) = split_message(message);
    let field = |name: &str| nstring(header_value(header, name));
    Envelope {
        date: field("Date"),
        subject: field("Subject"),
        from: address_list(header, "From"),
        sender: address_list(header, "Sender"),
        reply_to: address_list(header, "Reply-To"),
        to: address_list(header, "To"),
        cc: address_list(header, "Cc"),
        bcc: address_list(header, "Bcc"),
        in_reply_to: field("In-Reply-To"),
        message_id: field("Message-Id"),
    }
}

fn address_list(header: &[u8], name: &str) -> Vec<Address> {
    let Some(value) = header_value(header, name) else {
        return Vec::new();
    };
    value
        .split(',')
        .filter_map(|candidate| parse_address(candidate.trim()))
        .collect()
}

/// `Display Name <local@host>`, `local@host`, or a bare local part.
fn parse_address(value: &str) -> Option<Address> {
    if value.is_empty() {
        return None;
    }
    let (name, addr_spec) = match (value.find('<'), value.rfind('>')) {
        (Some(open), Some(close)) if open < close => {
            let name = value[..open].trim().trim_matches('"').trim();
            (
                (!name.is_empty()).then(|| name.to_owned()),
                &value[open + 1..close],
            )
        }
        _ => (None, value),
    };
    let (mailbox, host) = match addr_spec.split_once('@') {
        Some((mailbox, host)) => (mailbox.to_owned(), Some(host.to_owned())),
        None => (addr_spec.to_owned(), None),
    };
    Some(Address {
        name: nstring(name),
        adl: NString(None),
        mailbox: nstring(Some(mailbox)),
        host: nstring(host),
    })
}

/// Derive a single-part body structure.
pub fn body_structure(message: &[u8]) -> BodyStructure {
    let (header, text) = split_message(message);
    let content_type = header_value(header, "Content-Type")
        .unwrap_or_else(|| "text/plain; charset=us-ascii".to_owned());
    let mut parts = content_type.split(';');
    let media = parts.next().unwrap_or("text/plain").trim().to_owned();
    let (media_type, media_subtype) = media
        .split_once('/')
        .map(|(t, s)| (t.to_owned(), s.to_owned()))
        .unwrap_or(("text".to_owned(), "plain".to_owned()));
    let parameters: Vec<(String, String)> = parts
        .filter_map(|parameter| {
            let (field, value) = parameter.split_once('=')?;
            Some((
                field.trim().to_uppercase(),
                value.trim().trim_matches('"').to_owned(),
            ))
        })
        .collect();
    let parameters = if parameters.is_empty() && media_type.eq_ignore_ascii_case("text") {
        vec![("CHARSET".to_owned(), "us-ascii".to_owned())]
    } else {
        parameters
    };
    let lines = media_type
        .eq_ignore_ascii_case("text")
        .then(|| text.iter().filter(|&&b| b == b'\n').count() as u32);
    BodyStructure::Single {
        media_type,
        media_subtype,
        parameters,
        id: nstring(header_value(header, "Content-Id")),
        description: nstring(header_value(header, "Content-Description")),
        encoding: transfer_encoding(message),
        size: text.len() as u32,
        lines,
    }
}

fn nstring(value: Option<String>) -> NString {
    NString(value.map(IString::Quoted))
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MESSAGE: &[u8] = b"From: Alice Example <alice@example.com>\r\n\
To: bob@example.com\r\n\
Subject: Re: lunch\r\n\
Message-Id: <m1@example.com>\r\n\
Date: Tue, 01 Jan 2026 10:00:00 +0000\r\n\
\r\n\
See you at noon.\r\n";

    #[test]
    fn split_keeps_blank_line_with_header() {
        let (header, text) = split_message(MESSAGE);
        assert!(header.ends_with(b"\r\n\r\n"));
        assert_eq!(text, b"See you at noon.\r\n");
    }

    #[test]
    fn header_filtering() {
        let (header, _) = split_message(MESSAGE);
        let picked = filter_headers(header, &["Subject".into()], false);
        assert_eq!(picked, b"Subject: Re: lunch\r\n\r\n");

        let dropped = filter_headers(header, &["Subject".into()], true);
        assert!(dropped.starts_with(b"From: "));
        assert!(!dropped.windows(8).any(|w| w == b"Subject:"));
    }

    #[test]
    fn envelope_addresses() {
        let env = envelope(MESSAGE);
        assert_eq!(env.subject.as_bytes(), Some(b"Re: lunch".as_ref()));
        assert_eq!(env.from.len(), 1);
        assert_eq!(
            env.from[0].name.as_bytes(),
            Some(b"Alice Example".as_ref())
        );
        assert_eq!(
            env.from[0].mailbox.as_bytes(),
            Some(b"alice".as_ref())
        );
        assert_eq!(
            env.from[0].host.as_bytes(),
            Some(b"example.com".as_ref())
        );
        assert_eq!(env.to[0].name.as_bytes(), None);
        assert!(env.cc.is_empty());
    }

    #[test]
    fn quoted_printable_decode() {
        assert_eq!(
            decode_transfer_encoding("quoted-printable", b"caf=C3=A9"),
            "café".as_bytes()
        );
        assert_eq!(
            decode_transfer_encoding("quoted-printable", b"a=\r\nb"),
            b"ab"
        );
    }

    #[test]
    fn base64_size_is_decoded_size() {
        let message = b"Content-Transfer-Encoding: base64\r\n\r\naGVsbG8=\r\n";
        assert_eq!(binary_size(message, &Part(vec![])), Some(5));
    }

    #[test]
    fn section_part_of_simple_message() {
        assert_eq!(
            section_bytes(MESSAGE, Some(&Section::Part(Part(vec![1])))),
            Some(b"See you at noon.\r\n".to_vec())
        );
        assert_eq!(
            section_bytes(MESSAGE, Some(&Section::Part(Part(vec![2])))),
            None
        );
    }
}

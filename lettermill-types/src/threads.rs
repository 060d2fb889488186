//! Thread keys.
//!
//! Messages carrying the same `(message id, normalized subject)` pair belong
//! to the same conversation thread.

/// Equality key used to cluster messages into threads.
///
/// The key pairs one message id taken from `Message-Id`, `In-Reply-To` or
/// `References` with a normalized form of the `Subject` header.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ThreadKey {
    pub msg_id: Vec<u8>,
    pub subject: Vec<u8>,
}

impl ThreadKey {
    pub fn new(msg_id: impl Into<Vec<u8>>, subject: impl Into<Vec<u8>>) -> Self {
        Self {
            msg_id: msg_id.into(),
            subject: subject.into(),
        }
    }

    /// All thread keys derivable from the relevant headers of one message.
    pub fn get_all(
        message_id: Option<&str>,
        in_reply_to: Option<&str>,
        references: Option<&str>,
        subject: Option<&str>,
    ) -> Vec<ThreadKey> {
        let subject_key = subject.map(normalize_subject).unwrap_or_default();
        let mut keys = Vec::new();
        if let Some(message_id) = message_id {
            if let Some(id) = angle_ids(message_id).into_iter().next() {
                keys.push(ThreadKey::new(id, subject_key.clone()));
            }
        }
        for header in [in_reply_to, references].into_iter().flatten() {
            for id in angle_ids(header) {
                keys.push(ThreadKey::new(id, subject_key.clone()));
            }
        }
        keys
    }
}

/// Every `<...>` token of a header value, whitespace removed, ASCII-encoded.
fn angle_ids(value: &str) -> Vec<Vec<u8>> {
    let mut ids = Vec::new();
    let mut rest = value;
    while let Some(start) = rest.find('<') {
        let Some(len) = rest[start..].find('>') else {
            break;
        };
        let id: String = rest[start..start + len + 1]
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();
        ids.push(ascii_encode(&id));
        rest = &rest[start + len + 1..];
    }
    ids
}

/// Normalize a subject for threading: strip repeating `re:` / `fwd:` /
/// bracketed list-tag prefixes case-insensitively, collapse inner whitespace
/// to single spaces, then encode to ASCII.
pub fn normalize_subject(subject: &str) -> Vec<u8> {
    let mut value = subject.trim_start();
    loop {
        if let Some(rest) = strip_marker(value, "re") {
            value = rest;
        } else if let Some(rest) = strip_marker(value, "fwd") {
            value = rest;
        } else if let Some(rest) = strip_list_tag(value) {
            value = rest;
        } else {
            break;
        }
    }
    let collapsed = value
        .trim()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    ascii_encode(&collapsed)
}

/// Strip `<marker> *: ` such as `Re:` / `FWD :`.
fn strip_marker<'a>(value: &'a str, marker: &str) -> Option<&'a str> {
    let trimmed = value.trim_start();
    let rest = strip_prefix_ignore_case(trimmed, marker)?;
    let rest = rest.trim_start();
    rest.strip_prefix(':').map(str::trim_start)
}

/// Strip a leading `[list tag]`.
fn strip_list_tag(value: &str) -> Option<&str> {
    let trimmed = value.trim_start();
    let rest = trimmed.strip_prefix('[')?;
    let end = rest.find(']')?;
    Some(rest[end + 1..].trim_start())
}

fn strip_prefix_ignore_case<'a>(value: &'a str, prefix: &str) -> Option<&'a str> {
    if value.len() >= prefix.len()
        && value[..prefix.len()].eq_ignore_ascii_case(prefix)
    {
        Some(&value[prefix.len()..])
    } else {
        None
    }
}

/// Replacement-policy ASCII encoding: non-ASCII characters become `?`.
fn ascii_encode(value: &str) -> Vec<u8> {
    value
        .chars()
        .map(|c| if c.is_ascii() { c as u8 } else { b'?' })
        .collect()
}

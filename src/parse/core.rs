//! Core grammar primitives.

use std::borrow::Cow;
use std::str::from_utf8;

use abnf_core::streaming::{crlf, dquote};
use lettermill_types::core::{
    is_astring_char, is_atom_char, is_text_char, unescape_quoted, AString, Atom,
    Charset, IString, NString, Tag,
};
use nom::{
    branch::alt,
    bytes::streaming::{escaped, tag, tag_no_case, take, take_while1},
    character::streaming::{digit1, one_of},
    combinator::{map, map_res, opt, value},
    sequence::{delimited, terminated, tuple},
    IResult,
};

/// number = 1*DIGIT
///           ; Unsigned 32-bit integer
pub fn number(input: &[u8]) -> IResult<&[u8], u32> {
    map_res(map_res(digit1, from_utf8), str::parse::<u32>)(input)
}

/// nz-number = digit-nz *DIGIT
///              ; Non-zero unsigned 32-bit integer
pub fn nz_number(input: &[u8]) -> IResult<&[u8], u32> {
    let (remaining, number) = number(input)?;

    if number == 0 {
        return Err(nom::Err::Error(nom::error::make_error(
            input,
            nom::error::ErrorKind::Verify,
        )));
    }

    Ok((remaining, number))
}

/// quoted = DQUOTE *QUOTED-CHAR DQUOTE
///
/// Only allocates when escaped characters need replacing.
pub fn quoted(input: &[u8]) -> IResult<&[u8], Cow<str>> {
    let mut parser = tuple((
        dquote,
        map_res(
            opt(escaped(
                take_while1(is_any_text_char_except_quoted_specials),
                '\\',
                one_of("\\\""),
            )),
            |quoted: Option<&[u8]>| from_utf8(quoted.unwrap_or_default()),
        ),
        dquote,
    ));

    let (remaining, (_, quoted, _)) = parser(input)?;

    Ok((remaining, unescape_quoted(quoted)))
}

fn is_any_text_char_except_quoted_specials(byte: u8) -> bool {
    is_text_char(byte) && byte != b'"' && byte != b'\\'
}

/// literal = "{" number ["+"] "}" CRLF *CHAR8
///            ; The wire codec has already inlined the CHAR8s, so the body
///            ; directly follows the marker here. "+" is the LITERAL+ form.
pub fn literal(input: &[u8]) -> IResult<&[u8], &[u8]> {
    let (remaining, length) = terminated(
        delimited(tag(b"{"), terminated(number, opt(tag(b"+"))), tag(b"}")),
        crlf,
    )(input)?;

    let (remaining, data) = take(length)(remaining)?;

    if data.contains(&0x00) {
        return Err(nom::Err::Error(nom::error::make_error(
            remaining,
            nom::error::ErrorKind::Verify,
        )));
    }

    Ok((remaining, data))
}

/// string = quoted / literal
pub fn string(input: &[u8]) -> IResult<&[u8], IString> {
    alt((
        map(quoted, |cow| IString::Quoted(cow.into_owned())),
        map(literal, |bytes| IString::Literal(bytes.to_vec())),
    ))(input)
}

/// atom = 1*ATOM-CHAR
pub fn atom(input: &[u8]) -> IResult<&[u8], Atom> {
    let (remaining, parsed) =
        map_res(take_while1(is_atom_char), from_utf8)(input)?;

    Ok((remaining, Atom::unvalidated(parsed)))
}

/// astring = 1*ASTRING-CHAR / string
pub fn astring(input: &[u8]) -> IResult<&[u8], AString> {
    alt((
        map(
            map_res(take_while1(is_astring_char), from_utf8),
            |atom: &str| AString::Atom(atom.to_owned()),
        ),
        map(string, AString::String),
    ))(input)
}

/// nstring = string / nil
pub fn nstring(input: &[u8]) -> IResult<&[u8], NString> {
    alt((
        map(string, |string| NString(Some(string))),
        map(nil, |_| NString(None)),
    ))(input)
}

/// nil = "NIL"
pub fn nil(input: &[u8]) -> IResult<&[u8], ()> {
    value((), tag_no_case(b"NIL"))(input)
}

/// charset = atom / quoted
pub fn charset(input: &[u8]) -> IResult<&[u8], Charset> {
    alt((
        map(atom, |atom| Charset(atom.as_str().to_owned())),
        map(quoted, |cow| Charset(cow.into_owned())),
    ))(input)
}

/// tag = 1*<any ASTRING-CHAR except "+">
pub fn tag_imap(input: &[u8]) -> IResult<&[u8], Tag> {
    let (remaining, parsed) = map_res(
        take_while1(|b| is_astring_char(b) && b != b'+'),
        from_utf8,
    )(input)?;

    Ok((remaining, Tag::unvalidated(parsed)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_atom() {
        assert!(atom(b" ").is_err());

        let (rem, val) = atom(b"fetch ").unwrap();
        assert_eq!(val.as_str(), "fetch");
        assert_eq!(rem, b" ");
    }

    #[test]
    fn test_quoted() {
        let (rem, val) = quoted(br#""Hello"???"#).unwrap();
        assert_eq!(rem, b"???");
        assert_eq!(val, "Hello");

        let (_, val) = quoted(br#""Hello \"World\"" "#).unwrap();
        assert_eq!(val, r#"Hello "World""#);

        let (rem, val) = quoted(br#""" "#).unwrap();
        assert_eq!(val, "");
        assert_eq!(rem, b" ");

        assert!(quoted(br#""broken \a escape" "#).is_err());
    }

    #[test]
    fn test_literal() {
        let (rem, val) = literal(b"{3}\r\n123xxx").unwrap();
        assert_eq!(rem, b"xxx");
        assert_eq!(val, b"123");

        // LITERAL+ marker is accepted once the body is inline.
        let (rem, val) = literal(b"{3+}\r\nabc ").unwrap();
        assert_eq!(rem, b" ");
        assert_eq!(val, b"abc");

        assert!(literal(b"{3}\r\n1\x003").is_err());
    }

    #[test]
    fn test_nz_number() {
        assert!(nz_number(b"0 ").is_err());
        assert_eq!(nz_number(b"105 ").unwrap().1, 105);
    }

    #[test]
    fn test_astring_forms() {
        let (_, val) = astring(b"INBOX ").unwrap();
        assert_eq!(val.as_bytes(), b"INBOX");

        let (_, val) = astring(b"\"Inbox Test\" ").unwrap();
        assert_eq!(val.as_bytes(), b"Inbox Test");

        let (_, val) = astring(b"{4}\r\nxy z ").unwrap();
        assert_eq!(val.as_bytes(), b"xy z");
    }
}

//! FETCH attribute grammar, sections included.

use lettermill_types::fetch::{
    FetchAttribute, Macro, MacroOrFetchAttributes, Part, Section,
};
use nom::{
    branch::alt,
    bytes::streaming::{tag, tag_no_case},
    combinator::{map, opt, value},
    multi::{separated_list0, separated_list1},
    sequence::{delimited, preceded, separated_pair, tuple},
    IResult,
};

use crate::parse::core::{astring, number, nz_number};
use crate::parse::sp;

/// "ALL" / "FULL" / "FAST" / fetch-att / "(" fetch-att *(SP fetch-att) ")"
pub fn fetch_attributes(input: &[u8]) -> IResult<&[u8], MacroOrFetchAttributes> {
    alt((
        map(fetch_macro, MacroOrFetchAttributes::Macro),
        map(
            delimited(tag(b"("), separated_list0(sp, fetch_att), tag(b")")),
            MacroOrFetchAttributes::FetchAttributes,
        ),
        map(fetch_att, |att| {
            MacroOrFetchAttributes::FetchAttributes(vec![att])
        }),
    ))(input)
}

fn fetch_macro(input: &[u8]) -> IResult<&[u8], Macro> {
    alt((
        value(Macro::All, tag_no_case(b"ALL")),
        value(Macro::Full, tag_no_case(b"FULL")),
        value(Macro::Fast, tag_no_case(b"FAST")),
    ))(input)
}

/// fetch-att = "ENVELOPE" / "FLAGS" / "INTERNALDATE" /
///             "RFC822" [".HEADER" / ".SIZE" / ".TEXT"] /
///             "BODY" ["STRUCTURE"] / "UID" /
///             "BODY" section ["<" number "." nz-number ">"] /
///             "BODY.PEEK" section ["<" number "." nz-number ">"]
///
/// Plus the RFC 3516 `BINARY` attributes.
pub fn fetch_att(input: &[u8]) -> IResult<&[u8], FetchAttribute> {
    alt((
        value(FetchAttribute::Envelope, tag_no_case(b"ENVELOPE")),
        value(FetchAttribute::Flags, tag_no_case(b"FLAGS")),
        value(FetchAttribute::InternalDate, tag_no_case(b"INTERNALDATE")),
        value(FetchAttribute::Rfc822Header, tag_no_case(b"RFC822.HEADER")),
        value(FetchAttribute::Rfc822Size, tag_no_case(b"RFC822.SIZE")),
        value(FetchAttribute::Rfc822Text, tag_no_case(b"RFC822.TEXT")),
        value(FetchAttribute::Rfc822, tag_no_case(b"RFC822")),
        value(FetchAttribute::BodyStructure, tag_no_case(b"BODYSTRUCTURE")),
        value(FetchAttribute::Uid, tag_no_case(b"UID")),
        map(
            tuple((
                tag_no_case(b"BINARY.SIZE"),
                section_binary,
            )),
            |(_, part)| FetchAttribute::BinarySize { part },
        ),
        map(
            tuple((
                tag_no_case(b"BINARY"),
                opt(tag_no_case(b".PEEK")),
                section_binary,
                opt(partial),
            )),
            |(_, peek, part, partial)| FetchAttribute::Binary {
                part,
                partial,
                peek: peek.is_some(),
            },
        ),
        map(
            tuple((
                tag_no_case(b"BODY"),
                opt(tag_no_case(b".PEEK")),
                section,
                opt(partial),
            )),
            |(_, peek, section, partial)| FetchAttribute::BodyExt {
                section,
                partial,
                peek: peek.is_some(),
            },
        ),
        value(FetchAttribute::Body, tag_no_case(b"BODY")),
    ))(input)
}

/// "<" number "." nz-number ">"
fn partial(input: &[u8]) -> IResult<&[u8], (u32, u32)> {
    delimited(
        tag(b"<"),
        separated_pair(number, tag(b"."), nz_number),
        tag(b">"),
    )(input)
}

/// section-part = nz-number *("." nz-number)
fn section_part(input: &[u8]) -> IResult<&[u8], Part> {
    map(separated_list1(tag(b"."), nz_number), Part)(input)
}

/// section-binary = "[" [section-part] "]"
fn section_binary(input: &[u8]) -> IResult<&[u8], Part> {
    map(
        delimited(tag(b"["), opt(section_part), tag(b"]")),
        Option::unwrap_or_default,
    )(input)
}

/// section = "[" [section-spec] "]"
pub fn section(input: &[u8]) -> IResult<&[u8], Option<Section>> {
    delimited(tag(b"["), opt(section_spec), tag(b"]"))(input)
}

/// section-spec = section-msgtext / (section-part ["." section-text])
fn section_spec(input: &[u8]) -> IResult<&[u8], Section> {
    alt((
        map(section_msgtext, |msgtext| msgtext.into_section(None)),
        map(
            tuple((section_part, opt(preceded(tag(b"."), section_text)))),
            |(part, text)| match text {
                Some(SectionText::Mime) => Section::Mime(part),
                Some(SectionText::Msgtext(msgtext)) => {
                    msgtext.into_section(Some(part))
                }
                None => Section::Part(part),
            },
        ),
    ))(input)
}

#[derive(Clone)]
enum Msgtext {
    Header,
    HeaderFields(Vec<String>),
    HeaderFieldsNot(Vec<String>),
    Text,
}

impl Msgtext {
    fn into_section(self, part: Option<Part>) -> Section {
        match self {
            Self::Header => Section::Header(part),
            Self::HeaderFields(fields) => Section::HeaderFields(part, fields),
            Self::HeaderFieldsNot(fields) => {
                Section::HeaderFieldsNot(part, fields)
            }
            Self::Text => Section::Text(part),
        }
    }
}

/// section-msgtext = "HEADER" / "HEADER.FIELDS" [".NOT"] SP header-list / "TEXT"
fn section_msgtext(input: &[u8]) -> IResult<&[u8], Msgtext> {
    alt((
        map(
            preceded(
                tuple((tag_no_case(b"HEADER.FIELDS.NOT"), sp)),
                header_list,
            ),
            Msgtext::HeaderFieldsNot,
        ),
        map(
            preceded(tuple((tag_no_case(b"HEADER.FIELDS"), sp)), header_list),
            Msgtext::HeaderFields,
        ),
        value(Msgtext::Header, tag_no_case(b"HEADER")),
        value(Msgtext::Text, tag_no_case(b"TEXT")),
    ))(input)
}

#[derive(Clone)]
enum SectionText {
    Msgtext(Msgtext),
    Mime,
}

/// section-text = section-msgtext / "MIME"
fn section_text(input: &[u8]) -> IResult<&[u8], SectionText> {
    alt((
        map(section_msgtext, SectionText::Msgtext),
        value(SectionText::Mime, tag_no_case(b"MIME")),
    ))(input)
}

/// header-list = "(" header-fld-name *(SP header-fld-name) ")"
fn header_list(input: &[u8]) -> IResult<&[u8], Vec<String>> {
    delimited(
        tag(b"("),
        separated_list1(
            sp,
            map(astring, |name| name.to_text().into_owned()),
        ),
        tag(b")"),
    )(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_att_simple() {
        assert_eq!(fetch_att(b"UID ").unwrap().1, FetchAttribute::Uid);
        assert_eq!(
            fetch_att(b"RFC822.SIZE ").unwrap().1,
            FetchAttribute::Rfc822Size
        );
        assert_eq!(fetch_att(b"BODY ").unwrap().1, FetchAttribute::Body);
    }

    #[test]
    fn test_body_sections() {
        let (_, att) = fetch_att(b"BODY[] ").unwrap();
        assert_eq!(
            att,
            FetchAttribute::BodyExt {
                section: None,
                partial: None,
                peek: false,
            }
        );

        let (_, att) = fetch_att(b"BODY.PEEK[HEADER] ").unwrap();
        assert_eq!(
            att,
            FetchAttribute::BodyExt {
                section: Some(Section::Header(None)),
                partial: None,
                peek: true,
            }
        );

        let (_, att) =
            fetch_att(b"BODY[HEADER.FIELDS (Subject Date)]<0.100> ").unwrap();
        assert_eq!(
            att,
            FetchAttribute::BodyExt {
                section: Some(Section::HeaderFields(
                    None,
                    vec!["Subject".into(), "Date".into()]
                )),
                partial: Some((0, 100)),
                peek: false,
            }
        );

        let (_, att) = fetch_att(b"BODY[1.2.MIME] ").unwrap();
        assert_eq!(
            att,
            FetchAttribute::BodyExt {
                section: Some(Section::Mime(Part(vec![1, 2]))),
                partial: None,
                peek: false,
            }
        );

        let (_, att) = fetch_att(b"BODY[2.TEXT] ").unwrap();
        assert_eq!(
            att,
            FetchAttribute::BodyExt {
                section: Some(Section::Text(Some(Part(vec![2])))),
                partial: None,
                peek: false,
            }
        );
    }

    #[test]
    fn test_binary() {
        let (_, att) = fetch_att(b"BINARY.PEEK[1]<0.512> ").unwrap();
        assert_eq!(
            att,
            FetchAttribute::Binary {
                part: Part(vec![1]),
                partial: Some((0, 512)),
                peek: true,
            }
        );

        let (_, att) = fetch_att(b"BINARY.SIZE[1.1] ").unwrap();
        assert_eq!(
            att,
            FetchAttribute::BinarySize {
                part: Part(vec![1, 1])
            }
        );
    }

    #[test]
    fn test_attribute_lists_and_macros() {
        let (_, got) = fetch_attributes(b"ALL ").unwrap();
        assert_eq!(got, MacroOrFetchAttributes::Macro(Macro::All));

        let (_, got) = fetch_attributes(b"(FLAGS UID) ").unwrap();
        assert_eq!(
            got,
            MacroOrFetchAttributes::FetchAttributes(vec![
                FetchAttribute::Flags,
                FetchAttribute::Uid,
            ])
        );
    }
}

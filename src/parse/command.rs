//! The command grammar.
//!
//! `command = tag SP (command-any / command-auth / command-nonauth / command-select) CRLF`

use lettermill_types::command::{AppendMessage, Command, CommandBody};
use lettermill_types::core::{is_atom_char, AString};
use lettermill_types::flag::{StoreResponse, StoreType};
use lettermill_types::mailbox::{ListMailbox, Mailbox};
use lettermill_types::status::StatusAttribute;
use nom::{
    branch::alt,
    bytes::streaming::{tag, tag_no_case, take_while1},
    combinator::{map, opt, value},
    multi::{many1, separated_list1},
    sequence::{delimited, preceded, tuple},
    IResult,
};

use crate::parse::core::{
    astring, atom, charset, literal, nil, nstring, string,
};
use crate::parse::datetime::date_time;
use crate::parse::fetch::fetch_attributes;
use crate::parse::flag::{flag, flag_list};
use crate::parse::search::{and_key, search_key};
use crate::parse::sequence::sequence_set;
use crate::parse::{core::tag_imap, crlf, sp};

/// command = tag SP (command-any / command-auth / command-nonauth / command-select) CRLF
pub fn command(input: &[u8]) -> IResult<&[u8], Command> {
    let mut parser = tuple((
        tag_imap,
        sp,
        alt((command_any, command_nonauth, command_auth, command_select)),
        crlf,
    ));

    let (remaining, (tag, _, body, _)) = parser(input)?;

    Ok((remaining, Command::new(tag, body)))
}

/// command-any = "CAPABILITY" / "LOGOUT" / "NOOP" / id
///                ; Valid in all states
fn command_any(input: &[u8]) -> IResult<&[u8], CommandBody> {
    alt((
        value(CommandBody::Capability, tag_no_case(b"CAPABILITY")),
        value(CommandBody::Logout, tag_no_case(b"LOGOUT")),
        value(CommandBody::Noop, tag_no_case(b"NOOP")),
        id,
    ))(input)
}

/// id = "ID" SP id-params-list
/// id-params-list = "(" [string SP nstring *(SP string SP nstring)] ")" / nil
fn id(input: &[u8]) -> IResult<&[u8], CommandBody> {
    let id_pair = map(
        tuple((string, sp, nstring)),
        |(field, _, value)| {
            (
                String::from_utf8_lossy(field.as_bytes()).into_owned(),
                value
                    .as_bytes()
                    .map(|bytes| String::from_utf8_lossy(bytes).into_owned()),
            )
        },
    );
    let params_list = delimited(
        tag(b"("),
        separated_list1(sp, id_pair),
        tag(b")"),
    );

    map(
        preceded(
            tuple((tag_no_case(b"ID"), sp)),
            alt((
                map(params_list, Some),
                map(tag(b"()"), |_| Some(Vec::new())),
                map(nil, |_| None),
            )),
        ),
        |parameters| CommandBody::Id { parameters },
    )(input)
}

/// command-nonauth = login / authenticate / "STARTTLS"
///                    ; Valid only when in Not Authenticated state
fn command_nonauth(input: &[u8]) -> IResult<&[u8], CommandBody> {
    alt((
        value(CommandBody::StartTls, tag_no_case(b"STARTTLS")),
        authenticate,
        login,
    ))(input)
}

/// authenticate = "AUTHENTICATE" SP auth-type
fn authenticate(input: &[u8]) -> IResult<&[u8], CommandBody> {
    map(
        preceded(tuple((tag_no_case(b"AUTHENTICATE"), sp)), atom),
        |mechanism| CommandBody::Authenticate {
            mechanism: mechanism.as_str().to_ascii_uppercase(),
        },
    )(input)
}

/// login = "LOGIN" SP userid SP password
fn login(input: &[u8]) -> IResult<&[u8], CommandBody> {
    map(
        tuple((tag_no_case(b"LOGIN"), sp, astring, sp, astring)),
        |(_, _, username, _, password)| CommandBody::Login {
            username: username.to_text().into_owned(),
            password: password.to_text().into_owned(),
        },
    )(input)
}

/// mailbox = "INBOX" / astring
fn mailbox(input: &[u8]) -> IResult<&[u8], Mailbox> {
    map(astring, |name: AString| {
        Mailbox::from(name.to_text().as_ref())
    })(input)
}

/// list-mailbox = 1*list-char / string
///
/// `list-char = ATOM-CHAR / list-wildcards / resp-specials`
fn list_mailbox(input: &[u8]) -> IResult<&[u8], ListMailbox> {
    alt((
        map(
            take_while1(|b| is_atom_char(b) || b == b'%' || b == b'*' || b == b']'),
            |raw: &[u8]| ListMailbox(String::from_utf8_lossy(raw).into_owned()),
        ),
        map(string, |s| {
            ListMailbox(String::from_utf8_lossy(s.as_bytes()).into_owned())
        }),
    ))(input)
}

/// command-auth = append / create / delete / examine / list / lsub / rename /
///                select / status / subscribe / unsubscribe
///                 ; Valid only in Authenticated or Selected state
fn command_auth(input: &[u8]) -> IResult<&[u8], CommandBody> {
    alt((
        map(mailbox_arg(b"SELECT"), |mailbox| CommandBody::Select { mailbox }),
        map(mailbox_arg(b"EXAMINE"), |mailbox| CommandBody::Examine { mailbox }),
        map(mailbox_arg(b"CREATE"), |mailbox| CommandBody::Create { mailbox }),
        map(mailbox_arg(b"DELETE"), |mailbox| CommandBody::Delete { mailbox }),
        rename,
        map(mailbox_arg(b"SUBSCRIBE"), |mailbox| CommandBody::Subscribe {
            mailbox,
        }),
        map(mailbox_arg(b"UNSUBSCRIBE"), |mailbox| {
            CommandBody::Unsubscribe { mailbox }
        }),
        list,
        lsub,
        status,
        append,
    ))(input)
}

fn mailbox_arg(
    verb: &'static [u8],
) -> impl Fn(&[u8]) -> IResult<&[u8], Mailbox> {
    move |input| preceded(tuple((tag_no_case(verb), sp)), mailbox)(input)
}

/// rename = "RENAME" SP mailbox SP mailbox
fn rename(input: &[u8]) -> IResult<&[u8], CommandBody> {
    map(
        tuple((tag_no_case(b"RENAME"), sp, mailbox, sp, mailbox)),
        |(_, _, from, _, to)| CommandBody::Rename { from, to },
    )(input)
}

/// list = "LIST" SP mailbox SP list-mailbox
fn list(input: &[u8]) -> IResult<&[u8], CommandBody> {
    map(
        tuple((tag_no_case(b"LIST"), sp, mailbox, sp, list_mailbox)),
        |(_, _, reference, _, pattern)| CommandBody::List { reference, pattern },
    )(input)
}

/// lsub = "LSUB" SP mailbox SP list-mailbox
fn lsub(input: &[u8]) -> IResult<&[u8], CommandBody> {
    map(
        tuple((tag_no_case(b"LSUB"), sp, mailbox, sp, list_mailbox)),
        |(_, _, reference, _, pattern)| CommandBody::Lsub { reference, pattern },
    )(input)
}

/// status = "STATUS" SP mailbox SP "(" status-att *(SP status-att) ")"
fn status(input: &[u8]) -> IResult<&[u8], CommandBody> {
    map(
        tuple((
            tag_no_case(b"STATUS"),
            sp,
            mailbox,
            sp,
            delimited(tag(b"("), separated_list1(sp, status_att), tag(b")")),
        )),
        |(_, _, mailbox, _, attributes)| CommandBody::Status {
            mailbox,
            attributes,
        },
    )(input)
}

/// status-att = "MESSAGES" / "RECENT" / "UIDNEXT" / "UIDVALIDITY" / "UNSEEN"
fn status_att(input: &[u8]) -> IResult<&[u8], StatusAttribute> {
    alt((
        value(StatusAttribute::Messages, tag_no_case(b"MESSAGES")),
        value(StatusAttribute::Recent, tag_no_case(b"RECENT")),
        value(StatusAttribute::UidNext, tag_no_case(b"UIDNEXT")),
        value(StatusAttribute::UidValidity, tag_no_case(b"UIDVALIDITY")),
        value(StatusAttribute::Unseen, tag_no_case(b"UNSEEN")),
    ))(input)
}

/// append = "APPEND" SP mailbox 1*append-message
/// append-message = [SP flag-list] [SP date-time] SP literal
///                   ; MULTIAPPEND form; plain RFC 3501 is the one-message case
fn append(input: &[u8]) -> IResult<&[u8], CommandBody> {
    let append_message = map(
        tuple((
            opt(preceded(sp, flag_list)),
            opt(preceded(sp, date_time)),
            preceded(sp, literal),
        )),
        |(flags, date, message)| AppendMessage {
            flags: flags.unwrap_or_default(),
            date,
            message: message.to_vec(),
        },
    );

    map(
        tuple((tag_no_case(b"APPEND"), sp, mailbox, many1(append_message))),
        |(_, _, mailbox, messages)| CommandBody::Append { mailbox, messages },
    )(input)
}

/// command-select = "CHECK" / "CLOSE" / "UNSELECT" / "EXPUNGE" / copy / move /
///                  fetch / store / search / uid / idle
///                   ; Valid only when in Selected state
fn command_select(input: &[u8]) -> IResult<&[u8], CommandBody> {
    alt((
        value(CommandBody::Check, tag_no_case(b"CHECK")),
        value(CommandBody::Close, tag_no_case(b"CLOSE")),
        value(CommandBody::Unselect, tag_no_case(b"UNSELECT")),
        value(
            CommandBody::Expunge { uid_set: None },
            tag_no_case(b"EXPUNGE"),
        ),
        value(CommandBody::Idle, tag_no_case(b"IDLE")),
        copy_or_move(false),
        fetch(false),
        store(false),
        search(false),
        uid,
    ))(input)
}

/// uid = "UID" SP (copy / move / fetch / search / store / uid-expunge)
fn uid(input: &[u8]) -> IResult<&[u8], CommandBody> {
    preceded(
        tuple((tag_no_case(b"UID"), sp)),
        alt((
            copy_or_move(true),
            fetch(true),
            store(true),
            search(true),
            map(
                preceded(tuple((tag_no_case(b"EXPUNGE"), sp)), sequence_set),
                |set| CommandBody::Expunge { uid_set: Some(set) },
            ),
        )),
    )(input)
}

/// copy = "COPY" SP sequence-set SP mailbox
/// move = "MOVE" SP sequence-set SP mailbox
fn copy_or_move(
    uid: bool,
) -> impl Fn(&[u8]) -> IResult<&[u8], CommandBody> {
    move |input| {
        map(
            tuple((
                alt((
                    value(false, tag_no_case(b"COPY")),
                    value(true, tag_no_case(b"MOVE")),
                )),
                sp,
                sequence_set,
                sp,
                mailbox,
            )),
            |(is_move, _, sequence_set, _, mailbox)| {
                if is_move {
                    CommandBody::Move {
                        sequence_set,
                        mailbox,
                        uid,
                    }
                } else {
                    CommandBody::Copy {
                        sequence_set,
                        mailbox,
                        uid,
                    }
                }
            },
        )(input)
    }
}

/// fetch = "FETCH" SP sequence-set SP ("ALL" / "FULL" / "FAST" / fetch-att /
///         "(" fetch-att *(SP fetch-att) ")")
fn fetch(uid: bool) -> impl Fn(&[u8]) -> IResult<&[u8], CommandBody> {
    move |input| {
        map(
            tuple((
                tag_no_case(b"FETCH"),
                sp,
                sequence_set,
                sp,
                fetch_attributes,
            )),
            |(_, _, sequence_set, _, attributes)| CommandBody::Fetch {
                sequence_set,
                attributes,
                uid,
            },
        )(input)
    }
}

/// store = "STORE" SP sequence-set SP store-att-flags
/// store-att-flags = (["+" / "-"] "FLAGS" [".SILENT"]) SP (flag-list / (flag *(SP flag)))
fn store(uid: bool) -> impl Fn(&[u8]) -> IResult<&[u8], CommandBody> {
    move |input| {
        map(
            tuple((
                tag_no_case(b"STORE"),
                sp,
                sequence_set,
                sp,
                map(
                    opt(alt((
                        value(StoreType::Add, tag(b"+")),
                        value(StoreType::Remove, tag(b"-")),
                    ))),
                    |kind| kind.unwrap_or(StoreType::Replace),
                ),
                tag_no_case(b"FLAGS"),
                map(opt(tag_no_case(b".SILENT")), |silent| match silent {
                    Some(_) => StoreResponse::Silent,
                    None => StoreResponse::Answer,
                }),
                sp,
                alt((flag_list, separated_list1(sp, flag))),
            )),
            |(_, _, sequence_set, _, kind, _, response, _, flags)| {
                CommandBody::Store {
                    sequence_set,
                    kind,
                    response,
                    flags,
                    uid,
                }
            },
        )(input)
    }
}

/// search = "SEARCH" [SP "CHARSET" SP charset] 1*(SP search-key)
fn search(uid: bool) -> impl Fn(&[u8]) -> IResult<&[u8], CommandBody> {
    move |input| {
        map(
            tuple((
                tag_no_case(b"SEARCH"),
                opt(preceded(
                    tuple((sp, tag_no_case(b"CHARSET"), sp)),
                    charset,
                )),
                many1(preceded(sp, search_key)),
            )),
            |(_, charset, keys)| CommandBody::Search {
                charset: charset.map(|c| c.0),
                criteria: and_key(keys),
                uid,
            },
        )(input)
    }
}

//! Mailbox names.

use std::fmt::{Display, Formatter};

/// A mailbox name. `INBOX` is case-insensitive and always normalized.
///
/// `mailbox = "INBOX" / astring`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Mailbox {
    Inbox,
    Other(String),
}

impl Mailbox {
    pub fn is_inbox(&self) -> bool {
        matches!(self, Self::Inbox)
    }

    /// Canonical name, `INBOX` for the inbox.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Inbox => "INBOX",
            Self::Other(name) => name,
        }
    }
}

impl From<&str> for Mailbox {
    fn from(name: &str) -> Self {
        if name.eq_ignore_ascii_case("INBOX") {
            Self::Inbox
        } else {
            Self::Other(name.to_owned())
        }
    }
}

impl From<String> for Mailbox {
    fn from(name: String) -> Self {
        Self::from(name.as_str())
    }
}

impl Display for Mailbox {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Argument of LIST/LSUB: a mailbox name possibly holding `%`/`*` wildcards.
///
/// `list-mailbox = 1*list-char / string`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListMailbox(pub String);

impl ListMailbox {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Match a mailbox name against the `%` (no hierarchy crossing) and `*`
    /// wildcards.
    pub fn matches(&self, name: &str, delimiter: char) -> bool {
        fn rec(pattern: &[char], name: &[char], delimiter: char) -> bool {
            match pattern.split_first() {
                None => name.is_empty(),
                Some(('*', rest)) => (0..=name.len())
                    .any(|skip| rec(rest, &name[skip..], delimiter)),
                Some(('%', rest)) => (0..=name.len())
                    .take_while(|&skip| {
                        name[..skip].iter().all(|&c| c != delimiter)
                    })
                    .any(|skip| rec(rest, &name[skip..], delimiter)),
                Some((&c, rest)) => match name.split_first() {
                    Some((&n, name_rest)) if n == c => {
                        rec(rest, name_rest, delimiter)
                    }
                    _ => false,
                },
            }
        }
        let pattern: Vec<char> = self.0.chars().collect();
        let name: Vec<char> = name.chars().collect();
        rec(&pattern, &name, delimiter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inbox_is_case_insensitive() {
        assert_eq!(Mailbox::from("inbox"), Mailbox::Inbox);
        assert_eq!(Mailbox::from("InBoX"), Mailbox::Inbox);
        assert_eq!(Mailbox::from("Inbox Test").as_str(), "Inbox Test");
    }

    #[test]
    fn list_wildcards() {
        let star = ListMailbox("*".into());
        assert!(star.matches("INBOX", '/'));
        assert!(star.matches("a/b/c", '/'));

        let percent = ListMailbox("%".into());
        assert!(percent.matches("INBOX", '/'));
        assert!(!percent.matches("a/b", '/'));

        let prefix = ListMailbox("Sent/*".into());
        assert!(prefix.matches("Sent/2020", '/'));
        assert!(!prefix.matches("Sent", '/'));
    }
}

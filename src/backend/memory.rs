//! The in-memory backend.
//!
//! Holds every user's mailboxes in process memory behind one mutex; change
//! notification rides a single watch channel carrying a global change
//! counter. Fresh mailboxes allocate UIDs from 101 so UIDVALIDITY resets
//! (e.g. after RENAME of INBOX) are observable against seeded data.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use lettermill_types::command::AppendMessage;
use lettermill_types::datetime::DateTime;
use lettermill_types::flag::{Flag, StoreType};
use lettermill_types::mailbox::{ListMailbox, Mailbox};
use lettermill_types::search::SearchKey;
use lettermill_types::threads::ThreadKey;
use tokio::sync::watch;

use crate::auth::Credentials;
use crate::backend::{
    AppendUidInfo, Backend, BackendError, CopyUidInfo, MailboxListing,
    MailboxStatus, MailboxUpdate, MailboxView, MessageData, MessageSummary,
    SearchContext, Session,
};
use crate::mime;

const FIRST_UID: u32 = 101;

/// Hierarchy delimiter used for LIST pattern matching.
const DELIMITER: char = '/';

#[derive(Debug, Clone)]
struct StoredMessage {
    uid: u32,
    flags: Vec<Flag>,
    internal_date: Option<DateTime>,
    /// Conversation cluster; messages sharing a thread key share this.
    thread_id: u64,
    body: Arc<Vec<u8>>,
}

#[derive(Debug, Default)]
struct MailboxData {
    uid_validity: u32,
    next_uid: u32,
    epoch: u64,
    messages: Vec<StoredMessage>,
    /// `\Recent` UIDs not yet claimed by any session.
    unclaimed_recent: HashSet<u32>,
}

impl MailboxData {
    fn new(uid_validity: u32) -> Self {
        Self {
            uid_validity,
            next_uid: FIRST_UID,
            epoch: 1,
            messages: Vec::new(),
            unclaimed_recent: HashSet::new(),
        }
    }

    fn view(&self, name: &Mailbox) -> MailboxView {
        let mut flags: Vec<Flag> = vec![
            Flag::Answered,
            Flag::Deleted,
            Flag::Draft,
            Flag::Flagged,
            Flag::Seen,
        ];
        for message in &self.messages {
            for flag in &message.flags {
                if !flags.contains(flag) {
                    flags.push(flag.clone());
                }
            }
        }
        flags.sort();
        MailboxView {
            name: name.clone(),
            uid_validity: self.uid_validity,
            next_uid: self.next_uid,
            epoch: self.epoch,
            recent: self.unclaimed_recent.len() as u32,
            flags,
            messages: self
                .messages
                .iter()
                .map(|message| MessageSummary {
                    uid: message.uid,
                    flags: message.flags.clone(),
                })
                .collect(),
        }
    }

    fn append(
        &mut self,
        body: Vec<u8>,
        mut flags: Vec<Flag>,
        internal_date: Option<DateTime>,
        thread_id: u64,
    ) -> u32 {
        let uid = self.next_uid;
        self.next_uid += 1;
        flags.retain(|flag| !flag.is_recent());
        flags.sort();
        flags.dedup();
        self.messages.push(StoredMessage {
            uid,
            flags,
            internal_date: internal_date
                .or_else(|| Some(DateTime(Utc::now().fixed_offset()))),
            thread_id,
            body: Arc::new(body),
        });
        self.unclaimed_recent.insert(uid);
        uid
    }
}

#[derive(Debug, Default)]
struct UserStore {
    mailboxes: HashMap<String, MailboxData>,
    subscribed: HashSet<String>,
    threads: HashMap<ThreadKey, u64>,
    next_thread_id: u64,
}

impl UserStore {
    /// Thread assignment: any key shared with an earlier message joins its
    /// thread, otherwise a fresh thread starts. All of the message's keys
    /// are recorded either way.
    fn thread_id_for(&mut self, message: &[u8]) -> u64 {
        let (header, _) = mime::split_message(message);
        let keys = ThreadKey::get_all(
            mime::header_value(header, "Message-Id").as_deref(),
            mime::header_value(header, "In-Reply-To").as_deref(),
            mime::header_value(header, "References").as_deref(),
            mime::header_value(header, "Subject").as_deref(),
        );
        let id = keys
            .iter()
            .find_map(|key| self.threads.get(key).copied())
            .unwrap_or_else(|| {
                self.next_thread_id += 1;
                self.next_thread_id
            });
        for key in keys {
            self.threads.insert(key, id);
        }
        id
    }
}

#[derive(Debug)]
struct Store {
    users: HashMap<String, String>,
    data: HashMap<String, UserStore>,
    next_validity: u32,
    changes: u64,
}

impl Store {
    fn allocate_validity(&mut self) -> u32 {
        let validity = self.next_validity;
        self.next_validity += 1;
        validity
    }
}

/// Backend holding everything in memory. Cheap to clone; clones share state.
#[derive(Debug, Clone)]
pub struct MemoryBackend {
    store: Arc<Mutex<Store>>,
    notify: watch::Sender<u64>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        let (notify, _) = watch::channel(0);
        Self {
            store: Arc::new(Mutex::new(Store {
                users: HashMap::new(),
                data: HashMap::new(),
                next_validity: 4200,
                changes: 0,
            })),
            notify,
        }
    }

    /// Register a user with an empty INBOX.
    pub fn add_user(&self, username: &str, password: &str) {
        let mut store = self.lock();
        store
            .users
            .insert(username.to_owned(), password.to_owned());
        let validity = store.allocate_validity();
        store
            .data
            .entry(username.to_owned())
            .or_default()
            .mailboxes
            .entry("INBOX".to_owned())
            .or_insert_with(|| MailboxData::new(validity));
    }

    /// The demo fixture: `testuser`/`testpass` with four messages in INBOX
    /// (UIDs 101-104, UIDNEXT 105), the first unseen at sequence 2, one
    /// unclaimed recent message.
    pub fn with_demo_data() -> Self {
        let backend = Self::new();
        backend.add_user("testuser", "testpass");
        {
            let mut store = backend.lock();
            let user = store.data.get_mut("testuser").expect("just added");
            for (index, seen) in [true, false, true, false].iter().enumerate() {
                let number = index + 1;
                let body = format!(
                    "From: sender{number}@example.com\r\n\
                     To: testuser@example.com\r\n\
                     Subject: Demo message {number}\r\n\
                     Message-Id: <demo-{number}@example.com>\r\n\
                     Date: Thu, 0{number} Jan 2026 12:00:00 +0000\r\n\
                     \r\n\
                     This is demo message number {number}.\r\n"
                )
                .into_bytes();
                let thread_id = user.thread_id_for(&body);
                let flags = if *seen { vec![Flag::Seen] } else { vec![] };
                let inbox =
                    user.mailboxes.get_mut("INBOX").expect("just added");
                inbox.append(body, flags, None, thread_id);
            }
            // Only the newest message is still recent.
            let inbox = user.mailboxes.get_mut("INBOX").expect("just added");
            let last_uid = inbox.next_uid - 1;
            inbox.unclaimed_recent.clear();
            inbox.unclaimed_recent.insert(last_uid);
        }
        backend
    }

    fn lock(&self) -> MutexGuard<'_, Store> {
        self.store.lock().expect("store mutex poisoned")
    }

    fn bump(&self, store: &mut Store) {
        store.changes += 1;
        let _ = self.notify.send(store.changes);
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for MemoryBackend {
    type Session = MemorySession;

    async fn login(
        &self,
        credentials: &Credentials,
    ) -> Result<MemorySession, BackendError> {
        let store = self.lock();
        match store.users.get(&credentials.authcid) {
            Some(password) if *password == credentials.secret => {
                Ok(MemorySession {
                    backend: self.clone(),
                    username: credentials.authcid.clone(),
                })
            }
            _ => Err(BackendError::AuthenticationFailed),
        }
    }
}

/// A logged-in user's view of the [`MemoryBackend`].
#[derive(Debug, Clone)]
pub struct MemorySession {
    backend: MemoryBackend,
    username: String,
}

impl MemorySession {
    fn with_user<T>(
        &self,
        f: impl FnOnce(&mut UserStore) -> T,
    ) -> T {
        let mut store = self.backend.lock();
        let user = store.data.entry(self.username.clone()).or_default();
        f(user)
    }

    fn with_mailbox<T>(
        &self,
        name: &Mailbox,
        try_create: bool,
        f: impl FnOnce(&mut MailboxData) -> T,
    ) -> Result<T, BackendError> {
        let mut store = self.backend.lock();
        let user = store.data.entry(self.username.clone()).or_default();
        match user.mailboxes.get_mut(name.as_str()) {
            Some(mailbox) => Ok(f(mailbox)),
            None => Err(BackendError::MailboxNotFound {
                name: name.clone(),
                try_create,
            }),
        }
    }

    fn with_mailbox_mut<T>(
        &self,
        name: &Mailbox,
        try_create: bool,
        f: impl FnOnce(&mut MailboxData) -> T,
    ) -> Result<T, BackendError> {
        let result = self.with_mailbox(name, try_create, f)?;
        let mut store = self.backend.lock();
        self.backend.bump(&mut store);
        Ok(result)
    }
}

impl Session for MemorySession {
    async fn list_mailboxes(
        &self,
        reference: &Mailbox,
        pattern: &ListMailbox,
        subscribed_only: bool,
    ) -> Result<Vec<MailboxListing>, BackendError> {
        Ok(self.with_user(|user| {
            let mut names: Vec<String> = if subscribed_only {
                user.subscribed.iter().cloned().collect()
            } else {
                user.mailboxes.keys().cloned().collect()
            };
            names.sort();
            let prefix = reference.as_str();
            names
                .into_iter()
                .filter(|name| {
                    let candidate = if prefix.is_empty() {
                        name.clone()
                    } else {
                        match name.strip_prefix(prefix) {
                            Some(rest) => rest.to_owned(),
                            None => return false,
                        }
                    };
                    pattern.matches(&candidate, DELIMITER)
                })
                .map(|name| MailboxListing {
                    name: Mailbox::from(name),
                    delimiter: Some(DELIMITER),
                    attributes: vec![],
                })
                .collect()
        }))
    }

    async fn status_mailbox(
        &self,
        name: &Mailbox,
    ) -> Result<MailboxStatus, BackendError> {
        self.with_mailbox(name, false, |mailbox| MailboxStatus {
            messages: mailbox.messages.len() as u32,
            recent: mailbox.unclaimed_recent.len() as u32,
            unseen: mailbox
                .messages
                .iter()
                .filter(|message| !message.flags.contains(&Flag::Seen))
                .count() as u32,
            uid_next: mailbox.next_uid,
            uid_validity: mailbox.uid_validity,
        })
    }

    async fn create_mailbox(&self, name: &Mailbox) -> Result<(), BackendError> {
        let mut store = self.backend.lock();
        let validity = store.allocate_validity();
        let user = store.data.entry(self.username.clone()).or_default();
        if user.mailboxes.contains_key(name.as_str()) {
            return Err(BackendError::MailboxExists { name: name.clone() });
        }
        user.mailboxes
            .insert(name.as_str().to_owned(), MailboxData::new(validity));
        self.backend.bump(&mut store);
        Ok(())
    }

    async fn delete_mailbox(&self, name: &Mailbox) -> Result<(), BackendError> {
        let mut store = self.backend.lock();
        let user = store.data.entry(self.username.clone()).or_default();
        if user.mailboxes.remove(name.as_str()).is_none() {
            return Err(BackendError::MailboxNotFound {
                name: name.clone(),
                try_create: false,
            });
        }
        user.subscribed.remove(name.as_str());
        self.backend.bump(&mut store);
        Ok(())
    }

    async fn rename_mailbox(
        &self,
        from: &Mailbox,
        to: &Mailbox,
    ) -> Result<(), BackendError> {
        let mut store = self.backend.lock();
        let fresh_validity = store.allocate_validity();
        let user = store.data.entry(self.username.clone()).or_default();
        if user.mailboxes.contains_key(to.as_str()) {
            return Err(BackendError::MailboxExists { name: to.clone() });
        }
        if from.is_inbox() {
            // RENAME of INBOX moves the messages out but leaves a fresh,
            // empty INBOX behind with new UIDVALIDITY.
            let Some(inbox) = user.mailboxes.get_mut("INBOX") else {
                return Err(BackendError::MailboxNotFound {
                    name: from.clone(),
                    try_create: false,
                });
            };
            let moved = std::mem::replace(inbox, MailboxData::new(fresh_validity));
            user.mailboxes.insert(to.as_str().to_owned(), moved);
        } else {
            let Some(data) = user.mailboxes.remove(from.as_str()) else {
                return Err(BackendError::MailboxNotFound {
                    name: from.clone(),
                    try_create: false,
                });
            };
            user.mailboxes.insert(to.as_str().to_owned(), data);
        }
        self.backend.bump(&mut store);
        Ok(())
    }

    async fn subscribe(&self, name: &Mailbox) -> Result<(), BackendError> {
        self.with_user(|user| {
            user.subscribed.insert(name.as_str().to_owned());
        });
        Ok(())
    }

    async fn unsubscribe(&self, name: &Mailbox) -> Result<(), BackendError> {
        self.with_user(|user| {
            user.subscribed.remove(name.as_str());
        });
        Ok(())
    }

    async fn select_mailbox(
        &self,
        name: &Mailbox,
        readonly: bool,
    ) -> Result<(MailboxView, Vec<u32>), BackendError> {
        self.with_mailbox(name, false, |mailbox| {
            let view = mailbox.view(name);
            let claimed = if readonly {
                Vec::new()
            } else {
                let mut claimed: Vec<u32> =
                    mailbox.unclaimed_recent.drain().collect();
                claimed.sort_unstable();
                claimed
            };
            (view, claimed)
        })
    }

    async fn poll_mailbox(
        &self,
        name: &Mailbox,
        claim: bool,
    ) -> Result<MailboxUpdate, BackendError> {
        let mut store = self.backend.lock();
        let user = store.data.entry(self.username.clone()).or_default();
        let Some(mailbox) = user.mailboxes.get_mut(name.as_str()) else {
            return Ok(MailboxUpdate {
                view: None,
                claimed: Vec::new(),
            });
        };
        let claimed = if claim {
            let mut claimed: Vec<u32> = mailbox.unclaimed_recent.drain().collect();
            claimed.sort_unstable();
            claimed
        } else {
            Vec::new()
        };
        Ok(MailboxUpdate {
            view: Some(mailbox.view(name)),
            claimed,
        })
    }

    async fn wait_for_changes(
        &self,
        name: &Mailbox,
        epoch: u64,
        mut done: watch::Receiver<bool>,
    ) -> Result<(), BackendError> {
        let mut changes = self.backend.notify.subscribe();
        loop {
            {
                let mut store = self.backend.lock();
                let user = store.data.entry(self.username.clone()).or_default();
                match user.mailboxes.get(name.as_str()) {
                    None => return Ok(()),
                    Some(mailbox) if mailbox.epoch > epoch => return Ok(()),
                    Some(_) => {}
                }
            }
            if *done.borrow() {
                return Ok(());
            }
            tokio::select! {
                changed = changes.changed() => {
                    if changed.is_err() {
                        return Ok(());
                    }
                }
                _ = done.changed() => return Ok(()),
            }
        }
    }

    async fn append_messages(
        &self,
        name: &Mailbox,
        messages: &[AppendMessage],
    ) -> Result<AppendUidInfo, BackendError> {
        let mut store = self.backend.lock();
        let user = store.data.entry(self.username.clone()).or_default();
        let thread_ids: Vec<u64> = messages
            .iter()
            .map(|message| user.thread_id_for(&message.message))
            .collect();
        let Some(mailbox) = user.mailboxes.get_mut(name.as_str()) else {
            return Err(BackendError::MailboxNotFound {
                name: name.clone(),
                try_create: true,
            });
        };
        let uids = messages
            .iter()
            .zip(thread_ids)
            .map(|(message, thread_id)| {
                let uid = mailbox.append(
                    message.message.clone(),
                    message.flags.clone(),
                    message.date,
                    thread_id,
                );
                mailbox.epoch += 1;
                uid
            })
            .collect();
        let info = AppendUidInfo {
            validity: mailbox.uid_validity,
            uids,
        };
        self.backend.bump(&mut store);
        Ok(info)
    }

    async fn fetch_messages(
        &self,
        name: &Mailbox,
        uids: &[u32],
    ) -> Result<Vec<MessageData>, BackendError> {
        self.with_mailbox(name, false, |mailbox| {
            mailbox
                .messages
                .iter()
                .filter(|message| uids.contains(&message.uid))
                .map(|message| MessageData {
                    uid: message.uid,
                    flags: message.flags.clone(),
                    internal_date: message.internal_date,
                    body: message.body.as_ref().clone(),
                })
                .collect()
        })
    }

    async fn update_flags(
        &self,
        name: &Mailbox,
        uids: &[u32],
        flags: &[Flag],
        kind: StoreType,
    ) -> Result<Vec<(u32, Vec<Flag>)>, BackendError> {
        let flags: Vec<Flag> = flags
            .iter()
            .filter(|flag| !flag.is_recent())
            .cloned()
            .collect();
        self.with_mailbox_mut(name, false, |mailbox| {
            let mut updated = Vec::new();
            for message in &mut mailbox.messages {
                if !uids.contains(&message.uid) {
                    continue;
                }
                match kind {
                    StoreType::Replace => message.flags = flags.clone(),
                    StoreType::Add => {
                        for flag in &flags {
                            if !message.flags.contains(flag) {
                                message.flags.push(flag.clone());
                            }
                        }
                    }
                    StoreType::Remove => {
                        message.flags.retain(|flag| !flags.contains(flag));
                    }
                }
                message.flags.sort();
                updated.push((message.uid, message.flags.clone()));
            }
            mailbox.epoch += 1;
            updated
        })
    }

    async fn expunge_mailbox(
        &self,
        name: &Mailbox,
        uids: Option<&[u32]>,
    ) -> Result<Vec<u32>, BackendError> {
        self.with_mailbox_mut(name, false, |mailbox| {
            let mut expunged = Vec::new();
            mailbox.messages.retain(|message| {
                let targeted = uids
                    .map(|uids| uids.contains(&message.uid))
                    .unwrap_or(true);
                if targeted && message.flags.contains(&Flag::Deleted) {
                    expunged.push(message.uid);
                    false
                } else {
                    true
                }
            });
            for uid in &expunged {
                mailbox.unclaimed_recent.remove(uid);
            }
            mailbox.epoch += 1;
            expunged
        })
    }

    async fn copy_messages(
        &self,
        from: &Mailbox,
        uids: &[u32],
        to: &Mailbox,
    ) -> Result<CopyUidInfo, BackendError> {
        let mut store = self.backend.lock();
        let user = store.data.entry(self.username.clone()).or_default();
        if !user.mailboxes.contains_key(to.as_str()) {
            return Err(BackendError::MailboxNotFound {
                name: to.clone(),
                try_create: true,
            });
        }
        let Some(source) = user.mailboxes.get(from.as_str()) else {
            return Err(BackendError::MailboxNotFound {
                name: from.clone(),
                try_create: false,
            });
        };
        let moved: Vec<StoredMessage> = source
            .messages
            .iter()
            .filter(|message| uids.contains(&message.uid))
            .cloned()
            .collect();
        let destination = user
            .mailboxes
            .get_mut(to.as_str())
            .expect("presence checked above");
        let mut info = CopyUidInfo {
            validity: destination.uid_validity,
            source: Vec::new(),
            destination: Vec::new(),
        };
        for message in moved {
            let uid = destination.append(
                message.body.as_ref().clone(),
                message.flags.clone(),
                message.internal_date,
                message.thread_id,
            );
            info.source.push(message.uid);
            info.destination.push(uid);
        }
        destination.epoch += 1;
        self.backend.bump(&mut store);
        Ok(info)
    }

    async fn move_messages(
        &self,
        from: &Mailbox,
        uids: &[u32],
        to: &Mailbox,
    ) -> Result<CopyUidInfo, BackendError> {
        let info = self.copy_messages(from, uids, to).await?;
        self.with_mailbox_mut(from, false, |mailbox| {
            mailbox
                .messages
                .retain(|message| !info.source.contains(&message.uid));
            for uid in &info.source {
                mailbox.unclaimed_recent.remove(uid);
            }
            mailbox.epoch += 1;
        })?;
        Ok(info)
    }

    async fn search_mailbox(
        &self,
        name: &Mailbox,
        criteria: &SearchKey,
        context: &SearchContext,
    ) -> Result<Vec<u32>, BackendError> {
        self.with_mailbox(name, false, |mailbox| {
            mailbox
                .messages
                .iter()
                .filter(|message| {
                    let seq = context
                        .seq_uids
                        .iter()
                        .position(|&uid| uid == message.uid)
                        .map(|index| index as u32 + 1);
                    search_matches(criteria, message, seq, context)
                })
                .map(|message| message.uid)
                .collect()
        })
    }
}

fn search_matches(
    key: &SearchKey,
    message: &StoredMessage,
    seq: Option<u32>,
    context: &SearchContext,
) -> bool {
    let has = |flag: &Flag| message.flags.contains(flag);
    let recent = context.recent.contains(&message.uid);
    match key {
        SearchKey::All => true,
        SearchKey::Answered => has(&Flag::Answered),
        SearchKey::Deleted => has(&Flag::Deleted),
        SearchKey::Draft => has(&Flag::Draft),
        SearchKey::Flagged => has(&Flag::Flagged),
        SearchKey::Seen => has(&Flag::Seen),
        SearchKey::Unanswered => !has(&Flag::Answered),
        SearchKey::Undeleted => !has(&Flag::Deleted),
        SearchKey::Undraft => !has(&Flag::Draft),
        SearchKey::Unflagged => !has(&Flag::Flagged),
        SearchKey::Unseen => !has(&Flag::Seen),
        SearchKey::Keyword(keyword) => has(&Flag::Keyword(keyword.clone())),
        SearchKey::Unkeyword(keyword) => !has(&Flag::Keyword(keyword.clone())),
        SearchKey::Recent => recent,
        SearchKey::Old => !recent,
        SearchKey::New => recent && !has(&Flag::Seen),
        SearchKey::Larger(size) => message.body.len() as u32 > *size,
        SearchKey::Smaller(size) => (message.body.len() as u32) < *size,
        SearchKey::SequenceSet(set) => seq
            .map(|seq| set.contains(seq, context.seq_uids.len() as u32))
            .unwrap_or(false),
        SearchKey::Uid(set) => {
            let largest = context.seq_uids.last().copied().unwrap_or(0);
            set.contains(message.uid, largest)
        }
        SearchKey::Before(date) => internal_date(message)
            .map(|d| d < date.0)
            .unwrap_or(false),
        SearchKey::On(date) => internal_date(message)
            .map(|d| d == date.0)
            .unwrap_or(false),
        SearchKey::Since(date) => internal_date(message)
            .map(|d| d >= date.0)
            .unwrap_or(false),
        SearchKey::SentBefore(date) => sent_date(message)
            .map(|d| d < date.0)
            .unwrap_or(false),
        SearchKey::SentOn(date) => sent_date(message)
            .map(|d| d == date.0)
            .unwrap_or(false),
        SearchKey::SentSince(date) => sent_date(message)
            .map(|d| d >= date.0)
            .unwrap_or(false),
        SearchKey::From(needle) => header_contains(message, "From", needle),
        SearchKey::To(needle) => header_contains(message, "To", needle),
        SearchKey::Cc(needle) => header_contains(message, "Cc", needle),
        SearchKey::Bcc(needle) => header_contains(message, "Bcc", needle),
        SearchKey::Subject(needle) => {
            header_contains(message, "Subject", needle)
        }
        SearchKey::Header(name, needle) => {
            header_contains(message, name, needle)
        }
        SearchKey::Body(needle) => {
            let (_, text) = mime::split_message(&message.body);
            contains_ignore_case(text, needle)
        }
        SearchKey::Text(needle) => contains_ignore_case(&message.body, needle),
        SearchKey::Not(inner) => !search_matches(inner, message, seq, context),
        SearchKey::Or(left, right) => {
            search_matches(left, message, seq, context)
                || search_matches(right, message, seq, context)
        }
        SearchKey::And(keys) => keys
            .iter()
            .all(|key| search_matches(key, message, seq, context)),
    }
}

fn internal_date(message: &StoredMessage) -> Option<chrono::NaiveDate> {
    message
        .internal_date
        .map(|date| date.0.date_naive())
}

fn sent_date(message: &StoredMessage) -> Option<chrono::NaiveDate> {
    let (header, _) = mime::split_message(&message.body);
    let value = mime::header_value(header, "Date")?;
    chrono::DateTime::parse_from_rfc2822(&value)
        .ok()
        .map(|date| date.date_naive())
}

fn header_contains(message: &StoredMessage, name: &str, needle: &str) -> bool {
    let (header, _) = mime::split_message(&message.body);
    match mime::header_value(header, name) {
        Some(_) if needle.is_empty() => true,
        Some(value) => value.to_lowercase().contains(&needle.to_lowercase()),
        None => false,
    }
}

fn contains_ignore_case(haystack: &[u8], needle: &str) -> bool {
    if needle.is_empty() {
        return true;
    }
    let haystack = haystack.to_ascii_lowercase();
    let needle = needle.to_lowercase();
    haystack
        .windows(needle.len())
        .any(|window| window == needle.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(backend: &MemoryBackend) -> MemorySession {
        MemorySession {
            backend: backend.clone(),
            username: "testuser".into(),
        }
    }

    #[tokio::test]
    async fn login_checks_credentials() {
        let backend = MemoryBackend::with_demo_data();
        assert!(backend
            .login(&Credentials::plain("testuser", "testpass"))
            .await
            .is_ok());
        assert!(matches!(
            backend
                .login(&Credentials::plain("testuser", "wrong"))
                .await,
            Err(BackendError::AuthenticationFailed)
        ));
    }

    #[tokio::test]
    async fn demo_inbox_shape() {
        let backend = MemoryBackend::with_demo_data();
        let session = session(&backend);
        let status = session.status_mailbox(&Mailbox::Inbox).await.unwrap();
        assert_eq!(status.messages, 4);
        assert_eq!(status.recent, 1);
        assert_eq!(status.unseen, 2);
        assert_eq!(status.uid_next, 105);
    }

    #[tokio::test]
    async fn select_claims_recent_once() {
        let backend = MemoryBackend::with_demo_data();
        let session = session(&backend);
        let (_, claimed) = session
            .select_mailbox(&Mailbox::Inbox, false)
            .await
            .unwrap();
        assert_eq!(claimed, vec![104]);

        let (_, claimed) = session
            .select_mailbox(&Mailbox::Inbox, false)
            .await
            .unwrap();
        assert!(claimed.is_empty());
    }

    #[tokio::test]
    async fn rename_inbox_moves_messages_and_resets() {
        let backend = MemoryBackend::with_demo_data();
        let session = session(&backend);
        let before = session.status_mailbox(&Mailbox::Inbox).await.unwrap();

        session
            .rename_mailbox(&Mailbox::Inbox, &Mailbox::from("Inbox Test"))
            .await
            .unwrap();

        let inbox = session.status_mailbox(&Mailbox::Inbox).await.unwrap();
        assert_eq!(inbox.messages, 0);
        assert_eq!(inbox.uid_next, FIRST_UID);
        assert_ne!(inbox.uid_validity, before.uid_validity);

        let renamed = session
            .status_mailbox(&Mailbox::from("Inbox Test"))
            .await
            .unwrap();
        assert_eq!(renamed.messages, 4);
        assert_eq!(renamed.uid_next, 105);
        assert_eq!(renamed.uid_validity, before.uid_validity);
    }

    #[tokio::test]
    async fn expunge_only_removes_deleted() {
        let backend = MemoryBackend::with_demo_data();
        let session = session(&backend);
        session
            .update_flags(
                &Mailbox::Inbox,
                &[104],
                &[Flag::Deleted],
                StoreType::Add,
            )
            .await
            .unwrap();
        let expunged = session
            .expunge_mailbox(&Mailbox::Inbox, None)
            .await
            .unwrap();
        assert_eq!(expunged, vec![104]);
        let status = session.status_mailbox(&Mailbox::Inbox).await.unwrap();
        assert_eq!(status.messages, 3);
    }

    #[tokio::test]
    async fn search_by_flag_and_text() {
        let backend = MemoryBackend::with_demo_data();
        let session = session(&backend);
        let context = SearchContext {
            seq_uids: vec![101, 102, 103, 104],
            recent: vec![104],
        };
        let unseen = session
            .search_mailbox(&Mailbox::Inbox, &SearchKey::Unseen, &context)
            .await
            .unwrap();
        assert_eq!(unseen, vec![102, 104]);

        let subject = session
            .search_mailbox(
                &Mailbox::Inbox,
                &SearchKey::Subject("demo message 3".into()),
                &context,
            )
            .await
            .unwrap();
        assert_eq!(subject, vec![103]);

        let new = session
            .search_mailbox(&Mailbox::Inbox, &SearchKey::Recent, &context)
            .await
            .unwrap();
        assert_eq!(new, vec![104]);
    }

    #[tokio::test]
    async fn copy_allocates_destination_uids() {
        let backend = MemoryBackend::with_demo_data();
        let session = session(&backend);
        session
            .create_mailbox(&Mailbox::from("Archive"))
            .await
            .unwrap();
        let info = session
            .copy_messages(&Mailbox::Inbox, &[101, 102], &Mailbox::from("Archive"))
            .await
            .unwrap();
        assert_eq!(info.source, vec![101, 102]);
        assert_eq!(info.destination, vec![FIRST_UID, FIRST_UID + 1]);

        let missing = session
            .copy_messages(&Mailbox::Inbox, &[101], &Mailbox::from("Nope"))
            .await;
        assert!(matches!(
            missing,
            Err(BackendError::MailboxNotFound {
                try_create: true,
                ..
            })
        ));
    }

    #[test]
    fn replies_join_the_original_thread() {
        let mut user = UserStore::default();
        let first = user.thread_id_for(
            b"Message-Id: <a@x>\r\nSubject: lunch\r\n\r\nnoon?\r\n",
        );
        let reply = user.thread_id_for(
            b"Message-Id: <b@x>\r\nIn-Reply-To: <a@x>\r\n\
              Subject: Re: lunch\r\n\r\nsure\r\n",
        );
        let unrelated = user.thread_id_for(
            b"Message-Id: <c@x>\r\nSubject: quarterly report\r\n\r\nnumbers\r\n",
        );
        assert_eq!(first, reply);
        assert_ne!(first, unrelated);
    }

    #[tokio::test]
    async fn wait_for_changes_wakes_on_append() {
        let backend = MemoryBackend::with_demo_data();
        let session = session(&backend);
        let (view, _) = session
            .select_mailbox(&Mailbox::Inbox, false)
            .await
            .unwrap();
        let (_done_tx, done_rx) = watch::channel(false);

        let waiter = {
            let session = session.clone();
            tokio::spawn(async move {
                session
                    .wait_for_changes(&Mailbox::Inbox, view.epoch, done_rx)
                    .await
            })
        };

        session
            .append_messages(
                &Mailbox::Inbox,
                &[AppendMessage {
                    flags: vec![],
                    date: None,
                    message: b"Subject: x\r\n\r\nbody\r\n".to_vec(),
                }],
            )
            .await
            .unwrap();

        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap()
            .unwrap();
    }
}

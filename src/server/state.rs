//! The connection state machine.
//!
//! [`ConnectionState`] tracks phase, session and selection, gates each
//! command on its phase category, and runs the per-verb handlers against the
//! backend. The supervisor in [`crate::server`] owns the wire; everything
//! here works on typed commands and responses.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use lettermill_types::command::{AppendMessage, Command, CommandBody, CommandCategory};
use lettermill_types::core::Tag;
use lettermill_types::fetch::{
    FetchAttribute, MacroOrFetchAttributes, MessageDataItem,
};
use lettermill_types::flag::{Flag, FlagPerm, StoreResponse, StoreType};
use lettermill_types::mailbox::{ListMailbox, Mailbox};
use lettermill_types::response::{Capability, Code, Condition, Data, Response};
use lettermill_types::search::SearchKey;
use lettermill_types::sequence::SequenceSet;
use lettermill_types::state::ConnectionPhase;
use lettermill_types::status::{StatusAttribute, StatusItem};
use log::info;
use tokio::sync::watch;

use crate::auth::{Credentials, SaslRegistry};
use crate::backend::selected::{ForkMode, ResolvedMessage, SelectedMailbox};
use crate::backend::{
    Backend, BackendError, MailboxUpdate, MessageData, SearchContext, Session,
};
use crate::config::ImapConfig;
use crate::mime;

/// State of one IMAP connection.
pub struct ConnectionState<B: Backend> {
    config: Arc<ImapConfig>,
    backend: Arc<B>,
    session: Option<B::Session>,
    selected: Option<SelectedMailbox>,
    capability: Vec<Capability>,
    auth: SaslRegistry,
}

impl<B: Backend> ConnectionState<B> {
    /// `tls_available`: a TLS context exists and the transport has not been
    /// upgraded yet. `secure`: the transport already protects plaintext.
    pub fn new(
        config: Arc<ImapConfig>,
        backend: Arc<B>,
        tls_available: bool,
        secure: bool,
    ) -> Self {
        let mut capability = vec![Capability::Imap4rev1];
        capability.extend(config.initial_capability.iter().cloned());
        if tls_available {
            capability.push(Capability::StartTls);
        }
        let plaintext_ok = secure || config.insecure_login;
        if !plaintext_ok {
            capability.push(Capability::LoginDisabled);
        }
        let auth = if plaintext_ok {
            SaslRegistry::plaintext()
        } else {
            SaslRegistry::empty()
        };
        Self {
            config,
            backend,
            session: None,
            selected: None,
            capability,
            auth,
        }
    }

    pub fn phase(&self) -> ConnectionPhase {
        match (&self.session, &self.selected) {
            (None, _) => ConnectionPhase::NotAuthenticated,
            (Some(_), None) => ConnectionPhase::Authenticated,
            (Some(_), Some(_)) => ConnectionPhase::Selected,
        }
    }

    pub fn auth_registry(&self) -> &SaslRegistry {
        &self.auth
    }

    /// The capability list as currently advertised: `AUTH=` entries appear
    /// only before authentication.
    pub fn capability_list(&self) -> Vec<Capability> {
        let mut capability = self.capability.clone();
        if self.session.is_none() {
            capability.extend(
                self.auth
                    .names()
                    .map(|name| Capability::Auth(name.to_owned())),
            );
        }
        capability
    }

    fn login_disabled(&self) -> bool {
        self.capability.contains(&Capability::LoginDisabled)
    }

    fn idle_enabled(&self) -> bool {
        self.capability.contains(&Capability::Idle)
    }

    fn session_ref(&self) -> Result<&B::Session, BackendError> {
        self.session
            .as_ref()
            .ok_or_else(|| BackendError::NotAllowed("Must authenticate first.".into()))
    }

    /// Per-command cleanup, run on every exit path.
    pub fn cleanup(&mut self) {
        if let Some(selected) = &mut self.selected {
            selected.hide_expunged = false;
        }
    }

    /// The greeting; logs the preauth user in when the config names one.
    pub async fn do_greeting(&mut self) -> Response {
        if let Some(credentials) = self.config.preauth_credentials.clone() {
            match self.backend.login(&credentials).await {
                Ok(session) => {
                    self.session = Some(session);
                    self.capability
                        .extend(self.config.login_capability.iter().cloned());
                }
                Err(error) => {
                    return Response::bye(error.to_string());
                }
            }
        }
        let condition = if self.session.is_some() {
            Condition::PreAuth
        } else {
            Condition::Ok
        };
        Response::greeting(
            condition,
            format!("Server ready {}", self.config.greeting_hostname),
        )
        .with_code(Code::Capability(self.capability_list()))
    }

    /// Phase gate: `Some(BAD)` when the command is not legal right now.
    pub fn check_phase(&self, tag: &Tag, body: &CommandBody) -> Option<Response> {
        let name = body.name();
        match body.category() {
            CommandCategory::Any => None,
            CommandCategory::NonAuth => self.session.is_some().then(|| {
                Response::bad(tag.clone(), format!("{name}: Already authenticated."))
            }),
            CommandCategory::Auth => self.session.is_none().then(|| {
                Response::bad(
                    tag.clone(),
                    format!("{name}: Must authenticate first."),
                )
            }),
            CommandCategory::Select => {
                if self.session.is_none() {
                    Some(Response::bad(
                        tag.clone(),
                        format!("{name}: Must authenticate first."),
                    ))
                } else if self.selected.is_none() {
                    Some(Response::bad(
                        tag.clone(),
                        format!("{name}: Must select a mailbox first."),
                    ))
                } else {
                    None
                }
            }
        }
    }

    /// Dispatch one command. AUTHENTICATE, IDLE and STARTTLS have their wire
    /// interactions driven by the supervisor; their state transitions still
    /// live here.
    pub async fn do_command(&mut self, cmd: Command) -> Response {
        let Command { tag, body } = cmd;
        if let Some(bad) = self.check_phase(&tag, &body) {
            return bad;
        }
        // UID-prefixed commands keep expunged messages addressable for the
        // duration of the command.
        if body.is_uid() {
            if let Some(selected) = &mut self.selected {
                selected.hide_expunged = true;
            }
        }
        let result = match body {
            CommandBody::Capability => self.do_capability(tag.clone()),
            CommandBody::Noop => self.do_noop(tag.clone()).await,
            CommandBody::Logout => self.do_logout(tag.clone()),
            CommandBody::Id { .. } => self.do_id(tag.clone()),
            CommandBody::StartTls => self.do_starttls(tag.clone()),
            CommandBody::Authenticate { .. } => {
                Ok(Response::no(tag.clone(), "Invalid authentication mechanism."))
            }
            CommandBody::Login { username, password } => {
                self.do_login(tag.clone(), username, password).await
            }
            CommandBody::Select { mailbox } => {
                self.do_select(tag.clone(), mailbox, false).await
            }
            CommandBody::Examine { mailbox } => {
                self.do_select(tag.clone(), mailbox, true).await
            }
            CommandBody::Create { mailbox } => {
                self.do_create(tag.clone(), mailbox).await
            }
            CommandBody::Delete { mailbox } => {
                self.do_delete(tag.clone(), mailbox).await
            }
            CommandBody::Rename { from, to } => {
                self.do_rename(tag.clone(), from, to).await
            }
            CommandBody::Subscribe { mailbox } => {
                self.do_subscribe(tag.clone(), mailbox, true).await
            }
            CommandBody::Unsubscribe { mailbox } => {
                self.do_subscribe(tag.clone(), mailbox, false).await
            }
            CommandBody::List { reference, pattern } => {
                self.do_list(tag.clone(), reference, pattern, false).await
            }
            CommandBody::Lsub { reference, pattern } => {
                self.do_list(tag.clone(), reference, pattern, true).await
            }
            CommandBody::Status {
                mailbox,
                attributes,
            } => self.do_status(tag.clone(), mailbox, attributes).await,
            CommandBody::Append { mailbox, messages } => {
                self.do_append(tag.clone(), mailbox, messages).await
            }
            CommandBody::Check => self.do_check(tag.clone()).await,
            CommandBody::Close => self.do_close(tag.clone()).await,
            CommandBody::Unselect => self.do_unselect(tag.clone()),
            CommandBody::Expunge { uid_set } => {
                self.do_expunge(tag.clone(), uid_set).await
            }
            CommandBody::Copy {
                sequence_set,
                mailbox,
                uid,
            } => {
                self.do_copy_move(tag.clone(), sequence_set, mailbox, uid, false)
                    .await
            }
            CommandBody::Move {
                sequence_set,
                mailbox,
                uid,
            } => {
                self.do_copy_move(tag.clone(), sequence_set, mailbox, uid, true)
                    .await
            }
            CommandBody::Fetch {
                sequence_set,
                attributes,
                uid,
            } => {
                self.do_fetch(tag.clone(), sequence_set, attributes, uid)
                    .await
            }
            CommandBody::Store {
                sequence_set,
                kind,
                response,
                flags,
                uid,
            } => {
                self.do_store(tag.clone(), sequence_set, kind, response, flags, uid)
                    .await
            }
            CommandBody::Search {
                charset,
                criteria,
                uid,
            } => self.do_search(tag.clone(), charset, criteria, uid).await,
            CommandBody::Idle => self.do_idle(tag.clone()),
        };
        result.unwrap_or_else(|error| error.to_response(tag))
    }

    fn do_capability(&self, tag: Tag) -> Result<Response, BackendError> {
        let mut resp = Response::ok(tag, "Capabilities listed.");
        resp.add_untagged(Data::Capability(self.capability_list()));
        Ok(resp)
    }

    fn do_id(&self, tag: Tag) -> Result<Response, BackendError> {
        let mut resp = Response::ok(tag, "ID completed.");
        resp.add_untagged(Data::Id { parameters: None });
        Ok(resp)
    }

    fn do_logout(&mut self, tag: Tag) -> Result<Response, BackendError> {
        self.selected = None;
        let mut resp = Response::ok(tag, "Logout successful.");
        resp.add_untagged_bye("Logging out.");
        Ok(resp)
    }

    async fn do_noop(&mut self, tag: Tag) -> Result<Response, BackendError> {
        let mut resp = Response::ok(tag, "NOOP completed.");
        self.refresh(&mut resp, ForkMode::Full).await?;
        Ok(resp)
    }

    async fn do_check(&mut self, tag: Tag) -> Result<Response, BackendError> {
        let mut resp = Response::ok(tag, "CHECK completed.");
        self.refresh(&mut resp, ForkMode::Full).await?;
        Ok(resp)
    }

    /// The state half of AUTHENTICATE and LOGIN: install the session.
    pub async fn do_authenticate(
        &mut self,
        tag: Tag,
        credentials: Option<Credentials>,
    ) -> Response {
        let Some(credentials) = credentials else {
            return Response::no(tag, "Invalid authentication mechanism.");
        };
        match self.backend.login(&credentials).await {
            Ok(session) => {
                info!("authenticated user {}", credentials.authcid);
                self.session = Some(session);
                self.capability
                    .extend(self.config.login_capability.iter().cloned());
                Response::ok(tag, "Authentication successful.")
            }
            Err(error) => error.to_response(tag),
        }
    }

    async fn do_login(
        &mut self,
        tag: Tag,
        username: String,
        password: String,
    ) -> Result<Response, BackendError> {
        if self.login_disabled() {
            return Err(BackendError::NotAllowed("LOGIN is disabled.".into()));
        }
        Ok(self
            .do_authenticate(tag, Some(Credentials::plain(username, password)))
            .await)
    }

    fn do_starttls(&mut self, tag: Tag) -> Result<Response, BackendError> {
        let Some(position) = self
            .capability
            .iter()
            .position(|cap| *cap == Capability::StartTls)
        else {
            return Err(BackendError::NotAllowed("STARTTLS not available.".into()));
        };
        self.capability.remove(position);
        self.capability
            .retain(|cap| *cap != Capability::LoginDisabled);
        self.auth = SaslRegistry::plaintext();
        Ok(Response::ok(tag, "Ready to handshake."))
    }

    async fn do_select(
        &mut self,
        tag: Tag,
        mailbox: Mailbox,
        readonly: bool,
    ) -> Result<Response, BackendError> {
        self.selected = None;
        let session = self.session_ref()?;
        let (view, claimed) = session.select_mailbox(&mailbox, readonly).await?;

        let code = if readonly {
            Code::ReadOnly
        } else {
            Code::ReadWrite
        };
        let mut resp = Response::ok(tag, "Selected mailbox.").with_code(code);

        let permanent: Vec<FlagPerm> = if readonly {
            Vec::new()
        } else {
            view.flags.iter().cloned().map(FlagPerm::Flag).collect()
        };
        let text = if readonly {
            "Read-only mailbox."
        } else {
            "Flags permitted."
        };
        resp.add_untagged_ok(text, Some(Code::PermanentFlags(permanent)));

        let mut flags = view.flags.clone();
        flags.push(Flag::Recent);
        flags.sort();
        resp.add_untagged(Data::Flags(flags));
        resp.add_untagged(Data::Exists(view.exists()));
        let recent = if readonly {
            view.recent
        } else {
            claimed.len() as u32
        };
        resp.add_untagged(Data::Recent(recent));
        resp.add_untagged_ok(
            "Predicted next UID.",
            Some(Code::UidNext(view.next_uid)),
        );
        resp.add_untagged_ok(
            "UIDs valid.",
            Some(Code::UidValidity(view.uid_validity)),
        );
        if let Some(first_unseen) = view.first_unseen() {
            resp.add_untagged_ok(
                "First unseen message.",
                Some(Code::Unseen(first_unseen)),
            );
        }

        self.selected = Some(SelectedMailbox::new(&view, claimed, readonly));
        Ok(resp)
    }

    async fn do_create(
        &mut self,
        tag: Tag,
        mailbox: Mailbox,
    ) -> Result<Response, BackendError> {
        if mailbox.is_inbox() {
            return Ok(Response::no(tag, "Cannot create INBOX."));
        }
        self.session_ref()?.create_mailbox(&mailbox).await?;
        let mut resp = Response::ok(tag, "CREATE completed.");
        self.refresh(&mut resp, ForkMode::Full).await?;
        Ok(resp)
    }

    async fn do_delete(
        &mut self,
        tag: Tag,
        mailbox: Mailbox,
    ) -> Result<Response, BackendError> {
        if mailbox.is_inbox() {
            return Ok(Response::no(tag, "Cannot delete INBOX."));
        }
        self.session_ref()?.delete_mailbox(&mailbox).await?;
        let mut resp = Response::ok(tag, "DELETE completed.");
        self.refresh(&mut resp, ForkMode::Full).await?;
        Ok(resp)
    }

    async fn do_rename(
        &mut self,
        tag: Tag,
        from: Mailbox,
        to: Mailbox,
    ) -> Result<Response, BackendError> {
        if to.is_inbox() {
            return Ok(Response::no(tag, "Cannot rename to INBOX."));
        }
        self.session_ref()?.rename_mailbox(&from, &to).await?;
        let mut resp = Response::ok(tag, "RENAME completed.");
        self.refresh(&mut resp, ForkMode::Full).await?;
        Ok(resp)
    }

    async fn do_subscribe(
        &mut self,
        tag: Tag,
        mailbox: Mailbox,
        subscribe: bool,
    ) -> Result<Response, BackendError> {
        let session = self.session_ref()?;
        let text = if subscribe {
            session.subscribe(&mailbox).await?;
            "SUBSCRIBE completed."
        } else {
            session.unsubscribe(&mailbox).await?;
            "UNSUBSCRIBE completed."
        };
        let mut resp = Response::ok(tag, text);
        self.refresh(&mut resp, ForkMode::Full).await?;
        Ok(resp)
    }

    async fn do_list(
        &mut self,
        tag: Tag,
        reference: Mailbox,
        pattern: ListMailbox,
        subscribed_only: bool,
    ) -> Result<Response, BackendError> {
        let session = self.session_ref()?;
        let listings = session
            .list_mailboxes(&reference, &pattern, subscribed_only)
            .await?;
        let text = if subscribed_only {
            "LSUB completed."
        } else {
            "LIST completed."
        };
        let mut resp = Response::ok(tag, text);
        for listing in listings {
            let data = if subscribed_only {
                Data::Lsub {
                    attributes: listing.attributes,
                    delimiter: listing.delimiter,
                    mailbox: listing.name,
                }
            } else {
                Data::List {
                    attributes: listing.attributes,
                    delimiter: listing.delimiter,
                    mailbox: listing.name,
                }
            };
            resp.add_untagged(data);
        }
        self.refresh(&mut resp, ForkMode::Full).await?;
        Ok(resp)
    }

    async fn do_status(
        &mut self,
        tag: Tag,
        mailbox: Mailbox,
        attributes: Vec<StatusAttribute>,
    ) -> Result<Response, BackendError> {
        let session = self.session_ref()?;
        let status = session.status_mailbox(&mailbox).await?;
        // RECENT for the currently selected mailbox comes from the live
        // session flags, not the stale store counter.
        let recent = match &self.selected {
            Some(selected) if selected.name() == &mailbox => {
                selected.recent_count()
            }
            _ => status.recent,
        };
        let items = attributes
            .into_iter()
            .map(|attribute| StatusItem {
                attribute,
                value: match attribute {
                    StatusAttribute::Messages => status.messages,
                    StatusAttribute::Recent => recent,
                    StatusAttribute::UidNext => status.uid_next,
                    StatusAttribute::UidValidity => status.uid_validity,
                    StatusAttribute::Unseen => status.unseen,
                },
            })
            .collect();
        let mut resp = Response::ok(tag, "STATUS completed.");
        resp.add_untagged(Data::Status { mailbox, items });
        self.refresh(&mut resp, ForkMode::Full).await?;
        Ok(resp)
    }

    async fn do_append(
        &mut self,
        tag: Tag,
        mailbox: Mailbox,
        messages: Vec<AppendMessage>,
    ) -> Result<Response, BackendError> {
        if messages.iter().any(|message| message.message.is_empty()) {
            return Ok(Response::no(tag, "APPEND cancelled."));
        }
        let session = self.session_ref()?;
        let info = session.append_messages(&mailbox, &messages).await?;
        let mut resp = Response::ok(tag, "APPEND completed.");
        if let Some(uids) = SequenceSet::from_values(info.uids.iter().copied()) {
            resp = resp.with_code(Code::AppendUid {
                validity: info.validity,
                uids,
            });
        }
        self.refresh(&mut resp, ForkMode::Full).await?;
        Ok(resp)
    }

    async fn do_close(&mut self, tag: Tag) -> Result<Response, BackendError> {
        if let Some(selected) = self.selected.take() {
            if !selected.readonly() {
                self.session_ref()?
                    .expunge_mailbox(selected.name(), None)
                    .await?;
            }
        }
        Ok(Response::ok(tag, "CLOSE completed."))
    }

    fn do_unselect(&mut self, tag: Tag) -> Result<Response, BackendError> {
        self.selected = None;
        Ok(Response::ok(tag, "UNSELECT completed."))
    }

    async fn do_expunge(
        &mut self,
        tag: Tag,
        uid_set: Option<SequenceSet>,
    ) -> Result<Response, BackendError> {
        let (session, selected) = self.parts()?;
        if selected.readonly() {
            return Ok(Response::no(tag, "Mailbox is read-only.")
                .with_code(Code::ReadOnly));
        }
        let uids = uid_set.map(|set| set.resolve_uids(&selected.seq_uids()));
        session
            .expunge_mailbox(selected.name(), uids.as_deref())
            .await?;
        let mut resp = Response::ok(tag, "EXPUNGE completed.");
        self.refresh(&mut resp, ForkMode::Full).await?;
        Ok(resp)
    }

    async fn do_copy_move(
        &mut self,
        tag: Tag,
        sequence_set: SequenceSet,
        mailbox: Mailbox,
        uid: bool,
        is_move: bool,
    ) -> Result<Response, BackendError> {
        let (session, selected) = self.parts()?;
        let everything: HashSet<u32> = selected.seq_uids().into_iter().collect();
        let uids: Vec<u32> = selected
            .resolve(&sequence_set, uid, &everything)
            .into_iter()
            .map(|message| message.uid)
            .collect();
        let name = if is_move { "MOVE" } else { "COPY" };
        let info = if is_move {
            session
                .move_messages(selected.name(), &uids, &mailbox)
                .await?
        } else {
            session
                .copy_messages(selected.name(), &uids, &mailbox)
                .await?
        };
        let mut resp = Response::ok(tag, format!("{name} completed."));
        if let (Some(source), Some(destination)) = (
            SequenceSet::from_values(info.source.iter().copied()),
            SequenceSet::from_values(info.destination.iter().copied()),
        ) {
            resp = resp.with_code(Code::CopyUid {
                validity: info.validity,
                source,
                destination,
            });
        }
        self.refresh(&mut resp, ForkMode::Full).await?;
        Ok(resp)
    }

    async fn do_fetch(
        &mut self,
        tag: Tag,
        sequence_set: SequenceSet,
        attributes: MacroOrFetchAttributes,
        uid: bool,
    ) -> Result<Response, BackendError> {
        let (session, selected) = self.parts_mut()?;
        let mut attributes = attributes.resolve();
        if uid && !attributes.contains(&FetchAttribute::Uid) {
            attributes.insert(0, FetchAttribute::Uid);
        }

        let update = session
            .poll_mailbox(selected.name(), !selected.readonly())
            .await?;
        let current: HashSet<u32> = update
            .view
            .as_ref()
            .map(|view| view.messages.iter().map(|m| m.uid).collect())
            .unwrap_or_default();
        let resolved = selected.resolve(&sequence_set, uid, &current);
        let live: Vec<u32> = resolved
            .iter()
            .filter(|message| !message.expunged)
            .map(|message| message.uid)
            .collect();
        let mut data: HashMap<u32, MessageData> = session
            .fetch_messages(selected.name(), &live)
            .await?
            .into_iter()
            .map(|message| (message.uid, message))
            .collect();

        // BODY without PEEK implicitly sets \Seen; silence the echo since
        // the updated flags are reported right here.
        let implicit_seen = !selected.readonly()
            && attributes.iter().any(FetchAttribute::sets_seen);
        if implicit_seen {
            let to_mark: Vec<u32> = live
                .iter()
                .copied()
                .filter(|uid| {
                    data.get(uid)
                        .map(|m| !m.flags.contains(&Flag::Seen))
                        .unwrap_or(false)
                })
                .collect();
            if !to_mark.is_empty() {
                let updated = session
                    .update_flags(
                        selected.name(),
                        &to_mark,
                        &[Flag::Seen],
                        StoreType::Add,
                    )
                    .await?;
                for (uid, flags) in updated {
                    if let Some(message) = data.get_mut(&uid) {
                        message.flags = flags;
                    }
                }
                selected.silence(&to_mark);
            }
        }

        let mut resp = Response::ok(tag, "FETCH completed.");
        let mut expunge_issued = false;
        for message in &resolved {
            if message.expunged {
                expunge_issued = true;
                resp.add_untagged(Data::Fetch {
                    seq: message.seq,
                    items: expunged_items(&attributes, message),
                });
                continue;
            }
            let Some(message_data) = data.get(&message.uid) else {
                continue;
            };
            resp.add_untagged(Data::Fetch {
                seq: message.seq,
                items: fetch_items(&attributes, message_data, selected),
            });
        }
        if expunge_issued {
            resp.code = Some(Code::ExpungeIssued);
        }

        let mode = if uid {
            ForkMode::Full
        } else {
            ForkMode::DeferExpunges
        };
        apply_update(&mut self.selected, &mut resp, &update, mode);
        Ok(resp)
    }

    async fn do_store(
        &mut self,
        tag: Tag,
        sequence_set: SequenceSet,
        kind: StoreType,
        echo: StoreResponse,
        flags: Vec<Flag>,
        uid: bool,
    ) -> Result<Response, BackendError> {
        let (session, selected) = self.parts_mut()?;
        if selected.readonly() {
            return Ok(Response::no(tag, "Mailbox is read-only.")
                .with_code(Code::ReadOnly));
        }
        // \Recent is session-only and silently unsettable.
        let flags: Vec<Flag> = flags
            .into_iter()
            .filter(|flag| !flag.is_recent())
            .collect();

        let everything: HashSet<u32> = selected.seq_uids().into_iter().collect();
        let targets: Vec<u32> = selected
            .resolve(&sequence_set, uid, &everything)
            .into_iter()
            .map(|message| message.uid)
            .collect();
        let updated = session
            .update_flags(selected.name(), &targets, &flags, kind)
            .await?;
        let stored: HashMap<u32, Vec<Flag>> = updated.into_iter().collect();

        let update = session
            .poll_mailbox(selected.name(), !selected.readonly())
            .await?;
        let current: HashSet<u32> = update
            .view
            .as_ref()
            .map(|view| view.messages.iter().map(|m| m.uid).collect())
            .unwrap_or_default();

        let mut resp = Response::ok(tag, "STORE completed.");
        let mut expunge_issued = false;
        for message in selected.resolve(&sequence_set, uid, &current) {
            if message.expunged {
                expunge_issued = true;
                continue;
            }
            let Some(new_flags) = stored.get(&message.uid) else {
                continue;
            };
            if echo == StoreResponse::Answer {
                let mut items = vec![MessageDataItem::Flags(
                    selected.flags_for(message.uid, new_flags),
                )];
                if uid {
                    items.push(MessageDataItem::Uid(message.uid));
                }
                resp.add_untagged(Data::Fetch {
                    seq: message.seq,
                    items,
                });
            }
        }
        if expunge_issued {
            resp.code = Some(Code::ExpungeIssued);
        }
        // Whether echoed here or silenced, the fork must not repeat it.
        selected.silence(&targets);

        let mode = if uid {
            ForkMode::Full
        } else {
            ForkMode::DeferExpunges
        };
        apply_update(&mut self.selected, &mut resp, &update, mode);
        Ok(resp)
    }

    async fn do_search(
        &mut self,
        tag: Tag,
        charset: Option<String>,
        criteria: SearchKey,
        uid: bool,
    ) -> Result<Response, BackendError> {
        if let Some(charset) = charset {
            let known = charset.eq_ignore_ascii_case("US-ASCII")
                || charset.eq_ignore_ascii_case("UTF-8");
            if !known {
                return Err(BackendError::CannotSearch);
            }
        }
        let (session, selected) = self.parts()?;
        let context = SearchContext {
            seq_uids: selected.seq_uids(),
            recent: selected.recent_uids(),
        };
        let uids = session
            .search_mailbox(selected.name(), &criteria, &context)
            .await?;
        let ids: Vec<u32> = if uid {
            uids
        } else {
            uids.iter()
                .filter_map(|uid| selected.seq_of_uid(*uid))
                .collect()
        };
        let mut resp = Response::ok(tag, "SEARCH completed.");
        resp.add_untagged(Data::Search(ids));
        let mode = if uid {
            ForkMode::Full
        } else {
            ForkMode::DeferExpunges
        };
        self.refresh(&mut resp, mode).await?;
        Ok(resp)
    }

    fn do_idle(&self, tag: Tag) -> Result<Response, BackendError> {
        if !self.idle_enabled() {
            return Err(BackendError::NotAllowed("IDLE is disabled.".into()));
        }
        Ok(Response::ok(tag, "IDLE completed."))
    }

    /// One IDLE update poll: wait for a change (or `done`), then fold it in.
    /// `Ok(None)` means the selected mailbox disappeared.
    pub async fn receive_updates(
        &mut self,
        done: watch::Receiver<bool>,
    ) -> Result<Option<Vec<lettermill_types::response::Untagged>>, BackendError>
    {
        let Self {
            session: Some(session),
            selected: selected_slot,
            ..
        } = self
        else {
            return Ok(Some(Vec::new()));
        };
        let Some(selected) = selected_slot else {
            return Ok(Some(Vec::new()));
        };
        let name = selected.name().clone();
        let claim = !selected.readonly();
        session
            .wait_for_changes(&name, selected.epoch(), done)
            .await?;
        let update = session.poll_mailbox(&name, claim).await?;
        match selected.fork(&update, ForkMode::Full) {
            Some(untagged) => Ok(Some(untagged)),
            None => {
                *selected_slot = None;
                Ok(None)
            }
        }
    }

    /// Poll the backend for the open mailbox and attach whatever untagged
    /// responses are owed. A vanished mailbox turns the response terminal.
    async fn refresh(
        &mut self,
        resp: &mut Response,
        mode: ForkMode,
    ) -> Result<(), BackendError> {
        let (name, claim) = match (&self.session, &self.selected) {
            (Some(_), Some(selected)) => {
                (selected.name().clone(), !selected.readonly())
            }
            _ => return Ok(()),
        };
        let update = self.session_ref()?.poll_mailbox(&name, claim).await?;
        apply_update(&mut self.selected, resp, &update, mode);
        Ok(())
    }

    fn parts(&self) -> Result<(&B::Session, &SelectedMailbox), BackendError> {
        match (&self.session, &self.selected) {
            (Some(session), Some(selected)) => Ok((session, selected)),
            _ => Err(BackendError::NotAllowed(
                "Must select a mailbox first.".into(),
            )),
        }
    }

    fn parts_mut(
        &mut self,
    ) -> Result<(&B::Session, &mut SelectedMailbox), BackendError> {
        match (&self.session, &mut self.selected) {
            (Some(session), Some(selected)) => Ok((session, selected)),
            _ => Err(BackendError::NotAllowed(
                "Must select a mailbox first.".into(),
            )),
        }
    }
}

/// Fold a polled update into the selection, attaching the untagged output to
/// `resp`; a vanished mailbox yields the forced `BYE`.
fn apply_update(
    selected_slot: &mut Option<SelectedMailbox>,
    resp: &mut Response,
    update: &MailboxUpdate,
    mode: ForkMode,
) {
    let Some(selected) = selected_slot else {
        return;
    };
    match selected.fork(update, mode) {
        Some(untagged) => resp.untagged.extend(untagged),
        None => {
            resp.add_untagged_bye("Selected mailbox no longer exists.");
            *selected_slot = None;
        }
    }
}

/// Items reported for a message expunged since selection: at most UID,
/// FLAGS and INTERNALDATE survive.
fn expunged_items(
    attributes: &[FetchAttribute],
    message: &ResolvedMessage,
) -> Vec<MessageDataItem> {
    attributes
        .iter()
        .filter_map(|attribute| match attribute {
            FetchAttribute::Uid => Some(MessageDataItem::Uid(message.uid)),
            FetchAttribute::Flags => {
                Some(MessageDataItem::Flags(message.flags.clone()))
            }
            FetchAttribute::InternalDate => {
                Some(MessageDataItem::InternalDate(None))
            }
            _ => None,
        })
        .collect()
}

/// Compute the response items for one live message.
fn fetch_items(
    attributes: &[FetchAttribute],
    message: &MessageData,
    selected: &SelectedMailbox,
) -> Vec<MessageDataItem> {
    let body = message.body.as_slice();
    attributes
        .iter()
        .map(|attribute| match attribute {
            FetchAttribute::Uid => MessageDataItem::Uid(message.uid),
            FetchAttribute::Flags => MessageDataItem::Flags(
                selected.flags_for(message.uid, &message.flags),
            ),
            FetchAttribute::InternalDate => {
                MessageDataItem::InternalDate(message.internal_date)
            }
            FetchAttribute::Rfc822Size => {
                MessageDataItem::Rfc822Size(body.len() as u32)
            }
            FetchAttribute::Envelope => {
                MessageDataItem::Envelope(mime::envelope(body))
            }
            FetchAttribute::Body => {
                MessageDataItem::Body(mime::body_structure(body))
            }
            FetchAttribute::BodyStructure => {
                MessageDataItem::BodyStructure(mime::body_structure(body))
            }
            FetchAttribute::BodyExt {
                section,
                partial,
                peek: _,
            } => {
                let data = mime::section_bytes(body, section.as_ref())
                    .map(|data| mime::apply_partial(data, *partial));
                MessageDataItem::BodyExt {
                    section: section.clone(),
                    origin: partial.map(|(origin, _)| origin),
                    data,
                }
            }
            FetchAttribute::Rfc822 => {
                MessageDataItem::Rfc822(Some(body.to_vec()))
            }
            FetchAttribute::Rfc822Header => {
                let (header, _) = mime::split_message(body);
                MessageDataItem::Rfc822Header(Some(header.to_vec()))
            }
            FetchAttribute::Rfc822Text => {
                let (_, text) = mime::split_message(body);
                MessageDataItem::Rfc822Text(Some(text.to_vec()))
            }
            FetchAttribute::Binary {
                part,
                partial,
                peek: _,
            } => {
                let data = mime::binary_bytes(body, part)
                    .map(|data| mime::apply_partial(data, *partial));
                MessageDataItem::Binary {
                    part: part.clone(),
                    data,
                }
            }
            FetchAttribute::BinarySize { part } => MessageDataItem::BinarySize {
                part: part.clone(),
                size: mime::binary_size(body, part).unwrap_or(0),
            },
        })
        .collect()
}

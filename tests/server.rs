//! End-to-end scenarios: a scripted client drives a full connection over an
//! in-process duplex pipe against the in-memory backend.

use std::sync::Arc;
use std::time::Duration;

use lettermill::backend::memory::MemoryBackend;
use lettermill::{handle_connection, ImapConfig};
use pretty_assertions::assert_eq;
use regex::Regex;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::sync::watch;

struct Client {
    io: BufReader<DuplexStream>,
    _shutdown: watch::Sender<bool>,
}

impl Client {
    /// Connect a fresh scripted client to the server.
    fn connect(backend: &MemoryBackend, config: &ImapConfig) -> Self {
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(handle_connection(
            Arc::new(backend.clone()),
            Arc::new(config.clone()),
            None,
            Box::new(server_io),
            "test".into(),
            true,
            shutdown_rx,
        ));
        Self {
            io: BufReader::new(client_io),
            _shutdown: shutdown_tx,
        }
    }

    async fn send(&mut self, line: &str) {
        self.io
            .write_all(format!("{line}\r\n").as_bytes())
            .await
            .expect("write");
    }

    async fn send_raw(&mut self, bytes: &[u8]) {
        self.io.write_all(bytes).await.expect("write");
    }

    async fn line(&mut self) -> String {
        let mut line = Vec::new();
        tokio::time::timeout(
            Duration::from_secs(5),
            self.io.read_until(b'\n', &mut line),
        )
        .await
        .expect("timed out waiting for a line")
        .expect("read");
        assert!(!line.is_empty(), "connection closed unexpectedly");
        let text = String::from_utf8_lossy(&line);
        text.trim_end_matches(['\r', '\n']).to_owned()
    }

    async fn expect(&mut self, expected: &str) {
        assert_eq!(self.line().await, expected);
    }

    /// Match the next line against a regex; returns the first capture.
    async fn expect_match(&mut self, pattern: &str) -> Option<String> {
        let line = self.line().await;
        let regex = Regex::new(pattern).expect("valid regex");
        let captures = regex
            .captures(&line)
            .unwrap_or_else(|| panic!("line {line:?} does not match {pattern:?}"));
        captures.get(1).map(|group| group.as_str().to_owned())
    }

    async fn login(&mut self) {
        self.expect_match(
            r"^\* OK \[CAPABILITY IMAP4rev1[^\]]*\] Server ready \S+$",
        )
        .await;
        self.send("login1 LOGIN testuser testpass").await;
        self.expect("login1 OK Authentication successful.").await;
    }

    async fn select_inbox(&mut self, exists: u32, recent: u32, uidnext: u32) {
        self.send("select1 SELECT INBOX").await;
        self.expect(
            "* OK [PERMANENTFLAGS (\\Answered \\Deleted \\Draft \\Flagged \
             \\Seen)] Flags permitted.",
        )
        .await;
        self.expect(
            "* FLAGS (\\Answered \\Deleted \\Draft \\Flagged \\Recent \\Seen)",
        )
        .await;
        self.expect(&format!("* {exists} EXISTS")).await;
        self.expect(&format!("* {recent} RECENT")).await;
        self.expect(&format!("* OK [UIDNEXT {uidnext}] Predicted next UID."))
            .await;
        self.expect_match(r"^\* OK \[UIDVALIDITY (\d+)\] UIDs valid\.$")
            .await;
        self.expect_match(r"^\* OK \[UNSEEN \d+\] First unseen message\.$")
            .await;
        self.expect("select1 OK [READ-WRITE] Selected mailbox.").await;
    }

    async fn logout(&mut self) {
        self.send("logout1 LOGOUT").await;
        self.expect("* BYE Logging out.").await;
        self.expect("logout1 OK Logout successful.").await;
    }
}

fn demo() -> (MemoryBackend, ImapConfig) {
    (MemoryBackend::with_demo_data(), ImapConfig::default())
}

#[tokio::test]
async fn login_and_select() {
    let (backend, config) = demo();
    let mut client = Client::connect(&backend, &config);
    client.login().await;

    client.send("select1 SELECT INBOX").await;
    client
        .expect(
            "* OK [PERMANENTFLAGS (\\Answered \\Deleted \\Draft \\Flagged \
             \\Seen)] Flags permitted.",
        )
        .await;
    client
        .expect(
            "* FLAGS (\\Answered \\Deleted \\Draft \\Flagged \\Recent \\Seen)",
        )
        .await;
    client.expect("* 4 EXISTS").await;
    client.expect("* 1 RECENT").await;
    client.expect("* OK [UIDNEXT 105] Predicted next UID.").await;
    client
        .expect_match(r"^\* OK \[UIDVALIDITY (\d+)\] UIDs valid\.$")
        .await;
    client
        .expect("* OK [UNSEEN 2] First unseen message.")
        .await;
    client.expect("select1 OK [READ-WRITE] Selected mailbox.").await;
    client.logout().await;
}

#[tokio::test]
async fn append_shows_up_as_recent_in_other_session() {
    let (backend, config) = demo();

    let mut watcher = Client::connect(&backend, &config);
    watcher.login().await;
    watcher.select_inbox(4, 1, 105).await;

    let mut appender = Client::connect(&backend, &config);
    appender.login().await;
    appender
        .send("append1 APPEND INBOX (\\Seen) {14}")
        .await;
    appender.expect("+ Literal string").await;
    appender.send_raw(b"test message\r\n\r\n").await;
    appender
        .expect_match(r"^append1 OK \[APPENDUID (\d+) 105\] APPEND completed\.$")
        .await;

    watcher.send("noop1 NOOP").await;
    watcher.expect("* 5 EXISTS").await;
    watcher.expect("* 2 RECENT").await;
    watcher
        .expect("* 5 FETCH (FLAGS (\\Recent \\Seen))")
        .await;
    watcher.expect("noop1 OK NOOP completed.").await;
}

#[tokio::test]
async fn expunge_response_ordering() {
    let (backend, config) = demo();
    let mut client = Client::connect(&backend, &config);
    client.login().await;
    client.select_inbox(4, 1, 105).await;

    client.send("store1 STORE * +FlAGS (\\Deleted)").await;
    client
        .expect("* 4 FETCH (FLAGS (\\Deleted \\Recent))")
        .await;
    client.expect("store1 OK STORE completed.").await;

    client.send("expunge1 EXPUNGE").await;
    client.expect("* 3 EXISTS").await;
    client.expect("* 0 RECENT").await;
    client.expect("* 4 EXPUNGE").await;
    client.expect("expunge1 OK EXPUNGE completed.").await;
    client.logout().await;
}

#[tokio::test]
async fn idle_streams_updates_until_done() {
    let (backend, config) = demo();

    let mut idler = Client::connect(&backend, &config);
    idler.login().await;
    idler.select_inbox(4, 1, 105).await;
    idler.send("idle1 IDLE").await;
    idler.expect("+ Idling.").await;

    let mut appender = Client::connect(&backend, &config);
    appender.login().await;
    appender
        .send("append1 APPEND INBOX (\\Seen) {14}")
        .await;
    appender.expect("+ Literal string").await;
    appender.send_raw(b"test message\r\n\r\n").await;
    appender
        .expect_match(r"^append1 OK \[APPENDUID \d+ 105\] APPEND completed\.$")
        .await;

    // Still idling: the updates arrive unsolicited.
    idler.expect("* 5 EXISTS").await;
    idler.expect("* 2 RECENT").await;
    idler.expect("* 5 FETCH (FLAGS (\\Recent \\Seen))").await;

    idler.send("DONE").await;
    idler.expect("idle1 OK IDLE completed.").await;
    idler.logout().await;
}

#[tokio::test]
async fn idle_rejects_garbage_done() {
    let (backend, config) = demo();
    let mut client = Client::connect(&backend, &config);
    client.login().await;
    client.select_inbox(4, 1, 105).await;

    client.send("idle1 IDLE").await;
    client.expect("+ Idling.").await;
    client.send("NOPE").await;
    client.expect("idle1 BAD Expected \"DONE\".").await;
    client.logout().await;
}

#[tokio::test]
async fn rename_inbox_leaves_fresh_inbox_behind() {
    let (backend, config) = demo();
    let mut client = Client::connect(&backend, &config);
    client.login().await;

    client
        .send("status1 STATUS INBOX (MESSAGES UIDNEXT UIDVALIDITY)")
        .await;
    let v1 = client
        .expect_match(
            r"^\* STATUS INBOX \(MESSAGES 4 UIDNEXT 105 UIDVALIDITY (\d+)\)$",
        )
        .await
        .expect("captured validity");
    client.expect("status1 OK STATUS completed.").await;

    client.send("rename1 RENAME INBOX \"Inbox Test\"").await;
    client.expect("rename1 OK RENAME completed.").await;

    client
        .send("status2 STATUS INBOX (MESSAGES UIDNEXT UIDVALIDITY)")
        .await;
    let v2 = client
        .expect_match(
            r"^\* STATUS INBOX \(MESSAGES 0 UIDNEXT 101 UIDVALIDITY (\d+)\)$",
        )
        .await
        .expect("captured validity");
    client.expect("status2 OK STATUS completed.").await;
    assert_ne!(v1, v2);

    client
        .send("status3 STATUS \"Inbox Test\" (MESSAGES UIDNEXT UIDVALIDITY)")
        .await;
    client
        .expect(&format!(
            "* STATUS \"Inbox Test\" (MESSAGES 4 UIDNEXT 105 UIDVALIDITY {v1})"
        ))
        .await;
    client.expect("status3 OK STATUS completed.").await;
    client.logout().await;
}

#[tokio::test]
async fn uid_fetch_of_expunged_message_reports_expungeissued() {
    let (backend, config) = demo();

    let mut victim = Client::connect(&backend, &config);
    victim.login().await;
    victim.select_inbox(4, 1, 105).await;

    let mut other = Client::connect(&backend, &config);
    other.login().await;
    other.send("select1 SELECT INBOX").await;
    for _ in 0..8 {
        other.line().await;
    }
    other.send("store1 STORE 1 +FLAGS (\\Deleted)").await;
    other.expect("* 1 FETCH (FLAGS (\\Deleted \\Seen))").await;
    other.expect("store1 OK STORE completed.").await;
    other.send("expunge1 EXPUNGE").await;
    other.expect("* 3 EXISTS").await;
    other.expect("* 1 EXPUNGE").await;
    other.expect("expunge1 OK EXPUNGE completed.").await;

    victim.send("uid1 UID FETCH 101 (FLAGS)").await;
    victim.expect("* 1 FETCH (UID 101 FLAGS (\\Seen))").await;
    victim.expect("* 3 EXISTS").await;
    victim.expect("* 1 EXPUNGE").await;
    victim
        .expect("uid1 OK [EXPUNGEISSUED] FETCH completed.")
        .await;
}

#[tokio::test]
async fn fetch_body_section_as_literal() {
    let (backend, config) = demo();
    let mut client = Client::connect(&backend, &config);
    client.login().await;
    client.select_inbox(4, 1, 105).await;

    client.send("fetch1 FETCH 1 (BODY.PEEK[TEXT])").await;
    client
        .expect("* 1 FETCH (BODY[TEXT] {32}")
        .await;
    client.expect("This is demo message number 1.").await;
    client.expect(")").await;
    client.expect("fetch1 OK FETCH completed.").await;
    client.logout().await;
}

#[tokio::test]
async fn search_returns_sequence_numbers() {
    let (backend, config) = demo();
    let mut client = Client::connect(&backend, &config);
    client.login().await;
    client.select_inbox(4, 1, 105).await;

    client.send("search1 SEARCH UNSEEN").await;
    client.expect("* SEARCH 2 4").await;
    client.expect("search1 OK SEARCH completed.").await;

    client.send("search2 UID SEARCH UNSEEN").await;
    client.expect("* SEARCH 102 104").await;
    client.expect("search2 OK SEARCH completed.").await;

    client.send("search3 SEARCH CHARSET KOI8-R ALL").await;
    client
        .expect("search3 NO [CANNOT] Search key cannot be used.")
        .await;
    client.logout().await;
}

#[tokio::test]
async fn copy_and_move_report_copyuid() {
    let (backend, config) = demo();
    let mut client = Client::connect(&backend, &config);
    client.login().await;
    client.send("create1 CREATE Archive").await;
    client.expect("create1 OK CREATE completed.").await;
    client.select_inbox(4, 1, 105).await;

    client.send("copy1 COPY 1:2 Archive").await;
    client
        .expect_match(r"^copy1 OK \[COPYUID \d+ 101:102 101:102\] COPY completed\.$")
        .await;

    client.send("move1 MOVE 1 Archive").await;
    client
        .expect_match(r"^\* 3 EXISTS$")
        .await;
    client.expect("* 1 EXPUNGE").await;
    client
        .expect_match(r"^move1 OK \[COPYUID \d+ 101 103\] MOVE completed\.$")
        .await;

    client.send("copy2 COPY 1 Missing").await;
    client
        .expect("copy2 NO [TRYCREATE] Mailbox does not exist.")
        .await;
    client.logout().await;
}

#[tokio::test]
async fn bad_command_limit_disconnects() {
    let (backend, config) = demo();
    let mut client = Client::connect(&backend, &config);
    client
        .expect_match(r"^\* OK \[CAPABILITY IMAP4rev1[^\]]*\] Server ready \S+$")
        .await;

    for round in 1..=4 {
        client.send(&format!("t{round} WRONG")).await;
        client
            .expect(&format!("t{round} BAD WRONG: Command not implemented."))
            .await;
    }
    client.send("t5 WRONG").await;
    client.expect("* BYE Too many errors, disconnecting.").await;
    client
        .expect("t5 BAD WRONG: Command not implemented.")
        .await;
}

#[tokio::test]
async fn phase_gating() {
    let (backend, config) = demo();
    let mut client = Client::connect(&backend, &config);
    client
        .expect_match(r"^\* OK \[CAPABILITY IMAP4rev1[^\]]*\] Server ready \S+$")
        .await;

    client.send("f1 FETCH 1 FLAGS").await;
    client
        .expect("f1 BAD FETCH: Must authenticate first.")
        .await;

    client.send("login1 LOGIN testuser testpass").await;
    client.expect("login1 OK Authentication successful.").await;

    client.send("f2 FETCH 1 FLAGS").await;
    client
        .expect("f2 BAD FETCH: Must select a mailbox first.")
        .await;

    client.send("login2 LOGIN testuser testpass").await;
    client
        .expect("login2 BAD LOGIN: Already authenticated.")
        .await;
    client.logout().await;
}

#[tokio::test]
async fn authenticate_plain_challenge_roundtrip() {
    let (backend, config) = demo();
    let mut client = Client::connect(&backend, &config);
    client
        .expect_match(r"^\* OK \[CAPABILITY IMAP4rev1[^\]]*\] Server ready \S+$")
        .await;

    client.send("auth1 AUTHENTICATE PLAIN").await;
    client.expect("+ ").await;
    // base64("\0testuser\0testpass")
    client.send("AHRlc3R1c2VyAHRlc3RwYXNz").await;
    client.expect("auth1 OK Authentication successful.").await;
    client.logout().await;
}

#[tokio::test]
async fn authenticate_can_be_canceled() {
    let (backend, config) = demo();
    let mut client = Client::connect(&backend, &config);
    client
        .expect_match(r"^\* OK \[CAPABILITY IMAP4rev1[^\]]*\] Server ready \S+$")
        .await;

    client.send("auth1 AUTHENTICATE LOGIN").await;
    client.expect_match(r"^\+ .+$").await;
    client.send("*").await;
    client.expect("auth1 BAD Authentication canceled.").await;

    client.send("auth2 AUTHENTICATE XOAUTH2").await;
    client
        .expect("auth2 NO Invalid authentication mechanism.")
        .await;
    client.logout().await;
}

#[tokio::test]
async fn close_expunges_silently_and_unselect_does_not() {
    let (backend, config) = demo();
    let mut client = Client::connect(&backend, &config);
    client.login().await;
    client.select_inbox(4, 1, 105).await;

    client.send("store1 STORE 4 +FLAGS.SILENT (\\Deleted)").await;
    client.expect("store1 OK STORE completed.").await;
    client.send("close1 CLOSE").await;
    client.expect("close1 OK CLOSE completed.").await;

    client.send("select2 SELECT INBOX").await;
    let mut saw_exists = false;
    loop {
        let line = client.line().await;
        if line == "* 3 EXISTS" {
            saw_exists = true;
        }
        if line.starts_with("select2 ") {
            assert_eq!(line, "select2 OK [READ-WRITE] Selected mailbox.");
            break;
        }
    }
    assert!(saw_exists, "CLOSE should have expunged the deleted message");

    client.send("unselect1 UNSELECT").await;
    client.expect("unselect1 OK UNSELECT completed.").await;
    client.logout().await;
}

#[tokio::test]
async fn deleting_selected_mailbox_forces_bye() {
    let (backend, config) = demo();
    let mut client = Client::connect(&backend, &config);
    client.login().await;
    client.send("create1 CREATE Scratch").await;
    client.expect("create1 OK CREATE completed.").await;
    client.send("select1 SELECT Scratch").await;
    loop {
        if client.line().await.starts_with("select1 ") {
            break;
        }
    }

    let mut other = Client::connect(&backend, &config);
    other.login().await;
    other.send("delete1 DELETE Scratch").await;
    other.expect("delete1 OK DELETE completed.").await;

    client.send("noop1 NOOP").await;
    client
        .expect("* BYE Selected mailbox no longer exists.")
        .await;
    client.expect("noop1 OK NOOP completed.").await;
}

mod starttls {
    //! STARTTLS rewrites the advertised capability set; checked at the state
    //! machine level since no real handshake is needed for the contract.

    use std::sync::Arc;

    use lettermill::backend::memory::MemoryBackend;
    use lettermill::server::ConnectionState;
    use lettermill::ImapConfig;
    use lettermill_types::command::{Command, CommandBody};
    use lettermill_types::core::Tag;
    use lettermill_types::response::Capability;

    fn tag(value: &str) -> Tag {
        Tag::try_from(value).unwrap()
    }

    #[tokio::test]
    async fn capability_rewrite_after_starttls() {
        let backend = Arc::new(MemoryBackend::with_demo_data());
        let config = Arc::new(ImapConfig::default());
        let mut state =
            ConnectionState::new(config, backend, true, false);

        let before = state.capability_list();
        assert!(before.contains(&Capability::StartTls));
        assert!(before.contains(&Capability::LoginDisabled));
        assert!(!before.iter().any(|cap| matches!(cap, Capability::Auth(_))));

        // Plaintext LOGIN is refused while LOGINDISABLED is advertised.
        let login = state
            .do_command(Command::new(
                tag("l1"),
                CommandBody::Login {
                    username: "testuser".into(),
                    password: "testpass".into(),
                },
            ))
            .await;
        assert!(login.is_bad());

        let ok = state
            .do_command(Command::new(tag("s1"), CommandBody::StartTls))
            .await;
        assert!(ok.is_ok());

        let after = state.capability_list();
        assert!(!after.contains(&Capability::StartTls));
        assert!(!after.contains(&Capability::LoginDisabled));
        assert!(after.contains(&Capability::Auth("PLAIN".into())));
        assert!(after.contains(&Capability::Auth("LOGIN".into())));

        // A second STARTTLS is no longer advertised and answers BAD.
        let again = state
            .do_command(Command::new(tag("s2"), CommandBody::StartTls))
            .await;
        assert!(again.is_bad());
    }
}

//! The IMAP service: listener and per-connection supervisor.
//!
//! One task per connection. Inside a connection, command handling is strictly
//! sequential; IDLE is the only point where two futures cooperate (the DONE
//! reader and the update writer), and they touch disjoint halves of the
//! stream.

use std::io;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use lettermill_types::command::{Command, CommandBody};
use lettermill_types::core::Tag;
use lettermill_types::response::{Code, Response};
use log::{debug, info, warn};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_rustls::TlsAcceptor;

use crate::auth::Attempt;
use crate::backend::{Backend, BackendError};
use crate::codec::wire::{BoxedStream, ImapStream, WireError};
use crate::config::ImapConfig;
use crate::parse::parse_command;

pub mod state;

pub use state::ConnectionState;

/// Accepts connections and runs one supervisor task per socket.
pub struct ImapServer<B: Backend> {
    backend: Arc<B>,
    config: Arc<ImapConfig>,
    tls: Option<TlsAcceptor>,
}

impl<B: Backend> ImapServer<B> {
    pub fn new(backend: B, config: ImapConfig, tls: Option<TlsAcceptor>) -> Self {
        Self {
            backend: Arc::new(backend),
            config: Arc::new(config),
            tls,
        }
    }

    /// Bind and serve until `shutdown` flips to true.
    pub async fn serve(self, shutdown: watch::Receiver<bool>) -> io::Result<()> {
        let listener =
            TcpListener::bind((self.config.host.as_str(), self.config.port))
                .await?;
        info!("listening on {}", listener.local_addr()?);
        let mut accept_shutdown = shutdown.clone();
        loop {
            let accepted = tokio::select! {
                accepted = listener.accept() => accepted,
                _ = accept_shutdown.changed() => return Ok(()),
            };
            let (socket, peer) = match accepted {
                Ok(accepted) => accepted,
                Err(error) => {
                    warn!("accept failed: {error}");
                    continue;
                }
            };
            debug!("{peer} +++| <connected>");
            tokio::spawn(handle_connection(
                Arc::clone(&self.backend),
                Arc::clone(&self.config),
                self.tls.clone(),
                Box::new(socket) as BoxedStream,
                peer.to_string(),
                false,
                shutdown.clone(),
            ));
        }
    }
}

/// Run one connection from greeting to disconnect.
///
/// `secure` marks transports that already protect plaintext (unix sockets,
/// implicit TLS, tests); they never advertise STARTTLS or LOGINDISABLED.
pub async fn handle_connection<B: Backend>(
    backend: Arc<B>,
    config: Arc<ImapConfig>,
    tls: Option<TlsAcceptor>,
    socket: BoxedStream,
    label: String,
    secure: bool,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut stream =
        ImapStream::new(socket, label.clone(), config.parsing_params);
    let mut state = ConnectionState::new(
        Arc::clone(&config),
        backend,
        tls.is_some() && !secure,
        secure,
    );

    let greeting = state.do_greeting().await;
    let terminal = greeting.is_terminal();
    if stream.writer.write_response(&greeting).await.is_err() || terminal {
        return;
    }

    let mut bad_commands: u32 = 0;
    loop {
        let buffer = tokio::select! {
            buffer = stream.read_command() => buffer,
            _ = shutdown.changed() => {
                let bye = Response::bye("Server has closed the connection.")
                    .with_code(Code::Unavailable);
                let _ = stream.writer.write_response(&bye).await;
                break;
            }
        };
        let response = match buffer {
            Ok(buffer) => match parse_command(&buffer) {
                Ok(command) => {
                    let Command { tag, body } = command;
                    let is_starttls = matches!(body, CommandBody::StartTls);
                    let response = match body {
                        CommandBody::Authenticate { mechanism } => {
                            match authenticate(
                                &mut stream,
                                &mut state,
                                &config,
                                tag.clone(),
                                mechanism,
                            )
                            .await
                            {
                                Ok(response) => response,
                                Err(_) => break,
                            }
                        }
                        CommandBody::Idle => {
                            match idle(&mut stream, &mut state, &config, tag)
                                .await
                            {
                                Ok(response) => response,
                                Err(_) => break,
                            }
                        }
                        body => {
                            let command = Command::new(tag.clone(), body);
                            match config.command_timeout {
                                Some(limit) => match tokio::time::timeout(
                                    limit,
                                    state.do_command(command),
                                )
                                .await
                                {
                                    Ok(response) => response,
                                    Err(_) => Response::no(
                                        tag,
                                        "Operation timed out.",
                                    )
                                    .with_code(Code::Timeout),
                                },
                                None => state.do_command(command).await,
                            }
                        }
                    };
                    if is_starttls && response.is_ok() {
                        if stream
                            .writer
                            .write_response(&response)
                            .await
                            .is_err()
                        {
                            break;
                        }
                        // The tagged OK is on the wire; now upgrade the
                        // transport before touching the next command.
                        let Some(acceptor) = tls.as_ref() else {
                            break;
                        };
                        stream = match start_tls(stream, acceptor).await {
                            Ok(stream) => stream,
                            Err(error) => {
                                warn!("{label} TLS handshake failed: {error}");
                                break;
                            }
                        };
                        state.cleanup();
                        continue;
                    }
                    response
                }
                Err(error) => error.to_response(),
            },
            Err(error) if error.is_recoverable() => {
                Response::bad_untagged(error.to_string())
            }
            Err(WireError::Disconnected) => break,
            Err(error) => {
                warn!("{label} read failed: {error}");
                break;
            }
        };

        let mut response = response;
        if response.is_bad() {
            bad_commands += 1;
            if let Some(limit) = config.bad_command_limit {
                if bad_commands >= limit {
                    response
                        .add_untagged_bye("Too many errors, disconnecting.");
                }
            }
        } else {
            bad_commands = 0;
        }
        let terminal = response.is_terminal();
        if stream.writer.write_response(&response).await.is_err() {
            break;
        }
        state.cleanup();
        if terminal {
            break;
        }
    }
    debug!("{label} ---| <disconnected>");
}

/// Drive the SASL challenge/response loop, then let the state install the
/// session.
async fn authenticate<B: Backend>(
    stream: &mut ImapStream,
    state: &mut ConnectionState<B>,
    config: &ImapConfig,
    tag: Tag,
    mechanism: String,
) -> Result<Response, WireError> {
    if let Some(bad) = state.check_phase(
        &tag,
        &CommandBody::Authenticate {
            mechanism: mechanism.clone(),
        },
    ) {
        return Ok(bad);
    }
    let Some(mechanism) = state.auth_registry().get(&mechanism) else {
        return Ok(state.do_authenticate(tag, None).await);
    };
    let max_line = config.parsing_params.max_line_length;
    let mut responses: Vec<Vec<u8>> = Vec::new();
    loop {
        match mechanism.server_attempt(&responses) {
            Ok(Attempt::Challenge(challenge)) => {
                let prompt = BASE64.encode(&challenge);
                stream
                    .writer
                    .write_response(&Response::continuation(prompt))
                    .await?;
                let line = stream.reader.read_line(max_line).await?;
                let line = trim_crlf(&line);
                if line == b"*" {
                    return Ok(Response::bad(tag, "Authentication canceled."));
                }
                match BASE64.decode(line) {
                    Ok(decoded) => responses.push(decoded),
                    Err(_) => {
                        return Ok(Response::bad(
                            tag,
                            "Invalid base64 string.",
                        ));
                    }
                }
            }
            Ok(Attempt::Success {
                credentials,
                final_challenge,
            }) => {
                if let Some(challenge) = final_challenge {
                    stream
                        .writer
                        .write_response(&Response::continuation(
                            BASE64.encode(&challenge),
                        ))
                        .await?;
                    let _ = stream.reader.read_line(max_line).await?;
                }
                return Ok(state.do_authenticate(tag, Some(credentials)).await);
            }
            Err(error) => return Ok(Response::bad(tag, error.to_string())),
        }
    }
}

/// Why the IDLE update loop stopped.
enum IdleStop {
    Done,
    MailboxGone,
    Backend(BackendError),
}

/// Run the IDLE transaction: continuation prompt, then two cooperating
/// futures — the update writer and the DONE reader — and finally the tagged
/// line, which is the last bytes of the transaction.
async fn idle<B: Backend>(
    stream: &mut ImapStream,
    state: &mut ConnectionState<B>,
    config: &ImapConfig,
    tag: Tag,
) -> Result<Response, WireError> {
    let response = state
        .do_command(Command::new(tag.clone(), CommandBody::Idle))
        .await;
    if !response.is_ok() {
        return Ok(response);
    }
    stream
        .writer
        .write_response(&Response::continuation("Idling."))
        .await?;

    let (done_tx, done_rx) = watch::channel(false);
    let max_idle_wait = config.max_idle_wait;
    let max_line = config.parsing_params.max_line_length;
    let reader = &mut stream.reader;
    let writer = &mut stream.writer;

    let updates_rx = done_rx.clone();
    let updates = async move {
        loop {
            if *updates_rx.borrow() {
                return Ok::<IdleStop, WireError>(IdleStop::Done);
            }
            let poll = tokio::time::timeout(
                max_idle_wait,
                state.receive_updates(updates_rx.clone()),
            )
            .await;
            match poll {
                // Keepalive-free: an empty wait just starts over.
                Err(_elapsed) => continue,
                Ok(Ok(Some(untagged))) => {
                    if *updates_rx.borrow() {
                        return Ok(IdleStop::Done);
                    }
                    if !untagged.is_empty() {
                        writer.write_untagged(&untagged).await?;
                    }
                }
                Ok(Ok(None)) => return Ok(IdleStop::MailboxGone),
                Ok(Err(error)) => return Ok(IdleStop::Backend(error)),
            }
        }
    };
    tokio::pin!(updates);

    let done_line = async {
        let line = reader.read_line(max_line).await;
        let _ = done_tx.send(true);
        line
    };

    let (stop, line) = tokio::select! {
        line = done_line => {
            let stop = updates.await?;
            (stop, Some(line?))
        }
        stop = &mut updates => (stop?, None),
    };

    let mut response = response;
    match stop {
        IdleStop::Done => match line {
            Some(line) if trim_crlf(&line).eq_ignore_ascii_case(b"DONE") => {}
            _ => return Ok(Response::bad(tag, "Expected \"DONE\".")),
        },
        IdleStop::MailboxGone => {
            response.add_untagged_bye("Selected mailbox no longer exists.");
        }
        IdleStop::Backend(error) => {
            warn!("IDLE update poll failed: {error}");
            response = Response::bye("Unhandled server error.")
                .with_code(Code::ServerBug);
        }
    }
    Ok(response)
}

/// Swap the transport for its TLS wrapper after a STARTTLS OK.
async fn start_tls(
    stream: ImapStream,
    acceptor: &TlsAcceptor,
) -> Result<ImapStream, WireError> {
    let (inner, label, params) = stream.into_inner();
    let tls = acceptor.accept(inner).await?;
    debug!("{label} <->| <TLS handshake>");
    Ok(ImapStream::new(Box::new(tls), label, params))
}

fn trim_crlf(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

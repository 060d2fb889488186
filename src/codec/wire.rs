//! Stream framing.
//!
//! Reading assembles one complete command buffer: a first line, then for each
//! trailing literal marker either an immediate body (`{N+}`) or a
//! continuation prompt followed by the body (`{N}`), until a line arrives
//! with no trailing marker. Writing serializes a whole response and flushes
//! it in one piece, so untagged lines never interleave with anything else.

use std::io;

use bytes::BytesMut;
use lettermill_types::response::{Response, Untagged};
use log::debug;
use thiserror::Error;
use tokio::io::{
    AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, ReadHalf,
    WriteHalf,
};

use crate::codec::encode::{encode_response, encode_untagged_line};
use crate::parse::ParsingParams;

/// Continuation text sent before a synchronizing literal body.
const LITERAL_PROMPT: &str = "Literal string";

/// Marker object for connections; everything IO lives behind this.
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

pub type BoxedStream = Box<dyn AsyncStream>;

#[derive(Debug, Error)]
pub enum WireError {
    /// EOF mid-line or mid-literal.
    #[error("client disconnected")]
    Disconnected,
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("line longer than {limit} octets")]
    LineTooLong { limit: usize },
    #[error("literal of {length} octets exceeds the limit")]
    LiteralTooLarge { length: u32 },
}

impl WireError {
    /// Whether the supervisor can answer with `BAD` and keep the connection.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::LineTooLong { .. } | Self::LiteralTooLarge { .. }
        )
    }
}

/// Reading side of a connection.
pub struct LineReader {
    inner: BufReader<ReadHalf<BoxedStream>>,
    label: String,
}

/// Writing side of a connection.
pub struct ResponseWriter {
    inner: WriteHalf<BoxedStream>,
    label: String,
}

/// Both halves of one IMAP connection plus the framing parameters.
pub struct ImapStream {
    pub reader: LineReader,
    pub writer: ResponseWriter,
    params: ParsingParams,
}

impl ImapStream {
    pub fn new(stream: BoxedStream, label: String, params: ParsingParams) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        Self {
            reader: LineReader {
                inner: BufReader::new(read_half),
                label: label.clone(),
            },
            writer: ResponseWriter {
                inner: write_half,
                label,
            },
            params,
        }
    }

    /// Tear the stream back down to the raw transport, e.g. for a STARTTLS
    /// handshake. Buffered input is discarded; RFC 3501 forbids the client
    /// from pipelining past STARTTLS anyway.
    pub fn into_inner(self) -> (BoxedStream, String, ParsingParams) {
        let stream = self
            .reader
            .inner
            .into_inner()
            .unsplit(self.writer.inner);
        (stream, self.writer.label, self.params)
    }

    /// Read one complete command: first line plus all literal continuations.
    ///
    /// For a synchronizing literal the continuation prompt is written (and
    /// flushed) before the body is read, so the prompt always precedes the
    /// literal it solicits.
    pub async fn read_command(&mut self) -> Result<BytesMut, WireError> {
        let mut buffer = BytesMut::new();
        let mut oversized: Option<u32> = None;
        loop {
            let line = self.reader.read_line(self.params.max_line_length).await?;
            buffer.extend_from_slice(&line);
            let Some((length, sync)) = trailing_literal(&line) else {
                return match oversized {
                    Some(length) => Err(WireError::LiteralTooLarge { length }),
                    None => Ok(buffer),
                };
            };
            if length as usize > self.params.max_literal_length {
                if sync {
                    // The client is still waiting for a prompt; refuse now
                    // and it will not send the body.
                    return Err(WireError::LiteralTooLarge { length });
                }
                // A non-synchronizing body is already on the wire. Drain it
                // to stay in sync, remember to fail once the command ends.
                self.reader.discard(length as usize).await?;
                oversized.get_or_insert(length);
                continue;
            }
            if sync {
                self.writer
                    .write_response(&Response::continuation(LITERAL_PROMPT))
                    .await?;
            }
            let body = self.reader.read_exact(length as usize).await?;
            buffer.extend_from_slice(&body);
        }
    }
}

impl LineReader {
    /// One CRLF- (or LF-) terminated line, terminator included.
    pub async fn read_line(&mut self, limit: usize) -> Result<Vec<u8>, WireError> {
        use tokio::io::AsyncBufReadExt;

        let mut line = Vec::new();
        let read = (&mut self.inner)
            .take(limit as u64 + 1)
            .read_until(b'\n', &mut line)
            .await?;
        if read == 0 {
            return Err(WireError::Disconnected);
        }
        if !line.ends_with(b"\n") {
            if line.len() > limit {
                return Err(WireError::LineTooLong { limit });
            }
            return Err(WireError::Disconnected);
        }
        self.trace(&line);
        Ok(line)
    }

    pub async fn read_exact(&mut self, length: usize) -> Result<Vec<u8>, WireError> {
        let mut body = vec![0u8; length];
        self.inner
            .read_exact(&mut body)
            .await
            .map_err(|error| match error.kind() {
                io::ErrorKind::UnexpectedEof => WireError::Disconnected,
                _ => WireError::Io(error),
            })?;
        self.trace(&body);
        Ok(body)
    }

    async fn discard(&mut self, length: usize) -> Result<(), WireError> {
        let mut remaining = length;
        let mut sink = [0u8; 4096];
        while remaining > 0 {
            let chunk = remaining.min(sink.len());
            self.inner
                .read_exact(&mut sink[..chunk])
                .await
                .map_err(|error| match error.kind() {
                    io::ErrorKind::UnexpectedEof => WireError::Disconnected,
                    _ => WireError::Io(error),
                })?;
            remaining -= chunk;
        }
        Ok(())
    }

    fn trace(&self, data: &[u8]) {
        if log::log_enabled!(log::Level::Debug) {
            for line in split_lines(data) {
                debug!("{} -->| {}", self.label, String::from_utf8_lossy(line));
            }
        }
    }
}

impl ResponseWriter {
    /// Serialize and flush one response atomically.
    pub async fn write_response(&mut self, response: &Response) -> Result<(), WireError> {
        let bytes = encode_response(response);
        self.write_all(&bytes).await
    }

    /// Write a batch of untagged responses as one flush, e.g. IDLE updates.
    pub async fn write_untagged(&mut self, untagged: &[Untagged]) -> Result<(), WireError> {
        let mut bytes = Vec::new();
        for item in untagged {
            encode_untagged_line(item, &mut bytes);
        }
        self.write_all(&bytes).await
    }

    async fn write_all(&mut self, bytes: &[u8]) -> Result<(), WireError> {
        self.inner.write_all(bytes).await?;
        self.inner.flush().await?;
        if log::log_enabled!(log::Level::Debug) {
            for line in split_lines(bytes) {
                debug!("{} <--| {}", self.label, String::from_utf8_lossy(line));
            }
        }
        Ok(())
    }
}

/// Detect a trailing `{N}` or `{N+}` literal marker on a line.
fn trailing_literal(line: &[u8]) -> Option<(u32, bool)> {
    let line = strip_newline(line);
    let line = line.strip_suffix(b"}")?;
    let open = memchr::memrchr(b'{', line)?;
    let mut digits = &line[open + 1..];
    let sync = match digits.strip_suffix(b"+") {
        Some(rest) => {
            digits = rest;
            false
        }
        None => true,
    };
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }
    let length = std::str::from_utf8(digits).ok()?.parse().ok()?;
    Some((length, sync))
}

fn strip_newline(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

fn split_lines(data: &[u8]) -> impl Iterator<Item = &[u8]> {
    data.split(|&b| b == b'\n')
        .map(strip_newline)
        .filter(|line| !line.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn boxed(stream: tokio::io::DuplexStream) -> BoxedStream {
        Box::new(stream)
    }

    #[test]
    fn test_trailing_literal() {
        assert_eq!(trailing_literal(b"a LOGIN joe {5}\r\n"), Some((5, true)));
        assert_eq!(trailing_literal(b"a LOGIN joe {5+}\r\n"), Some((5, false)));
        assert_eq!(trailing_literal(b"a NOOP\r\n"), None);
        assert_eq!(trailing_literal(b"a LOGIN joe {x}\r\n"), None);
        assert_eq!(trailing_literal(b"a LOGIN joe }\r\n"), None);
    }

    #[tokio::test]
    async fn test_read_plain_command() {
        let (client, server) = tokio::io::duplex(1024);
        let mut stream = ImapStream::new(
            boxed(server),
            "test".into(),
            ParsingParams::default(),
        );

        let mut client = client;
        tokio::io::AsyncWriteExt::write_all(&mut client, b"a1 NOOP\r\n")
            .await
            .unwrap();

        let buffer = stream.read_command().await.unwrap();
        assert_eq!(&buffer[..], b"a1 NOOP\r\n");
    }

    #[tokio::test]
    async fn test_sync_literal_prompts_first() {
        let (mut client, server) = tokio::io::duplex(1024);
        let mut stream = ImapStream::new(
            boxed(server),
            "test".into(),
            ParsingParams::default(),
        );

        tokio::io::AsyncWriteExt::write_all(
            &mut client,
            b"a1 LOGIN joe {4}\r\n",
        )
        .await
        .unwrap();

        let reader = tokio::spawn(async move {
            let buffer = stream.read_command().await.unwrap();
            assert_eq!(&buffer[..], b"a1 LOGIN joe {4}\r\npass\r\n");
        });

        // The continuation must arrive before the client sends the body.
        let mut prompt = [0u8; 18];
        tokio::io::AsyncReadExt::read_exact(&mut client, &mut prompt)
            .await
            .unwrap();
        assert_eq!(&prompt[..], b"+ Literal string\r\n");

        tokio::io::AsyncWriteExt::write_all(&mut client, b"pass\r\n")
            .await
            .unwrap();
        reader.await.unwrap();
    }

    #[tokio::test]
    async fn test_non_sync_literal_reads_through() {
        let (mut client, server) = tokio::io::duplex(1024);
        let mut stream = ImapStream::new(
            boxed(server),
            "test".into(),
            ParsingParams::default(),
        );

        tokio::io::AsyncWriteExt::write_all(
            &mut client,
            b"a1 LOGIN joe {4+}\r\npass\r\n",
        )
        .await
        .unwrap();

        let buffer = stream.read_command().await.unwrap();
        assert_eq!(&buffer[..], b"a1 LOGIN joe {4+}\r\npass\r\n");
    }

    #[tokio::test]
    async fn test_eof_is_disconnected() {
        let (client, server) = tokio::io::duplex(1024);
        let mut stream = ImapStream::new(
            boxed(server),
            "test".into(),
            ParsingParams::default(),
        );
        drop(client);
        assert!(matches!(
            stream.read_command().await,
            Err(WireError::Disconnected)
        ));
    }
}

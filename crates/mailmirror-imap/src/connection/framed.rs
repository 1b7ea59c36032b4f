//! Line framing with literal handling.
//!
//! A server response is one CRLF line, unless that line ends in `{n}`: then `n`
//! raw bytes follow and the response continues with another line. The reader
//! returns whole responses so the parser never sees a partial literal.

use std::io;
use std::time::Duration;

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::{Error, Result};

const READ_BUFFER: usize = 16 * 1024;

/// Longest line accepted outside literals.
const MAX_LINE: usize = 1024 * 1024;

/// Largest literal accepted. Bigger messages are refused, not buffered.
const MAX_LITERAL: usize = 128 * 1024 * 1024;

/// Buffered reader/writer speaking IMAP framing.
pub struct FramedStream<S> {
    inner: BufReader<S>,
    timeout: Option<Duration>,
}

impl<S> FramedStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wraps a connected stream.
    pub fn new(stream: S) -> Self {
        Self {
            inner: BufReader::with_capacity(READ_BUFFER, stream),
            timeout: None,
        }
    }

    /// Applies `timeout` to every [`read_response`](Self::read_response).
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Reads one complete response within the configured deadline.
    ///
    /// # Errors
    ///
    /// [`Error::Timeout`] when the deadline passes, [`Error::ConnectionLost`] on
    /// EOF, [`Error::Protocol`] for oversized lines or literals.
    pub async fn read_response(&mut self) -> Result<Vec<u8>> {
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, self.read_frame())
                .await
                .map_err(|_| Error::Timeout(limit))?,
            None => self.read_frame().await,
        }
    }

    /// Reads one response, returning `None` if nothing arrives within `wait`.
    ///
    /// # Errors
    ///
    /// Same as [`read_response`](Self::read_response), minus the timeout.
    pub async fn read_response_within(&mut self, wait: Duration) -> Result<Option<Vec<u8>>> {
        match tokio::time::timeout(wait, self.read_frame()).await {
            Ok(frame) => frame.map(Some),
            Err(_) => Ok(None),
        }
    }

    async fn read_frame(&mut self) -> Result<Vec<u8>> {
        let mut frame = BytesMut::new();
        loop {
            let line = self.read_line().await?;
            frame.put_slice(&line);
            let Some(len) = literal_length(&line) else {
                break;
            };
            if len > MAX_LITERAL {
                return Err(Error::Protocol(format!(
                    "literal of {len} bytes exceeds {MAX_LITERAL}"
                )));
            }
            let start = frame.len();
            frame.resize(start + len, 0);
            self.inner.read_exact(&mut frame[start..]).await?;
        }
        Ok(frame.to_vec())
    }

    async fn read_line(&mut self) -> Result<Vec<u8>> {
        let mut line = Vec::new();
        loop {
            let buf = self.inner.fill_buf().await?;
            if buf.is_empty() {
                return Err(Error::ConnectionLost("server closed the connection".into()));
            }
            // CRLF split across two reads.
            if line.last() == Some(&b'\r') && buf[0] == b'\n' {
                line.push(b'\n');
                self.inner.consume(1);
                return Ok(line);
            }
            if let Some(pos) = find_crlf(buf) {
                line.extend_from_slice(&buf[..pos + 2]);
                self.inner.consume(pos + 2);
                return Ok(line);
            }
            let len = buf.len();
            line.extend_from_slice(buf);
            self.inner.consume(len);
            if line.len() > MAX_LINE {
                return Err(Error::Protocol("response line too long".into()));
            }
        }
    }

    /// Writes and flushes a serialized command.
    ///
    /// # Errors
    ///
    /// Returns the socket error.
    pub async fn write_command(&mut self, bytes: &[u8]) -> Result<()> {
        let stream = self.inner.get_mut();
        stream.write_all(bytes).await?;
        stream.flush().await.map_err(Error::from)
    }

    /// Writes literal payload followed by the closing CRLF.
    ///
    /// # Errors
    ///
    /// Returns the socket error.
    pub async fn write_literal(&mut self, bytes: &[u8]) -> Result<()> {
        let stream = self.inner.get_mut();
        stream.write_all(bytes).await?;
        stream.write_all(b"\r\n").await?;
        stream.flush().await.map_err(Error::from)
    }

    /// Shuts the write half down.
    ///
    /// # Errors
    ///
    /// Returns the socket error.
    pub async fn shutdown(&mut self) -> io::Result<()> {
        self.inner.get_mut().shutdown().await
    }
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

/// Length announced by a trailing `{n}` or `{n+}`.
fn literal_length(line: &[u8]) -> Option<usize> {
    let body = line.strip_suffix(b"\r\n")?.strip_suffix(b"}")?;
    let body = body.strip_suffix(b"+").unwrap_or(body);
    let open = body.iter().rposition(|&b| b == b'{')?;
    let digits = &body[open + 1..];
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }
    std::str::from_utf8(digits).ok()?.parse().ok()
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use tokio_test::io::Builder;

    use super::*;

    #[test]
    fn literal_lengths() {
        assert_eq!(literal_length(b"* 1 FETCH (BODY[] {42}\r\n"), Some(42));
        assert_eq!(literal_length(b"A1 APPEND INBOX {7+}\r\n"), Some(7));
        assert_eq!(literal_length(b"{0}\r\n"), Some(0));
        assert_eq!(literal_length(b"* OK {abc}\r\n"), None);
        assert_eq!(literal_length(b"* OK {}\r\n"), None);
        assert_eq!(literal_length(b"* OK done\r\n"), None);
        assert_eq!(literal_length(b"{12}"), None);
    }

    #[tokio::test]
    async fn reads_literal_spanning_chunks() {
        let mock = Builder::new()
            .read(b"* 2 FETCH (UID 9 BODY[] {11}\r\nhello")
            .read(b" world)\r\n")
            .build();
        let mut framed = FramedStream::new(mock);
        let frame = framed.read_response().await.unwrap();
        assert_eq!(frame, b"* 2 FETCH (UID 9 BODY[] {11}\r\nhello world)\r\n");
    }

    #[tokio::test]
    async fn crlf_split_between_reads() {
        let mock = Builder::new().read(b"* OK ready\r").read(b"\n").build();
        let mut framed = FramedStream::new(mock);
        assert_eq!(framed.read_response().await.unwrap(), b"* OK ready\r\n");
    }

    #[tokio::test]
    async fn eof_is_connection_lost() {
        let mock = Builder::new().read(b"* OK partial").build();
        let mut framed = FramedStream::new(mock);
        let err = framed.read_response().await.unwrap_err();
        assert!(matches!(err, Error::ConnectionLost(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn oversized_literal_refused() {
        let header = format!("* 1 FETCH (BODY[] {{{}}}\r\n", MAX_LITERAL + 1);
        let mock = Builder::new().read(header.as_bytes()).build();
        let mut framed = FramedStream::new(mock);
        assert!(matches!(
            framed.read_response().await.unwrap_err(),
            Error::Protocol(_)
        ));
    }

    #[tokio::test]
    async fn writes_literal_with_crlf() {
        let mock = Builder::new()
            .write(b"M0001 APPEND INBOX {3}\r\n")
            .write(b"abc")
            .write(b"\r\n")
            .build();
        let mut framed = FramedStream::new(mock);
        framed.write_command(b"M0001 APPEND INBOX {3}\r\n").await.unwrap();
        framed.write_literal(b"abc").await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn read_within_times_out_quietly() {
        let (client, _server) = tokio::io::duplex(64);
        let mut framed = FramedStream::new(client);
        let got = framed
            .read_response_within(Duration::from_millis(50))
            .await
            .unwrap();
        assert!(got.is_none());
    }
}

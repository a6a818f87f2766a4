// SPDX-License-Identifier: MIT

//! Incremental command parser bound to one socket.
//!
//! The parser owns the stream and consumes bytes token by token, so a
//! handler can pull exactly the arguments it understands and a `{N}`
//! literal can be drained in chunks instead of being buffered whole.
//! The continuation response that precedes literal data is written by the
//! parser itself, as it is part of the framing rather than the command.

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufStream};

use crate::response::Response;

/// Errors from reading or writing the framed protocol.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("connection closed")]
    ConnectionClosed,

    #[error("protocol violation: {0}")]
    Malformed(String),

    #[error("literal length out of range: {0}")]
    BadLiteralLength(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Chunk size for draining literal data.
pub const LITERAL_CHUNK: usize = 64 * 1024;

/// A socket speaking the framed command protocol.
///
/// Reading and writing live on the same struct because literal framing
/// interleaves them: `{N}` on the read side requires `+ Ready for literal
/// data` on the write side before the N bytes arrive.
pub struct ImapStream<S> {
    io: BufStream<S>,
    peeked: Option<u8>,
    /// Bytes left of a literal currently being streamed.
    literal_remaining: u64,
}

impl<S: AsyncRead + AsyncWrite + Unpin> ImapStream<S> {
    pub fn new(socket: S) -> Self {
        Self { io: BufStream::new(socket), peeked: None, literal_remaining: 0 }
    }

    async fn next_byte(&mut self) -> Result<u8, ProtocolError> {
        if let Some(b) = self.peeked.take() {
            return Ok(b);
        }
        let mut buf = [0u8; 1];
        match self.io.read_exact(&mut buf).await {
            Ok(_) => Ok(buf[0]),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                Err(ProtocolError::ConnectionClosed)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn peek_byte(&mut self) -> Result<u8, ProtocolError> {
        let b = self.next_byte().await?;
        self.peeked = Some(b);
        Ok(b)
    }

    async fn skip_spaces(&mut self) -> Result<(), ProtocolError> {
        loop {
            let b = self.peek_byte().await?;
            if b == b' ' {
                self.peeked = None;
            } else {
                return Ok(());
            }
        }
    }

    /// True when the next bytes terminate the current command line.
    /// Does not consume the terminator.
    pub async fn at_command_end(&mut self) -> Result<bool, ProtocolError> {
        self.skip_spaces().await?;
        let b = self.peek_byte().await?;
        Ok(b == b'\r' || b == b'\n')
    }

    /// Consumes the CR LF (or bare LF) ending the current command.
    pub async fn read_command_end(&mut self) -> Result<(), ProtocolError> {
        loop {
            let b = self.next_byte().await?;
            match b {
                b'\n' => return Ok(()),
                b'\r' | b' ' => continue,
                other => {
                    return Err(ProtocolError::Malformed(format!(
                        "trailing garbage before line end: {:?}",
                        other as char
                    )))
                }
            }
        }
    }

    /// Skips everything up to and including the end of the current line.
    /// Used to resynchronize after an argument parse error.
    pub async fn skip_line(&mut self) -> Result<(), ProtocolError> {
        // A literal in progress must be drained first, otherwise its raw
        // bytes would be parsed as commands.
        while self.literal_remaining > 0 {
            let mut buf = [0u8; LITERAL_CHUNK];
            self.read_literal_part(&mut buf).await?;
        }
        loop {
            let b = self.next_byte().await?;
            if b == b'\n' {
                return Ok(());
            }
            if b == b'{' {
                // Drain the announced literal too; the client will send it
                // after our continuation no matter what.
                let n = self.read_literal_header().await?;
                self.literal_remaining = n;
                while self.literal_remaining > 0 {
                    let mut buf = [0u8; LITERAL_CHUNK];
                    self.read_literal_part(&mut buf).await?;
                }
            }
        }
    }

    /// Reads a bare atom: bytes up to a space, parenthesis or line end.
    pub async fn read_atom(&mut self) -> Result<String, ProtocolError> {
        self.skip_spaces().await?;
        let mut out = Vec::new();
        loop {
            let b = self.peek_byte().await?;
            match b {
                b' ' | b'(' | b')' | b'\r' | b'\n' => break,
                _ => {
                    self.peeked = None;
                    out.push(b);
                }
            }
        }
        String::from_utf8(out).map_err(|_| ProtocolError::Malformed("non-UTF-8 atom".into()))
    }

    /// Reads the command tag. Fails on an empty line.
    pub async fn read_tag(&mut self) -> Result<String, ProtocolError> {
        let tag = self.read_atom().await?;
        if tag.is_empty() {
            return Err(ProtocolError::Malformed("missing command tag".into()));
        }
        Ok(tag)
    }

    async fn read_literal_header(&mut self) -> Result<u64, ProtocolError> {
        // '{' already consumed by the caller.
        let mut digits = String::new();
        loop {
            let b = self.next_byte().await?;
            if b == b'}' {
                break;
            }
            digits.push(b as char);
        }
        // Header is followed by CR LF before the raw bytes.
        let b = self.next_byte().await?;
        if b == b'\r' {
            let b = self.next_byte().await?;
            if b != b'\n' {
                return Err(ProtocolError::Malformed("literal header not CRLF-terminated".into()));
            }
        } else if b != b'\n' {
            return Err(ProtocolError::Malformed("literal header not CRLF-terminated".into()));
        }
        digits.parse::<u64>().map_err(|_| ProtocolError::BadLiteralLength(digits))
    }

    /// If the next argument is a `{N}` literal, announces readiness via a
    /// continuation response and returns its total size. The data must
    /// then be drained with [`read_literal_part`](Self::read_literal_part).
    pub async fn begin_literal(&mut self) -> Result<Option<u64>, ProtocolError> {
        self.skip_spaces().await?;
        if self.peek_byte().await? != b'{' {
            return Ok(None);
        }
        self.peeked = None;
        let n = self.read_literal_header().await?;
        self.literal_remaining = n;
        self.send_response(&Response::continuation("Ready for literal data")).await?;
        Ok(Some(n))
    }

    /// Bytes left of the literal started by [`begin_literal`](Self::begin_literal).
    pub fn literal_remaining(&self) -> u64 {
        self.literal_remaining
    }

    /// Reads the next chunk of an in-progress literal into `buf`.
    /// Returns 0 when the literal is fully consumed.
    pub async fn read_literal_part(&mut self, buf: &mut [u8]) -> Result<usize, ProtocolError> {
        if self.literal_remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let want = buf.len().min(self.literal_remaining as usize);
        let mut read = 0;
        // The peeked byte, if any, belongs to the literal.
        if let Some(b) = self.peeked.take() {
            buf[0] = b;
            read = 1;
        }
        while read < want {
            let n = self.io.read(&mut buf[read..want]).await?;
            if n == 0 {
                return Err(ProtocolError::ConnectionClosed);
            }
            read += n;
        }
        self.literal_remaining -= read as u64;
        Ok(read)
    }

    /// Reads a string argument in any form: atom, quoted or literal.
    /// Literals are buffered whole here; use [`begin_literal`](Self::begin_literal)
    /// directly when the payload should be streamed instead.
    pub async fn read_string(&mut self) -> Result<Vec<u8>, ProtocolError> {
        self.skip_spaces().await?;
        match self.peek_byte().await? {
            b'"' => self.read_quoted().await,
            b'{' => {
                let Some(total) = self.begin_literal().await? else {
                    return Err(ProtocolError::Malformed("expected literal".into()));
                };
                let mut out = Vec::with_capacity(total as usize);
                let mut chunk = [0u8; LITERAL_CHUNK];
                loop {
                    let n = self.read_literal_part(&mut chunk).await?;
                    if n == 0 {
                        break;
                    }
                    out.extend_from_slice(&chunk[..n]);
                }
                Ok(out)
            }
            _ => Ok(self.read_atom().await?.into_bytes()),
        }
    }

    /// Reads a string argument and decodes it as UTF-8.
    pub async fn read_utf8_string(&mut self) -> Result<String, ProtocolError> {
        String::from_utf8(self.read_string().await?)
            .map_err(|_| ProtocolError::Malformed("non-UTF-8 string argument".into()))
    }

    async fn read_quoted(&mut self) -> Result<Vec<u8>, ProtocolError> {
        // Opening quote still pending.
        self.peeked = None;
        let mut out = Vec::new();
        loop {
            let b = self.next_byte().await?;
            match b {
                b'"' => return Ok(out),
                b'\\' => out.push(self.next_byte().await?),
                b'\r' | b'\n' => {
                    return Err(ProtocolError::Malformed("unterminated quoted string".into()))
                }
                _ => out.push(b),
            }
        }
    }

    /// True if the next argument opens a parenthesized list.
    pub async fn has_list(&mut self) -> Result<bool, ProtocolError> {
        self.skip_spaces().await?;
        Ok(self.peek_byte().await? == b'(')
    }

    /// Reads a parenthesized list of string arguments. A nested sublist is
    /// returned as one entry with its parentheses kept, so callers can
    /// parse it recursively (cache policies do).
    pub async fn read_paren_list(&mut self) -> Result<Vec<Vec<u8>>, ProtocolError> {
        self.skip_spaces().await?;
        if self.peek_byte().await? != b'(' {
            return Err(ProtocolError::Malformed("expected parenthesized list".into()));
        }
        self.peeked = None;
        let mut items = Vec::new();
        loop {
            self.skip_spaces().await?;
            match self.peek_byte().await? {
                b')' => {
                    self.peeked = None;
                    return Ok(items);
                }
                b'(' => items.push(self.read_sublist_raw().await?),
                b'"' => items.push(self.read_quoted().await?),
                b'\r' | b'\n' => {
                    return Err(ProtocolError::Malformed("unterminated list".into()))
                }
                _ => {
                    let atom = self.read_atom().await?;
                    items.push(atom.into_bytes());
                }
            }
        }
    }

    /// Captures a nested list verbatim, including its parentheses.
    async fn read_sublist_raw(&mut self) -> Result<Vec<u8>, ProtocolError> {
        let mut out = Vec::new();
        let mut depth = 0u32;
        loop {
            let b = self.next_byte().await?;
            match b {
                b'(' => {
                    depth += 1;
                    out.push(b);
                }
                b')' => {
                    depth -= 1;
                    out.push(b);
                    if depth == 0 {
                        return Ok(out);
                    }
                }
                b'\r' | b'\n' => {
                    return Err(ProtocolError::Malformed("unterminated sublist".into()))
                }
                _ => out.push(b),
            }
        }
    }

    /// Reads a non-negative integer atom.
    pub async fn read_number(&mut self) -> Result<i64, ProtocolError> {
        let atom = self.read_atom().await?;
        atom.parse::<i64>()
            .map_err(|_| ProtocolError::Malformed(format!("expected number, got {atom:?}")))
    }

    /// Writes a response line and flushes it to the socket.
    pub async fn send_response(&mut self, response: &Response) -> Result<(), ProtocolError> {
        self.io.write_all(&response.to_bytes()).await?;
        self.io.flush().await?;
        Ok(())
    }

    /// Writes an untagged data line whose payload may contain raw bytes
    /// (embedded literals in FETCH responses).
    pub async fn send_untagged(&mut self, payload: &[u8]) -> Result<(), ProtocolError> {
        self.io.write_all(b"* ").await?;
        self.io.write_all(payload).await?;
        self.io.write_all(b"\r\n").await?;
        self.io.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "stream_tests.rs"]
mod tests;

//! Wire Framer - reads one JSON document off a socket
//!
//! Replies from the Expert Advisor carry no length prefix. In structural mode a
//! document is complete as soon as the accumulated bytes parse; line mode ends
//! each document at a newline instead.

use serde_json::Value;
use std::io;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const READ_CHUNK_SIZE: usize = 4096;
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 1024 * 1024;
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Connection-level framing failures
#[derive(Error, Debug)]
pub enum FrameError {
    #[error("peer closed the connection without sending any bytes")]
    EmptyPayload,
    #[error("received {received} bytes that do not form a JSON document")]
    MalformedPayload { received: usize },
    #[error("reply exceeded {limit} bytes without completing a JSON document")]
    PayloadTooLarge { limit: usize },
    #[error("no complete reply within {0:?}")]
    ReadTimeout(Duration),
    #[error("socket error: {0}")]
    Io(#[from] io::Error),
}

/// How document boundaries are found on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameMode {
    /// Parse-driven: the first complete JSON value ends the message
    #[default]
    Structural,
    /// Newline-delimited JSON
    LineDelimited,
}

impl FromStr for FrameMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "structural" | "json" => Ok(FrameMode::Structural),
            "line" | "newline" | "ndjson" => Ok(FrameMode::LineDelimited),
            other => Err(format!("unknown framing mode: {}", other)),
        }
    }
}

enum Parse {
    Complete(Value),
    Incomplete,
    Invalid,
}

fn parse_structural(buf: &[u8]) -> Parse {
    let mut stream = serde_json::Deserializer::from_slice(buf).into_iter::<Value>();
    match stream.next() {
        None => Parse::Incomplete,
        Some(Ok(value)) => {
            // A bare number that runs to the end of the buffer may still grow
            if value.is_number() && stream.byte_offset() == buf.len() {
                Parse::Incomplete
            } else {
                Parse::Complete(value)
            }
        }
        Some(Err(e)) if e.is_eof() => Parse::Incomplete,
        Some(Err(_)) => Parse::Invalid,
    }
}

fn parse_line(buf: &[u8]) -> Parse {
    let mut start = 0;
    while let Some(offset) = buf[start..].iter().position(|b| *b == b'\n') {
        let line = &buf[start..start + offset];
        start += offset + 1;
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        return match serde_json::from_slice(line) {
            Ok(value) => Parse::Complete(value),
            Err(_) => Parse::Invalid,
        };
    }
    Parse::Incomplete
}

/// Reads and writes single JSON documents
#[derive(Debug, Clone)]
pub struct WireFramer {
    mode: FrameMode,
    max_payload_bytes: usize,
    read_timeout: Duration,
}

impl Default for WireFramer {
    fn default() -> Self {
        Self {
            mode: FrameMode::Structural,
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }
}

impl WireFramer {
    pub fn new(mode: FrameMode, max_payload_bytes: usize, read_timeout: Duration) -> Self {
        Self {
            mode,
            max_payload_bytes,
            read_timeout,
        }
    }

    pub fn mode(&self) -> FrameMode {
        self.mode
    }

    /// Read until the first complete JSON document or until the peer closes
    pub async fn read_document<R>(&self, reader: &mut R) -> Result<Value, FrameError>
    where
        R: AsyncRead + Unpin,
    {
        match tokio::time::timeout(self.read_timeout, self.read_until_complete(reader)).await {
            Ok(result) => result,
            Err(_) => Err(FrameError::ReadTimeout(self.read_timeout)),
        }
    }

    async fn read_until_complete<R>(&self, reader: &mut R) -> Result<Value, FrameError>
    where
        R: AsyncRead + Unpin,
    {
        let mut buffer = Vec::with_capacity(READ_CHUNK_SIZE);
        let mut chunk = [0u8; READ_CHUNK_SIZE];

        loop {
            let n = reader.read(&mut chunk).await?;
            if n == 0 {
                return self.finish(&buffer);
            }
            buffer.extend_from_slice(&chunk[..n]);

            match self.parse(&buffer) {
                Parse::Complete(value) => return Ok(value),
                Parse::Invalid => {
                    return Err(FrameError::MalformedPayload {
                        received: buffer.len(),
                    })
                }
                Parse::Incomplete => {}
            }

            if buffer.len() > self.max_payload_bytes {
                return Err(FrameError::PayloadTooLarge {
                    limit: self.max_payload_bytes,
                });
            }
        }
    }

    fn parse(&self, buf: &[u8]) -> Parse {
        match self.mode {
            FrameMode::Structural => parse_structural(buf),
            FrameMode::LineDelimited => parse_line(buf),
        }
    }

    /// Peer closed: whatever is buffered must be one whole document now
    fn finish(&self, buf: &[u8]) -> Result<Value, FrameError> {
        if buf.is_empty() {
            return Err(FrameError::EmptyPayload);
        }
        if let Parse::Complete(value) = self.parse(buf) {
            return Ok(value);
        }
        serde_json::from_slice(buf).map_err(|_| FrameError::MalformedPayload {
            received: buf.len(),
        })
    }

    /// Write one document fully and flush
    pub async fn write_document<W>(&self, writer: &mut W, document: &[u8]) -> io::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        writer.write_all(document).await?;
        if self.mode == FrameMode::LineDelimited {
            writer.write_all(b"\n").await?;
        }
        writer.flush().await
    }
}

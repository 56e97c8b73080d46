//! Byte-level framing strategies for the agent stream.
//!
//! A [`Framing`] splits the inbound byte stream into message bodies and wraps
//! outbound bodies for the wire. Two strategies are provided:
//!
//! - [`LineFraming`]: newline-delimited JSON, delegating to
//!   [`tokio_util::codec::LinesCodec`] with a 1 MiB per-line limit.
//! - [`ContentLengthFraming`]: HTTP-style `Content-Length` headers, the
//!   framing spoken by LSP-family agents.
//!
//! Framing problems that leave the stream recoverable (oversized or
//! header-less frames, invalid UTF-8) are reported as
//! [`FrameError::Malformed`] so the codec can surface them and keep reading.
//! Only I/O failures are fatal.

use std::io::ErrorKind;

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

use crate::config::FramingKind;

/// Maximum accepted message body: 16 MiB.
pub const MAX_MESSAGE_BYTES: usize = 16 * 1024 * 1024;

/// Maximum accepted line length for [`LineFraming`]: 1 MiB.
pub const MAX_LINE_BYTES: usize = 1_048_576;

/// Maximum size of a `Content-Length` header block.
const MAX_HEADER_BYTES: usize = 8 * 1024;

/// Framing failure.
#[derive(Debug)]
pub enum FrameError {
    /// A frame was unusable; the stream can still be read.
    Malformed(String),
    /// The underlying stream failed.
    Io(std::io::Error),
}

impl From<std::io::Error> for FrameError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

/// A strategy for delimiting messages on a byte stream.
pub trait Framing: Send + Unpin + 'static {
    /// Extract the next complete body from `src`, or `Ok(None)` when more
    /// bytes are needed.
    ///
    /// # Errors
    ///
    /// [`FrameError::Malformed`] for a bad frame that has been skipped,
    /// [`FrameError::Io`] for stream failures.
    fn decode_frame(&mut self, src: &mut BytesMut) -> Result<Option<String>, FrameError>;

    /// Like [`decode_frame`](Self::decode_frame), called once the stream has
    /// reached EOF. Leftover partial bytes are reported as malformed.
    ///
    /// # Errors
    ///
    /// Same as [`decode_frame`](Self::decode_frame).
    fn decode_frame_eof(&mut self, src: &mut BytesMut) -> Result<Option<String>, FrameError> {
        match self.decode_frame(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => {
                let dangling = src.len();
                src.clear();
                Err(FrameError::Malformed(format!(
                    "stream ended inside a frame ({dangling} bytes discarded)"
                )))
            }
        }
    }

    /// Append one complete frame carrying `body` to `dst`.
    fn encode_frame(&mut self, body: &str, dst: &mut BytesMut);
}

// ── Newline-delimited ─────────────────────────────────────────────────────────

/// Newline-delimited JSON framing.
#[derive(Debug, Clone)]
pub struct LineFraming(LinesCodec);

impl LineFraming {
    /// Create a `LineFraming` with the default [`MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self(LinesCodec::new_with_max_length(MAX_LINE_BYTES))
    }
}

impl Default for LineFraming {
    fn default() -> Self {
        Self::new()
    }
}

impl Framing for LineFraming {
    fn decode_frame(&mut self, src: &mut BytesMut) -> Result<Option<String>, FrameError> {
        self.0.decode(src).map_err(map_lines_error)
    }

    fn decode_frame_eof(&mut self, src: &mut BytesMut) -> Result<Option<String>, FrameError> {
        self.0.decode_eof(src).map_err(map_lines_error)
    }

    fn encode_frame(&mut self, body: &str, dst: &mut BytesMut) {
        // LinesCodec::encode only reserves and copies; it cannot fail.
        let _ = self.0.encode(body, dst);
    }
}

fn map_lines_error(e: LinesCodecError) -> FrameError {
    match e {
        LinesCodecError::MaxLineLengthExceeded => {
            FrameError::Malformed(format!("line too long: exceeded {MAX_LINE_BYTES} bytes"))
        }
        // LinesCodec has already consumed the offending line.
        LinesCodecError::Io(io_err) if io_err.kind() == ErrorKind::InvalidData => {
            FrameError::Malformed(format!("line is not UTF-8: {io_err}"))
        }
        LinesCodecError::Io(io_err) => FrameError::Io(io_err),
    }
}

// ── Content-Length headers ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HeaderState {
    /// Waiting for a complete header block.
    Headers,
    /// Header parsed; waiting for this many body bytes.
    Body(usize),
    /// Skipping this many bytes of an oversized body.
    Discard(usize),
}

/// `Content-Length` header framing.
///
/// ```text
/// Content-Length: 47\r\n
/// \r\n
/// {"jsonrpc":"2.0","method":"initialize","id":1}
/// ```
///
/// Header names are matched case-insensitively, other headers are ignored,
/// and both CRLF and bare LF line endings are accepted.
#[derive(Debug, Clone)]
pub struct ContentLengthFraming {
    state: HeaderState,
    max_body: usize,
}

impl ContentLengthFraming {
    /// Create a framing with the default [`MAX_MESSAGE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_body(MAX_MESSAGE_BYTES)
    }

    /// Create a framing that rejects bodies larger than `max_body` bytes.
    #[must_use]
    pub fn with_max_body(max_body: usize) -> Self {
        Self {
            state: HeaderState::Headers,
            max_body,
        }
    }
}

impl Default for ContentLengthFraming {
    fn default() -> Self {
        Self::new()
    }
}

impl Framing for ContentLengthFraming {
    fn decode_frame(&mut self, src: &mut BytesMut) -> Result<Option<String>, FrameError> {
        loop {
            match self.state {
                HeaderState::Discard(remaining) => {
                    let skip = remaining.min(src.len());
                    src.advance(skip);
                    if skip < remaining {
                        self.state = HeaderState::Discard(remaining - skip);
                        return Ok(None);
                    }
                    self.state = HeaderState::Headers;
                }
                HeaderState::Body(len) => {
                    if src.len() < len {
                        src.reserve(len - src.len());
                        return Ok(None);
                    }
                    self.state = HeaderState::Headers;
                    let body = src.split_to(len);
                    return String::from_utf8(body.to_vec())
                        .map(Some)
                        .map_err(|e| FrameError::Malformed(format!("body is not UTF-8: {e}")));
                }
                HeaderState::Headers => {
                    let Some((header_len, separator_len)) = find_header_end(src) else {
                        if src.len() > MAX_HEADER_BYTES {
                            src.clear();
                            return Err(FrameError::Malformed(format!(
                                "header block exceeded {MAX_HEADER_BYTES} bytes"
                            )));
                        }
                        return Ok(None);
                    };

                    let header = src.split_to(header_len);
                    src.advance(separator_len);

                    let len = parse_content_length(&header)?;
                    if len > self.max_body {
                        self.state = HeaderState::Discard(len);
                        return Err(FrameError::Malformed(format!(
                            "message size {len} exceeds maximum {} bytes",
                            self.max_body
                        )));
                    }
                    self.state = HeaderState::Body(len);
                }
            }
        }
    }

    fn decode_frame_eof(&mut self, src: &mut BytesMut) -> Result<Option<String>, FrameError> {
        match self.decode_frame(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() && self.state == HeaderState::Headers => Ok(None),
            None => {
                let dangling = src.len();
                src.clear();
                self.state = HeaderState::Headers;
                Err(FrameError::Malformed(format!(
                    "stream ended inside a frame ({dangling} bytes discarded)"
                )))
            }
        }
    }

    fn encode_frame(&mut self, body: &str, dst: &mut BytesMut) {
        let header = format!("Content-Length: {}\r\n\r\n", body.len());
        dst.reserve(header.len() + body.len());
        dst.extend_from_slice(header.as_bytes());
        dst.extend_from_slice(body.as_bytes());
    }
}

/// Locate the blank line ending a header block.
///
/// Returns the header length and the length of the separator that follows.
fn find_header_end(src: &[u8]) -> Option<(usize, usize)> {
    let crlf = find(src, b"\r\n\r\n").map(|pos| (pos, 4));
    let lf = find(src, b"\n\n").map(|pos| (pos, 2));
    match (crlf, lf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn parse_content_length(header: &[u8]) -> Result<usize, FrameError> {
    let text = std::str::from_utf8(header)
        .map_err(|_| FrameError::Malformed("header block is not UTF-8".into()))?;

    let mut content_length = None;
    for line in text.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        if key.trim().eq_ignore_ascii_case("Content-Length") {
            let value = value.trim();
            content_length = Some(value.parse::<usize>().map_err(|_| {
                FrameError::Malformed(format!("invalid Content-Length value: {value}"))
            })?);
        }
    }

    content_length.ok_or_else(|| FrameError::Malformed("missing Content-Length header".into()))
}

// ── Selection ─────────────────────────────────────────────────────────────────

/// Framing chosen at runtime from configuration.
#[derive(Debug, Clone)]
pub enum WireFraming {
    /// Newline-delimited JSON.
    Lines(LineFraming),
    /// `Content-Length` headers.
    ContentLength(ContentLengthFraming),
}

impl WireFraming {
    /// Build the framing selected by `kind`.
    #[must_use]
    pub fn from_kind(kind: FramingKind) -> Self {
        match kind {
            FramingKind::Lines => Self::Lines(LineFraming::new()),
            FramingKind::ContentLength => Self::ContentLength(ContentLengthFraming::new()),
        }
    }
}

impl Framing for WireFraming {
    fn decode_frame(&mut self, src: &mut BytesMut) -> Result<Option<String>, FrameError> {
        match self {
            Self::Lines(f) => f.decode_frame(src),
            Self::ContentLength(f) => f.decode_frame(src),
        }
    }

    fn decode_frame_eof(&mut self, src: &mut BytesMut) -> Result<Option<String>, FrameError> {
        match self {
            Self::Lines(f) => f.decode_frame_eof(src),
            Self::ContentLength(f) => f.decode_frame_eof(src),
        }
    }

    fn encode_frame(&mut self, body: &str, dst: &mut BytesMut) {
        match self {
            Self::Lines(f) => f.encode_frame(body, dst),
            Self::ContentLength(f) => f.encode_frame(body, dst),
        }
    }
}

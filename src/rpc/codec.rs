//! JSON-RPC message codec.
//!
//! [`MessageCodec`] layers message classification on top of a [`Framing`]
//! strategy so it can drive [`tokio_util::codec::FramedRead`] directly.
//!
//! # Decoder
//!
//! Each complete frame is parsed into a [`Message`]. Frames that are not
//! valid JSON-RPC become [`Decoded::Malformed`] items instead of errors:
//! `FramedRead` terminates the stream after the first decoder error, and a
//! single bad message must not end the conversation. Blank frames are
//! skipped. Only I/O failures surface as `Err(AppError::Transport)`.
//!
//! # Encoder
//!
//! A [`Message`] is serialised to compact JSON and written as exactly one
//! frame.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::rpc::framing::{FrameError, Framing};
use crate::rpc::message::Message;
use crate::{AppError, Result};

/// One item produced by the inbound message sequence.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    /// A well-formed JSON-RPC message.
    Message(Message),
    /// A frame that could not be used; the stream continues.
    Malformed {
        /// Offending text, empty when the frame itself was unreadable.
        raw: String,
        /// Why the frame was rejected.
        reason: String,
    },
}

/// Framing-parametrised JSON-RPC codec.
#[derive(Debug, Clone)]
pub struct MessageCodec<F> {
    framing: F,
}

impl<F: Framing> MessageCodec<F> {
    /// Wrap `framing` in a message codec.
    #[must_use]
    pub fn new(framing: F) -> Self {
        Self { framing }
    }

    fn classify(
        frame: std::result::Result<Option<String>, FrameError>,
    ) -> Result<Option<Option<Decoded>>> {
        match frame {
            Ok(None) => Ok(None),
            Ok(Some(body)) if body.trim().is_empty() => Ok(Some(None)),
            Ok(Some(body)) => Ok(Some(Some(match Message::parse(&body) {
                Ok(message) => Decoded::Message(message),
                Err(reason) => Decoded::Malformed { raw: body, reason },
            }))),
            Err(FrameError::Malformed(reason)) => Ok(Some(Some(Decoded::Malformed {
                raw: String::new(),
                reason,
            }))),
            Err(FrameError::Io(err)) => Err(AppError::Transport(format!("read failed: {err}"))),
        }
    }
}

impl<F: Framing> Decoder for MessageCodec<F> {
    type Item = Decoded;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        loop {
            match Self::classify(self.framing.decode_frame(src))? {
                None => return Ok(None),
                // Blank frame: keep draining the buffer.
                Some(None) => {}
                Some(Some(item)) => return Ok(Some(item)),
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        loop {
            match Self::classify(self.framing.decode_frame_eof(src))? {
                None => return Ok(None),
                Some(None) => {}
                Some(Some(item)) => return Ok(Some(item)),
            }
        }
    }
}

impl<F: Framing> Encoder<Message> for MessageCodec<F> {
    type Error = AppError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<()> {
        self.encode_ref(&item, dst)
    }
}

impl<F: Framing> Encoder<&Message> for MessageCodec<F> {
    type Error = AppError;

    fn encode(&mut self, item: &Message, dst: &mut BytesMut) -> Result<()> {
        self.encode_ref(item, dst)
    }
}

impl<F: Framing> MessageCodec<F> {
    fn encode_ref(&mut self, item: &Message, dst: &mut BytesMut) -> Result<()> {
        let body = serde_json::to_string(&item.to_value())
            .map_err(|e| AppError::Protocol(format!("failed to serialise message: {e}")))?;
        self.framing.encode_frame(&body, dst);
        Ok(())
    }
}

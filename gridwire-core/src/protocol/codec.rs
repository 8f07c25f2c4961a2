//! Codec implementation for encoding/decoding wire messages.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use super::frame::Frame;
use super::ClientMessage;
use crate::error::{GridError, Result};

/// Default upper bound on the length of a single inbound frame.
pub const DEFAULT_MAX_FRAME_LENGTH: usize = 64 * 1024 * 1024;

/// Codec for encoding and decoding client messages.
///
/// Implements the `tokio_util::codec::{Encoder, Decoder}` traits for use
/// with tokio's framed I/O. The decoder yields one wire message per final
/// frame; fragmented messages come out as individual fragments and are
/// joined by a [`FragmentAssembler`](super::FragmentAssembler).
#[derive(Debug)]
pub struct ClientMessageCodec {
    /// Frames accumulated while decoding a multi-frame message.
    pending_frames: Vec<Frame>,
    max_frame_length: usize,
}

impl ClientMessageCodec {
    /// Creates a new codec instance.
    pub fn new() -> Self {
        Self::with_max_frame_length(DEFAULT_MAX_FRAME_LENGTH)
    }

    /// Creates a codec that rejects inbound frames longer than `max`.
    pub fn with_max_frame_length(max: usize) -> Self {
        Self {
            pending_frames: Vec::new(),
            max_frame_length: max,
        }
    }
}

impl Default for ClientMessageCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Encoder<ClientMessage> for ClientMessageCodec {
    type Error = GridError;

    fn encode(&mut self, mut item: ClientMessage, dst: &mut BytesMut) -> Result<()> {
        if item.is_empty() {
            return Err(GridError::Protocol("cannot encode empty message".to_string()));
        }

        item.finalize();
        item.write_to(dst);
        Ok(())
    }
}

impl Decoder for ClientMessageCodec {
    type Item = ClientMessage;
    type Error = GridError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        loop {
            if let Some(length) = Frame::peek_length(src) {
                if length > self.max_frame_length {
                    return Err(GridError::Protocol(format!(
                        "frame length {} exceeds limit {}",
                        length, self.max_frame_length
                    )));
                }
            }

            let frame = match Frame::read_from(src)? {
                Some(frame) => frame,
                None => return Ok(None),
            };

            let is_final = frame.is_final_frame();
            self.pending_frames.push(frame);

            if is_final {
                let frames = std::mem::take(&mut self.pending_frames);
                return Ok(Some(ClientMessage::from_frames(frames)));
            }
        }
    }
}

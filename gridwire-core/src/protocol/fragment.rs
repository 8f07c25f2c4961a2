//! Splitting of large messages into wire fragments and their reassembly.
//!
//! A fragment is sent as its own wire message. Its first frame carries the
//! 64-bit fragment id and the begin/end fragment flags; the frames of the
//! original message follow, and the fragment's last frame is marked final.
//! Unfragmented messages carry both fragment flags on their initial frame.

use std::collections::HashMap;

use bytes::BufMut;

use super::constants::*;
use super::frame::Frame;
use super::ClientMessage;
use crate::error::{GridError, Result};

/// Size of the leading frame of every fragment.
const FRAGMENT_HEADER_WIRE_SIZE: usize = FRAME_HEADER_SIZE + LONG_SIZE_IN_BYTES;

/// Splits `message` into fragments no larger than `max_frame_size` bytes.
///
/// Frames are never split, so a fragment holding one oversized frame may
/// exceed the limit. Messages that fit are returned unchanged as a single
/// element.
pub fn split_message(message: ClientMessage, max_frame_size: usize, fragment_id: i64) -> Vec<ClientMessage> {
    if message.wire_size() <= max_frame_size {
        return vec![message];
    }

    let mut groups: Vec<Vec<Frame>> = Vec::new();
    let mut current: Vec<Frame> = Vec::new();
    let mut current_size = FRAGMENT_HEADER_WIRE_SIZE;

    for mut frame in message.into_frames() {
        frame.flags &= !IS_FINAL_FLAG;
        let size = frame.wire_size();
        if !current.is_empty() && current_size + size > max_frame_size {
            groups.push(std::mem::take(&mut current));
            current_size = FRAGMENT_HEADER_WIRE_SIZE;
        }
        current_size += size;
        current.push(frame);
    }
    if !current.is_empty() {
        groups.push(current);
    }

    if groups.len() == 1 {
        let mut whole = ClientMessage::from_frames(groups.remove(0));
        whole.finalize();
        return vec![whole];
    }

    let last = groups.len() - 1;
    groups
        .into_iter()
        .enumerate()
        .map(|(index, frames)| {
            let flags = match index {
                0 => BEGIN_FRAGMENT_FLAG,
                i if i == last => END_FRAGMENT_FLAG,
                _ => DEFAULT_FLAGS,
            };
            let mut header = Frame::with_flags(flags);
            header.content.put_i64_le(fragment_id);

            let mut fragment = ClientMessage::from_initial_frame(header);
            for frame in frames {
                fragment.add_frame(frame);
            }
            fragment.finalize();
            fragment
        })
        .collect()
}

/// Default limit on messages being reassembled at the same time.
pub const DEFAULT_MAX_PENDING_FRAGMENTS: usize = 1024;

/// Default limit on bytes buffered for incomplete messages.
pub const DEFAULT_MAX_FRAGMENT_BYTES: usize = 64 * 1024 * 1024;

#[derive(Debug, Default)]
struct PendingMessage {
    frames: Vec<Frame>,
    bytes: usize,
}

/// Buffers incoming fragments by fragment id until the last one arrives.
///
/// One assembler belongs to one connection; fragments of different messages
/// may interleave and are kept apart by their ids. The number of incomplete
/// messages and the bytes they hold are bounded; exceeding either limit is a
/// protocol error.
#[derive(Debug)]
pub struct FragmentAssembler {
    pending: HashMap<i64, PendingMessage>,
    buffered_bytes: usize,
    max_pending: usize,
    max_bytes: usize,
}

impl Default for FragmentAssembler {
    fn default() -> Self {
        Self::with_limits(DEFAULT_MAX_PENDING_FRAGMENTS, DEFAULT_MAX_FRAGMENT_BYTES)
    }
}

impl FragmentAssembler {
    /// Creates an empty assembler with the default limits.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty assembler holding at most `max_pending` incomplete
    /// messages and `max_bytes` buffered bytes.
    pub fn with_limits(max_pending: usize, max_bytes: usize) -> Self {
        Self {
            pending: HashMap::new(),
            buffered_bytes: 0,
            max_pending,
            max_bytes,
        }
    }

    /// Feeds one wire message.
    ///
    /// Returns the complete message once it is available, or `None` while
    /// fragments are still outstanding.
    pub fn accept(&mut self, wire: ClientMessage) -> Result<Option<ClientMessage>> {
        let header = match wire.initial_frame() {
            Some(frame) => frame,
            None => return Err(GridError::Protocol("empty wire message".to_string())),
        };

        if header.is_unfragmented() {
            return Ok(Some(wire));
        }

        let fragment_id = read_fragment_id(header)?;
        let is_begin = header.is_begin_fragment();
        let is_end = header.is_end_fragment();

        let body: Vec<Frame> = wire.into_frames().into_iter().skip(1).collect();
        let body_bytes: usize = body.iter().map(Frame::wire_size).sum();

        if is_begin {
            if self.pending.contains_key(&fragment_id) {
                return Err(GridError::Protocol(format!(
                    "duplicate first fragment for fragment id {}",
                    fragment_id
                )));
            }
            if self.pending.len() >= self.max_pending {
                return Err(GridError::Protocol(format!(
                    "too many incomplete fragmented messages (limit {})",
                    self.max_pending
                )));
            }
            self.pending.insert(fragment_id, PendingMessage::default());
        } else if !self.pending.contains_key(&fragment_id) {
            return Err(GridError::Protocol(format!(
                "fragment {} arrived without its first fragment",
                fragment_id
            )));
        }

        if self.buffered_bytes.saturating_add(body_bytes) > self.max_bytes {
            self.discard(fragment_id);
            return Err(GridError::Protocol(format!(
                "fragment buffer exceeds {} bytes",
                self.max_bytes
            )));
        }

        let buffer = self.pending.entry(fragment_id).or_default();
        for mut frame in body {
            frame.flags &= !IS_FINAL_FLAG;
            buffer.frames.push(frame);
        }
        buffer.bytes += body_bytes;
        self.buffered_bytes += body_bytes;

        if !is_end {
            return Ok(None);
        }

        let frames = self.discard(fragment_id);
        let mut message = ClientMessage::from_frames(frames);
        message.finalize();
        Ok(Some(message))
    }

    fn discard(&mut self, fragment_id: i64) -> Vec<Frame> {
        match self.pending.remove(&fragment_id) {
            Some(pending) => {
                self.buffered_bytes -= pending.bytes;
                pending.frames
            }
            None => Vec::new(),
        }
    }

    /// Returns the number of messages with outstanding fragments.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Returns the bytes held for incomplete messages.
    pub fn buffered_bytes(&self) -> usize {
        self.buffered_bytes
    }

    /// Drops every partially received message.
    pub fn clear(&mut self) {
        self.pending.clear();
        self.buffered_bytes = 0;
    }
}

fn read_fragment_id(frame: &Frame) -> Result<i64> {
    let bytes = frame
        .content
        .get(FRAGMENTATION_ID_OFFSET..FRAGMENTATION_ID_OFFSET + LONG_SIZE_IN_BYTES)
        .ok_or_else(|| GridError::Protocol("fragment header too short".to_string()))?;
    let mut id = [0u8; 8];
    id.copy_from_slice(bytes);
    Ok(i64::from_le_bytes(id))
}

//! Frame type for the gridwire frame protocol.

use bytes::{Buf, BufMut, BytesMut};

use super::constants::*;
use crate::error::{GridError, Result};

/// A single frame on the wire.
///
/// Each frame consists of:
/// - A 4-byte length field (little-endian) counting the whole frame
/// - A 2-byte flags field (little-endian)
/// - Variable-length content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// The frame content (payload after flags).
    pub content: BytesMut,
    /// Frame flags indicating frame type and properties.
    pub flags: u16,
}

impl Frame {
    /// Creates a new frame with the given content and flags.
    pub fn new(content: BytesMut, flags: u16) -> Self {
        Self { content, flags }
    }

    /// Creates a new frame with content and default flags.
    pub fn with_content(content: BytesMut) -> Self {
        Self::new(content, DEFAULT_FLAGS)
    }

    /// Creates a new frame holding a copy of `data`.
    pub fn from_slice(data: &[u8]) -> Self {
        Self::with_content(BytesMut::from(data))
    }

    /// Creates a new empty frame with the given flags.
    pub fn with_flags(flags: u16) -> Self {
        Self::new(BytesMut::new(), flags)
    }

    /// Creates a zero-filled frame of `len` bytes, ready for fixed-size
    /// fields to be written at their offsets.
    pub fn zeroed(len: usize, flags: u16) -> Self {
        let mut content = BytesMut::with_capacity(len);
        content.resize(len, 0);
        Self::new(content, flags)
    }

    /// Creates a frame opening a nested structure.
    pub fn new_begin_frame() -> Self {
        Self::with_flags(BEGIN_DATA_STRUCTURE_FLAG)
    }

    /// Creates a frame closing a nested structure.
    pub fn new_end_frame() -> Self {
        Self::with_flags(END_DATA_STRUCTURE_FLAG)
    }

    /// Creates a null frame (represents a null value).
    pub fn new_null_frame() -> Self {
        Self::with_flags(IS_NULL_FLAG)
    }

    /// Returns true if this frame opens a nested structure.
    pub fn is_begin_frame(&self) -> bool {
        self.flags & BEGIN_DATA_STRUCTURE_FLAG != 0
    }

    /// Returns true if this frame closes a nested structure.
    pub fn is_end_frame(&self) -> bool {
        self.flags & END_DATA_STRUCTURE_FLAG != 0
    }

    /// Returns true if this frame has the NULL flag set.
    pub fn is_null_frame(&self) -> bool {
        self.flags & IS_NULL_FLAG != 0
    }

    /// Returns true if this frame has the FINAL flag set.
    pub fn is_final_frame(&self) -> bool {
        self.flags & IS_FINAL_FLAG != 0
    }

    /// Returns true if this frame has the EVENT flag set.
    pub fn is_event_frame(&self) -> bool {
        self.flags & IS_EVENT_FLAG != 0
    }

    /// Returns true if this frame has the BACKUP_EVENT flag set.
    pub fn is_backup_event_frame(&self) -> bool {
        self.flags & BACKUP_EVENT_FLAG != 0
    }

    /// Returns true if this frame starts a wire fragment.
    pub fn is_begin_fragment(&self) -> bool {
        self.flags & BEGIN_FRAGMENT_FLAG != 0
    }

    /// Returns true if this frame belongs to the last wire fragment.
    pub fn is_end_fragment(&self) -> bool {
        self.flags & END_FRAGMENT_FLAG != 0
    }

    /// Returns true if the whole message fits in one wire fragment.
    pub fn is_unfragmented(&self) -> bool {
        self.flags & UNFRAGMENTED_MESSAGE == UNFRAGMENTED_MESSAGE
    }

    /// Returns the size of this frame on the wire.
    ///
    /// This is also the value written in the length field.
    pub fn wire_size(&self) -> usize {
        FRAME_HEADER_SIZE + self.content.len()
    }

    /// Writes this frame to the given buffer.
    pub fn write_to(&self, dst: &mut BytesMut) {
        dst.reserve(self.wire_size());
        dst.put_u32_le(self.wire_size() as u32);
        dst.put_u16_le(self.flags);
        dst.put_slice(&self.content);
    }

    /// Reads a frame from the given buffer.
    ///
    /// Returns `Ok(None)` if there isn't enough data to read a complete frame,
    /// leaving `src` untouched. A length field smaller than the frame header
    /// is a protocol error.
    pub fn read_from(src: &mut BytesMut) -> Result<Option<Self>> {
        if src.len() < SIZE_OF_FRAME_LENGTH_FIELD {
            return Ok(None);
        }

        let frame_length = u32::from_le_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if frame_length < FRAME_HEADER_SIZE {
            return Err(GridError::Protocol(format!(
                "frame length {} is smaller than the frame header",
                frame_length
            )));
        }

        if src.len() < frame_length {
            return Ok(None);
        }

        src.advance(SIZE_OF_FRAME_LENGTH_FIELD);
        let flags = src.get_u16_le();
        let content = src.split_to(frame_length - FRAME_HEADER_SIZE);

        Ok(Some(Self::new(content, flags)))
    }

    /// Peeks the length of the next frame in `src` without consuming it.
    pub fn peek_length(src: &[u8]) -> Option<usize> {
        if src.len() < SIZE_OF_FRAME_LENGTH_FIELD {
            return None;
        }
        Some(u32::from_le_bytes([src[0], src[1], src[2], src[3]]) as usize)
    }
}

impl Default for Frame {
    fn default() -> Self {
        Self::with_flags(DEFAULT_FLAGS)
    }
}

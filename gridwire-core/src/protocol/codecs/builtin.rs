//! Codecs for variable-size values carried in their own frames.
//!
//! Nested structures are bracketed by begin/end frames. Decoders work on a
//! [`FrameIter`] and fail with a protocol error when a marker is missing.

use bytes::{BufMut, BytesMut};
use uuid::Uuid;

use super::fixed_size;
use crate::error::{GridError, Result};
use crate::protocol::constants::*;
use crate::protocol::{ClientMessage, Frame, FrameIter};

/// Frame-level helpers shared by every codec.
pub struct CodecUtil;

impl CodecUtil {
    /// Appends a null frame when `value` is `None`, otherwise encodes it.
    pub fn encode_nullable<T: ?Sized>(
        message: &mut ClientMessage,
        value: Option<&T>,
        encode: impl FnOnce(&mut ClientMessage, &T),
    ) {
        match value {
            Some(value) => encode(message, value),
            None => message.add_frame(Frame::new_null_frame()),
        }
    }

    /// Decodes a value that may have been encoded as a null frame.
    pub fn decode_nullable<'a, T>(
        iter: &mut FrameIter<'a>,
        decode: impl FnOnce(&mut FrameIter<'a>) -> Result<T>,
    ) -> Result<Option<T>> {
        if Self::next_frame_is_null(iter) {
            Ok(None)
        } else {
            decode(iter).map(Some)
        }
    }

    /// Consumes the next frame if it is a null frame.
    pub fn next_frame_is_null(iter: &mut FrameIter<'_>) -> bool {
        let is_null = iter.peek_next().map(Frame::is_null_frame).unwrap_or(false);
        if is_null {
            iter.next();
        }
        is_null
    }

    /// Returns true if the next frame closes the current structure.
    pub fn next_frame_is_end(iter: &FrameIter<'_>) -> bool {
        iter.peek_next().map(Frame::is_end_frame).unwrap_or(false)
    }

    /// Consumes the begin frame of a nested structure.
    pub fn expect_begin(iter: &mut FrameIter<'_>) -> Result<()> {
        let frame = iter.next_frame()?;
        if !frame.is_begin_frame() {
            return Err(GridError::Protocol(
                "expected begin frame of nested structure".to_string(),
            ));
        }
        Ok(())
    }

    /// Skips any trailing fields of the current structure and its end frame.
    pub fn fast_forward_to_end_frame(iter: &mut FrameIter<'_>) -> Result<()> {
        iter.fast_forward_to_end()
    }
}

/// UTF-8 strings, one frame each.
pub struct StringCodec;

impl StringCodec {
    /// Appends `value` as a frame.
    pub fn encode(message: &mut ClientMessage, value: &str) {
        message.add_frame(Frame::from_slice(value.as_bytes()));
    }

    /// Decodes the next frame as a string.
    pub fn decode(iter: &mut FrameIter<'_>) -> Result<String> {
        Self::decode_frame(iter.next_frame()?)
    }

    /// Decodes the content of `frame` as a string.
    pub fn decode_frame(frame: &Frame) -> Result<String> {
        String::from_utf8(frame.content.to_vec())
            .map_err(|e| GridError::Protocol(format!("invalid UTF-8 string: {}", e)))
    }
}

/// Opaque byte arrays, one frame each.
pub struct ByteArrayCodec;

impl ByteArrayCodec {
    /// Appends `value` as a frame.
    pub fn encode(message: &mut ClientMessage, value: &[u8]) {
        message.add_frame(Frame::from_slice(value));
    }

    /// Decodes the next frame as raw bytes.
    pub fn decode(iter: &mut FrameIter<'_>) -> Result<Vec<u8>> {
        Ok(iter.next_frame()?.content.to_vec())
    }
}

/// Lists of variable-size items bracketed by begin/end frames.
pub struct ListMultiFrameCodec;

impl ListMultiFrameCodec {
    /// Encodes each item with `encode` between begin and end frames.
    pub fn encode<T>(
        message: &mut ClientMessage,
        items: &[T],
        mut encode: impl FnMut(&mut ClientMessage, &T),
    ) {
        message.add_frame(Frame::new_begin_frame());
        for item in items {
            encode(message, item);
        }
        message.add_frame(Frame::new_end_frame());
    }

    /// Decodes items with `decode` until the end frame.
    pub fn decode<'a, T>(
        iter: &mut FrameIter<'a>,
        mut decode: impl FnMut(&mut FrameIter<'a>) -> Result<T>,
    ) -> Result<Vec<T>> {
        CodecUtil::expect_begin(iter)?;
        let mut items = Vec::new();
        loop {
            match iter.peek_next() {
                Some(frame) if frame.is_end_frame() => {
                    iter.next();
                    return Ok(items);
                }
                Some(_) => items.push(decode(iter)?),
                None => {
                    return Err(GridError::Protocol("list is missing its end frame".to_string()))
                }
            }
        }
    }
}

/// Key/value lists encoded as alternating items between begin/end frames.
pub struct EntryListCodec;

impl EntryListCodec {
    /// Encodes each entry as its key followed by its value.
    pub fn encode<K, V>(
        message: &mut ClientMessage,
        entries: &[(K, V)],
        mut encode_key: impl FnMut(&mut ClientMessage, &K),
        mut encode_value: impl FnMut(&mut ClientMessage, &V),
    ) {
        message.add_frame(Frame::new_begin_frame());
        for (key, value) in entries {
            encode_key(message, key);
            encode_value(message, value);
        }
        message.add_frame(Frame::new_end_frame());
    }

    /// Decodes entries until the end frame.
    pub fn decode<'a, K, V>(
        iter: &mut FrameIter<'a>,
        mut decode_key: impl FnMut(&mut FrameIter<'a>) -> Result<K>,
        mut decode_value: impl FnMut(&mut FrameIter<'a>) -> Result<V>,
    ) -> Result<Vec<(K, V)>> {
        CodecUtil::expect_begin(iter)?;
        let mut entries = Vec::new();
        loop {
            match iter.peek_next() {
                Some(frame) if frame.is_end_frame() => {
                    iter.next();
                    return Ok(entries);
                }
                Some(_) => {
                    let key = decode_key(iter)?;
                    let value = decode_value(iter)?;
                    entries.push((key, value));
                }
                None => {
                    return Err(GridError::Protocol(
                        "entry list is missing its end frame".to_string(),
                    ))
                }
            }
        }
    }
}

/// Lists of 32-bit integers packed into a single frame.
pub struct ListIntegerCodec;

impl ListIntegerCodec {
    /// Appends `values` as one packed frame.
    pub fn encode(message: &mut ClientMessage, values: &[i32]) {
        let mut content = BytesMut::with_capacity(values.len() * INT_SIZE_IN_BYTES);
        for value in values {
            content.put_i32_le(*value);
        }
        message.add_frame(Frame::with_content(content));
    }

    /// Decodes the next frame as packed integers.
    pub fn decode(iter: &mut FrameIter<'_>) -> Result<Vec<i32>> {
        let frame = iter.next_frame()?;
        if frame.content.len() % INT_SIZE_IN_BYTES != 0 {
            return Err(GridError::Protocol(format!(
                "integer list frame has {} bytes",
                frame.content.len()
            )));
        }
        (0..frame.content.len() / INT_SIZE_IN_BYTES)
            .map(|i| fixed_size::decode_int(&frame.content, i * INT_SIZE_IN_BYTES))
            .collect()
    }
}

/// Lists of nullable UUIDs packed into a single frame.
pub struct ListUuidCodec;

impl ListUuidCodec {
    /// Appends `values` as one packed frame.
    pub fn encode(message: &mut ClientMessage, values: &[Uuid]) {
        let mut frame = Frame::zeroed(values.len() * UUID_SIZE_IN_BYTES, DEFAULT_FLAGS);
        for (i, value) in values.iter().enumerate() {
            fixed_size::encode_uuid(&mut frame.content, i * UUID_SIZE_IN_BYTES, Some(*value));
        }
        message.add_frame(frame);
    }

    /// Decodes the next frame as packed UUIDs, rejecting null entries.
    pub fn decode(iter: &mut FrameIter<'_>) -> Result<Vec<Uuid>> {
        let frame = iter.next_frame()?;
        if frame.content.len() % UUID_SIZE_IN_BYTES != 0 {
            return Err(GridError::Protocol(format!(
                "uuid list frame has {} bytes",
                frame.content.len()
            )));
        }
        (0..frame.content.len() / UUID_SIZE_IN_BYTES)
            .map(|i| {
                fixed_size::decode_uuid(&frame.content, i * UUID_SIZE_IN_BYTES)?
                    .ok_or_else(|| GridError::Protocol("null uuid in uuid list".to_string()))
            })
            .collect()
    }
}

/// String-to-string maps, encoded as an entry list.
pub struct StringMapCodec;

impl StringMapCodec {
    /// Appends `entries` as an entry list of strings.
    pub fn encode(message: &mut ClientMessage, entries: &[(String, String)]) {
        EntryListCodec::encode(
            message,
            entries,
            |m, k| StringCodec::encode(m, k),
            |m, v| StringCodec::encode(m, v),
        );
    }

    /// Decodes an entry list of strings.
    pub fn decode(iter: &mut FrameIter<'_>) -> Result<Vec<(String, String)>> {
        EntryListCodec::decode(iter, StringCodec::decode, StringCodec::decode)
    }
}

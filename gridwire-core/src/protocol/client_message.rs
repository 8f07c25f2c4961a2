//! ClientMessage type for multi-frame protocol messages.

use bytes::BytesMut;

use super::constants::*;
use super::frame::Frame;
use crate::error::{GridError, Result};

/// A client message composed of one or more frames.
///
/// The first frame is the "initial frame" containing the message header
/// (type, correlation ID, partition ID, and for responses the backup ack
/// count). Fixed-size parameters follow the header inside the initial frame;
/// variable-size parameters are carried in the frames after it.
///
/// Equality compares the frames only, so a message decoded from the wire
/// equals the one that was encoded.
#[derive(Debug, Clone, Default)]
pub struct ClientMessage {
    frames: Vec<Frame>,
    retryable: bool,
}

impl ClientMessage {
    /// Creates a new empty client message.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a request message holding only the header.
    ///
    /// The correlation ID is left at zero; the invocation layer assigns it.
    pub fn new_request(message_type: i32, partition_id: i32) -> Self {
        Self::from_initial_frame(request_initial_frame(message_type, partition_id, 0))
    }

    /// Creates a message whose first frame is `initial`.
    pub fn from_initial_frame(initial: Frame) -> Self {
        Self {
            frames: vec![initial],
            retryable: false,
        }
    }

    /// Creates a client message from received frames.
    pub fn from_frames(frames: Vec<Frame>) -> Self {
        Self {
            frames,
            retryable: false,
        }
    }

    /// Returns the message type from the initial frame.
    ///
    /// Returns `None` if there is no initial frame or if the frame content
    /// is too short to contain a message type field.
    pub fn message_type(&self) -> Option<i32> {
        self.header_slice(TYPE_FIELD_OFFSET, INT_SIZE_IN_BYTES)
            .map(|b| i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Sets the message type in the initial frame.
    pub fn set_message_type(&mut self, message_type: i32) {
        self.write_header(TYPE_FIELD_OFFSET, &message_type.to_le_bytes());
    }

    /// Returns the correlation ID from the initial frame.
    pub fn correlation_id(&self) -> Option<i64> {
        self.header_slice(CORRELATION_ID_OFFSET, LONG_SIZE_IN_BYTES)
            .map(|b| i64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
    }

    /// Sets the correlation ID in the initial frame.
    ///
    /// A no-op when the initial frame is too short to hold one.
    pub fn set_correlation_id(&mut self, correlation_id: i64) {
        self.write_header(CORRELATION_ID_OFFSET, &correlation_id.to_le_bytes());
    }

    /// Returns the partition ID from the initial frame.
    pub fn partition_id(&self) -> Option<i32> {
        self.header_slice(PARTITION_ID_OFFSET, INT_SIZE_IN_BYTES)
            .map(|b| i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Sets the partition ID in the initial frame.
    pub fn set_partition_id(&mut self, partition_id: i32) {
        self.write_header(PARTITION_ID_OFFSET, &partition_id.to_le_bytes());
    }

    /// Returns the backup ack count of a response.
    pub fn backup_acks(&self) -> Option<u8> {
        self.header_slice(RESPONSE_BACKUP_ACKS_OFFSET, BYTE_SIZE_IN_BYTES)
            .map(|b| b[0])
    }

    /// Returns the flags of the initial frame.
    pub fn header_flags(&self) -> u16 {
        self.frames.first().map(|f| f.flags).unwrap_or(DEFAULT_FLAGS)
    }

    /// Adds `flags` to the initial frame.
    pub fn add_header_flags(&mut self, flags: u16) {
        if let Some(frame) = self.frames.first_mut() {
            frame.flags |= flags;
        }
    }

    /// Returns true if this message is flagged as an event.
    pub fn is_event(&self) -> bool {
        self.frames
            .first()
            .map(|f| f.is_event_frame())
            .unwrap_or(false)
    }

    /// Returns true if this message is a backup acknowledgement event.
    pub fn is_backup_event(&self) -> bool {
        self.frames
            .first()
            .map(|f| f.is_backup_event_frame())
            .unwrap_or(false)
    }

    /// Returns true if the request may be resent after a connection loss
    /// even when it is not known whether the member executed it.
    pub fn is_retryable(&self) -> bool {
        self.retryable
    }

    /// Marks the request as safe to resend.
    pub fn set_retryable(&mut self, retryable: bool) {
        self.retryable = retryable;
    }

    /// Adds a frame to the message.
    pub fn add_frame(&mut self, frame: Frame) {
        self.frames.push(frame);
    }

    /// Returns a reference to the initial (first) frame, if present.
    pub fn initial_frame(&self) -> Option<&Frame> {
        self.frames.first()
    }

    /// Returns a reference to all frames.
    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    /// Consumes the message, returning its frames.
    pub fn into_frames(self) -> Vec<Frame> {
        self.frames
    }

    /// Returns the number of frames in the message.
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Returns true if the message has no frames.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Calculates the total size of the message on the wire.
    pub fn wire_size(&self) -> usize {
        self.frames.iter().map(Frame::wire_size).sum()
    }

    /// Marks the last frame as final. Encoding does this automatically.
    pub fn finalize(&mut self) {
        if let Some(last) = self.frames.last_mut() {
            last.flags |= IS_FINAL_FLAG;
        }
    }

    /// Writes all frames to the destination buffer.
    pub fn write_to(&self, dst: &mut BytesMut) {
        dst.reserve(self.wire_size());
        for frame in &self.frames {
            frame.write_to(dst);
        }
    }

    /// Returns an iterator positioned on the initial frame.
    pub fn iter(&self) -> FrameIter<'_> {
        FrameIter::new(&self.frames)
    }

    /// Returns an iterator positioned after the initial frame, where the
    /// variable-size parameters start.
    pub fn body(&self) -> FrameIter<'_> {
        let mut iter = self.iter();
        iter.next();
        iter
    }

    fn header_slice(&self, offset: usize, len: usize) -> Option<&[u8]> {
        self.frames
            .first()
            .and_then(|f| f.content.get(offset..offset + len))
    }

    fn write_header(&mut self, offset: usize, bytes: &[u8]) {
        if let Some(frame) = self.frames.first_mut() {
            if let Some(dst) = frame.content.get_mut(offset..offset + bytes.len()) {
                dst.copy_from_slice(bytes);
            }
        }
    }
}

impl PartialEq for ClientMessage {
    fn eq(&self, other: &Self) -> bool {
        self.frames == other.frames
    }
}

impl Eq for ClientMessage {}

/// Builds a request or event initial frame with `extra` bytes reserved for
/// fixed-size parameters after the header.
pub fn request_initial_frame(message_type: i32, partition_id: i32, extra: usize) -> Frame {
    let mut frame = Frame::zeroed(REQUEST_HEADER_SIZE + extra, UNFRAGMENTED_MESSAGE);
    frame.content[TYPE_FIELD_OFFSET..TYPE_FIELD_OFFSET + 4]
        .copy_from_slice(&message_type.to_le_bytes());
    frame.content[PARTITION_ID_OFFSET..PARTITION_ID_OFFSET + 4]
        .copy_from_slice(&partition_id.to_le_bytes());
    frame
}

/// Builds a response initial frame with `extra` bytes reserved for
/// fixed-size parameters after the header.
pub fn response_initial_frame(message_type: i32, correlation_id: i64, extra: usize) -> Frame {
    let mut frame = Frame::zeroed(RESPONSE_HEADER_SIZE + extra, UNFRAGMENTED_MESSAGE);
    frame.content[TYPE_FIELD_OFFSET..TYPE_FIELD_OFFSET + 4]
        .copy_from_slice(&message_type.to_le_bytes());
    frame.content[CORRELATION_ID_OFFSET..CORRELATION_ID_OFFSET + 8]
        .copy_from_slice(&correlation_id.to_le_bytes());
    frame.content[PARTITION_ID_OFFSET..PARTITION_ID_OFFSET + 4]
        .copy_from_slice(&PARTITION_ID_ANY.to_le_bytes());
    frame
}

/// Builds an event initial frame with `extra` bytes reserved after the header.
pub fn event_initial_frame(message_type: i32, partition_id: i32, extra: usize) -> Frame {
    let mut frame = request_initial_frame(message_type, partition_id, extra);
    frame.flags |= IS_EVENT_FLAG;
    frame
}

/// Cursor over the frames of a message.
///
/// Decoders advance it with [`next_frame`](FrameIter::next_frame), look
/// ahead with [`peek_next`](FrameIter::peek_next), and skip fields they do
/// not know with [`fast_forward_to_end`](FrameIter::fast_forward_to_end).
#[derive(Debug, Clone)]
pub struct FrameIter<'a> {
    frames: &'a [Frame],
    position: usize,
}

impl<'a> FrameIter<'a> {
    /// Creates an iterator over `frames`.
    pub fn new(frames: &'a [Frame]) -> Self {
        Self {
            frames,
            position: 0,
        }
    }

    /// Returns true if at least one frame remains.
    pub fn has_next(&self) -> bool {
        self.position < self.frames.len()
    }

    /// Returns the next frame without advancing.
    pub fn peek_next(&self) -> Option<&'a Frame> {
        self.frames.get(self.position)
    }

    /// Advances and returns the next frame, failing if the message ended.
    pub fn next_frame(&mut self) -> Result<&'a Frame> {
        self.next()
            .ok_or_else(|| GridError::Protocol("unexpected end of message".to_string()))
    }

    /// Skips frames up to and including the end frame of the current
    /// nested structure, tolerating fields added by newer peers.
    pub fn fast_forward_to_end(&mut self) -> Result<()> {
        let mut depth = 1usize;
        while depth > 0 {
            let frame = self.next().ok_or_else(|| {
                GridError::Protocol("missing end frame of nested structure".to_string())
            })?;
            if frame.is_end_frame() {
                depth -= 1;
            } else if frame.is_begin_frame() {
                depth += 1;
            }
        }
        Ok(())
    }
}

impl<'a> Iterator for FrameIter<'a> {
    type Item = &'a Frame;

    fn next(&mut self) -> Option<Self::Item> {
        let frame = self.frames.get(self.position)?;
        self.position += 1;
        Some(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_request_header() {
        let msg = ClientMessage::new_request(CLIENT_AUTHENTICATION, PARTITION_ID_ANY);

        assert_eq!(msg.message_type(), Some(CLIENT_AUTHENTICATION));
        assert_eq!(msg.correlation_id(), Some(0));
        assert_eq!(msg.partition_id(), Some(PARTITION_ID_ANY));
        assert_eq!(msg.frame_count(), 1);
        assert_eq!(msg.header_flags(), UNFRAGMENTED_MESSAGE);
    }

    #[test]
    fn test_header_wire_offsets() {
        let mut msg = ClientMessage::new_request(0x010203, 7);
        msg.set_correlation_id(0x1122);
        let mut buf = BytesMut::new();
        msg.write_to(&mut buf);

        assert_eq!(&buf[6..10], &0x010203i32.to_le_bytes());
        assert_eq!(&buf[10..18], &0x1122i64.to_le_bytes());
        assert_eq!(&buf[18..22], &7i32.to_le_bytes());
    }

    #[test]
    fn test_response_backup_acks_offset() {
        let mut frame = response_initial_frame(CLIENT_PING_RESPONSE, 9, 0);
        frame.content[RESPONSE_BACKUP_ACKS_OFFSET] = 2;
        let msg = ClientMessage::from_initial_frame(frame);

        let mut buf = BytesMut::new();
        msg.write_to(&mut buf);
        assert_eq!(buf[22], 2);
        assert_eq!(msg.backup_acks(), Some(2));
        assert_eq!(msg.correlation_id(), Some(9));
    }

    #[test]
    fn test_set_header_fields() {
        let mut msg = ClientMessage::new_request(CLIENT_PING, 0);
        msg.set_correlation_id(42);
        msg.set_partition_id(123);
        msg.set_message_type(CLIENT_AUTHENTICATION);

        assert_eq!(msg.correlation_id(), Some(42));
        assert_eq!(msg.partition_id(), Some(123));
        assert_eq!(msg.message_type(), Some(CLIENT_AUTHENTICATION));
    }

    #[test]
    fn test_short_initial_frame_reads_none() {
        let msg = ClientMessage::from_frames(vec![Frame::from_slice(&[0x01, 0x02])]);
        assert_eq!(msg.message_type(), None);
        assert_eq!(msg.correlation_id(), None);
        assert_eq!(msg.partition_id(), None);
    }

    #[test]
    fn test_set_on_short_frame_is_noop() {
        let mut msg = ClientMessage::from_frames(vec![Frame::from_slice(&[0x01; 10])]);
        msg.set_partition_id(42);
        assert_eq!(msg.partition_id(), None);
    }

    #[test]
    fn test_finalize_marks_last_frame() {
        let mut msg = ClientMessage::new_request(CLIENT_PING, 0);
        msg.add_frame(Frame::from_slice(b"data"));
        msg.finalize();

        assert!(msg.frames().last().unwrap().is_final_frame());
        assert!(!msg.frames()[0].is_final_frame());
    }

    #[test]
    fn test_event_flags() {
        let msg = ClientMessage::from_initial_frame(event_initial_frame(
            CLIENT_MEMBERS_VIEW_EVENT,
            PARTITION_ID_ANY,
            0,
        ));
        assert!(msg.is_event());
        assert!(!msg.is_backup_event());
        assert!(!ClientMessage::new().is_event());
    }

    #[test]
    fn test_equality_ignores_retryable() {
        let mut a = ClientMessage::new_request(CLIENT_PING, 1);
        let b = a.clone();
        a.set_retryable(true);
        assert_eq!(a, b);
    }

    #[test]
    fn test_frame_iter_peek_and_next() {
        let msg = ClientMessage::from_frames(vec![
            Frame::from_slice(b"a"),
            Frame::from_slice(b"b"),
        ]);
        let mut iter = msg.iter();

        assert!(iter.has_next());
        assert_eq!(&iter.peek_next().unwrap().content[..], b"a");
        assert_eq!(&iter.next_frame().unwrap().content[..], b"a");
        assert_eq!(&iter.next_frame().unwrap().content[..], b"b");
        assert!(!iter.has_next());
        assert!(matches!(iter.next_frame(), Err(GridError::Protocol(_))));
    }

    #[test]
    fn test_fast_forward_skips_nested_structures() {
        let msg = ClientMessage::from_frames(vec![
            Frame::from_slice(b"known"),
            Frame::from_slice(b"unknown"),
            Frame::new_begin_frame(),
            Frame::from_slice(b"nested"),
            Frame::new_end_frame(),
            Frame::new_end_frame(),
            Frame::from_slice(b"after"),
        ]);
        let mut iter = msg.iter();
        iter.next_frame().unwrap();
        iter.fast_forward_to_end().unwrap();

        assert_eq!(&iter.next_frame().unwrap().content[..], b"after");
    }

    #[test]
    fn test_fast_forward_without_end_fails() {
        let msg = ClientMessage::from_frames(vec![Frame::from_slice(b"x")]);
        let mut iter = msg.iter();
        assert!(matches!(
            iter.fast_forward_to_end(),
            Err(GridError::Protocol(_))
        ));
    }

    #[test]
    fn test_wire_size_empty_message() {
        let msg = ClientMessage::new();
        assert_eq!(msg.wire_size(), 0);
        let mut buf = BytesMut::new();
        msg.write_to(&mut buf);
        assert!(buf.is_empty());
    }
}

//! Cluster view listener: member list and partition table pushes.

use uuid::Uuid;

use super::check_response_type;
use crate::error::{GridError, Result};
use crate::member::MemberInfo;
use crate::protocol::client_message::{event_initial_frame, response_initial_frame};
use crate::protocol::codecs::fixed_size::{decode_int, decode_uuid, encode_int, encode_uuid};
use crate::protocol::codecs::{EntryListCodec, ListIntegerCodec, ListMultiFrameCodec, MemberInfoCodec};
use crate::protocol::constants::*;
use crate::protocol::{ClientMessage, Frame, FrameIter};

const EVENT_VERSION_OFFSET: usize = EVENT_HEADER_SIZE;

/// A view pushed by the member holding the cluster view registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterViewEvent {
    /// Full member list.
    Members {
        /// Member list version.
        version: i32,
        /// Current members.
        members: Vec<MemberInfo>,
    },
    /// Full partition table as owner to owned partitions.
    Partitions {
        /// Partition state version.
        version: i32,
        /// Owner uuid with the partitions it owns.
        partitions: Vec<(Uuid, Vec<i32>)>,
    },
}

/// Encodes the add-cluster-view-listener request.
pub fn encode_request() -> ClientMessage {
    ClientMessage::new_request(CLIENT_ADD_CLUSTER_VIEW_LISTENER, PARTITION_ID_ANY)
}

/// Encodes the add-cluster-view-listener response.
pub fn encode_response(correlation_id: i64) -> ClientMessage {
    ClientMessage::from_initial_frame(response_initial_frame(
        CLIENT_ADD_CLUSTER_VIEW_LISTENER_RESPONSE,
        correlation_id,
        0,
    ))
}

/// Checks the add-cluster-view-listener response.
pub fn decode_response(message: &ClientMessage) -> Result<()> {
    check_response_type(message, &[CLIENT_ADD_CLUSTER_VIEW_LISTENER_RESPONSE])
}

/// Encodes a members view event for the registration with `correlation_id`.
pub fn encode_members_view_event(
    correlation_id: i64,
    version: i32,
    members: &[MemberInfo],
) -> ClientMessage {
    let mut initial = event_initial_frame(CLIENT_MEMBERS_VIEW_EVENT, PARTITION_ID_ANY, INT_SIZE_IN_BYTES);
    encode_int(&mut initial.content, EVENT_VERSION_OFFSET, version);
    let mut message = ClientMessage::from_initial_frame(initial);
    message.set_correlation_id(correlation_id);
    ListMultiFrameCodec::encode(&mut message, members, MemberInfoCodec::encode);
    message
}

/// Encodes a partitions view event for the registration with `correlation_id`.
pub fn encode_partitions_view_event(
    correlation_id: i64,
    version: i32,
    partitions: &[(Uuid, Vec<i32>)],
) -> ClientMessage {
    let mut initial =
        event_initial_frame(CLIENT_PARTITIONS_VIEW_EVENT, PARTITION_ID_ANY, INT_SIZE_IN_BYTES);
    encode_int(&mut initial.content, EVENT_VERSION_OFFSET, version);
    let mut message = ClientMessage::from_initial_frame(initial);
    message.set_correlation_id(correlation_id);
    EntryListCodec::encode(
        &mut message,
        partitions,
        |m, owner| {
            let mut frame = Frame::zeroed(UUID_SIZE_IN_BYTES, DEFAULT_FLAGS);
            encode_uuid(&mut frame.content, 0, Some(*owner));
            m.add_frame(frame);
        },
        |m, ids| ListIntegerCodec::encode(m, ids),
    );
    message
}

fn decode_owner(iter: &mut FrameIter<'_>) -> Result<Uuid> {
    let frame = iter.next_frame()?;
    decode_uuid(&frame.content, 0)?
        .ok_or_else(|| GridError::Protocol("partition owner is null".to_string()))
}

/// Decodes a cluster view event, returning `None` for other event types.
pub fn decode_event(message: &ClientMessage) -> Result<Option<ClusterViewEvent>> {
    let event_type = match message.message_type() {
        Some(t @ (CLIENT_MEMBERS_VIEW_EVENT | CLIENT_PARTITIONS_VIEW_EVENT)) => t,
        _ => return Ok(None),
    };

    let mut iter = message.iter();
    let initial = iter.next_frame()?;
    let version = decode_int(&initial.content, EVENT_VERSION_OFFSET)?;

    let event = if event_type == CLIENT_MEMBERS_VIEW_EVENT {
        ClusterViewEvent::Members {
            version,
            members: ListMultiFrameCodec::decode(&mut iter, MemberInfoCodec::decode)?,
        }
    } else {
        ClusterViewEvent::Partitions {
            version,
            partitions: EntryListCodec::decode(&mut iter, decode_owner, ListIntegerCodec::decode)?,
        }
    };
    Ok(Some(event))
}

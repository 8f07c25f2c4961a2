//! Distributed object listener: created/destroyed notifications.

use uuid::Uuid;

use super::check_response_type;
use crate::error::{GridError, Result};
use crate::protocol::client_message::{event_initial_frame, request_initial_frame, response_initial_frame};
use crate::protocol::codecs::fixed_size::*;
use crate::protocol::codecs::StringCodec;
use crate::protocol::constants::*;
use crate::protocol::ClientMessage;

const ADD_LOCAL_ONLY_OFFSET: usize = REQUEST_HEADER_SIZE;
const ADD_RESPONSE_ID_OFFSET: usize = RESPONSE_HEADER_SIZE;
const REMOVE_ID_OFFSET: usize = REQUEST_HEADER_SIZE;
const REMOVE_RESPONSE_OFFSET: usize = RESPONSE_HEADER_SIZE;
const EVENT_SOURCE_OFFSET: usize = EVENT_HEADER_SIZE;

/// Whether an object was created or destroyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DistributedObjectEventType {
    /// The object was created.
    Created,
    /// The object was destroyed.
    Destroyed,
}

impl DistributedObjectEventType {
    fn as_str(self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Destroyed => "DESTROYED",
        }
    }

    fn parse(value: &str) -> Result<Self> {
        match value {
            "CREATED" => Ok(Self::Created),
            "DESTROYED" => Ok(Self::Destroyed),
            other => Err(GridError::Protocol(format!(
                "unknown distributed object event type {}",
                other
            ))),
        }
    }
}

/// A distributed object was created or destroyed somewhere in the cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistributedObjectEvent {
    /// Object name.
    pub name: String,
    /// Service the object belongs to.
    pub service_name: String,
    /// What happened.
    pub event_type: DistributedObjectEventType,
    /// Member that reported the change.
    pub source: Option<Uuid>,
}

/// Encodes an add-listener request.
pub fn encode_add_request(local_only: bool) -> ClientMessage {
    let mut initial = request_initial_frame(
        CLIENT_ADD_DISTRIBUTED_OBJECT_LISTENER,
        PARTITION_ID_ANY,
        BOOLEAN_SIZE_IN_BYTES,
    );
    encode_bool(&mut initial.content, ADD_LOCAL_ONLY_OFFSET, local_only);
    ClientMessage::from_initial_frame(initial)
}

/// Decodes the local-only flag of an add-listener request.
pub fn decode_add_request(message: &ClientMessage) -> Result<bool> {
    let initial = message.iter().next_frame()?;
    decode_bool(&initial.content, ADD_LOCAL_ONLY_OFFSET)
}

/// Encodes an add-listener response carrying the server registration id.
pub fn encode_add_response(correlation_id: i64, registration_id: Uuid) -> ClientMessage {
    let mut initial = response_initial_frame(
        CLIENT_ADD_DISTRIBUTED_OBJECT_LISTENER_RESPONSE,
        correlation_id,
        UUID_SIZE_IN_BYTES,
    );
    encode_uuid(&mut initial.content, ADD_RESPONSE_ID_OFFSET, Some(registration_id));
    ClientMessage::from_initial_frame(initial)
}

/// Decodes the server registration id from an add-listener response.
pub fn decode_add_response(message: &ClientMessage) -> Result<Uuid> {
    check_response_type(message, &[CLIENT_ADD_DISTRIBUTED_OBJECT_LISTENER_RESPONSE])?;
    let initial = message.iter().next_frame()?;
    decode_uuid(&initial.content, ADD_RESPONSE_ID_OFFSET)?
        .ok_or_else(|| GridError::Protocol("listener registration without id".to_string()))
}

/// Encodes a remove-listener request for `registration_id`.
pub fn encode_remove_request(registration_id: Uuid) -> ClientMessage {
    let mut initial = request_initial_frame(
        CLIENT_REMOVE_DISTRIBUTED_OBJECT_LISTENER,
        PARTITION_ID_ANY,
        UUID_SIZE_IN_BYTES,
    );
    encode_uuid(&mut initial.content, REMOVE_ID_OFFSET, Some(registration_id));
    let mut message = ClientMessage::from_initial_frame(initial);
    message.set_retryable(true);
    message
}

/// Decodes the registration id of a remove-listener request.
pub fn decode_remove_request(message: &ClientMessage) -> Result<Uuid> {
    let initial = message.iter().next_frame()?;
    decode_uuid(&initial.content, REMOVE_ID_OFFSET)?
        .ok_or_else(|| GridError::Protocol("remove listener without id".to_string()))
}

/// Encodes a remove-listener response.
pub fn encode_remove_response(correlation_id: i64, removed: bool) -> ClientMessage {
    let mut initial = response_initial_frame(
        CLIENT_REMOVE_DISTRIBUTED_OBJECT_LISTENER_RESPONSE,
        correlation_id,
        BOOLEAN_SIZE_IN_BYTES,
    );
    encode_bool(&mut initial.content, REMOVE_RESPONSE_OFFSET, removed);
    ClientMessage::from_initial_frame(initial)
}

/// Decodes whether the member removed the registration.
pub fn decode_remove_response(message: &ClientMessage) -> Result<bool> {
    check_response_type(message, &[CLIENT_REMOVE_DISTRIBUTED_OBJECT_LISTENER_RESPONSE])?;
    let initial = message.iter().next_frame()?;
    decode_bool(&initial.content, REMOVE_RESPONSE_OFFSET)
}

/// Encodes an event for the registration installed by the request with
/// `correlation_id`.
pub fn encode_event(correlation_id: i64, event: &DistributedObjectEvent) -> ClientMessage {
    let mut initial = event_initial_frame(
        CLIENT_DISTRIBUTED_OBJECT_EVENT,
        PARTITION_ID_ANY,
        UUID_SIZE_IN_BYTES,
    );
    encode_uuid(&mut initial.content, EVENT_SOURCE_OFFSET, event.source);
    let mut message = ClientMessage::from_initial_frame(initial);
    message.set_correlation_id(correlation_id);
    StringCodec::encode(&mut message, &event.name);
    StringCodec::encode(&mut message, &event.service_name);
    StringCodec::encode(&mut message, event.event_type.as_str());
    message
}

/// Decodes a distributed object event.
pub fn decode_event(message: &ClientMessage) -> Result<DistributedObjectEvent> {
    if message.message_type() != Some(CLIENT_DISTRIBUTED_OBJECT_EVENT) {
        return Err(GridError::Protocol(format!(
            "not a distributed object event: {:?}",
            message.message_type()
        )));
    }
    let mut iter = message.iter();
    let initial = iter.next_frame()?;
    let source = decode_uuid(&initial.content, EVENT_SOURCE_OFFSET)?;
    let name = StringCodec::decode(&mut iter)?;
    let service_name = StringCodec::decode(&mut iter)?;
    let event_type = DistributedObjectEventType::parse(&StringCodec::decode(&mut iter)?)?;
    Ok(DistributedObjectEvent {
        name,
        service_name,
        event_type,
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_remove() {
        let add = encode_add_request(true);
        assert!(decode_add_request(&add).unwrap());

        let id = Uuid::new_v4();
        assert_eq!(decode_add_response(&encode_add_response(1, id)).unwrap(), id);

        let remove = encode_remove_request(id);
        assert!(remove.is_retryable());
        assert_eq!(decode_remove_request(&remove).unwrap(), id);
        assert!(decode_remove_response(&encode_remove_response(2, true)).unwrap());
    }

    #[test]
    fn test_event() {
        let event = DistributedObjectEvent {
            name: "orders".into(),
            service_name: "grid:map".into(),
            event_type: DistributedObjectEventType::Destroyed,
            source: Some(Uuid::new_v4()),
        };
        let msg = encode_event(5, &event);
        assert!(msg.is_event());
        assert_eq!(msg.correlation_id(), Some(5));
        assert_eq!(decode_event(&msg).unwrap(), event);
    }
}

//! Built-in protocol messages, one module per operation.
//!
//! Each module offers plain encode/decode functions for its request,
//! response and events. [`message_name`] maps every known message type to a
//! human-readable name for logging.

pub mod authentication;
pub mod cluster_view;
pub mod distributed_object;
pub mod error;
pub mod ping;

use crate::error::{GridError, Result};
use crate::protocol::constants::*;
use crate::protocol::ClientMessage;

const MESSAGE_NAMES: &[(i32, &str)] = &[
    (ERROR_RESPONSE, "Client.Error"),
    (CLIENT_AUTHENTICATION, "Client.Authentication"),
    (CLIENT_AUTHENTICATION_RESPONSE, "Client.AuthenticationResponse"),
    (CLIENT_AUTHENTICATION_CUSTOM, "Client.AuthenticationCustom"),
    (CLIENT_AUTHENTICATION_CUSTOM_RESPONSE, "Client.AuthenticationCustomResponse"),
    (CLIENT_ADD_CLUSTER_VIEW_LISTENER, "Client.AddClusterViewListener"),
    (CLIENT_ADD_CLUSTER_VIEW_LISTENER_RESPONSE, "Client.AddClusterViewListenerResponse"),
    (CLIENT_MEMBERS_VIEW_EVENT, "Client.MembersViewEvent"),
    (CLIENT_PARTITIONS_VIEW_EVENT, "Client.PartitionsViewEvent"),
    (CLIENT_ADD_DISTRIBUTED_OBJECT_LISTENER, "Client.AddDistributedObjectListener"),
    (
        CLIENT_ADD_DISTRIBUTED_OBJECT_LISTENER_RESPONSE,
        "Client.AddDistributedObjectListenerResponse",
    ),
    (CLIENT_DISTRIBUTED_OBJECT_EVENT, "Client.DistributedObjectEvent"),
    (CLIENT_REMOVE_DISTRIBUTED_OBJECT_LISTENER, "Client.RemoveDistributedObjectListener"),
    (
        CLIENT_REMOVE_DISTRIBUTED_OBJECT_LISTENER_RESPONSE,
        "Client.RemoveDistributedObjectListenerResponse",
    ),
    (CLIENT_PING, "Client.Ping"),
    (CLIENT_PING_RESPONSE, "Client.PingResponse"),
];

/// Returns the name of a known message type.
pub fn message_name(message_type: i32) -> Option<&'static str> {
    MESSAGE_NAMES
        .iter()
        .find(|(t, _)| *t == message_type)
        .map(|(_, name)| *name)
}

/// Checks that `message` answers with one of the `expected` types.
///
/// Error responses are decoded and returned as [`GridError::Server`]; any
/// other type is a protocol error.
pub fn check_response_type(message: &ClientMessage, expected: &[i32]) -> Result<()> {
    match message.message_type() {
        Some(t) if expected.contains(&t) => Ok(()),
        Some(ERROR_RESPONSE) => Err(error::decode_error_response(message)?.into()),
        Some(t) => Err(GridError::Protocol(format!(
            "unexpected response type {:#08x} ({}), expected {:#08x}",
            t,
            message_name(t).unwrap_or("unknown"),
            expected.first().copied().unwrap_or_default()
        ))),
        None => Err(GridError::Protocol("response without header".to_string())),
    }
}

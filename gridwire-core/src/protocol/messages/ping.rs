//! Heartbeat ping.

use super::check_response_type;
use crate::error::Result;
use crate::protocol::client_message::response_initial_frame;
use crate::protocol::constants::*;
use crate::protocol::ClientMessage;

/// Encodes a ping request.
pub fn encode_request() -> ClientMessage {
    let mut message = ClientMessage::new_request(CLIENT_PING, PARTITION_ID_ANY);
    message.set_retryable(true);
    message
}

/// Encodes a ping response.
pub fn encode_response(correlation_id: i64) -> ClientMessage {
    ClientMessage::from_initial_frame(response_initial_frame(CLIENT_PING_RESPONSE, correlation_id, 0))
}

/// Checks a ping response.
pub fn decode_response(message: &ClientMessage) -> Result<()> {
    check_response_type(message, &[CLIENT_PING_RESPONSE])
}

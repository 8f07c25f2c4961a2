//! Error responses.
//!
//! An error response carries the cause chain as a list of error holders;
//! the first holder describes the failure itself.

use crate::error::{GridError, Result, ServerError};
use crate::protocol::client_message::response_initial_frame;
use crate::protocol::codecs::{ErrorHolder, ErrorHolderCodec, ListMultiFrameCodec};
use crate::protocol::constants::*;
use crate::protocol::ClientMessage;

/// Encodes an error response for the request with `correlation_id`.
pub fn encode_error_response(correlation_id: i64, holders: &[ErrorHolder]) -> ClientMessage {
    let mut message =
        ClientMessage::from_initial_frame(response_initial_frame(ERROR_RESPONSE, correlation_id, 0));
    ListMultiFrameCodec::encode(&mut message, holders, ErrorHolderCodec::encode);
    message
}

/// Decodes every error holder of an error response.
pub fn decode_error_holders(message: &ClientMessage) -> Result<Vec<ErrorHolder>> {
    let mut iter = message.body();
    ListMultiFrameCodec::decode(&mut iter, ErrorHolderCodec::decode)
}

/// Decodes an error response into the server error it reports.
pub fn decode_error_response(message: &ClientMessage) -> Result<ServerError> {
    decode_error_holders(message)?
        .into_iter()
        .next()
        .map(ServerError::from)
        .ok_or_else(|| GridError::Protocol("error response without error holders".to_string()))
}

/// Returns true if `message` is an error response.
pub fn is_error_response(message: &ClientMessage) -> bool {
    message.message_type() == Some(ERROR_RESPONSE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::messages::check_response_type;

    fn holder(code: i32, class_name: &str) -> ErrorHolder {
        ErrorHolder {
            error_code: code,
            class_name: class_name.into(),
            message: Some("boom".into()),
            stack_trace: Vec::new(),
        }
    }

    #[test]
    fn test_first_holder_is_reported() {
        let msg = encode_error_response(
            12,
            &[
                holder(error_codes::ILLEGAL_STATE, "IllegalStateException"),
                holder(error_codes::IO, "IOException"),
            ],
        );
        assert!(is_error_response(&msg));
        assert_eq!(msg.correlation_id(), Some(12));

        let err = decode_error_response(&msg).unwrap();
        assert_eq!(err.code(), error_codes::ILLEGAL_STATE);
        assert_eq!(err.message(), Some("boom"));
        assert!(!err.is_retryable());
        assert_eq!(decode_error_holders(&msg).unwrap().len(), 2);
    }

    #[test]
    fn test_error_response_surfaces_as_server_error() {
        let msg = encode_error_response(1, &[holder(error_codes::MEMBER_LEFT, "MemberLeftException")]);
        match check_response_type(&msg, &[CLIENT_PING_RESPONSE]) {
            Err(GridError::Server(err)) => assert!(err.is_retryable()),
            other => panic!("expected server error, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_error_response_is_protocol_error() {
        let msg = encode_error_response(1, &[]);
        assert!(matches!(decode_error_response(&msg), Err(GridError::Protocol(_))));
    }
}

//! Authentication request and response.

use uuid::Uuid;

use super::check_response_type;
use crate::error::{GridError, Result};
use crate::member::Address;
use crate::protocol::client_message::{request_initial_frame, response_initial_frame};
use crate::protocol::codecs::fixed_size::*;
use crate::protocol::codecs::{AddressCodec, ByteArrayCodec, CodecUtil, ListMultiFrameCodec, StringCodec};
use crate::protocol::constants::*;
use crate::protocol::ClientMessage;

const REQUEST_UUID_OFFSET: usize = REQUEST_HEADER_SIZE;
const REQUEST_SERIALIZATION_VERSION_OFFSET: usize = REQUEST_UUID_OFFSET + UUID_SIZE_IN_BYTES;
const REQUEST_EXTRA: usize = UUID_SIZE_IN_BYTES + BYTE_SIZE_IN_BYTES;

const RESPONSE_STATUS_OFFSET: usize = RESPONSE_HEADER_SIZE;
const RESPONSE_MEMBER_UUID_OFFSET: usize = RESPONSE_STATUS_OFFSET + BYTE_SIZE_IN_BYTES;
const RESPONSE_SERIALIZATION_VERSION_OFFSET: usize = RESPONSE_MEMBER_UUID_OFFSET + UUID_SIZE_IN_BYTES;
const RESPONSE_PARTITION_COUNT_OFFSET: usize = RESPONSE_SERIALIZATION_VERSION_OFFSET + BYTE_SIZE_IN_BYTES;
const RESPONSE_CLUSTER_ID_OFFSET: usize = RESPONSE_PARTITION_COUNT_OFFSET + INT_SIZE_IN_BYTES;
const RESPONSE_FAILOVER_SUPPORTED_OFFSET: usize = RESPONSE_CLUSTER_ID_OFFSET + UUID_SIZE_IN_BYTES;
const RESPONSE_EXTRA: usize =
    RESPONSE_FAILOVER_SUPPORTED_OFFSET + BOOLEAN_SIZE_IN_BYTES - RESPONSE_HEADER_SIZE;

/// Credentials presented in the authentication request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthCredentials {
    /// Username and password, either may be absent.
    UsernamePassword {
        /// The username.
        username: Option<String>,
        /// The password.
        password: Option<String>,
    },
    /// An opaque token, sent with the custom authentication message type.
    Token(Vec<u8>),
}

/// Parameters of an authentication request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticationRequest {
    /// Name of the cluster the client expects to join.
    pub cluster_name: String,
    /// Credentials.
    pub credentials: AuthCredentials,
    /// Identifier of the client instance.
    pub client_uuid: Uuid,
    /// Client implementation type.
    pub client_type: String,
    /// Serialization version the client speaks.
    pub serialization_version: u8,
    /// Client library version.
    pub client_version: String,
    /// Client instance name.
    pub client_name: String,
    /// Client labels.
    pub labels: Vec<String>,
}

/// Authentication outcome reported by the member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AuthenticationStatus {
    /// Credentials accepted.
    Authenticated = 0,
    /// Credentials rejected.
    CredentialsFailed = 1,
    /// Serialization versions differ.
    SerializationVersionMismatch = 2,
    /// The member refuses clients of this cluster.
    NotAllowedInCluster = 3,
}

impl AuthenticationStatus {
    /// Creates a status from its wire value.
    pub fn from_value(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Authenticated),
            1 => Some(Self::CredentialsFailed),
            2 => Some(Self::SerializationVersionMismatch),
            3 => Some(Self::NotAllowedInCluster),
            _ => None,
        }
    }
}

/// Decoded authentication response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticationResponse {
    /// Authentication outcome.
    pub status: AuthenticationStatus,
    /// Address of the member that answered.
    pub address: Option<Address>,
    /// UUID of the member that answered.
    pub member_uuid: Option<Uuid>,
    /// Serialization version of the member.
    pub serialization_version: u8,
    /// Server version string.
    pub server_version: String,
    /// Number of partitions in the cluster.
    pub partition_count: i32,
    /// Identifier of the cluster.
    pub cluster_id: Option<Uuid>,
    /// Whether the cluster supports client failover.
    pub failover_supported: bool,
}

/// Encodes an authentication request.
pub fn encode_request(request: &AuthenticationRequest) -> ClientMessage {
    let message_type = match request.credentials {
        AuthCredentials::UsernamePassword { .. } => CLIENT_AUTHENTICATION,
        AuthCredentials::Token(_) => CLIENT_AUTHENTICATION_CUSTOM,
    };
    let mut initial = request_initial_frame(message_type, PARTITION_ID_ANY, REQUEST_EXTRA);
    encode_uuid(&mut initial.content, REQUEST_UUID_OFFSET, Some(request.client_uuid));
    encode_byte(
        &mut initial.content,
        REQUEST_SERIALIZATION_VERSION_OFFSET,
        request.serialization_version,
    );

    let mut message = ClientMessage::from_initial_frame(initial);
    message.set_retryable(true);
    StringCodec::encode(&mut message, &request.cluster_name);
    match &request.credentials {
        AuthCredentials::UsernamePassword { username, password } => {
            CodecUtil::encode_nullable(&mut message, username.as_deref(), StringCodec::encode);
            CodecUtil::encode_nullable(&mut message, password.as_deref(), StringCodec::encode);
        }
        AuthCredentials::Token(token) => ByteArrayCodec::encode(&mut message, token),
    }
    StringCodec::encode(&mut message, &request.client_type);
    StringCodec::encode(&mut message, &request.client_version);
    StringCodec::encode(&mut message, &request.client_name);
    ListMultiFrameCodec::encode(&mut message, &request.labels, |m, label| {
        StringCodec::encode(m, label)
    });
    message
}

/// Decodes an authentication request.
pub fn decode_request(message: &ClientMessage) -> Result<AuthenticationRequest> {
    let mut iter = message.iter();
    let initial = iter.next_frame()?;
    let client_uuid = decode_uuid(&initial.content, REQUEST_UUID_OFFSET)?
        .ok_or_else(|| GridError::Protocol("authentication without client uuid".to_string()))?;
    let serialization_version = decode_byte(&initial.content, REQUEST_SERIALIZATION_VERSION_OFFSET)?;

    let cluster_name = StringCodec::decode(&mut iter)?;
    let credentials = match message.message_type() {
        Some(CLIENT_AUTHENTICATION_CUSTOM) => AuthCredentials::Token(ByteArrayCodec::decode(&mut iter)?),
        _ => AuthCredentials::UsernamePassword {
            username: CodecUtil::decode_nullable(&mut iter, StringCodec::decode)?,
            password: CodecUtil::decode_nullable(&mut iter, StringCodec::decode)?,
        },
    };
    let client_type = StringCodec::decode(&mut iter)?;
    let client_version = StringCodec::decode(&mut iter)?;
    let client_name = StringCodec::decode(&mut iter)?;
    let labels = ListMultiFrameCodec::decode(&mut iter, StringCodec::decode)?;

    Ok(AuthenticationRequest {
        cluster_name,
        credentials,
        client_uuid,
        client_type,
        serialization_version,
        client_version,
        client_name,
        labels,
    })
}

/// Encodes the response to an authentication request of `request_type`.
pub fn encode_response(
    request_type: i32,
    correlation_id: i64,
    response: &AuthenticationResponse,
) -> ClientMessage {
    let response_type = match request_type {
        CLIENT_AUTHENTICATION_CUSTOM => CLIENT_AUTHENTICATION_CUSTOM_RESPONSE,
        _ => CLIENT_AUTHENTICATION_RESPONSE,
    };
    let mut initial = response_initial_frame(response_type, correlation_id, RESPONSE_EXTRA);
    encode_byte(&mut initial.content, RESPONSE_STATUS_OFFSET, response.status as u8);
    encode_uuid(&mut initial.content, RESPONSE_MEMBER_UUID_OFFSET, response.member_uuid);
    encode_byte(
        &mut initial.content,
        RESPONSE_SERIALIZATION_VERSION_OFFSET,
        response.serialization_version,
    );
    encode_int(&mut initial.content, RESPONSE_PARTITION_COUNT_OFFSET, response.partition_count);
    encode_uuid(&mut initial.content, RESPONSE_CLUSTER_ID_OFFSET, response.cluster_id);
    encode_bool(
        &mut initial.content,
        RESPONSE_FAILOVER_SUPPORTED_OFFSET,
        response.failover_supported,
    );

    let mut message = ClientMessage::from_initial_frame(initial);
    CodecUtil::encode_nullable(&mut message, response.address.as_ref(), AddressCodec::encode);
    StringCodec::encode(&mut message, &response.server_version);
    message
}

/// Decodes an authentication response, surfacing error responses as
/// server errors.
pub fn decode_response(message: &ClientMessage) -> Result<AuthenticationResponse> {
    check_response_type(
        message,
        &[CLIENT_AUTHENTICATION_RESPONSE, CLIENT_AUTHENTICATION_CUSTOM_RESPONSE],
    )?;
    let mut iter = message.iter();
    let initial = iter.next_frame()?;

    let status_value = decode_byte(&initial.content, RESPONSE_STATUS_OFFSET)?;
    let status = AuthenticationStatus::from_value(status_value).ok_or_else(|| {
        GridError::Protocol(format!("unknown authentication status {}", status_value))
    })?;
    let member_uuid = decode_uuid(&initial.content, RESPONSE_MEMBER_UUID_OFFSET)?;
    let serialization_version = decode_byte(&initial.content, RESPONSE_SERIALIZATION_VERSION_OFFSET)?;
    let partition_count = decode_int(&initial.content, RESPONSE_PARTITION_COUNT_OFFSET)?;
    let cluster_id = decode_uuid(&initial.content, RESPONSE_CLUSTER_ID_OFFSET)?;
    let failover_supported = decode_bool(&initial.content, RESPONSE_FAILOVER_SUPPORTED_OFFSET)?;

    let address = CodecUtil::decode_nullable(&mut iter, AddressCodec::decode)?;
    let server_version = StringCodec::decode(&mut iter)?;

    Ok(AuthenticationResponse {
        status,
        address,
        member_uuid,
        serialization_version,
        server_version,
        partition_count,
        cluster_id,
        failover_supported,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(credentials: AuthCredentials) -> AuthenticationRequest {
        AuthenticationRequest {
            cluster_name: "dev".into(),
            credentials,
            client_uuid: Uuid::new_v4(),
            client_type: "RST".into(),
            serialization_version: 1,
            client_version: "0.1.0".into(),
            client_name: "client-1".into(),
            labels: vec!["blue".into()],
        }
    }

    #[test]
    fn test_username_password_request() {
        let req = request(AuthCredentials::UsernamePassword {
            username: Some("admin".into()),
            password: None,
        });
        let msg = encode_request(&req);
        assert_eq!(msg.message_type(), Some(CLIENT_AUTHENTICATION));
        assert!(msg.is_retryable());
        assert_eq!(decode_request(&msg).unwrap(), req);
    }

    #[test]
    fn test_token_request_uses_custom_type() {
        let req = request(AuthCredentials::Token(b"jwt".to_vec()));
        let msg = encode_request(&req);
        assert_eq!(msg.message_type(), Some(CLIENT_AUTHENTICATION_CUSTOM));
        assert_eq!(decode_request(&msg).unwrap(), req);
    }

    #[test]
    fn test_response() {
        let response = AuthenticationResponse {
            status: AuthenticationStatus::Authenticated,
            address: Some(Address::new("127.0.0.1", 5701)),
            member_uuid: Some(Uuid::new_v4()),
            serialization_version: 1,
            server_version: "5.3.0".into(),
            partition_count: 271,
            cluster_id: Some(Uuid::new_v4()),
            failover_supported: false,
        };
        let msg = encode_response(CLIENT_AUTHENTICATION, 3, &response);
        assert_eq!(msg.correlation_id(), Some(3));
        assert_eq!(decode_response(&msg).unwrap(), response);
    }

    #[test]
    fn test_unknown_status_rejected() {
        let mut msg = encode_response(
            CLIENT_AUTHENTICATION,
            1,
            &AuthenticationResponse {
                status: AuthenticationStatus::Authenticated,
                address: None,
                member_uuid: None,
                serialization_version: 1,
                server_version: String::new(),
                partition_count: 1,
                cluster_id: None,
                failover_supported: false,
            },
        );
        let mut frames = msg.clone().into_frames();
        frames[0].content[RESPONSE_STATUS_OFFSET] = 9;
        msg = ClientMessage::from_frames(frames);
        assert!(matches!(decode_response(&msg), Err(GridError::Protocol(_))));
    }
}

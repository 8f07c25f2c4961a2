//! Protocol constants for the gridwire frame protocol.

/// Size of the frame length field in bytes.
pub const SIZE_OF_FRAME_LENGTH_FIELD: usize = 4;

/// Size of the frame flags field in bytes.
pub const SIZE_OF_FRAME_FLAGS_FIELD: usize = 2;

/// Total frame header size (length + flags).
///
/// The length field counts the whole frame, this header included.
pub const FRAME_HEADER_SIZE: usize = SIZE_OF_FRAME_LENGTH_FIELD + SIZE_OF_FRAME_FLAGS_FIELD;

/// Protocol preamble written once by the client right after the socket opens.
pub const PROTOCOL_PREAMBLE: &[u8; 3] = b"CP2";

// Frame flags.

/// First wire fragment of a message.
pub const BEGIN_FRAGMENT_FLAG: u16 = 1 << 15;

/// Last wire fragment of a message.
pub const END_FRAGMENT_FLAG: u16 = 1 << 14;

/// Last frame of a message.
pub const IS_FINAL_FLAG: u16 = 1 << 13;

/// Opens a nested variable-size structure.
pub const BEGIN_DATA_STRUCTURE_FLAG: u16 = 1 << 12;

/// Closes a nested variable-size structure.
pub const END_DATA_STRUCTURE_FLAG: u16 = 1 << 11;

/// Frame stands for a null value.
pub const IS_NULL_FLAG: u16 = 1 << 10;

/// Message is a server-pushed event.
pub const IS_EVENT_FLAG: u16 = 1 << 9;

/// Request asks for backup acknowledgements.
pub const BACKUP_AWARE_FLAG: u16 = 1 << 8;

/// Message is a backup acknowledgement event.
pub const BACKUP_EVENT_FLAG: u16 = 1 << 7;

/// A message carried in a single wire fragment.
pub const UNFRAGMENTED_MESSAGE: u16 = BEGIN_FRAGMENT_FLAG | END_FRAGMENT_FLAG;

/// Default frame flags (no special flags set).
pub const DEFAULT_FLAGS: u16 = 0;

// Initial frame layout. Offsets are relative to the frame content.

/// Offset of message type in initial frame content.
pub const TYPE_FIELD_OFFSET: usize = 0;

/// Offset of correlation ID in initial frame content.
pub const CORRELATION_ID_OFFSET: usize = TYPE_FIELD_OFFSET + 4;

/// Offset of partition ID in the initial frame.
pub const PARTITION_ID_OFFSET: usize = CORRELATION_ID_OFFSET + 8;

/// Size of the request initial frame header.
pub const REQUEST_HEADER_SIZE: usize = PARTITION_ID_OFFSET + 4;

/// Size of the event initial frame header.
pub const EVENT_HEADER_SIZE: usize = PARTITION_ID_OFFSET + 4;

/// Offset of backup acks count in response initial frame.
pub const RESPONSE_BACKUP_ACKS_OFFSET: usize = PARTITION_ID_OFFSET + 4;

/// Size of the response initial frame header.
pub const RESPONSE_HEADER_SIZE: usize = RESPONSE_BACKUP_ACKS_OFFSET + 1;

/// Offset of the fragment id inside the leading frame of a fragment.
pub const FRAGMENTATION_ID_OFFSET: usize = 0;

/// Partition ID indicating no specific partition (-1).
pub const PARTITION_ID_ANY: i32 = -1;

// Fixed type sizes.

/// Size of an encoded byte.
pub const BYTE_SIZE_IN_BYTES: usize = 1;

/// Size of an encoded boolean.
pub const BOOLEAN_SIZE_IN_BYTES: usize = 1;

/// Size of an encoded 32-bit integer.
pub const INT_SIZE_IN_BYTES: usize = 4;

/// Size of an encoded 64-bit integer.
pub const LONG_SIZE_IN_BYTES: usize = 8;

/// Size of an encoded UUID: a null marker byte followed by two 64-bit halves.
pub const UUID_SIZE_IN_BYTES: usize = BOOLEAN_SIZE_IN_BYTES + 2 * LONG_SIZE_IN_BYTES;

// Message types.

/// Error response, shared by every request.
pub const ERROR_RESPONSE: i32 = 0;

/// Client authentication request.
pub const CLIENT_AUTHENTICATION: i32 = 0x000100;

/// Client authentication response.
pub const CLIENT_AUTHENTICATION_RESPONSE: i32 = 0x000101;

/// Client authentication with a custom token.
pub const CLIENT_AUTHENTICATION_CUSTOM: i32 = 0x000200;

/// Client custom token authentication response.
pub const CLIENT_AUTHENTICATION_CUSTOM_RESPONSE: i32 = 0x000201;

/// Registers the cluster view listener.
pub const CLIENT_ADD_CLUSTER_VIEW_LISTENER: i32 = 0x000300;

/// Cluster view listener registration response.
pub const CLIENT_ADD_CLUSTER_VIEW_LISTENER_RESPONSE: i32 = 0x000301;

/// Members view event.
pub const CLIENT_MEMBERS_VIEW_EVENT: i32 = 0x000302;

/// Partitions view event.
pub const CLIENT_PARTITIONS_VIEW_EVENT: i32 = 0x000303;

/// Adds a distributed object listener.
pub const CLIENT_ADD_DISTRIBUTED_OBJECT_LISTENER: i32 = 0x000900;

/// Distributed object listener registration response.
pub const CLIENT_ADD_DISTRIBUTED_OBJECT_LISTENER_RESPONSE: i32 = 0x000901;

/// Distributed object created/destroyed event.
pub const CLIENT_DISTRIBUTED_OBJECT_EVENT: i32 = 0x000902;

/// Removes a distributed object listener.
pub const CLIENT_REMOVE_DISTRIBUTED_OBJECT_LISTENER: i32 = 0x000A00;

/// Distributed object listener removal response.
pub const CLIENT_REMOVE_DISTRIBUTED_OBJECT_LISTENER_RESPONSE: i32 = 0x000A01;

/// Heartbeat ping request.
pub const CLIENT_PING: i32 = 0x000B00;

/// Heartbeat ping response.
pub const CLIENT_PING_RESPONSE: i32 = 0x000B01;

/// Server error codes carried by error responses.
pub mod error_codes {
    /// Unknown error.
    pub const UNDEFINED: i32 = 0;
    /// Authentication failed.
    pub const AUTHENTICATION: i32 = 3;
    /// Caller is not a member of the cluster.
    pub const CALLER_NOT_MEMBER: i32 = 8;
    /// Generic server error.
    pub const GENERIC: i32 = 18;
    /// Member instance is shutting down or not yet started.
    pub const INSTANCE_NOT_ACTIVE: i32 = 19;
    /// Server-side I/O failure.
    pub const IO: i32 = 22;
    /// Illegal argument.
    pub const ILLEGAL_ARGUMENT: i32 = 23;
    /// Illegal state.
    pub const ILLEGAL_STATE: i32 = 27;
    /// Target member left the cluster.
    pub const MEMBER_LEFT: i32 = 33;
    /// Server-side operation timeout.
    pub const OPERATION_TIMEOUT: i32 = 38;
    /// Partition is being migrated.
    pub const PARTITION_MIGRATING: i32 = 39;
    /// Generic retryable error.
    pub const RETRYABLE_GENERIC: i32 = 46;
    /// Retryable I/O failure.
    pub const RETRYABLE_IO: i32 = 47;
    /// Target member disconnected.
    pub const TARGET_DISCONNECTED: i32 = 52;
    /// Target is not a member of the cluster.
    pub const TARGET_NOT_MEMBER: i32 = 53;
    /// Operation was sent to a member that does not own the partition.
    pub const WRONG_TARGET: i32 = 66;

    /// Returns `true` if an error with the given code is transient.
    pub fn is_retryable(code: i32) -> bool {
        matches!(
            code,
            CALLER_NOT_MEMBER
                | INSTANCE_NOT_ACTIVE
                | MEMBER_LEFT
                | PARTITION_MIGRATING
                | RETRYABLE_GENERIC
                | RETRYABLE_IO
                | TARGET_DISCONNECTED
                | TARGET_NOT_MEMBER
                | WRONG_TARGET
        )
    }
}

//! Core types and protocol for gridwire.
//!
//! This crate holds everything that does not need a runtime: frames and
//! messages, the `tokio_util` wire codec, fragmentation, parameter codecs,
//! the built-in protocol messages, partition hashing and the error type.

#![warn(missing_docs)]

pub mod error;
pub mod member;
pub mod partition;
pub mod protocol;

pub use error::{GridError, Result, ServerError};
pub use member::{Address, MemberInfo, MemberVersion};
pub use partition::{compute_partition_hash, partition_id_for_key, PartitionAware};
pub use protocol::{ClientMessage, ClientMessageCodec, Frame, FrameIter};

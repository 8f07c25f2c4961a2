//! The gridwire frame protocol.
//!
//! Messages are chains of frames; the first frame carries the header and
//! the fixed-size parameters, the rest carry variable-size parameters.
//! Large messages may be split into fragments on the wire.

mod client_message;
mod codec;
pub mod codecs;
pub mod constants;
mod fragment;
mod frame;
pub mod messages;

pub use client_message::{
    event_initial_frame, request_initial_frame, response_initial_frame, ClientMessage, FrameIter,
};
pub use codec::{ClientMessageCodec, DEFAULT_MAX_FRAME_LENGTH};
pub use constants::*;
pub use fragment::{split_message, FragmentAssembler};
pub use frame::Frame;

//! Value codecs for message parameters.

mod builtin;
mod custom;
pub mod fixed_size;

pub use builtin::{
    ByteArrayCodec, CodecUtil, EntryListCodec, ListIntegerCodec, ListMultiFrameCodec,
    ListUuidCodec, StringCodec, StringMapCodec,
};
pub use custom::{
    AddressCodec, ErrorHolder, ErrorHolderCodec, MemberInfoCodec, MemberVersionCodec,
};

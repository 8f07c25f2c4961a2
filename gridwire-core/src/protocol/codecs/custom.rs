//! Codecs for structured protocol types.
//!
//! Each structure is bracketed by begin/end frames and keeps its fixed-size
//! fields in a leading frame. Decoders skip trailing fields they do not know.

use super::builtin::{CodecUtil, ListMultiFrameCodec, StringCodec, StringMapCodec};
use super::fixed_size::*;
use crate::error::{GridError, Result, ServerError};
use crate::member::{Address, MemberInfo, MemberVersion};
use crate::protocol::constants::*;
use crate::protocol::{ClientMessage, Frame, FrameIter};

/// Member addresses: port in the leading frame, host as a string.
pub struct AddressCodec;

const ADDRESS_PORT_OFFSET: usize = 0;
const ADDRESS_INITIAL_FRAME_SIZE: usize = ADDRESS_PORT_OFFSET + INT_SIZE_IN_BYTES;

impl AddressCodec {
    /// Appends `address` as a nested structure.
    pub fn encode(message: &mut ClientMessage, address: &Address) {
        message.add_frame(Frame::new_begin_frame());
        let mut initial = Frame::zeroed(ADDRESS_INITIAL_FRAME_SIZE, DEFAULT_FLAGS);
        encode_int(&mut initial.content, ADDRESS_PORT_OFFSET, i32::from(address.port()));
        message.add_frame(initial);
        StringCodec::encode(message, address.host());
        message.add_frame(Frame::new_end_frame());
    }

    /// Decodes a nested address structure.
    pub fn decode(iter: &mut FrameIter<'_>) -> Result<Address> {
        CodecUtil::expect_begin(iter)?;
        let initial = iter.next_frame()?;
        let port = decode_int(&initial.content, ADDRESS_PORT_OFFSET)?;
        let port = u16::try_from(port)
            .map_err(|_| GridError::Protocol(format!("invalid port {}", port)))?;
        let host = StringCodec::decode(iter)?;
        CodecUtil::fast_forward_to_end_frame(iter)?;
        Ok(Address::new(host, port))
    }
}

/// Member versions: three bytes in the leading frame.
pub struct MemberVersionCodec;

const VERSION_MAJOR_OFFSET: usize = 0;
const VERSION_MINOR_OFFSET: usize = VERSION_MAJOR_OFFSET + BYTE_SIZE_IN_BYTES;
const VERSION_PATCH_OFFSET: usize = VERSION_MINOR_OFFSET + BYTE_SIZE_IN_BYTES;
const VERSION_INITIAL_FRAME_SIZE: usize = VERSION_PATCH_OFFSET + BYTE_SIZE_IN_BYTES;

impl MemberVersionCodec {
    /// Appends `version` as a nested structure.
    pub fn encode(message: &mut ClientMessage, version: &MemberVersion) {
        message.add_frame(Frame::new_begin_frame());
        let mut initial = Frame::zeroed(VERSION_INITIAL_FRAME_SIZE, DEFAULT_FLAGS);
        encode_byte(&mut initial.content, VERSION_MAJOR_OFFSET, version.major);
        encode_byte(&mut initial.content, VERSION_MINOR_OFFSET, version.minor);
        encode_byte(&mut initial.content, VERSION_PATCH_OFFSET, version.patch);
        message.add_frame(initial);
        message.add_frame(Frame::new_end_frame());
    }

    /// Decodes a nested version structure.
    pub fn decode(iter: &mut FrameIter<'_>) -> Result<MemberVersion> {
        CodecUtil::expect_begin(iter)?;
        let initial = iter.next_frame()?;
        let version = MemberVersion::new(
            decode_byte(&initial.content, VERSION_MAJOR_OFFSET)?,
            decode_byte(&initial.content, VERSION_MINOR_OFFSET)?,
            decode_byte(&initial.content, VERSION_PATCH_OFFSET)?,
        );
        CodecUtil::fast_forward_to_end_frame(iter)?;
        Ok(version)
    }
}

/// Member descriptors from members views.
pub struct MemberInfoCodec;

const MEMBER_UUID_OFFSET: usize = 0;
const MEMBER_LITE_OFFSET: usize = MEMBER_UUID_OFFSET + UUID_SIZE_IN_BYTES;
const MEMBER_INITIAL_FRAME_SIZE: usize = MEMBER_LITE_OFFSET + BOOLEAN_SIZE_IN_BYTES;

impl MemberInfoCodec {
    /// Appends `member` as a nested structure.
    pub fn encode(message: &mut ClientMessage, member: &MemberInfo) {
        message.add_frame(Frame::new_begin_frame());
        let mut initial = Frame::zeroed(MEMBER_INITIAL_FRAME_SIZE, DEFAULT_FLAGS);
        encode_uuid(&mut initial.content, MEMBER_UUID_OFFSET, Some(member.uuid));
        encode_bool(&mut initial.content, MEMBER_LITE_OFFSET, member.lite_member);
        message.add_frame(initial);

        AddressCodec::encode(message, &member.address);
        let mut attributes: Vec<(String, String)> = member
            .attributes
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        attributes.sort();
        StringMapCodec::encode(message, &attributes);
        MemberVersionCodec::encode(message, &member.version);
        message.add_frame(Frame::new_end_frame());
    }

    /// Decodes a nested member structure.
    pub fn decode(iter: &mut FrameIter<'_>) -> Result<MemberInfo> {
        CodecUtil::expect_begin(iter)?;
        let initial = iter.next_frame()?;
        let uuid = decode_uuid(&initial.content, MEMBER_UUID_OFFSET)?
            .ok_or_else(|| GridError::Protocol("member without uuid".to_string()))?;
        let lite_member = decode_bool(&initial.content, MEMBER_LITE_OFFSET)?;

        let address = AddressCodec::decode(iter)?;
        let attributes = StringMapCodec::decode(iter)?.into_iter().collect();
        let version = MemberVersionCodec::decode(iter)?;
        CodecUtil::fast_forward_to_end_frame(iter)?;

        Ok(MemberInfo {
            uuid,
            address,
            lite_member,
            attributes,
            version,
        })
    }
}

/// One entry of an error response's cause chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorHolder {
    /// Protocol error code.
    pub error_code: i32,
    /// Server-side exception class name.
    pub class_name: String,
    /// Optional message.
    pub message: Option<String>,
    /// Stack trace lines.
    pub stack_trace: Vec<String>,
}

impl From<ErrorHolder> for ServerError {
    fn from(holder: ErrorHolder) -> Self {
        ServerError::new(holder.error_code, holder.class_name, holder.message)
            .with_stack_trace(holder.stack_trace)
    }
}

/// Error holders carried by error responses.
pub struct ErrorHolderCodec;

const ERROR_CODE_OFFSET: usize = 0;
const ERROR_INITIAL_FRAME_SIZE: usize = ERROR_CODE_OFFSET + INT_SIZE_IN_BYTES;

impl ErrorHolderCodec {
    /// Appends `holder` as a nested structure.
    pub fn encode(message: &mut ClientMessage, holder: &ErrorHolder) {
        message.add_frame(Frame::new_begin_frame());
        let mut initial = Frame::zeroed(ERROR_INITIAL_FRAME_SIZE, DEFAULT_FLAGS);
        encode_int(&mut initial.content, ERROR_CODE_OFFSET, holder.error_code);
        message.add_frame(initial);
        StringCodec::encode(message, &holder.class_name);
        CodecUtil::encode_nullable(message, holder.message.as_deref(), StringCodec::encode);
        ListMultiFrameCodec::encode(message, &holder.stack_trace, |m, line| {
            StringCodec::encode(m, line)
        });
        message.add_frame(Frame::new_end_frame());
    }

    /// Decodes a nested error holder.
    pub fn decode(iter: &mut FrameIter<'_>) -> Result<ErrorHolder> {
        CodecUtil::expect_begin(iter)?;
        let initial = iter.next_frame()?;
        let error_code = decode_int(&initial.content, ERROR_CODE_OFFSET)?;
        let class_name = StringCodec::decode(iter)?;
        let message = CodecUtil::decode_nullable(iter, StringCodec::decode)?;
        let stack_trace = ListMultiFrameCodec::decode(iter, StringCodec::decode)?;
        CodecUtil::fast_forward_to_end_frame(iter)?;
        Ok(ErrorHolder {
            error_code,
            class_name,
            message,
            stack_trace,
        })
    }
}

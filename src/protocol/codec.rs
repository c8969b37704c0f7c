//! Packet codec for the fixed-offset wire layout
//!
//! Packets carry no framing beyond the datagram itself, so encoding is a
//! matter of writing fields at known offsets into a zero-filled buffer.

use bytes::{Bytes, BytesMut};
use thiserror::Error;

use super::{flags, packet_type, SwitcherCommand};

/// Size of acknowledgement packets and of the common header
pub const HEADER_SIZE: usize = 12;

/// Size of the hello packet
pub const HELLO_SIZE: usize = 20;

/// Size of command packets
pub const COMMAND_SIZE: usize = 24;

/// Byte offsets of the header and command fields
pub mod offset {
    pub const PACKET_TYPE: usize = 0;
    pub const LENGTH: usize = 1;
    pub const SESSION_ID: usize = 2;
    pub const ACK_TARGET: usize = 4;
    pub const FLAG: usize = 9;
    pub const SEQUENCE: usize = 10;
    pub const HELLO_FLAG: usize = 12;
    pub const COMMAND_PREFIX: usize = 13;
    pub const COMMAND_NAME: usize = 16;
    pub const COMMAND_PARAMS: usize = 21;
}

/// Codec errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Empty datagram")]
    Empty,

    #[error("Datagram too short: need {needed} bytes, got {actual}")]
    Truncated { needed: usize, actual: usize },
}

/// Allocate a zero-filled packet of `length` bytes with the header written
///
/// `length` must cover the session id field (at least 4 bytes).
pub fn encode_header(packet_type: u8, length: u8, session_id: u16) -> BytesMut {
    debug_assert!(length as usize >= offset::SESSION_ID + 2);

    let mut buf = BytesMut::zeroed(length as usize);
    buf[offset::PACKET_TYPE] = packet_type;
    buf[offset::LENGTH] = length;
    write_u16_be(&mut buf, offset::SESSION_ID, session_id);
    buf
}

/// Read a big-endian u16 at `offset`
pub fn read_u16_be(buf: &[u8], offset: usize) -> Result<u16, CodecError> {
    match buf.get(offset..offset + 2) {
        Some(bytes) => Ok(u16::from_be_bytes([bytes[0], bytes[1]])),
        None => Err(CodecError::Truncated {
            needed: offset + 2,
            actual: buf.len(),
        }),
    }
}

/// Write a big-endian u16 at `offset`
pub fn write_u16_be(buf: &mut [u8], offset: usize, value: u16) {
    buf[offset..offset + 2].copy_from_slice(&value.to_be_bytes());
}

/// Build the hello packet that opens a session
pub fn hello_packet(session_id: u16) -> Bytes {
    let mut buf = encode_header(packet_type::HELLO, HELLO_SIZE as u8, session_id);
    buf[offset::FLAG] = flags::HELLO;
    buf[offset::HELLO_FLAG] = 0x01;
    buf.freeze()
}

/// Build the reply to the switcher's answer to hello
pub fn hello_ack_packet(session_id: u16) -> Bytes {
    let mut buf = encode_header(packet_type::ACK, HEADER_SIZE as u8, session_id);
    buf[offset::FLAG] = flags::HELLO_ACK;
    buf.freeze()
}

/// Build an acknowledgement of device packet `ack_target`
pub fn ack_packet(session_id: u16, ack_target: u16, flag: u8) -> Bytes {
    let mut buf = encode_header(packet_type::ACK, HEADER_SIZE as u8, session_id);
    write_u16_be(&mut buf, offset::ACK_TARGET, ack_target);
    buf[offset::FLAG] = flag;
    buf.freeze()
}

/// Build the ack-request packet that follows every acknowledgement
pub fn echo_packet(session_id: u16, ack_target: u16, sequence: u16) -> Bytes {
    let mut buf = encode_header(packet_type::ACK_REQUEST, HEADER_SIZE as u8, session_id);
    write_u16_be(&mut buf, offset::ACK_TARGET, ack_target);
    write_u16_be(&mut buf, offset::SEQUENCE, sequence);
    buf.freeze()
}

/// Encode a command using its layout from the command table
pub fn command_packet(session_id: u16, counter: u16, command: &SwitcherCommand) -> Bytes {
    let layout = command.kind().layout();

    let mut buf = encode_header(layout.packet_type, COMMAND_SIZE as u8, session_id);
    write_u16_be(&mut buf, offset::SEQUENCE, counter);

    let prefix = offset::COMMAND_PREFIX..offset::COMMAND_PREFIX + layout.prefix.len();
    buf[prefix].copy_from_slice(&layout.prefix);

    let name = offset::COMMAND_NAME..offset::COMMAND_NAME + layout.name.len();
    buf[name].copy_from_slice(&layout.name);

    let params = command.params();
    buf[offset::COMMAND_PARAMS..offset::COMMAND_PARAMS + params.len()].copy_from_slice(&params);

    buf.freeze()
}

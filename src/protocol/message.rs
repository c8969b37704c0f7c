//! Protocol message definitions
//!
//! The switcher commands this client can issue, their fixed wire layouts,
//! and classification of inbound datagrams.

use std::fmt;

use super::{offset, read_u16_be, CodecError, HEADER_SIZE};

/// Packet type bytes (offset 0)
pub mod packet_type {
    pub const HELLO: u8 = 0x10;
    pub const DEVICE_INFO: u8 = 0x0d;
    pub const ACK: u8 = 0x80;
    /// Requests an acknowledgement; also used for preview commands
    pub const ACK_REQUEST: u8 = 0x88;
    /// Command that does not request an acknowledgement
    pub const COMMAND: u8 = 0x08;
}

/// Flag bytes (offset 9)
pub mod flags {
    pub const HELLO: u8 = 0x3f;
    pub const HELLO_ACK: u8 = 0xc3;
    pub const IDLE_ACK: u8 = 0x30;
}

/// Sequence reported in the echo that follows an idle acknowledgement
pub const IDLE_ECHO_SEQUENCE: u16 = 0x0001;

/// Human-readable name for a packet type byte
pub fn packet_type_name(packet_type: u8) -> &'static str {
    match packet_type {
        packet_type::HELLO => "hello",
        packet_type::DEVICE_INFO => "device-info",
        packet_type::ACK => "ack",
        packet_type::ACK_REQUEST => "ack-request",
        packet_type::COMMAND => "command",
        _ => "unknown",
    }
}

/// Fixed wire layout of a command packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandLayout {
    /// Packet type byte
    pub packet_type: u8,
    /// Bytes 13-15, ahead of the command name
    pub prefix: [u8; 3],
    /// Four-letter command name, bytes 16-19
    pub name: [u8; 4],
    /// Default parameters, bytes 21-23
    pub params: [u8; 3],
    /// Flag byte of our acknowledgement once the switcher confirms
    pub ack_flag: u8,
}

const CUT_LAYOUT: CommandLayout = CommandLayout {
    packet_type: packet_type::COMMAND,
    prefix: [0x0c, 0x4f, 0x03],
    name: *b"DCut",
    params: [0x30, 0x73, 0x01],
    ack_flag: 0x51,
};

const AUTO_LAYOUT: CommandLayout = CommandLayout {
    packet_type: packet_type::COMMAND,
    prefix: [0x0c, 0x4f, 0x03],
    name: *b"DAut",
    params: [0x9d, 0x0b, 0x01],
    ack_flag: 0x45,
};

const SET_PREVIEW_LAYOUT: CommandLayout = CommandLayout {
    packet_type: packet_type::ACK_REQUEST,
    prefix: [0x0c, 0x01, 0x01],
    name: *b"CPvI",
    params: [0x47, 0x00, 0x00],
    ack_flag: 0xbb,
};

/// Kinds of switcher command, keyed into the layout table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Cut,
    Auto,
    SetPreview,
}

impl CommandKind {
    /// Layout from the command table
    pub fn layout(&self) -> &'static CommandLayout {
        match self {
            CommandKind::Cut => &CUT_LAYOUT,
            CommandKind::Auto => &AUTO_LAYOUT,
            CommandKind::SetPreview => &SET_PREVIEW_LAYOUT,
        }
    }

    /// Four-letter command name as sent on the wire
    pub fn wire_name(&self) -> &'static str {
        match self {
            CommandKind::Cut => "DCut",
            CommandKind::Auto => "DAut",
            CommandKind::SetPreview => "CPvI",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandKind::Cut => write!(f, "cut"),
            CommandKind::Auto => write!(f, "auto"),
            CommandKind::SetPreview => write!(f, "set-preview"),
        }
    }
}

/// A command to send to the switcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitcherCommand {
    /// Put the preview source on program immediately
    Cut,
    /// Run the configured transition from preview to program
    Auto,
    /// Select the preview source; `input` is the raw input index
    SetPreview { input: u8 },
}

impl SwitcherCommand {
    pub fn kind(&self) -> CommandKind {
        match self {
            SwitcherCommand::Cut => CommandKind::Cut,
            SwitcherCommand::Auto => CommandKind::Auto,
            SwitcherCommand::SetPreview { .. } => CommandKind::SetPreview,
        }
    }

    /// Parameter bytes 21-23 for this command
    pub fn params(&self) -> [u8; 3] {
        let mut params = self.kind().layout().params;
        if let SwitcherCommand::SetPreview { input } = self {
            params[2] = *input;
        }
        params
    }
}

impl fmt::Display for SwitcherCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SwitcherCommand::SetPreview { input } => write!(f, "set-preview({})", input),
            other => write!(f, "{}", other.kind()),
        }
    }
}

/// Inbound datagram, classified by its first byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inbound {
    /// The switcher announces the session id it assigned
    DeviceInfo { session_id: u16 },
    /// The switcher wants an acknowledgement of `packet_id`
    AckRequest { packet_id: u16 },
    /// Anything this client does not interpret
    Other { packet_type: u8 },
}

impl Inbound {
    /// Classify a datagram, reading only the fields its type needs
    pub fn parse(datagram: &[u8]) -> Result<Self, CodecError> {
        let packet_type = *datagram.first().ok_or(CodecError::Empty)?;

        match packet_type {
            packet_type::DEVICE_INFO => Ok(Inbound::DeviceInfo {
                session_id: read_u16_be(datagram, offset::SESSION_ID)?,
            }),
            packet_type::ACK_REQUEST => {
                if datagram.len() < HEADER_SIZE {
                    return Err(CodecError::Truncated {
                        needed: HEADER_SIZE,
                        actual: datagram.len(),
                    });
                }
                Ok(Inbound::AckRequest {
                    packet_id: read_u16_be(datagram, offset::SEQUENCE)?,
                })
            }
            other => Ok(Inbound::Other { packet_type: other }),
        }
    }

    /// Packet type byte this was classified from
    pub fn packet_type(&self) -> u8 {
        match self {
            Inbound::DeviceInfo { .. } => packet_type::DEVICE_INFO,
            Inbound::AckRequest { .. } => packet_type::ACK_REQUEST,
            Inbound::Other { packet_type } => *packet_type,
        }
    }
}

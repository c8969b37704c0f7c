//! Protocol module - Defines the wire protocol spoken by the switcher
//!
//! One UDP datagram carries exactly one packet. Every packet starts with a
//! fixed header, all multi-byte fields big-endian:
//! - byte 0: packet type
//! - byte 1: total packet length
//! - bytes 2-3: session id
//! - bytes 4-5: acknowledged packet id
//! - byte 9: flag byte
//! - bytes 10-11: local counter (outbound) or device packet id (inbound)
//!
//! Command packets extend the header to 24 bytes with a command name at
//! bytes 13-19 and parameters at bytes 21-23.

mod codec;
mod message;

pub use codec::*;
pub use message::*;

/// Default UDP port of the switcher control service
pub const DEFAULT_PORT: u16 = 9910;

/// Session id sent until the switcher assigns one
pub const PLACEHOLDER_SESSION_ID: u16 = 0x1234;

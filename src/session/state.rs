//! Session state and context

use std::fmt;

use crate::protocol::{CommandKind, PLACEHOLDER_SESSION_ID};

/// Where the session is in the handshake/command cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No hello sent yet
    #[default]
    Uninitialized,
    /// Hello sent, waiting for any reply
    AwaitingHelloAck,
    /// Handshake acknowledged, waiting for the device info burst
    AwaitingDeviceInfo,
    /// Steady state; every ack request gets the idle acknowledgement
    Idle,
    AwaitingCutAck,
    AwaitingAutoAck,
    AwaitingPreviewAck,
}

impl SessionState {
    /// State that waits for confirmation of `kind`
    pub fn awaiting(kind: CommandKind) -> Self {
        match kind {
            CommandKind::Cut => SessionState::AwaitingCutAck,
            CommandKind::Auto => SessionState::AwaitingAutoAck,
            CommandKind::SetPreview => SessionState::AwaitingPreviewAck,
        }
    }

    /// Whether the handshake is complete, so commands may be issued
    pub fn accepts_commands(&self) -> bool {
        matches!(self, SessionState::Idle) || self.pending_command().is_some()
    }

    /// Command awaiting confirmation, if any
    pub fn pending_command(&self) -> Option<CommandKind> {
        match self {
            SessionState::AwaitingCutAck => Some(CommandKind::Cut),
            SessionState::AwaitingAutoAck => Some(CommandKind::Auto),
            SessionState::AwaitingPreviewAck => Some(CommandKind::SetPreview),
            _ => None,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Uninitialized => "uninitialized",
            SessionState::AwaitingHelloAck => "awaiting-hello-ack",
            SessionState::AwaitingDeviceInfo => "awaiting-device-info",
            SessionState::Idle => "idle",
            SessionState::AwaitingCutAck => "awaiting-cut-ack",
            SessionState::AwaitingAutoAck => "awaiting-auto-ack",
            SessionState::AwaitingPreviewAck => "awaiting-preview-ack",
        };
        f.write_str(name)
    }
}

/// Mutable identity of one connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionContext {
    /// Placeholder until the device info packet assigns one
    pub session_id: u16,
    /// Most recent device packet id, echoed as the ack target
    pub last_packet_id: u16,
    /// Local send counter
    pub local_counter: u16,
    pub state: SessionState,
}

impl Default for SessionContext {
    fn default() -> Self {
        Self {
            session_id: PLACEHOLDER_SESSION_ID,
            last_packet_id: 0,
            local_counter: 0,
            state: SessionState::Uninitialized,
        }
    }
}

/// Point-in-time view of a session for inspection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionSnapshot {
    pub context: SessionContext,
    /// Whether the one-shot ready notification has fired
    pub ready: bool,
}

impl SessionSnapshot {
    pub fn state(&self) -> SessionState {
        self.context.state
    }
}

impl fmt::Display for SessionSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "state={} session_id={:#06x} last_packet_id={} counter={} ready={}",
            self.context.state,
            self.context.session_id,
            self.context.last_packet_id,
            self.context.local_counter,
            self.ready
        )
    }
}

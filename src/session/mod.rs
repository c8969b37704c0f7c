//! Session module - Handshake and command state machine
//!
//! `ProtocolSession` performs no I/O. Inbound datagrams and command calls go
//! in, outbound datagrams come out; the caller owns the transport. The
//! pending state is the only thing that decides how an ack request is
//! answered, so at most one command is in flight at a time.

mod state;

pub use state::*;

use bytes::Bytes;
use thiserror::Error;

use crate::protocol::{
    ack_packet, command_packet, echo_packet, flags, hello_ack_packet, hello_packet,
    packet_type_name, CodecError, CommandKind, Inbound, SwitcherCommand, IDLE_ECHO_SEQUENCE,
    PLACEHOLDER_SESSION_ID,
};

/// Session errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Malformed datagram: {0}")]
    Malformed(#[from] CodecError),

    #[error("Session not started; send hello first")]
    NotStarted,

    #[error("Handshake incomplete (state {0})")]
    HandshakeIncomplete(SessionState),
}

pub type SessionResult<T> = Result<T, SessionError>;

/// What handling an inbound datagram produced
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reaction {
    /// Datagrams to send, in order
    pub replies: Vec<Bytes>,
    /// Set the first time the session acknowledges from `Idle`
    pub became_ready: bool,
    /// Command the switcher just confirmed
    pub acknowledged: Option<CommandKind>,
}

/// Result of feeding one inbound datagram to the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Handled(Reaction),
    /// The datagram has no meaning in the current state
    Ignored { state: SessionState, packet_type: u8 },
}

/// Protocol state machine for one switcher connection
#[derive(Debug, Default)]
pub struct ProtocolSession {
    context: SessionContext,
    ready: bool,
}

impl ProtocolSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Session resuming from `context`
    #[cfg(test)]
    pub(crate) fn with_context(context: SessionContext) -> Self {
        Self {
            context,
            ready: false,
        }
    }

    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    pub fn state(&self) -> SessionState {
        self.context.state
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            context: self.context,
            ready: self.is_ready(),
        }
    }

    /// Start (or restart) the handshake
    pub fn hello(&mut self) -> Bytes {
        self.context.session_id = PLACEHOLDER_SESSION_ID;
        self.context.local_counter = 0;
        self.context.state = SessionState::AwaitingHelloAck;

        tracing::debug!("Sending hello");
        hello_packet(self.context.session_id)
    }

    pub fn cut(&mut self) -> SessionResult<Bytes> {
        self.issue(SwitcherCommand::Cut)
    }

    pub fn auto(&mut self) -> SessionResult<Bytes> {
        self.issue(SwitcherCommand::Auto)
    }

    pub fn set_preview(&mut self, input: u8) -> SessionResult<Bytes> {
        self.issue(SwitcherCommand::SetPreview { input })
    }

    /// Encode `command` and wait for its confirmation
    ///
    /// Refused until the handshake reaches `Idle`. A command issued while
    /// another is pending replaces it.
    pub fn issue(&mut self, command: SwitcherCommand) -> SessionResult<Bytes> {
        match self.context.state {
            SessionState::Uninitialized => return Err(SessionError::NotStarted),
            state if !state.accepts_commands() => {
                return Err(SessionError::HandshakeIncomplete(state))
            }
            _ => {}
        }

        if let Some(pending) = self.context.state.pending_command() {
            tracing::debug!("{} replaces unconfirmed {}", command, pending);
        }

        self.context.local_counter = self.context.local_counter.wrapping_add(1);
        self.context.state = SessionState::awaiting(command.kind());

        tracing::debug!(
            "Sending {} (counter {})",
            command,
            self.context.local_counter
        );

        Ok(command_packet(
            self.context.session_id,
            self.context.local_counter,
            &command,
        ))
    }

    /// Feed one inbound datagram through the state machine
    ///
    /// Malformed datagrams are rejected without touching the context.
    pub fn handle_datagram(&mut self, datagram: &[u8]) -> SessionResult<Outcome> {
        if datagram.is_empty() {
            return Err(CodecError::Empty.into());
        }

        let parsed = Inbound::parse(datagram);
        if let Ok(Inbound::AckRequest { packet_id }) = parsed {
            self.context.last_packet_id = packet_id;
        }

        // The switcher's first answer is acknowledged whatever it contains.
        if self.context.state == SessionState::AwaitingHelloAck {
            return Ok(Outcome::Handled(self.acknowledge_hello()));
        }

        let inbound = parsed?;
        let state = self.context.state;

        let reaction = match (state, inbound) {
            (SessionState::AwaitingDeviceInfo, Inbound::DeviceInfo { session_id }) => {
                tracing::info!("Switcher assigned session id {:#06x}", session_id);
                self.context.session_id = session_id;
                Reaction::default()
            }
            (SessionState::AwaitingDeviceInfo, Inbound::AckRequest { .. }) => {
                self.acknowledge_idle()
            }
            (SessionState::Idle, Inbound::AckRequest { .. }) => {
                let mut reaction = self.acknowledge_idle();
                if !self.ready {
                    self.ready = true;
                    reaction.became_ready = true;
                }
                reaction
            }
            (state, Inbound::AckRequest { .. }) => match state.pending_command() {
                Some(kind) => self.acknowledge_command(kind),
                None => return Ok(ignore(datagram, state, inbound)),
            },
            (state, inbound) => return Ok(ignore(datagram, state, inbound)),
        };

        Ok(Outcome::Handled(reaction))
    }

    fn acknowledge_hello(&mut self) -> Reaction {
        self.context.state = SessionState::AwaitingDeviceInfo;
        self.context.local_counter = 1;

        Reaction {
            replies: vec![hello_ack_packet(self.context.session_id)],
            ..Default::default()
        }
    }

    fn acknowledge_idle(&mut self) -> Reaction {
        let ctx = &mut self.context;
        ctx.state = SessionState::Idle;

        Reaction {
            replies: vec![
                ack_packet(ctx.session_id, ctx.last_packet_id, flags::IDLE_ACK),
                echo_packet(ctx.session_id, ctx.last_packet_id, IDLE_ECHO_SEQUENCE),
            ],
            ..Default::default()
        }
    }

    fn acknowledge_command(&mut self, kind: CommandKind) -> Reaction {
        let ctx = &mut self.context;
        ctx.state = SessionState::Idle;

        let ack = ack_packet(ctx.session_id, ctx.last_packet_id, kind.layout().ack_flag);
        ctx.local_counter = ctx.local_counter.wrapping_add(1);
        let echo = echo_packet(ctx.session_id, ctx.last_packet_id, ctx.local_counter);

        tracing::debug!("Switcher confirmed {} (counter {})", kind, ctx.local_counter);

        Reaction {
            replies: vec![ack, echo],
            acknowledged: Some(kind),
            ..Default::default()
        }
    }
}

fn ignore(datagram: &[u8], state: SessionState, inbound: Inbound) -> Outcome {
    let packet_type = inbound.packet_type();
    tracing::debug!(
        "Received {} bytes in state {}, type: {:#04x} ({})",
        datagram.len(),
        state,
        packet_type,
        packet_type_name(packet_type)
    );
    Outcome::Ignored { state, packet_type }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ack_request(packet_id: u16) -> Vec<u8> {
        let mut datagram = vec![0u8; 20];
        datagram[0] = 0x88;
        datagram[1] = 20;
        datagram[10..12].copy_from_slice(&packet_id.to_be_bytes());
        datagram
    }

    fn device_info(session_id: u16) -> Vec<u8> {
        let mut datagram = vec![0u8; 20];
        datagram[0] = 0x0d;
        datagram[1] = 20;
        datagram[2..4].copy_from_slice(&session_id.to_be_bytes());
        datagram
    }

    fn replies(outcome: Outcome) -> Vec<Bytes> {
        match outcome {
            Outcome::Handled(reaction) => reaction.replies,
            other => panic!("Expected handled outcome, got {:?}", other),
        }
    }

    /// Session that has completed the handshake with session id 0x5678
    fn idle_session() -> ProtocolSession {
        let mut session = ProtocolSession::new();
        session.hello();
        session.handle_datagram(&[0x10, 0x14]).unwrap();
        session.handle_datagram(&device_info(0x5678)).unwrap();
        session.handle_datagram(&ack_request(1)).unwrap();
        assert_eq!(session.state(), SessionState::Idle);
        session
    }

    #[test]
    fn test_hello_resets_context() {
        let mut session = idle_session();
        session.cut().unwrap();

        let packet = session.hello();
        assert_eq!(
            &packet[..],
            &[0x10, 0x14, 0x12, 0x34, 0, 0, 0, 0, 0, 0x3F, 0, 0, 0x01, 0, 0, 0, 0, 0, 0, 0]
        );
        assert_eq!(session.context().session_id, 0x1234);
        assert_eq!(session.context().local_counter, 0);
        assert_eq!(session.state(), SessionState::AwaitingHelloAck);
    }

    #[test]
    fn test_any_reply_acknowledges_hello() {
        let mut session = ProtocolSession::new();
        session.hello();

        let sent = replies(session.handle_datagram(&[0x42, 0x01, 0x02]).unwrap());
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].len(), 12);
        assert_eq!(sent[0][0], 0x80);
        assert_eq!(sent[0][9], 0xC3);
        assert_eq!(session.state(), SessionState::AwaitingDeviceInfo);
        assert_eq!(session.context().local_counter, 1);
    }

    #[test]
    fn test_device_info_assigns_session_id() {
        let mut session = ProtocolSession::new();
        session.hello();
        session.handle_datagram(&[0x10]).unwrap();

        let sent = replies(session.handle_datagram(&device_info(0x5678)).unwrap());
        assert!(sent.is_empty());
        assert_eq!(session.context().session_id, 0x5678);
        assert_eq!(session.state(), SessionState::AwaitingDeviceInfo);

        let sent = replies(session.handle_datagram(&ack_request(0x0003)).unwrap());
        assert_eq!(
            &sent[0][..],
            &[0x80, 0x0C, 0x56, 0x78, 0x00, 0x03, 0, 0, 0, 0x30, 0, 0]
        );
        assert_eq!(
            &sent[1][..],
            &[0x88, 0x0C, 0x56, 0x78, 0x00, 0x03, 0, 0, 0, 0, 0x00, 0x01]
        );
        assert_eq!(session.state(), SessionState::Idle);
        assert!(!session.is_ready());
    }

    #[test]
    fn test_ready_fires_once() {
        let mut session = idle_session();

        let first = session.handle_datagram(&ack_request(2)).unwrap();
        let second = session.handle_datagram(&ack_request(3)).unwrap();

        match (first, second) {
            (Outcome::Handled(first), Outcome::Handled(second)) => {
                assert!(first.became_ready);
                assert!(!second.became_ready);
                assert_eq!(second.replies.len(), 2);
            }
            other => panic!("Unexpected outcomes {:?}", other),
        }
        assert!(session.is_ready());
        assert_eq!(session.context().last_packet_id, 3);
    }

    #[test]
    fn test_set_preview_cycle() {
        let mut session = idle_session();
        let before = session.context().local_counter;

        let command = session.set_preview(3).unwrap();
        assert_eq!(command[0], 0x88);
        assert_eq!(command[23], 3);
        assert_eq!(session.state(), SessionState::AwaitingPreviewAck);

        let outcome = session.handle_datagram(&ack_request(0x0005)).unwrap();
        let reaction = match outcome {
            Outcome::Handled(reaction) => reaction,
            other => panic!("Unexpected outcome {:?}", other),
        };

        assert_eq!(reaction.acknowledged, Some(CommandKind::SetPreview));
        let ack = &reaction.replies[0];
        assert_eq!(ack[0], 0x80);
        assert_eq!(ack[9], 0xBB);
        assert_eq!(&ack[4..6], &[0x00, 0x05]);

        let echo = &reaction.replies[1];
        let counter = session.context().local_counter;
        assert_eq!(echo[0], 0x88);
        assert_eq!(&echo[4..6], &[0x00, 0x05]);
        assert_eq!(&echo[10..12], &counter.to_be_bytes());
        assert_eq!(counter, before + 2);
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[test]
    fn test_cut_and_auto_cycles() {
        let mut session = idle_session();

        for (kind, flag) in [(CommandKind::Cut, 0x51), (CommandKind::Auto, 0x45)] {
            let before = session.context().local_counter;
            let command = match kind {
                CommandKind::Cut => session.cut().unwrap(),
                _ => session.auto().unwrap(),
            };
            assert_eq!(command[0], 0x08);
            assert_eq!(&command[10..12], &(before + 1).to_be_bytes());
            assert_eq!(session.state(), SessionState::awaiting(kind));

            let sent = replies(session.handle_datagram(&ack_request(9)).unwrap());
            assert_eq!(sent[0][9], flag);
            assert_eq!(session.context().local_counter, before + 2);
            assert_eq!(session.state(), SessionState::Idle);
        }
    }

    #[test]
    fn test_outbound_packets_carry_session_id() {
        let mut session = idle_session();
        let command = session.auto().unwrap();
        assert_eq!(&command[2..4], &[0x56, 0x78]);
    }

    #[test]
    fn test_short_ack_request_is_discarded() {
        let mut session = idle_session();
        session.cut().unwrap();
        let before = *session.context();

        let result = session.handle_datagram(&[0x88, 0x0C, 0, 0, 0, 0]);
        assert_eq!(
            result,
            Err(SessionError::Malformed(CodecError::Truncated {
                needed: 12,
                actual: 6
            }))
        );
        assert_eq!(*session.context(), before);
    }

    #[test]
    fn test_empty_datagram_is_discarded() {
        let mut session = ProtocolSession::new();
        session.hello();

        assert_eq!(
            session.handle_datagram(&[]),
            Err(SessionError::Malformed(CodecError::Empty))
        );
        assert_eq!(session.state(), SessionState::AwaitingHelloAck);
    }

    #[test]
    fn test_device_info_ignored_outside_handshake() {
        let mut session = idle_session();

        let outcome = session.handle_datagram(&device_info(0x9999)).unwrap();
        assert_eq!(
            outcome,
            Outcome::Ignored {
                state: SessionState::Idle,
                packet_type: 0x0d
            }
        );
        assert_eq!(session.context().session_id, 0x5678);
    }

    #[test]
    fn test_commands_require_hello() {
        let mut session = ProtocolSession::new();
        assert_eq!(session.cut(), Err(SessionError::NotStarted));
        assert_eq!(session.set_preview(1), Err(SessionError::NotStarted));

        let outcome = session.handle_datagram(&ack_request(4)).unwrap();
        assert!(matches!(outcome, Outcome::Ignored { .. }));
        assert_eq!(session.state(), SessionState::Uninitialized);
        assert_eq!(session.context().last_packet_id, 4);
        assert_eq!(session.context().local_counter, 0);
    }

    #[test]
    fn test_commands_wait_for_handshake() {
        let mut session = ProtocolSession::new();
        session.hello();
        assert_eq!(
            session.cut(),
            Err(SessionError::HandshakeIncomplete(SessionState::AwaitingHelloAck))
        );

        // The refused cut must not short-circuit the handshake
        let sent = replies(session.handle_datagram(&ack_request(1)).unwrap());
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0][9], 0xC3);
        assert_eq!(session.state(), SessionState::AwaitingDeviceInfo);
        assert_eq!(session.context().local_counter, 1);

        assert_eq!(
            session.auto(),
            Err(SessionError::HandshakeIncomplete(SessionState::AwaitingDeviceInfo))
        );
        session.handle_datagram(&ack_request(2)).unwrap();
        assert_eq!(session.state(), SessionState::Idle);
        assert!(session.cut().is_ok());
    }

    #[test]
    fn test_pending_command_can_be_replaced() {
        let mut session = idle_session();
        session.cut().unwrap();
        session.set_preview(2).unwrap();
        assert_eq!(session.state(), SessionState::AwaitingPreviewAck);

        let sent = replies(session.handle_datagram(&ack_request(7)).unwrap());
        assert_eq!(sent[0][9], 0xBB);
    }

    #[test]
    fn test_counter_wraps() {
        let mut session = ProtocolSession::with_context(SessionContext {
            session_id: 0x5678,
            last_packet_id: 0,
            local_counter: 0xFFFF,
            state: SessionState::Idle,
        });

        let command = session.cut().unwrap();
        assert_eq!(&command[10..12], &[0x00, 0x00]);

        let sent = replies(session.handle_datagram(&ack_request(0x0042)).unwrap());
        assert_eq!(sent[0][9], 0x51);
        assert_eq!(&sent[1][10..12], &[0x00, 0x01]);
        assert_eq!(session.context().local_counter, 0x0001);

        session.context.local_counter = 0xFFFF;
        session.auto().unwrap();
        let sent = replies(session.handle_datagram(&ack_request(0x0043)).unwrap());
        assert_eq!(sent[0][9], 0x45);
        assert_eq!(&sent[1][10..12], &[0x00, 0x01]);
        assert_eq!(session.context().local_counter, 0x0001);
    }

    #[test]
    fn test_non_ack_request_leaves_packet_id() {
        let mut session = idle_session();
        session.handle_datagram(&ack_request(0x0102)).unwrap();

        session.handle_datagram(&[0x42, 0x0C, 0, 0, 0, 0, 0, 0, 0, 0, 0xFF, 0xFF]).unwrap();
        assert_eq!(session.context().last_packet_id, 0x0102);
    }
}

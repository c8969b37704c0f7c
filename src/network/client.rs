//! Switcher client
//!
//! Binds a transport to a `ProtocolSession`. A reader task forwards each
//! received datagram into the session queue, which the application command
//! API feeds as well; the session task drains that queue and is the only
//! code that touches session state.

use bytes::Bytes;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;

use super::transport::{Transport, TransportError};
use super::NetworkConfig;
use crate::protocol::{CommandKind, SwitcherCommand};
use crate::session::{Outcome, ProtocolSession, SessionResult, SessionSnapshot, SessionState};

/// Client errors
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Already connected")]
    AlreadyConnected,

    #[error("Not connected")]
    NotConnected,

    #[error("Session queue closed")]
    ChannelClosed,
}

pub type ClientResult<T> = Result<T, ClientError>;

/// Events emitted by the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// The session task is running
    Connected,
    /// The session moved between states
    StateChanged {
        from: SessionState,
        to: SessionState,
    },
    /// First acknowledgement from `Idle`; fired once per connection
    Ready {
        session_id: u16,
    },
    /// The switcher confirmed a command
    CommandAcknowledged {
        command: CommandKind,
        counter: u16,
    },
    /// A datagram could not be read and was dropped
    DatagramDiscarded {
        reason: String,
    },
    /// A datagram had no meaning in the current state
    Unrecognized {
        state: SessionState,
        packet_type: u8,
        length: usize,
    },
    /// The session task stopped
    Disconnected {
        reason: String,
    },
}

/// Client state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Disconnected,
    Connected,
}

/// Inputs drained by the session task
#[derive(Debug)]
enum SessionInput {
    Datagram(Bytes),
    Hello,
    Command(SwitcherCommand),
    Disconnect,
}

/// Client for one switcher
pub struct SwitcherClient {
    /// Client configuration
    config: NetworkConfig,
    /// Current state
    state: Arc<RwLock<ClientState>>,
    /// Session view, refreshed after every input
    snapshot: Arc<RwLock<SessionSnapshot>>,
    /// Event sender
    event_tx: mpsc::Sender<ClientEvent>,
    /// Event receiver (for consumers)
    event_rx: Option<mpsc::Receiver<ClientEvent>>,
    /// Session queue, present while connected
    inbox: Arc<RwLock<Option<mpsc::Sender<SessionInput>>>>,
}

impl SwitcherClient {
    /// Create a new client
    pub fn new(config: NetworkConfig) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);

        Self {
            config,
            state: Arc::new(RwLock::new(ClientState::Disconnected)),
            snapshot: Arc::new(RwLock::new(SessionSnapshot::default())),
            event_tx,
            event_rx: Some(event_rx),
            inbox: Arc::new(RwLock::new(None)),
        }
    }

    /// Take the event receiver (can only be called once)
    pub fn take_event_receiver(&mut self) -> Option<mpsc::Receiver<ClientEvent>> {
        self.event_rx.take()
    }

    /// Bind `transport` to a fresh session and start receiving
    pub async fn connect<T: Transport>(&self, transport: T) -> ClientResult<()> {
        // Held until the session is registered
        let mut state = self.state.write().await;
        if *state != ClientState::Disconnected {
            return Err(ClientError::AlreadyConnected);
        }

        let transport = Arc::new(transport);
        let (inbox_tx, inbox_rx) = mpsc::channel(self.config.queue_depth);

        let reader = tokio::spawn(receive_loop(transport.clone(), inbox_tx.clone()));

        {
            let mut inbox = self.inbox.write().await;
            *inbox = Some(inbox_tx);
        }

        {
            let mut snapshot = self.snapshot.write().await;
            *snapshot = SessionSnapshot::default();
        }

        *state = ClientState::Connected;
        drop(state);

        emit(&self.event_tx, ClientEvent::Connected);

        let shared = Shared {
            state: self.state.clone(),
            snapshot: self.snapshot.clone(),
            inbox: self.inbox.clone(),
            event_tx: self.event_tx.clone(),
        };
        tokio::spawn(run_session(transport, inbox_rx, reader, shared));

        Ok(())
    }

    /// Start the handshake
    pub async fn hello(&self) -> ClientResult<()> {
        self.submit(SessionInput::Hello).await
    }

    pub async fn cut(&self) -> ClientResult<()> {
        self.command(SwitcherCommand::Cut).await
    }

    pub async fn auto(&self) -> ClientResult<()> {
        self.command(SwitcherCommand::Auto).await
    }

    /// Select the preview input; `input` is not range checked
    pub async fn set_preview(&self, input: u8) -> ClientResult<()> {
        self.command(SwitcherCommand::SetPreview { input }).await
    }

    /// Queue a command; returns once queued, not once confirmed
    pub async fn command(&self, command: SwitcherCommand) -> ClientResult<()> {
        self.submit(SessionInput::Command(command)).await
    }

    /// Stop the session and close the transport
    pub async fn disconnect(&self) -> ClientResult<()> {
        self.submit(SessionInput::Disconnect).await
    }

    /// Get the current state
    pub async fn state(&self) -> ClientState {
        *self.state.read().await
    }

    /// Check if connected
    pub async fn is_connected(&self) -> bool {
        self.state().await == ClientState::Connected
    }

    /// Latest view of the session
    pub async fn snapshot(&self) -> SessionSnapshot {
        *self.snapshot.read().await
    }

    pub async fn is_ready(&self) -> bool {
        self.snapshot.read().await.ready
    }

    async fn submit(&self, input: SessionInput) -> ClientResult<()> {
        let tx = self
            .inbox
            .read()
            .await
            .clone()
            .ok_or(ClientError::NotConnected)?;

        tx.send(input).await.map_err(|_| ClientError::ChannelClosed)
    }
}

/// Handles shared between the client and its session task
struct Shared {
    state: Arc<RwLock<ClientState>>,
    snapshot: Arc<RwLock<SessionSnapshot>>,
    inbox: Arc<RwLock<Option<mpsc::Sender<SessionInput>>>>,
    event_tx: mpsc::Sender<ClientEvent>,
}

/// Publish an event without ever blocking the session task
fn emit(event_tx: &mpsc::Sender<ClientEvent>, event: ClientEvent) {
    if let Err(e) = event_tx.try_send(event) {
        tracing::debug!("Dropping client event: {}", e);
    }
}

/// Keep exactly one receive pending and forward each datagram
async fn receive_loop<T: Transport>(transport: Arc<T>, inbox: mpsc::Sender<SessionInput>) {
    loop {
        match transport.recv().await {
            Ok(datagram) => {
                if inbox.send(SessionInput::Datagram(datagram)).await.is_err() {
                    break;
                }
            }
            Err(TransportError::Closed) => break,
            Err(e) => {
                tracing::warn!("Receive error: {}", e);
            }
        }
    }
    tracing::debug!("Receive loop stopped");
}

/// Drain the session queue until disconnect
async fn run_session<T: Transport>(
    transport: Arc<T>,
    mut inbox: mpsc::Receiver<SessionInput>,
    reader: JoinHandle<()>,
    shared: Shared,
) {
    let mut session = ProtocolSession::new();

    let disconnect_reason = loop {
        let Some(input) = inbox.recv().await else {
            break "Session queue closed".to_string();
        };

        let before = session.state();
        let mut events = Vec::new();
        let outbound = match input {
            SessionInput::Datagram(datagram) => handle_datagram(&mut session, &datagram, &mut events),
            SessionInput::Hello => vec![session.hello()],
            SessionInput::Command(command) => match issue(&mut session, command) {
                Ok(packet) => vec![packet],
                Err(e) => {
                    tracing::warn!("Cannot send {}: {}", command, e);
                    Vec::new()
                }
            },
            SessionInput::Disconnect => break "Disconnect requested".to_string(),
        };

        for datagram in outbound {
            if let Err(e) = transport.send(&datagram).await {
                tracing::warn!("Send error: {}", e);
            }
        }

        let after = session.state();
        if after != before {
            tracing::debug!("Session state {} -> {}", before, after);
            events.insert(
                0,
                ClientEvent::StateChanged {
                    from: before,
                    to: after,
                },
            );
        }

        {
            let mut snapshot = shared.snapshot.write().await;
            *snapshot = session.snapshot();
        }

        for event in events {
            emit(&shared.event_tx, event);
        }
    };

    // Clean up
    inbox.close();
    reader.abort();

    if let Err(e) = transport.close().await {
        tracing::warn!("Error closing transport: {}", e);
    }

    {
        let mut inbox = shared.inbox.write().await;
        *inbox = None;
    }

    {
        let mut snapshot = shared.snapshot.write().await;
        snapshot.ready = false;
    }

    {
        let mut state = shared.state.write().await;
        *state = ClientState::Disconnected;
    }

    tracing::info!("Session stopped: {}", disconnect_reason);
    emit(
        &shared.event_tx,
        ClientEvent::Disconnected {
            reason: disconnect_reason,
        },
    );
}

fn issue(session: &mut ProtocolSession, command: SwitcherCommand) -> SessionResult<Bytes> {
    match command {
        SwitcherCommand::Cut => session.cut(),
        SwitcherCommand::Auto => session.auto(),
        SwitcherCommand::SetPreview { input } => session.set_preview(input),
    }
}

/// Run one datagram through the session, collecting the events it raises
fn handle_datagram(
    session: &mut ProtocolSession,
    datagram: &[u8],
    events: &mut Vec<ClientEvent>,
) -> Vec<Bytes> {
    match session.handle_datagram(datagram) {
        Ok(Outcome::Handled(reaction)) => {
            if let Some(command) = reaction.acknowledged {
                events.push(ClientEvent::CommandAcknowledged {
                    command,
                    counter: session.context().local_counter,
                });
            }

            if reaction.became_ready {
                let session_id = session.context().session_id;
                tracing::info!("Switcher ready (session {:#06x})", session_id);
                events.push(ClientEvent::Ready { session_id });
            }

            reaction.replies
        }
        Ok(Outcome::Ignored { state, packet_type }) => {
            events.push(ClientEvent::Unrecognized {
                state,
                packet_type,
                length: datagram.len(),
            });
            Vec::new()
        }
        Err(e) => {
            tracing::warn!("Discarding datagram in state {}: {}", session.state(), e);
            events.push(ClientEvent::DatagramDiscarded {
                reason: e.to_string(),
            });
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::transport::memory::{self, DeviceEnd};
    use std::time::Duration;
    use tokio_test::assert_ok;

    const WAIT: Duration = Duration::from_secs(2);

    fn ack_request(packet_id: u16) -> Bytes {
        let mut datagram = vec![0u8; 16];
        datagram[0] = 0x88;
        datagram[1] = 16;
        datagram[10..12].copy_from_slice(&packet_id.to_be_bytes());
        Bytes::from(datagram)
    }

    async fn next_sent(device: &mut DeviceEnd) -> Bytes {
        tokio::time::timeout(WAIT, device.from_client.recv())
            .await
            .expect("timed out waiting for datagram")
            .expect("client transport dropped")
    }

    async fn wait_for<F>(events: &mut mpsc::Receiver<ClientEvent>, mut matches: F) -> ClientEvent
    where
        F: FnMut(&ClientEvent) -> bool,
    {
        loop {
            let event = tokio::time::timeout(WAIT, events.recv())
                .await
                .expect("timed out waiting for event")
                .expect("event channel closed");
            if matches(&event) {
                return event;
            }
        }
    }

    /// Connect a client over a memory transport and run the handshake
    async fn ready_client() -> (SwitcherClient, mpsc::Receiver<ClientEvent>, DeviceEnd) {
        let (transport, mut device) = memory::pair();
        let mut client = SwitcherClient::new(NetworkConfig::default());
        let mut events = client.take_event_receiver().unwrap();

        assert_ok!(client.connect(transport).await);
        assert_ok!(client.hello().await);
        assert_eq!(next_sent(&mut device).await[0], 0x10);

        device.to_client.send(Bytes::from_static(&[0x10, 0x14, 0x00])).await.unwrap();
        let hello_ack = next_sent(&mut device).await;
        assert_eq!(hello_ack[0], 0x80);
        assert_eq!(hello_ack[9], 0xC3);

        let mut info = vec![0u8; 20];
        info[0] = 0x0d;
        info[2..4].copy_from_slice(&[0x56, 0x78]);
        device.to_client.send(Bytes::from(info)).await.unwrap();

        device.to_client.send(ack_request(1)).await.unwrap();
        let ack = next_sent(&mut device).await;
        assert_eq!(&ack[2..4], &[0x56, 0x78]);
        assert_eq!(ack[9], 0x30);
        next_sent(&mut device).await;

        device.to_client.send(ack_request(2)).await.unwrap();
        next_sent(&mut device).await;
        next_sent(&mut device).await;

        let ready = wait_for(&mut events, |e| matches!(e, ClientEvent::Ready { .. })).await;
        assert_eq!(ready, ClientEvent::Ready { session_id: 0x5678 });

        (client, events, device)
    }

    #[tokio::test]
    async fn test_client_creation() {
        let client = SwitcherClient::new(NetworkConfig::default());
        assert!(!client.is_connected().await);
        assert!(matches!(client.cut().await, Err(ClientError::NotConnected)));
    }

    #[tokio::test]
    async fn test_handshake_reaches_ready() {
        let (client, _events, _device) = ready_client().await;

        let snapshot = client.snapshot().await;
        assert_eq!(snapshot.state(), SessionState::Idle);
        assert_eq!(snapshot.context.session_id, 0x5678);
        assert_eq!(snapshot.context.last_packet_id, 2);
        assert!(client.is_ready().await);
    }

    #[tokio::test]
    async fn test_set_preview_roundtrip() {
        let (client, mut events, mut device) = ready_client().await;
        let before = client.snapshot().await.context.local_counter;

        assert_ok!(client.set_preview(3).await);
        let command = next_sent(&mut device).await;
        assert_eq!(command.len(), 24);
        assert_eq!(&command[16..20], b"CPvI");
        assert_eq!(command[23], 3);

        device.to_client.send(ack_request(5)).await.unwrap();
        let ack = next_sent(&mut device).await;
        assert_eq!(ack[9], 0xBB);
        assert_eq!(&ack[4..6], &[0x00, 0x05]);

        let echo = next_sent(&mut device).await;
        assert_eq!(&echo[10..12], &(before + 2).to_be_bytes());

        let acknowledged = wait_for(&mut events, |e| {
            matches!(e, ClientEvent::CommandAcknowledged { .. })
        })
        .await;
        assert_eq!(
            acknowledged,
            ClientEvent::CommandAcknowledged {
                command: CommandKind::SetPreview,
                counter: before + 2,
            }
        );
    }

    #[tokio::test]
    async fn test_malformed_datagram_reported() {
        let (client, mut events, device) = ready_client().await;

        device.to_client.send(Bytes::from_static(&[0x88, 0x0C, 0x00])).await.unwrap();
        let event = wait_for(&mut events, |e| {
            matches!(e, ClientEvent::DatagramDiscarded { .. })
        })
        .await;
        assert!(matches!(event, ClientEvent::DatagramDiscarded { .. }));
        assert_eq!(client.snapshot().await.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_disconnect() {
        let (client, mut events, _device) = ready_client().await;

        assert_ok!(client.disconnect().await);
        wait_for(&mut events, |e| matches!(e, ClientEvent::Disconnected { .. })).await;

        assert_eq!(client.state().await, ClientState::Disconnected);
        assert!(!client.is_ready().await);
        assert!(matches!(client.auto().await, Err(ClientError::NotConnected)));
    }

    #[tokio::test]
    async fn test_concurrent_connects_start_one_session() {
        let (first, _device_a) = memory::pair();
        let (second, _device_b) = memory::pair();
        let mut client = SwitcherClient::new(NetworkConfig::default());
        let mut events = client.take_event_receiver().unwrap();

        let (a, b) = tokio::join!(client.connect(first), client.connect(second));
        assert_eq!(a.is_ok() as u8 + b.is_ok() as u8, 1);
        assert!(matches!(
            a.err().or(b.err()),
            Some(ClientError::AlreadyConnected)
        ));

        wait_for(&mut events, |e| matches!(e, ClientEvent::Connected)).await;
        assert!(tokio::time::timeout(Duration::from_millis(50), events.recv())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_command_during_handshake_is_not_sent() {
        let (transport, mut device) = memory::pair();
        let mut client = SwitcherClient::new(NetworkConfig::default());
        let mut events = client.take_event_receiver().unwrap();

        assert_ok!(client.connect(transport).await);
        assert_ok!(client.hello().await);
        assert_ok!(client.cut().await);
        assert_eq!(next_sent(&mut device).await[0], 0x10);

        device.to_client.send(ack_request(1)).await.unwrap();
        let hello_ack = next_sent(&mut device).await;
        assert_eq!(hello_ack[9], 0xC3);

        wait_for(&mut events, |e| {
            matches!(
                e,
                ClientEvent::StateChanged {
                    to: SessionState::AwaitingDeviceInfo,
                    ..
                }
            )
        })
        .await;
        assert!(device.from_client.try_recv().is_err());
        assert_eq!(
            client.snapshot().await.state(),
            SessionState::AwaitingDeviceInfo
        );
    }

    #[tokio::test]
    async fn test_connect_twice_fails() {
        let (first, _device_a) = memory::pair();
        let (second, _device_b) = memory::pair();
        let client = SwitcherClient::new(NetworkConfig::default());

        assert_ok!(client.connect(first).await);
        assert!(matches!(
            client.connect(second).await,
            Err(ClientError::AlreadyConnected)
        ));
    }
}

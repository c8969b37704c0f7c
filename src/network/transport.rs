//! Datagram transports
//!
//! The session only needs to send a datagram, receive the next one, and
//! close. Each embedding environment supplies an implementation.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::Notify;

use super::NetworkConfig;

/// Transport errors
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Transport closed")]
    Closed,
}

pub type TransportResult<T> = Result<T, TransportError>;

/// Send/receive capability for whole datagrams
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Send one datagram
    async fn send(&self, datagram: &[u8]) -> TransportResult<()>;

    /// Wait for the next datagram
    ///
    /// Returns `TransportError::Closed` once the transport is closed.
    async fn recv(&self) -> TransportResult<Bytes>;

    /// Close the transport, waking any pending `recv`
    async fn close(&self) -> TransportResult<()>;
}

/// UDP socket connected to a single switcher
pub struct UdpTransport {
    socket: UdpSocket,
    remote_addr: SocketAddr,
    max_datagram_size: usize,
    closed: AtomicBool,
    shutdown: Notify,
}

impl UdpTransport {
    /// Bind a local socket and connect it to `remote_addr`
    pub async fn open(remote_addr: SocketAddr, config: &NetworkConfig) -> TransportResult<Self> {
        let bind_addr = match &config.bind_address {
            Some(addr) => addr.clone(),
            None if remote_addr.is_ipv4() => "0.0.0.0:0".to_string(),
            None => "[::]:0".to_string(),
        };

        let socket = UdpSocket::bind(&bind_addr).await?;
        socket.connect(remote_addr).await?;

        tracing::info!(
            "UDP transport open: {} -> {}",
            socket.local_addr()?,
            remote_addr
        );

        Ok(Self {
            socket,
            remote_addr,
            max_datagram_size: config.max_datagram_size,
            closed: AtomicBool::new(false),
            shutdown: Notify::new(),
        })
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    pub fn local_addr(&self) -> TransportResult<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn send(&self, datagram: &[u8]) -> TransportResult<()> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }

        self.socket.send(datagram).await?;
        tracing::trace!("Sent {} bytes to {}", datagram.len(), self.remote_addr);
        Ok(())
    }

    async fn recv(&self) -> TransportResult<Bytes> {
        let shutdown = self.shutdown.notified();
        tokio::pin!(shutdown);
        shutdown.as_mut().enable();

        if self.is_closed() {
            return Err(TransportError::Closed);
        }

        let mut buf = BytesMut::zeroed(self.max_datagram_size);
        let len = tokio::select! {
            result = self.socket.recv(&mut buf) => result?,
            _ = &mut shutdown => return Err(TransportError::Closed),
        };

        buf.truncate(len);
        tracing::trace!("Received {} bytes from {}", len, self.remote_addr);
        Ok(buf.freeze())
    }

    async fn close(&self) -> TransportResult<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.shutdown.notify_waiters();
            tracing::info!("UDP transport to {} closed", self.remote_addr);
        }
        Ok(())
    }
}

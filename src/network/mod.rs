//! Network module - Binds a protocol session to a datagram transport
//!
//! Provides:
//! - The `Transport` capability and its UDP implementation
//! - `SwitcherClient`, which serializes inbound datagrams and commands
//!   through a single session task

mod client;
mod transport;

pub use client::*;
pub use transport::*;

use std::net::SocketAddr;

/// Largest datagram accepted from the switcher
pub const MAX_DATAGRAM_SIZE: usize = 2048;

/// Configuration for network operations
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Switcher control port
    pub port: u16,
    /// Local address to bind (default: ephemeral port on all interfaces)
    pub bind_address: Option<String>,
    /// Depth of the session input queue
    pub queue_depth: usize,
    /// Receive buffer size
    pub max_datagram_size: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            port: crate::protocol::DEFAULT_PORT,
            bind_address: None,
            queue_depth: 64,
            max_datagram_size: MAX_DATAGRAM_SIZE,
        }
    }
}

impl NetworkConfig {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            ..Default::default()
        }
    }

    pub fn with_bind_address(mut self, bind_address: String) -> Self {
        self.bind_address = Some(bind_address);
        self
    }

    pub fn with_queue_depth(mut self, queue_depth: usize) -> Self {
        self.queue_depth = queue_depth.max(1);
        self
    }
}

/// Resolve a hostname to a socket address
pub async fn resolve_host(host: &str, port: u16) -> std::io::Result<SocketAddr> {
    use tokio::net::lookup_host;

    let addr_string = format!("{}:{}", host, port);
    let mut addrs = lookup_host(&addr_string).await?;

    addrs.next().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("Could not resolve host: {}", host),
        )
    })
}

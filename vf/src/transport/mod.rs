//! Links between nodes
//!
//! A `Network` moves raw frames between endpoints: `UdpNet` over datagram
//! sockets, `LocalNet` over in-process channels. `Parent` and `Child` are the
//! upward and downward sinks a node holds once attached.

mod links;
mod local;
mod udp;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use zigtree::Address;

use crate::protocol::FrameError;

pub use links::{DatagramChild, DatagramParent, ManagerParent};
pub use local::LocalNet;
pub use udp::UdpNet;

/// Errors raised while moving frames
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error("No listener at {0}")]
    Unreachable(Endpoint),

    #[error("Listener at {0} is full, frame dropped")]
    Congested(Endpoint),

    #[error("Endpoint {0} is already bound")]
    AddressInUse(Endpoint),

    #[error("Port for node {id} overflows base port {base}")]
    PortOverflow { id: Address, base: u16 },

    #[error("Parent is gone")]
    ParentGone,

    #[error("Manager call failed: {0}")]
    Manager(String),
}

/// Host and port of a listening socket
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// The listening endpoint of node `id`: `base_port + id`
    pub fn for_node(host: &str, base_port: u16, id: Address) -> Result<Self, LinkError> {
        let port = u16::try_from(id)
            .ok()
            .and_then(|id| base_port.checked_add(id))
            .ok_or(LinkError::PortOverflow { id, base: base_port })?;
        Ok(Self::new(host, port))
    }

    /// Same host, any free port
    pub fn ephemeral(host: &str) -> Self {
        Self::new(host, 0)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Frames arriving on one bound endpoint
///
/// Dropping the inbox releases the endpoint.
pub struct Inbox {
    endpoint: Endpoint,
    rx: mpsc::Receiver<String>,
    reader: Option<JoinHandle<()>>,
}

impl Inbox {
    pub(crate) fn new(endpoint: Endpoint, rx: mpsc::Receiver<String>, reader: Option<JoinHandle<()>>) -> Self {
        Self { endpoint, rx, reader }
    }

    /// The endpoint actually bound (port resolved when 0 was requested)
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }
}

impl Drop for Inbox {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

impl fmt::Debug for Inbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Inbox").field("endpoint", &self.endpoint).finish()
    }
}

/// Moves raw frames between endpoints
#[async_trait]
pub trait Network: Send + Sync {
    /// Start listening on `endpoint`; port 0 picks a free one
    async fn bind(&self, endpoint: &Endpoint) -> Result<Inbox, LinkError>;

    async fn send_to(&self, raw: &str, to: &Endpoint) -> Result<(), LinkError>;
}

/// Upward sink of a node
#[async_trait]
pub trait Parent: Send + Sync {
    async fn send_up(&self, raw: &str) -> Result<(), LinkError>;
}

/// Downward sink to an attached child
#[async_trait]
pub trait Child: Send + Sync {
    async fn send_down(&self, raw: &str) -> Result<(), LinkError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_for_node() {
        let endpoint = Endpoint::for_node("127.0.0.1", 6000, 20).unwrap();
        assert_eq!(endpoint.port, 6020);
        assert_eq!(endpoint.to_string(), "127.0.0.1:6020");
    }

    #[test]
    fn test_endpoint_port_overflow() {
        assert!(matches!(
            Endpoint::for_node("127.0.0.1", 6000, 60_000),
            Err(LinkError::PortOverflow { id: 60_000, base: 6000 })
        ));
        assert!(Endpoint::for_node("127.0.0.1", 6000, 70_000).is_err());
    }
}

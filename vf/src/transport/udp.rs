//! Datagram network over UDP sockets
//!
//! Each bound endpoint gets its own socket and reader task; all sends go
//! through one shared unbound-port socket.

use std::io::ErrorKind;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{Endpoint, Inbox, LinkError, Network};
use crate::protocol::FrameError;

const INBOX_CAPACITY: usize = 256;
const RECV_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Pause before receiving again after `error`, or `None` when the socket is unusable
fn retry_delay(error: &std::io::Error) -> Option<Duration> {
    match error.kind() {
        ErrorKind::Interrupted | ErrorKind::WouldBlock | ErrorKind::TimedOut => Some(Duration::ZERO),
        // ICMP errors from an earlier send surface on the next receive
        ErrorKind::ConnectionReset | ErrorKind::ConnectionRefused => Some(RECV_RETRY_DELAY),
        _ => None,
    }
}

pub struct UdpNet {
    socket: UdpSocket,
    max_frame_size: usize,
}

impl UdpNet {
    /// Open the sending socket
    pub async fn new(max_frame_size: usize) -> Result<Self, LinkError> {
        let socket = UdpSocket::bind(("0.0.0.0", 0)).await?;
        debug!(local = ?socket.local_addr().ok(), "UdpNet::new: sending socket bound");
        Ok(Self { socket, max_frame_size })
    }
}

#[async_trait]
impl Network for UdpNet {
    async fn bind(&self, endpoint: &Endpoint) -> Result<Inbox, LinkError> {
        let socket = UdpSocket::bind((endpoint.host.as_str(), endpoint.port))
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::AddrInUse => LinkError::AddressInUse(endpoint.clone()),
                _ => LinkError::Io(e),
            })?;
        let bound = Endpoint::new(endpoint.host.clone(), socket.local_addr()?.port());
        debug!(endpoint = %bound, "UdpNet::bind: listening");

        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
        let max = self.max_frame_size;
        let label = bound.clone();
        let reader = tokio::spawn(async move {
            let mut buf = vec![0u8; max + 1];
            loop {
                let (len, from) = match socket.recv_from(&mut buf).await {
                    Ok(received) => received,
                    Err(e) => match retry_delay(&e) {
                        Some(delay) => {
                            warn!(endpoint = %label, error = %e, "UdpNet: receive failed, retrying");
                            tokio::time::sleep(delay).await;
                            continue;
                        }
                        None => {
                            warn!(endpoint = %label, error = %e, "UdpNet: receive failed, closing inbox");
                            break;
                        }
                    },
                };
                if len > max {
                    warn!(endpoint = %label, %from, "UdpNet: dropping oversized datagram");
                    continue;
                }
                match std::str::from_utf8(&buf[..len]) {
                    Ok(raw) => {
                        if tx.send(raw.to_string()).await.is_err() {
                            break;
                        }
                    }
                    Err(_) => warn!(endpoint = %label, %from, "UdpNet: dropping non UTF-8 datagram"),
                }
            }
            debug!(endpoint = %label, "UdpNet: reader stopped");
        });

        Ok(Inbox::new(bound, rx, Some(reader)))
    }

    async fn send_to(&self, raw: &str, to: &Endpoint) -> Result<(), LinkError> {
        if raw.len() > self.max_frame_size {
            return Err(FrameError::TooLarge {
                size: raw.len(),
                limit: self.max_frame_size,
            }
            .into());
        }
        self.socket.send_to(raw.as_bytes(), (to.host.as_str(), to.port)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_udp_round_trip_on_ephemeral_port() {
        let net = UdpNet::new(8192).await.unwrap();
        let mut inbox = net.bind(&Endpoint::ephemeral("127.0.0.1")).await.unwrap();
        assert_ne!(inbox.endpoint().port, 0);

        let to = inbox.endpoint().clone();
        net.send_to(r#"{"query":"new_node_connexion","node_id":4}"#, &to)
            .await
            .unwrap();

        let raw = tokio::time::timeout(Duration::from_secs(2), inbox.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(raw.contains("new_node_connexion"));
    }

    #[test]
    fn test_retry_delay_by_error_kind() {
        let error = |kind: ErrorKind| std::io::Error::from(kind);
        assert_eq!(retry_delay(&error(ErrorKind::Interrupted)), Some(Duration::ZERO));
        assert_eq!(retry_delay(&error(ErrorKind::ConnectionReset)), Some(RECV_RETRY_DELAY));
        assert_eq!(retry_delay(&error(ErrorKind::ConnectionRefused)), Some(RECV_RETRY_DELAY));
        assert_eq!(retry_delay(&error(ErrorKind::InvalidInput)), None);
        assert_eq!(retry_delay(&error(ErrorKind::PermissionDenied)), None);
    }

    #[tokio::test]
    async fn test_udp_refuses_oversized_frames() {
        let net = UdpNet::new(16).await.unwrap();
        let to = Endpoint::new("127.0.0.1", 9);
        assert!(matches!(
            net.send_to(&"x".repeat(17), &to).await,
            Err(LinkError::Frame(FrameError::TooLarge { .. }))
        ));
    }
}

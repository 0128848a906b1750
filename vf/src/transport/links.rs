//! Concrete parent and child links

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use tracing::debug;

use super::{Child, Endpoint, LinkError, Network, Parent};
use crate::manager::ManagerApi;

/// Parent reached through a datagram endpoint
pub struct DatagramParent {
    net: Arc<dyn Network>,
    endpoint: Endpoint,
}

impl DatagramParent {
    pub fn new(net: Arc<dyn Network>, endpoint: Endpoint) -> Self {
        Self { net, endpoint }
    }
}

#[async_trait]
impl Parent for DatagramParent {
    async fn send_up(&self, raw: &str) -> Result<(), LinkError> {
        debug!(to = %self.endpoint, "DatagramParent::send_up: called");
        self.net.send_to(raw, &self.endpoint).await
    }
}

/// Child reached through a datagram endpoint
pub struct DatagramChild {
    net: Arc<dyn Network>,
    endpoint: Endpoint,
}

impl DatagramChild {
    pub fn new(net: Arc<dyn Network>, endpoint: Endpoint) -> Self {
        Self { net, endpoint }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }
}

#[async_trait]
impl Child for DatagramChild {
    async fn send_down(&self, raw: &str) -> Result<(), LinkError> {
        debug!(to = %self.endpoint, "DatagramChild::send_down: called");
        self.net.send_to(raw, &self.endpoint).await
    }
}

/// The manager as parent of a ring gateway
///
/// Holds a weak reference; the manager outlives its gateways only as long as
/// someone else owns it.
pub struct ManagerParent {
    manager: Weak<dyn ManagerApi>,
}

impl ManagerParent {
    pub fn new(manager: &Arc<dyn ManagerApi>) -> Self {
        Self {
            manager: Arc::downgrade(manager),
        }
    }
}

#[async_trait]
impl Parent for ManagerParent {
    async fn send_up(&self, raw: &str) -> Result<(), LinkError> {
        let manager = self.manager.upgrade().ok_or(LinkError::ParentGone)?;
        manager
            .receive_reply(raw.to_string())
            .await
            .map_err(|e| LinkError::Manager(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::LocalNet;

    #[tokio::test]
    async fn test_datagram_links_reach_their_endpoint() {
        let net: Arc<dyn Network> = Arc::new(LocalNet::new());
        let mut up = net.bind(&Endpoint::new("local", 6000)).await.unwrap();
        let mut down = net.bind(&Endpoint::new("local", 6001)).await.unwrap();

        DatagramParent::new(net.clone(), Endpoint::new("local", 6000))
            .send_up("up")
            .await
            .unwrap();
        let child = DatagramChild::new(net.clone(), Endpoint::new("local", 6001));
        child.send_down("down").await.unwrap();

        assert_eq!(up.recv().await.unwrap(), "up");
        assert_eq!(down.recv().await.unwrap(), "down");
        assert_eq!(child.endpoint().port, 6001);
    }
}

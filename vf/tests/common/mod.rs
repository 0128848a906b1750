//! Shared fleet scaffolding for the integration tests

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use vendfleet::config::AlertConfig;
use vendfleet::manager::{Manager, ManagerConfig, ManagerHandle};
use vendfleet::node::{Node, NodeOptions, Product, Upstream};
use vendfleet::transport::{Endpoint, LocalNet, Network};
use vendfleet::{ManagerApi, NodeKind, TopologyParams};

pub const HOST: &str = "local";
pub const BASE_PORT: u16 = 6000;

/// An in-process fleet: one manager and the nodes attached so far
pub struct Fleet {
    pub net: Arc<dyn Network>,
    pub handle: ManagerHandle,
    pub manager: Arc<dyn ManagerApi>,
    nodes: Vec<(Arc<Node>, watch::Sender<bool>)>,
}

impl Fleet {
    pub fn new(devices: u32, gateways: u32, depth: u32) -> Self {
        Self::with_config(devices, gateways, depth, ManagerConfig::default())
    }

    pub fn with_config(devices: u32, gateways: u32, depth: u32, config: ManagerConfig) -> Self {
        let net: Arc<dyn Network> = Arc::new(LocalNet::new());
        let params = TopologyParams::new(devices, gateways, depth).unwrap();
        let handle = Manager::new(params, config, net.clone())
            .with_products(catalogue_names())
            .spawn();
        let manager: Arc<dyn ManagerApi> = Arc::new(handle.clone());
        Self {
            net,
            handle,
            manager,
            nodes: Vec::new(),
        }
    }

    /// Attach a ring gateway and start its loop
    pub async fn ring_gateway(&mut self) -> Arc<Node> {
        let upstream = Upstream::Manager(self.manager.clone());
        self.start(options(NodeKind::Gateway), upstream).await
    }

    /// Attach a node of `kind` under the node `parent` and start its loop
    pub async fn child(&mut self, parent: &Node, kind: NodeKind) -> Arc<Node> {
        let upstream = Upstream::Gateway(parent.endpoint().clone());
        self.start(options(kind), upstream).await
    }

    async fn start(&mut self, options: NodeOptions, upstream: Upstream) -> Arc<Node> {
        let (node, inbox) = Node::attach(options, upstream, self.net.clone()).await.unwrap();
        node.load_products(vec![soda(2)]).await;
        let (stop_tx, stop_rx) = watch::channel(false);
        tokio::spawn(node.clone().run(inbox, stop_rx));
        self.nodes.push((node.clone(), stop_tx));
        node
    }

    /// Stop the loop of node `id`
    pub fn stop(&self, id: u32) {
        for (node, stop_tx) in &self.nodes {
            if node.id() == id {
                let _ = stop_tx.send(true);
            }
        }
    }
}

pub fn options(kind: NodeKind) -> NodeOptions {
    NodeOptions {
        kind,
        host: HOST.to_string(),
        base_port: BASE_PORT,
        attach_timeout: Duration::from_secs(2),
        alerts: AlertConfig::default(),
    }
}

pub fn soda(quantity: u32) -> Product {
    Product {
        id: 1,
        name: "Soda".to_string(),
        price_cents: 3_000,
        quantity,
    }
}

pub fn catalogue_names() -> BTreeMap<u32, String> {
    BTreeMap::from([(1, "Soda".to_string())])
}

/// Poll `check` until it holds or two seconds pass
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

pub fn endpoint(id: u32) -> Endpoint {
    Endpoint::for_node(HOST, BASE_PORT, id).unwrap()
}

//! Node lifecycle: attach, message handling and query fan-out

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{Mutex, watch};
use tokio::time::{Instant, timeout, timeout_at};
use tracing::{debug, info, warn};
use zigtree::{Address, Interval, NodeKind, TopologyError, TopologyParams};

use super::distributor::{Distributor, Product, Receipt, VendingError};
use super::router::{BroadcastPlan, Router};
use crate::config::{AlertConfig, Config};
use crate::manager::{ManagerApi, ManagerError, gateway_binding};
use crate::protocol::{Frame, FrameError, QueryKind, REPLY_GET_NODE_ID, REPLY_NETWORK_PARAMETERS, Status, StockLevels};
use crate::transport::{DatagramParent, Endpoint, Inbox, LinkError, ManagerParent, Network, Parent};

/// Lifecycle of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Unattached,
    AwaitingNodeId,
    /// Attached device or leaf; final state for nodes without children
    Attached,
    AwaitingParams,
    /// Interior node with its routing layer built
    Ready,
    Dead,
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeState::Unattached => "unattached",
            NodeState::AwaitingNodeId => "awaiting-node-id",
            NodeState::Attached => "attached",
            NodeState::AwaitingParams => "awaiting-params",
            NodeState::Ready => "ready",
            NodeState::Dead => "dead",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("No address available from {0}")]
    NoAddressAvailable(String),

    #[error("Timed out waiting for {0}")]
    AttachTimeout(&'static str),

    #[error("Unexpected frame during attach: {0}")]
    UnexpectedReply(String),

    #[error(transparent)]
    Link(#[from] LinkError),

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Topology(#[from] TopologyError),

    #[error(transparent)]
    Manager(ManagerError),

    #[error(transparent)]
    Vending(#[from] VendingError),

    #[error("Inbox closed")]
    InboxClosed,
}

impl From<ManagerError> for NodeError {
    fn from(e: ManagerError) -> Self {
        match e {
            ManagerError::NoAddressAvailable => NodeError::NoAddressAvailable("manager".to_string()),
            other => NodeError::Manager(other),
        }
    }
}

/// Where a node attaches
pub enum Upstream {
    /// Ring gateway under the manager; the caller keeps the `Arc` alive
    Manager(Arc<dyn ManagerApi>),

    /// Child of the gateway listening at this endpoint
    Gateway(Endpoint),
}

#[derive(Debug, Clone)]
pub struct NodeOptions {
    pub kind: NodeKind,
    pub host: String,
    pub base_port: u16,
    pub attach_timeout: Duration,
    pub alerts: AlertConfig,
}

impl NodeOptions {
    pub fn from_config(config: &Config, kind: NodeKind) -> Self {
        Self {
            kind,
            host: config.network.host.clone(),
            base_port: config.network.base_port,
            attach_timeout: config.attach.timeout(),
            alerts: config.alerts,
        }
    }
}

/// A gateway or device of the fleet
///
/// Every node is a distributor; gateways below the maximum depth also route
/// queries to their children.
pub struct Node {
    id: Address,
    kind: NodeKind,
    endpoint: Endpoint,
    base_port: u16,
    net: Arc<dyn Network>,
    parent: Box<dyn Parent>,
    manager: Option<Weak<dyn ManagerApi>>,
    state: Mutex<NodeState>,
    router: Mutex<Option<Router>>,
    distributor: Mutex<Distributor>,
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

impl Node {
    fn new(
        id: Address,
        options: &NodeOptions,
        endpoint: Endpoint,
        net: Arc<dyn Network>,
        parent: Box<dyn Parent>,
        manager: Option<Weak<dyn ManagerApi>>,
    ) -> Self {
        let state = match options.kind {
            NodeKind::Gateway => NodeState::AwaitingParams,
            _ => NodeState::Attached,
        };
        Self {
            id,
            kind: options.kind,
            endpoint,
            base_port: options.base_port,
            net,
            parent,
            manager,
            state: Mutex::new(state),
            router: Mutex::new(None),
            distributor: Mutex::new(Distributor::new(id, Vec::new(), options.alerts)),
        }
    }

    /// Attach to `upstream` and return the node with its listening inbox
    ///
    /// Returns once the node is `Attached` (device or leaf gateway) or `Ready` (routing gateway).
    pub async fn attach(
        options: NodeOptions,
        upstream: Upstream,
        net: Arc<dyn Network>,
    ) -> Result<(Arc<Node>, Inbox), NodeError> {
        debug!(kind = %options.kind, host = %options.host, state = %NodeState::Unattached, "Node::attach: called");
        match upstream {
            Upstream::Manager(manager) => Self::attach_to_manager(options, manager, net).await,
            Upstream::Gateway(endpoint) => Self::attach_to_gateway(options, endpoint, net).await,
        }
    }

    async fn attach_to_manager(
        mut options: NodeOptions,
        manager: Arc<dyn ManagerApi>,
        net: Arc<dyn Network>,
    ) -> Result<(Arc<Node>, Inbox), NodeError> {
        options.kind = NodeKind::Gateway;
        let id = manager.allocate_gateway_address().await?;

        let bound = match Endpoint::for_node(&options.host, options.base_port, id) {
            Ok(endpoint) => net.bind(&endpoint).await,
            Err(e) => Err(e),
        };
        let inbox = match bound {
            Ok(inbox) => inbox,
            Err(e) => {
                warn!(%id, error = %e, "Cannot listen, giving the ring address back");
                let _ = manager.free_address(id).await;
                return Err(e.into());
            }
        };

        let parent = ManagerParent::new(&manager);
        let node = Arc::new(Node::new(
            id,
            &options,
            inbox.endpoint().clone(),
            net,
            Box::new(parent),
            Some(Arc::downgrade(&manager)),
        ));

        let params = manager.topology().await?;
        node.apply_parameters(params).await?;
        manager.bind(&gateway_binding(id), node.endpoint.clone()).await?;
        info!(%id, endpoint = %node.endpoint, "Ring gateway attached");
        Ok((node, inbox))
    }

    async fn attach_to_gateway(
        options: NodeOptions,
        parent_endpoint: Endpoint,
        net: Arc<dyn Network>,
    ) -> Result<(Arc<Node>, Inbox), NodeError> {
        let parent = DatagramParent::new(net.clone(), parent_endpoint.clone());

        let id = {
            let mut handshake = net.bind(&Endpoint::ephemeral(&options.host)).await?;
            let request = Frame::QueryGetNodeId {
                reply_address: options.host.clone(),
                reply_port: handshake.endpoint().port,
                device_type: options.kind,
            };
            debug!(state = %NodeState::AwaitingNodeId, parent = %parent_endpoint, "Requesting node id");
            parent.send_up(&request.encode()?).await?;

            let raw = timeout(options.attach_timeout, handshake.recv())
                .await
                .map_err(|_| NodeError::AttachTimeout(REPLY_GET_NODE_ID))?
                .ok_or(NodeError::InboxClosed)?;
            match Frame::decode(&raw)? {
                Frame::ReplyGetNodeId { node_id } if node_id > 0 => {
                    Address::try_from(node_id).map_err(|_| NodeError::UnexpectedReply(raw.clone()))?
                }
                Frame::ReplyGetNodeId { .. } => return Err(NodeError::NoAddressAvailable(parent_endpoint.to_string())),
                other => return Err(NodeError::UnexpectedReply(other.name().to_string())),
            }
        };

        let mut inbox = net.bind(&Endpoint::for_node(&options.host, options.base_port, id)?).await?;
        let node = Arc::new(Node::new(
            id,
            &options,
            inbox.endpoint().clone(),
            net,
            Box::new(parent),
            None,
        ));
        node.send_up(&Frame::NewNodeConnexion { node_id: id }).await?;

        if options.kind == NodeKind::Gateway {
            node.send_up(&Frame::QueryNetworkParameters { node_id: id }).await?;
            let deadline = Instant::now() + options.attach_timeout;
            loop {
                match node.state().await {
                    NodeState::Ready | NodeState::Attached => break,
                    NodeState::Dead => {
                        return Err(NodeError::UnexpectedReply(REPLY_NETWORK_PARAMETERS.to_string()));
                    }
                    _ => {}
                }
                let raw = timeout_at(deadline, inbox.recv())
                    .await
                    .map_err(|_| NodeError::AttachTimeout(REPLY_NETWORK_PARAMETERS))?
                    .ok_or(NodeError::InboxClosed)?;
                node.on_message(&raw).await;
            }
        }

        info!(%id, kind = %node.kind, endpoint = %node.endpoint, parent = %parent_endpoint, "Node attached");
        Ok((node, inbox))
    }

    pub fn id(&self) -> Address {
        self.id
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub async fn state(&self) -> NodeState {
        *self.state.lock().await
    }

    async fn set_state(&self, state: NodeState) {
        let mut current = self.state.lock().await;
        debug!(id = %self.id, from = %*current, to = %state, "Node state change");
        *current = state;
    }

    /// Children interval, once the routing layer exists
    pub async fn interval(&self) -> Option<Interval> {
        self.router.lock().await.as_ref().map(|r| *r.interval())
    }

    /// Connected child devices and gateways
    pub async fn children(&self) -> (Vec<Address>, Vec<Address>) {
        match self.router.lock().await.as_ref() {
            Some(router) => (router.connected_devices(), router.connected_gateways()),
            None => (Vec::new(), Vec::new()),
        }
    }

    pub async fn load_products(&self, products: Vec<Product>) {
        self.distributor.lock().await.restock(products);
    }

    pub async fn products(&self) -> Vec<Product> {
        self.distributor.lock().await.products().cloned().collect()
    }

    pub async fn stock(&self) -> StockLevels {
        self.distributor.lock().await.stock()
    }

    pub async fn money_cents(&self) -> u64 {
        self.distributor.lock().await.money_cents()
    }

    async fn send_up(&self, frame: &Frame) -> Result<(), NodeError> {
        let raw = frame.encode()?;
        self.parent.send_up(&raw).await?;
        Ok(())
    }

    /// Build the routing layer for `params`
    pub async fn apply_parameters(&self, params: TopologyParams) -> Result<(), NodeError> {
        debug!(id = %self.id, %params, "Node::apply_parameters: called");
        match Router::for_node(self.id, params) {
            Ok(router) => {
                let state = match router {
                    Some(_) => NodeState::Ready,
                    None => NodeState::Attached,
                };
                *self.router.lock().await = router;
                self.set_state(state).await;
                Ok(())
            }
            Err(e) => {
                self.set_state(NodeState::Dead).await;
                Err(e.into())
            }
        }
    }

    /// Handle one raw frame from a parent, a child or an attaching node
    pub async fn on_message(&self, raw: &str) {
        let frame = match Frame::decode(raw) {
            Ok(frame) => frame,
            Err(FrameError::UnknownQuery(query)) => {
                warn!(id = %self.id, %query, "Unknown query kind, dropped");
                return;
            }
            Err(e) => {
                warn!(id = %self.id, error = %e, "Dropping malformed frame");
                return;
            }
        };
        debug!(id = %self.id, query = frame.name(), "Node::on_message: called");

        let result = match &frame {
            Frame::QueryGetNodeId {
                reply_address,
                reply_port,
                device_type,
            } => self.assign_child(reply_address, *reply_port, *device_type).await,
            Frame::QueryNetworkParameters { node_id } => self.send_parameters(*node_id).await,
            Frame::ReplyNetworkParameters { .. } => match frame.to_params() {
                Some(Ok(params)) if self.kind == NodeKind::Gateway => self.apply_parameters(params).await,
                Some(Ok(_)) => {
                    debug!(id = %self.id, "Device ignores network parameters");
                    Ok(())
                }
                Some(Err(e)) => {
                    self.set_state(NodeState::Dead).await;
                    Err(e.into())
                }
                None => Ok(()),
            },
            Frame::QueryGetStock { .. } | Frame::QueryGetMoney { .. } => match frame.as_query() {
                Some((kind, targets)) => self.broadcast(raw, kind, targets).await,
                None => Ok(()),
            },
            Frame::ReplyGetStock { .. }
            | Frame::ReplyGetMoney { .. }
            | Frame::NewNodeConnexion { .. }
            | Frame::AddToLogsHistory { .. } => self.parent.send_up(raw).await.map_err(NodeError::from),
            Frame::ReplyGetNodeId { .. } => {
                debug!(id = %self.id, "Stray node id reply ignored");
                Ok(())
            }
        };

        if let Err(e) = result {
            warn!(id = %self.id, query = frame.name(), error = %e, "Failed to handle frame");
        }
    }

    /// Answer a `query_get_node_id` from an attaching child
    async fn assign_child(&self, reply_address: &str, reply_port: u16, kind: NodeKind) -> Result<(), NodeError> {
        let node_id: i64 = {
            let mut guard = self.router.lock().await;
            match guard.as_mut() {
                Some(router) => match router.allocate(kind) {
                    Some(child) => match Endpoint::for_node(reply_address, self.base_port, child) {
                        Ok(endpoint) => {
                            router.register(child, endpoint);
                            i64::from(child)
                        }
                        Err(e) => {
                            warn!(id = %self.id, %child, error = %e, "Child endpoint unusable, slot released");
                            router.release(child);
                            -1
                        }
                    },
                    None => -1,
                },
                None => -1,
            }
        };

        if node_id < 0 {
            warn!(id = %self.id, %kind, "No child address available");
        } else {
            info!(id = %self.id, %node_id, %kind, "Child address assigned");
        }
        let reply = Frame::ReplyGetNodeId { node_id }.encode()?;
        self.net.send_to(&reply, &Endpoint::new(reply_address, reply_port)).await?;
        Ok(())
    }

    async fn send_parameters(&self, child: Address) -> Result<(), NodeError> {
        let target = self
            .router
            .lock()
            .await
            .as_ref()
            .and_then(|r| r.endpoint(child).map(|endpoint| (endpoint.clone(), *r.params())));
        match target {
            Some((endpoint, params)) => {
                let reply = Frame::network_parameters(&params).encode()?;
                self.net.send_to(&reply, &endpoint).await?;
                Ok(())
            }
            None => {
                warn!(id = %self.id, %child, "Parameters requested by an unknown child");
                Ok(())
            }
        }
    }

    /// Execute locally, forward to children and synthesise NOT_CONNECTED replies
    async fn broadcast(&self, raw: &str, kind: QueryKind, targets: &[Address]) -> Result<(), NodeError> {
        let (plan, routes) = match self.router.lock().await.as_ref() {
            Some(router) => (router.plan(targets), true),
            None => (
                BroadcastPlan {
                    local: targets.contains(&self.id),
                    ..Default::default()
                },
                false,
            ),
        };

        if plan.local {
            let reply = self.distributor.lock().await.execute(kind);
            self.send_up(&reply).await?;
        } else if !routes {
            warn!(id = %self.id, ?targets, "Query reached a node it does not target");
            self.send_up(&kind.bad_request(self.id)).await?;
        }

        for forward in plan.forward {
            if let Err(e) = self.net.send_to(raw, &forward.endpoint).await {
                warn!(id = %self.id, child = %forward.child, error = %e, "Child unreachable");
                for target in forward.targets {
                    self.send_up(&kind.not_connected(target)).await?;
                }
            }
        }
        for target in plan.not_connected {
            self.send_up(&kind.not_connected(target)).await?;
        }
        Ok(())
    }

    /// Sell one unit and report raised alerts to the manager's log ledger
    pub async fn purchase(&self, product_id: u32) -> Result<Receipt, NodeError> {
        let (receipt, lines) = {
            let mut distributor = self.distributor.lock().await;
            let receipt = distributor.purchase(product_id)?;
            let lines: Vec<String> = receipt.alerts.iter().map(|a| distributor.log_line(a)).collect();
            (receipt, lines)
        };

        for log in lines {
            let frame = Frame::AddToLogsHistory {
                status: Status::Connected,
                node_id: self.id,
                log,
            };
            if let Err(e) = self.send_up(&frame).await {
                warn!(id = %self.id, error = %e, "Failed to report alert");
            }
        }
        Ok(receipt)
    }

    /// Process frames until the inbox closes or `shutdown` flips to true
    pub async fn run(self: Arc<Self>, mut inbox: Inbox, mut shutdown: watch::Receiver<bool>) {
        info!(id = %self.id, endpoint = %self.endpoint, "Node running");
        loop {
            tokio::select! {
                raw = inbox.recv() => match raw {
                    Some(raw) => self.on_message(&raw).await,
                    None => {
                        warn!(id = %self.id, "Inbox closed");
                        break;
                    }
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        self.shutdown().await;
    }

    /// Mark the node dead and withdraw its name-service binding
    pub async fn shutdown(&self) {
        self.set_state(NodeState::Dead).await;
        if let Some(manager) = self.manager.as_ref().and_then(Weak::upgrade)
            && let Err(e) = manager.unbind(&gateway_binding(self.id)).await
        {
            warn!(id = %self.id, error = %e, "Failed to unbind");
        }
        info!(id = %self.id, "Node stopped");
    }
}

//! Interior routing layer of a gateway
//!
//! Owns the child address range, the child connection tables and the
//! endpoints children announced while attaching. Routing decisions come back
//! as plain data so the runtime can act on them after releasing its lock.

use std::collections::BTreeMap;

use tracing::{debug, warn};
use zigtree::{Address, Interval, NodeKind, TopologyError, TopologyParams};

use crate::table::ConnectionTable;
use crate::transport::Endpoint;

/// A connected child that must receive the query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Forward {
    pub child: Address,
    pub endpoint: Endpoint,

    /// Targets reached through this child
    pub targets: Vec<Address>,
}

/// What a node must do with a stock or money query
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastPlan {
    /// The node itself is targeted
    pub local: bool,

    pub forward: Vec<Forward>,

    /// Targets below this node that cannot be reached
    pub not_connected: Vec<Address>,
}

#[derive(Debug, Clone)]
pub struct Router {
    id: Address,
    params: TopologyParams,
    interval: Interval,
    devices: ConnectionTable,
    gateways: ConnectionTable,
    clients: BTreeMap<Address, Endpoint>,
}

impl Router {
    /// Routing layer of node `id`, or `None` when it has no children
    pub fn for_node(id: Address, params: TopologyParams) -> Result<Option<Self>, TopologyError> {
        let interval = params.next_interval(id)?;
        if !interval.has_children() {
            debug!(%id, "Router::for_node: leaf, no routing layer");
            return Ok(None);
        }
        debug!(%id, ?interval, "Router::for_node: interior");
        Ok(Some(Self {
            id,
            params,
            interval,
            devices: ConnectionTable::with_addresses(interval.devices()),
            gateways: ConnectionTable::with_addresses(interval.gateways()),
            clients: BTreeMap::new(),
        }))
    }

    pub fn params(&self) -> &TopologyParams {
        &self.params
    }

    pub fn interval(&self) -> &Interval {
        &self.interval
    }

    /// Claim the first free child slot of `kind`
    pub fn allocate(&mut self, kind: NodeKind) -> Option<Address> {
        let address = match kind {
            NodeKind::Device => self.devices.claim_first(),
            NodeKind::Gateway => self.gateways.claim_first(),
            NodeKind::Root => None,
        };
        debug!(id = %self.id, %kind, ?address, "Router::allocate: called");
        address
    }

    /// Record where child `child` listens
    pub fn register(&mut self, child: Address, endpoint: Endpoint) {
        self.clients.insert(child, endpoint);
    }

    /// Give a claimed slot back, forgetting its endpoint
    pub fn release(&mut self, child: Address) -> bool {
        self.clients.remove(&child);
        self.devices.free(child) || self.gateways.free(child)
    }

    pub fn endpoint(&self, child: Address) -> Option<&Endpoint> {
        self.clients.get(&child)
    }

    pub fn connected_devices(&self) -> Vec<Address> {
        self.devices.connected()
    }

    pub fn connected_gateways(&self) -> Vec<Address> {
        self.gateways.connected()
    }

    fn reachable(&self, child: Address, connected: bool) -> Option<Endpoint> {
        if !connected {
            return None;
        }
        let endpoint = self.clients.get(&child).cloned();
        if endpoint.is_none() {
            warn!(id = %self.id, %child, "Router: connected child has no registered endpoint");
        }
        endpoint
    }

    /// Decide how to fan out a query for `targets`
    ///
    /// Targets outside this node's range belong to other branches and are
    /// ignored. An unreachable child gateway yields one NOT_CONNECTED entry
    /// per target in its subtree.
    pub fn plan(&self, targets: &[Address]) -> BroadcastPlan {
        let mut targets = targets.to_vec();
        targets.sort_unstable();
        targets.dedup();

        let mut plan = BroadcastPlan {
            local: targets.contains(&self.id),
            ..Default::default()
        };

        for &t in targets.iter().filter(|t| self.interval.is_device(**t)) {
            match self.reachable(t, self.devices.is_connected(t)) {
                Some(endpoint) => plan.forward.push(Forward {
                    child: t,
                    endpoint,
                    targets: vec![t],
                }),
                None => plan.not_connected.push(t),
            }
        }

        for (gateway, _) in self.gateways.snapshot() {
            let subtree = self.interval.subtree(gateway);
            let affected: Vec<Address> = targets.iter().copied().filter(|t| subtree.contains(t)).collect();
            if affected.is_empty() {
                continue;
            }
            match self.reachable(gateway, self.gateways.is_connected(gateway)) {
                Some(endpoint) => plan.forward.push(Forward {
                    child: gateway,
                    endpoint,
                    targets: affected,
                }),
                None => plan.not_connected.extend(affected),
            }
        }

        debug!(id = %self.id, ?plan, "Router::plan: called");
        plan
    }
}

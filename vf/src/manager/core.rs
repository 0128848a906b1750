//! Main manager task
//!
//! Owns the ring table, the table of attached nodes, the name bindings of ring
//! gateways, the log ledger and the single in-flight query. Every mutation
//! goes through the request channel.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;
use zigtree::{Address, Interval, TopologyParams};

use super::api::gateway_binding;
use super::config::ManagerConfig;
use super::handle::ManagerHandle;
use super::messages::{ManagerError, ManagerMetrics, ManagerRequest, QueryOutcome};
use super::render::{self, NO_LOGS};
use crate::admin::AdminSink;
use crate::protocol::{Frame, QueryKind};
use crate::table::ConnectionTable;
use crate::transport::{Child, DatagramChild, Endpoint, Network};

/// The query currently collecting replies
struct ActiveQuery {
    id: String,
    kind: QueryKind,
    targets: Vec<Address>,
    pending: usize,
    /// Targets whose reply has been counted
    answered: BTreeSet<Address>,
    buffer: Vec<String>,
    waiters: Vec<oneshot::Sender<Option<QueryOutcome>>>,
    timer: JoinHandle<()>,
}

impl ActiveQuery {
    /// Count a reply from `source` at most once, and only for a target of this query
    fn credit(&mut self, source: Address) -> bool {
        if self.targets.binary_search(&source).is_err() || !self.answered.insert(source) {
            return false;
        }
        self.pending = self.pending.saturating_sub(1);
        true
    }
}

/// A query waiting for the in-flight one to clear
struct QueuedQuery {
    kind: QueryKind,
    targets: Vec<Address>,
    reply_tx: oneshot::Sender<String>,
}

/// The root of the fleet
pub struct Manager {
    config: ManagerConfig,
    params: TopologyParams,
    ring: Interval,
    net: Arc<dyn Network>,
    products: BTreeMap<u32, String>,
    tx: mpsc::Sender<ManagerRequest>,
    rx: mpsc::Receiver<ManagerRequest>,

    ring_table: ConnectionTable,
    connected: ConnectionTable,
    bindings: HashMap<String, Endpoint>,
    admin: Option<Arc<dyn AdminSink>>,
    logs: Vec<String>,
    active: Option<ActiveQuery>,
    queued: VecDeque<QueuedQuery>,
    history: VecDeque<QueryOutcome>,
    metrics: ManagerMetrics,
}

impl Manager {
    /// Create a manager for `params`; ring gateways are reached through `net`
    pub fn new(params: TopologyParams, config: ManagerConfig, net: Arc<dyn Network>) -> Self {
        debug!(%params, "Manager::new: called");
        let (tx, rx) = mpsc::channel(config.channel_buffer);
        let ring = params.ring();
        Self {
            config,
            params,
            ring,
            net,
            products: BTreeMap::new(),
            tx,
            rx,
            ring_table: ConnectionTable::with_addresses(ring.gateways()),
            connected: ConnectionTable::with_addresses(1..params.address_count()),
            bindings: HashMap::new(),
            admin: None,
            logs: Vec::new(),
            active: None,
            queued: VecDeque::new(),
            history: VecDeque::new(),
            metrics: ManagerMetrics::default(),
        }
    }

    /// Product names used as stock table columns
    pub fn with_products(mut self, products: BTreeMap<u32, String>) -> Self {
        self.products = products;
        self
    }

    pub fn handle(&self) -> ManagerHandle {
        ManagerHandle::new(self.tx.clone())
    }

    /// Run the manager on its own task
    pub fn spawn(self) -> ManagerHandle {
        let handle = self.handle();
        tokio::spawn(self.run());
        handle
    }

    /// Run the manager task until shutdown
    pub async fn run(mut self) {
        info!(params = %self.params, ring = ?self.ring, "Manager started");

        while let Some(req) = self.rx.recv().await {
            match req {
                ManagerRequest::AttachAdmin { sink, reply_tx } => {
                    let result = match &self.admin {
                        Some(current) if current.is_open() => {
                            warn!("Administrator already attached");
                            Err(ManagerError::AdminAlreadyAttached)
                        }
                        _ => {
                            info!("Administrator attached");
                            self.admin = Some(sink);
                            Ok(())
                        }
                    };
                    let _ = reply_tx.send(result);
                }

                ManagerRequest::AllocateGatewayAddress { reply_tx } => {
                    let result = match self.ring_table.claim_first() {
                        Some(address) => {
                            self.connected.mark_connected(address);
                            info!(%address, "Ring gateway attached");
                            Ok(address)
                        }
                        None => {
                            warn!("No ring address available");
                            Err(ManagerError::NoAddressAvailable)
                        }
                    };
                    let _ = reply_tx.send(result);
                }

                ManagerRequest::Topology { reply_tx } => {
                    let _ = reply_tx.send(self.params);
                }

                ManagerRequest::ConnectedDistributors { reply_tx } => {
                    let _ = reply_tx.send(self.connected.connected());
                }

                ManagerRequest::FreeAddress { address, reply_tx } => {
                    let freed = self.connected.free(address);
                    if freed {
                        self.ring_table.free(address);
                        info!(%address, "Address released");
                    } else {
                        debug!(%address, "FreeAddress: not connected, ignored");
                    }
                    let _ = reply_tx.send(freed);
                }

                ManagerRequest::NotifyAttach { address } => {
                    self.note_attach(address);
                }

                ManagerRequest::AppendLog { address, line } => {
                    self.record_log(address, line);
                }

                ManagerRequest::DisplayLogs { reply_tx } => {
                    let lines = if self.logs.is_empty() {
                        vec![NO_LOGS.to_string()]
                    } else {
                        self.logs.clone()
                    };
                    for line in &lines {
                        self.print(line.clone()).await;
                    }
                    let _ = reply_tx.send(lines);
                }

                ManagerRequest::ReceiveReply { raw } => {
                    self.receive(raw);
                    self.advance().await;
                }

                ManagerRequest::SendQuery {
                    kind,
                    targets,
                    reply_tx,
                } => {
                    self.queued.push_back(QueuedQuery {
                        kind,
                        targets,
                        reply_tx,
                    });
                    if self.active.is_some() {
                        debug!(queued = self.queued.len(), "SendQuery: query in flight, queued");
                    }
                    self.advance().await;
                }

                ManagerRequest::WaitForEndQuery { query_id, reply_tx } => {
                    self.wait(query_id, reply_tx);
                }

                ManagerRequest::QueryTimeout { query_id } => {
                    if self.active.as_ref().is_some_and(|q| q.id == query_id) {
                        warn!(%query_id, "Query timed out");
                        self.finish(true).await;
                        self.advance().await;
                    }
                }

                ManagerRequest::ForwardFailed { query_id, targets } => {
                    match self.active.as_ref().map(|q| (q.id == query_id, q.kind)) {
                        Some((true, kind)) => {
                            for target in targets {
                                self.synthesise(kind.not_connected(target));
                            }
                            self.advance().await;
                        }
                        _ => debug!(%query_id, "Forward failure for a finished query"),
                    }
                }

                ManagerRequest::Bind { name, endpoint } => {
                    debug!(%name, %endpoint, "Binding");
                    self.bindings.insert(name, endpoint);
                }

                ManagerRequest::Unbind { name } => {
                    debug!(%name, "Unbinding");
                    self.bindings.remove(&name);
                }

                ManagerRequest::GetMetrics { reply_tx } => {
                    let _ = reply_tx.send(self.metrics.clone());
                }

                ManagerRequest::Shutdown => {
                    info!("Manager shutting down");
                    break;
                }
            }
        }

        if let Some(active) = self.active.take() {
            active.timer.abort();
        }
        info!("Manager stopped");
    }

    fn note_attach(&mut self, address: Address) {
        if address == 0 || address >= self.params.address_count() {
            warn!(%address, "Attach notice for an address outside the tree");
            return;
        }
        self.connected.mark_connected(address);
        info!(%address, "Node attached");
    }

    fn record_log(&mut self, address: Address, line: String) {
        info!(%address, %line, "Log recorded");
        self.metrics.logs_recorded += 1;
        self.logs.push(line);
    }

    async fn print(&self, text: String) {
        match &self.admin {
            Some(admin) => admin.print_on_admin_interface(text).await,
            None => debug!("No administrator attached, output dropped"),
        }
    }

    /// Handle a frame bubbled up by a ring gateway
    fn receive(&mut self, raw: String) {
        let frame = match Frame::decode(&raw) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "Dropping undecodable frame");
                self.metrics.frames_dropped += 1;
                return;
            }
        };

        match frame {
            Frame::NewNodeConnexion { node_id } => self.note_attach(node_id),
            Frame::AddToLogsHistory { node_id, log, .. } => self.record_log(node_id, log),
            other => match self.active.as_mut() {
                Some(active) if other.reply_kind() == Some(active.kind) => {
                    match other.reply_source().and_then(|(_, source)| source) {
                        Some(source) if active.credit(source) => {
                            active.buffer.push(raw);
                            self.metrics.replies_received += 1;
                            debug!(query_id = %active.id, %source, pending = active.pending, "Reply recorded");
                        }
                        source => {
                            debug!(query_id = %active.id, ?source, "Dropping stale, duplicate or untargeted reply");
                            self.metrics.frames_dropped += 1;
                        }
                    }
                }
                _ => {
                    debug!(kind = other.name(), "Ignoring frame outside an active query");
                    self.metrics.frames_dropped += 1;
                }
            },
        }
    }

    /// Complete a drained query and start the next queued one
    async fn advance(&mut self) {
        loop {
            match self.active.as_ref().map(|q| q.pending == 0) {
                Some(true) => self.finish(false).await,
                Some(false) => break,
                None => match self.queued.pop_front() {
                    Some(next) if next.reply_tx.is_closed() => {
                        debug!("Dropping queued query whose caller is gone");
                    }
                    Some(next) => self.start(next),
                    None => break,
                },
            }
        }
    }

    fn start(&mut self, query: QueuedQuery) {
        let count = self.params.address_count();
        let mut targets: Vec<Address> = query.targets;
        targets.sort_unstable();
        targets.dedup();
        let (targets, invalid): (Vec<Address>, Vec<Address>) = targets.into_iter().partition(|t| *t >= 1 && *t < count);
        if !invalid.is_empty() {
            warn!(?invalid, "Dropping targets outside the tree");
        }

        let id = Uuid::now_v7().to_string();
        let timer = {
            let tx = self.tx.clone();
            let query_id = id.clone();
            let timeout = self.config.query_timeout();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                let _ = tx.send(ManagerRequest::QueryTimeout { query_id }).await;
            })
        };

        info!(query_id = %id, kind = %query.kind, ?targets, "Query started");
        self.metrics.queries_started += 1;
        self.active = Some(ActiveQuery {
            id: id.clone(),
            kind: query.kind,
            targets: targets.clone(),
            pending: targets.len(),
            answered: BTreeSet::new(),
            buffer: Vec::new(),
            waiters: Vec::new(),
            timer,
        });

        self.dispatch(&id, query.kind, &targets);
        let _ = query.reply_tx.send(id);
    }

    /// Count a reply synthesised by the manager itself
    fn synthesise(&mut self, frame: Frame) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        let Some((_, Some(target))) = frame.reply_source() else {
            return;
        };
        if !active.credit(target) {
            debug!(query_id = %active.id, %target, "Target already settled, synthesised reply skipped");
            return;
        }
        match frame.encode() {
            Ok(raw) => active.buffer.push(raw),
            Err(e) => warn!(error = %e, "Failed to encode synthesised reply"),
        }
    }

    /// Fan the query out to the ring gateways whose subtree holds a target
    ///
    /// Targets behind an unattached or unbound gateway, and the root's own
    /// device slots which nothing serves, are answered NOT_CONNECTED here.
    fn dispatch(&mut self, query_id: &str, kind: QueryKind, targets: &[Address]) {
        let request = kind.request(targets.to_vec()).encode();
        let mut served = BTreeSet::new();

        for (gateway, _) in self.ring_table.snapshot() {
            let subtree = self.ring.subtree(gateway);
            let affected: Vec<Address> = targets.iter().copied().filter(|t| subtree.contains(t)).collect();
            if affected.is_empty() {
                continue;
            }
            served.extend(affected.iter().copied());

            let endpoint = match self.ring_table.is_connected(gateway) {
                true => self.bindings.get(&gateway_binding(gateway)).cloned(),
                false => None,
            };
            match (endpoint, &request) {
                (Some(endpoint), Ok(raw)) => {
                    debug!(%gateway, %endpoint, ?affected, "Forwarding query to ring gateway");
                    let child = DatagramChild::new(self.net.clone(), endpoint);
                    let raw = raw.clone();
                    let tx = self.tx.clone();
                    let query_id = query_id.to_string();
                    tokio::spawn(async move {
                        if let Err(e) = child.send_down(&raw).await {
                            warn!(%gateway, error = %e, "Ring gateway unreachable");
                            let _ = tx
                                .send(ManagerRequest::ForwardFailed {
                                    query_id,
                                    targets: affected,
                                })
                                .await;
                        }
                    });
                }
                (endpoint, request) => {
                    if let Err(e) = request {
                        warn!(error = %e, "Query frame cannot be sent");
                    } else if endpoint.is_none() {
                        debug!(%gateway, "Ring gateway not reachable");
                    }
                    for target in affected {
                        self.synthesise(kind.not_connected(target));
                    }
                }
            }
        }

        for &target in targets.iter().filter(|t| !served.contains(t)) {
            debug!(%target, "No ring gateway serves target");
            self.synthesise(kind.not_connected(target));
        }
    }

    async fn finish(&mut self, timed_out: bool) {
        let Some(active) = self.active.take() else {
            return;
        };
        active.timer.abort();

        let missing: Vec<Address> = active
            .targets
            .iter()
            .copied()
            .filter(|t| !active.answered.contains(t))
            .collect();
        let rendered = render::render(active.kind, &active.buffer, &self.products, &missing, timed_out);

        if timed_out {
            self.metrics.queries_timed_out += 1;
        } else {
            self.metrics.queries_completed += 1;
        }
        info!(query_id = %active.id, replies = active.buffer.len(), timed_out, "Query finished");

        self.print(rendered.clone()).await;

        let outcome = QueryOutcome {
            query_id: active.id,
            kind: active.kind,
            targets: active.targets,
            replies: active.buffer,
            rendered,
            timed_out,
            missing,
        };
        for waiter in active.waiters {
            let _ = waiter.send(Some(outcome.clone()));
        }
        self.history.push_back(outcome);
        while self.history.len() > self.config.outcome_history.max(1) {
            self.history.pop_front();
        }
    }

    fn wait(&mut self, query_id: Option<String>, reply_tx: oneshot::Sender<Option<QueryOutcome>>) {
        if let Some(active) = self.active.as_mut()
            && query_id.as_ref().is_none_or(|id| *id == active.id)
        {
            active.waiters.push(reply_tx);
            return;
        }

        let outcome = match &query_id {
            Some(id) => self.history.iter().find(|o| o.query_id == *id).cloned(),
            None => self.history.back().cloned(),
        };
        if outcome.is_none() {
            debug!(?query_id, "WaitForEndQuery: nothing to report");
        }
        let _ = reply_tx.send(outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn active(targets: Vec<Address>) -> ActiveQuery {
        ActiveQuery {
            id: "q".to_string(),
            kind: QueryKind::GetMoney,
            pending: targets.len(),
            targets,
            answered: BTreeSet::new(),
            buffer: Vec::new(),
            waiters: Vec::new(),
            timer: tokio::spawn(async {}),
        }
    }

    #[tokio::test]
    async fn test_credit_counts_each_target_once() {
        let mut query = active(vec![1, 2]);

        assert!(query.credit(1));
        assert!(!query.credit(1));
        assert!(!query.credit(20));
        assert_eq!(query.pending, 1);

        assert!(query.credit(2));
        assert_eq!(query.pending, 0);
        assert_eq!(query.answered, BTreeSet::from([1, 2]));
    }
}

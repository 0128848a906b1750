//! Manager request, error and outcome types

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::oneshot;
use zigtree::{Address, TopologyError, TopologyParams};

use crate::admin::AdminSink;
use crate::protocol::QueryKind;
use crate::transport::Endpoint;

/// Errors returned by manager operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ManagerError {
    #[error(transparent)]
    InvalidParameters(#[from] TopologyError),

    #[error("No address available")]
    NoAddressAvailable,

    #[error("An administrator is already attached")]
    AdminAlreadyAttached,

    #[error("Manager channel closed")]
    ChannelClosed,

    #[error("Registry error: {0}")]
    Remote(String),
}

/// Result of one query lifecycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryOutcome {
    pub query_id: String,
    pub kind: QueryKind,

    /// Valid, de-duplicated targets the query was dispatched to
    pub targets: Vec<Address>,

    /// Raw reply frames in arrival order, synthesised ones included
    pub replies: Vec<String>,

    /// Table sent to the administrator
    pub rendered: String,

    pub timed_out: bool,

    /// Targets that produced no reply of any status
    pub missing: Vec<Address>,
}

/// Manager counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerMetrics {
    pub queries_started: u64,
    pub queries_completed: u64,
    pub queries_timed_out: u64,
    pub replies_received: u64,
    pub frames_dropped: u64,
    pub logs_recorded: u64,
}

/// Requests handled by the manager task
pub enum ManagerRequest {
    AttachAdmin {
        sink: Arc<dyn AdminSink>,
        reply_tx: oneshot::Sender<Result<(), ManagerError>>,
    },

    AllocateGatewayAddress {
        reply_tx: oneshot::Sender<Result<Address, ManagerError>>,
    },

    Topology {
        reply_tx: oneshot::Sender<TopologyParams>,
    },

    ConnectedDistributors {
        reply_tx: oneshot::Sender<Vec<Address>>,
    },

    FreeAddress {
        address: Address,
        reply_tx: oneshot::Sender<bool>,
    },

    NotifyAttach {
        address: Address,
    },

    AppendLog {
        address: Address,
        line: String,
    },

    DisplayLogs {
        reply_tx: oneshot::Sender<Vec<String>>,
    },

    /// A raw frame bubbled up by a ring gateway
    ReceiveReply {
        raw: String,
    },

    /// Start a query; answered with its id once dispatched
    SendQuery {
        kind: QueryKind,
        targets: Vec<Address>,
        reply_tx: oneshot::Sender<String>,
    },

    /// Wait for a query to complete; `None` means the current or latest one
    WaitForEndQuery {
        query_id: Option<String>,
        reply_tx: oneshot::Sender<Option<QueryOutcome>>,
    },

    /// Fired by the timer of query `query_id`
    QueryTimeout {
        query_id: String,
    },

    /// A ring gateway could not be reached while forwarding query `query_id`
    ForwardFailed {
        query_id: String,
        targets: Vec<Address>,
    },

    Bind {
        name: String,
        endpoint: Endpoint,
    },

    Unbind {
        name: String,
    },

    GetMetrics {
        reply_tx: oneshot::Sender<ManagerMetrics>,
    },

    Shutdown,
}

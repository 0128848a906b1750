//! ManagerHandle - client interface to the manager task

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;
use zigtree::{Address, TopologyParams};

use super::api::ManagerApi;
use super::messages::{ManagerError, ManagerMetrics, ManagerRequest, QueryOutcome};
use crate::admin::AdminSink;
use crate::protocol::QueryKind;
use crate::transport::Endpoint;

/// Cloneable handle to a running manager
#[derive(Clone)]
pub struct ManagerHandle {
    tx: mpsc::Sender<ManagerRequest>,
}

impl ManagerHandle {
    pub(crate) fn new(tx: mpsc::Sender<ManagerRequest>) -> Self {
        Self { tx }
    }

    async fn send(&self, req: ManagerRequest) -> Result<(), ManagerError> {
        self.tx.send(req).await.map_err(|_| ManagerError::ChannelClosed)
    }

    async fn call<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> ManagerRequest) -> Result<T, ManagerError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(make(reply_tx)).await?;
        reply_rx.await.map_err(|_| ManagerError::ChannelClosed)
    }

    /// Register the administrator output; one at a time
    pub async fn attach_admin(&self, sink: Arc<dyn AdminSink>) -> Result<(), ManagerError> {
        debug!("ManagerHandle::attach_admin: called");
        self.call(|reply_tx| ManagerRequest::AttachAdmin { sink, reply_tx })
            .await?
    }

    /// Record that `address` finished attaching
    pub async fn notify_attach(&self, address: Address) -> Result<(), ManagerError> {
        debug!(%address, "ManagerHandle::notify_attach: called");
        self.send(ManagerRequest::NotifyAttach { address }).await
    }

    /// Append a line reported by `address` to the log ledger
    pub async fn append_log(&self, address: Address, line: impl Into<String>) -> Result<(), ManagerError> {
        self.send(ManagerRequest::AppendLog {
            address,
            line: line.into(),
        })
        .await
    }

    pub async fn metrics(&self) -> Result<ManagerMetrics, ManagerError> {
        self.call(|reply_tx| ManagerRequest::GetMetrics { reply_tx }).await
    }

    pub async fn shutdown(&self) -> Result<(), ManagerError> {
        debug!("ManagerHandle::shutdown: called");
        self.send(ManagerRequest::Shutdown).await
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[async_trait]
impl ManagerApi for ManagerHandle {
    async fn allocate_gateway_address(&self) -> Result<Address, ManagerError> {
        debug!("ManagerHandle::allocate_gateway_address: called");
        self.call(|reply_tx| ManagerRequest::AllocateGatewayAddress { reply_tx })
            .await?
    }

    async fn topology(&self) -> Result<TopologyParams, ManagerError> {
        self.call(|reply_tx| ManagerRequest::Topology { reply_tx }).await
    }

    async fn connected_distributors(&self) -> Result<Vec<Address>, ManagerError> {
        self.call(|reply_tx| ManagerRequest::ConnectedDistributors { reply_tx })
            .await
    }

    async fn free_address(&self, address: Address) -> Result<bool, ManagerError> {
        debug!(%address, "ManagerHandle::free_address: called");
        self.call(|reply_tx| ManagerRequest::FreeAddress { address, reply_tx })
            .await
    }

    async fn receive_reply(&self, raw: String) -> Result<(), ManagerError> {
        self.send(ManagerRequest::ReceiveReply { raw }).await
    }

    async fn display_logs(&self) -> Result<Vec<String>, ManagerError> {
        debug!("ManagerHandle::display_logs: called");
        self.call(|reply_tx| ManagerRequest::DisplayLogs { reply_tx }).await
    }

    async fn send_query(&self, kind: QueryKind, targets: Vec<Address>) -> Result<String, ManagerError> {
        debug!(%kind, ?targets, "ManagerHandle::send_query: called");
        self.call(|reply_tx| ManagerRequest::SendQuery {
            kind,
            targets,
            reply_tx,
        })
        .await
    }

    async fn wait_for_end_query(&self) -> Result<Option<QueryOutcome>, ManagerError> {
        debug!("ManagerHandle::wait_for_end_query: called");
        self.call(|reply_tx| ManagerRequest::WaitForEndQuery {
            query_id: None,
            reply_tx,
        })
        .await
    }

    async fn wait_for_query(&self, query_id: &str) -> Result<Option<QueryOutcome>, ManagerError> {
        debug!(%query_id, "ManagerHandle::wait_for_query: called");
        self.call(|reply_tx| ManagerRequest::WaitForEndQuery {
            query_id: Some(query_id.to_string()),
            reply_tx,
        })
        .await
    }

    async fn bind(&self, name: &str, endpoint: Endpoint) -> Result<(), ManagerError> {
        self.send(ManagerRequest::Bind {
            name: name.to_string(),
            endpoint,
        })
        .await
    }

    async fn unbind(&self, name: &str) -> Result<(), ManagerError> {
        self.send(ManagerRequest::Unbind { name: name.to_string() }).await
    }
}

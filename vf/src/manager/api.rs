//! Operations offered by the manager to nodes and administrators

use async_trait::async_trait;
use zigtree::{Address, TopologyParams};

use super::messages::{ManagerError, QueryOutcome};
use crate::protocol::QueryKind;
use crate::transport::Endpoint;

/// The manager as seen from a ring gateway or an admin console
///
/// Implemented by the in-process `ManagerHandle` and by the registry client.
#[async_trait]
pub trait ManagerApi: Send + Sync {
    /// Claim the lowest free ring address
    async fn allocate_gateway_address(&self) -> Result<Address, ManagerError>;

    async fn topology(&self) -> Result<TopologyParams, ManagerError>;

    async fn address_count(&self) -> Result<Address, ManagerError> {
        Ok(self.topology().await?.address_count())
    }

    /// Attached addresses in ascending order
    async fn connected_distributors(&self) -> Result<Vec<Address>, ManagerError>;

    async fn free_address(&self, address: Address) -> Result<bool, ManagerError>;

    /// Hand a raw frame from a ring gateway to the manager
    async fn receive_reply(&self, raw: String) -> Result<(), ManagerError>;

    /// Send the log ledger to the administrator; also returned
    async fn display_logs(&self) -> Result<Vec<String>, ManagerError>;

    /// Start a query once the previous one has cleared; returns its id
    async fn send_query(&self, kind: QueryKind, targets: Vec<Address>) -> Result<String, ManagerError>;

    /// Wait for the in-flight query, or get the latest outcome when idle
    async fn wait_for_end_query(&self) -> Result<Option<QueryOutcome>, ManagerError>;

    /// Wait for query `query_id`
    async fn wait_for_query(&self, query_id: &str) -> Result<Option<QueryOutcome>, ManagerError>;

    /// Publish `endpoint` under `name` (e.g. `gateway_1`)
    async fn bind(&self, name: &str, endpoint: Endpoint) -> Result<(), ManagerError>;

    async fn unbind(&self, name: &str) -> Result<(), ManagerError>;
}

/// Name-service key of ring gateway `id`
pub fn gateway_binding(id: Address) -> String {
    format!("gateway_{}", id)
}

//! Registry client: the manager seen from another process

use std::time::Duration;

use async_trait::async_trait;
use eyre::{Context, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use zigtree::{Address, TopologyParams};

use super::MAX_MESSAGE_SIZE;
use super::messages::{RegistryRequest, RegistryResponse};
use crate::manager::{ManagerApi, ManagerError, QueryOutcome};
use crate::protocol::QueryKind;
use crate::transport::Endpoint;

/// Default timeout for registry calls
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Extra time a query wait gets on top of the manager's query timeout
const WAIT_MARGIN: Duration = Duration::from_secs(5);

const ADMIN_BUFFER: usize = 64;

/// Client for a manager reachable through its registry
#[derive(Debug, Clone)]
pub struct RegistryClient {
    address: String,
    timeout: Duration,
    wait_timeout: Duration,
}

fn remote(e: eyre::Report) -> ManagerError {
    let chain: Vec<String> = e.chain().map(|c| c.to_string()).collect();
    ManagerError::Remote(chain.join(": "))
}

fn unexpected(response: RegistryResponse) -> ManagerError {
    match response {
        RegistryResponse::NoAddressAvailable => ManagerError::NoAddressAvailable,
        RegistryResponse::AdminAlreadyAttached => ManagerError::AdminAlreadyAttached,
        RegistryResponse::Error { message } => ManagerError::Remote(message),
        other => ManagerError::Remote(format!("Unexpected response: {:?}", other)),
    }
}

impl RegistryClient {
    /// Client for the registry at `address` (`host:port`)
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            timeout: DEFAULT_TIMEOUT,
            wait_timeout: Duration::from_secs(15) + WAIT_MARGIN,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Size query waits for a manager whose query timeout is `query_timeout`
    pub fn with_query_timeout(mut self, query_timeout: Duration) -> Self {
        self.wait_timeout = query_timeout + WAIT_MARGIN;
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    async fn connect(&self) -> Result<TcpStream> {
        tokio::time::timeout(self.timeout, TcpStream::connect(&self.address))
            .await
            .context("Connection timeout")?
            .with_context(|| format!("Failed to connect to registry at {}", self.address))
    }

    async fn write_request(&self, stream: &mut TcpStream, msg: &RegistryRequest) -> Result<()> {
        let msg_json = serde_json::to_string(msg).context("Failed to serialize message")?;
        if msg_json.len() > MAX_MESSAGE_SIZE {
            return Err(eyre::eyre!("Message too large: {} bytes", msg_json.len()));
        }

        tokio::time::timeout(self.timeout, async {
            stream
                .write_all(msg_json.as_bytes())
                .await
                .context("Failed to write message")?;
            stream.write_all(b"\n").await.context("Failed to write newline")?;
            stream.flush().await.context("Failed to flush stream")?;
            Ok::<_, eyre::Error>(())
        })
        .await
        .context("Write timeout")?
    }

    async fn read_response<R>(&self, reader: &mut R, timeout: Duration) -> Result<Option<RegistryResponse>>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut line = String::new();
        let bytes_read = tokio::time::timeout(timeout, reader.read_line(&mut line))
            .await
            .context("Read timeout")?
            .context("Failed to read response")?;
        if bytes_read == 0 {
            return Ok(None);
        }
        if bytes_read > MAX_MESSAGE_SIZE {
            return Err(eyre::eyre!("Response too large: {} bytes", bytes_read));
        }
        let response = serde_json::from_str(line.trim()).context("Failed to parse registry response")?;
        Ok(Some(response))
    }

    /// Send a request on a fresh connection and wait up to `timeout` for the answer
    async fn send_message(&self, msg: RegistryRequest, timeout: Duration) -> Result<RegistryResponse, ManagerError> {
        debug!(address = %self.address, ?msg, "RegistryClient: sending message");
        let result: Result<RegistryResponse> = async {
            let mut stream = self.connect().await?;
            self.write_request(&mut stream, &msg).await?;
            let mut reader = BufReader::new(stream);
            self.read_response(&mut reader, timeout)
                .await?
                .ok_or_else(|| eyre::eyre!("Registry closed the connection"))
        }
        .await;
        let response = result.map_err(remote)?;
        debug!(?response, "RegistryClient: received response");
        Ok(response)
    }

    async fn call(&self, msg: RegistryRequest) -> Result<RegistryResponse, ManagerError> {
        self.send_message(msg, self.timeout).await
    }

    pub async fn ping(&self) -> Result<String, ManagerError> {
        match self.call(RegistryRequest::Ping).await? {
            RegistryResponse::Pong { version } => Ok(version),
            other => Err(unexpected(other)),
        }
    }

    /// Attach as administrator; admin output arrives on the returned channel
    pub async fn attach_admin(&self) -> Result<mpsc::Receiver<String>, ManagerError> {
        debug!(address = %self.address, "RegistryClient::attach_admin: called");
        let mut stream = self.connect().await.map_err(remote)?;
        self.write_request(&mut stream, &RegistryRequest::AttachAdmin)
            .await
            .map_err(remote)?;
        let mut reader = BufReader::new(stream);
        match self.read_response(&mut reader, self.timeout).await.map_err(remote)? {
            Some(RegistryResponse::Attached) => {}
            Some(other) => return Err(unexpected(other)),
            None => return Err(ManagerError::Remote("Registry closed the connection".to_string())),
        }

        let (tx, rx) = mpsc::channel(ADMIN_BUFFER);
        tokio::spawn(async move {
            let mut lines = reader.lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => match serde_json::from_str::<RegistryResponse>(&line) {
                        Ok(RegistryResponse::Print { text }) => {
                            if tx.send(text).await.is_err() {
                                break;
                            }
                        }
                        Ok(other) => debug!(?other, "Admin stream: ignoring response"),
                        Err(e) => warn!(error = %e, "Admin stream: unparsable line"),
                    },
                    Ok(None) => break,
                    Err(e) => {
                        warn!(error = %e, "Admin stream: read failed");
                        break;
                    }
                }
            }
            debug!("Admin stream closed");
        });
        Ok(rx)
    }
}

#[async_trait]
impl ManagerApi for RegistryClient {
    async fn allocate_gateway_address(&self) -> Result<Address, ManagerError> {
        match self.call(RegistryRequest::AllocateGatewayAddress).await? {
            RegistryResponse::Address { address } => Ok(address),
            other => Err(unexpected(other)),
        }
    }

    async fn topology(&self) -> Result<TopologyParams, ManagerError> {
        match self.call(RegistryRequest::Topology).await? {
            RegistryResponse::Topology {
                devices,
                gateways,
                depth,
            } => Ok(TopologyParams::new(devices, gateways, depth)?),
            other => Err(unexpected(other)),
        }
    }

    async fn address_count(&self) -> Result<Address, ManagerError> {
        match self.call(RegistryRequest::AddressCount).await? {
            RegistryResponse::Count { count } => Ok(count),
            other => Err(unexpected(other)),
        }
    }

    async fn connected_distributors(&self) -> Result<Vec<Address>, ManagerError> {
        match self.call(RegistryRequest::ConnectedDistributors).await? {
            RegistryResponse::Addresses { addresses } => Ok(addresses),
            other => Err(unexpected(other)),
        }
    }

    async fn free_address(&self, address: Address) -> Result<bool, ManagerError> {
        match self.call(RegistryRequest::FreeAddress { address }).await? {
            RegistryResponse::Freed { freed } => Ok(freed),
            other => Err(unexpected(other)),
        }
    }

    async fn receive_reply(&self, raw: String) -> Result<(), ManagerError> {
        match self.call(RegistryRequest::ReceiveReply { raw }).await? {
            RegistryResponse::Ok => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    async fn display_logs(&self) -> Result<Vec<String>, ManagerError> {
        match self.call(RegistryRequest::DisplayLogs).await? {
            RegistryResponse::Lines { lines } => Ok(lines),
            other => Err(unexpected(other)),
        }
    }

    async fn send_query(&self, kind: QueryKind, targets: Vec<Address>) -> Result<String, ManagerError> {
        // May wait behind the query in flight
        match self
            .send_message(RegistryRequest::SendQuery { kind, targets }, self.wait_timeout)
            .await?
        {
            RegistryResponse::QueryStarted { query_id } => Ok(query_id),
            other => Err(unexpected(other)),
        }
    }

    async fn wait_for_end_query(&self) -> Result<Option<QueryOutcome>, ManagerError> {
        match self
            .send_message(RegistryRequest::WaitForEndQuery { query_id: None }, self.wait_timeout)
            .await?
        {
            RegistryResponse::Outcome { outcome } => Ok(outcome),
            other => Err(unexpected(other)),
        }
    }

    async fn wait_for_query(&self, query_id: &str) -> Result<Option<QueryOutcome>, ManagerError> {
        let msg = RegistryRequest::WaitForEndQuery {
            query_id: Some(query_id.to_string()),
        };
        match self.send_message(msg, self.wait_timeout).await? {
            RegistryResponse::Outcome { outcome } => Ok(outcome),
            other => Err(unexpected(other)),
        }
    }

    async fn bind(&self, name: &str, endpoint: Endpoint) -> Result<(), ManagerError> {
        let msg = RegistryRequest::Bind {
            name: name.to_string(),
            host: endpoint.host,
            port: endpoint.port,
        };
        match self.call(msg).await? {
            RegistryResponse::Ok => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    async fn unbind(&self, name: &str) -> Result<(), ManagerError> {
        match self.call(RegistryRequest::Unbind { name: name.to_string() }).await? {
            RegistryResponse::Ok => Ok(()),
            other => Err(unexpected(other)),
        }
    }
}

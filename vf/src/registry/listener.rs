//! Registry server on the manager side

use std::sync::Arc;

use eyre::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::MAX_MESSAGE_SIZE;
use super::messages::{RegistryRequest, RegistryResponse};
use crate::admin::ChannelSink;
use crate::manager::{ManagerApi, ManagerError, ManagerHandle};
use crate::transport::Endpoint;

const ADMIN_BUFFER: usize = 64;

/// Read one request line, refusing lines over the size cap
pub async fn read_message<R: AsyncRead + Unpin>(stream: &mut R) -> Result<RegistryRequest> {
    let mut reader = BufReader::new(stream.take(MAX_MESSAGE_SIZE as u64 + 1));
    let mut line = String::new();

    let bytes_read = reader
        .read_line(&mut line)
        .await
        .context("Failed to read registry message")?;

    if bytes_read > MAX_MESSAGE_SIZE {
        return Err(eyre::eyre!("Message too large: {} bytes", bytes_read));
    }

    if line.is_empty() {
        return Err(eyre::eyre!("Empty message received"));
    }

    let msg: RegistryRequest = serde_json::from_str(line.trim()).context("Failed to parse registry message")?;
    debug!(?msg, "read_message: parsed message");

    Ok(msg)
}

/// Send one response line
pub async fn send_response<W: AsyncWrite + Unpin>(stream: &mut W, response: &RegistryResponse) -> Result<()> {
    let response_json = serde_json::to_string(response).context("Failed to serialize response")?;
    stream
        .write_all(response_json.as_bytes())
        .await
        .context("Failed to write response")?;
    stream.write_all(b"\n").await.context("Failed to write newline")?;
    stream.flush().await.context("Failed to flush response")?;
    debug!(?response, "send_response: sent response");
    Ok(())
}

fn error_response(e: ManagerError) -> RegistryResponse {
    match e {
        ManagerError::NoAddressAvailable => RegistryResponse::NoAddressAvailable,
        ManagerError::AdminAlreadyAttached => RegistryResponse::AdminAlreadyAttached,
        other => RegistryResponse::Error {
            message: other.to_string(),
        },
    }
}

/// Serve one request against the manager
pub async fn dispatch(manager: &ManagerHandle, request: RegistryRequest) -> RegistryResponse {
    let result = match request {
        RegistryRequest::Ping => Ok(RegistryResponse::Pong {
            version: env!("CARGO_PKG_VERSION").to_string(),
        }),
        RegistryRequest::AllocateGatewayAddress => manager
            .allocate_gateway_address()
            .await
            .map(|address| RegistryResponse::Address { address }),
        RegistryRequest::Topology => manager.topology().await.map(|params| RegistryResponse::Topology {
            devices: params.devices(),
            gateways: params.gateways(),
            depth: params.depth(),
        }),
        RegistryRequest::AddressCount => manager
            .address_count()
            .await
            .map(|count| RegistryResponse::Count { count }),
        RegistryRequest::ConnectedDistributors => manager
            .connected_distributors()
            .await
            .map(|addresses| RegistryResponse::Addresses { addresses }),
        RegistryRequest::FreeAddress { address } => manager
            .free_address(address)
            .await
            .map(|freed| RegistryResponse::Freed { freed }),
        RegistryRequest::ReceiveReply { raw } => manager.receive_reply(raw).await.map(|_| RegistryResponse::Ok),
        RegistryRequest::DisplayLogs => manager
            .display_logs()
            .await
            .map(|lines| RegistryResponse::Lines { lines }),
        RegistryRequest::SendQuery { kind, targets } => manager
            .send_query(kind, targets)
            .await
            .map(|query_id| RegistryResponse::QueryStarted { query_id }),
        RegistryRequest::WaitForEndQuery { query_id } => {
            let outcome = match query_id {
                Some(id) => manager.wait_for_query(&id).await,
                None => manager.wait_for_end_query().await,
            };
            outcome.map(|outcome| RegistryResponse::Outcome { outcome })
        }
        RegistryRequest::Bind { name, host, port } => manager
            .bind(&name, Endpoint::new(host, port))
            .await
            .map(|_| RegistryResponse::Ok),
        RegistryRequest::Unbind { name } => manager.unbind(&name).await.map(|_| RegistryResponse::Ok),
        RegistryRequest::AttachAdmin => Err(ManagerError::Remote(
            "AttachAdmin needs a dedicated connection".to_string(),
        )),
    };
    result.unwrap_or_else(error_response)
}

/// Attach the connection as admin sink and stream output until it closes
async fn stream_admin(manager: &ManagerHandle, stream: TcpStream) -> Result<()> {
    let (mut read_half, mut write_half) = stream.into_split();
    let (sink, mut rx) = ChannelSink::new(ADMIN_BUFFER);
    if let Err(e) = manager.attach_admin(Arc::new(sink)).await {
        return send_response(&mut write_half, &error_response(e)).await;
    }
    send_response(&mut write_half, &RegistryResponse::Attached).await?;
    info!("Remote administrator attached");

    let mut scratch = [0u8; 64];
    loop {
        tokio::select! {
            text = rx.recv() => match text {
                Some(text) => send_response(&mut write_half, &RegistryResponse::Print { text }).await?,
                None => break,
            },
            read = read_half.read(&mut scratch) => match read {
                Ok(0) | Err(_) => break,
                Ok(_) => debug!("stream_admin: ignoring input on admin connection"),
            },
        }
    }
    info!("Remote administrator detached");
    Ok(())
}

async fn handle_connection(manager: ManagerHandle, mut stream: TcpStream) -> Result<()> {
    let request = read_message(&mut stream).await?;
    if request == RegistryRequest::AttachAdmin {
        return stream_admin(&manager, stream).await;
    }
    let response = dispatch(&manager, request).await;
    send_response(&mut stream, &response).await
}

/// Accepts registry connections for a manager
pub struct RegistryServer {
    manager: ManagerHandle,
    listener: TcpListener,
}

impl RegistryServer {
    pub async fn bind(address: &str, manager: ManagerHandle) -> Result<Self> {
        let listener = TcpListener::bind(address)
            .await
            .with_context(|| format!("Failed to bind registry on {}", address))?;
        info!(address = ?listener.local_addr().ok(), "Registry listening");
        Ok(Self { manager, listener })
    }

    pub fn local_addr(&self) -> Result<std::net::SocketAddr> {
        self.listener.local_addr().context("Registry has no local address")
    }

    /// Serve until `shutdown` flips to true; one task per connection
    pub async fn serve(self, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!(%peer, "Registry connection");
                        let manager = self.manager.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(manager, stream).await {
                                warn!(%peer, error = %e, "Registry connection failed");
                            }
                        });
                    }
                    Err(e) => warn!(error = %e, "Registry accept failed"),
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Registry stopped");
    }
}

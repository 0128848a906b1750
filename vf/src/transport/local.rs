//! In-process network
//!
//! Endpoints map to channels inside one process. Sends behave like
//! datagrams: a full inbox drops the frame instead of blocking the sender.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU16, Ordering};

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};
use tracing::debug;

use super::{Endpoint, Inbox, LinkError, Network};
use crate::protocol::check_size;

const FIRST_EPHEMERAL_PORT: u16 = 40_000;
const INBOX_CAPACITY: usize = 1024;

pub struct LocalNet {
    routes: Mutex<HashMap<Endpoint, mpsc::Sender<String>>>,
    next_port: AtomicU16,
}

impl Default for LocalNet {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalNet {
    pub fn new() -> Self {
        Self {
            routes: Mutex::new(HashMap::new()),
            next_port: AtomicU16::new(FIRST_EPHEMERAL_PORT),
        }
    }
}

#[async_trait]
impl Network for LocalNet {
    async fn bind(&self, endpoint: &Endpoint) -> Result<Inbox, LinkError> {
        let mut routes = self.routes.lock().await;

        let endpoint = if endpoint.port == 0 {
            loop {
                let port = self.next_port.fetch_add(1, Ordering::Relaxed);
                let candidate = Endpoint::new(endpoint.host.clone(), port);
                if routes.get(&candidate).is_none_or(|tx| tx.is_closed()) {
                    break candidate;
                }
            }
        } else {
            endpoint.clone()
        };

        if routes.get(&endpoint).is_some_and(|tx| !tx.is_closed()) {
            return Err(LinkError::AddressInUse(endpoint));
        }

        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
        routes.insert(endpoint.clone(), tx);
        debug!(%endpoint, "LocalNet::bind: bound");
        Ok(Inbox::new(endpoint, rx, None))
    }

    async fn send_to(&self, raw: &str, to: &Endpoint) -> Result<(), LinkError> {
        check_size(raw)?;
        let tx = self
            .routes
            .lock()
            .await
            .get(to)
            .cloned()
            .ok_or_else(|| LinkError::Unreachable(to.clone()))?;

        tx.try_send(raw.to_string()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => LinkError::Congested(to.clone()),
            mpsc::error::TrySendError::Closed(_) => LinkError::Unreachable(to.clone()),
        })
    }
}

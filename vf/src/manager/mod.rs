//! The manager: root of the fleet
//!
//! Hands out ring addresses, tracks which addresses are attached, fans
//! administrator queries out through the ring gateways and renders the
//! replies. Runs as a single task driven by `ManagerRequest`s; everything
//! else talks to it through a `ManagerHandle` or the `ManagerApi` trait.

mod api;
mod config;
mod core;
mod handle;
mod messages;
mod render;

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

use tracing::{info, warn};
use zigtree::TopologyParams;

pub use api::{ManagerApi, gateway_binding};
pub use config::ManagerConfig;
pub use core::Manager;
pub use handle::ManagerHandle;
pub use messages::{ManagerError, ManagerMetrics, ManagerRequest, QueryOutcome};
pub use render::{NO_LOGS, render};

use crate::transport::Network;

static INSTANCE: OnceLock<ManagerHandle> = OnceLock::new();

/// Start the process-wide manager
///
/// The first successful call fixes the topology; later calls return the
/// running manager and ignore their arguments.
pub fn initialize(
    devices: u32,
    gateways: u32,
    depth: u32,
    config: ManagerConfig,
    net: Arc<dyn Network>,
    products: BTreeMap<u32, String>,
) -> Result<ManagerHandle, ManagerError> {
    if let Some(handle) = INSTANCE.get() {
        warn!("Manager already initialized, keeping the running one");
        return Ok(handle.clone());
    }

    let params = TopologyParams::new(devices, gateways, depth)?;
    let manager = Manager::new(params, config, net).with_products(products);
    let handle = manager.handle();
    match INSTANCE.set(handle.clone()) {
        Ok(()) => {
            tokio::spawn(manager.run());
            info!(%params, "Manager initialized");
            Ok(handle)
        }
        // Lost the race; the unstarted manager is dropped
        Err(_) => INSTANCE.get().cloned().ok_or(ManagerError::ChannelClosed),
    }
}

/// The process-wide manager, if initialized
pub fn instance() -> Option<ManagerHandle> {
    INSTANCE.get().cloned()
}

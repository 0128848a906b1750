//! Name service and manager RPC over TCP
//!
//! Gateways and admin consoles in other processes reach the manager through
//! newline-delimited JSON on the registry port. Ring gateways publish their
//! datagram endpoint under `gateway_<id>`.

mod client;
mod listener;
mod messages;

pub use client::RegistryClient;
pub use listener::{RegistryServer, dispatch, read_message, send_response};
pub use messages::{RegistryRequest, RegistryResponse};

/// Maximum size of one request or response line
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

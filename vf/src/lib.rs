//! vendfleet - a hierarchical fleet of vending distributors
//!
//! A manager sits at the root of a cluster tree addressed by `zigtree`.
//! Gateways attach under the manager or under other gateways, devices attach
//! under gateways, and every node is also a distributor selling products.
//! Administrators query stock and money across the tree; the manager fans
//! queries out, gathers the replies and renders them.
//!
//! # Modules
//!
//! - [`protocol`] - JSON frames exchanged between nodes
//! - [`transport`] - Datagram networks and parent/child links
//! - [`manager`] - Root coordinator task
//! - [`node`] - Gateways and devices
//! - [`admin`] - Admin console and output sinks
//! - [`registry`] - TCP name service and manager RPC
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface

pub mod admin;
pub mod cli;
pub mod config;
pub mod manager;
pub mod node;
pub mod protocol;
pub mod registry;
pub mod table;
pub mod transport;

pub use config::Config;
pub use manager::{ManagerApi, ManagerHandle};
pub use node::{Node, NodeOptions, Upstream};
pub use zigtree::{Address, NodeKind, TopologyParams};

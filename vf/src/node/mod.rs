//! Gateways and devices
//!
//! Every node is a distributor. Gateways with room below them also carry a
//! `Router` and hand out addresses to children.

pub mod catalog;
mod distributor;
mod router;
mod runtime;
pub mod vending;

pub use distributor::{Alert, Distributor, Product, PurchaseRecord, Receipt, VendingError, format_euros};
pub use router::{BroadcastPlan, Forward, Router};
pub use runtime::{Node, NodeError, NodeOptions, NodeState, Upstream};

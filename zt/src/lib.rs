//! zigtree - cluster-tree address algebra
//!
//! Maps the flat address space `[0, N)` onto a rooted tree. Every interior
//! node owns `gateways` child gateways, each heading a contiguous subtree of
//! `step` addresses, followed by `devices` leaf devices. Address 0 is the
//! root. Gateways at the maximum depth are leaves.
//!
//! All operations are pure functions of `(devices, gateways, depth)`.

pub mod cli;
pub mod draw;

use std::fmt;
use std::ops::Range;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use draw::{LayoutError, render_tree, verify_layout};

/// A node identifier in `[0, N)`
pub type Address = u32;

/// Wire code of the root kind
pub const TYPE_ROOT: u8 = 1;
/// Wire code of the gateway kind
pub const TYPE_GATEWAY: u8 = 2;
/// Wire code of the device kind
pub const TYPE_DEVICE: u8 = 3;

/// Errors raised by the topology oracle
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TopologyError {
    #[error("Invalid topology parameters: {0}")]
    InvalidParameters(String),

    #[error("Address {address} is out of range (address count is {count})")]
    OutOfRange { address: Address, count: Address },

    #[error("Address space for devices={devices} gateways={gateways} depth={depth} does not fit in 32 bits")]
    Overflow { devices: u32, gateways: u32, depth: u32 },

    #[error("Address {0} has no place in the tree")]
    Unplaced(Address),
}

/// Kind of a node in the tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum NodeKind {
    Root,
    Gateway,
    Device,
}

impl NodeKind {
    /// Integer code used on the wire
    pub fn code(self) -> u8 {
        match self {
            NodeKind::Root => TYPE_ROOT,
            NodeKind::Gateway => TYPE_GATEWAY,
            NodeKind::Device => TYPE_DEVICE,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            TYPE_ROOT => Some(NodeKind::Root),
            TYPE_GATEWAY => Some(NodeKind::Gateway),
            TYPE_DEVICE => Some(NodeKind::Device),
            _ => None,
        }
    }
}

impl From<NodeKind> for u8 {
    fn from(kind: NodeKind) -> Self {
        kind.code()
    }
}

impl TryFrom<u8> for NodeKind {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        NodeKind::from_code(code).ok_or_else(|| format!("Unknown node kind code: {}", code))
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKind::Root => write!(f, "root"),
            NodeKind::Gateway => write!(f, "gateway"),
            NodeKind::Device => write!(f, "device"),
        }
    }
}

impl FromStr for NodeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "root" => Ok(NodeKind::Root),
            "gateway" => Ok(NodeKind::Gateway),
            "device" | "distributor" => Ok(NodeKind::Device),
            other => Err(format!("Unknown node kind: {}", other)),
        }
    }
}

/// Range of children owned by a node
///
/// Child gateways sit at `low, low + step, ...` below `upper`; child devices
/// occupy `[upper, upper + devices)`. A node without children carries an
/// empty interval (`low == upper`, no devices).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interval {
    pub depth: u32,
    pub low: Address,
    pub upper: Address,
    pub step: Address,
    pub devices: u32,
}

impl Interval {
    fn empty(address: Address, depth: u32) -> Self {
        Self {
            depth,
            low: address,
            upper: address,
            step: 1,
            devices: 0,
        }
    }

    pub fn has_children(&self) -> bool {
        self.upper > self.low || self.devices > 0
    }

    /// Child gateway addresses in ascending order
    pub fn gateways(&self) -> impl Iterator<Item = Address> + use<> {
        (self.low..self.upper).step_by(self.step.max(1) as usize)
    }

    /// Child device addresses
    pub fn devices(&self) -> Range<Address> {
        self.upper..self.upper + self.devices
    }

    /// Address range of the subtree headed by child gateway `gateway`
    pub fn subtree(&self, gateway: Address) -> Range<Address> {
        gateway..gateway + self.step
    }

    /// Whether `target` lies anywhere below this node
    pub fn contains(&self, target: Address) -> bool {
        target >= self.low && target < self.upper + self.devices
    }

    /// The child gateway whose subtree holds `target`, if any
    pub fn gateway_for(&self, target: Address) -> Option<Address> {
        if target < self.low || target >= self.upper {
            return None;
        }
        let step = self.step.max(1);
        Some(self.low + ((target - self.low) / step) * step)
    }

    pub fn is_device(&self, target: Address) -> bool {
        self.devices().contains(&target)
    }
}

/// Placement of a single address
///
/// The root reports itself as its own parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub parent: Address,
    pub depth: u32,
    pub kind: NodeKind,
}

/// Validated `(devices, gateways, depth)` triple
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TopologyParams {
    devices: u32,
    gateways: u32,
    depth: u32,
    count: Address,
}

impl TopologyParams {
    pub fn new(devices: u32, gateways: u32, depth: u32) -> Result<Self, TopologyError> {
        if gateways < 1 {
            return Err(TopologyError::InvalidParameters(
                "gateways per gateway must be at least 1".to_string(),
            ));
        }
        if depth < 1 {
            return Err(TopologyError::InvalidParameters("tree depth must be at least 1".to_string()));
        }
        let count = count_addresses(devices, gateways, depth)?;
        Ok(Self {
            devices,
            gateways,
            depth,
            count,
        })
    }

    pub fn devices(&self) -> u32 {
        self.devices
    }

    pub fn gateways(&self) -> u32 {
        self.gateways
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Total number of addresses `N`, root included
    pub fn address_count(&self) -> Address {
        self.count
    }

    /// The root's own interval (the first ring)
    pub fn ring(&self) -> Interval {
        let (n, d, g) = self.signed();
        Interval {
            depth: 0,
            low: 1,
            upper: (n - d) as Address,
            step: ((n - 1 - d) / g) as Address,
            devices: self.devices,
        }
    }

    /// Range of children of `address`
    pub fn next_interval(&self, address: Address) -> Result<Interval, TopologyError> {
        self.check(address)?;
        if address == 0 {
            return Ok(self.ring());
        }

        let (n, d, g) = self.signed();
        let s = i64::from(address);
        let mut depth = 0;
        let mut low = 1;
        let mut upper = n - d;
        let mut step = (n - 1 - d) / g;
        let mut node = 1;

        while node <= s && depth != self.depth && s < upper {
            if s < node + step {
                depth += 1;
                low = node + 1;
                upper = node + step - d;
                step = (step - 1 - d) / g;
                node += 1;
            } else {
                node += step;
            }
        }

        if depth == self.depth {
            return Ok(Interval::empty(address, depth));
        }
        if s >= upper {
            return Ok(Interval::empty(address, depth + 1));
        }
        Ok(Interval {
            depth,
            low: low as Address,
            upper: upper as Address,
            step: step as Address,
            devices: self.devices,
        })
    }

    /// Parent, depth and kind of `address`
    pub fn node_info(&self, address: Address) -> Result<NodeInfo, TopologyError> {
        self.check(address)?;
        if address == 0 {
            return Ok(NodeInfo {
                parent: 0,
                depth: 0,
                kind: NodeKind::Root,
            });
        }

        let (n, d, g) = self.signed();
        let s = i64::from(address);
        let mut parent = 0;
        let mut depth = 1;
        let mut low = 1;
        let mut upper = n - d;
        let mut step = (n - 1 - d) / g;
        let mut node = 1;

        while node < s && depth != self.depth && s < upper {
            if s < node + step {
                parent = node;
                depth += 1;
                low = node + 1;
                upper = node + step - d;
                step = (step - 1 - d) / g;
                node += 1;
            } else {
                node += step;
            }
        }

        let kind = if s >= low && s < upper {
            NodeKind::Gateway
        } else if s >= upper && s < upper + d {
            NodeKind::Device
        } else {
            return Err(TopologyError::Unplaced(address));
        };

        Ok(NodeInfo {
            parent: parent as Address,
            depth,
            kind,
        })
    }

    fn check(&self, address: Address) -> Result<(), TopologyError> {
        if address >= self.count {
            return Err(TopologyError::OutOfRange {
                address,
                count: self.count,
            });
        }
        Ok(())
    }

    fn signed(&self) -> (i64, i64, i64) {
        (
            i64::from(self.count),
            i64::from(self.devices),
            i64::from(self.gateways),
        )
    }
}

impl fmt::Display for TopologyParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "devices={} gateways={} depth={} (N={})",
            self.devices, self.gateways, self.depth, self.count
        )
    }
}

fn count_addresses(devices: u32, gateways: u32, depth: u32) -> Result<Address, TopologyError> {
    let overflow = || TopologyError::Overflow {
        devices,
        gateways,
        depth,
    };
    let width = u64::from(gateways) + u64::from(devices);
    let count = if gateways == 1 {
        u64::from(depth).checked_mul(width)
    } else {
        let g = u64::from(gateways);
        g.checked_pow(depth)
            .and_then(|power| (power - 1).checked_mul(width))
            .map(|total| total / (g - 1))
    }
    .and_then(|total| total.checked_add(1))
    .ok_or_else(overflow)?;
    Address::try_from(count).map_err(|_| overflow())
}

/// Number of addresses for `(devices, gateways, depth)`
pub fn address_count(devices: u32, gateways: u32, depth: u32) -> Result<Address, TopologyError> {
    TopologyParams::new(devices, gateways, depth).map(|params| params.address_count())
}

/// Range of children of `address` for `(devices, gateways, depth)`
pub fn next_interval(address: Address, devices: u32, gateways: u32, depth: u32) -> Result<Interval, TopologyError> {
    TopologyParams::new(devices, gateways, depth)?.next_interval(address)
}

/// Placement of `address` for `(devices, gateways, depth)`
pub fn node_info(address: Address, devices: u32, gateways: u32, depth: u32) -> Result<NodeInfo, TopologyError> {
    TopologyParams::new(devices, gateways, depth)?.node_info(address)
}

//! Tree rendering and layout verification
//!
//! Both walk the tree top-down through `next_interval`, so they exercise the
//! same code path a gateway uses to discover its children.

use std::collections::VecDeque;

use log::debug;
use thiserror::Error;

use crate::{Address, NodeInfo, NodeKind, TopologyError, TopologyParams};

/// A disagreement between the top-down walk and `node_info`
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LayoutError {
    #[error(transparent)]
    Topology(#[from] TopologyError),

    #[error("Node {address}: walk expects {expected:?}, oracle reports {actual:?}")]
    Mismatch {
        address: Address,
        expected: NodeInfo,
        actual: NodeInfo,
    },

    #[error("Address {0} is reached more than once")]
    Duplicate(Address),

    #[error("Child {child} escapes the range of its parent {parent}")]
    Escapes { child: Address, parent: Address },

    #[error("{missing} addresses are never reached")]
    Unreached { missing: usize },
}

fn children(params: &TopologyParams, address: Address) -> Result<Vec<Address>, TopologyError> {
    let interval = params.next_interval(address)?;
    Ok(interval.gateways().chain(interval.devices()).collect())
}

/// Draw the whole tree as indented ASCII
pub fn render_tree(params: &TopologyParams) -> Result<String, TopologyError> {
    let mut out = format!("[0] root  {}\n", params);
    render_children(params, 0, "", &mut out)?;
    Ok(out)
}

fn render_children(params: &TopologyParams, address: Address, prefix: &str, out: &mut String) -> Result<(), TopologyError> {
    let kids = children(params, address)?;
    let last = kids.len().saturating_sub(1);

    for (i, child) in kids.into_iter().enumerate() {
        let (branch, carry) = if i == last { ("└── ", "    ") } else { ("├── ", "│   ") };
        let info = params.node_info(child)?;
        let label = match info.kind {
            NodeKind::Device => format!("({}) device", child),
            _ => format!("[{}] gateway", child),
        };
        out.push_str(&format!("{}{}{}\n", prefix, branch, label));
        if info.kind == NodeKind::Gateway {
            render_children(params, child, &format!("{}{}", prefix, carry), out)?;
        }
    }
    Ok(())
}

/// Rebuild the tree from `next_interval` and check every address
///
/// Each address must be reached exactly once, agree with `node_info` on
/// parent, depth and kind, and stay inside the range of every ancestor.
/// Returns the number of addresses checked.
pub fn verify_layout(params: &TopologyParams) -> Result<usize, LayoutError> {
    debug!("verify_layout: {}", params);
    let count = params.address_count() as usize;
    let mut seen = vec![false; count];
    seen[0] = true;

    let mut queue = VecDeque::from([(0 as Address, 0u32)]);
    while let Some((address, depth)) = queue.pop_front() {
        let interval = params.next_interval(address)?;

        for child in interval.gateways().chain(interval.devices()) {
            if !interval.contains(child) {
                return Err(LayoutError::Escapes { child, parent: address });
            }
            let slot = seen
                .get_mut(child as usize)
                .ok_or(LayoutError::Escapes { child, parent: address })?;
            if *slot {
                return Err(LayoutError::Duplicate(child));
            }
            *slot = true;

            let kind = if interval.is_device(child) {
                NodeKind::Device
            } else {
                NodeKind::Gateway
            };
            let expected = NodeInfo {
                parent: address,
                depth: depth + 1,
                kind,
            };
            let actual = params.node_info(child)?;
            if actual != expected {
                return Err(LayoutError::Mismatch {
                    address: child,
                    expected,
                    actual,
                });
            }

            if kind == NodeKind::Gateway {
                let sub = params.next_interval(child)?;
                let bounds = interval.subtree(child);
                if sub.has_children() && (sub.low <= child || sub.upper + sub.devices > bounds.end) {
                    return Err(LayoutError::Escapes { child, parent: address });
                }
                queue.push_back((child, depth + 1));
            }
        }
    }

    let missing = seen.iter().filter(|reached| !**reached).count();
    if missing > 0 {
        return Err(LayoutError::Unreached { missing });
    }
    Ok(count)
}

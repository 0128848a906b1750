//! Connection tables
//!
//! The manager keeps one for its ring and one for every attached node; each
//! interior node keeps one for its child devices and one for its child
//! gateways. Entries never disappear: a freed address goes back to
//! `NotConnected` and can be claimed again.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use zigtree::Address;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Connection {
    NotConnected,
    Connected,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionTable {
    entries: BTreeMap<Address, Connection>,
}

impl ConnectionTable {
    /// A table holding `addresses`, all `NotConnected`
    pub fn with_addresses(addresses: impl IntoIterator<Item = Address>) -> Self {
        Self {
            entries: addresses.into_iter().map(|a| (a, Connection::NotConnected)).collect(),
        }
    }

    /// Claim the lowest `NotConnected` address
    pub fn claim_first(&mut self) -> Option<Address> {
        let (address, state) = self
            .entries
            .iter_mut()
            .find(|(_, state)| **state == Connection::NotConnected)?;
        *state = Connection::Connected;
        Some(*address)
    }

    /// Mark `address` connected, adding it when unknown
    pub fn mark_connected(&mut self, address: Address) {
        self.entries.insert(address, Connection::Connected);
    }

    /// Release a connected address; false when it was not connected
    pub fn free(&mut self, address: Address) -> bool {
        match self.entries.get_mut(&address) {
            Some(state) if *state == Connection::Connected => {
                *state = Connection::NotConnected;
                true
            }
            _ => false,
        }
    }

    pub fn state(&self, address: Address) -> Option<Connection> {
        self.entries.get(&address).copied()
    }

    pub fn is_connected(&self, address: Address) -> bool {
        self.state(address) == Some(Connection::Connected)
    }

    /// Connected addresses in ascending order
    pub fn connected(&self) -> Vec<Address> {
        self.entries
            .iter()
            .filter(|(_, state)| **state == Connection::Connected)
            .map(|(address, _)| *address)
            .collect()
    }

    /// Copy of every entry, for iteration outside the owner's lock
    pub fn snapshot(&self) -> Vec<(Address, Connection)> {
        self.entries.iter().map(|(a, s)| (*a, *s)).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claims_in_ascending_order() {
        let mut table = ConnectionTable::with_addresses([20, 1]);
        assert_eq!(table.claim_first(), Some(1));
        assert_eq!(table.claim_first(), Some(20));
        assert_eq!(table.claim_first(), None);
        assert_eq!(table.connected(), vec![1, 20]);
    }

    #[test]
    fn test_free_returns_slot() {
        let mut table = ConnectionTable::with_addresses([1, 20]);
        table.claim_first();
        assert!(table.free(1));
        assert!(!table.free(1));
        assert!(!table.free(20));
        assert!(!table.free(99));
        assert_eq!(table.claim_first(), Some(1));
    }

    #[test]
    fn test_mark_connected_adds_unknown_addresses() {
        let mut table = ConnectionTable::default();
        assert!(table.is_empty());
        table.mark_connected(7);
        assert!(table.is_connected(7));
        assert_eq!(table.state(8), None);
        assert_eq!(table.snapshot(), vec![(7, Connection::Connected)]);
    }
}

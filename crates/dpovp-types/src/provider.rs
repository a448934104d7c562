//! Traits through which the engine reaches its collaborators, with
//! in-memory implementations for tools and tests.

use crate::Header;
use alloy_primitives::{keccak256, Address, B256, U256};
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

/// Read access to the header chain.
pub trait ChainReader: Send + Sync {
    /// Fetch a header by hash, verifying it sits at `number`.
    fn get_header(&self, hash: B256, number: u64) -> Option<Header>;
}

/// Balance-credit sink for the block reward.
pub trait StateStore: Send {
    /// Credit `amount` to `address`.
    fn add_balance(&mut self, address: Address, amount: U256);

    /// Compute the state root over the current balances.
    fn intermediate_root(&mut self, delete_empty_accounts: bool) -> B256;
}

/// Hash-indexed header store backed by a map.
#[derive(Debug, Default)]
pub struct MemoryChain {
    headers: RwLock<HashMap<B256, Header>>,
}

impl MemoryChain {
    /// Create an empty chain index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a header, returning its hash.
    pub fn insert(&self, header: Header) -> B256 {
        let hash = header.hash_slow();
        self.headers.write().unwrap().insert(hash, header);
        hash
    }

    /// Number of stored headers.
    pub fn len(&self) -> usize {
        self.headers.read().unwrap().len()
    }

    /// Whether the index holds no headers.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ChainReader for MemoryChain {
    fn get_header(&self, hash: B256, number: u64) -> Option<Header> {
        let headers = self.headers.read().unwrap();
        headers.get(&hash).filter(|header| header.number == number).cloned()
    }
}

/// Balance map with a deterministic digest standing in for a state trie.
#[derive(Debug, Default)]
pub struct MemoryState {
    balances: BTreeMap<Address, U256>,
}

impl MemoryState {
    /// Create an empty state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current balance of `address`.
    pub fn balance_of(&self, address: &Address) -> U256 {
        self.balances.get(address).copied().unwrap_or_default()
    }
}

impl StateStore for MemoryState {
    fn add_balance(&mut self, address: Address, amount: U256) {
        let balance = self.balances.entry(address).or_default();
        *balance = balance.saturating_add(amount);
    }

    fn intermediate_root(&mut self, delete_empty_accounts: bool) -> B256 {
        if delete_empty_accounts {
            self.balances.retain(|_, balance| !balance.is_zero());
        }
        // BTreeMap iteration is address-ordered, so the digest is stable.
        let mut preimage = Vec::with_capacity(self.balances.len() * 52);
        for (address, balance) in &self.balances {
            preimage.extend_from_slice(address.as_slice());
            preimage.extend_from_slice(&balance.to_be_bytes::<32>());
        }
        keccak256(preimage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_lookup_requires_matching_number() {
        let chain = MemoryChain::new();
        let header = Header { number: 4, ..Default::default() };
        let hash = chain.insert(header);

        assert!(chain.get_header(hash, 4).is_some());
        assert!(chain.get_header(hash, 5).is_none());
        assert!(chain.get_header(B256::ZERO, 4).is_none());
    }

    #[test]
    fn state_root_changes_with_balances() {
        let mut state = MemoryState::new();
        let empty = state.intermediate_root(true);

        state.add_balance(Address::repeat_byte(0x01), U256::from(10));
        let credited = state.intermediate_root(true);
        assert_ne!(empty, credited);

        // crediting the same account again moves the root
        state.add_balance(Address::repeat_byte(0x01), U256::from(10));
        assert_ne!(credited, state.intermediate_root(true));
    }

    #[test]
    fn empty_accounts_are_dropped() {
        let mut state = MemoryState::new();
        state.add_balance(Address::repeat_byte(0x02), U256::ZERO);
        let pruned = state.intermediate_root(true);

        let mut fresh = MemoryState::new();
        assert_eq!(pruned, fresh.intermediate_root(true));
    }
}

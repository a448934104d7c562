//! The star-node roster: the ordered set of producers.
//!
//! The roster is loaded once at startup from the node's data directory
//! and treated as immutable while the engine runs; changing it requires a
//! restart. The engine receives it as an `Arc` and never reaches into
//! global state.

use crate::signer::ProducerKey;
use alloy_primitives::{hex, Address};
use anyhow::{anyhow, bail, Context};
use secp256k1::SecretKey;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::info;

/// File inside the data directory holding the ordered producer list.
pub const ROSTER_FILE: &str = "starnodes.json";

/// File inside the data directory holding the local hex-encoded secret key.
pub const NODE_KEY_FILE: &str = "nodekey";

/// A single producer record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StarNode {
    /// The producer's coinbase address.
    pub address: Address,
    /// The producer's uncompressed public key, format byte stripped.
    pub pubkey: ProducerKey,
}

/// Ordered set of star nodes with O(1) lookup by address.
#[derive(Debug, Clone, Default)]
pub struct Roster {
    nodes: Vec<StarNode>,
    index: HashMap<Address, usize>,
}

impl Roster {
    /// Build a roster from an ordered node list. Order fixes the canonical
    /// indices, so duplicates are rejected.
    pub fn new(nodes: Vec<StarNode>) -> anyhow::Result<Self> {
        let mut index = HashMap::with_capacity(nodes.len());
        for (i, node) in nodes.iter().enumerate() {
            if index.insert(node.address, i).is_some() {
                bail!("duplicate star node address {}", node.address);
            }
        }
        Ok(Self { nodes, index })
    }

    /// Load the roster from `dir/starnodes.json`.
    pub fn load(dir: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = dir.as_ref().join(ROSTER_FILE);
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("reading star node list from {}", path.display()))?;
        let nodes: Vec<StarNode> =
            serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
        let roster = Self::new(nodes)?;
        info!(nodes = roster.len(), path = %path.display(), "loaded star node roster");
        Ok(roster)
    }

    /// Number of producers.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the roster is empty.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Canonical index of `address`, if it is a star node.
    pub fn index_of(&self, address: &Address) -> Option<usize> {
        self.index.get(address).copied()
    }

    /// Whether `address` is a star node.
    pub fn contains(&self, address: &Address) -> bool {
        self.index.contains_key(address)
    }

    /// Public key on record for `address`.
    pub fn pubkey_of(&self, address: &Address) -> Option<&ProducerKey> {
        self.index_of(address).map(|i| &self.nodes[i].pubkey)
    }

    /// The record at canonical index `i`.
    pub fn get(&self, i: usize) -> Option<&StarNode> {
        self.nodes.get(i)
    }

    /// Iterate the records in canonical order.
    pub fn iter(&self) -> impl Iterator<Item = &StarNode> {
        self.nodes.iter()
    }

    /// Rotational distance from `parent` to `child` on the producer ring.
    ///
    /// `0` means the same producer twice in a row, `1` the immediate
    /// successor. `None` if either address is not a star node.
    pub fn slot(&self, parent: &Address, child: &Address) -> Option<u64> {
        let i = self.index_of(parent)?;
        let j = self.index_of(child)?;
        if i == j {
            return Some(0);
        }
        let n = self.nodes.len();
        Some(((j + n - i - 1) % n + 1) as u64)
    }
}

/// Load the local producer secret key from `dir/nodekey` (hex, with or
/// without a `0x` prefix).
pub fn load_node_key(dir: impl AsRef<Path>) -> anyhow::Result<SecretKey> {
    let path = dir.as_ref().join(NODE_KEY_FILE);
    let raw = fs::read_to_string(&path)
        .with_context(|| format!("reading node key from {}", path.display()))?;
    let bytes = hex::decode(raw.trim().trim_start_matches("0x"))
        .with_context(|| format!("decoding {}", path.display()))?;
    SecretKey::from_slice(&bytes).map_err(|e| anyhow!("invalid node key: {e}"))
}

//! Block header type.

use alloy_primitives::{b256, keccak256, Address, Bytes, B256, B64, U256};
use alloy_rlp::RlpEncodable;
use serde::{Deserialize, Serialize};

/// Hash of the RLP encoding of an empty uncle list.
pub const EMPTY_UNCLE_HASH: B256 =
    b256!("1dcc4de8dec75d7aab85b567b6ccd41ad312451b948a7413f0a142fd40d49347");

/// Length of a sealed header's `sign_info`: 64 bytes of `(r, s)` plus one
/// recovery id byte.
pub const SIGN_INFO_LENGTH: usize = 65;

/// A block header.
///
/// The producer's identity lives in `coinbase`; `sign_info` carries a
/// recoverable signature over `keccak256(coinbase)` once the header has
/// been sealed. `nonce` and `mix_digest` are reserved and stay zero.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, RlpEncodable)]
pub struct Header {
    /// Hash of the parent header.
    pub parent_hash: B256,
    /// Hash of the (always empty) uncle list.
    pub uncle_hash: B256,
    /// Producer address: reward recipient and signer identity.
    pub coinbase: Address,
    /// Post-finalization state root.
    pub root: B256,
    /// Block height; 0 is genesis.
    pub number: u64,
    /// Always the constant 1.
    pub difficulty: U256,
    /// Production time in UNIX seconds, as claimed by the producer.
    pub time: u64,
    /// Reserved, must be zero.
    pub nonce: B64,
    /// Reserved, must be zero.
    pub mix_digest: B256,
    /// Recoverable producer signature over `keccak256(coinbase)`.
    pub sign_info: Bytes,
}

impl Header {
    /// Keccak256 of the RLP-encoded header. Recomputed on every call.
    pub fn hash_slow(&self) -> B256 {
        keccak256(alloy_rlp::encode(self))
    }

    /// Whether this header is the genesis header.
    pub fn is_genesis(&self) -> bool {
        self.number == 0
    }
}

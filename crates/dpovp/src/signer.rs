//! Producer signatures.
//!
//! DPoVP seals bind the block to the producer's identity, not to its
//! content: the signed digest is `keccak256(coinbase)`. Verification
//! recovers the public key from the 65-byte `sign_info` and compares it
//! against the roster record for the coinbase.

use crate::error::{DpovpError, DpovpResult};
use alloy_primitives::{keccak256, Address, FixedBytes};
use dpovp_types::SIGN_INFO_LENGTH;
use secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use secp256k1::{Message, PublicKey, Secp256k1, SecretKey};
use std::fmt;

/// An uncompressed secp256k1 public key with the format byte stripped.
pub type ProducerKey = FixedBytes<64>;

/// Sign `keccak256(coinbase)` with `secret`, producing the 65-byte
/// `sign_info` payload: `(r, s)` followed by the recovery id.
pub fn sign_coinbase(secret: &SecretKey, coinbase: &Address) -> [u8; SIGN_INFO_LENGTH] {
    let digest = keccak256(coinbase.as_slice());
    let message = Message::from_digest(digest.0);
    let signature = Secp256k1::new().sign_ecdsa_recoverable(&message, secret);
    let (recovery_id, compact) = signature.serialize_compact();

    let mut sign_info = [0u8; SIGN_INFO_LENGTH];
    sign_info[..64].copy_from_slice(&compact);
    sign_info[64] = recovery_id.to_i32() as u8;
    sign_info
}

/// Recover the producer key that signed `keccak256(coinbase)`.
///
/// Returns the uncompressed key minus its leading format byte, the form
/// the roster stores. Any malformed input is a `BadSignature`.
pub fn recover_producer(coinbase: &Address, sign_info: &[u8]) -> DpovpResult<ProducerKey> {
    if sign_info.len() != SIGN_INFO_LENGTH {
        return Err(DpovpError::BadSignature);
    }
    let recovery_id =
        RecoveryId::from_i32(sign_info[64] as i32).map_err(|_| DpovpError::BadSignature)?;
    let signature = RecoverableSignature::from_compact(&sign_info[..64], recovery_id)
        .map_err(|_| DpovpError::BadSignature)?;

    let digest = keccak256(coinbase.as_slice());
    let message = Message::from_digest(digest.0);
    let pubkey = Secp256k1::new()
        .recover_ecdsa(&message, &signature)
        .map_err(|_| DpovpError::BadSignature)?;

    Ok(ProducerKey::from_slice(&pubkey.serialize_uncompressed()[1..]))
}

/// Derive the address of a producer key: `keccak256(key)[12..]`.
pub fn producer_address(key: &ProducerKey) -> Address {
    Address::from_slice(&keccak256(key.as_slice())[12..])
}

/// The producer key belonging to `secret`.
pub fn producer_key(secret: &SecretKey) -> ProducerKey {
    let pubkey = PublicKey::from_secret_key(&Secp256k1::new(), secret);
    ProducerKey::from_slice(&pubkey.serialize_uncompressed()[1..])
}

/// The locally loaded producer key, paired with its derived address.
#[derive(Clone, Copy)]
pub struct NodeSigner {
    secret: SecretKey,
    address: Address,
}

impl NodeSigner {
    /// Wrap a secret key, deriving its producer address.
    pub fn new(secret: SecretKey) -> Self {
        let address = producer_address(&producer_key(&secret));
        Self { secret, address }
    }

    /// Address derived from the wrapped key.
    pub fn address(&self) -> Address {
        self.address
    }

    /// Sign `keccak256(coinbase)`.
    pub fn sign(&self, coinbase: &Address) -> [u8; SIGN_INFO_LENGTH] {
        sign_coinbase(&self.secret, coinbase)
    }
}

impl fmt::Debug for NodeSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeSigner").field("address", &self.address).finish_non_exhaustive()
    }
}

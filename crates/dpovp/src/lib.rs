//! DPoVP consensus engine.
//!
//! A deterministic, rotating, signature-authenticated block-production
//! protocol for permissioned chains whose producers (star nodes) are a
//! known, ordered set. The engine decides which star node is entitled to
//! produce the next block and when, and enforces those rules on incoming
//! headers by checking the producer's signature and the timing discipline
//! against the parent header.
//!
//! Producers take `timeout`-length turns on a rotating ring; a full
//! rotation is one loop. A header is accepted when its producer signed
//! `keccak256(coinbase)` with the key on record and its timestamp falls
//! inside the window the rotation grants that producer relative to the
//! parent. Every block carries difficulty 1, so chain work is the block
//! number.

#![cfg_attr(not(test), warn(unused_crate_dependencies))]

pub mod config;
pub mod engine;
pub mod error;
pub mod roster;
pub mod signer;
pub mod testing;
pub mod worker;

pub use config::{ChainConfig, DpovpConfig, BLOCK_REWARD};
pub use engine::{BatchVerification, Dpovp, Engine, BLOCK_DIFFICULTY};
pub use error::{DpovpError, DpovpResult};
pub use roster::{load_node_key, Roster, StarNode};
pub use signer::{NodeSigner, ProducerKey};
pub use worker::{BlockAssembler, SealService};

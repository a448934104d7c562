//! Error types for the DPoVP engine.

use alloy_primitives::{Address, B256, U256};
use thiserror::Error;

/// Result type for DPoVP operations.
pub type DpovpResult<T> = Result<T, DpovpError>;

/// Errors produced by header verification and sealing.
///
/// Verification errors are reported to the caller and never retried
/// inside the engine; a failed seal is fatal for that attempt only.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DpovpError {
    /// Header height cannot be verified against a parent.
    #[error("header has no verifiable number")]
    InvalidNumber,

    /// Header difficulty differs from the required constant 1.
    #[error("block difficulty {got} is not 1")]
    InvalidDifficulty {
        /// The difficulty the header carried.
        got: U256,
    },

    /// Header claims a production time ahead of the local clock.
    #[error("block time {time} is ahead of local clock {now}")]
    FutureBlock {
        /// The header's timestamp, UNIX seconds.
        time: u64,
        /// The local clock at verification time, UNIX seconds.
        now: u64,
    },

    /// Parent header is missing, misnumbered or misrooted.
    #[error("unknown ancestor [hash={hash}, number={number}]")]
    UnknownAncestor {
        /// Expected parent hash.
        hash: B256,
        /// Expected parent height.
        number: u64,
    },

    /// Signature recovery failed or the recovered key is wrong.
    #[error("header signature does not match its producer")]
    BadSignature,

    /// The named address has no star-node record.
    #[error("producer {address} is not a star node")]
    UnknownProducer {
        /// The producer address in question.
        address: Address,
    },

    /// Block was produced before the minimum inter-block gap elapsed.
    #[error("block gap {gap_ms}ms is below the {min_ms}ms minimum")]
    TooSoon {
        /// Observed gap to the parent, milliseconds.
        gap_ms: i64,
        /// Configured minimum gap, milliseconds.
        min_ms: u64,
    },

    /// Block was produced outside its producer's rotation window.
    #[error("producer at slot {slot} is out of turn (gap {gap_ms}ms)")]
    OutOfTurn {
        /// Rotational distance from the parent's producer.
        slot: u64,
        /// Observed gap to the parent, milliseconds.
        gap_ms: i64,
    },

    /// Block carries uncle headers.
    #[error("{count} uncle headers present, none allowed")]
    UnclesNotAllowed {
        /// Number of uncles found.
        count: usize,
    },

    /// The local coinbase is not entitled to seal.
    #[error("local coinbase {address} is not in the star node list")]
    NotAProducer {
        /// The local coinbase.
        address: Address,
    },

    /// Sealing the genesis block is not supported.
    #[error("refusing to seal the genesis block")]
    CannotSealGenesis,

    /// Engine parameters are inconsistent.
    #[error("configuration error: {0}")]
    Configuration(String),
}

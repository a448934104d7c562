//! The DPoVP consensus engine.
//!
//! The engine is a collection of pure functions over immutable headers:
//! instances hold read-only configuration, the shared roster and the local
//! signer. The only runtime-mutable field is the coinbase cell, swapped
//! atomically so concurrent `seal` and `prepare` callers observe the most
//! recent producer identity. There is no internal worker and no timer.

use crate::config::{DpovpConfig, BLOCK_REWARD};
use crate::error::{DpovpError, DpovpResult};
use crate::roster::Roster;
use crate::signer::{self, NodeSigner};
use alloy_primitives::{Address, Bytes, B256, B64, U256};
use arc_swap::ArcSwap;
use dpovp_types::{Block, ChainReader, Header, Receipt, StateStore, Transaction, EMPTY_UNCLE_HASH};
use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Difficulty carried by every valid header. Chain work is strictly
/// monotone in block number.
pub const BLOCK_DIFFICULTY: U256 = U256::from_limbs([1, 0, 0, 0]);

/// Current wall clock, UNIX seconds.
pub(crate) fn unix_now() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs()
}

/// Handle to an in-flight batched verification.
///
/// Results arrive in input order, one per submitted header; a failed
/// header does not abort the rest of the batch. After [`abort`] no
/// further results are emitted.
///
/// [`abort`]: BatchVerification::abort
#[derive(Debug)]
pub struct BatchVerification {
    cancel: CancellationToken,
    results: mpsc::Receiver<DpovpResult<()>>,
}

impl BatchVerification {
    pub(crate) fn from_parts(
        cancel: CancellationToken,
        results: mpsc::Receiver<DpovpResult<()>>,
    ) -> Self {
        Self { cancel, results }
    }

    /// Receive the next verdict, `None` once the batch is exhausted or
    /// aborted.
    pub async fn recv(&mut self) -> Option<DpovpResult<()>> {
        self.results.recv().await
    }

    /// Stop the verification task. One-shot; further results are dropped.
    pub fn abort(&self) {
        self.cancel.cancel();
    }

    /// A clone of the cancellation token driving this batch.
    pub fn cancel_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

/// The consensus engine capability.
///
/// [`Dpovp`] is the production implementation; the doubles in
/// [`crate::testing`] stub verification out in documented ways.
pub trait Engine: fmt::Debug + Send + Sync {
    /// The address that authored `header`.
    fn author(&self, header: &Header) -> Address {
        header.coinbase
    }

    /// Verify a single header against the chain.
    fn verify_header(&self, chain: &dyn ChainReader, header: &Header) -> DpovpResult<()>;

    /// Verify a contiguous batch of headers concurrently with the caller.
    ///
    /// Parent lookup prefers the in-batch prefix, so a well-formed batch
    /// costs one chain-reader query at most (for the first header).
    fn verify_headers(
        self: Arc<Self>,
        chain: Arc<dyn ChainReader>,
        headers: Vec<Header>,
    ) -> BatchVerification;

    /// Reject any block carrying uncle headers.
    fn verify_uncles(&self, block: &Block) -> DpovpResult<()> {
        if block.uncles.is_empty() {
            Ok(())
        } else {
            Err(DpovpError::UnclesNotAllowed { count: block.uncles.len() })
        }
    }

    /// Check only the cryptographic seal: the recovered signer address
    /// must equal the coinbase. Does not consult the roster.
    fn verify_seal(&self, header: &Header) -> DpovpResult<()>;

    /// Stamp the consensus fields on a worker-provided header template.
    fn prepare(&self, chain: &dyn ChainReader, header: &mut Header) -> DpovpResult<()>;

    /// Credit the block reward, close the header and assemble the block.
    fn finalize(
        &self,
        header: Header,
        state: &mut dyn StateStore,
        transactions: Vec<Transaction>,
        receipts: Vec<Receipt>,
    ) -> Block;

    /// Sign the block with the local producer key.
    fn seal(&self, block: Block, cancel: CancellationToken) -> DpovpResult<Block>;

    /// The difficulty a new block should have: always 1.
    fn calc_difficulty(&self, _time: u64, _parent: &Header) -> U256 {
        BLOCK_DIFFICULTY
    }
}

/// Production DPoVP engine.
#[derive(Debug)]
pub struct Dpovp {
    config: DpovpConfig,
    roster: Arc<Roster>,
    signer: NodeSigner,
    coinbase: ArcSwap<Address>,
}

impl Dpovp {
    /// Build an engine. The coinbase starts out as the signer's own
    /// address and can be moved with [`set_coinbase`].
    ///
    /// [`set_coinbase`]: Dpovp::set_coinbase
    pub fn new(config: DpovpConfig, roster: Arc<Roster>, signer: NodeSigner) -> DpovpResult<Self> {
        config.validate()?;
        let coinbase = signer.address();
        Ok(Self { config, roster, signer, coinbase: ArcSwap::from_pointee(coinbase) })
    }

    /// Update the local producer identity.
    pub fn set_coinbase(&self, coinbase: Address) {
        self.coinbase.store(Arc::new(coinbase));
    }

    /// The current local producer identity.
    pub fn coinbase(&self) -> Address {
        **self.coinbase.load()
    }

    /// The engine's timing parameters.
    pub fn config(&self) -> &DpovpConfig {
        &self.config
    }

    /// The producer roster this engine validates against.
    pub fn roster(&self) -> &Arc<Roster> {
        &self.roster
    }

    /// Verify `header`, trying `ancestors` (ascending order) before the
    /// chain reader when locating the parent.
    fn verify_with_ancestors(
        &self,
        chain: &dyn ChainReader,
        header: &Header,
        ancestors: &[Header],
    ) -> DpovpResult<()> {
        if header.number == 0 {
            debug!("verify: candidate at height 0 has no parent");
            return Err(DpovpError::InvalidNumber);
        }
        if header.difficulty != BLOCK_DIFFICULTY {
            return Err(DpovpError::InvalidDifficulty { got: header.difficulty });
        }
        let number = header.number;
        debug!(number, hash = %header.hash_slow(), "verifying header");

        let parent = ancestors
            .iter()
            .find(|a| a.hash_slow() == header.parent_hash)
            .cloned()
            .or_else(|| chain.get_header(header.parent_hash, number - 1));
        let parent = match parent {
            Some(parent)
                if parent.number == number - 1 && parent.hash_slow() == header.parent_hash =>
            {
                parent
            }
            _ => {
                debug!(number, "verify: parent not found");
                return Err(DpovpError::UnknownAncestor {
                    hash: header.parent_hash,
                    number: number - 1,
                });
            }
        };

        // Don't waste time on blocks from the future.
        let now = unix_now();
        if header.time > now {
            debug!(time = header.time, now, "verify: block from the future");
            return Err(DpovpError::FutureBlock { time: header.time, now });
        }

        // The seal must recover to the key on record for the coinbase.
        let recovered = signer::recover_producer(&header.coinbase, &header.sign_info)?;
        let expected = self
            .roster
            .pubkey_of(&header.coinbase)
            .ok_or(DpovpError::UnknownProducer { address: header.coinbase })?;
        if *expected != recovered {
            debug!(coinbase = %header.coinbase, "verify: signer key mismatch");
            return Err(DpovpError::BadSignature);
        }

        if parent.number == 0 {
            debug!("verify: parent is genesis, rotation not checked");
            return Ok(());
        }
        self.verify_rotation(&parent, header)
    }

    /// The rotation and timing rule table.
    ///
    /// All arithmetic is in signed milliseconds; `gap` folds into one
    /// loop (`N * timeout`) when the producer has lapped the ring.
    fn verify_rotation(&self, parent: &Header, header: &Header) -> DpovpResult<()> {
        let timeout = self.config.timeout as i64;
        let sleeptime = self.config.sleeptime as i64;
        let gap = (header.time as i64 - parent.time as i64) * 1000;

        if gap < sleeptime {
            debug!(gap, sleeptime, "verify: block not enough newer than its parent");
            return Err(DpovpError::TooSoon { gap_ms: gap, min_ms: self.config.sleeptime });
        }

        let node_count = self.roster.len() as i64;
        if node_count == 1 {
            // a solo producer only observes the minimum gap
            return Ok(());
        }

        let one_loop = node_count * timeout;
        let slot = self
            .roster
            .slot(&parent.coinbase, &header.coinbase)
            .ok_or(DpovpError::UnknownProducer { address: parent.coinbase })?;
        debug!(gap, slot, one_loop, "verify: rotation check");

        let in_turn = match slot {
            // same producer again: every other turn of the loop must have
            // timed out first
            0 => gap % one_loop >= one_loop - timeout,
            // immediate successor: its own window in the current loop, or
            // the head of any later loop
            1 => {
                if gap < one_loop {
                    gap >= sleeptime && gap < timeout
                } else {
                    gap % one_loop < timeout
                }
            }
            // further down the ring: the folded gap must land in the
            // window reserved s - 1 turns after the successor's
            s => (gap % one_loop) / timeout == s as i64 - 1,
        };
        if in_turn {
            Ok(())
        } else {
            debug!(gap, slot, "verify: producer out of turn");
            Err(DpovpError::OutOfTurn { slot, gap_ms: gap })
        }
    }
}

impl Engine for Dpovp {
    fn verify_header(&self, chain: &dyn ChainReader, header: &Header) -> DpovpResult<()> {
        self.verify_with_ancestors(chain, header, &[])
    }

    fn verify_headers(
        self: Arc<Self>,
        chain: Arc<dyn ChainReader>,
        headers: Vec<Header>,
    ) -> BatchVerification {
        let cancel = CancellationToken::new();
        let (results_tx, results) = mpsc::channel(headers.len().max(1));
        let token = cancel.clone();
        debug!(headers = headers.len(), "starting batched header verification");

        tokio::spawn(async move {
            for i in 0..headers.len() {
                let verdict = self.verify_with_ancestors(chain.as_ref(), &headers[i], &headers[..i]);
                tokio::select! {
                    // an abort must win over a ready send
                    biased;
                    _ = token.cancelled() => return,
                    sent = results_tx.send(verdict) => {
                        if sent.is_err() {
                            return;
                        }
                    }
                }
            }
        });

        BatchVerification { cancel, results }
    }

    fn verify_seal(&self, header: &Header) -> DpovpResult<()> {
        let recovered = signer::recover_producer(&header.coinbase, &header.sign_info)?;
        let signer_address = signer::producer_address(&recovered);
        if signer_address != header.coinbase {
            debug!(coinbase = %header.coinbase, %signer_address, "seal signer mismatch");
            return Err(DpovpError::BadSignature);
        }
        Ok(())
    }

    fn prepare(&self, chain: &dyn ChainReader, header: &mut Header) -> DpovpResult<()> {
        let parent_number = header.number.checked_sub(1).ok_or(DpovpError::InvalidNumber)?;
        if chain.get_header(header.parent_hash, parent_number).is_none() {
            return Err(DpovpError::UnknownAncestor {
                hash: header.parent_hash,
                number: parent_number,
            });
        }
        // nonce and mix digest are reserved, kept empty
        header.nonce = B64::ZERO;
        header.mix_digest = B256::ZERO;
        header.difficulty = BLOCK_DIFFICULTY;
        header.time = unix_now();
        Ok(())
    }

    fn finalize(
        &self,
        mut header: Header,
        state: &mut dyn StateStore,
        transactions: Vec<Transaction>,
        receipts: Vec<Receipt>,
    ) -> Block {
        state.add_balance(header.coinbase, BLOCK_REWARD);
        header.root = state.intermediate_root(true);
        header.uncle_hash = EMPTY_UNCLE_HASH;
        Block::new(header, transactions, Vec::new(), receipts)
    }

    /// Signing is instantaneous, so the cancellation token is advisory
    /// here; wait-until-turn logic lives in the seal service.
    fn seal(&self, block: Block, _cancel: CancellationToken) -> DpovpResult<Block> {
        let coinbase = self.coinbase();
        if !self.roster.contains(&coinbase) {
            debug!(%coinbase, "seal: coinbase is not a star node");
            return Err(DpovpError::NotAProducer { address: coinbase });
        }
        let mut header = block.header.clone();
        if header.number == 0 {
            return Err(DpovpError::CannotSealGenesis);
        }
        header.sign_info = Bytes::copy_from_slice(&self.signer.sign(&coinbase));
        Ok(block.with_seal(header))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roster::StarNode;
    use crate::signer::{producer_address, producer_key};
    use dpovp_types::MemoryChain;
    use secp256k1::SecretKey;

    fn engine_with_nodes(n: usize) -> (Arc<Dpovp>, Vec<SecretKey>) {
        let secrets: Vec<SecretKey> =
            (0..n).map(|_| SecretKey::new(&mut rand::thread_rng())).collect();
        let nodes = secrets
            .iter()
            .map(|secret| {
                let pubkey = producer_key(secret);
                StarNode { address: producer_address(&pubkey), pubkey }
            })
            .collect();
        let roster = Arc::new(Roster::new(nodes).unwrap());
        let signer = NodeSigner::new(secrets[0]);
        (Arc::new(Dpovp::new(DpovpConfig::default(), roster, signer).unwrap()), secrets)
    }

    #[test]
    fn author_is_the_coinbase() {
        let (engine, _) = engine_with_nodes(1);
        let header = Header { coinbase: Address::repeat_byte(0x07), ..Default::default() };
        assert_eq!(engine.author(&header), header.coinbase);
    }

    #[test]
    fn difficulty_is_constant() {
        let (engine, _) = engine_with_nodes(2);
        let parent = Header::default();
        assert_eq!(engine.calc_difficulty(12345, &parent), U256::from(1));
    }

    #[test]
    fn uncles_are_rejected() {
        let (engine, _) = engine_with_nodes(1);
        let mut block = Block::default();
        assert!(engine.verify_uncles(&block).is_ok());

        block.uncles.push(Header::default());
        assert_eq!(
            engine.verify_uncles(&block),
            Err(DpovpError::UnclesNotAllowed { count: 1 })
        );
    }

    #[test]
    fn prepare_stamps_consensus_fields() {
        let (engine, _) = engine_with_nodes(1);
        let chain = MemoryChain::new();
        let parent = Header { number: 3, time: 1, ..Default::default() };
        let parent_hash = chain.insert(parent);

        let mut template = Header {
            number: 4,
            parent_hash,
            difficulty: U256::from(99),
            nonce: B64::repeat_byte(0xff),
            mix_digest: B256::repeat_byte(0xff),
            ..Default::default()
        };
        engine.prepare(&chain, &mut template).unwrap();

        assert_eq!(template.difficulty, BLOCK_DIFFICULTY);
        assert_eq!(template.nonce, B64::ZERO);
        assert_eq!(template.mix_digest, B256::ZERO);
        assert!(template.time > 0);
    }

    #[test]
    fn prepare_requires_a_known_parent() {
        let (engine, _) = engine_with_nodes(1);
        let chain = MemoryChain::new();
        let mut template = Header { number: 4, ..Default::default() };
        assert!(matches!(
            engine.prepare(&chain, &mut template),
            Err(DpovpError::UnknownAncestor { .. })
        ));
    }

    #[test]
    fn finalize_credits_the_reward() {
        let (engine, _) = engine_with_nodes(1);
        let coinbase = engine.coinbase();
        let mut state = dpovp_types::MemoryState::new();

        let header = Header { number: 1, coinbase, ..Default::default() };
        let block = engine.finalize(header, &mut state, Vec::new(), Vec::new());

        assert_eq!(state.balance_of(&coinbase), BLOCK_REWARD);
        assert_eq!(block.header.uncle_hash, EMPTY_UNCLE_HASH);
        assert_eq!(block.header.root, state.intermediate_root(true));
        assert!(block.uncles.is_empty());
    }

    #[test]
    fn seal_signs_with_the_local_key() {
        let (engine, _) = engine_with_nodes(2);
        let block = Block::new(
            Header { number: 1, coinbase: engine.coinbase(), ..Default::default() },
            Vec::new(),
            Vec::new(),
            Vec::new(),
        );
        let sealed = engine.seal(block, CancellationToken::new()).unwrap();
        assert_eq!(sealed.header.sign_info.len(), dpovp_types::SIGN_INFO_LENGTH);
        engine.verify_seal(&sealed.header).unwrap();
    }

    #[test]
    fn seal_refuses_genesis_and_outsiders() {
        let (engine, _) = engine_with_nodes(2);

        let genesis = Block::new(
            Header { number: 0, coinbase: engine.coinbase(), ..Default::default() },
            Vec::new(),
            Vec::new(),
            Vec::new(),
        );
        assert_eq!(
            engine.seal(genesis, CancellationToken::new()),
            Err(DpovpError::CannotSealGenesis)
        );

        engine.set_coinbase(Address::repeat_byte(0xaa));
        let block = Block::new(
            Header { number: 1, ..Default::default() },
            Vec::new(),
            Vec::new(),
            Vec::new(),
        );
        assert_eq!(
            engine.seal(block, CancellationToken::new()),
            Err(DpovpError::NotAProducer { address: Address::repeat_byte(0xaa) })
        );
    }

    #[test]
    fn coinbase_cell_swaps_atomically() {
        let (engine, _) = engine_with_nodes(1);
        let original = engine.coinbase();
        let replacement = Address::repeat_byte(0x55);
        engine.set_coinbase(replacement);
        assert_eq!(engine.coinbase(), replacement);
        assert_ne!(engine.coinbase(), original);
    }
}

//! Non-verifying engine doubles.
//!
//! These implement the [`Engine`] capability with verification stubbed
//! out, for components that embed an engine but are not exercising the
//! consensus rules. They are testing collaborators, not protocol
//! variants. Bypass rules per constructor:
//!
//! - [`full_faker`] accepts every header without looking at it.
//! - [`faker`] accepts every header that carries a 65-byte seal.
//! - [`fake_failer`] accepts everything except the single named height.
//! - [`fake_delayer`] sleeps before returning success.
//! - [`shared`] hands out one process-wide accept-everything instance.

use crate::config::BLOCK_REWARD;
use crate::engine::{BatchVerification, Engine, BLOCK_DIFFICULTY};
use crate::error::{DpovpError, DpovpResult};
use alloy_primitives::{Bytes, B256, B64};
use dpovp_types::{
    Block, ChainReader, Header, Receipt, StateStore, Transaction, EMPTY_UNCLE_HASH,
    SIGN_INFO_LENGTH,
};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// An engine that skips consensus verification.
#[derive(Debug, Clone, Default)]
pub struct FakeEngine {
    check_seal: bool,
    fail_at: Option<u64>,
    delay: Option<Duration>,
}

/// Accepts every header that carries a 65-byte seal; rotation, timing
/// and roster membership are not checked.
pub fn faker() -> FakeEngine {
    FakeEngine { check_seal: true, ..Default::default() }
}

/// Accepts every header without checking anything at all.
pub fn full_faker() -> FakeEngine {
    FakeEngine::default()
}

/// Accepts every header except the one at height `fail`.
pub fn fake_failer(fail: u64) -> FakeEngine {
    FakeEngine { fail_at: Some(fail), ..Default::default() }
}

/// Accepts every header after sleeping `delay`.
pub fn fake_delayer(delay: Duration) -> FakeEngine {
    FakeEngine { delay: Some(delay), ..Default::default() }
}

/// The process-wide shared accept-everything instance.
pub fn shared() -> Arc<FakeEngine> {
    static SHARED: OnceLock<Arc<FakeEngine>> = OnceLock::new();
    SHARED.get_or_init(|| Arc::new(full_faker())).clone()
}

impl FakeEngine {
    fn verdict(&self, header: &Header) -> DpovpResult<()> {
        if self.fail_at == Some(header.number) {
            return Err(DpovpError::Configuration(format!(
                "scheduled verification failure at block {}",
                header.number
            )));
        }
        if self.check_seal && header.sign_info.len() != SIGN_INFO_LENGTH {
            return Err(DpovpError::BadSignature);
        }
        Ok(())
    }
}

impl Engine for FakeEngine {
    fn verify_header(&self, _chain: &dyn ChainReader, header: &Header) -> DpovpResult<()> {
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        self.verdict(header)
    }

    fn verify_headers(
        self: Arc<Self>,
        _chain: Arc<dyn ChainReader>,
        headers: Vec<Header>,
    ) -> BatchVerification {
        let cancel = CancellationToken::new();
        let (results_tx, results) = mpsc::channel(headers.len().max(1));
        let token = cancel.clone();

        tokio::spawn(async move {
            for header in &headers {
                if let Some(delay) = self.delay {
                    tokio::time::sleep(delay).await;
                }
                let verdict = self.verdict(header);
                tokio::select! {
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

        BatchVerification::from_parts(cancel, results)
    }

    fn verify_seal(&self, header: &Header) -> DpovpResult<()> {
        self.verdict(header)
    }

    fn prepare(&self, _chain: &dyn ChainReader, header: &mut Header) -> DpovpResult<()> {
        header.nonce = B64::ZERO;
        header.mix_digest = B256::ZERO;
        header.difficulty = BLOCK_DIFFICULTY;
        header.time = crate::engine::unix_now();
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

    /// Places an all-zero 65-byte seal, which this double's own
    /// [`verify_seal`](Engine::verify_seal) accepts.
    fn seal(&self, block: Block, _cancel: CancellationToken) -> DpovpResult<Block> {
        let mut header = block.header.clone();
        if header.number == 0 {
            return Err(DpovpError::CannotSealGenesis);
        }
        header.sign_info = Bytes::from(vec![0u8; SIGN_INFO_LENGTH]);
        Ok(block.with_seal(header))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dpovp_types::MemoryChain;

    fn sealed_header(number: u64) -> Header {
        Header {
            number,
            sign_info: Bytes::from(vec![0u8; SIGN_INFO_LENGTH]),
            ..Default::default()
        }
    }

    #[test]
    fn full_faker_accepts_anything() {
        let engine = full_faker();
        let chain = MemoryChain::new();
        assert!(engine.verify_header(&chain, &Header::default()).is_ok());
        assert!(engine.verify_seal(&Header::default()).is_ok());
    }

    #[test]
    fn faker_requires_a_seal() {
        let engine = faker();
        let chain = MemoryChain::new();
        assert_eq!(
            engine.verify_header(&chain, &Header::default()),
            Err(DpovpError::BadSignature)
        );
        assert!(engine.verify_header(&chain, &sealed_header(1)).is_ok());
    }

    #[test]
    fn failer_rejects_only_its_height() {
        let engine = fake_failer(5);
        let chain = MemoryChain::new();
        assert!(engine.verify_header(&chain, &sealed_header(4)).is_ok());
        assert!(engine.verify_header(&chain, &sealed_header(5)).is_err());
        assert!(engine.verify_header(&chain, &sealed_header(6)).is_ok());
    }

    #[test]
    fn fake_seal_round_trips() {
        let engine = faker();
        let block = Block::new(sealed_header(1), Vec::new(), Vec::new(), Vec::new());
        let sealed = engine.seal(block, CancellationToken::new()).unwrap();
        assert!(engine.verify_seal(&sealed.header).is_ok());
    }

    #[test]
    fn shared_instance_is_reused() {
        assert!(Arc::ptr_eq(&shared(), &shared()));
    }

    #[tokio::test]
    async fn failer_batch_results_stay_ordered() {
        let engine = Arc::new(fake_failer(2));
        let chain: Arc<dyn ChainReader> = Arc::new(MemoryChain::new());
        let headers: Vec<Header> = (1..=4).map(sealed_header).collect();

        let mut batch = engine.verify_headers(chain, headers);
        assert!(batch.recv().await.unwrap().is_ok());
        assert!(batch.recv().await.unwrap().is_err());
        assert!(batch.recv().await.unwrap().is_ok());
        assert!(batch.recv().await.unwrap().is_ok());
        assert!(batch.recv().await.is_none());
    }
}

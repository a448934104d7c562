//! The seal service: waits out the producer rotation and seals candidates.
//!
//! The engine itself never blocks; everything time-shaped lives here. The
//! service listens for chain-head updates, computes how long the local
//! producer must wait for its turn, asks the assembler for a candidate
//! block once the window opens and emits the sealed result.

use crate::config::DpovpConfig;
use crate::engine::{Dpovp, Engine};
use crate::error::{DpovpError, DpovpResult};
use crate::roster::Roster;
use alloy_primitives::Address;
use dpovp_types::{Block, Header};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Current wall clock, UNIX milliseconds.
pub(crate) fn unix_now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_millis() as u64
}

/// Builds candidate blocks on top of a parent: prepares the header,
/// executes the body and finalizes. Everything behind this trait is
/// outside the consensus core.
pub trait BlockAssembler: Send + Sync {
    /// Assemble an unsealed candidate on `parent`.
    fn assemble(&self, parent: &Header) -> anyhow::Result<Block>;
}

/// Counters kept by the seal service.
#[derive(Debug, Clone, Copy, Default)]
pub struct SealMetrics {
    /// Blocks sealed and emitted.
    pub blocks_sealed: u64,
    /// Attempts abandoned because assembly or signing failed.
    pub attempts_failed: u64,
}

/// How long the local producer must wait, from `now_ms`, before sealing
/// on top of `parent`.
///
/// This is the inverse of the verification windows: the returned delay
/// lands the block inside the earliest window the rotation grants
/// `coinbase`, advancing by whole loops when that window is already past.
/// A genesis parent grants an immediate turn.
pub fn turn_delay(
    config: &DpovpConfig,
    roster: &Roster,
    coinbase: &Address,
    parent: &Header,
    now_ms: u64,
) -> DpovpResult<Duration> {
    if !roster.contains(coinbase) {
        return Err(DpovpError::NotAProducer { address: *coinbase });
    }
    if parent.is_genesis() {
        return Ok(Duration::ZERO);
    }

    let parent_ms = parent.time.saturating_mul(1000);
    if roster.len() == 1 {
        let target = parent_ms + config.sleeptime;
        return Ok(Duration::from_millis(target.saturating_sub(now_ms)));
    }

    let one_loop = config.loop_duration(roster.len() as u64);
    let slot = roster
        .slot(&parent.coinbase, coinbase)
        .ok_or(DpovpError::UnknownProducer { address: parent.coinbase })?;

    let (mut start, mut end) = match slot {
        // sealing twice in a row means waiting out everyone else's turn
        0 => (one_loop - config.timeout, one_loop),
        s => (config.sleeptime.max((s - 1) * config.timeout), s * config.timeout),
    };
    while parent_ms + end <= now_ms {
        start += one_loop;
        end += one_loop;
    }
    Ok(Duration::from_millis((parent_ms + start).saturating_sub(now_ms)))
}

/// Channel-driven sealing loop around a [`Dpovp`] engine.
pub struct SealService {
    engine: Arc<Dpovp>,
    assembler: Arc<dyn BlockAssembler>,
    head_rx: mpsc::Receiver<Header>,
    sealed_tx: mpsc::Sender<Block>,
    cancel: CancellationToken,
    metrics: SealMetrics,
}

impl std::fmt::Debug for SealService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SealService")
            .field("engine", &self.engine)
            .field("metrics", &self.metrics)
            .finish_non_exhaustive()
    }
}

impl SealService {
    /// Create a service. `head_rx` delivers the headers to build on,
    /// sealed blocks leave through `sealed_tx`.
    pub fn new(
        engine: Arc<Dpovp>,
        assembler: Arc<dyn BlockAssembler>,
        head_rx: mpsc::Receiver<Header>,
        sealed_tx: mpsc::Sender<Block>,
        cancel: CancellationToken,
    ) -> Self {
        Self { engine, assembler, head_rx, sealed_tx, cancel, metrics: SealMetrics::default() }
    }

    /// Counters accumulated so far.
    pub fn metrics(&self) -> SealMetrics {
        self.metrics
    }

    /// Run the service on its own task.
    pub fn spawn(mut self) -> JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    async fn run(&mut self) {
        info!(coinbase = %self.engine.coinbase(), "starting seal service");
        'heads: while let Some(mut parent) = self.next_head().await {
            loop {
                let delay = match turn_delay(
                    self.engine.config(),
                    self.engine.roster(),
                    &self.engine.coinbase(),
                    &parent,
                    unix_now_ms(),
                ) {
                    Ok(delay) => delay,
                    Err(err) => {
                        warn!(%err, number = parent.number, "cannot seal on this head");
                        continue 'heads;
                    }
                };
                debug!(?delay, parent = parent.number, "waiting for our production turn");

                tokio::select! {
                    _ = self.cancel.cancelled() => break 'heads,
                    head = self.head_rx.recv() => match head {
                        // the chain moved while we waited; reschedule
                        Some(new_head) => {
                            parent = new_head;
                            continue;
                        }
                        None => break 'heads,
                    },
                    _ = tokio::time::sleep(delay) => {}
                }

                self.produce(&parent).await;
                continue 'heads;
            }
        }
        info!(
            sealed = self.metrics.blocks_sealed,
            failed = self.metrics.attempts_failed,
            "seal service stopped"
        );
    }

    async fn next_head(&mut self) -> Option<Header> {
        tokio::select! {
            _ = self.cancel.cancelled() => None,
            head = self.head_rx.recv() => head,
        }
    }

    async fn produce(&mut self, parent: &Header) {
        let candidate = match self.assembler.assemble(parent) {
            Ok(candidate) => candidate,
            Err(err) => {
                warn!(%err, parent = parent.number, "block assembly failed");
                self.metrics.attempts_failed += 1;
                return;
            }
        };
        match self.engine.seal(candidate, self.cancel.clone()) {
            Ok(block) => {
                self.metrics.blocks_sealed += 1;
                info!(number = block.number(), "sealed block");
                if self.sealed_tx.send(block).await.is_err() {
                    warn!("sealed block receiver dropped, stopping");
                    self.cancel.cancel();
                }
            }
            Err(err) => {
                // fatal for this attempt only; the next head retries
                warn!(%err, parent = parent.number, "block attempt abandoned");
                self.metrics.attempts_failed += 1;
            }
        }
    }
}

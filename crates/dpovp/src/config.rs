//! Engine and chain configuration.

use crate::error::{DpovpError, DpovpResult};
use alloy_primitives::U256;
use serde::{Deserialize, Serialize};

/// Reward credited to the producer of every block, in base units (5e18).
pub const BLOCK_REWARD: U256 = U256::from_limbs([5_000_000_000_000_000_000, 0, 0, 0]);

/// Timing parameters of the DPoVP rotation.
///
/// Serde field names match the chain-config JSON the node ships.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DpovpConfig {
    /// Per-producer turn length, milliseconds.
    #[serde(rename = "Timeout")]
    pub timeout: u64,
    /// Minimum inter-block gap, milliseconds.
    #[serde(rename = "Sleeptime")]
    pub sleeptime: u64,
}

impl Default for DpovpConfig {
    fn default() -> Self {
        Self { timeout: 10_000, sleeptime: 3_000 }
    }
}

impl DpovpConfig {
    /// Check the `0 < sleeptime < timeout` invariant.
    pub fn validate(&self) -> DpovpResult<()> {
        if self.sleeptime == 0 {
            return Err(DpovpError::Configuration("Sleeptime must be positive".into()));
        }
        if self.sleeptime >= self.timeout {
            return Err(DpovpError::Configuration(format!(
                "Sleeptime ({}) must be below Timeout ({})",
                self.sleeptime, self.timeout
            )));
        }
        Ok(())
    }

    /// Duration of one full rotation over `node_count` producers, ms.
    pub fn loop_duration(&self, node_count: u64) -> u64 {
        node_count * self.timeout
    }
}

/// Chain-level options recognised by the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Replay-protection identifier. Unused by the consensus rules.
    #[serde(rename = "chainId")]
    pub chain_id: u64,
    /// DPoVP timing parameters.
    #[serde(rename = "dpovp")]
    pub dpovp: DpovpConfig,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self { chain_id: 1337, dpovp: DpovpConfig::default() }
    }
}

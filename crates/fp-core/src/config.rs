//! Run configuration.

use fp_error::{FpError, Result};
use fp_types::BlockSize;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// What the verify phase does after the first bad block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MismatchPolicy {
    /// Stop at the first mismatch or read error. Once wraparound starts,
    /// later blocks are presumed unreliable.
    #[default]
    StopAtFirst,
    /// Verify every block and record the full corruption map.
    ScanAll,
}

/// Immutable configuration for one probe run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Directory on the volume under test. Blocks go in a dedicated
    /// subdirectory of it.
    pub target: PathBuf,
    pub block_size: BlockSize,
    /// Upper bound on bytes written. `None` writes until the volume is full.
    pub max_total_bytes: Option<u64>,
    /// Delete block files when the run ends.
    pub cleanup: bool,
    pub mismatch_policy: MismatchPolicy,
}

impl RunConfig {
    #[must_use]
    pub fn new(target: impl Into<PathBuf>) -> Self {
        Self {
            target: target.into(),
            block_size: BlockSize::DEFAULT,
            max_total_bytes: None,
            cleanup: true,
            mismatch_policy: MismatchPolicy::StopAtFirst,
        }
    }

    #[must_use]
    pub fn with_block_size(mut self, block_size: BlockSize) -> Self {
        self.block_size = block_size;
        self
    }

    #[must_use]
    pub fn with_max_total_bytes(mut self, max_total_bytes: Option<u64>) -> Self {
        self.max_total_bytes = max_total_bytes;
        self
    }

    #[must_use]
    pub fn with_cleanup(mut self, cleanup: bool) -> Self {
        self.cleanup = cleanup;
        self
    }

    #[must_use]
    pub fn with_mismatch_policy(mut self, policy: MismatchPolicy) -> Self {
        self.mismatch_policy = policy;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.target.as_os_str().is_empty() {
            return Err(FpError::InvalidConfig("target path is empty".to_owned()));
        }
        Ok(())
    }

    /// Number of whole blocks the byte limit allows, if a limit is set.
    /// A limit below one block allows none.
    #[must_use]
    pub fn max_blocks(&self) -> Option<u64> {
        self.max_total_bytes
            .map(|limit| self.block_size.blocks_within(limit))
    }
}

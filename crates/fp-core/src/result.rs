//! Outcome of a probe run.

use crate::cleanup::CleanupResult;
use fp_types::BlockIndex;
use fp_verify::VerificationOutcome;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Why the write phase stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The volume reported it is full.
    CapacityReached,
    /// The next block would have exceeded `max_total_bytes`.
    LimitReached,
    /// A write failed for a reason other than lack of space.
    Aborted,
    /// The cancel token was raised.
    Cancelled,
}

impl StopReason {
    /// Reasons after which the written blocks are read back.
    #[must_use]
    pub fn proceeds_to_verify(self) -> bool {
        matches!(self, Self::CapacityReached | Self::LimitReached)
    }
}

/// How the verify phase ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifyStop {
    /// Every written block was checked.
    Completed,
    StoppedAtMismatch,
    StoppedAtReadError,
    Cancelled,
    /// The write phase aborted or was cancelled.
    Skipped,
}

/// The failed write that aborted a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbortDetail {
    pub index: BlockIndex,
    pub cause: String,
}

/// One bad block in the corruption map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorruptionEntry {
    pub index: BlockIndex,
    pub outcome: VerificationOutcome,
}

/// Overall classification of a finished run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// Everything written was read back intact.
    Genuine,
    /// Fewer bytes verified than written.
    Corrupted,
    Aborted,
    Cancelled,
    /// Not a single block could be written.
    Empty,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Genuine => write!(f, "genuine"),
            Self::Corrupted => write!(f, "corrupted"),
            Self::Aborted => write!(f, "aborted"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Empty => write!(f, "empty"),
        }
    }
}

/// Immutable report of a completed probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResult {
    pub block_size: u64,

    /// Highest index whose write (and flush) succeeded.
    pub last_written_index: Option<BlockIndex>,
    pub blocks_written: u64,
    /// Provisional capacity: everything the volume accepted.
    pub bytes_written: u64,
    /// `None` for verify-only runs over blocks from an earlier run.
    pub write_stop: Option<StopReason>,
    /// Index whose write failed (out of space or I/O error).
    pub first_write_failure_index: Option<BlockIndex>,
    pub abort: Option<AbortDetail>,
    /// Partial block removed after the failed write.
    pub discarded_partial: Option<BlockIndex>,

    /// Leading blocks that verified intact.
    pub blocks_verified: u64,
    /// Trustworthy capacity.
    pub bytes_verified: u64,
    /// All matching blocks, including any after the first bad one.
    pub blocks_matched: u64,
    pub verify_stop: VerifyStop,
    pub first_corrupted_index: Option<BlockIndex>,
    pub first_read_error_index: Option<BlockIndex>,
    /// Every bad block seen; at most one entry under `StopAtFirst`.
    pub corruption_map: Vec<CorruptionEntry>,

    pub write_elapsed: Duration,
    pub verify_elapsed: Duration,
    pub elapsed: Duration,

    /// `None` when artifacts were retained.
    pub cleanup: Option<CleanupResult>,
}

impl RunResult {
    #[must_use]
    pub fn verdict(&self) -> Verdict {
        if self.write_stop == Some(StopReason::Aborted) {
            return Verdict::Aborted;
        }
        if self.write_stop == Some(StopReason::Cancelled) || self.verify_stop == VerifyStop::Cancelled
        {
            return Verdict::Cancelled;
        }
        if self.blocks_written == 0 {
            return Verdict::Empty;
        }
        if self.bytes_verified < self.bytes_written {
            Verdict::Corrupted
        } else {
            Verdict::Genuine
        }
    }

    /// True when any bad block carried another block's header.
    #[must_use]
    pub fn wraparound_detected(&self) -> bool {
        self.corruption_map.iter().any(|entry| {
            matches!(&entry.outcome, VerificationOutcome::Mismatch(m) if m.kind.is_wraparound())
        })
    }

    /// Bytes the volume claimed to store but could not return.
    #[must_use]
    pub fn missing_bytes(&self) -> u64 {
        self.bytes_written.saturating_sub(self.bytes_verified)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fp_verify::{Mismatch, MismatchKind, ReadFailure};

    fn base() -> RunResult {
        RunResult {
            block_size: 100,
            last_written_index: Some(BlockIndex(9)),
            blocks_written: 10,
            bytes_written: 1000,
            write_stop: Some(StopReason::LimitReached),
            first_write_failure_index: None,
            abort: None,
            discarded_partial: None,
            blocks_verified: 10,
            bytes_verified: 1000,
            blocks_matched: 10,
            verify_stop: VerifyStop::Completed,
            first_corrupted_index: None,
            first_read_error_index: None,
            corruption_map: Vec::new(),
            write_elapsed: Duration::from_millis(5),
            verify_elapsed: Duration::from_millis(3),
            elapsed: Duration::from_millis(8),
            cleanup: None,
        }
    }

    #[test]
    fn verdicts() {
        assert_eq!(base().verdict(), Verdict::Genuine);

        let mut short = base();
        short.blocks_verified = 4;
        short.bytes_verified = 400;
        assert_eq!(short.verdict(), Verdict::Corrupted);
        assert_eq!(short.missing_bytes(), 600);

        let mut aborted = base();
        aborted.write_stop = Some(StopReason::Aborted);
        assert_eq!(aborted.verdict(), Verdict::Aborted);

        let mut cancelled = base();
        cancelled.verify_stop = VerifyStop::Cancelled;
        assert_eq!(cancelled.verdict(), Verdict::Cancelled);

        let mut empty = base();
        empty.blocks_written = 0;
        empty.bytes_written = 0;
        empty.bytes_verified = 0;
        assert_eq!(empty.verdict(), Verdict::Empty);
    }

    #[test]
    fn wraparound_needs_a_foreign_block() {
        let mut result = base();
        result.corruption_map.push(CorruptionEntry {
            index: BlockIndex(2),
            outcome: VerificationOutcome::ReadError(ReadFailure::Missing),
        });
        assert!(!result.wraparound_detected());

        result.corruption_map.push(CorruptionEntry {
            index: BlockIndex(3),
            outcome: VerificationOutcome::Mismatch(Mismatch {
                expected_digest: "aa".into(),
                actual_digest: "bb".into(),
                first_difference: 8,
                kind: MismatchKind::ForeignBlock {
                    found_index: BlockIndex(7),
                    intact: true,
                },
            }),
        });
        assert!(result.wraparound_detected());
    }

    #[test]
    fn only_clean_stops_proceed_to_verify() {
        assert!(StopReason::CapacityReached.proceeds_to_verify());
        assert!(StopReason::LimitReached.proceeds_to_verify());
        assert!(!StopReason::Aborted.proceeds_to_verify());
        assert!(!StopReason::Cancelled.proceeds_to_verify());
    }
}

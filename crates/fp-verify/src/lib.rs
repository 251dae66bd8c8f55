#![forbid(unsafe_code)]
//! Block read-back verification.
//!
//! The verifier re-reads one stored block, regenerates what that block
//! should contain, and compares the two streams chunk by chunk while
//! hashing both with BLAKE3. Nothing is written and nothing is cached, so
//! verifying the same unmodified block twice always gives the same answer.
//!
//! # Mismatch taxonomy
//!
//! | Kind | Evidence | Typical cause |
//! |------|----------|---------------|
//! | `ForeignBlock` | valid header naming another index | wraparound: a later write landed on this block's physical region |
//! | `PayloadCorrupted` | valid header naming this index, payload differs | bit errors, torn writes |
//! | `Zeroed` | every byte is zero | controller discarding data past real capacity |
//! | `Unrecognized` | no valid header | garbage, unrelated data |
//!
//! `ForeignBlock` is strong counterfeit evidence; the others are
//! ambiguous between counterfeit and failing media.

use fp_block::pattern::BlockHeader;
use fp_block::{BlockPattern, BlockStore, IO_CHUNK_SIZE};
use fp_error::{FpError, Result};
use fp_types::{BLOCK_HEADER_LEN, BlockIndex};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

// ── Outcome taxonomy ────────────────────────────────────────────────────────

/// Classification of a content mismatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MismatchKind {
    /// The block holds another block's data.
    ///
    /// `intact` is set when the whole payload equals the generated content
    /// of `found_index`.
    ForeignBlock { found_index: BlockIndex, intact: bool },
    /// Header is correct for this index but the payload differs.
    PayloadCorrupted,
    /// Every byte read back is zero.
    Zeroed,
    /// No valid header was found.
    Unrecognized,
}

impl MismatchKind {
    /// True when the evidence points at wraparound rather than decay.
    #[must_use]
    pub fn is_wraparound(&self) -> bool {
        matches!(self, Self::ForeignBlock { .. })
    }
}

impl fmt::Display for MismatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ForeignBlock {
                found_index,
                intact: true,
            } => write!(f, "foreign_block({found_index})"),
            Self::ForeignBlock {
                found_index,
                intact: false,
            } => write!(f, "foreign_block({found_index}, damaged)"),
            Self::PayloadCorrupted => write!(f, "payload_corrupted"),
            Self::Zeroed => write!(f, "zeroed"),
            Self::Unrecognized => write!(f, "unrecognized"),
        }
    }
}

/// Details of a content mismatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mismatch {
    /// BLAKE3 of the content that should be there (hex).
    pub expected_digest: String,
    /// BLAKE3 of the content actually read back (hex).
    pub actual_digest: String,
    /// Byte offset of the first difference.
    pub first_difference: u64,
    pub kind: MismatchKind,
}

/// Why a block could not be read back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cause", rename_all = "snake_case")]
pub enum ReadFailure {
    /// Block file does not exist.
    Missing,
    /// Block file has the wrong length (truncated or extended).
    LengthMismatch { expected: u64, actual: u64 },
    /// The read itself failed.
    Io { detail: String },
}

impl fmt::Display for ReadFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing => write!(f, "block file missing"),
            Self::LengthMismatch { expected, actual } => {
                write!(f, "length mismatch: expected {expected} bytes, found {actual}")
            }
            Self::Io { detail } => write!(f, "read failed: {detail}"),
        }
    }
}

impl ReadFailure {
    fn from_error(err: &FpError) -> Self {
        match err {
            FpError::NotFound(_) => Self::Missing,
            other => Self::Io {
                detail: other.to_string(),
            },
        }
    }
}

/// Result of verifying one block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum VerificationOutcome {
    Match,
    Mismatch(Mismatch),
    ReadError(ReadFailure),
}

impl VerificationOutcome {
    #[must_use]
    pub fn is_match(&self) -> bool {
        matches!(self, Self::Match)
    }
}

impl fmt::Display for VerificationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Match => write!(f, "match"),
            Self::Mismatch(m) => write!(
                f,
                "mismatch [{}] at byte {}: expected {}, got {}",
                m.kind,
                m.first_difference,
                short_hex(&m.expected_digest),
                short_hex(&m.actual_digest)
            ),
            Self::ReadError(cause) => write!(f, "read error: {cause}"),
        }
    }
}

fn short_hex(hex: &str) -> &str {
    hex.get(..16).unwrap_or(hex)
}

// ── Verifier ────────────────────────────────────────────────────────────────

/// Read-only block verifier.
pub struct BlockVerifier<'a> {
    store: &'a dyn BlockStore,
    chunk_size: usize,
}

impl<'a> BlockVerifier<'a> {
    #[must_use]
    pub fn new(store: &'a dyn BlockStore) -> Self {
        Self {
            store,
            chunk_size: IO_CHUNK_SIZE,
        }
    }

    /// Override the streaming chunk size (never below the header length).
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(BLOCK_HEADER_LEN);
        self
    }

    /// Verify block `index` against freshly generated content of
    /// `expected_size` bytes.
    pub fn verify(&self, index: BlockIndex, expected_size: u64) -> VerificationOutcome {
        let file = match self.store.open(index) {
            Ok(file) => file,
            Err(err) => return VerificationOutcome::ReadError(ReadFailure::from_error(&err)),
        };
        let actual_len = match file.len_bytes() {
            Ok(len) => len,
            Err(err) => return VerificationOutcome::ReadError(ReadFailure::from_error(&err)),
        };
        if actual_len != expected_size {
            return VerificationOutcome::ReadError(ReadFailure::LengthMismatch {
                expected: expected_size,
                actual: actual_len,
            });
        }

        let pattern = BlockPattern::new(index, expected_size);
        let mut actual = vec![0_u8; self.chunk_size];
        let mut expected = vec![0_u8; self.chunk_size];
        let mut actual_hash = blake3::Hasher::new();
        let mut expected_hash = blake3::Hasher::new();
        let mut head = Vec::with_capacity(BLOCK_HEADER_LEN);
        let mut first_difference = None;
        let mut all_zero = true;

        let mut offset = 0_u64;
        while offset < expected_size {
            let n = pattern.fill_at(offset, &mut expected);
            if let Err(err) = file.read_exact_at(offset, &mut actual[..n]) {
                return VerificationOutcome::ReadError(ReadFailure::from_error(&err));
            }
            let (got, want) = (&actual[..n], &expected[..n]);

            if head.len() < BLOCK_HEADER_LEN {
                let take = (BLOCK_HEADER_LEN - head.len()).min(n);
                head.extend_from_slice(&got[..take]);
            }
            if first_difference.is_none() && got != want {
                let pos = got.iter().zip(want).position(|(a, b)| a != b).unwrap_or(0);
                first_difference = Some(offset + u64::try_from(pos).unwrap_or(0));
            }
            all_zero &= got.iter().all(|&b| b == 0);
            actual_hash.update(got);
            expected_hash.update(want);
            offset += u64::try_from(n).unwrap_or(u64::MAX);
        }

        let Some(first_difference) = first_difference else {
            return VerificationOutcome::Match;
        };

        let actual_digest = actual_hash.finalize();
        let kind = self.classify(index, expected_size, &head, all_zero, &actual_digest);
        debug!(
            target: "flashprobe::verify",
            index = index.0,
            first_difference,
            %kind,
            "block mismatch"
        );
        VerificationOutcome::Mismatch(Mismatch {
            expected_digest: expected_hash.finalize().to_hex().to_string(),
            actual_digest: actual_digest.to_hex().to_string(),
            first_difference,
            kind,
        })
    }

    fn classify(
        &self,
        index: BlockIndex,
        expected_size: u64,
        head: &[u8],
        all_zero: bool,
        actual_digest: &blake3::Hash,
    ) -> MismatchKind {
        if all_zero {
            return MismatchKind::Zeroed;
        }
        match BlockHeader::decode(head) {
            Ok(header) if header.index != index => {
                let intact = header.block_size == expected_size
                    && BlockPattern::new(header.index, expected_size).digest(self.chunk_size)
                        == *actual_digest;
                MismatchKind::ForeignBlock {
                    found_index: header.index,
                    intact,
                }
            }
            Ok(_) => MismatchKind::PayloadCorrupted,
            Err(_) => MismatchKind::Unrecognized,
        }
    }
}

/// Decode the header of a stored block.
///
/// Returns `Ok(None)` when the block exists but does not start with a valid
/// header.
pub fn read_header(store: &dyn BlockStore, index: BlockIndex) -> Result<Option<BlockHeader>> {
    let file = store.open(index)?;
    let len = file.len_bytes()?;
    if len < u64::try_from(BLOCK_HEADER_LEN).unwrap_or(u64::MAX) {
        return Ok(None);
    }
    let mut head = [0_u8; BLOCK_HEADER_LEN];
    file.read_exact_at(0, &mut head)?;
    Ok(BlockHeader::decode(&head).ok())
}

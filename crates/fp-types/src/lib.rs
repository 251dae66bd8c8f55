#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Magic prefix of every block header.
pub const BLOCK_MAGIC: [u8; 8] = *b"FPRBLK01";

/// Length of the self-describing header at the start of each block.
pub const BLOCK_HEADER_LEN: usize = 32;

/// Smallest block size a run accepts (one sector).
pub const MIN_BLOCK_SIZE: u64 = 512;

/// Largest block size a run accepts. Keeps block files well below the
/// 4 GiB FAT32 file size ceiling.
pub const MAX_BLOCK_SIZE: u64 = 1024 * 1024 * 1024;

/// Default block size, matching the 100 MB default of the desktop tool.
pub const DEFAULT_BLOCK_SIZE: u64 = 100 * 1024 * 1024;

/// Name of the dedicated subdirectory holding block files.
pub const BLOCK_DIR_NAME: &str = "flashprobe.blocks";

pub const KIB: u64 = 1024;
pub const MIB: u64 = 1024 * KIB;
pub const GIB: u64 = 1024 * MIB;

/// Sequential block index, assigned in write order starting at zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockIndex(pub u64);

impl BlockIndex {
    pub const ZERO: Self = Self(0);

    #[must_use]
    pub fn next(self) -> Option<Self> {
        self.0.checked_add(1).map(Self)
    }

    /// Number of blocks in `0..=self`.
    #[must_use]
    pub fn count_through(self) -> u64 {
        self.0.saturating_add(1)
    }
}

/// Validated block size in bytes (`MIN_BLOCK_SIZE..=MAX_BLOCK_SIZE`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub struct BlockSize(u64);

impl BlockSize {
    pub const DEFAULT: Self = Self(DEFAULT_BLOCK_SIZE);

    /// Create a `BlockSize` if `value` lies in the accepted range.
    pub fn new(value: u64) -> Result<Self, ParseError> {
        if !(MIN_BLOCK_SIZE..=MAX_BLOCK_SIZE).contains(&value) {
            return Err(ParseError::InvalidField {
                field: "block_size",
                reason: "must be in 512..=1073741824 bytes",
            });
        }
        Ok(Self(value))
    }

    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }

    /// Total bytes covered by `blocks` blocks of this size, saturating.
    #[must_use]
    pub fn bytes_for(self, blocks: u64) -> u64 {
        blocks.saturating_mul(self.0)
    }

    /// Whole blocks that fit within `bytes`.
    #[must_use]
    pub fn blocks_within(self, bytes: u64) -> u64 {
        bytes / self.0
    }
}

impl TryFrom<u64> for BlockSize {
    type Error = ParseError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<BlockSize> for u64 {
    fn from(value: BlockSize) -> Self {
        value.0
    }
}

/// Stage of a probe run a progress event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Write,
    Verify,
    Cleanup,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("insufficient data: need {needed} bytes at offset {offset}, got {actual}")]
    InsufficientData {
        needed: usize,
        offset: usize,
        actual: usize,
    },
    #[error("invalid magic: expected {expected:#x}, got {actual:#x}")]
    InvalidMagic { expected: u64, actual: u64 },
    #[error("invalid field: {field} ({reason})")]
    InvalidField {
        field: &'static str,
        reason: &'static str,
    },
}

#[inline]
pub fn ensure_slice(data: &[u8], offset: usize, len: usize) -> Result<&[u8], ParseError> {
    let Some(end) = offset.checked_add(len) else {
        return Err(ParseError::InvalidField {
            field: "offset",
            reason: "overflow",
        });
    };

    if end > data.len() {
        return Err(ParseError::InsufficientData {
            needed: len,
            offset,
            actual: data.len().saturating_sub(offset),
        });
    }

    Ok(&data[offset..end])
}

#[inline]
pub fn read_le_u64(data: &[u8], offset: usize) -> Result<u64, ParseError> {
    let bytes = read_fixed::<8>(data, offset)?;
    Ok(u64::from_le_bytes(bytes))
}

#[inline]
pub fn read_fixed<const N: usize>(data: &[u8], offset: usize) -> Result<[u8; N], ParseError> {
    let bytes = ensure_slice(data, offset, N)?;
    let mut out = [0_u8; N];
    out.copy_from_slice(bytes);
    Ok(out)
}

impl fmt::Display for BlockIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for BlockSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Write => write!(f, "write"),
            Self::Verify => write!(f, "verify"),
            Self::Cleanup => write!(f, "cleanup"),
        }
    }
}

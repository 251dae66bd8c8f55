#![forbid(unsafe_code)]
//! flashprobe public API facade.
//!
//! Re-exports the probe orchestration from `fp-core` together with the
//! block and verification types that appear in its results. This is the
//! crate that downstream consumers (CLI, harness) depend on.

pub use fp_core::*;

pub use fp_block::{
    BlockFile, BlockHeader, BlockPattern, BlockStore, DirBlockStore, IO_CHUNK_SIZE, MemBlockStore,
    discover_contiguous,
};
pub use fp_error::{FpError, Result};
pub use fp_types::{BlockIndex, BlockSize, DEFAULT_BLOCK_SIZE, GIB, KIB, MIB, Phase};
pub use fp_verify::{Mismatch, MismatchKind, ReadFailure, VerificationOutcome, read_header};

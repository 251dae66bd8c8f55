//! Durable single-block writer.
//!
//! A block counts as written only after every byte reached the store *and*
//! the store confirmed a flush to stable storage. Without the flush, page
//! cache absorbs the writes and the measured capacity says nothing about
//! the device.
//!
//! The writer never retries and never deletes: one observed failure is the
//! answer for that index, and removal of partial files belongs to cleanup.

use crate::pattern::{BlockPattern, len_u64};
use crate::{BlockStore, IO_CHUNK_SIZE};
use fp_error::FpError;
use fp_types::BlockIndex;
use std::fmt;
use tracing::{debug, trace};

/// Why a block write did not succeed.
#[derive(Debug)]
pub enum WriteFailure {
    /// The volume is full. Expected end of the write phase.
    OutOfSpace,
    /// Any other failure. Fatal to the run.
    Io(FpError),
}

impl fmt::Display for WriteFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfSpace => write!(f, "out of space"),
            Self::Io(err) => write!(f, "{err}"),
        }
    }
}

/// Result of writing one block.
#[derive(Debug)]
pub enum WriteOutcome {
    /// All bytes written and flushed.
    Success,
    Failure(WriteFailure),
}

impl WriteOutcome {
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    fn from_error(err: FpError) -> Self {
        if err.is_no_space() {
            Self::Failure(WriteFailure::OutOfSpace)
        } else {
            Self::Failure(WriteFailure::Io(err))
        }
    }
}

/// Writes block content to a [`BlockStore`] in bounded-size chunks.
pub struct BlockWriter<'a> {
    store: &'a dyn BlockStore,
    chunk_size: usize,
}

impl<'a> BlockWriter<'a> {
    #[must_use]
    pub fn new(store: &'a dyn BlockStore) -> Self {
        Self {
            store,
            chunk_size: IO_CHUNK_SIZE,
        }
    }

    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Write `content` as block `index` and flush it.
    ///
    /// Creates exactly one block file. A failure may leave that file
    /// partially written.
    pub fn write(&self, index: BlockIndex, content: &BlockPattern) -> WriteOutcome {
        if content.index() != index {
            return WriteOutcome::Failure(WriteFailure::Io(FpError::Format(format!(
                "content generated for block {} passed for block {index}",
                content.index()
            ))));
        }

        let file = match self.store.create(index) {
            Ok(file) => file,
            Err(err) => return WriteOutcome::from_error(err),
        };

        let mut chunk = vec![0_u8; self.chunk_size];
        let mut offset = 0_u64;
        while offset < content.len() {
            let n = content.fill_at(offset, &mut chunk);
            if let Err(err) = file.write_all_at(offset, &chunk[..n]) {
                debug!(
                    target: "flashprobe::block",
                    index = index.0,
                    offset,
                    error = %err,
                    "block write failed"
                );
                return WriteOutcome::from_error(err);
            }
            offset += len_u64(n);
        }

        if let Err(err) = file.sync() {
            debug!(
                target: "flashprobe::block",
                index = index.0,
                error = %err,
                "block flush failed"
            );
            return WriteOutcome::from_error(err);
        }

        trace!(
            target: "flashprobe::block",
            index = index.0,
            bytes = content.len(),
            location = %self.store.describe(index),
            "block written"
        );
        WriteOutcome::Success
    }
}

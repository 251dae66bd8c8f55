//! In-memory block store.
//!
//! Backs unit tests and simulations that must not consume disk space. An
//! optional capacity models a full volume: writes past it store what fits
//! and then fail with `FpError::NoSpace`, like a real filesystem.

use crate::pattern::len_u64;
use crate::{BlockFile, BlockStore};
use fp_error::{FpError, Result};
use fp_types::BlockIndex;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Default)]
struct MemState {
    blocks: BTreeMap<BlockIndex, Vec<u8>>,
    capacity: Option<u64>,
    syncs: u64,
}

impl MemState {
    fn used(&self) -> u64 {
        self.blocks.values().map(|b| len_u64(b.len())).sum()
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemBlockStore {
    state: Arc<Mutex<MemState>>,
}

impl MemBlockStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that runs out of space after `capacity` bytes in total.
    #[must_use]
    pub fn with_capacity(capacity: u64) -> Self {
        let store = Self::default();
        store.state.lock().capacity = Some(capacity);
        store
    }

    /// Place raw bytes for a block, bypassing capacity accounting.
    pub fn insert(&self, index: BlockIndex, bytes: Vec<u8>) {
        self.state.lock().blocks.insert(index, bytes);
    }

    /// Copy of a block's current bytes.
    #[must_use]
    pub fn snapshot(&self, index: BlockIndex) -> Option<Vec<u8>> {
        self.state.lock().blocks.get(&index).cloned()
    }

    /// XOR one byte of a stored block. Returns `false` if out of range.
    pub fn flip_byte(&self, index: BlockIndex, offset: usize, mask: u8) -> bool {
        let mut state = self.state.lock();
        match state.blocks.get_mut(&index).and_then(|b| b.get_mut(offset)) {
            Some(byte) => {
                *byte ^= mask;
                true
            }
            None => false,
        }
    }

    /// Number of `sync` calls observed across all blocks.
    #[must_use]
    pub fn sync_count(&self) -> u64 {
        self.state.lock().syncs
    }
}

impl BlockStore for MemBlockStore {
    fn create(&self, index: BlockIndex) -> Result<Box<dyn BlockFile>> {
        self.state.lock().blocks.insert(index, Vec::new());
        Ok(Box::new(MemBlockFile {
            state: Arc::clone(&self.state),
            index,
        }))
    }

    fn open(&self, index: BlockIndex) -> Result<Box<dyn BlockFile>> {
        if !self.state.lock().blocks.contains_key(&index) {
            return Err(FpError::NotFound(self.describe(index)));
        }
        Ok(Box::new(MemBlockFile {
            state: Arc::clone(&self.state),
            index,
        }))
    }

    fn remove(&self, index: BlockIndex) -> Result<bool> {
        Ok(self.state.lock().blocks.remove(&index).is_some())
    }

    fn list(&self) -> Result<Vec<BlockIndex>> {
        Ok(self.state.lock().blocks.keys().copied().collect())
    }

    fn describe(&self, index: BlockIndex) -> String {
        format!("mem://{}", crate::block_file_name(index))
    }
}

#[derive(Debug)]
struct MemBlockFile {
    state: Arc<Mutex<MemState>>,
    index: BlockIndex,
}

impl BlockFile for MemBlockFile {
    fn len_bytes(&self) -> Result<u64> {
        let state = self.state.lock();
        let block = state
            .blocks
            .get(&self.index)
            .ok_or_else(|| FpError::NotFound(format!("block {} removed", self.index)))?;
        Ok(len_u64(block.len()))
    }

    fn write_all_at(&self, offset: u64, buf: &[u8]) -> Result<()> {
        let mut state = self.state.lock();
        let used = state.used();
        let capacity = state.capacity;
        let block = state
            .blocks
            .get_mut(&self.index)
            .ok_or_else(|| FpError::NotFound(format!("block {} removed", self.index)))?;

        let start = usize::try_from(offset)
            .map_err(|_| FpError::Format("offset does not fit usize".to_owned()))?;
        let end = start
            .checked_add(buf.len())
            .ok_or_else(|| FpError::Format("write range overflow".to_owned()))?;
        let growth = len_u64(end.saturating_sub(block.len()));
        let room = capacity.map_or(u64::MAX, |cap| cap.saturating_sub(used));

        let (fits, full) = if growth > room {
            let allowed = usize::try_from(room).unwrap_or(usize::MAX);
            let keep = block.len().saturating_add(allowed).saturating_sub(start);
            (keep.min(buf.len()), true)
        } else {
            (buf.len(), false)
        };

        if block.len() < start + fits {
            block.resize(start + fits, 0);
        }
        block[start..start + fits].copy_from_slice(&buf[..fits]);
        drop(state);

        if full {
            return Err(FpError::NoSpace);
        }
        Ok(())
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let state = self.state.lock();
        let block = state
            .blocks
            .get(&self.index)
            .ok_or_else(|| FpError::NotFound(format!("block {} removed", self.index)))?;
        let start = usize::try_from(offset)
            .map_err(|_| FpError::Format("offset does not fit usize".to_owned()))?;
        let Some(src) = start
            .checked_add(buf.len())
            .and_then(|end| block.get(start..end))
        else {
            return Err(FpError::Io(std::io::Error::from(
                std::io::ErrorKind::UnexpectedEof,
            )));
        };
        buf.copy_from_slice(src);
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        self.state.lock().syncs += 1;
        Ok(())
    }
}

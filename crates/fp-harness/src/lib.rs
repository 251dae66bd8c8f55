#![forbid(unsafe_code)]
//! Simulated volumes for exercising the probe without real hardware.
//!
//! | Store               | Behaviour                                               |
//! |---------------------|---------------------------------------------------------|
//! | [`WraparoundStore`] | advertises more bytes than it has; writes wrap around   |
//! | [`FailingStore`]    | fails every write to one chosen block with an I/O error |
//! | [`CancelAtStore`]   | raises a cancel token when one chosen block is created  |

use flashprobe::{
    BlockFile, BlockIndex, BlockSize, BlockStore, CancelToken, FpError, MemBlockStore, Result,
    RunConfig,
};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::io;
use std::sync::Arc;
use tracing::trace;

/// Config for a probe against a simulated store, with cleanup disabled so
/// tests can inspect what was left behind.
#[must_use]
pub fn sim_config(block_size: u64, max_total_bytes: Option<u64>) -> RunConfig {
    let block_size = BlockSize::new(block_size).unwrap_or(BlockSize::DEFAULT);
    RunConfig::new("sim://volume")
        .with_block_size(block_size)
        .with_max_total_bytes(max_total_bytes)
        .with_cleanup(false)
}

// ── Wraparound ─────────────────────────────────────────────────────────────

#[derive(Debug)]
struct WrapState {
    media: Vec<u8>,
    /// Length of every block that currently exists.
    blocks: BTreeMap<BlockIndex, u64>,
}

/// A counterfeit volume: `advertised` bytes are accepted, but only
/// `physical` bytes of media exist.
///
/// Block `i` starts at logical offset `i * block_size`. A logical byte lands
/// on physical byte `logical % physical`, so once more than `physical` bytes
/// are written, later blocks silently overwrite earlier ones. Writes past
/// `advertised` store what fits and then fail with [`FpError::NoSpace`].
#[derive(Debug, Clone)]
pub struct WraparoundStore {
    block_size: u64,
    advertised: u64,
    state: Arc<Mutex<WrapState>>,
}

impl WraparoundStore {
    #[must_use]
    pub fn new(block_size: u64, physical: u64, advertised: u64) -> Self {
        let physical = usize::try_from(physical.max(1)).unwrap_or(usize::MAX);
        Self {
            block_size,
            advertised,
            state: Arc::new(Mutex::new(WrapState {
                media: vec![0; physical],
                blocks: BTreeMap::new(),
            })),
        }
    }

    fn base(&self, index: BlockIndex) -> u64 {
        index.0.saturating_mul(self.block_size)
    }
}

impl BlockStore for WraparoundStore {
    fn create(&self, index: BlockIndex) -> Result<Box<dyn BlockFile>> {
        self.state.lock().blocks.insert(index, 0);
        Ok(Box::new(WrapFile {
            state: Arc::clone(&self.state),
            index,
            base: self.base(index),
            advertised: self.advertised,
        }))
    }

    fn open(&self, index: BlockIndex) -> Result<Box<dyn BlockFile>> {
        if !self.state.lock().blocks.contains_key(&index) {
            return Err(FpError::NotFound(self.describe(index)));
        }
        Ok(Box::new(WrapFile {
            state: Arc::clone(&self.state),
            index,
            base: self.base(index),
            advertised: self.advertised,
        }))
    }

    fn remove(&self, index: BlockIndex) -> Result<bool> {
        Ok(self.state.lock().blocks.remove(&index).is_some())
    }

    fn list(&self) -> Result<Vec<BlockIndex>> {
        Ok(self.state.lock().blocks.keys().copied().collect())
    }

    fn describe(&self, index: BlockIndex) -> String {
        format!("wrap://block/{index}")
    }
}

struct WrapFile {
    state: Arc<Mutex<WrapState>>,
    index: BlockIndex,
    base: u64,
    advertised: u64,
}

impl WrapFile {
    fn missing(&self) -> FpError {
        FpError::NotFound(format!("block {} removed", self.index))
    }
}

fn physical_offset(logical: u64, media_len: usize) -> usize {
    let media_len = u64::try_from(media_len).unwrap_or(u64::MAX);
    usize::try_from(logical % media_len).unwrap_or(0)
}

impl BlockFile for WrapFile {
    fn len_bytes(&self) -> Result<u64> {
        self.state
            .lock()
            .blocks
            .get(&self.index)
            .copied()
            .ok_or_else(|| self.missing())
    }

    fn write_all_at(&self, offset: u64, buf: &[u8]) -> Result<()> {
        let mut state = self.state.lock();
        if !state.blocks.contains_key(&self.index) {
            return Err(self.missing());
        }
        let start = self.base.saturating_add(offset);
        let room = self.advertised.saturating_sub(start);
        let fits = usize::try_from(room).unwrap_or(usize::MAX).min(buf.len());

        let media_len = state.media.len();
        for (i, &byte) in buf[..fits].iter().enumerate() {
            let logical = start + u64::try_from(i).unwrap_or(0);
            state.media[physical_offset(logical, media_len)] = byte;
        }
        let end = offset + u64::try_from(fits).unwrap_or(0);
        if let Some(len) = state.blocks.get_mut(&self.index) {
            *len = (*len).max(end);
        }
        drop(state);

        if fits < buf.len() {
            trace!(target: "flashprobe::sim", index = self.index.0, "advertised capacity exhausted");
            return Err(FpError::NoSpace);
        }
        Ok(())
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let state = self.state.lock();
        let len = *state.blocks.get(&self.index).ok_or_else(|| self.missing())?;
        let wanted = offset.saturating_add(u64::try_from(buf.len()).unwrap_or(u64::MAX));
        if wanted > len {
            return Err(FpError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("read past end of block {}", self.index),
            )));
        }
        let start = self.base.saturating_add(offset);
        let media_len = state.media.len();
        for (i, slot) in buf.iter_mut().enumerate() {
            let logical = start + u64::try_from(i).unwrap_or(0);
            *slot = state.media[physical_offset(logical, media_len)];
        }
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        Ok(())
    }
}

// ── Injected write failure ─────────────────────────────────────────────────

/// In-memory volume whose writes to one block fail with an I/O error that
/// is not "out of space".
#[derive(Debug, Clone)]
pub struct FailingStore {
    inner: MemBlockStore,
    fail_at: BlockIndex,
}

impl FailingStore {
    #[must_use]
    pub fn new(fail_at: BlockIndex) -> Self {
        Self {
            inner: MemBlockStore::new(),
            fail_at,
        }
    }

    #[must_use]
    pub fn inner(&self) -> &MemBlockStore {
        &self.inner
    }
}

impl BlockStore for FailingStore {
    fn create(&self, index: BlockIndex) -> Result<Box<dyn BlockFile>> {
        let file = self.inner.create(index)?;
        if index == self.fail_at {
            return Ok(Box::new(FailingFile { inner: file }));
        }
        Ok(file)
    }

    fn open(&self, index: BlockIndex) -> Result<Box<dyn BlockFile>> {
        self.inner.open(index)
    }

    fn remove(&self, index: BlockIndex) -> Result<bool> {
        self.inner.remove(index)
    }

    fn list(&self) -> Result<Vec<BlockIndex>> {
        self.inner.list()
    }

    fn describe(&self, index: BlockIndex) -> String {
        self.inner.describe(index)
    }
}

struct FailingFile {
    inner: Box<dyn BlockFile>,
}

impl BlockFile for FailingFile {
    fn len_bytes(&self) -> Result<u64> {
        self.inner.len_bytes()
    }

    fn write_all_at(&self, offset: u64, buf: &[u8]) -> Result<()> {
        // Leave a torn block behind, as a failing device would.
        let half = buf.len() / 2;
        self.inner.write_all_at(offset, &buf[..half])?;
        Err(FpError::Io(io::Error::other("injected write fault")))
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.inner.read_exact_at(offset, buf)
    }

    fn sync(&self) -> Result<()> {
        self.inner.sync()
    }
}

// ── Cancellation trigger ───────────────────────────────────────────────────

/// In-memory volume that raises `cancel` as soon as block `trigger` is
/// created, simulating a user interrupt mid-run.
#[derive(Debug, Clone)]
pub struct CancelAtStore {
    inner: MemBlockStore,
    trigger: BlockIndex,
    cancel: CancelToken,
}

impl CancelAtStore {
    #[must_use]
    pub fn new(trigger: BlockIndex, cancel: CancelToken) -> Self {
        Self {
            inner: MemBlockStore::new(),
            trigger,
            cancel,
        }
    }

    #[must_use]
    pub fn inner(&self) -> &MemBlockStore {
        &self.inner
    }
}

impl BlockStore for CancelAtStore {
    fn create(&self, index: BlockIndex) -> Result<Box<dyn BlockFile>> {
        if index == self.trigger {
            self.cancel.cancel();
        }
        self.inner.create(index)
    }

    fn open(&self, index: BlockIndex) -> Result<Box<dyn BlockFile>> {
        self.inner.open(index)
    }

    fn remove(&self, index: BlockIndex) -> Result<bool> {
        self.inner.remove(index)
    }

    fn list(&self) -> Result<Vec<BlockIndex>> {
        self.inner.list()
    }

    fn describe(&self, index: BlockIndex) -> String {
        self.inner.describe(index)
    }
}

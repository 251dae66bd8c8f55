#![forbid(unsafe_code)]
//! Block storage layer for flashprobe.
//!
//! Provides deterministic block content ([`pattern`]), the [`BlockStore`]
//! seam between the probe and the target volume, a directory-backed store
//! that keeps one regular file per block, an in-memory store for tests, and
//! the durable [`BlockWriter`].

pub mod mem;
pub mod pattern;
pub mod writer;

pub use mem::MemBlockStore;
pub use pattern::{BlockHeader, BlockPattern, generate};
pub use writer::{BlockWriter, WriteFailure, WriteOutcome};

use fp_error::{FpError, Result};
use fp_types::{BLOCK_DIR_NAME, BlockIndex};
use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Chunk size used when streaming block content to and from a store.
pub const IO_CHUNK_SIZE: usize = 1024 * 1024;

/// Handle to one stored block, with pread/pwrite semantics.
pub trait BlockFile: Send + Sync {
    /// Current length in bytes.
    fn len_bytes(&self) -> Result<u64>;

    /// Write all bytes in `buf` at `offset`, extending the block as needed.
    fn write_all_at(&self, offset: u64, buf: &[u8]) -> Result<()>;

    /// Read exactly `buf.len()` bytes from `offset` into `buf`.
    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()>;

    /// Flush written data to stable storage.
    fn sync(&self) -> Result<()>;
}

/// Index-addressed storage of block files.
///
/// The location of a block is derived from its index alone; stores keep no
/// manifest. Implementations classify I/O errors through
/// [`FpError::from_io`] so that exhaustion surfaces as `FpError::NoSpace`.
pub trait BlockStore: Send + Sync {
    /// Create (or truncate) the file for `index`.
    fn create(&self, index: BlockIndex) -> Result<Box<dyn BlockFile>>;

    /// Open an existing block for reading. Missing blocks yield
    /// `FpError::NotFound`.
    fn open(&self, index: BlockIndex) -> Result<Box<dyn BlockFile>>;

    /// Delete the block. Returns `false` when it was already absent.
    fn remove(&self, index: BlockIndex) -> Result<bool>;

    /// All stored block indices, ascending.
    fn list(&self) -> Result<Vec<BlockIndex>>;

    /// Human-readable location of a block, for logs and reports.
    fn describe(&self, index: BlockIndex) -> String;

    /// Release store-level artifacts once no blocks remain. Returns `true`
    /// when something was removed.
    fn release(&self) -> Result<bool> {
        Ok(false)
    }
}

/// Highest index `h` such that every block in `0..=h` is present.
pub fn discover_contiguous(store: &dyn BlockStore) -> Result<Option<BlockIndex>> {
    let mut highest = None;
    for (expected, index) in store.list()?.into_iter().enumerate() {
        if index.0 != pattern::len_u64(expected) {
            break;
        }
        highest = Some(index);
    }
    Ok(highest)
}

/// File name of a block inside the block directory.
#[must_use]
pub fn block_file_name(index: BlockIndex) -> String {
    format!("block-{:010}.bin", index.0)
}

/// Inverse of [`block_file_name`].
#[must_use]
pub fn parse_block_file_name(name: &str) -> Option<BlockIndex> {
    let digits = name.strip_prefix("block-")?.strip_suffix(".bin")?;
    if digits.len() < 10 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok().map(BlockIndex)
}

/// Store keeping one regular file per block under
/// `<target>/flashprobe.blocks/`.
#[derive(Debug, Clone)]
pub struct DirBlockStore {
    dir: PathBuf,
}

impl DirBlockStore {
    /// Prepare the block directory inside `target`, creating it if needed.
    pub fn create(target: impl AsRef<Path>) -> Result<Self> {
        let target = target.as_ref();
        let meta = fs::metadata(target).map_err(FpError::from_io)?;
        if !meta.is_dir() {
            return Err(FpError::NotFound(format!(
                "target is not a directory: {}",
                target.display()
            )));
        }
        let dir = target.join(BLOCK_DIR_NAME);
        fs::create_dir_all(&dir).map_err(FpError::from_io)?;
        debug!(target: "flashprobe::block", dir = %dir.display(), "block directory ready");
        Ok(Self { dir })
    }

    /// Attach to the block directory left by an earlier run.
    pub fn open_existing(target: impl AsRef<Path>) -> Result<Self> {
        let dir = target.as_ref().join(BLOCK_DIR_NAME);
        if !dir.is_dir() {
            return Err(FpError::NotFound(format!(
                "no block directory at {}",
                dir.display()
            )));
        }
        Ok(Self { dir })
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn block_path(&self, index: BlockIndex) -> PathBuf {
        self.dir.join(block_file_name(index))
    }
}

impl BlockStore for DirBlockStore {
    fn create(&self, index: BlockIndex) -> Result<Box<dyn BlockFile>> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(self.block_path(index))
            .map_err(FpError::from_io)?;
        Ok(Box::new(FsBlockFile { file }))
    }

    fn open(&self, index: BlockIndex) -> Result<Box<dyn BlockFile>> {
        let file = File::open(self.block_path(index)).map_err(FpError::from_io)?;
        Ok(Box::new(FsBlockFile { file }))
    }

    fn remove(&self, index: BlockIndex) -> Result<bool> {
        match fs::remove_file(self.block_path(index)) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(FpError::from_io(err)),
        }
    }

    fn list(&self) -> Result<Vec<BlockIndex>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(FpError::from_io(err)),
        };
        let mut indices = Vec::new();
        for entry in entries {
            let entry = entry.map_err(FpError::from_io)?;
            if let Some(index) = entry.file_name().to_str().and_then(parse_block_file_name) {
                indices.push(index);
            }
        }
        indices.sort_unstable();
        Ok(indices)
    }

    fn describe(&self, index: BlockIndex) -> String {
        self.block_path(index).display().to_string()
    }

    fn release(&self) -> Result<bool> {
        match fs::remove_dir(&self.dir) {
            Ok(()) => Ok(true),
            Err(err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::NotFound | io::ErrorKind::DirectoryNotEmpty
                ) =>
            {
                Ok(false)
            }
            Err(err) => Err(FpError::from_io(err)),
        }
    }
}

/// Regular file using `pread`/`pwrite` style I/O.
#[derive(Debug)]
struct FsBlockFile {
    file: File,
}

impl BlockFile for FsBlockFile {
    fn len_bytes(&self) -> Result<u64> {
        Ok(self.file.metadata().map_err(FpError::from_io)?.len())
    }

    fn write_all_at(&self, offset: u64, buf: &[u8]) -> Result<()> {
        self.file.write_all_at(buf, offset).map_err(FpError::from_io)
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.file.read_exact_at(buf, offset).map_err(FpError::from_io)
    }

    fn sync(&self) -> Result<()> {
        self.file.sync_all().map_err(FpError::from_io)
    }
}

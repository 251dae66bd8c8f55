//! Removal of block files.
//!
//! Cleanup is idempotent: deleting an already-missing block counts as
//! "already absent", not as an error. Failures to delete individual blocks
//! are collected as warnings and never fail the run.

use crate::event::{EventOutcome, NoopObserver, ProbeEvent, ProbeObserver};
use fp_block::BlockStore;
use fp_types::{BlockIndex, Phase};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// A block (or the block directory) that could not be removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupWarning {
    /// `None` for store-level artifacts such as the block directory.
    pub index: Option<BlockIndex>,
    pub detail: String,
}

/// Summary of one cleanup pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupResult {
    pub deleted: u64,
    pub already_absent: u64,
    pub warnings: Vec<CleanupWarning>,
    /// The dedicated block directory was removed.
    pub released: bool,
}

impl CleanupResult {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}

pub struct Cleanup<'a> {
    store: &'a dyn BlockStore,
    observer: &'a dyn ProbeObserver,
}

impl<'a> Cleanup<'a> {
    #[must_use]
    pub fn new(store: &'a dyn BlockStore) -> Self {
        Self {
            store,
            observer: &NoopObserver,
        }
    }

    #[must_use]
    pub fn with_observer(mut self, observer: &'a dyn ProbeObserver) -> Self {
        self.observer = observer;
        self
    }

    /// Delete blocks `0..=last` (nothing when `last` is `None`), then release
    /// the block directory if it is empty.
    pub fn cleanup(&self, last: Option<BlockIndex>) -> CleanupResult {
        let mut result = CleanupResult::default();
        if let Some(last) = last {
            for i in 0..=last.0 {
                self.remove_one(BlockIndex(i), &mut result);
            }
        }
        self.release(&mut result);
        info!(
            target: "flashprobe::cleanup",
            deleted = result.deleted,
            already_absent = result.already_absent,
            warnings = result.warnings.len(),
            released = result.released,
            "cleanup complete"
        );
        result
    }

    /// Delete every block the store lists, whatever its index.
    pub fn cleanup_all(&self) -> CleanupResult {
        let mut result = CleanupResult::default();
        match self.store.list() {
            Ok(indices) => {
                for index in indices {
                    self.remove_one(index, &mut result);
                }
            }
            Err(err) => {
                warn!(target: "flashprobe::cleanup", error = %err, "cannot list blocks");
                result.warnings.push(CleanupWarning {
                    index: None,
                    detail: format!("listing blocks failed: {err}"),
                });
            }
        }
        self.release(&mut result);
        result
    }

    /// Remove a single partially written block after a failed write.
    pub fn discard(&self, index: BlockIndex) -> CleanupResult {
        let mut result = CleanupResult::default();
        self.remove_one(index, &mut result);
        result
    }

    fn remove_one(&self, index: BlockIndex, result: &mut CleanupResult) {
        let outcome = match self.store.remove(index) {
            Ok(true) => {
                result.deleted += 1;
                EventOutcome::Removed
            }
            Ok(false) => {
                result.already_absent += 1;
                EventOutcome::AlreadyAbsent
            }
            Err(err) => {
                warn!(
                    target: "flashprobe::cleanup",
                    index = index.0,
                    location = %self.store.describe(index),
                    error = %err,
                    "block removal failed"
                );
                result.warnings.push(CleanupWarning {
                    index: Some(index),
                    detail: err.to_string(),
                });
                EventOutcome::RemoveFailed {
                    detail: err.to_string(),
                }
            }
        };
        self.observer
            .on_event(&ProbeEvent::new(index, Phase::Cleanup, outcome));
    }

    fn release(&self, result: &mut CleanupResult) {
        match self.store.release() {
            Ok(released) => {
                result.released = released;
                debug!(target: "flashprobe::cleanup", released, "block directory release");
            }
            Err(err) => result.warnings.push(CleanupWarning {
                index: None,
                detail: format!("removing block directory failed: {err}"),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventLog;
    use fp_block::MemBlockStore;

    fn store_with(indices: &[u64]) -> MemBlockStore {
        let store = MemBlockStore::new();
        for &i in indices {
            store.insert(BlockIndex(i), vec![0_u8; 4]);
        }
        store
    }

    #[test]
    fn second_cleanup_deletes_nothing() {
        let store = store_with(&[0, 1, 2, 3]);
        let cleanup = Cleanup::new(&store);

        let first = cleanup.cleanup(Some(BlockIndex(3)));
        assert_eq!(first.deleted, 4);
        assert!(first.is_clean());

        let second = cleanup.cleanup(Some(BlockIndex(3)));
        assert_eq!(second.deleted, 0);
        assert_eq!(second.already_absent, 4);
        assert!(second.is_clean());
    }

    #[test]
    fn partial_previous_cleanup_is_tolerated() {
        let store = store_with(&[0, 2]);
        let result = Cleanup::new(&store).cleanup(Some(BlockIndex(2)));
        assert_eq!(result.deleted, 2);
        assert_eq!(result.already_absent, 1);
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn cleanup_all_removes_stragglers() {
        let store = store_with(&[0, 1, 7, 40]);
        let log = EventLog::new();
        let result = Cleanup::new(&store).with_observer(&log).cleanup_all();
        assert_eq!(result.deleted, 4);
        assert_eq!(
            log.indices(Phase::Cleanup),
            vec![BlockIndex(0), BlockIndex(1), BlockIndex(7), BlockIndex(40)]
        );
    }

    #[test]
    fn nothing_written_means_nothing_deleted() {
        let store = MemBlockStore::new();
        let result = Cleanup::new(&store).cleanup(None);
        assert_eq!(result, CleanupResult::default());
    }

    /// Store whose `remove` fails for one locked block.
    struct LockedBlockStore {
        inner: MemBlockStore,
        locked: BlockIndex,
    }

    impl BlockStore for LockedBlockStore {
        fn create(&self, index: BlockIndex) -> fp_error::Result<Box<dyn fp_block::BlockFile>> {
            self.inner.create(index)
        }

        fn open(&self, index: BlockIndex) -> fp_error::Result<Box<dyn fp_block::BlockFile>> {
            self.inner.open(index)
        }

        fn remove(&self, index: BlockIndex) -> fp_error::Result<bool> {
            if index == self.locked {
                return Err(fp_error::FpError::PermissionDenied);
            }
            self.inner.remove(index)
        }

        fn list(&self) -> fp_error::Result<Vec<BlockIndex>> {
            self.inner.list()
        }

        fn describe(&self, index: BlockIndex) -> String {
            self.inner.describe(index)
        }
    }

    #[test]
    fn removal_failure_is_a_warning_not_an_error() {
        let store = LockedBlockStore {
            inner: store_with(&[0, 1, 2, 3]),
            locked: BlockIndex(1),
        };
        let log = EventLog::new();
        let result = Cleanup::new(&store)
            .with_observer(&log)
            .cleanup(Some(BlockIndex(3)));

        assert_eq!(result.deleted, 3);
        assert_eq!(result.warnings.len(), 1);
        assert_eq!(result.warnings[0].index, Some(BlockIndex(1)));
        assert!(!result.is_clean());
        assert_eq!(store.list().unwrap(), vec![BlockIndex(1)]);

        let failed: Vec<BlockIndex> = log
            .events()
            .into_iter()
            .filter(|e| matches!(e.outcome, EventOutcome::RemoveFailed { .. }))
            .map(|e| e.index)
            .collect();
        assert_eq!(failed, vec![BlockIndex(1)]);
    }
}

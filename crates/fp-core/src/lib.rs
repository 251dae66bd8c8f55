#![forbid(unsafe_code)]
//! Capacity probe orchestration.
//!
//! A probe fills a target directory with deterministic, self-identifying
//! blocks until the volume refuses more data, then reads every block back
//! to find how much of what was accepted is actually retained. Counterfeit
//! flash that reports more capacity than it has silently wraps writes onto
//! earlier locations; the read-back phase detects this as earlier blocks
//! carrying the content of later ones.
//!
//! The entry points are [`CapacityProbe`] for full control over the store,
//! observer and cancellation, and [`run_probe`] / [`verify_existing`] for
//! the common directory-backed case.

pub mod cancel;
pub mod cleanup;
pub mod config;
pub mod event;
pub mod probe;
pub mod result;

pub use cancel::CancelToken;
pub use cleanup::{Cleanup, CleanupResult, CleanupWarning};
pub use config::{MismatchPolicy, RunConfig};
pub use event::{EventLog, EventOutcome, NoopObserver, ProbeEvent, ProbeObserver};
pub use probe::CapacityProbe;
pub use result::{
    AbortDetail, CorruptionEntry, RunResult, StopReason, Verdict, VerifyStop,
};

use fp_block::{BlockStore, DirBlockStore};
use fp_error::{FpError, Result};

/// Run a full probe against `config.target`.
///
/// Errors are returned only when the run cannot start: invalid config,
/// missing target, or a block directory still holding blocks from an
/// earlier run. Block-level failures end up in the [`RunResult`].
pub fn run_probe(
    config: RunConfig,
    cancel: CancelToken,
    observer: &dyn ProbeObserver,
) -> Result<RunResult> {
    config.validate()?;
    let store = DirBlockStore::create(&config.target)?;
    let leftover = store.list()?;
    if !leftover.is_empty() {
        return Err(FpError::InvalidConfig(format!(
            "{} holds {} block(s) from an earlier run; verify or clean them first",
            store.dir().display(),
            leftover.len()
        )));
    }
    let probe = CapacityProbe::new(config, &store)?
        .with_cancel(cancel)
        .with_observer(observer);
    Ok(probe.run())
}

/// Verify blocks an earlier run left under `config.target`.
pub fn verify_existing(
    config: RunConfig,
    cancel: CancelToken,
    observer: &dyn ProbeObserver,
) -> Result<RunResult> {
    config.validate()?;
    let store = DirBlockStore::open_existing(&config.target)?;
    let probe = CapacityProbe::new(config, &store)?
        .with_cancel(cancel)
        .with_observer(observer);
    probe.verify_existing()
}

//! Two-phase capacity probe.
//!
//! # Protocol
//!
//! 1. **Write phase.** Blocks `0, 1, 2, ...` are written strictly in order,
//!    each flushed before the next one starts, until the volume is full,
//!    the byte limit is reached, a write fails, or the cancel token is
//!    raised. The written indices always form the contiguous range
//!    `0..=last_written_index`.
//! 2. **Verify phase.** Only after the last write landed, every written
//!    block is read back in index order. Wraparound corruption is the
//!    overwrite of *earlier* blocks by *later* writes, so it is invisible
//!    to a check made right after each write.
//!
//! The trustworthy capacity is the run of leading blocks that verified
//! intact. The probe never panics or returns early on a block failure:
//! every path ends in a [`RunResult`].

use crate::cancel::CancelToken;
use crate::cleanup::Cleanup;
use crate::config::{MismatchPolicy, RunConfig};
use crate::event::{EventOutcome, NoopObserver, ProbeEvent, ProbeObserver};
use crate::result::{AbortDetail, CorruptionEntry, RunResult, StopReason, VerifyStop};
use fp_block::{
    BlockPattern, BlockStore, BlockWriter, IO_CHUNK_SIZE, WriteFailure, WriteOutcome,
    discover_contiguous,
};
use fp_error::Result;
use fp_types::{BlockIndex, Phase};
use fp_verify::{BlockVerifier, VerificationOutcome};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Blocks between periodic progress log lines.
const LOG_EVERY_BLOCKS: u64 = 64;

struct WritePhase {
    last: Option<BlockIndex>,
    stop: StopReason,
    failed: Option<BlockIndex>,
    abort: Option<AbortDetail>,
    discarded: Option<BlockIndex>,
    elapsed: Duration,
}

struct VerifyPhase {
    prefix: u64,
    matched: u64,
    stop: VerifyStop,
    first_corrupted: Option<BlockIndex>,
    first_read_error: Option<BlockIndex>,
    corruption_map: Vec<CorruptionEntry>,
    elapsed: Duration,
}

impl VerifyPhase {
    fn skipped() -> Self {
        Self {
            prefix: 0,
            matched: 0,
            stop: VerifyStop::Skipped,
            first_corrupted: None,
            first_read_error: None,
            corruption_map: Vec::new(),
            elapsed: Duration::ZERO,
        }
    }
}

/// Orchestrates one probe run against a [`BlockStore`].
pub struct CapacityProbe<'a> {
    config: RunConfig,
    store: &'a dyn BlockStore,
    observer: &'a dyn ProbeObserver,
    cancel: CancelToken,
    chunk_size: usize,
}

impl<'a> CapacityProbe<'a> {
    /// Validate `config` and bind it to `store`.
    pub fn new(config: RunConfig, store: &'a dyn BlockStore) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            store,
            observer: &NoopObserver,
            cancel: CancelToken::new(),
            chunk_size: IO_CHUNK_SIZE,
        })
    }

    #[must_use]
    pub fn with_observer(mut self, observer: &'a dyn ProbeObserver) -> Self {
        self.observer = observer;
        self
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    #[must_use]
    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    #[must_use]
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Run the full protocol: write, verify, clean up.
    pub fn run(&self) -> RunResult {
        let started = Instant::now();
        info!(
            target: "flashprobe::probe",
            target_dir = %self.config.target.display(),
            block_size = self.config.block_size.get(),
            max_total_bytes = ?self.config.max_total_bytes,
            policy = ?self.config.mismatch_policy,
            "probe start"
        );

        let write = self.write_phase();
        let verify = if write.stop.proceeds_to_verify() {
            self.verify_phase(write.last)
        } else {
            VerifyPhase::skipped()
        };
        let cleanup = self
            .config
            .cleanup
            .then(|| self.cleanup_handle().cleanup(write.last));

        let result = self.assemble(
            Some(write.stop),
            write.last,
            write.failed,
            write.abort,
            write.discarded,
            write.elapsed,
            verify,
            cleanup,
            started.elapsed(),
        );
        self.log_finish(&result);
        result
    }

    /// Verify blocks left on the store by an earlier run, without writing.
    ///
    /// The verified range is the longest contiguous run `0..=h` present on
    /// the store.
    pub fn verify_existing(&self) -> Result<RunResult> {
        let started = Instant::now();
        let stored = self.store.list()?;
        let last = discover_contiguous(self.store)?;
        let contiguous = last.map_or(0, BlockIndex::count_through);
        if u64::try_from(stored.len()).unwrap_or(u64::MAX) > contiguous {
            warn!(
                target: "flashprobe::probe",
                stored = stored.len(),
                contiguous,
                "stored blocks are not contiguous; verifying leading run only"
            );
        }
        info!(
            target: "flashprobe::probe",
            blocks = contiguous,
            block_size = self.config.block_size.get(),
            "verify-only run start"
        );

        let verify = self.verify_phase(last);
        let cleanup = self
            .config
            .cleanup
            .then(|| self.cleanup_handle().cleanup_all());

        let result = self.assemble(
            None,
            last,
            None,
            None,
            None,
            Duration::ZERO,
            verify,
            cleanup,
            started.elapsed(),
        );
        self.log_finish(&result);
        Ok(result)
    }

    fn cleanup_handle(&self) -> Cleanup<'_> {
        Cleanup::new(self.store).with_observer(self.observer)
    }

    fn emit(&self, index: BlockIndex, phase: Phase, outcome: EventOutcome) {
        self.observer
            .on_event(&ProbeEvent::new(index, phase, outcome));
    }

    fn write_phase(&self) -> WritePhase {
        let started = Instant::now();
        let size = self.config.block_size.get();
        let max_blocks = self.config.max_blocks();
        let writer = BlockWriter::new(self.store).with_chunk_size(self.chunk_size);

        let mut next = BlockIndex::ZERO;
        let mut last = None;
        let mut failed = None;
        let mut abort = None;

        let stop = loop {
            if max_blocks.is_some_and(|max| next.0 >= max) {
                break StopReason::LimitReached;
            }
            if self.cancel.is_cancelled() {
                break StopReason::Cancelled;
            }

            let content = BlockPattern::new(next, size);
            match writer.write(next, &content) {
                WriteOutcome::Success => {
                    last = Some(next);
                    self.emit(next, Phase::Write, EventOutcome::Written);
                    if next.count_through() % LOG_EVERY_BLOCKS == 0 {
                        debug!(
                            target: "flashprobe::probe",
                            blocks = next.count_through(),
                            bytes = self.config.block_size.bytes_for(next.count_through()),
                            "write progress"
                        );
                    }
                    match next.next() {
                        Some(following) => next = following,
                        None => break StopReason::LimitReached,
                    }
                }
                WriteOutcome::Failure(WriteFailure::OutOfSpace) => {
                    info!(
                        target: "flashprobe::probe",
                        index = next.0,
                        "volume reports full"
                    );
                    self.emit(next, Phase::Write, EventOutcome::OutOfSpace);
                    failed = Some(next);
                    break StopReason::CapacityReached;
                }
                WriteOutcome::Failure(WriteFailure::Io(err)) => {
                    warn!(
                        target: "flashprobe::probe",
                        index = next.0,
                        location = %self.store.describe(next),
                        error = %err,
                        "block write failed; aborting"
                    );
                    self.emit(
                        next,
                        Phase::Write,
                        EventOutcome::WriteFailed {
                            detail: err.to_string(),
                        },
                    );
                    failed = Some(next);
                    abort = Some(AbortDetail {
                        index: next,
                        cause: err.to_string(),
                    });
                    break StopReason::Aborted;
                }
            }
        };

        // The failed block may be partially on disk; it was never counted.
        let discarded = failed.and_then(|index| {
            let discard = self.cleanup_handle().discard(index);
            for warning in &discard.warnings {
                warn!(
                    target: "flashprobe::probe",
                    index = index.0,
                    detail = %warning.detail,
                    "partial block could not be discarded"
                );
            }
            (discard.deleted > 0).then_some(index)
        });

        info!(
            target: "flashprobe::probe",
            stop = ?stop,
            last_written = ?last.map(|i: BlockIndex| i.0),
            "write phase stopped"
        );
        WritePhase {
            last,
            stop,
            failed,
            abort,
            discarded,
            elapsed: started.elapsed(),
        }
    }

    fn verify_phase(&self, last: Option<BlockIndex>) -> VerifyPhase {
        let started = Instant::now();
        let size = self.config.block_size.get();
        let verifier = BlockVerifier::new(self.store).with_chunk_size(self.chunk_size);
        let stop_at_first = self.config.mismatch_policy == MismatchPolicy::StopAtFirst;

        let mut phase = VerifyPhase {
            stop: VerifyStop::Completed,
            ..VerifyPhase::skipped()
        };
        let mut intact_so_far = true;

        if let Some(last) = last {
            for i in 0..=last.0 {
                let index = BlockIndex(i);
                if self.cancel.is_cancelled() {
                    phase.stop = VerifyStop::Cancelled;
                    break;
                }

                let outcome = verifier.verify(index, size);
                self.emit(index, Phase::Verify, EventOutcome::from(&outcome));
                match &outcome {
                    VerificationOutcome::Match => {
                        phase.matched += 1;
                        if intact_so_far {
                            phase.prefix += 1;
                        }
                        continue;
                    }
                    VerificationOutcome::Mismatch(m) => {
                        warn!(
                            target: "flashprobe::probe",
                            index = i,
                            kind = %m.kind,
                            first_difference = m.first_difference,
                            "block content mismatch"
                        );
                        phase.first_corrupted.get_or_insert(index);
                    }
                    VerificationOutcome::ReadError(cause) => {
                        warn!(
                            target: "flashprobe::probe",
                            index = i,
                            cause = %cause,
                            "block read-back failed"
                        );
                        phase.first_read_error.get_or_insert(index);
                    }
                }

                intact_so_far = false;
                let read_error = matches!(outcome, VerificationOutcome::ReadError(_));
                phase.corruption_map.push(CorruptionEntry { index, outcome });
                if stop_at_first {
                    phase.stop = if read_error {
                        VerifyStop::StoppedAtReadError
                    } else {
                        VerifyStop::StoppedAtMismatch
                    };
                    break;
                }
            }
        }

        info!(
            target: "flashprobe::probe",
            stop = ?phase.stop,
            verified = phase.prefix,
            matched = phase.matched,
            bad = phase.corruption_map.len(),
            "verify phase stopped"
        );
        phase.elapsed = started.elapsed();
        phase
    }

    #[allow(clippy::too_many_arguments)]
    fn assemble(
        &self,
        write_stop: Option<StopReason>,
        last: Option<BlockIndex>,
        failed: Option<BlockIndex>,
        abort: Option<AbortDetail>,
        discarded: Option<BlockIndex>,
        write_elapsed: Duration,
        verify: VerifyPhase,
        cleanup: Option<crate::cleanup::CleanupResult>,
        elapsed: Duration,
    ) -> RunResult {
        let block_size = self.config.block_size;
        let blocks_written = last.map_or(0, BlockIndex::count_through);
        RunResult {
            block_size: block_size.get(),
            last_written_index: last,
            blocks_written,
            bytes_written: block_size.bytes_for(blocks_written),
            write_stop,
            first_write_failure_index: failed,
            abort,
            discarded_partial: discarded,
            blocks_verified: verify.prefix,
            bytes_verified: block_size.bytes_for(verify.prefix),
            blocks_matched: verify.matched,
            verify_stop: verify.stop,
            first_corrupted_index: verify.first_corrupted,
            first_read_error_index: verify.first_read_error,
            corruption_map: verify.corruption_map,
            write_elapsed,
            verify_elapsed: verify.elapsed,
            elapsed,
            cleanup,
        }
    }

    fn log_finish(&self, result: &RunResult) {
        info!(
            target: "flashprobe::probe",
            verdict = %result.verdict(),
            bytes_written = result.bytes_written,
            bytes_verified = result.bytes_verified,
            elapsed_ms = u64::try_from(result.elapsed.as_millis()).unwrap_or(u64::MAX),
            "probe finished"
        );
    }
}

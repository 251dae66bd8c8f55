//! Per-block progress events.
//!
//! The probe reports every block it touches to a [`ProbeObserver`]. The
//! core formats nothing; rendering is up to the caller.

use fp_types::{BlockIndex, Phase};
use fp_verify::{MismatchKind, ReadFailure, VerificationOutcome};
use parking_lot::Mutex;
use serde::Serialize;

/// What happened to a block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum EventOutcome {
    Written,
    OutOfSpace,
    WriteFailed { detail: String },
    Matched,
    Mismatched { kind: MismatchKind },
    ReadFailed { cause: ReadFailure },
    Removed,
    AlreadyAbsent,
    RemoveFailed { detail: String },
}

impl From<&VerificationOutcome> for EventOutcome {
    fn from(outcome: &VerificationOutcome) -> Self {
        match outcome {
            VerificationOutcome::Match => Self::Matched,
            VerificationOutcome::Mismatch(m) => Self::Mismatched { kind: m.kind },
            VerificationOutcome::ReadError(cause) => Self::ReadFailed {
                cause: cause.clone(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeEvent {
    pub index: BlockIndex,
    pub phase: Phase,
    #[serde(flatten)]
    pub outcome: EventOutcome,
}

impl ProbeEvent {
    #[must_use]
    pub fn new(index: BlockIndex, phase: Phase, outcome: EventOutcome) -> Self {
        Self {
            index,
            phase,
            outcome,
        }
    }
}

/// Receiver of progress events. Called synchronously from the probe
/// thread, so implementations should be quick.
pub trait ProbeObserver: Send + Sync {
    fn on_event(&self, event: &ProbeEvent);
}

/// Observer that drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl ProbeObserver for NoopObserver {
    fn on_event(&self, _event: &ProbeEvent) {}
}

impl<F> ProbeObserver for F
where
    F: Fn(&ProbeEvent) + Send + Sync,
{
    fn on_event(&self, event: &ProbeEvent) {
        self(event);
    }
}

/// Observer that records every event, for tests and post-run reports.
#[derive(Debug, Default)]
pub struct EventLog {
    events: Mutex<Vec<ProbeEvent>>,
}

impl EventLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn events(&self) -> Vec<ProbeEvent> {
        self.events.lock().clone()
    }

    /// Indices that produced events in `phase`, in emission order.
    #[must_use]
    pub fn indices(&self, phase: Phase) -> Vec<BlockIndex> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.phase == phase)
            .map(|e| e.index)
            .collect()
    }
}

impl ProbeObserver for EventLog {
    fn on_event(&self, event: &ProbeEvent) {
        self.events.lock().push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[test]
    fn closures_are_observers() {
        let seen = AtomicU64::new(0);
        let observer = |event: &ProbeEvent| {
            seen.fetch_add(event.index.0, Ordering::Relaxed);
        };
        let dyn_observer: &dyn ProbeObserver = &observer;
        dyn_observer.on_event(&ProbeEvent::new(BlockIndex(3), Phase::Write, EventOutcome::Written));
        dyn_observer.on_event(&ProbeEvent::new(BlockIndex(4), Phase::Write, EventOutcome::Written));
        assert_eq!(seen.load(Ordering::Relaxed), 7);
    }

    #[test]
    fn event_log_filters_by_phase() {
        let log = EventLog::new();
        log.on_event(&ProbeEvent::new(BlockIndex(0), Phase::Write, EventOutcome::Written));
        log.on_event(&ProbeEvent::new(BlockIndex(0), Phase::Verify, EventOutcome::Matched));
        log.on_event(&ProbeEvent::new(BlockIndex(0), Phase::Cleanup, EventOutcome::Removed));
        assert_eq!(log.indices(Phase::Verify), vec![BlockIndex(0)]);
        assert_eq!(log.events().len(), 3);
    }

    #[test]
    fn events_serialize_flat() {
        let event = ProbeEvent::new(
            BlockIndex(12),
            Phase::Verify,
            EventOutcome::Mismatched {
                kind: MismatchKind::Zeroed,
            },
        );
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(
            json,
            r#"{"index":12,"phase":"verify","outcome":"mismatched","kind":{"kind":"zeroed"}}"#
        );
    }
}

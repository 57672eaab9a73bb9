//! Single-flight result dispatch.
//!
//! Every accepted caller operation gets a pending-outcome slot. Resolution
//! sources race (normal completion, engine error, permission denial,
//! auto-stop); whichever resolves first wins and every later attempt is a
//! silent no-op, so a late duplicate engine event can never double-invoke
//! the caller. The session and playback machines each hold at most one
//! unresolved slot of their kind at a time, which keeps the per-kind
//! single-flight invariant structural.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::VoiceError;

/// The three logical operations a caller can invoke.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Listen,
    Stop,
    Speak,
}

/// Opaque token identifying one accepted operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OperationId(u64);

impl OperationId {
    pub fn value(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for OperationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Successful operation payloads.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Transcript of a listening session (listen and stop operations).
    Transcript(String),
    /// Utterance playback completed.
    Spoken,
}

/// What an operation ultimately resolves with.
pub type OperationResult = Result<Outcome, VoiceError>;

struct SlotInner {
    tx: Option<Sender<OperationResult>>,
}

/// Shared resolution target for one operation.
///
/// Cloneable so several asynchronous sources can race to resolve it; the
/// sender is taken under the lock, making delivery exactly-once.
#[derive(Clone)]
pub struct OutcomeSlot {
    id: OperationId,
    kind: OperationKind,
    inner: Arc<Mutex<SlotInner>>,
}

impl OutcomeSlot {
    pub fn id(&self) -> OperationId {
        self.id
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn is_resolved(&self) -> bool {
        self.inner.lock().tx.is_none()
    }

    /// Deliver the outcome. Returns `true` if this call performed the
    /// delivery, `false` if the slot was already resolved.
    pub fn resolve(&self, result: OperationResult) -> bool {
        let tx = self.inner.lock().tx.take();
        match tx {
            Some(tx) => {
                // The caller may have dropped its ticket; delivery is still
                // considered done.
                let _ = tx.send(result);
                true
            }
            None => {
                log::debug!(
                    "discarding duplicate resolution for {:?} operation {}",
                    self.kind,
                    self.id
                );
                false
            }
        }
    }
}

impl std::fmt::Debug for OutcomeSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutcomeSlot")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

/// Caller-side handle to an operation's eventual outcome.
pub struct OutcomeTicket {
    id: OperationId,
    kind: OperationKind,
    rx: Receiver<OperationResult>,
}

impl OutcomeTicket {
    pub fn id(&self) -> OperationId {
        self.id
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    /// Block until the operation resolves. If the controller went away
    /// without resolving (it resolves all pending slots on shutdown, so
    /// this is a process-teardown race), report the engine as unavailable
    /// rather than hanging.
    pub fn wait(&self) -> OperationResult {
        self.rx
            .recv()
            .unwrap_or(Err(VoiceError::EngineUnavailable))
    }

    /// Like [`wait`](Self::wait) with an upper bound. `None` on timeout.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<OperationResult> {
        match self.rx.recv_timeout(timeout) {
            Ok(result) => Some(result),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(Err(VoiceError::EngineUnavailable)),
        }
    }

    /// Non-blocking poll. `None` while the operation is still pending.
    pub fn try_wait(&self) -> Option<OperationResult> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(VoiceError::EngineUnavailable)),
        }
    }
}

/// Mints pending-outcome slots with process-unique operation ids.
pub struct Dispatcher {
    next_id: AtomicU64,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
        }
    }

    /// Allocate a slot/ticket pair for an operation being submitted.
    pub fn open(&self, kind: OperationKind) -> (OutcomeSlot, OutcomeTicket) {
        let id = OperationId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = channel();
        let slot = OutcomeSlot {
            id,
            kind,
            inner: Arc::new(Mutex::new(SlotInner { tx: Some(tx) })),
        };
        let ticket = OutcomeTicket { id, kind, rx };
        (slot, ticket)
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_resolution_wins() {
        let dispatcher = Dispatcher::new();
        let (slot, ticket) = dispatcher.open(OperationKind::Listen);

        assert!(slot.resolve(Ok(Outcome::Transcript("hello".into()))));
        assert!(!slot.resolve(Err(VoiceError::EngineError(3))));
        assert!(slot.is_resolved());

        assert_eq!(ticket.wait(), Ok(Outcome::Transcript("hello".into())));
        // Exactly one delivery: nothing else is queued.
        assert!(ticket.try_wait().is_none());
    }

    #[test]
    fn clones_share_the_same_slot() {
        let dispatcher = Dispatcher::new();
        let (slot, ticket) = dispatcher.open(OperationKind::Speak);
        let racer = slot.clone();

        assert!(racer.resolve(Ok(Outcome::Spoken)));
        assert!(!slot.resolve(Err(VoiceError::Superseded)));
        assert_eq!(ticket.wait(), Ok(Outcome::Spoken));
    }

    #[test]
    fn ids_are_unique_and_increasing() {
        let dispatcher = Dispatcher::new();
        let (a, _ta) = dispatcher.open(OperationKind::Listen);
        let (b, _tb) = dispatcher.open(OperationKind::Stop);
        let (c, _tc) = dispatcher.open(OperationKind::Speak);
        assert!(a.id() < b.id());
        assert!(b.id() < c.id());
    }

    #[test]
    fn try_wait_reports_pending_then_result() {
        let dispatcher = Dispatcher::new();
        let (slot, ticket) = dispatcher.open(OperationKind::Stop);

        assert!(ticket.try_wait().is_none());
        slot.resolve(Err(VoiceError::SessionBusy));
        assert_eq!(ticket.try_wait(), Some(Err(VoiceError::SessionBusy)));
    }

    #[test]
    fn wait_timeout_times_out_while_pending() {
        let dispatcher = Dispatcher::new();
        let (_slot, ticket) = dispatcher.open(OperationKind::Listen);
        assert!(ticket.wait_timeout(Duration::from_millis(10)).is_none());
    }
}

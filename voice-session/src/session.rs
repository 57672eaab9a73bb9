//! Listening-session state machine.
//!
//! One session at a time, `Idle -> AwaitingPermission -> Listening ->
//! Stopping -> Idle`. The machine exclusively owns the recognition handle
//! for the session's lifetime and releases it on every exit path, before
//! the pending slot resolves. Duplicate or late engine callbacks are
//! discarded by the generation tag and the state check, so the listen
//! operation resolves exactly once no matter what the platform delivers.

use std::sync::mpsc::Sender;
use std::time::Instant;

use crate::controller::ControllerEvent;
use crate::dispatch::{Outcome, OperationResult, OutcomeSlot};
use crate::engine::{
    PermissionGate, PermissionReply, RecognitionEngine, RecognitionEvent, RecognitionEvents,
    RecognitionSession, SessionGeneration,
};
use crate::error::VoiceError;
use crate::silence::{SilencePolicy, SilenceTracker};
use crate::vad::FrameLoudness;

/// Lifecycle of a listening session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    AwaitingPermission,
    Listening,
    Stopping,
}

pub(crate) struct SessionMachine {
    state: SessionState,
    generation: u64,
    auto_stop: bool,
    /// Latest partial fragment wins; fragments are never concatenated.
    transcript: String,
    /// Survives into `Idle` so a stop after completion still answers.
    last_transcript: String,
    slot: Option<OutcomeSlot>,
    handle: Option<Box<dyn RecognitionSession>>,
    tracker: SilenceTracker,
}

impl SessionMachine {
    pub fn new(policy: SilencePolicy) -> Self {
        Self {
            state: SessionState::Idle,
            generation: 0,
            auto_stop: false,
            transcript: String::new(),
            last_transcript: String::new(),
            slot: None,
            handle: None,
            tracker: SilenceTracker::new(policy),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    #[cfg(test)]
    pub fn last_transcript(&self) -> &str {
        &self.last_transcript
    }

    /// Accept a begin-listening operation, or refuse it immediately with
    /// `SessionBusy` when a session is already underway. No queueing.
    pub fn begin(
        &mut self,
        auto_stop: bool,
        slot: OutcomeSlot,
        gate: &mut dyn PermissionGate,
        tx: &Sender<ControllerEvent>,
    ) {
        if self.state != SessionState::Idle {
            log::warn!("begin-listening refused, session busy in {:?}", self.state);
            slot.resolve(Err(VoiceError::SessionBusy));
            return;
        }

        self.generation += 1;
        self.auto_stop = auto_stop;
        self.transcript.clear();
        self.slot = Some(slot);
        self.state = SessionState::AwaitingPermission;
        log::info!(
            "session {}: requesting microphone permission (auto_stop={})",
            self.generation,
            auto_stop
        );
        gate.request(PermissionReply::new(
            tx.clone(),
            SessionGeneration(self.generation),
        ));
    }

    /// Permission gate resolved. Opens the recognition capability on grant;
    /// the recognizer is never acquired on denial.
    pub fn on_permission(
        &mut self,
        generation: SessionGeneration,
        granted: bool,
        engine: &mut dyn RecognitionEngine,
        language: &str,
        tx: &Sender<ControllerEvent>,
        now: Instant,
    ) {
        if generation.0 != self.generation || self.state != SessionState::AwaitingPermission {
            log::debug!("discarding permission reply for stale session {generation:?}");
            return;
        }

        if !granted {
            log::warn!("session {}: microphone permission denied", self.generation);
            self.finish(Err(VoiceError::PermissionDenied));
            return;
        }

        let events = RecognitionEvents::new(tx.clone(), generation);
        match engine.start(language, events) {
            Ok(handle) => {
                self.handle = Some(handle);
                self.state = SessionState::Listening;
                if self.auto_stop {
                    self.tracker.arm(now);
                }
                log::info!("session {}: listening", self.generation);
            }
            Err(err) => {
                log::error!("session {}: recognizer start failed: {err}", self.generation);
                self.finish(Err(err));
            }
        }
    }

    /// A recognition callback arrived. Stale-session events are no-ops.
    pub fn on_recognition(
        &mut self,
        generation: SessionGeneration,
        event: RecognitionEvent,
        now: Instant,
    ) {
        if generation.0 != self.generation || self.state != SessionState::Listening {
            log::debug!("discarding recognition event for stale session {generation:?}");
            return;
        }

        match event {
            RecognitionEvent::Partial(text) => {
                self.transcript = text;
                self.tracker.on_activity(now);
            }
            RecognitionEvent::Activity => {
                self.tracker.on_activity(now);
            }
            RecognitionEvent::AudioFrame(samples) => {
                let loudness = FrameLoudness::measure(&samples);
                if self.tracker.on_frame(&loudness, now) {
                    self.auto_stop_now();
                }
            }
            RecognitionEvent::Final(text) => {
                log::info!("session {}: final result", self.generation);
                self.transcript = text;
                let transcript = std::mem::take(&mut self.transcript);
                self.finish(Ok(Outcome::Transcript(transcript)));
            }
            RecognitionEvent::Error(code) => {
                log::error!("session {}: engine error {code}", self.generation);
                // Transcript is discarded on an engine error.
                self.transcript.clear();
                self.finish(Err(VoiceError::EngineError(code)));
            }
        }
    }

    /// Explicit end-listening. Callable in any state; from `Idle` it
    /// trivially succeeds with the last known transcript. From a live
    /// session it resolves both the original listen operation and this stop
    /// operation with the accumulated transcript.
    pub fn end(&mut self, slot: OutcomeSlot) {
        if self.state == SessionState::Idle {
            slot.resolve(Ok(Outcome::Transcript(self.last_transcript.clone())));
            return;
        }

        log::info!("session {}: stop requested", self.generation);
        let transcript = std::mem::take(&mut self.transcript);
        self.finish(Ok(Outcome::Transcript(transcript.clone())));
        slot.resolve(Ok(Outcome::Transcript(transcript)));
    }

    /// Next wake-up the event loop should honor for the fixed-timeout
    /// policy.
    pub fn deadline(&self) -> Option<Instant> {
        self.tracker.deadline()
    }

    /// Check the silence countdown; fires the auto-stop when it elapsed.
    pub fn poll_deadline(&mut self, now: Instant) {
        if self.tracker.check_deadline(now) {
            self.auto_stop_now();
        }
    }

    /// Resolve any live session as an internally triggered stop so no slot
    /// is left unresolved at teardown.
    pub fn shutdown(&mut self) {
        if self.state != SessionState::Idle {
            let transcript = std::mem::take(&mut self.transcript);
            self.finish(Ok(Outcome::Transcript(transcript)));
        }
    }

    /// Silence policy fired: behave exactly like an internal end-listening,
    /// resolving the original listen operation with the transcript.
    fn auto_stop_now(&mut self) {
        log::info!("session {}: silence auto-stop", self.generation);
        let transcript = std::mem::take(&mut self.transcript);
        self.finish(Ok(Outcome::Transcript(transcript)));
    }

    /// Terminal transition. Capture resources are released before the slot
    /// resolves, on success and error paths alike.
    fn finish(&mut self, result: OperationResult) {
        self.state = SessionState::Stopping;
        if let Some(mut handle) = self.handle.take() {
            handle.cancel();
        }
        self.tracker.disarm();

        if let Ok(Outcome::Transcript(text)) = &result {
            self.last_transcript = text.clone();
        }
        if let Some(slot) = self.slot.take() {
            slot.resolve(result);
        }
        self.state = SessionState::Idle;
    }
}

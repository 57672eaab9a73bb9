//! Speech playback controller.
//!
//! A small independent machine, `Idle -> Speaking -> Idle`, owning the
//! synthesis handle for the one utterance in flight. A new speak request
//! while speaking flushes the engine's current utterance and rebinds the
//! pending slot; the interrupted request resolves `Superseded` rather than
//! hanging. Lifecycle events are utterance-tagged, so a late callback from
//! a flushed utterance is a no-op.

use std::sync::mpsc::Sender;

use crate::controller::ControllerEvent;
use crate::dispatch::{Outcome, OutcomeSlot};
use crate::engine::{
    SynthesisEngine, SynthesisEvent, SynthesisEvents, SynthesisHandle, Utterance, UtteranceId,
};
use crate::error::VoiceError;

/// Lifecycle of the playback controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Speaking,
}

struct CurrentUtterance {
    id: UtteranceId,
    slot: OutcomeSlot,
    handle: Box<dyn SynthesisHandle>,
}

pub(crate) struct PlaybackController {
    state: PlaybackState,
    next_utterance: u64,
    current: Option<CurrentUtterance>,
}

impl PlaybackController {
    pub fn new() -> Self {
        Self {
            state: PlaybackState::Idle,
            next_utterance: 0,
            current: None,
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    /// Submit a speak request. Empty text fails immediately; an in-flight
    /// utterance is flushed at the engine and its slot resolves
    /// `Superseded` before the new one is submitted.
    pub fn speak(
        &mut self,
        text: &str,
        rate: f32,
        slot: OutcomeSlot,
        engine: &mut dyn SynthesisEngine,
        tx: &Sender<ControllerEvent>,
    ) {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            slot.resolve(Err(VoiceError::InvalidArgument(
                "text must not be empty".into(),
            )));
            return;
        }

        if let Some(mut previous) = self.current.take() {
            log::info!("utterance {}: superseded by a new speak request", previous.id);
            previous.handle.cancel();
            previous.slot.resolve(Err(VoiceError::Superseded));
        }

        self.next_utterance += 1;
        let utterance = Utterance {
            id: UtteranceId(self.next_utterance),
            text: trimmed.to_string(),
            rate,
        };

        let events = SynthesisEvents::new(tx.clone(), utterance.id);
        match engine.speak(&utterance, events) {
            Ok(handle) => {
                log::info!("utterance {}: submitted ({} chars)", utterance.id, utterance.text.len());
                self.current = Some(CurrentUtterance {
                    id: utterance.id,
                    slot,
                    handle,
                });
                self.state = PlaybackState::Speaking;
            }
            Err(err) => {
                log::error!("utterance {}: submit failed: {err}", utterance.id);
                slot.resolve(Err(err));
                self.state = PlaybackState::Idle;
            }
        }
    }

    /// A synthesis lifecycle event arrived. Events for anything but the
    /// current utterance are discarded.
    pub fn on_synthesis(&mut self, id: UtteranceId, event: SynthesisEvent) {
        let current = match &self.current {
            Some(current) if current.id == id => current.id,
            _ => {
                log::debug!("discarding synthesis event for stale utterance {id}");
                return;
            }
        };

        match event {
            SynthesisEvent::Started => {
                log::debug!("utterance {current}: playback started");
            }
            SynthesisEvent::Finished => {
                if let Some(done) = self.current.take() {
                    log::info!("utterance {current}: playback finished");
                    done.slot.resolve(Ok(Outcome::Spoken));
                }
                self.state = PlaybackState::Idle;
            }
            SynthesisEvent::Failed(reason) => {
                if let Some(failed) = self.current.take() {
                    log::error!("utterance {current}: synthesis failed: {reason}");
                    failed.slot.resolve(Err(VoiceError::SynthesisFailed(reason)));
                }
                self.state = PlaybackState::Idle;
            }
            SynthesisEvent::Cancelled => {
                // Cancelled by the platform itself; our own supersede path
                // resolved the slot already, in which case this is a no-op.
                if let Some(cancelled) = self.current.take() {
                    cancelled.slot.resolve(Err(VoiceError::Superseded));
                }
                self.state = PlaybackState::Idle;
            }
        }
    }

    /// Flush and resolve any in-flight utterance at teardown.
    pub fn shutdown(&mut self) {
        if let Some(mut current) = self.current.take() {
            current.handle.cancel();
            current.slot.resolve(Err(VoiceError::Superseded));
        }
        self.state = PlaybackState::Idle;
    }
}

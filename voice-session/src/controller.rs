//! Event fan-in and the caller-facing surface.
//!
//! All mutable session state lives on one controller thread. Caller
//! operations and engine callbacks are messages posted into its channel;
//! the loop processes them in arrival order, so no state is ever mutated
//! from two callback contexts at once. The fixed-timeout silence policy is
//! honored by bounding `recv_timeout` with the armed deadline.

use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crate::dispatch::{Dispatcher, OperationKind, OutcomeSlot, OutcomeTicket};
use crate::engine::{
    PermissionGate, RecognitionEngine, RecognitionEvent, SessionGeneration, SynthesisEngine,
    SynthesisEvent, UtteranceId,
};
use crate::error::VoiceError;
use crate::playback::PlaybackController;
use crate::session::SessionMachine;
use crate::silence::SilencePolicy;

/// Controller configuration.
#[derive(Debug, Clone)]
pub struct VoiceControllerConfig {
    /// Auto-stop behavior for sessions started with `auto_stop = true`.
    pub silence_policy: SilencePolicy,
    /// Language tag handed to the recognition engine.
    pub language: String,
    /// Speech rate handed to the synthesis engine.
    pub speech_rate: f32,
}

impl Default for VoiceControllerConfig {
    fn default() -> Self {
        Self {
            silence_policy: SilencePolicy::default(),
            language: "en-US".to_string(),
            speech_rate: 1.0,
        }
    }
}

/// The external collaborators, injected rather than ambient.
pub struct Engines {
    pub permission: Box<dyn PermissionGate>,
    pub recognition: Box<dyn RecognitionEngine>,
    pub synthesis: Box<dyn SynthesisEngine>,
}

/// Everything the controller loop can receive, from any thread.
#[derive(Debug)]
pub(crate) enum ControllerEvent {
    BeginListening { auto_stop: bool, slot: OutcomeSlot },
    EndListening { slot: OutcomeSlot },
    Speak { text: String, slot: OutcomeSlot },
    Permission(SessionGeneration, bool),
    Recognition(SessionGeneration, RecognitionEvent),
    Synthesis(UtteranceId, SynthesisEvent),
    Shutdown,
}

/// Voice-interaction session controller.
///
/// Operations are fire-and-eventually-resolve: each returns an
/// [`OutcomeTicket`] that resolves exactly once, whatever the engines
/// deliver in the meantime.
pub struct VoiceController {
    tx: Sender<ControllerEvent>,
    dispatcher: Dispatcher,
    worker: Option<JoinHandle<()>>,
}

impl VoiceController {
    pub fn new(config: VoiceControllerConfig, engines: Engines) -> Self {
        let (tx, rx) = channel();
        let loop_tx = tx.clone();
        let worker = thread::Builder::new()
            .name("voice-session".to_string())
            .spawn(move || run_loop(config, engines, rx, loop_tx))
            .ok();

        if worker.is_none() {
            log::error!("failed to spawn the voice-session controller thread");
        }

        Self {
            tx,
            dispatcher: Dispatcher::new(),
            worker,
        }
    }

    /// Begin a listening session. Fails with `SessionBusy` when one is
    /// already underway.
    pub fn begin_listening(&self, auto_stop: bool) -> OutcomeTicket {
        let (slot, ticket) = self.dispatcher.open(OperationKind::Listen);
        self.post(ControllerEvent::BeginListening {
            auto_stop,
            slot: slot.clone(),
        }, slot);
        ticket
    }

    /// End the current listening session, or trivially succeed from idle.
    pub fn end_listening(&self) -> OutcomeTicket {
        let (slot, ticket) = self.dispatcher.open(OperationKind::Stop);
        self.post(ControllerEvent::EndListening { slot: slot.clone() }, slot);
        ticket
    }

    /// Speak text aloud, flushing any utterance already in flight.
    pub fn speak(&self, text: impl Into<String>) -> OutcomeTicket {
        let (slot, ticket) = self.dispatcher.open(OperationKind::Speak);
        self.post(
            ControllerEvent::Speak {
                text: text.into(),
                slot: slot.clone(),
            },
            slot,
        );
        ticket
    }

    fn post(&self, event: ControllerEvent, slot: OutcomeSlot) {
        if self.tx.send(event).is_err() {
            // Controller thread is gone; the operation must still resolve.
            slot.resolve(Err(VoiceError::EngineUnavailable));
        }
    }
}

impl Drop for VoiceController {
    fn drop(&mut self) {
        let _ = self.tx.send(ControllerEvent::Shutdown);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn run_loop(
    config: VoiceControllerConfig,
    mut engines: Engines,
    rx: Receiver<ControllerEvent>,
    tx: Sender<ControllerEvent>,
) {
    let mut session = SessionMachine::new(config.silence_policy);
    let mut playback = PlaybackController::new();
    log::debug!("controller loop started ({:?})", config.silence_policy);

    loop {
        let received = match session.deadline() {
            Some(deadline) => {
                let timeout = deadline.saturating_duration_since(Instant::now());
                match rx.recv_timeout(timeout) {
                    Ok(event) => Some(event),
                    Err(RecvTimeoutError::Timeout) => None,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            None => match rx.recv() {
                Ok(event) => Some(event),
                Err(_) => break,
            },
        };

        let Some(event) = received else {
            session.poll_deadline(Instant::now());
            continue;
        };

        match event {
            ControllerEvent::BeginListening { auto_stop, slot } => {
                session.begin(auto_stop, slot, engines.permission.as_mut(), &tx);
            }
            ControllerEvent::EndListening { slot } => {
                session.end(slot);
            }
            ControllerEvent::Speak { text, slot } => {
                playback.speak(
                    &text,
                    config.speech_rate,
                    slot,
                    engines.synthesis.as_mut(),
                    &tx,
                );
            }
            ControllerEvent::Permission(generation, granted) => {
                session.on_permission(
                    generation,
                    granted,
                    engines.recognition.as_mut(),
                    &config.language,
                    &tx,
                    Instant::now(),
                );
            }
            ControllerEvent::Recognition(generation, event) => {
                session.on_recognition(generation, event, Instant::now());
            }
            ControllerEvent::Synthesis(utterance, event) => {
                playback.on_synthesis(utterance, event);
            }
            ControllerEvent::Shutdown => break,
        }

        // An armed countdown may have elapsed while the event was handled.
        session.poll_deadline(Instant::now());
    }

    session.shutdown();
    playback.shutdown();
    log::debug!("controller loop stopped");
}

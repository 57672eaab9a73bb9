//! Capability interfaces for the external platform collaborators.
//!
//! The permission gate, recognition engine, and synthesis engine live
//! outside this crate (the host platform owns them). They are injected as
//! trait objects and post their callbacks through tagged senders, so every
//! asynchronous source funnels into the controller's single event loop
//! instead of mutating session state from its own callback context.

use std::sync::mpsc::Sender;

use crate::controller::ControllerEvent;
use crate::error::VoiceError;

/// Monotonic tag for one listening session. Callbacks carrying an old
/// generation are discarded by the controller, which is how duplicate or
/// late platform events become no-ops.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionGeneration(pub u64);

/// Identifier of one utterance submitted to the synthesis engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct UtteranceId(pub u64);

impl std::fmt::Display for UtteranceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Callbacks a recognition session can deliver.
#[derive(Debug, Clone, PartialEq)]
pub enum RecognitionEvent {
    /// Partial transcript fragment. Latest wins; fragments are not
    /// concatenated.
    Partial(String),
    /// Final transcript. Terminates the session.
    Final(String),
    /// Engine-reported failure code. Terminates the session.
    Error(i32),
    /// Captured audio frame (amplitude samples), consumed by the silence
    /// policy and discarded.
    AudioFrame(Vec<f32>),
    /// Engine-level activity pulse: speech start, amplitude change, buffer
    /// received.
    Activity,
}

/// Lifecycle callbacks for one utterance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SynthesisEvent {
    Started,
    Finished,
    Failed(String),
    Cancelled,
}

/// Resolves a pending permission request. Generation-tagged: a reply for a
/// session that already ended is dropped on the controller side.
#[derive(Clone)]
pub struct PermissionReply {
    tx: Sender<ControllerEvent>,
    generation: SessionGeneration,
}

impl PermissionReply {
    pub(crate) fn new(tx: Sender<ControllerEvent>, generation: SessionGeneration) -> Self {
        Self { tx, generation }
    }

    pub fn generation(&self) -> SessionGeneration {
        self.generation
    }

    /// Report the gate's decision. Safe to call from any thread; a send
    /// after controller shutdown is silently dropped.
    pub fn resolve(&self, granted: bool) {
        let _ = self
            .tx
            .send(ControllerEvent::Permission(self.generation, granted));
    }
}

/// Posts recognition callbacks into the controller, tagged with the session
/// they belong to.
#[derive(Clone)]
pub struct RecognitionEvents {
    tx: Sender<ControllerEvent>,
    generation: SessionGeneration,
}

impl RecognitionEvents {
    pub(crate) fn new(tx: Sender<ControllerEvent>, generation: SessionGeneration) -> Self {
        Self { tx, generation }
    }

    pub fn generation(&self) -> SessionGeneration {
        self.generation
    }

    pub fn post(&self, event: RecognitionEvent) {
        let _ = self
            .tx
            .send(ControllerEvent::Recognition(self.generation, event));
    }

    pub fn partial(&self, text: impl Into<String>) {
        self.post(RecognitionEvent::Partial(text.into()));
    }

    pub fn final_result(&self, text: impl Into<String>) {
        self.post(RecognitionEvent::Final(text.into()));
    }

    pub fn error(&self, code: i32) {
        self.post(RecognitionEvent::Error(code));
    }

    pub fn audio_frame(&self, samples: Vec<f32>) {
        self.post(RecognitionEvent::AudioFrame(samples));
    }

    pub fn activity(&self) {
        self.post(RecognitionEvent::Activity);
    }
}

/// Posts synthesis lifecycle callbacks, tagged with their utterance.
#[derive(Clone)]
pub struct SynthesisEvents {
    tx: Sender<ControllerEvent>,
    utterance: UtteranceId,
}

impl SynthesisEvents {
    pub(crate) fn new(tx: Sender<ControllerEvent>, utterance: UtteranceId) -> Self {
        Self { tx, utterance }
    }

    pub fn utterance(&self) -> UtteranceId {
        self.utterance
    }

    pub fn post(&self, event: SynthesisEvent) {
        let _ = self
            .tx
            .send(ControllerEvent::Synthesis(self.utterance, event));
    }

    pub fn started(&self) {
        self.post(SynthesisEvent::Started);
    }

    pub fn finished(&self) {
        self.post(SynthesisEvent::Finished);
    }

    pub fn failed(&self, reason: impl Into<String>) {
        self.post(SynthesisEvent::Failed(reason.into()));
    }

    pub fn cancelled(&self) {
        self.post(SynthesisEvent::Cancelled);
    }
}

/// Asynchronous microphone-permission gate.
pub trait PermissionGate: Send {
    /// Request capture permission. The gate resolves `reply`, possibly
    /// after this call returns and possibly from another thread.
    fn request(&mut self, reply: PermissionReply);
}

/// Continuous speech-recognition engine capability.
pub trait RecognitionEngine: Send {
    /// Open a recognition session with its capture stream. Callbacks flow
    /// through `events` until the returned handle is cancelled or dropped.
    /// A start failure surfaces as [`VoiceError::EngineUnavailable`].
    fn start(
        &mut self,
        language: &str,
        events: RecognitionEvents,
    ) -> Result<Box<dyn RecognitionSession>, VoiceError>;
}

/// Exclusive handle to an active recognition session. Dropping it releases
/// the capture resources.
pub trait RecognitionSession: Send {
    /// Cancel recognition. Events already in flight may still arrive; the
    /// generation tag makes them no-ops.
    fn cancel(&mut self);
}

/// One speak request as submitted to the synthesis engine.
#[derive(Clone, Debug, PartialEq)]
pub struct Utterance {
    pub id: UtteranceId,
    pub text: String,
    pub rate: f32,
}

/// Speech-synthesis engine capability. One utterance in flight at a time;
/// submitting a new one while speaking is preceded by a cancel of the old
/// handle (engine-level flush).
pub trait SynthesisEngine: Send {
    fn speak(
        &mut self,
        utterance: &Utterance,
        events: SynthesisEvents,
    ) -> Result<Box<dyn SynthesisHandle>, VoiceError>;
}

/// Handle to an in-flight utterance.
pub trait SynthesisHandle: Send {
    /// Flush the utterance at the engine level.
    fn cancel(&mut self);
}

//! voice-session - Voice-interaction session controller
//!
//! Sits between application logic and two opaque platform speech services
//! (continuous recognition and synthesis), turning their asynchronous,
//! out-of-order callbacks into exactly-once results for three operations:
//! begin listening, end listening, and speak.
//!
//! The platform engines themselves are external collaborators injected
//! through the capability traits in [`engine`].

// Core modules
pub mod controller;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod playback;
pub mod session;
pub mod silence;
pub mod vad;

// Re-export main types for convenience
pub use controller::{Engines, VoiceController, VoiceControllerConfig};
pub use dispatch::{
    Dispatcher, OperationId, OperationKind, OperationResult, Outcome, OutcomeSlot, OutcomeTicket,
};
pub use engine::{
    PermissionGate, PermissionReply, RecognitionEngine, RecognitionEvent, RecognitionEvents,
    RecognitionSession, SessionGeneration, SynthesisEngine, SynthesisEvent, SynthesisEvents,
    SynthesisHandle, Utterance, UtteranceId,
};
pub use error::VoiceError;
pub use playback::PlaybackState;
pub use session::SessionState;
pub use silence::{SilencePolicy, SilenceTracker};
pub use vad::FrameLoudness;

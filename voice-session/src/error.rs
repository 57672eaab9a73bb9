// Terminal error outcomes for caller operations.
//
// Every error here is delivered through the same pending-outcome slot as a
// success. There is no silent-recovery path; retries are the caller's call.

/// Error kinds a caller operation can resolve with.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VoiceError {
    #[error("Microphone permission denied")]
    PermissionDenied,
    #[error("Recognition engine unavailable")]
    EngineUnavailable,
    #[error("Recognition engine error {0}")]
    EngineError(i32),
    #[error("A listening session is already active")]
    SessionBusy,
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Speech synthesis failed: {0}")]
    SynthesisFailed(String),
    #[error("Superseded by a newer request")]
    Superseded,
}

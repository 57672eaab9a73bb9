//! Capability adapters backed by the NDJSON link.
//!
//! The host platform owns the real permission gate, recognizer, and
//! synthesizer. These adapters turn the core's engine calls into outbound
//! `event` lines for the host to execute, and route the host's injected
//! callback lines back into whichever session or utterance is live. The
//! routing slots only ever hold the current target; anything arriving for
//! a finished one is logged and dropped, which the core's single-flight
//! layer makes safe.

use std::io::Write;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::json;

use voice_session::{
    PermissionGate, PermissionReply, RecognitionEngine, RecognitionEvent, RecognitionEvents,
    RecognitionSession, SynthesisEngine, SynthesisEvent, SynthesisEvents, SynthesisHandle,
    Utterance, UtteranceId, VoiceError,
};

use crate::protocol::EventEnvelope;

/// Protocol output writer; stdout carries NDJSON only, shared between the
/// request loop, the outcome waiters, and the engine adapters.
pub type SharedWriter = Arc<Mutex<Box<dyn Write + Send>>>;

pub fn write_json<T: serde::Serialize>(writer: &SharedWriter, value: &T) -> std::io::Result<()> {
    let encoded = serde_json::to_string(value)
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::Other, err.to_string()))?;
    let mut writer = writer.lock();
    writeln!(writer, "{encoded}")?;
    writer.flush()
}

/// Shared routing state between the stdin loop and the engine adapters.
pub struct PlatformLink {
    writer: SharedWriter,
    permission: Mutex<Option<PermissionReply>>,
    recognition: Mutex<Option<RecognitionEvents>>,
    synthesis: Mutex<Option<SynthesisEvents>>,
}

impl PlatformLink {
    pub fn new(writer: SharedWriter) -> Arc<Self> {
        Arc::new(Self {
            writer,
            permission: Mutex::new(None),
            recognition: Mutex::new(None),
            synthesis: Mutex::new(None),
        })
    }

    fn emit(&self, event: EventEnvelope) {
        if let Err(err) = write_json(&self.writer, &event) {
            eprintln!("[bridge] failed to emit {} event: {err}", event.event);
        }
    }

    /// Injected `permission.result` line. Single-shot: the stored reply is
    /// consumed.
    pub fn route_permission(&self, granted: bool) {
        match self.permission.lock().take() {
            Some(reply) => reply.resolve(granted),
            None => eprintln!("[bridge] dropping permission.result with no pending request"),
        }
    }

    /// Injected `recognizer.*` line for the live session, if any.
    pub fn route_recognition(&self, event: RecognitionEvent) {
        match self.recognition.lock().as_ref() {
            Some(events) => events.post(event),
            None => eprintln!("[bridge] dropping recognizer event with no live session"),
        }
    }

    /// Injected `synthesis.*` line for the utterance it names.
    pub fn route_synthesis(&self, utterance: UtteranceId, event: SynthesisEvent) {
        let guard = self.synthesis.lock();
        match guard.as_ref() {
            Some(events) if events.utterance() == utterance => events.post(event),
            _ => eprintln!("[bridge] dropping synthesis event for stale utterance {utterance}"),
        }
    }
}

pub struct BridgePermissionGate {
    link: Arc<PlatformLink>,
}

impl BridgePermissionGate {
    pub fn new(link: Arc<PlatformLink>) -> Self {
        Self { link }
    }
}

impl PermissionGate for BridgePermissionGate {
    fn request(&mut self, reply: PermissionReply) {
        *self.link.permission.lock() = Some(reply);
        self.link.emit(EventEnvelope::new("permission.request", json!({})));
    }
}

pub struct BridgeRecognitionEngine {
    link: Arc<PlatformLink>,
}

impl BridgeRecognitionEngine {
    pub fn new(link: Arc<PlatformLink>) -> Self {
        Self { link }
    }
}

impl RecognitionEngine for BridgeRecognitionEngine {
    fn start(
        &mut self,
        language: &str,
        events: RecognitionEvents,
    ) -> Result<Box<dyn RecognitionSession>, VoiceError> {
        *self.link.recognition.lock() = Some(events);
        self.link.emit(EventEnvelope::new(
            "recognizer.start",
            json!({ "language": language }),
        ));
        Ok(Box::new(BridgeRecognitionSession {
            link: self.link.clone(),
            released: false,
        }))
    }
}

struct BridgeRecognitionSession {
    link: Arc<PlatformLink>,
    released: bool,
}

impl BridgeRecognitionSession {
    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        *self.link.recognition.lock() = None;
        self.link
            .emit(EventEnvelope::new("recognizer.cancel", json!({})));
    }
}

impl RecognitionSession for BridgeRecognitionSession {
    fn cancel(&mut self) {
        self.release();
    }
}

impl Drop for BridgeRecognitionSession {
    fn drop(&mut self) {
        self.release();
    }
}

pub struct BridgeSynthesisEngine {
    link: Arc<PlatformLink>,
}

impl BridgeSynthesisEngine {
    pub fn new(link: Arc<PlatformLink>) -> Self {
        Self { link }
    }
}

impl SynthesisEngine for BridgeSynthesisEngine {
    fn speak(
        &mut self,
        utterance: &Utterance,
        events: SynthesisEvents,
    ) -> Result<Box<dyn SynthesisHandle>, VoiceError> {
        *self.link.synthesis.lock() = Some(events);
        self.link.emit(EventEnvelope::new(
            "synthesis.speak",
            json!({
                "utterance_id": utterance.id.0,
                "text": utterance.text,
                "rate": utterance.rate,
            }),
        ));
        Ok(Box::new(BridgeSynthesisHandle {
            link: self.link.clone(),
            id: utterance.id,
        }))
    }
}

struct BridgeSynthesisHandle {
    link: Arc<PlatformLink>,
    id: UtteranceId,
}

impl BridgeSynthesisHandle {
    /// Drop the routing slot if it still points at this utterance. A newer
    /// speak may have rebound it already.
    fn unbind(&self) {
        let mut guard = self.link.synthesis.lock();
        if guard
            .as_ref()
            .map(|events| events.utterance() == self.id)
            .unwrap_or(false)
        {
            *guard = None;
        }
    }
}

impl SynthesisHandle for BridgeSynthesisHandle {
    fn cancel(&mut self) {
        self.unbind();
        self.link.emit(EventEnvelope::new(
            "synthesis.cancel",
            json!({ "utterance_id": self.id.0 }),
        ));
    }
}

impl Drop for BridgeSynthesisHandle {
    fn drop(&mut self) {
        // Finished utterances just unbind; cancel is only ever explicit.
        self.unbind();
    }
}

mod audio;
mod engines;
mod protocol;

use std::env;
use std::io::{self, BufRead};
use std::str::FromStr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use audio::{decode_audio_to_f32, AudioPayload, DEFAULT_CHANNELS, DEFAULT_SAMPLE_RATE_HZ};
use engines::{
    write_json, BridgePermissionGate, BridgeRecognitionEngine, BridgeSynthesisEngine, PlatformLink,
    SharedWriter,
};
use protocol::{
    ErrorCode, RequestEnvelope, ResponseEnvelope, RpcError, RpcMethod, MAX_REQUEST_BYTES,
    PROTOCOL_VERSION,
};
use voice_session::{
    Engines, Outcome, OutcomeTicket, RecognitionEvent, SilencePolicy, SynthesisEvent, UtteranceId,
    VoiceController, VoiceControllerConfig,
};

const UNKNOWN_REQUEST_ID: &str = "_unknown";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ListenStartParams {
    auto_stop: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct SpeakParams {
    text: String,
}

#[derive(Debug, Deserialize)]
struct EventLine {
    event: String,
    #[serde(default)]
    data: Value,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("[bridge] fatal error: {err}");
        std::process::exit(1);
    }
}

fn run() -> io::Result<()> {
    let config = config_from_env();
    eprintln!(
        "[bridge] starting (policy={:?}, language={})",
        config.silence_policy, config.language
    );

    let boxed_stdout: Box<dyn io::Write + Send> = Box::new(io::stdout());
    let stdout: SharedWriter = Arc::new(Mutex::new(boxed_stdout));
    let link = PlatformLink::new(stdout.clone());
    let controller = VoiceController::new(
        config,
        Engines {
            permission: Box::new(BridgePermissionGate::new(link.clone())),
            recognition: Box::new(BridgeRecognitionEngine::new(link.clone())),
            synthesis: Box::new(BridgeSynthesisEngine::new(link.clone())),
        },
    );

    let mut waiters: Vec<JoinHandle<()>> = Vec::new();
    let stdin = io::stdin();

    for line_result in stdin.lock().lines() {
        let line = match line_result {
            Ok(line) => line,
            Err(err) => {
                eprintln!("[bridge] stdin read error: {err}");
                break;
            }
        };

        if line.trim().is_empty() {
            continue;
        }

        if line.len() > MAX_REQUEST_BYTES {
            let id = extract_request_id(&line).unwrap_or_else(|| UNKNOWN_REQUEST_ID.to_string());
            let response = ResponseEnvelope::err(
                id,
                RpcError::new(
                    ErrorCode::PayloadTooLarge,
                    format!(
                        "Request exceeds max size ({} > {})",
                        line.len(),
                        MAX_REQUEST_BYTES
                    ),
                ),
            );
            write_json(&stdout, &response)?;
            continue;
        }

        let should_shutdown = handle_line(&line, &controller, &link, &stdout, &mut waiters)?;
        if should_shutdown {
            break;
        }
    }

    // Dropping the controller resolves every still-pending operation, which
    // lets the waiter threads write their responses and exit.
    drop(controller);
    for waiter in waiters {
        let _ = waiter.join();
    }
    eprintln!("[bridge] stopped");

    Ok(())
}

fn config_from_env() -> VoiceControllerConfig {
    let mut config = VoiceControllerConfig::default();

    match env::var("VOICE_SESSION_SILENCE_POLICY").as_deref() {
        Ok("loudness_debounce") => config.silence_policy = SilencePolicy::loudness_debounce(),
        Ok("fixed_timeout") | Err(_) => {}
        Ok(other) => eprintln!("[bridge] ignoring unknown silence policy '{other}'"),
    }

    if let Ok(window_ms) = env::var("VOICE_SESSION_SILENCE_WINDOW_MS") {
        match window_ms.trim().parse::<u64>() {
            Ok(ms) if ms > 0 => {
                config.silence_policy = SilencePolicy::FixedTimeout {
                    window: Duration::from_millis(ms),
                }
            }
            _ => eprintln!("[bridge] ignoring invalid silence window '{window_ms}'"),
        }
    }

    if let Ok(language) = env::var("VOICE_SESSION_LANGUAGE") {
        let language = language.trim();
        if !language.is_empty() {
            config.language = language.to_string();
        }
    }

    config
}

/// Process one NDJSON line. Returns `true` when the bridge should shut down.
fn handle_line(
    line: &str,
    controller: &VoiceController,
    link: &Arc<PlatformLink>,
    stdout: &SharedWriter,
    waiters: &mut Vec<JoinHandle<()>>,
) -> io::Result<bool> {
    let json_value: Value = match serde_json::from_str(line) {
        Ok(value) => value,
        Err(err) => {
            let id = extract_request_id(line).unwrap_or_else(|| UNKNOWN_REQUEST_ID.to_string());
            let response = ResponseEnvelope::err(
                id,
                RpcError::new(
                    ErrorCode::ParseError,
                    format!("Invalid JSON request: {err}"),
                ),
            );
            write_json(stdout, &response)?;
            return Ok(false);
        }
    };

    match json_value.get("type").and_then(Value::as_str) {
        Some("request") => handle_request(json_value, controller, stdout, waiters),
        Some("event") => {
            handle_platform_event(json_value, link);
            Ok(false)
        }
        other => {
            let id = json_value
                .get("id")
                .and_then(Value::as_str)
                .unwrap_or(UNKNOWN_REQUEST_ID)
                .to_string();
            let response = ResponseEnvelope::err(
                id,
                RpcError::new(
                    ErrorCode::InvalidRequest,
                    format!(
                        "Unsupported message type '{}' (expected 'request' or 'event')",
                        other.unwrap_or("<missing>")
                    ),
                ),
            );
            write_json(stdout, &response)?;
            Ok(false)
        }
    }
}

fn handle_request(
    json_value: Value,
    controller: &VoiceController,
    stdout: &SharedWriter,
    waiters: &mut Vec<JoinHandle<()>>,
) -> io::Result<bool> {
    let request_id = json_value
        .get("id")
        .and_then(Value::as_str)
        .filter(|id| !id.trim().is_empty())
        .unwrap_or(UNKNOWN_REQUEST_ID)
        .to_string();

    let request: RequestEnvelope = match serde_json::from_value(json_value) {
        Ok(request) => request,
        Err(err) => {
            let response = ResponseEnvelope::err(
                request_id,
                RpcError::new(
                    ErrorCode::InvalidRequest,
                    format!("Invalid request envelope: {err}"),
                ),
            );
            write_json(stdout, &response)?;
            return Ok(false);
        }
    };

    if request.id.trim().is_empty() {
        let response = ResponseEnvelope::err(
            request_id,
            RpcError::new(ErrorCode::InvalidRequest, "Request id must not be empty"),
        );
        write_json(stdout, &response)?;
        return Ok(false);
    }

    let method = match RpcMethod::from_str(&request.method) {
        Ok(method) => method,
        Err(err) => {
            write_json(stdout, &ResponseEnvelope::err(request.id, err))?;
            return Ok(false);
        }
    };

    match method {
        RpcMethod::RuntimeHello => {
            let response = ResponseEnvelope::ok(request.id, hello_result());
            write_json(stdout, &response)?;
            Ok(false)
        }
        RpcMethod::ListenStart => {
            let params: ListenStartParams = match parse_params(request.params) {
                Ok(params) => params,
                Err(err) => {
                    write_json(stdout, &ResponseEnvelope::err(request.id, err))?;
                    return Ok(false);
                }
            };
            let ticket = controller.begin_listening(params.auto_stop.unwrap_or(true));
            eprintln!("[bridge] id={} listen.start accepted", request.id);
            waiters.push(respond_when_resolved(ticket, request.id, stdout.clone()));
            Ok(false)
        }
        RpcMethod::ListenStop => {
            let ticket = controller.end_listening();
            eprintln!("[bridge] id={} listen.stop accepted", request.id);
            waiters.push(respond_when_resolved(ticket, request.id, stdout.clone()));
            Ok(false)
        }
        RpcMethod::Speak => {
            let params: SpeakParams = match parse_params(request.params) {
                Ok(params) => params,
                Err(err) => {
                    write_json(stdout, &ResponseEnvelope::err(request.id, err))?;
                    return Ok(false);
                }
            };
            let ticket = controller.speak(params.text);
            eprintln!("[bridge] id={} speak accepted", request.id);
            waiters.push(respond_when_resolved(ticket, request.id, stdout.clone()));
            Ok(false)
        }
        RpcMethod::RuntimeShutdown => {
            let response = ResponseEnvelope::ok(request.id, json!({"shutting_down": true}));
            write_json(stdout, &response)?;
            Ok(true)
        }
    }
}

/// Deliver the operation's single outcome as a deferred response envelope.
fn respond_when_resolved(
    ticket: OutcomeTicket,
    request_id: String,
    stdout: SharedWriter,
) -> JoinHandle<()> {
    thread::spawn(move || {
        let result = ticket.wait();
        let ok = result.is_ok();
        let response = match result {
            Ok(Outcome::Transcript(text)) => {
                ResponseEnvelope::ok(request_id.clone(), json!({ "transcript": text }))
            }
            Ok(Outcome::Spoken) => {
                ResponseEnvelope::ok(request_id.clone(), json!({ "spoken": true }))
            }
            Err(err) => ResponseEnvelope::err(request_id.clone(), RpcError::from_voice(&err)),
        };

        if let Err(err) = write_json(&stdout, &response) {
            eprintln!("[bridge] id={request_id} failed to write response: {err}");
        } else {
            eprintln!("[bridge] id={request_id} resolved ok={ok}");
        }
    })
}

fn handle_platform_event(json_value: Value, link: &Arc<PlatformLink>) {
    let event_line: EventLine = match serde_json::from_value(json_value) {
        Ok(event_line) => event_line,
        Err(err) => {
            eprintln!("[bridge] invalid event envelope: {err}");
            return;
        }
    };

    match event_line.event.as_str() {
        "permission.result" => match parse_data::<PermissionResultData>(event_line.data) {
            Ok(data) => link.route_permission(data.granted),
            Err(err) => eprintln!("[bridge] bad permission.result: {}", err.message),
        },
        "recognizer.partial" => match parse_data::<TextData>(event_line.data) {
            Ok(data) => link.route_recognition(RecognitionEvent::Partial(data.text)),
            Err(err) => eprintln!("[bridge] bad recognizer.partial: {}", err.message),
        },
        "recognizer.final" => match parse_data::<TextData>(event_line.data) {
            Ok(data) => link.route_recognition(RecognitionEvent::Final(data.text)),
            Err(err) => eprintln!("[bridge] bad recognizer.final: {}", err.message),
        },
        "recognizer.error" => match parse_data::<ErrorData>(event_line.data) {
            Ok(data) => link.route_recognition(RecognitionEvent::Error(data.code)),
            Err(err) => eprintln!("[bridge] bad recognizer.error: {}", err.message),
        },
        "recognizer.activity" => link.route_recognition(RecognitionEvent::Activity),
        "recognizer.audio" => match parse_data::<AudioPayload>(event_line.data) {
            Ok(payload) => match decode_audio_to_f32(&payload) {
                Ok(samples) => link.route_recognition(RecognitionEvent::AudioFrame(samples)),
                Err(err) => eprintln!("[bridge] dropping recognizer.audio: {}", err.message),
            },
            Err(err) => eprintln!("[bridge] bad recognizer.audio: {}", err.message),
        },
        "synthesis.started" => route_synthesis(link, event_line.data, SynthesisEvent::Started),
        "synthesis.finished" => route_synthesis(link, event_line.data, SynthesisEvent::Finished),
        "synthesis.failed" => {
            match parse_data::<SynthesisFailedData>(event_line.data) {
                Ok(data) => link.route_synthesis(
                    UtteranceId(data.utterance_id),
                    SynthesisEvent::Failed(data.reason.unwrap_or_else(|| "unspecified".into())),
                ),
                Err(err) => eprintln!("[bridge] bad synthesis.failed: {}", err.message),
            }
        }
        "synthesis.cancelled" => route_synthesis(link, event_line.data, SynthesisEvent::Cancelled),
        other => eprintln!("[bridge] ignoring unknown event '{other}'"),
    }
}

fn route_synthesis(link: &Arc<PlatformLink>, data: Value, event: SynthesisEvent) {
    match parse_data::<UtteranceData>(data) {
        Ok(parsed) => link.route_synthesis(UtteranceId(parsed.utterance_id), event),
        Err(err) => eprintln!("[bridge] bad synthesis event: {}", err.message),
    }
}

#[derive(Debug, Deserialize)]
struct PermissionResultData {
    granted: bool,
}

#[derive(Debug, Deserialize)]
struct TextData {
    text: String,
}

#[derive(Debug, Deserialize)]
struct ErrorData {
    code: i32,
}

#[derive(Debug, Deserialize)]
struct UtteranceData {
    utterance_id: u64,
}

#[derive(Debug, Deserialize)]
struct SynthesisFailedData {
    utterance_id: u64,
    #[serde(default)]
    reason: Option<String>,
}

fn hello_result() -> Value {
    json!({
        "protocol_version": PROTOCOL_VERSION,
        "bridge": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION")
        },
        "methods": RpcMethod::supported(),
        "audio": {
            "accepted_input_formats": ["pcm_s16le", "f32le"],
            "default_sample_rate_hz": DEFAULT_SAMPLE_RATE_HZ,
            "required_channels": DEFAULT_CHANNELS
        },
        "engine_events": [
            "permission.request",
            "recognizer.start",
            "recognizer.cancel",
            "synthesis.speak",
            "synthesis.cancel"
        ]
    })
}

fn parse_params<T: DeserializeOwned>(params: Value) -> Result<T, RpcError> {
    let params = if params.is_null() { json!({}) } else { params };

    serde_json::from_value(params)
        .map_err(|err| RpcError::new(ErrorCode::InvalidParams, format!("Invalid params: {err}")))
}

fn parse_data<T: DeserializeOwned>(data: Value) -> Result<T, RpcError> {
    serde_json::from_value(data).map_err(|err| {
        RpcError::new(
            ErrorCode::InvalidParams,
            format!("Invalid event data: {err}"),
        )
    })
}

fn extract_request_id(line: &str) -> Option<String> {
    let value: Value = serde_json::from_str(line).ok()?;
    value.get("id")?.as_str().map(ToString::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listen_start_defaults_to_auto_stop() {
        let params: ListenStartParams = parse_params(json!({})).expect("empty params");
        assert_eq!(params.auto_stop, None);

        let params: ListenStartParams =
            parse_params(json!({"auto_stop": false})).expect("explicit params");
        assert_eq!(params.auto_stop, Some(false));
    }

    #[test]
    fn speak_requires_text() {
        assert!(parse_params::<SpeakParams>(json!({})).is_err());
        let params: SpeakParams = parse_params(json!({"text": "hi"})).expect("text params");
        assert_eq!(params.text, "hi");
    }

    #[test]
    fn null_params_parse_as_defaults() {
        let params: ListenStartParams = parse_params(Value::Null).expect("null params");
        assert!(params.auto_stop.is_none());
    }

    #[test]
    fn extracts_request_id_from_raw_line() {
        assert_eq!(
            extract_request_id(r#"{"id": "7", "method": "speak"}"#),
            Some("7".to_string())
        );
        assert_eq!(extract_request_id("not json"), None);
    }
}

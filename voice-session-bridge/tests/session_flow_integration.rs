//! Drives the bridge binary over stdin/stdout through full listen and
//! speak flows: permission round-trip, engine event injection, deferred
//! response correlation, busy rejection, and utterance supersession.

use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

use serde_json::{json, Value};

struct BridgeHarness {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    pending: VecDeque<Value>,
}

impl BridgeHarness {
    fn spawn() -> Self {
        Self::spawn_with_env(&[])
    }

    fn spawn_with_env(envs: &[(&str, &str)]) -> Self {
        let mut command = Command::new(resolve_bridge_path());
        for (key, value) in envs {
            command.env(key, value);
        }
        let mut child = command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .expect("failed to spawn bridge process");

        let stdin = child.stdin.take().expect("missing child stdin");
        let stdout = child.stdout.take().expect("missing child stdout");

        Self {
            child,
            stdin,
            stdout: BufReader::new(stdout),
            pending: VecDeque::new(),
        }
    }

    fn send(&mut self, payload: Value) {
        let encoded = serde_json::to_string(&payload).expect("payload should serialize");
        writeln!(self.stdin, "{encoded}").expect("failed to write line");
        self.stdin.flush().expect("failed to flush line");
    }

    fn request(&mut self, id: &str, method: &str, params: Value) {
        self.send(json!({
            "type": "request",
            "id": id,
            "method": method,
            "params": params
        }));
    }

    fn inject(&mut self, event: &str, data: Value) {
        self.send(json!({
            "type": "event",
            "event": event,
            "data": data
        }));
    }

    fn next_message(&mut self) -> Value {
        if let Some(message) = self.pending.pop_front() {
            return message;
        }
        let mut line = String::new();
        let bytes_read = self
            .stdout
            .read_line(&mut line)
            .expect("failed to read bridge output");
        assert!(bytes_read > 0, "bridge closed stdout unexpectedly");
        serde_json::from_str(line.trim()).expect("output should be valid json")
    }

    /// Read messages (responses and events interleave) until one matches,
    /// keeping the rest for later expectations.
    fn read_until(&mut self, mut matches: impl FnMut(&Value) -> bool) -> Value {
        let mut seen = Vec::new();
        loop {
            let message = self.next_message();
            if matches(&message) {
                self.pending.extend(seen);
                return message;
            }
            seen.push(message);
            assert!(seen.len() < 64, "expected message never arrived: {seen:?}");
        }
    }

    fn expect_event(&mut self, name: &str) -> Value {
        let message = self.read_until(|m| {
            m.get("type").and_then(Value::as_str) == Some("event")
                && m.get("event").and_then(Value::as_str) == Some(name)
        });
        message["data"].clone()
    }

    fn expect_response(&mut self, id: &str) -> Value {
        self.read_until(|m| {
            m.get("type").and_then(Value::as_str) == Some("response")
                && m.get("id").and_then(Value::as_str) == Some(id)
        })
    }

    fn shutdown(mut self) {
        self.request("shutdown", "runtime.shutdown", json!({}));
        let response = self.expect_response("shutdown");
        assert_eq!(response["ok"], true);

        let status = self.child.wait().expect("failed to wait for bridge");
        assert!(status.success(), "bridge exited with status: {status}");
    }
}

fn resolve_bridge_path() -> String {
    if let Ok(path) = std::env::var("CARGO_BIN_EXE_voice-session-bridge") {
        return path;
    }
    if let Ok(path) = std::env::var("CARGO_BIN_EXE_voice_session_bridge") {
        return path;
    }

    let test_bin = std::env::current_exe().expect("failed to resolve current test executable");
    let target_debug_dir = test_bin
        .parent()
        .and_then(|p| p.parent())
        .expect("failed to resolve target/debug directory");

    for candidate in ["voice-session-bridge", "voice-session-bridge.exe"] {
        let path = target_debug_dir.join(candidate);
        if path.exists() {
            return path.to_string_lossy().to_string();
        }
    }

    panic!("could not locate bridge binary under {}", target_debug_dir.display());
}

#[test]
fn hello_reports_methods_and_audio_contract() {
    let mut bridge = BridgeHarness::spawn();

    bridge.request("1", "runtime.hello", json!({}));
    let response = bridge.expect_response("1");
    assert_eq!(response["ok"], true);

    let methods = response["result"]["methods"]
        .as_array()
        .expect("hello should include a methods array");
    for method in ["listen.start", "listen.stop", "speak"] {
        assert!(
            methods.iter().any(|v| v.as_str() == Some(method)),
            "methods should advertise {method}: {methods:?}"
        );
    }
    assert_eq!(response["result"]["audio"]["required_channels"], 1);

    bridge.shutdown();
}

#[test]
fn listen_flow_resolves_with_the_final_transcript() {
    let mut bridge = BridgeHarness::spawn();

    bridge.request("L1", "listen.start", json!({ "auto_stop": false }));
    bridge.expect_event("permission.request");
    bridge.inject("permission.result", json!({ "granted": true }));

    let start = bridge.expect_event("recognizer.start");
    assert_eq!(start["language"], "en-US");

    bridge.inject("recognizer.partial", json!({ "text": "open the" }));
    bridge.inject("recognizer.final", json!({ "text": "open the garage" }));

    let response = bridge.expect_response("L1");
    assert_eq!(response["ok"], true);
    assert_eq!(response["result"]["transcript"], "open the garage");

    // The session released the recognizer on its way out.
    bridge.expect_event("recognizer.cancel");

    bridge.shutdown();
}

#[test]
fn denied_permission_surfaces_the_error_code() {
    let mut bridge = BridgeHarness::spawn();

    bridge.request("L1", "listen.start", json!({}));
    bridge.expect_event("permission.request");
    bridge.inject("permission.result", json!({ "granted": false }));

    let response = bridge.expect_response("L1");
    assert_eq!(response["ok"], false);
    assert_eq!(response["error"]["code"], "PERMISSION_DENIED");

    bridge.shutdown();
}

#[test]
fn second_listen_is_busy_and_stop_resolves_both() {
    let mut bridge = BridgeHarness::spawn();

    bridge.request("L1", "listen.start", json!({}));
    bridge.expect_event("permission.request");

    bridge.request("L2", "listen.start", json!({}));
    let busy = bridge.expect_response("L2");
    assert_eq!(busy["ok"], false);
    assert_eq!(busy["error"]["code"], "SESSION_BUSY");
    assert_eq!(busy["error"]["retryable"], true);

    bridge.request("S1", "listen.stop", json!({}));
    let listen = bridge.expect_response("L1");
    assert_eq!(listen["ok"], true);
    assert_eq!(listen["result"]["transcript"], "");
    let stop = bridge.expect_response("S1");
    assert_eq!(stop["ok"], true);

    bridge.shutdown();
}

#[test]
fn audio_frames_drive_the_loudness_debounce() {
    // Ten consecutive silent frames fire the debounce auto-stop, which
    // resolves the original listen request.
    let mut bridge =
        BridgeHarness::spawn_with_env(&[("VOICE_SESSION_SILENCE_POLICY", "loudness_debounce")]);

    bridge.request("L1", "listen.start", json!({}));
    bridge.expect_event("permission.request");
    bridge.inject("permission.result", json!({ "granted": true }));
    bridge.expect_event("recognizer.start");

    bridge.inject("recognizer.partial", json!({ "text": "goodnight" }));

    let silent_frame = base64(&vec![0u8; 320]);
    for _ in 0..10 {
        bridge.inject(
            "recognizer.audio",
            json!({ "audio_b64": silent_frame, "format": "pcm_s16le" }),
        );
    }

    let response = bridge.expect_response("L1");
    assert_eq!(response["ok"], true);
    assert_eq!(response["result"]["transcript"], "goodnight");

    bridge.shutdown();
}

#[test]
fn speak_supersede_and_completion() {
    let mut bridge = BridgeHarness::spawn();

    bridge.request("K1", "speak", json!({ "text": "first thing" }));
    let first = bridge.expect_event("synthesis.speak");
    assert_eq!(first["text"], "first thing");
    let first_id = first["utterance_id"].as_u64().expect("utterance id");

    bridge.request("K2", "speak", json!({ "text": "never mind" }));
    let cancelled = bridge.expect_event("synthesis.cancel");
    assert_eq!(cancelled["utterance_id"].as_u64(), Some(first_id));

    let superseded = bridge.expect_response("K1");
    assert_eq!(superseded["ok"], false);
    assert_eq!(superseded["error"]["code"], "SUPERSEDED");

    let second = bridge.expect_event("synthesis.speak");
    let second_id = second["utterance_id"].as_u64().expect("utterance id");
    assert_ne!(second_id, first_id);

    // A late completion for the flushed utterance is dropped.
    bridge.inject("synthesis.finished", json!({ "utterance_id": first_id }));
    bridge.inject("synthesis.finished", json!({ "utterance_id": second_id }));

    let response = bridge.expect_response("K2");
    assert_eq!(response["ok"], true);
    assert_eq!(response["result"]["spoken"], true);

    bridge.shutdown();
}

#[test]
fn empty_speak_text_is_invalid() {
    let mut bridge = BridgeHarness::spawn();

    bridge.request("K1", "speak", json!({ "text": "   " }));
    let response = bridge.expect_response("K1");
    assert_eq!(response["ok"], false);
    assert_eq!(response["error"]["code"], "INVALID_ARGUMENT");

    bridge.shutdown();
}

#[test]
fn unknown_method_is_rejected() {
    let mut bridge = BridgeHarness::spawn();

    bridge.request("X", "listen.pause", json!({}));
    let response = bridge.expect_response("X");
    assert_eq!(response["ok"], false);
    assert_eq!(response["error"]["code"], "METHOD_NOT_FOUND");

    bridge.shutdown();
}

fn base64(bytes: &[u8]) -> String {
    use base64::Engine as _;
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

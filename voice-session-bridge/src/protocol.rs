use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;

use voice_session::VoiceError;

pub const PROTOCOL_VERSION: &str = "1.0.0";
pub const MAX_REQUEST_BYTES: usize = 2 * 1024 * 1024;

#[derive(Debug, Deserialize)]
pub struct RequestEnvelope {
    #[serde(rename = "type")]
    pub message_type: String,
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Serialize)]
pub struct ResponseEnvelope {
    #[serde(rename = "type")]
    pub message_type: &'static str,
    pub id: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl ResponseEnvelope {
    pub fn ok(id: impl Into<String>, result: Value) -> Self {
        Self {
            message_type: "response",
            id: id.into(),
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(id: impl Into<String>, err: RpcError) -> Self {
        Self {
            message_type: "response",
            id: id.into(),
            ok: false,
            result: None,
            error: Some(ErrorBody {
                code: err.code.as_str(),
                message: err.message,
                retryable: err.retryable,
            }),
        }
    }
}

/// Outbound engine command or notification for the host platform.
#[derive(Debug, Serialize)]
pub struct EventEnvelope {
    #[serde(rename = "type")]
    pub message_type: &'static str,
    pub event: &'static str,
    pub data: Value,
}

impl EventEnvelope {
    pub fn new(event: &'static str, data: Value) -> Self {
        Self {
            message_type: "event",
            event,
            data,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
    pub retryable: bool,
}

#[derive(Debug, Clone)]
pub struct RpcError {
    pub code: ErrorCode,
    pub message: String,
    pub retryable: bool,
}

impl RpcError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            retryable: code.retryable(),
        }
    }

    /// Map a core error onto its wire code, keeping the core's message.
    pub fn from_voice(err: &VoiceError) -> Self {
        let code = match err {
            VoiceError::PermissionDenied => ErrorCode::PermissionDenied,
            VoiceError::EngineUnavailable => ErrorCode::EngineUnavailable,
            VoiceError::EngineError(_) => ErrorCode::EngineError,
            VoiceError::SessionBusy => ErrorCode::SessionBusy,
            VoiceError::InvalidArgument(_) => ErrorCode::InvalidArgument,
            VoiceError::SynthesisFailed(_) => ErrorCode::SynthesisFailed,
            VoiceError::Superseded => ErrorCode::Superseded,
        };
        Self::new(code, err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    ParseError,
    InvalidRequest,
    InvalidParams,
    MethodNotFound,
    PayloadTooLarge,
    UnsupportedAudioFormat,
    AudioDecodeFailed,
    PermissionDenied,
    EngineUnavailable,
    EngineError,
    SessionBusy,
    InvalidArgument,
    SynthesisFailed,
    Superseded,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ParseError => "PARSE_ERROR",
            Self::InvalidRequest => "INVALID_REQUEST",
            Self::InvalidParams => "INVALID_PARAMS",
            Self::MethodNotFound => "METHOD_NOT_FOUND",
            Self::PayloadTooLarge => "PAYLOAD_TOO_LARGE",
            Self::UnsupportedAudioFormat => "UNSUPPORTED_AUDIO_FORMAT",
            Self::AudioDecodeFailed => "AUDIO_DECODE_FAILED",
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::EngineUnavailable => "ENGINE_UNAVAILABLE",
            Self::EngineError => "ENGINE_ERROR",
            Self::SessionBusy => "SESSION_BUSY",
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::SynthesisFailed => "SYNTHESIS_FAILED",
            Self::Superseded => "SUPERSEDED",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    pub fn retryable(self) -> bool {
        matches!(
            self,
            Self::SessionBusy | Self::EngineUnavailable | Self::InternalError
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcMethod {
    RuntimeHello,
    ListenStart,
    ListenStop,
    Speak,
    RuntimeShutdown,
}

impl RpcMethod {
    pub fn supported() -> &'static [&'static str] {
        &[
            "runtime.hello",
            "listen.start",
            "listen.stop",
            "speak",
            "runtime.shutdown",
        ]
    }
}

impl FromStr for RpcMethod {
    type Err = RpcError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "runtime.hello" => Ok(Self::RuntimeHello),
            "listen.start" => Ok(Self::ListenStart),
            "listen.stop" => Ok(Self::ListenStop),
            "speak" => Ok(Self::Speak),
            "runtime.shutdown" => Ok(Self::RuntimeShutdown),
            _ => Err(RpcError::new(
                ErrorCode::MethodNotFound,
                format!("Unknown method '{value}'"),
            )),
        }
    }
}

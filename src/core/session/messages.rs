//! Wire envelopes exchanged with the avatar interaction service.
//!
//! Every frame is a UTF-8 JSON text frame of the shape
//!
//! ```json
//! { "header": { "app_id": "...", "ctrl": "...", "request_id": "..." },
//!   "parameter": { ... },
//!   "payload": { ... } }
//! ```
//!
//! `parameter` and `payload` belong to the business layer and are passed
//! through untouched. Inbound classification only looks at `header.code`,
//! `header.message` and `payload.avatar.stream_url`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Code the service uses for success.
pub const SUCCESS_CODE: i64 = 0;

/// Code assumed when a response carries no `header.code`.
pub const MISSING_CODE: i64 = -1;

// =============================================================================
// Outbound
// =============================================================================

/// Control discriminator carried in `header.ctrl`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Ctrl {
    /// Opens an avatar stream.
    Start,
    /// Drives the avatar with text to speak.
    TextDriver,
    /// Interactive text turn (the service answers and speaks).
    TextInteract,
    /// Keepalive.
    Ping,
    /// Any value this client does not know about.
    Other(String),
}

impl Ctrl {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Start => "start",
            Self::TextDriver => "text_driver",
            Self::TextInteract => "text_interact",
            Self::Ping => "ping",
            Self::Other(value) => value,
        }
    }
}

impl From<String> for Ctrl {
    fn from(value: String) -> Self {
        match value.as_str() {
            "start" => Self::Start,
            "text_driver" => Self::TextDriver,
            "text_interact" => Self::TextInteract,
            "ping" => Self::Ping,
            _ => Self::Other(value),
        }
    }
}

impl From<Ctrl> for String {
    fn from(ctrl: Ctrl) -> Self {
        match ctrl {
            Ctrl::Other(value) => value,
            known => known.as_str().to_string(),
        }
    }
}

impl std::fmt::Display for Ctrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Envelope header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeHeader {
    pub app_id: String,
    pub ctrl: Ctrl,
    pub request_id: String,
    /// Mode-specific fields such as `scene_id`.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One outbound message unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub header: EnvelopeHeader,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameter: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl Envelope {
    /// Header-only envelope with a fresh request id.
    pub fn new(app_id: impl Into<String>, ctrl: Ctrl) -> Self {
        Self {
            header: EnvelopeHeader {
                app_id: app_id.into(),
                ctrl,
                request_id: new_request_id(),
                extra: Map::new(),
            },
            parameter: None,
            payload: None,
        }
    }

    /// Keepalive envelope.
    pub fn ping(app_id: impl Into<String>) -> Self {
        Self::new(app_id, Ctrl::Ping)
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.header.request_id = request_id.into();
        self
    }

    pub fn with_header_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.header.extra.insert(key.into(), value.into());
        self
    }

    pub fn with_parameter(mut self, parameter: Value) -> Self {
        self.parameter = Some(parameter);
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn ctrl(&self) -> &Ctrl {
        &self.header.ctrl
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Per-message unique request id.
pub fn new_request_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

// =============================================================================
// Inbound
// =============================================================================

/// Header of a server response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseHeader {
    #[serde(default = "missing_code")]
    pub code: i64,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub sid: Option<String>,
    #[serde(default)]
    pub request_id: Option<String>,
}

impl Default for ResponseHeader {
    fn default() -> Self {
        Self {
            code: MISSING_CODE,
            message: None,
            sid: None,
            request_id: None,
        }
    }
}

fn missing_code() -> i64 {
    MISSING_CODE
}

/// A server response frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    #[serde(default)]
    pub header: ResponseHeader,
    #[serde(default)]
    pub payload: Option<Value>,
}

impl ResponseEnvelope {
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        Ok(serde_json::from_str(text)?)
    }

    /// `payload.avatar.stream_url`, when present and non-empty.
    pub fn stream_url(&self) -> Option<&str> {
        self.payload
            .as_ref()?
            .get("avatar")?
            .get("stream_url")?
            .as_str()
            .filter(|url| !url.is_empty())
    }

    pub fn classify(self) -> InboundEvent {
        if self.header.code != SUCCESS_CODE {
            return InboundEvent::RemoteError {
                code: self.header.code,
                message: self
                    .header
                    .message
                    .unwrap_or_else(|| "Unknown error".to_string()),
            };
        }

        match self.stream_url() {
            Some(url) => InboundEvent::StreamReady {
                stream_url: url.to_string(),
            },
            None => InboundEvent::Response(self),
        }
    }
}

/// Classification of one inbound text frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    /// The avatar stream is available for pulling.
    StreamReady { stream_url: String },
    /// The service reported a non-zero code.
    RemoteError { code: i64, message: String },
    /// Successful response with nothing the session acts on.
    Response(ResponseEnvelope),
}

/// A text frame that could not be understood.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Parse and classify an inbound text frame.
pub fn classify_frame(text: &str) -> Result<InboundEvent, FrameError> {
    ResponseEnvelope::parse(text).map(ResponseEnvelope::classify)
}

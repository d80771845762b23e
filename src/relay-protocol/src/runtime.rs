//! Agent runtime event vocabulary.
//!
//! The agent runtime speaks newline-delimited JSON ("stream-json"). Its output
//! is a loosely typed union that keeps growing, so every line is decoded into
//! the closed [`RuntimeEvent`] enum and anything unrecognized lands in
//! [`RuntimeEvent::Other`] instead of failing.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::trace;

/// Runtime events the relay understands.
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeEvent {
    /// Runtime session started.
    SessionInit {
        session_id: String,
        tools: Vec<String>,
    },
    /// The model began a new assistant message.
    MessageStart,
    /// A fragment of assistant text.
    TextDelta { text: String },
    /// A tool-use content block opened.
    ToolStart {
        id: String,
        name: String,
        index: Option<u64>,
    },
    /// A content block closed. The index is absent when the runtime omits it.
    BlockStop { index: Option<u64> },
    /// A complete, non-incremental assistant message.
    AssistantMessage { content: Vec<Value> },
    /// The turn finished.
    Result {
        text: String,
        cost: f64,
        is_error: bool,
    },
    /// Runtime-level failure reported in-band.
    Failure { message: String },
    /// Anything else.
    Other,
}

impl RuntimeEvent {
    /// Decode one SDK-shaped JSON object. Never fails.
    pub fn from_sdk_value(value: &Value) -> Self {
        match SdkMessage::deserialize(value) {
            Ok(message) => message.into_event(),
            Err(e) => {
                trace!(error = %e, "Unrecognized runtime payload");
                Self::Other
            }
        }
    }

    /// Whether this event closes out the current turn.
    pub fn ends_turn(&self) -> bool {
        matches!(self, Self::Result { .. } | Self::Failure { .. })
    }
}

/// Acknowledgment for a control request previously written to the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlResponse {
    pub request_id: String,
    pub outcome: Result<(), String>,
}

/// One decoded stdout line.
#[derive(Debug, Clone, PartialEq)]
pub enum SdkLine {
    Event(RuntimeEvent),
    Control(ControlResponse),
}

/// Decode one stdout line. Returns `None` for blank lines and non-JSON noise.
pub fn decode_sdk_line(line: &str) -> Option<SdkLine> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }

    let value: Value = match serde_json::from_str(trimmed) {
        Ok(v) => v,
        Err(_) => {
            trace!(line = %trimmed, "Skipping non-JSON runtime output");
            return None;
        }
    };

    if value.get("type").and_then(Value::as_str) == Some("control_response") {
        if let Ok(envelope) = ControlResponseEnvelope::deserialize(&value) {
            return Some(SdkLine::Control(envelope.response.into_control()));
        }
    }

    Some(SdkLine::Event(RuntimeEvent::from_sdk_value(&value)))
}

/// User turn written to the runtime's stdin.
///
/// `session_id` and `parent_tool_use_id` are filled in by the runtime; empty
/// defaults are enough.
#[derive(Debug, Clone, Serialize)]
pub struct SdkUserMessage {
    #[serde(rename = "type")]
    kind: &'static str,
    session_id: String,
    parent_tool_use_id: Option<String>,
    message: SdkUserBody,
}

#[derive(Debug, Clone, Serialize)]
struct SdkUserBody {
    role: &'static str,
    content: String,
}

impl SdkUserMessage {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            kind: "user",
            session_id: String::new(),
            parent_tool_use_id: None,
            message: SdkUserBody {
                role: "user",
                content: text.into(),
            },
        }
    }
}

/// Control request written to the runtime's stdin.
#[derive(Debug, Clone, Serialize)]
pub struct ControlRequest {
    #[serde(rename = "type")]
    kind: &'static str,
    pub request_id: String,
    request: ControlRequestBody,
}

#[derive(Debug, Clone, Serialize)]
struct ControlRequestBody {
    subtype: &'static str,
}

impl ControlRequest {
    /// Ask the runtime to abandon the current turn.
    pub fn interrupt(request_id: impl Into<String>) -> Self {
        Self {
            kind: "control_request",
            request_id: request_id.into(),
            request: ControlRequestBody {
                subtype: "interrupt",
            },
        }
    }
}

// --------------------------------------------------------
// SDK shapes (input side)
// --------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum SdkMessage {
    System {
        #[serde(default)]
        subtype: String,
        #[serde(default)]
        session_id: String,
        #[serde(default)]
        tools: Option<Vec<String>>,
    },
    StreamEvent {
        event: StreamEvent,
    },
    Assistant {
        message: AssistantBody,
    },
    Result {
        #[serde(default)]
        result: Option<String>,
        #[serde(default)]
        total_cost_usd: Option<f64>,
        #[serde(default)]
        is_error: bool,
    },
    Error {
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        error: Option<ErrorBody>,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamEvent {
    MessageStart,
    ContentBlockStart {
        #[serde(default)]
        index: Option<u64>,
        content_block: ContentBlock,
    },
    ContentBlockDelta {
        #[serde(default)]
        index: Option<u64>,
        delta: BlockDelta,
    },
    ContentBlockStop {
        #[serde(default)]
        index: Option<u64>,
    },
    Error {
        error: ErrorBody,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    ToolUse {
        id: String,
        name: String,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum BlockDelta {
    TextDelta {
        text: String,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct AssistantBody {
    #[serde(default)]
    content: Option<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ControlResponseEnvelope {
    response: ControlResponseBody,
}

#[derive(Debug, Deserialize)]
struct ControlResponseBody {
    #[serde(default)]
    subtype: String,
    request_id: String,
    #[serde(default)]
    error: Option<String>,
}

impl ControlResponseBody {
    fn into_control(self) -> ControlResponse {
        let outcome = if self.subtype == "success" {
            Ok(())
        } else {
            Err(self
                .error
                .unwrap_or_else(|| format!("control request failed ({})", self.subtype)))
        };
        ControlResponse {
            request_id: self.request_id,
            outcome,
        }
    }
}

impl SdkMessage {
    fn into_event(self) -> RuntimeEvent {
        match self {
            Self::System {
                subtype,
                session_id,
                tools,
            } if subtype == "init" => RuntimeEvent::SessionInit {
                session_id,
                tools: tools.unwrap_or_default(),
            },
            Self::System { .. } => RuntimeEvent::Other,
            Self::StreamEvent { event } => event.into_event(),
            Self::Assistant { message } => match message.content {
                Some(content) => RuntimeEvent::AssistantMessage { content },
                None => RuntimeEvent::Other,
            },
            Self::Result {
                result,
                total_cost_usd,
                is_error,
            } => RuntimeEvent::Result {
                text: result.unwrap_or_default(),
                cost: total_cost_usd.unwrap_or(0.0),
                is_error,
            },
            Self::Error { message, error } => RuntimeEvent::Failure {
                message: message
                    .or_else(|| error.and_then(|e| e.message))
                    .unwrap_or_else(|| "Unknown runtime error".to_string()),
            },
            Self::Unknown => RuntimeEvent::Other,
        }
    }
}

impl StreamEvent {
    fn into_event(self) -> RuntimeEvent {
        match self {
            Self::MessageStart => RuntimeEvent::MessageStart,
            Self::ContentBlockStart {
                index,
                content_block: ContentBlock::ToolUse { id, name },
            } => RuntimeEvent::ToolStart { id, name, index },
            Self::ContentBlockStart { .. } => RuntimeEvent::Other,
            Self::ContentBlockDelta {
                delta: BlockDelta::TextDelta { text },
                ..
            } => RuntimeEvent::TextDelta { text },
            Self::ContentBlockDelta { .. } => RuntimeEvent::Other,
            Self::ContentBlockStop { index } => RuntimeEvent::BlockStop { index },
            Self::Error { error } => RuntimeEvent::Failure {
                message: error
                    .message
                    .unwrap_or_else(|| "Unknown stream error".to_string()),
            },
            Self::Unknown => RuntimeEvent::Other,
        }
    }
}

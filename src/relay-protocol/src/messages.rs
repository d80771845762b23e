//! Client <-> relay wire messages.

use serde::{Deserialize, Serialize};

/// Error text sent back when an inbound frame is not valid JSON.
pub const INVALID_JSON: &str = "Invalid JSON";

/// Error text sent back when an inbound frame is JSON but not a known message.
pub const UNKNOWN_MESSAGE_TYPE: &str = "Unknown message type";

/// Client-to-relay messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Submit one user turn.
    Prompt { text: String },
    /// Cancel the turn currently being generated.
    Interrupt,
}

/// Relay-to-client messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Runtime session is up.
    SystemInit {
        session_id: String,
        tools: Vec<String>,
    },
    /// Incremental assistant text. Only the new fragment is sent.
    TextDelta { text: String },
    /// A tool invocation started.
    ToolStart { tool: String, id: String },
    /// A tool invocation finished.
    ToolDone { id: String },
    /// Complete assistant message with its raw content blocks.
    AssistantMessage { content: Vec<serde_json::Value> },
    /// Turn finished.
    Result { text: String, cost: f64 },
    /// Something went wrong.
    Error { message: String },
}

impl ServerMessage {
    /// Build an error message.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Wire name of this message kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SystemInit { .. } => "system_init",
            Self::TextDelta { .. } => "text_delta",
            Self::ToolStart { .. } => "tool_start",
            Self::ToolDone { .. } => "tool_done",
            Self::AssistantMessage { .. } => "assistant_message",
            Self::Result { .. } => "result",
            Self::Error { .. } => "error",
        }
    }
}

/// Decode one inbound text frame.
///
/// On failure the returned [`ServerMessage::Error`] is ready to be sent back to
/// the client; the connection is expected to stay open.
pub fn decode_client_message(text: &str) -> Result<ClientMessage, ServerMessage> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|_| ServerMessage::error(INVALID_JSON))?;

    serde_json::from_value(value).map_err(|_| ServerMessage::error(UNKNOWN_MESSAGE_TYPE))
}

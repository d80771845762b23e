//! Relay Protocol - Communication types for the session relay.
//!
//! Two vocabularies live here:
//! - the client wire contract ([`ClientMessage`] in, [`ServerMessage`] out),
//!   framed as one JSON object per WebSocket text frame;
//! - the agent runtime's stream-json lines, decoded into the closed
//!   [`RuntimeEvent`] enum that the event translator consumes.

pub mod messages;
pub mod runtime;

#[cfg(test)]
mod tests;

// Re-exports
pub use messages::{
    ClientMessage, INVALID_JSON, ServerMessage, UNKNOWN_MESSAGE_TYPE, decode_client_message,
};
pub use runtime::{
    ControlRequest, ControlResponse, RuntimeEvent, SdkLine, SdkUserMessage, decode_sdk_line,
};

//! Relay Engine - session bridging between a chat client and an agent runtime.
//!
//! This crate provides:
//! - [`queue`]: the prompt queue the runtime pulls from
//! - [`translator`]: runtime events to client messages, plus the transcript
//! - [`bridge`]: the per-connection [`SessionBridge`]
//! - [`runtime`]: the [`AgentRuntime`] seam with the Claude CLI and scripted
//!   implementations
//! - [`mcp`]: MCP server discovery

#![deny(clippy::print_stdout, clippy::print_stderr)]

pub mod bridge;
pub mod mcp;
pub mod queue;
pub mod runtime;
pub mod translator;

pub use bridge::{BridgeError, DEFAULT_INTERRUPT_TIMEOUT, Session, SessionBridge, SessionPhase};
pub use mcp::{McpServerConfig, load_mcp_servers};
pub use queue::{PendingPrompt, PromptQueue, PromptReceiver, prompt_queue};
pub use runtime::{
    AgentRuntime, ClaudeCliRuntime, ClaudeCliSettings, QueryOptions, RuntimeControl,
    RuntimeError, RuntimeQuery, Script, ScriptStep, ScriptedRuntime,
};
pub use translator::{
    EventTranslator, Role, StreamingState, ToolCallRecord, ToolStatus, Transcript,
    TranscriptEntry,
};

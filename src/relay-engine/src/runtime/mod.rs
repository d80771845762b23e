//! Agent runtime seam.
//!
//! The runtime is an opaque engine that pulls prompts from a
//! [`PromptReceiver`] whenever it is ready for another turn and yields a
//! stream of [`RuntimeEvent`]s. Interrupts travel on a separate
//! [`RuntimeControl`] handle so they can be issued while the event stream is
//! being consumed.

pub mod claude;
pub mod scripted;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use relay_protocol::RuntimeEvent;
use thiserror::Error;

use crate::mcp::McpServerConfig;
use crate::queue::PromptReceiver;

pub use claude::{ClaudeCliRuntime, ClaudeCliSettings};
pub use scripted::{Script, ScriptStep, ScriptedRuntime};

/// Runtime errors.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The runtime could not be started.
    #[error("Failed to start agent runtime: {0}")]
    Spawn(String),

    /// I/O with the runtime failed.
    #[error("Agent runtime I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The runtime exited unexpectedly.
    #[error("Agent runtime exited with {status}{}", stderr_suffix(.stderr))]
    Exited { status: String, stderr: String },

    /// The runtime reported a failure for the current turn.
    #[error("{0}")]
    Turn(String),

    /// The runtime refused a control request.
    #[error("Control request rejected: {0}")]
    Rejected(String),

    /// The runtime is gone.
    #[error("Agent runtime is not running")]
    NotRunning,
}

fn stderr_suffix(stderr: &str) -> String {
    if stderr.is_empty() {
        String::new()
    } else {
        format!(": {stderr}")
    }
}

/// Per-session options handed to the runtime when a query starts.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    /// Working directory the agent operates in.
    pub cwd: PathBuf,
    /// External tool servers, keyed by name.
    pub mcp_servers: BTreeMap<String, McpServerConfig>,
    /// Model override.
    pub model: Option<String>,
    /// Permission mode passed through to the runtime.
    pub permission_mode: Option<String>,
    /// Text appended to the runtime's default system prompt.
    pub append_system_prompt: Option<String>,
}

/// Live query against a runtime.
pub struct RuntimeQuery {
    /// Events for every turn, in order. Ends when the runtime finishes.
    pub events: BoxStream<'static, Result<RuntimeEvent, RuntimeError>>,
    /// Out-of-band control.
    pub control: Arc<dyn RuntimeControl>,
}

impl std::fmt::Debug for RuntimeQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeQuery").finish_non_exhaustive()
    }
}

/// Control channel into a running query.
#[async_trait]
pub trait RuntimeControl: Send + Sync {
    /// Ask the runtime to abandon its current turn. Resolves once the runtime
    /// acknowledges.
    async fn interrupt(&self) -> Result<(), RuntimeError>;
}

/// An agent runtime.
#[async_trait]
pub trait AgentRuntime: Send + Sync {
    /// Start a query that consumes prompts from `prompts` until it closes.
    async fn query(
        &self,
        prompts: PromptReceiver,
        options: QueryOptions,
    ) -> Result<RuntimeQuery, RuntimeError>;
}

//! Application state management.

use std::path::PathBuf;
use std::sync::Arc;

use relay_engine::mcp::load_mcp_servers;
use relay_engine::{AgentRuntime, ClaudeCliRuntime, ClaudeCliSettings, QueryOptions, ScriptedRuntime};
use tracing::info;

use crate::config::{RuntimeKind, ServerConfig};
use crate::error::{AppError, AppResult};
use crate::registry::SessionRegistry;

/// Application state shared across request handlers.
pub struct AppState {
    /// Server configuration.
    pub config: ServerConfig,
    /// Live sessions.
    pub registry: SessionRegistry,
    /// Resolved agent working directory.
    working_dir: PathBuf,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .field("working_dir", &self.working_dir)
            .finish()
    }
}

impl AppState {
    /// Create state with the runtime named by the configuration.
    pub fn new(config: ServerConfig) -> AppResult<Self> {
        let runtime = build_runtime(&config);
        Self::with_runtime(config, runtime)
    }

    /// Create state around an explicit runtime.
    pub fn with_runtime(config: ServerConfig, runtime: Arc<dyn AgentRuntime>) -> AppResult<Self> {
        let working_dir = config.working_dir();
        if !working_dir.is_dir() {
            return Err(AppError::Config(format!(
                "working directory {} does not exist",
                working_dir.display()
            )));
        }

        info!(
            cwd = %working_dir.display(),
            runtime = ?config.runtime.kind,
            "Agent working directory"
        );

        let registry = SessionRegistry::new(runtime, config.interrupt_timeout_duration());
        Ok(Self {
            config,
            registry,
            working_dir,
        })
    }

    /// Directory every session's runtime is started in.
    pub fn working_dir(&self) -> &PathBuf {
        &self.working_dir
    }

    /// Options for a new session. MCP servers are discovered fresh each time.
    pub fn query_options(&self) -> QueryOptions {
        let runtime = &self.config.runtime;
        let mcp_servers = if runtime.discover_mcp {
            load_mcp_servers(&self.working_dir)
        } else {
            Default::default()
        };

        QueryOptions {
            cwd: self.working_dir.clone(),
            mcp_servers,
            model: runtime.model.clone(),
            permission_mode: runtime.permission_mode.clone(),
            append_system_prompt: runtime.append_system_prompt.clone(),
        }
    }
}

fn build_runtime(config: &ServerConfig) -> Arc<dyn AgentRuntime> {
    match config.runtime.kind {
        RuntimeKind::Claude => Arc::new(ClaudeCliRuntime::new(ClaudeCliSettings {
            program: config.runtime.claude_bin.clone(),
            extra_args: config.runtime.extra_args.clone(),
            ..Default::default()
        })),
        RuntimeKind::Echo => Arc::new(ScriptedRuntime::echo()),
    }
}

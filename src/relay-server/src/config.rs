//! Server configuration.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address (e.g., "0.0.0.0:3001").
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Directory the agent works in. Defaults to the process working directory.
    #[serde(default)]
    pub cwd: Option<PathBuf>,

    /// Agent runtime configuration.
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Seconds to wait for the runtime to acknowledge an interrupt.
    #[serde(default = "default_interrupt_timeout")]
    pub interrupt_timeout: u64,

    /// Graceful shutdown timeout in seconds.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: u64,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Port used when `PORT` is unset.
pub const DEFAULT_PORT: u16 = 3001;

fn default_listen_addr() -> String {
    format!("0.0.0.0:{DEFAULT_PORT}")
}

fn default_interrupt_timeout() -> u64 {
    10
}

fn default_shutdown_timeout() -> u64 {
    30
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            cwd: None,
            runtime: RuntimeConfig::default(),
            interrupt_timeout: default_interrupt_timeout(),
            shutdown_timeout: default_shutdown_timeout(),
            logging: LoggingConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from file.
    pub fn load(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("parsing {}", path.display()))?;
        Ok(config)
    }

    /// Load from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source.
    ///
    /// `PORT` binds all interfaces on that port, `CWD` sets the agent's
    /// working directory, and the `RELAY_*` variables configure the runtime.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let mut config = Self::default();

        if let Some(port) = lookup("PORT") {
            let port: u16 = port
                .trim()
                .parse()
                .with_context(|| format!("invalid PORT {port:?}"))?;
            config.listen_addr = format!("0.0.0.0:{port}");
        }

        if let Some(addr) = lookup("RELAY_LISTEN_ADDR") {
            config.listen_addr = addr;
        }

        if let Some(cwd) = lookup("CWD") {
            config.cwd = Some(PathBuf::from(cwd));
        }

        if let Some(kind) = lookup("RELAY_RUNTIME") {
            config.runtime.kind = kind
                .parse()
                .map_err(|e: String| anyhow::anyhow!(e))
                .context("invalid RELAY_RUNTIME")?;
        }

        if let Some(bin) = lookup("RELAY_CLAUDE_BIN") {
            config.runtime.claude_bin = bin;
        }

        if let Some(model) = lookup("RELAY_MODEL") {
            config.runtime.model = Some(model);
        }

        if let Some(mode) = lookup("RELAY_PERMISSION_MODE") {
            config.runtime.permission_mode = Some(mode);
        }

        if let Some(secs) = lookup("RELAY_INTERRUPT_TIMEOUT") {
            config.interrupt_timeout = secs
                .trim()
                .parse()
                .with_context(|| format!("invalid RELAY_INTERRUPT_TIMEOUT {secs:?}"))?;
        }

        Ok(config)
    }

    /// Directory handed to every session.
    pub fn working_dir(&self) -> PathBuf {
        match &self.cwd {
            Some(dir) => dir.clone(),
            None => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    pub fn interrupt_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.interrupt_timeout)
    }
}

/// Which agent runtime backs the sessions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeKind {
    /// The Claude Code CLI.
    #[default]
    Claude,
    /// Offline echo runtime, no CLI needed.
    Echo,
}

impl FromStr for RuntimeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "claude" => Ok(Self::Claude),
            "echo" => Ok(Self::Echo),
            other => Err(format!("unknown runtime '{other}' (expected claude or echo)")),
        }
    }
}

/// Agent runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub kind: RuntimeKind,
    /// CLI executable.
    #[serde(default = "default_claude_bin")]
    pub claude_bin: String,
    /// Model override.
    #[serde(default)]
    pub model: Option<String>,
    /// Permission mode; sessions bypass permissions when unset.
    #[serde(default)]
    pub permission_mode: Option<String>,
    #[serde(default)]
    pub append_system_prompt: Option<String>,
    /// Extra CLI arguments.
    #[serde(default)]
    pub extra_args: Vec<String>,
    /// Discover MCP servers from the standard config files.
    #[serde(default = "default_true")]
    pub discover_mcp: bool,
}

fn default_claude_bin() -> String {
    "claude".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            kind: RuntimeKind::default(),
            claude_bin: default_claude_bin(),
            model: None,
            permission_mode: None,
            append_system_prompt: None,
            extra_args: Vec::new(),
            discover_mcp: true,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log format (json or pretty).
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl LoggingConfig {
    pub fn is_json(&self) -> bool {
        self.format.eq_ignore_ascii_case("json")
    }
}

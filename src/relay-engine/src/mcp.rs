//! MCP server discovery.
//!
//! Named tool-server descriptors are merged from several JSON files in
//! precedence order. The first file that defines a name wins; later files only
//! fill in names not seen yet.
//!
//! A file contributes its `mcpServers` object when it has one (the settings
//! layout). Otherwise the whole top-level object is taken, but only if it is
//! non-empty and every value looks like a server descriptor (the dedicated
//! `mcp-servers.json` layout).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, trace};

/// File read from the process working directory.
pub const APP_CONFIG_FILE: &str = "mcp-servers.json";

/// Settings file location relative to a project or home directory.
pub const SETTINGS_FILE: &[&str] = &[".claude", "settings.json"];

/// Connection descriptor for one MCP server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum McpServerConfig {
    /// Remote server over server-sent events.
    Sse {
        #[serde(rename = "type")]
        transport: SseTransport,
        url: String,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        headers: BTreeMap<String, String>,
    },
    /// Local server spawned as a subprocess.
    Stdio {
        command: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        args: Vec<String>,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        env: BTreeMap<String, String>,
    },
}

/// The `"type": "sse"` marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SseTransport {
    Sse,
}

/// Standard discovery sources, highest precedence first.
pub fn standard_sources(cwd: &Path) -> Vec<PathBuf> {
    let mut sources = Vec::with_capacity(3);
    sources.push(
        std::env::current_dir()
            .map(|dir| dir.join(APP_CONFIG_FILE))
            .unwrap_or_else(|_| PathBuf::from(APP_CONFIG_FILE)),
    );
    sources.push(settings_path(cwd));
    if let Some(home) = dirs::home_dir() {
        sources.push(settings_path(&home));
    }
    sources
}

/// Discover servers from the standard sources.
pub fn load_mcp_servers(cwd: &Path) -> BTreeMap<String, McpServerConfig> {
    load_from_sources(&standard_sources(cwd))
}

/// Merge servers from `sources`, earlier sources taking precedence.
pub fn load_from_sources(sources: &[PathBuf]) -> BTreeMap<String, McpServerConfig> {
    let mut merged = BTreeMap::new();

    for path in sources {
        for (name, config) in read_servers(path) {
            merged.entry(name).or_insert(config);
        }
    }

    debug!(count = merged.len(), "Discovered MCP servers");
    merged
}

fn settings_path(base: &Path) -> PathBuf {
    SETTINGS_FILE
        .iter()
        .fold(base.to_path_buf(), |path, part| path.join(part))
}

/// Read one source. Missing or invalid files contribute nothing.
fn read_servers(path: &Path) -> BTreeMap<String, McpServerConfig> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            trace!(path = %path.display(), error = %e, "MCP source not readable");
            return BTreeMap::new();
        }
    };

    let json: Value = match serde_json::from_str(&content) {
        Ok(v) => v,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "Skipping invalid MCP source");
            return BTreeMap::new();
        }
    };

    let Some(object) = json.as_object() else {
        return BTreeMap::new();
    };

    if let Some(servers) = object.get("mcpServers").and_then(Value::as_object) {
        return parse_servers(servers, path);
    }

    if !object.is_empty() && object.values().all(looks_like_server) {
        return parse_servers(object, path);
    }

    BTreeMap::new()
}

fn parse_servers(servers: &Map<String, Value>, path: &Path) -> BTreeMap<String, McpServerConfig> {
    servers
        .iter()
        .filter_map(|(name, value)| {
            match McpServerConfig::deserialize(value) {
                Ok(config) => Some((name.clone(), config)),
                Err(e) => {
                    debug!(
                        path = %path.display(),
                        server = %name,
                        error = %e,
                        "Skipping malformed MCP server entry"
                    );
                    None
                }
            }
        })
        .collect()
}

fn looks_like_server(value: &Value) -> bool {
    value.get("command").is_some_and(Value::is_string)
        || value.get("type").and_then(Value::as_str) == Some("sse")
}

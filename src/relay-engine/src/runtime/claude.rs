//! Claude Code CLI runtime.
//!
//! Runs `claude` in stream-json mode as a child process. Prompts are written to
//! its stdin as user-message lines, its stdout is decoded line by line into
//! runtime events, and interrupts go out as control requests whose responses
//! come back interleaved with the event stream.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use relay_protocol::{ControlRequest, RuntimeEvent, SdkLine, SdkUserMessage, decode_sdk_line};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use super::{AgentRuntime, QueryOptions, RuntimeControl, RuntimeError, RuntimeQuery};
use crate::mcp::McpServerConfig;
use crate::queue::PromptReceiver;

/// Permission mode used when the session does not ask for one.
pub const DEFAULT_PERMISSION_MODE: &str = "bypassPermissions";

/// Lines of stderr kept for the exit error.
const STDERR_TAIL_LINES: usize = 20;

const EVENT_BUFFER: usize = 256;

type PendingControls = Arc<parking_lot::Mutex<HashMap<String, oneshot::Sender<Result<(), String>>>>>;
type SharedStdin = Arc<tokio::sync::Mutex<Option<ChildStdin>>>;

/// How to launch the CLI.
#[derive(Debug, Clone)]
pub struct ClaudeCliSettings {
    /// Executable to run.
    pub program: String,
    /// Arguments placed before the generated flags, e.g. a script path when
    /// `program` is an interpreter.
    pub launcher_args: Vec<String>,
    /// Arguments appended after the generated flags.
    pub extra_args: Vec<String>,
    /// Extra environment for the child.
    pub env: BTreeMap<String, String>,
}

impl Default for ClaudeCliSettings {
    fn default() -> Self {
        Self {
            program: "claude".to_string(),
            launcher_args: Vec::new(),
            extra_args: Vec::new(),
            env: BTreeMap::new(),
        }
    }
}

/// [`AgentRuntime`] backed by the Claude Code CLI.
#[derive(Debug, Clone, Default)]
pub struct ClaudeCliRuntime {
    settings: ClaudeCliSettings,
}

impl ClaudeCliRuntime {
    pub fn new(settings: ClaudeCliSettings) -> Self {
        Self { settings }
    }

    /// Full argument list for one query.
    pub fn command_args(&self, options: &QueryOptions) -> Result<Vec<String>, RuntimeError> {
        let mut args = self.settings.launcher_args.clone();
        args.extend(
            [
                "--print",
                "--verbose",
                "--input-format",
                "stream-json",
                "--output-format",
                "stream-json",
                "--include-partial-messages",
            ]
            .map(String::from),
        );

        let permission_mode = options
            .permission_mode
            .as_deref()
            .unwrap_or(DEFAULT_PERMISSION_MODE);
        args.push("--permission-mode".to_string());
        args.push(permission_mode.to_string());
        if permission_mode == DEFAULT_PERMISSION_MODE {
            args.push("--dangerously-skip-permissions".to_string());
        }

        if let Some(model) = &options.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }

        if let Some(prompt) = &options.append_system_prompt {
            args.push("--append-system-prompt".to_string());
            args.push(prompt.clone());
        }

        if !options.mcp_servers.is_empty() {
            let config = serde_json::to_string(&McpConfigArg {
                mcp_servers: &options.mcp_servers,
            })
            .map_err(|e| RuntimeError::Spawn(format!("invalid MCP configuration: {e}")))?;
            args.push("--mcp-config".to_string());
            args.push(config);
        }

        args.extend(self.settings.extra_args.iter().cloned());
        Ok(args)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct McpConfigArg<'a> {
    mcp_servers: &'a BTreeMap<String, McpServerConfig>,
}

#[async_trait]
impl AgentRuntime for ClaudeCliRuntime {
    async fn query(
        &self,
        prompts: PromptReceiver,
        options: QueryOptions,
    ) -> Result<RuntimeQuery, RuntimeError> {
        let args = self.command_args(&options)?;
        let program = &self.settings.program;

        debug!(
            program = %program,
            cwd = %options.cwd.display(),
            mcp_servers = options.mcp_servers.len(),
            "Starting agent runtime"
        );

        let mut cmd = Command::new(program);
        cmd.args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if !options.cwd.as_os_str().is_empty() {
            cmd.current_dir(&options.cwd);
        }

        for (key, value) in &self.settings.env {
            cmd.env(key, value);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| RuntimeError::Spawn(format!("{program}: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| RuntimeError::Spawn("stdin not captured".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RuntimeError::Spawn("stdout not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| RuntimeError::Spawn("stderr not captured".to_string()))?;

        info!(program = %program, pid = ?child.id(), "Agent runtime started");

        let stdin: SharedStdin = Arc::new(tokio::sync::Mutex::new(Some(stdin)));
        let pending: PendingControls = Arc::default();
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);

        tokio::spawn(write_prompts(prompts, Arc::clone(&stdin)));
        let stderr_task = tokio::spawn(read_stderr(stderr));
        tokio::spawn(read_events(
            stdout,
            child,
            tx,
            Arc::clone(&pending),
            stderr_task,
        ));

        Ok(RuntimeQuery {
            events: ReceiverStream::new(rx).boxed(),
            control: Arc::new(CliControl { stdin, pending }),
        })
    }
}

struct CliControl {
    stdin: SharedStdin,
    pending: PendingControls,
}

#[async_trait]
impl RuntimeControl for CliControl {
    async fn interrupt(&self) -> Result<(), RuntimeError> {
        let request = ControlRequest::interrupt(Uuid::new_v4().to_string());
        let line = serde_json::to_string(&request)
            .map_err(|e| RuntimeError::Rejected(e.to_string()))?;

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock();
            // Drop requests whose callers stopped waiting.
            pending.retain(|_, waiter| !waiter.is_closed());
            pending.insert(request.request_id.clone(), tx);
        }

        debug!(request_id = %request.request_id, "Sending interrupt");
        if let Err(e) = write_line(&self.stdin, &line).await {
            self.pending.lock().remove(&request.request_id);
            return Err(e);
        }

        match rx.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(message)) => Err(RuntimeError::Rejected(message)),
            Err(_) => Err(RuntimeError::NotRunning),
        }
    }
}

async fn write_line(stdin: &tokio::sync::Mutex<Option<ChildStdin>>, line: &str) -> Result<(), RuntimeError> {
    let mut guard = stdin.lock().await;
    let writer = guard.as_mut().ok_or(RuntimeError::NotRunning)?;
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}

async fn write_prompts(mut prompts: PromptReceiver, stdin: SharedStdin) {
    while let Some(prompt) = prompts.pull().await {
        let line = match serde_json::to_string(&SdkUserMessage::new(prompt.into_text())) {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "Failed to encode prompt");
                continue;
            }
        };
        if let Err(e) = write_line(&stdin, &line).await {
            warn!(error = %e, "Failed to write prompt to agent runtime");
            break;
        }
        trace!("Prompt written to agent runtime");
    }

    // Closing stdin lets the CLI finish and exit.
    stdin.lock().await.take();
    debug!("Prompt writer finished");
}

async fn read_stderr(stderr: ChildStderr) -> VecDeque<String> {
    let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
    let mut lines = BufReader::new(stderr).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        warn!(stderr = %line, "Agent runtime stderr");
        if tail.len() == STDERR_TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line);
    }
    tail
}

async fn read_events(
    stdout: ChildStdout,
    mut child: Child,
    tx: mpsc::Sender<Result<RuntimeEvent, RuntimeError>>,
    pending: PendingControls,
    stderr_task: JoinHandle<VecDeque<String>>,
) {
    let mut lines = BufReader::new(stdout).lines();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => match decode_sdk_line(&line) {
                Some(SdkLine::Control(response)) => {
                    match pending.lock().remove(&response.request_id) {
                        Some(waiter) => {
                            let _ = waiter.send(response.outcome);
                        }
                        None => {
                            debug!(request_id = %response.request_id, "Unmatched control response");
                        }
                    }
                }
                Some(SdkLine::Event(event)) => {
                    if tx.send(Ok(event)).await.is_err() {
                        debug!("Event consumer gone, stopping agent runtime");
                        let _ = child.start_kill();
                        pending.lock().clear();
                        return;
                    }
                }
                None => {}
            },
            Ok(None) => break,
            Err(e) => {
                let _ = tx.send(Err(e.into())).await;
                break;
            }
        }
    }

    // Wakes interrupt callers with `NotRunning`.
    pending.lock().clear();

    let stderr_tail = stderr_task.await.unwrap_or_default();
    match child.wait().await {
        Ok(status) if status.success() => {
            debug!("Agent runtime exited");
        }
        Ok(status) => {
            warn!(status = %status, "Agent runtime exited with failure");
            let error = RuntimeError::Exited {
                status: status.to_string(),
                stderr: Vec::from(stderr_tail).join("\n"),
            };
            let _ = tx.send(Err(error)).await;
        }
        Err(e) => {
            let _ = tx.send(Err(e.into())).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use pretty_assertions::assert_eq;

    use super::*;

    fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
        args.iter()
            .position(|a| a == flag)
            .and_then(|i| args.get(i + 1))
            .map(String::as_str)
    }

    #[test]
    fn test_default_args() {
        let runtime = ClaudeCliRuntime::default();
        let args = runtime.command_args(&QueryOptions::default()).unwrap();

        assert_eq!(
            args,
            vec![
                "--print",
                "--verbose",
                "--input-format",
                "stream-json",
                "--output-format",
                "stream-json",
                "--include-partial-messages",
                "--permission-mode",
                "bypassPermissions",
                "--dangerously-skip-permissions",
            ]
        );
    }

    #[test]
    fn test_optional_flags() {
        let runtime = ClaudeCliRuntime::new(ClaudeCliSettings {
            launcher_args: vec!["fake-claude.sh".to_string()],
            extra_args: vec!["--max-turns".to_string(), "3".to_string()],
            ..Default::default()
        });
        let options = QueryOptions {
            cwd: PathBuf::from("/tmp"),
            mcp_servers: BTreeMap::from([(
                "fs".to_string(),
                McpServerConfig::Stdio {
                    command: "fs-mcp".to_string(),
                    args: vec![],
                    env: BTreeMap::new(),
                },
            )]),
            model: Some("sonnet".to_string()),
            permission_mode: Some("acceptEdits".to_string()),
            append_system_prompt: Some("Be brief.".to_string()),
        };

        let args = runtime.command_args(&options).unwrap();
        assert_eq!(args[0], "fake-claude.sh");
        assert_eq!(flag_value(&args, "--model"), Some("sonnet"));
        assert_eq!(flag_value(&args, "--permission-mode"), Some("acceptEdits"));
        assert!(!args.iter().any(|a| a == "--dangerously-skip-permissions"));
        assert_eq!(flag_value(&args, "--append-system-prompt"), Some("Be brief."));
        assert_eq!(
            flag_value(&args, "--mcp-config"),
            Some(r#"{"mcpServers":{"fs":{"command":"fs-mcp"}}}"#)
        );
        assert_eq!(&args[args.len() - 2..], &["--max-turns", "3"]);
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_error() {
        let runtime = ClaudeCliRuntime::new(ClaudeCliSettings {
            program: "/nonexistent/relay-claude-binary".to_string(),
            ..Default::default()
        });
        let (_queue, receiver) = crate::queue::prompt_queue();

        let err = runtime
            .query(receiver, QueryOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Spawn(_)));
        assert!(err.to_string().contains("relay-claude-binary"));
    }
}

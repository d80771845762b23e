//! Session Bridge - couples one client connection to one agent runtime.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐ push_prompt ┌─────────────┐   pull    ┌─────────────┐
//! │  transport  │────────────▶│ PromptQueue │◀──────────│   runtime   │
//! │ (websocket) │             └─────────────┘           │             │
//! │             │  ServerMessage ┌────────────┐  events  │             │
//! │             │◀───────────────│ translator │◀─────────│             │
//! └─────────────┘                └────────────┘          └─────────────┘
//! ```
//!
//! The transport pushes prompts and never waits; the runtime pulls them when it
//! is ready for the next turn. [`SessionBridge::start`] drives the pull loop:
//! it feeds every runtime event through the [`EventTranslator`] and forwards
//! the result on the outbound channel.
//!
//! Every outbound send happens while the translator lock is held, so output
//! from the pull loop and from [`SessionBridge::interrupt`] reaches the client
//! in the order it was produced.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use parking_lot::Mutex;
use relay_protocol::{RuntimeEvent, ServerMessage};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::queue::{PromptQueue, PromptReceiver, prompt_queue};
use crate::runtime::{AgentRuntime, QueryOptions, RuntimeControl, RuntimeError};
use crate::translator::{EventTranslator, Transcript};

/// How long an interrupt waits for the runtime's acknowledgment.
pub const DEFAULT_INTERRUPT_TIMEOUT: Duration = Duration::from_secs(10);

/// Bridge errors.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Session already started")]
    AlreadyStarted,

    #[error("Session is closed")]
    Closed,

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error("Interrupt failed: {0}")]
    Interrupt(#[source] RuntimeError),

    #[error("Interrupt not acknowledged within {0:?}")]
    InterruptTimeout(Duration),
}

/// Lifecycle of a bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Constructed, pull loop not started.
    Created,
    /// Pull loop running, no assistant message in progress.
    Running,
    /// An assistant message is being streamed.
    Streaming,
    /// Terminal.
    Closed,
}

/// Point-in-time view of a bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Runtime session id, once reported.
    pub id: Option<String>,
    pub closed: bool,
    pub streaming: bool,
}

struct BridgeState {
    translator: EventTranslator,
    outbound: mpsc::UnboundedSender<ServerMessage>,
    phase: SessionPhase,
}

impl BridgeState {
    fn send_all(&self, messages: Vec<ServerMessage>) {
        for message in messages {
            trace!(kind = message.kind(), "Outbound message");
            if self.outbound.send(message).is_err() {
                trace!("Outbound channel closed, dropping message");
            }
        }
    }

    fn sync_phase(&mut self) {
        if self.phase == SessionPhase::Closed {
            return;
        }
        self.phase = if self.translator.is_streaming() {
            SessionPhase::Streaming
        } else {
            SessionPhase::Running
        };
    }
}

/// Bridge between a chat transport and a pull-based agent runtime.
pub struct SessionBridge {
    runtime: Arc<dyn AgentRuntime>,
    options: QueryOptions,
    queue: PromptQueue,
    receiver: Mutex<Option<PromptReceiver>>,
    state: Mutex<BridgeState>,
    control: Mutex<Option<Arc<dyn RuntimeControl>>>,
    shutdown: CancellationToken,
    interrupt_timeout: Duration,
}

impl std::fmt::Debug for SessionBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionBridge")
            .field("phase", &self.phase())
            .field("pending_prompts", &self.queue.len())
            .finish_non_exhaustive()
    }
}

impl SessionBridge {
    /// Create a bridge. Nothing runs until [`start`](Self::start).
    pub fn new(
        runtime: Arc<dyn AgentRuntime>,
        options: QueryOptions,
        outbound: mpsc::UnboundedSender<ServerMessage>,
    ) -> Self {
        let (queue, receiver) = prompt_queue();
        Self {
            runtime,
            options,
            queue,
            receiver: Mutex::new(Some(receiver)),
            state: Mutex::new(BridgeState {
                translator: EventTranslator::new(),
                outbound,
                phase: SessionPhase::Created,
            }),
            control: Mutex::new(None),
            shutdown: CancellationToken::new(),
            interrupt_timeout: DEFAULT_INTERRUPT_TIMEOUT,
        }
    }

    pub fn with_interrupt_timeout(mut self, timeout: Duration) -> Self {
        self.interrupt_timeout = timeout;
        self
    }

    /// Run the pull loop until the runtime finishes or the bridge closes.
    ///
    /// Runtime failures are reported to the client as one `error` message,
    /// after which the bridge is closed and the error is returned.
    pub async fn start(&self) -> Result<(), BridgeError> {
        let receiver = self
            .receiver
            .lock()
            .take()
            .ok_or(BridgeError::AlreadyStarted)?;

        {
            let mut state = self.state.lock();
            if state.phase == SessionPhase::Closed {
                return Err(BridgeError::Closed);
            }
            state.phase = SessionPhase::Running;
        }

        let query = match self.runtime.query(receiver, self.options.clone()).await {
            Ok(query) => query,
            Err(e) => {
                error!(error = %e, "Agent runtime failed to start");
                self.fail(&e);
                return Err(e.into());
            }
        };

        *self.control.lock() = Some(Arc::clone(&query.control));
        let mut events = query.events;
        info!(cwd = %self.options.cwd.display(), "Session pull loop started");

        let outcome = loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break Ok(()),
                next = events.next() => match next {
                    Some(Ok(event)) => self.dispatch(event),
                    Some(Err(e)) => {
                        error!(error = %e, "Agent runtime failed");
                        self.fail(&e);
                        break Err(BridgeError::Runtime(e));
                    }
                    None => {
                        debug!("Agent runtime event stream ended");
                        break Ok(());
                    }
                },
            }
        };

        self.control.lock().take();
        self.close();
        outcome
    }

    /// Hand a user prompt to the runtime. Dropped once the bridge is closed.
    ///
    /// The prompt only enters the transcript if the queue accepted it.
    pub fn push_prompt(&self, text: impl Into<String>) {
        let text = text.into();
        let mut state = self.state.lock();
        if state.phase == SessionPhase::Closed {
            debug!("Prompt dropped, session closed");
            return;
        }
        if self.queue.push(text.as_str()) {
            state.translator.record_user(&text);
        } else {
            debug!("Prompt dropped, queue closed");
        }
    }

    /// Interrupt the runtime's current turn.
    ///
    /// Waits for the runtime's acknowledgment, then finalizes streaming state
    /// and reports every still-running tool as done. Queued prompts stay
    /// queued. Before the runtime has started this does nothing.
    ///
    /// If the interrupted turn ends on its own before the acknowledgment
    /// arrives, the turn that follows is left alone.
    pub async fn interrupt(&self) -> Result<(), BridgeError> {
        if self.is_closed() {
            return Err(BridgeError::Closed);
        }

        let control = self.control.lock().clone();
        let Some(control) = control else {
            debug!("Interrupt ignored, runtime not started");
            return Ok(());
        };

        let generation = self.state.lock().translator.turns_ended();

        match tokio::time::timeout(self.interrupt_timeout, control.interrupt()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(BridgeError::Interrupt(e)),
            Err(_) => return Err(BridgeError::InterruptTimeout(self.interrupt_timeout)),
        }

        let mut state = self.state.lock();
        if state.phase == SessionPhase::Closed {
            return Ok(());
        }
        if state.translator.turns_ended() != generation {
            debug!("Interrupted turn already ended, nothing to finalize");
            return Ok(());
        }
        let messages = state.translator.interrupt();
        state.send_all(messages);
        state.sync_phase();
        debug!("Interrupt acknowledged");
        Ok(())
    }

    /// Close the bridge. Idempotent.
    ///
    /// Closes the prompt queue (pending prompts are discarded and a waiting
    /// pull returns closed) and stops the pull loop. Nothing is sent to the
    /// client afterwards.
    pub fn close(&self) {
        {
            let mut state = self.state.lock();
            if state.phase != SessionPhase::Closed {
                state.phase = SessionPhase::Closed;
                debug!(pending = self.queue.len(), "Session closed");
            }
        }
        self.queue.close();
        self.shutdown.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().phase == SessionPhase::Closed
    }

    pub fn phase(&self) -> SessionPhase {
        self.state.lock().phase
    }

    pub fn snapshot(&self) -> Session {
        let state = self.state.lock();
        Session {
            id: state.translator.session_id().map(str::to_string),
            closed: state.phase == SessionPhase::Closed,
            streaming: state.translator.is_streaming(),
        }
    }

    /// Chat history as the client would render it.
    pub fn transcript(&self) -> Transcript {
        self.state.lock().translator.transcript().clone()
    }

    /// Prompts pushed but not yet pulled by the runtime.
    pub fn pending_prompts(&self) -> usize {
        self.queue.len()
    }

    fn dispatch(&self, event: RuntimeEvent) {
        let mut state = self.state.lock();
        if state.phase == SessionPhase::Closed {
            trace!("Event after close ignored");
            return;
        }
        let messages = state.translator.translate(event);
        state.send_all(messages);
        state.sync_phase();
    }

    /// Report a runtime failure once, then close.
    fn fail(&self, error: &RuntimeError) {
        {
            let mut state = self.state.lock();
            if state.phase == SessionPhase::Closed {
                warn!(error = %error, "Runtime failure after close not reported");
                return;
            }
            let messages = state.translator.fail(error.to_string());
            state.send_all(messages);
            state.phase = SessionPhase::Closed;
        }
        self.queue.close();
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::runtime::ScriptedRuntime;

    fn bridge() -> (SessionBridge, mpsc::UnboundedReceiver<ServerMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let runtime = Arc::new(ScriptedRuntime::echo());
        (SessionBridge::new(runtime, QueryOptions::default(), tx), rx)
    }

    #[test]
    fn test_new_bridge_is_created() {
        let (bridge, _rx) = bridge();
        assert_eq!(bridge.phase(), SessionPhase::Created);
        assert_eq!(
            bridge.snapshot(),
            Session {
                id: None,
                closed: false,
                streaming: false,
            }
        );
    }

    #[test]
    fn test_push_records_user_prompt() {
        let (bridge, _rx) = bridge();
        bridge.push_prompt("hi");
        assert_eq!(bridge.pending_prompts(), 1);
        assert_eq!(bridge.transcript().entries()[0].content, "hi");
    }

    #[test]
    fn test_close_is_idempotent_and_drops_prompts() {
        let (bridge, mut rx) = bridge();
        bridge.push_prompt("queued");
        bridge.close();
        bridge.close();
        bridge.push_prompt("late");

        assert!(bridge.is_closed());
        assert_eq!(bridge.pending_prompts(), 0);
        assert_eq!(bridge.transcript().len(), 1);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_prompt_rejected_by_queue_not_recorded() {
        let (bridge, _rx) = bridge();
        bridge.queue.close();
        bridge.push_prompt("lost");

        assert_eq!(bridge.pending_prompts(), 0);
        assert!(bridge.transcript().is_empty());
    }

    #[tokio::test]
    async fn test_start_after_close_fails() {
        let (bridge, _rx) = bridge();
        bridge.close();
        assert!(matches!(bridge.start().await, Err(BridgeError::Closed)));
    }

    #[tokio::test]
    async fn test_interrupt_before_start_is_noop() {
        let (bridge, mut rx) = bridge();
        bridge.interrupt().await.unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_interrupt_after_close_errors() {
        let (bridge, _rx) = bridge();
        bridge.close();
        assert!(matches!(bridge.interrupt().await, Err(BridgeError::Closed)));
    }
}

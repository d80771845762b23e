//! Prompt queue - bridges pushed user prompts to the runtime's pull loop.
//!
//! The transport pushes prompts whenever the user sends them; the agent runtime
//! pulls them one at a time when it is ready for the next turn. The queue is
//! split into a cloneable producer ([`PromptQueue`]) and a unique consumer
//! ([`PromptReceiver`]). Because [`PromptReceiver::pull`] takes `&mut self`,
//! at most one pull can be outstanding, so the waiter slot never holds more
//! than one consumer.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::trace;

/// A user prompt waiting to be handed to the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingPrompt {
    text: String,
}

impl PendingPrompt {
    fn new(text: String) -> Self {
        Self { text }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn into_text(self) -> String {
        self.text
    }
}

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<PendingPrompt>,
    waiter: Option<oneshot::Sender<PendingPrompt>>,
    closed: bool,
}

/// Create a connected producer/consumer pair.
pub fn prompt_queue() -> (PromptQueue, PromptReceiver) {
    let state = Arc::new(Mutex::new(QueueState::default()));
    (
        PromptQueue {
            state: Arc::clone(&state),
        },
        PromptReceiver { state },
    )
}

/// Producer side. Never blocks.
#[derive(Debug, Clone)]
pub struct PromptQueue {
    state: Arc<Mutex<QueueState>>,
}

impl PromptQueue {
    /// Enqueue a prompt, or hand it straight to a waiting consumer.
    ///
    /// After [`close`](Self::close) this is a no-op and returns `false`.
    pub fn push(&self, text: impl Into<String>) -> bool {
        let mut state = self.state.lock();
        if state.closed {
            trace!("Prompt dropped, queue closed");
            return false;
        }

        let mut prompt = PendingPrompt::new(text.into());
        if let Some(waiter) = state.waiter.take() {
            match waiter.send(prompt) {
                Ok(()) => return true,
                // The pull that installed the waiter was cancelled.
                Err(returned) => prompt = returned,
            }
        }
        state.pending.push_back(prompt);
        true
    }

    /// Close the queue, waking a waiting consumer. Pending prompts are dropped.
    pub fn close(&self) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        state.pending.clear();
        // Dropping the sender wakes the consumer with a closed signal.
        state.waiter = None;
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Number of prompts not yet pulled.
    pub fn len(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a consumer is currently suspended in `pull`.
    pub fn has_waiter(&self) -> bool {
        self.state
            .lock()
            .waiter
            .as_ref()
            .is_some_and(|waiter| !waiter.is_closed())
    }
}

/// Consumer side. Owned by whoever drives the runtime.
#[derive(Debug)]
pub struct PromptReceiver {
    state: Arc<Mutex<QueueState>>,
}

impl PromptReceiver {
    /// Take the next prompt, waiting for one if none is pending.
    ///
    /// Returns `None` once the queue is closed, including pulls that were
    /// already waiting when it closed.
    pub async fn pull(&mut self) -> Option<PendingPrompt> {
        let rx = {
            let mut state = self.state.lock();
            if state.closed {
                return None;
            }
            if let Some(prompt) = state.pending.pop_front() {
                return Some(prompt);
            }
            let (tx, rx) = oneshot::channel();
            state.waiter = Some(tx);
            rx
        };

        let mut guard = WaitGuard {
            rx: Some(rx),
            state: &self.state,
        };
        let received = match guard.rx.as_mut() {
            Some(rx) => rx.await.ok(),
            None => None,
        };
        guard.rx = None;

        if self.state.lock().closed {
            return None;
        }
        received
    }
}

impl Drop for PromptReceiver {
    fn drop(&mut self) {
        // Nobody will ever pull again.
        let mut state = self.state.lock();
        state.closed = true;
        state.pending.clear();
        state.waiter = None;
    }
}

/// Puts a prompt back at the head of the queue if the pull future is dropped
/// after the prompt was handed over but before it was observed.
struct WaitGuard<'a> {
    rx: Option<oneshot::Receiver<PendingPrompt>>,
    state: &'a Mutex<QueueState>,
}

impl Drop for WaitGuard<'_> {
    fn drop(&mut self) {
        let Some(mut rx) = self.rx.take() else {
            return;
        };
        rx.close();

        let mut state = self.state.lock();
        if state.waiter.as_ref().is_some_and(|w| w.is_closed()) {
            state.waiter = None;
        }
        if let Ok(prompt) = rx.try_recv() {
            if !state.closed {
                state.pending.push_front(prompt);
            }
        }
    }
}

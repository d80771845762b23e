//! In-process runtime driven by a script.
//!
//! Each pulled prompt is answered by running the steps the script returns for
//! it. Used by tests and by the server's offline `echo` mode.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use relay_protocol::RuntimeEvent;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use super::{AgentRuntime, QueryOptions, RuntimeControl, RuntimeError, RuntimeQuery};
use crate::queue::PromptReceiver;

/// One step of a scripted turn.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    /// Emit an event.
    Emit(RuntimeEvent),
    /// Wait; an interrupt cuts the wait short and ends the turn.
    Pause(Duration),
    /// Fail the whole query.
    Fail(String),
}

/// Produces the steps for one prompt.
pub type Script = Arc<dyn Fn(&str) -> Vec<ScriptStep> + Send + Sync>;

/// Runtime that plays scripted turns.
#[derive(Clone)]
pub struct ScriptedRuntime {
    script: Script,
    tools: Vec<String>,
}

impl std::fmt::Debug for ScriptedRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedRuntime")
            .field("tools", &self.tools)
            .finish_non_exhaustive()
    }
}

impl ScriptedRuntime {
    pub fn new(script: impl Fn(&str) -> Vec<ScriptStep> + Send + Sync + 'static) -> Self {
        Self {
            script: Arc::new(script),
            tools: Vec::new(),
        }
    }

    /// Tool names reported in the session init event.
    pub fn with_tools(mut self, tools: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.tools = tools.into_iter().map(Into::into).collect();
        self
    }

    /// Streams "You said: <prompt>" back word by word.
    pub fn echo() -> Self {
        Self::new(|prompt| {
            let reply = format!("You said: {prompt}");
            let mut steps = Vec::new();
            for (i, word) in reply.split_inclusive(' ').enumerate() {
                if i > 0 {
                    steps.push(ScriptStep::Pause(Duration::from_millis(30)));
                }
                steps.push(ScriptStep::Emit(RuntimeEvent::TextDelta {
                    text: word.to_string(),
                }));
            }
            steps.push(ScriptStep::Emit(RuntimeEvent::AssistantMessage {
                content: vec![json!({"type": "text", "text": reply})],
            }));
            steps.push(ScriptStep::Emit(RuntimeEvent::Result {
                text: reply,
                cost: 0.0,
                is_error: false,
            }));
            steps
        })
    }
}

#[async_trait]
impl AgentRuntime for ScriptedRuntime {
    async fn query(
        &self,
        prompts: PromptReceiver,
        _options: QueryOptions,
    ) -> Result<RuntimeQuery, RuntimeError> {
        let (tx, rx) = mpsc::channel(64);
        let control = Arc::new(ScriptedControl::default());

        tokio::spawn(play(
            Arc::clone(&self.script),
            self.tools.clone(),
            prompts,
            tx,
            Arc::clone(&control),
        ));

        Ok(RuntimeQuery {
            events: ReceiverStream::new(rx).boxed(),
            control,
        })
    }
}

#[derive(Debug, Default)]
struct ScriptedControl {
    turn: Mutex<Option<CancellationToken>>,
}

#[async_trait]
impl RuntimeControl for ScriptedControl {
    async fn interrupt(&self) -> Result<(), RuntimeError> {
        if let Some(turn) = self.turn.lock().as_ref() {
            turn.cancel();
        }
        Ok(())
    }
}

async fn play(
    script: Script,
    tools: Vec<String>,
    mut prompts: PromptReceiver,
    tx: mpsc::Sender<Result<RuntimeEvent, RuntimeError>>,
    control: Arc<ScriptedControl>,
) {
    let session_id = Uuid::new_v4().to_string();
    let mut initialized = false;

    while let Some(prompt) = prompts.pull().await {
        if !initialized {
            initialized = true;
            let init = RuntimeEvent::SessionInit {
                session_id: session_id.clone(),
                tools: tools.clone(),
            };
            if tx.send(Ok(init)).await.is_err() {
                return;
            }
        }

        let turn = CancellationToken::new();
        *control.turn.lock() = Some(turn.clone());

        if tx.send(Ok(RuntimeEvent::MessageStart)).await.is_err() {
            return;
        }

        // Only a turn cut short gets the aborted result.
        let mut interrupted = false;
        for step in script(prompt.text()) {
            if turn.is_cancelled() {
                interrupted = true;
                break;
            }
            match step {
                ScriptStep::Emit(event) => {
                    if tx.send(Ok(event)).await.is_err() {
                        return;
                    }
                }
                ScriptStep::Pause(duration) => {
                    tokio::select! {
                        _ = tokio::time::sleep(duration) => {}
                        _ = turn.cancelled() => {
                            interrupted = true;
                            break;
                        }
                    }
                }
                ScriptStep::Fail(message) => {
                    let _ = tx.send(Err(RuntimeError::Turn(message))).await;
                    return;
                }
            }
        }

        control.turn.lock().take();

        if interrupted {
            debug!(session_id = %session_id, "Scripted turn interrupted");
            let aborted = RuntimeEvent::Result {
                text: String::new(),
                cost: 0.0,
                is_error: true,
            };
            if tx.send(Ok(aborted)).await.is_err() {
                return;
            }
        }
    }

    debug!(session_id = %session_id, "Scripted runtime finished");
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::queue::prompt_queue;

    fn done() -> RuntimeEvent {
        RuntimeEvent::Result {
            text: "done".to_string(),
            cost: 0.0,
            is_error: false,
        }
    }

    #[tokio::test]
    async fn test_interrupt_after_last_step_adds_no_second_result() {
        let script: Script = Arc::new(|_: &str| vec![ScriptStep::Emit(done())]);
        let control = Arc::new(ScriptedControl::default());
        let (queue, prompts) = prompt_queue();
        // One slot, so the final emit blocks until the consumer reads.
        let (tx, mut rx) = mpsc::channel(1);

        queue.push("go");
        tokio::spawn(play(script, Vec::new(), prompts, tx, Arc::clone(&control)));

        let init = rx.recv().await.unwrap().unwrap();
        assert!(matches!(init, RuntimeEvent::SessionInit { .. }));

        // Let the player reach the blocked emit of the turn's own result.
        tokio::time::sleep(Duration::from_millis(20)).await;
        control.interrupt().await.unwrap();

        assert_eq!(rx.recv().await.unwrap().unwrap(), RuntimeEvent::MessageStart);
        assert_eq!(rx.recv().await.unwrap().unwrap(), done());

        queue.close();
        let rest = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap();
        assert!(rest.is_none(), "unexpected event: {rest:?}");
    }

    #[tokio::test]
    async fn test_interrupt_during_pause_sends_aborted_result() {
        let script: Script = Arc::new(|_: &str| {
            vec![
                ScriptStep::Pause(Duration::from_secs(30)),
                ScriptStep::Emit(done()),
            ]
        });
        let control = Arc::new(ScriptedControl::default());
        let (queue, prompts) = prompt_queue();
        let (tx, mut rx) = mpsc::channel(8);

        queue.push("go");
        tokio::spawn(play(script, Vec::new(), prompts, tx, Arc::clone(&control)));

        rx.recv().await.unwrap().unwrap();
        assert_eq!(rx.recv().await.unwrap().unwrap(), RuntimeEvent::MessageStart);
        control.interrupt().await.unwrap();

        assert_eq!(
            rx.recv().await.unwrap().unwrap(),
            RuntimeEvent::Result {
                text: String::new(),
                cost: 0.0,
                is_error: true,
            }
        );
    }
}

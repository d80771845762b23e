//! Event translator - maps runtime events to client messages.
//!
//! The translator is a reducer over three pieces of state:
//! - [`StreamingState`]: the assistant message currently being built from
//!   text fragments;
//! - the [`ToolCallRecord`]s started since the last finalize;
//! - a [`Transcript`] mirroring what the client renders, which is where
//!   result costs are attached.
//!
//! "Finalize" closes out the streaming message and clears tool records. It is
//! triggered by a full assistant message, a result, a failure, or an interrupt.

use relay_protocol::{RuntimeEvent, ServerMessage};
use tracing::{debug, trace};

/// Role of a transcript entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

/// One rendered chat message.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptEntry {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub cost: Option<f64>,
}

/// Ordered chat history for one session.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    entries: Vec<TranscriptEntry>,
}

impl Transcript {
    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn push(&mut self, entry: TranscriptEntry) {
        self.entries.push(entry);
    }

    fn get_mut(&mut self, id: &str) -> Option<&mut TranscriptEntry> {
        self.entries.iter_mut().rev().find(|e| e.id == id)
    }

    /// Attach a cost to the most recent assistant entry.
    fn attach_cost(&mut self, cost: f64) -> bool {
        match self
            .entries
            .iter_mut()
            .rev()
            .find(|e| e.role == Role::Assistant)
        {
            Some(entry) => {
                entry.cost = Some(cost);
                true
            }
            None => false,
        }
    }
}

/// The assistant message currently being streamed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamingState {
    active_message_id: Option<String>,
    accumulated_text: String,
}

impl StreamingState {
    pub fn active_message_id(&self) -> Option<&str> {
        self.active_message_id.as_deref()
    }

    pub fn accumulated_text(&self) -> &str {
        &self.accumulated_text
    }

    pub fn is_streaming(&self) -> bool {
        self.active_message_id.is_some()
    }
}

/// Lifecycle of a tool call as seen by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolStatus {
    Running,
    Done,
}

/// A tool invocation started since the last finalize.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCallRecord {
    pub id: String,
    pub name: String,
    pub status: ToolStatus,
    /// Content-block index the runtime reported at start, if any.
    block_index: Option<u64>,
}

/// Maps runtime events to outbound messages.
#[derive(Debug, Default)]
pub struct EventTranslator {
    streaming: StreamingState,
    tools: Vec<ToolCallRecord>,
    transcript: Transcript,
    session_id: Option<String>,
    next_message_id: u64,
    /// Set by an interrupt; drops stale output of the abandoned turn.
    suppress_turn: bool,
    /// Count of turns the runtime has ended.
    turns_ended: u64,
}

impl EventTranslator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runtime session id, once the runtime has reported it.
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn streaming(&self) -> &StreamingState {
        &self.streaming
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming.is_streaming()
    }

    pub fn tools(&self) -> &[ToolCallRecord] {
        &self.tools
    }

    pub fn running_tools(&self) -> impl Iterator<Item = &ToolCallRecord> {
        self.tools.iter().filter(|t| t.status == ToolStatus::Running)
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    /// Turn generation. Advances on every `result` or failure from the
    /// runtime, so a caller can tell whether the turn it saw is still the
    /// current one.
    pub fn turns_ended(&self) -> u64 {
        self.turns_ended
    }

    /// Record a prompt the user submitted.
    pub fn record_user(&mut self, text: &str) {
        let id = self.allocate_id();
        self.transcript.push(TranscriptEntry {
            id,
            role: Role::User,
            content: text.to_string(),
            cost: None,
        });
    }

    /// Translate one runtime event into zero or more client messages.
    pub fn translate(&mut self, event: RuntimeEvent) -> Vec<ServerMessage> {
        if event.ends_turn() {
            self.turns_ended += 1;
        }

        if self.suppress_turn {
            match &event {
                RuntimeEvent::TextDelta { .. }
                | RuntimeEvent::ToolStart { .. }
                | RuntimeEvent::BlockStop { .. } => {
                    trace!("Dropping output of interrupted turn");
                    return Vec::new();
                }
                RuntimeEvent::MessageStart
                | RuntimeEvent::SessionInit { .. }
                | RuntimeEvent::AssistantMessage { .. }
                | RuntimeEvent::Result { .. }
                | RuntimeEvent::Failure { .. } => self.suppress_turn = false,
                RuntimeEvent::Other => {}
            }
        }

        match event {
            RuntimeEvent::SessionInit { session_id, tools } => {
                if self.session_id.is_some() {
                    debug!(session_id = %session_id, "Ignoring repeated session init");
                    return Vec::new();
                }
                self.session_id = Some(session_id.clone());
                vec![ServerMessage::SystemInit { session_id, tools }]
            }
            RuntimeEvent::TextDelta { text } => {
                self.append_text(&text);
                vec![ServerMessage::TextDelta { text }]
            }
            RuntimeEvent::ToolStart { id, name, index } => {
                self.tools.push(ToolCallRecord {
                    id: id.clone(),
                    name: name.clone(),
                    status: ToolStatus::Running,
                    block_index: index,
                });
                vec![ServerMessage::ToolStart { tool: name, id }]
            }
            RuntimeEvent::BlockStop { index } => match self.complete_tool(index) {
                Some(id) => vec![ServerMessage::ToolDone { id }],
                None => Vec::new(),
            },
            RuntimeEvent::AssistantMessage { content } => {
                self.finalize();
                vec![ServerMessage::AssistantMessage { content }]
            }
            RuntimeEvent::Result { text, cost, .. } => {
                self.finalize();
                // Zero means "no charge reported", not "free".
                if cost > 0.0 && !self.transcript.attach_cost(cost) {
                    debug!(cost, "No assistant message to attach cost to");
                }
                vec![ServerMessage::Result { text, cost }]
            }
            RuntimeEvent::Failure { message } => self.fail(message),
            RuntimeEvent::MessageStart | RuntimeEvent::Other => Vec::new(),
        }
    }

    /// Finalize after a runtime failure and report it.
    pub fn fail(&mut self, message: impl Into<String>) -> Vec<ServerMessage> {
        let message = message.into();
        self.finalize();
        self.suppress_turn = false;

        let id = self.allocate_id();
        self.transcript.push(TranscriptEntry {
            id,
            role: Role::Assistant,
            content: format!("Error: {message}"),
            cost: None,
        });
        vec![ServerMessage::Error { message }]
    }

    /// Finalize after the runtime acknowledged an interrupt.
    ///
    /// Every tool still running is reported done; late output from the
    /// abandoned turn is dropped until the runtime moves on.
    pub fn interrupt(&mut self) -> Vec<ServerMessage> {
        let cancelled: Vec<ServerMessage> = self
            .tools
            .iter_mut()
            .filter(|t| t.status == ToolStatus::Running)
            .map(|t| {
                t.status = ToolStatus::Done;
                ServerMessage::ToolDone { id: t.id.clone() }
            })
            .collect();

        self.finalize();
        self.suppress_turn = true;
        cancelled
    }

    /// Close out the streaming message and forget tool calls.
    pub fn finalize(&mut self) {
        self.streaming = StreamingState::default();
        self.tools.clear();
    }

    fn append_text(&mut self, fragment: &str) {
        match self.streaming.active_message_id.clone() {
            Some(id) => {
                self.streaming.accumulated_text.push_str(fragment);
                let text = self.streaming.accumulated_text.clone();
                if let Some(entry) = self.transcript.get_mut(&id) {
                    entry.content = text;
                }
            }
            None => {
                let id = self.allocate_id();
                self.streaming.active_message_id = Some(id.clone());
                self.streaming.accumulated_text = fragment.to_string();
                self.transcript.push(TranscriptEntry {
                    id,
                    role: Role::Assistant,
                    content: fragment.to_string(),
                    cost: None,
                });
            }
        }
    }

    /// Mark the tool owning a closed block done.
    ///
    /// With an index, only the running tool started at that index matches, so
    /// text blocks closing produce nothing. Without one, the oldest running
    /// tool is taken.
    fn complete_tool(&mut self, index: Option<u64>) -> Option<String> {
        let record = self.tools.iter_mut().find(|t| {
            t.status == ToolStatus::Running
                && match index {
                    Some(i) => t.block_index == Some(i),
                    None => true,
                }
        })?;
        record.status = ToolStatus::Done;
        Some(record.id.clone())
    }

    fn allocate_id(&mut self) -> String {
        self.next_message_id += 1;
        self.next_message_id.to_string()
    }
}

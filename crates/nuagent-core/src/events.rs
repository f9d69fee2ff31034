// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use nuagent_config::AgentMode;
use nuagent_tools::{events::TodoItem, ToolCall};

/// Topic published after an exchange's transaction has committed.
pub const TOPIC_EXCHANGE_COMPLETED: &str = "exchange_completed";
/// Topic published when a user submits a new turn, before orchestration starts.
pub const TOPIC_USER_INPUT_RECEIVED: &str = "user_input_received";

/// Which compaction path was taken for a given `ContextCompacted` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactionStrategyUsed {
    /// Rolling LLM summarization keeping structured sections.
    Structured,
    /// Rolling LLM summarization producing free-form narrative prose.
    Narrative,
    /// Deterministic message drop; no model call was made.
    Emergency,
}

/// Events emitted by the agent during a single turn.
/// Consumers (CI runner, TUI) subscribe to these to drive their output.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// A text chunk streamed from the model
    TextDelta(String),
    /// A complete text response from the model (after streaming finishes)
    TextComplete(String),
    /// A thinking/reasoning chunk from the model (extended thinking API).
    /// Consumers should accumulate deltas and finalise them into a Thinking
    /// segment when the model signals the end of the reasoning block.
    ThinkingDelta(String),
    /// A complete thinking/reasoning block (accumulated from ThinkingDelta events).
    ThinkingComplete(String),
    /// The model has requested a tool call
    ToolCallStarted(ToolCall),
    /// A tool call finished
    ToolCallFinished {
        call_id: String,
        tool_name: String,
        output: String,
        is_error: bool,
    },
    /// Context was compacted; statistics for the UI
    ContextCompacted {
        tokens_before: usize,
        tokens_after: usize,
        strategy: CompactionStrategyUsed,
        /// The loop round (`rounds` in `run_agentic_loop`) this compaction
        /// ran on; 0 for the pre-submit proactive check.
        turn: u32,
    },
    /// Current token usage update
    TokenUsage {
        input: u32,
        output: u32,
        /// Tokens served from the provider's prompt cache this turn.
        cache_read: u32,
        /// Tokens written into the provider's prompt cache this turn.
        cache_write: u32,
        cache_read_total: u64,
        cache_write_total: u64,
        max_tokens: usize,
    },
    /// The agent has finished processing the current user turn
    TurnComplete,
    /// A model-streaming turn was interrupted by cancellation; any text
    /// already streamed before the cut is carried in `partial_text`.
    Aborted { partial_text: String },
    /// A recoverable error occurred
    Error(String),
    /// The todo list was updated
    TodoUpdate(Vec<TodoItem>),
    /// The agent mode was changed
    ModeChanged(AgentMode),
    /// The agent is asking the user a question (id links to QuestionAnswer)
    Question { id: String, questions: Vec<String> },
    /// Answer to a previous Question event
    QuestionAnswer { id: String, answer: String },
}

/// A subscriber callback: invoked synchronously, in registration order, in
/// the publisher's own call stack.
pub type EventHandler = Arc<dyn Fn(&serde_json::Value) + Send + Sync>;

/// Single-process in-memory publish/subscribe bus.
///
/// Topics are plain strings (see `TOPIC_EXCHANGE_COMPLETED` /
/// `TOPIC_USER_INPUT_RECEIVED`); there is no delivery guarantee beyond
/// "every handler registered at publish time runs once, in order". Cloning
/// an `EventBus` shares the same subscriber table.
#[derive(Clone, Default)]
pub struct EventBus {
    handlers: Arc<Mutex<HashMap<String, Vec<EventHandler>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` to run on every future `publish` to `topic`.
    pub fn subscribe(&self, topic: impl Into<String>, handler: EventHandler) {
        self.handlers
            .lock()
            .expect("event bus lock poisoned")
            .entry(topic.into())
            .or_default()
            .push(handler);
    }

    /// Invoke every handler subscribed to `topic`, in registration order, on
    /// the calling thread.
    pub fn publish(&self, topic: &str, data: &serde_json::Value) {
        let handlers = self.handlers.lock().expect("event bus lock poisoned");
        if let Some(subs) = handlers.get(topic) {
            for handler in subs {
                handler(data);
            }
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let handlers = self.handlers.lock().expect("event bus lock poisoned");
        f.debug_struct("EventBus")
            .field("topics", &handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod bus_tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use serde_json::json;

    #[test]
    fn publish_with_no_subscribers_is_a_no_op() {
        let bus = EventBus::new();
        bus.publish(TOPIC_EXCHANGE_COMPLETED, &json!({"ok": true}));
    }

    #[test]
    fn subscriber_receives_published_payload() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(None));
        let seen2 = seen.clone();
        bus.subscribe(
            TOPIC_EXCHANGE_COMPLETED,
            Arc::new(move |data| {
                *seen2.lock().unwrap() = Some(data.clone());
            }),
        );
        bus.publish(TOPIC_EXCHANGE_COMPLETED, &json!({"exchange_id": 7}));
        assert_eq!(*seen.lock().unwrap(), Some(json!({"exchange_id": 7})));
    }

    #[test]
    fn handlers_run_in_registration_order() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = order.clone();
            bus.subscribe(
                TOPIC_USER_INPUT_RECEIVED,
                Arc::new(move |_| order.lock().unwrap().push(i)),
            );
        }
        bus.publish(TOPIC_USER_INPUT_RECEIVED, &json!(null));
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn other_topics_are_unaffected() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        bus.subscribe(
            TOPIC_EXCHANGE_COMPLETED,
            Arc::new(move |_| { count2.fetch_add(1, Ordering::SeqCst); }),
        );
        bus.publish(TOPIC_USER_INPUT_RECEIVED, &json!(null));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}

// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod agent;
mod compact;
mod events;
mod orchestrator;
mod prompts;
mod runtime_context;
mod session;

pub use agent::Agent;
pub use compact::{
    compact_session, compact_session_with_strategy, emergency_compact, smart_truncate,
};
pub use events::{
    AgentEvent, CompactionStrategyUsed, EventBus, EventHandler, TOPIC_EXCHANGE_COMPLETED,
    TOPIC_USER_INPUT_RECEIVED,
};
pub use orchestrator::{build_context_document, AugmentedContext, TurnOutcome};
pub use prompts::system_prompt;
pub use runtime_context::AgentRuntimeContext;
pub use session::{Session, TurnRecord};

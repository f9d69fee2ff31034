// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Exchange orchestrator: wires one REPL turn to the persistent store.
//!
//! `Agent::process_turn` is the store-aware counterpart to `Agent::submit` —
//! it opens an exchange, builds the context document, drives the normal
//! tool-calling loop, and persists the resulting messages in one transaction.
//!
//! The store's [`nuagent_store::Store::transaction`] closure is synchronous
//! (it runs on a blocking thread so it can hold a `rusqlite::Transaction`
//! across commit/rollback), so it cannot wrap the async model/tool-calling
//! loop directly. Instead the exchange row and the raw user message are
//! written first via `with_connection`, the async loop runs uncommitted, and
//! a single transaction at the end persists every message the loop produced
//! plus the exchange completion. A cancelled turn deletes the exchange and
//! its user message instead of leaving an orphaned `in_progress` row, which
//! is the closest equivalent this split can offer to the all-or-nothing
//! transaction the spec describes.
use std::sync::Arc;

use anyhow::Context as _;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use nuagent_model::{Message, MessageContent, Role as ModelRole};
use nuagent_store::{
    query, CallerId, ExchangeMetrics, ExchangeUpdate, NewMessage, Role as StoreRole, Store,
    StoreResult,
};

use crate::agent::Agent;
use crate::events::{AgentEvent, EventBus, TOPIC_EXCHANGE_COMPLETED, TOPIC_USER_INPUT_RECEIVED};

/// Result of one `process_turn` call.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub exchange_id: i64,
    pub assistant_message: Option<String>,
    pub cancelled: bool,
}

impl Agent {
    /// Run one store-backed exchange: persist the user's message, assemble
    /// the Context Document from prior non-redacted history, run the
    /// tool-calling loop, and persist everything the loop produced.
    ///
    /// `cancel` mirrors the cancellation token the scheduler already uses for
    /// in-flight tool batches — cancelling it aborts the model/tool loop and
    /// the exchange is deleted rather than completed.
    pub async fn process_turn(
        &mut self,
        store: &Store,
        caller: CallerId,
        conversation_id: i64,
        bus: &EventBus,
        user_input: &str,
        tx: mpsc::Sender<AgentEvent>,
        cancel: CancellationToken,
    ) -> anyhow::Result<TurnOutcome> {
        bus.publish(
            TOPIC_USER_INPUT_RECEIVED,
            &serde_json::json!({ "conversation_id": conversation_id, "content": user_input }),
        );

        store
            .with_connection(caller, |conn| query::increment_workers(conn))
            .await
            .context("failed to mark worker active")?;

        let user_input_owned = user_input.to_string();
        let exchange_id = store
            .with_connection(caller, move |conn| -> StoreResult<i64> {
                let exchange_id = query::create_exchange(conn, conversation_id, &user_input_owned)?;
                query::add_message(
                    conn,
                    &NewMessage::user(conversation_id, exchange_id, user_input_owned.clone()),
                )?;
                Ok(exchange_id)
            })
            .await
            .context("failed to open exchange")?;

        let tool_names = self.tools().names();
        let history_rows = store
            .with_connection(caller, move |conn| query::messages(conn, conversation_id, None, false))
            .await
            .context("failed to load conversation history")?;
        let visible_history: Vec<nuagent_store::Message> = history_rows
            .into_iter()
            .filter(|m| !m.redacted && m.exchange_id != exchange_id)
            .collect();

        let context_document = build_context_document(None, &tool_names, user_input);

        let history_messages: Vec<Message> =
            visible_history.iter().map(store_message_to_model).collect();
        self.seed_history(history_messages).await;

        let before_len = self.session().messages.len();

        let (cancel_tx, cancel_rx) = oneshot::channel();
        let watcher = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                cancel.cancelled().await;
                let _ = cancel_tx.send(());
            })
        };
        let loop_result = self
            .submit_with_cancel(&context_document, tx.clone(), cancel_rx)
            .await;
        watcher.abort();

        if cancel.is_cancelled() {
            store
                .with_connection(caller, move |conn| -> StoreResult<()> {
                    conn.execute(
                        "DELETE FROM messages WHERE exchange_id = ?1",
                        rusqlite::params![exchange_id],
                    )?;
                    conn.execute(
                        "DELETE FROM exchanges WHERE id = ?1",
                        rusqlite::params![exchange_id],
                    )?;
                    Ok(())
                })
                .await
                .context("failed to discard cancelled exchange")?;
            store
                .with_connection(caller, |conn| query::decrement_workers(conn))
                .await
                .context("failed to mark worker idle")?;
            return Ok(TurnOutcome {
                exchange_id,
                assistant_message: None,
                cancelled: true,
            });
        }

        let new_messages: Vec<Message> = self.session().messages[before_len..]
            .iter()
            .skip(1) // the synthetic context-document user message; the raw input is already persisted.
            .cloned()
            .collect();

        let final_assistant_text = new_messages
            .iter()
            .rev()
            .find_map(|m| (m.role == ModelRole::Assistant).then(|| m.as_text()).flatten())
            .map(|s| s.to_string());

        let last_assistant_index = new_messages
            .iter()
            .rposition(|m| m.role == ModelRole::Assistant && m.as_text().is_some());

        let tool_call_count = new_messages
            .iter()
            .filter(|m| matches!(m.content, MessageContent::ToolCall { .. }))
            .count() as i64;
        let tokens_output: i64 = new_messages.iter().map(|m| m.approx_tokens() as i64).sum();
        let tokens_input = (context_document.len() / 4) as i64;

        let new_message_rows: Vec<NewMessage> = new_messages
            .iter()
            .enumerate()
            .map(|(i, m)| {
                let redacted = last_assistant_index != Some(i);
                model_message_to_new_message(conversation_id, exchange_id, m, redacted)
            })
            .collect();

        let metrics = ExchangeMetrics {
            tokens_input,
            tokens_output,
            spend: 0.0,
            message_count: new_message_rows.len() as i64,
            tool_call_count,
        };
        let error_text = loop_result.as_ref().err().map(|e| e.to_string());
        let final_text_for_store = final_assistant_text.clone();

        store
            .transaction(caller, move |tx| -> StoreResult<()> {
                for row in &new_message_rows {
                    query::add_message(tx, row)?;
                }
                if let Some(error) = error_text {
                    query::update_exchange(
                        tx,
                        exchange_id,
                        &ExchangeUpdate {
                            status: Some(nuagent_store::ExchangeStatus::Failed),
                            error: Some(error),
                            completed_at: Some(chrono::Utc::now().to_rfc3339()),
                            tokens_input: Some(metrics.tokens_input),
                            tokens_output: Some(metrics.tokens_output),
                            spend: Some(metrics.spend),
                            message_count: Some(metrics.message_count),
                            tool_call_count: Some(metrics.tool_call_count),
                            ..Default::default()
                        },
                    )?;
                } else {
                    query::complete_exchange(
                        tx,
                        exchange_id,
                        None,
                        final_text_for_store.as_deref(),
                        &metrics,
                    )?;
                }
                Ok(())
            })
            .await
            .context("failed to commit exchange")?;

        store
            .with_connection(caller, |conn| query::decrement_workers(conn))
            .await
            .context("failed to mark worker idle")?;

        loop_result?;

        bus.publish(
            TOPIC_EXCHANGE_COMPLETED,
            &serde_json::json!({
                "conversation_id": conversation_id,
                "exchange_id": exchange_id,
            }),
        );

        Ok(TurnOutcome {
            exchange_id,
            assistant_message: final_assistant_text,
            cancelled: false,
        })
    }
}

/// Fragments available when building the Context section of a turn's
/// Context Document — currently always empty since no RAG/spellcheck worker
/// populates them yet; the shape is kept so that work can plug in without
/// touching `build_context_document`'s callers.
pub struct AugmentedContext {
    pub redacted_ids: Vec<i64>,
    pub spelling_correction: Option<(String, String)>,
}

/// Build the three-section Markdown document sent to the model in place of
/// the raw user turn: Context, Available Tools, User Query.
pub fn build_context_document(
    augmented: Option<&AugmentedContext>,
    tool_names: &[String],
    user_input: &str,
) -> String {
    let context_body = match augmented {
        Some(aug) if !aug.redacted_ids.is_empty() || aug.spelling_correction.is_some() => {
            let mut lines = Vec::new();
            if !aug.redacted_ids.is_empty() {
                lines.push(format!(
                    "Referenced redacted messages: {}",
                    compress_id_ranges(&aug.redacted_ids)
                ));
            }
            if let Some((said, meant)) = &aug.spelling_correction {
                lines.push(format!("user said '{said}' but means '{meant}'"));
            }
            lines.join("\n")
        }
        _ => "No Augmented Information Generated".to_string(),
    };

    format!(
        "## Context\n\n{context_body}\n\n## Available Tools\n\n{tools}\n\n## User Query\n\n{user_input}\n",
        tools = tool_names.join(", "),
    )
}

/// Compress a sorted or unsorted list of message ids into `"a, b-c, d"` form.
fn compress_id_ranges(ids: &[i64]) -> String {
    let mut sorted: Vec<i64> = ids.to_vec();
    sorted.sort_unstable();
    sorted.dedup();

    let mut ranges: Vec<(i64, i64)> = Vec::new();
    for id in sorted {
        match ranges.last_mut() {
            Some((_, end)) if *end + 1 == id => *end = id,
            _ => ranges.push((id, id)),
        }
    }

    ranges
        .into_iter()
        .map(|(start, end)| {
            if start == end {
                start.to_string()
            } else {
                format!("{start}-{end}")
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn store_role_to_model(role: StoreRole) -> ModelRole {
    match role {
        StoreRole::User => ModelRole::User,
        StoreRole::Assistant => ModelRole::Assistant,
        StoreRole::Tool => ModelRole::Tool,
        StoreRole::System => ModelRole::System,
    }
}

fn model_role_to_store(role: ModelRole) -> StoreRole {
    match role {
        ModelRole::User => StoreRole::User,
        ModelRole::Assistant => StoreRole::Assistant,
        ModelRole::Tool => StoreRole::Tool,
        ModelRole::System => StoreRole::System,
    }
}

/// Convert a persisted row back into a provider-facing message for history
/// seeding. Only plain text is carried — tool-call/tool-result rows are
/// always redacted and therefore excluded from `visible_history` upstream.
fn store_message_to_model(row: &nuagent_store::Message) -> Message {
    Message {
        role: store_role_to_model(row.role),
        content: MessageContent::Text(row.content.clone()),
    }
}

fn model_message_to_new_message(
    conversation_id: i64,
    exchange_id: i64,
    msg: &Message,
    redacted: bool,
) -> NewMessage {
    let mut new_msg = NewMessage {
        conversation_id,
        exchange_id,
        role: Some(model_role_to_store(msg.role.clone())),
        redacted,
        include_in_context: !redacted,
        ..Default::default()
    };

    match &msg.content {
        MessageContent::Text(t) => {
            new_msg.content = t.clone();
        }
        MessageContent::ContentParts(_) => {
            new_msg.content = msg.as_text().unwrap_or_default().to_string();
        }
        MessageContent::ToolCall {
            tool_call_id,
            function,
        } => {
            new_msg.tool_call_id = Some(tool_call_id.clone());
            new_msg.tool_calls = Some(serde_json::json!([{
                "id": tool_call_id,
                "name": function.name,
                "arguments": function.arguments,
            }]));
        }
        MessageContent::ToolResult {
            tool_call_id,
            content,
        } => {
            new_msg.tool_call_id = Some(tool_call_id.clone());
            new_msg.content = content.to_string();
            new_msg.tool_result = Some(serde_json::Value::String(content.to_string()));
        }
    }

    new_msg
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_document_falls_back_when_nothing_augmented() {
        let doc = build_context_document(None, &["shell".into()], "what's in this repo?");
        assert!(doc.contains("No Augmented Information Generated"));
        assert!(doc.contains("## Available Tools\n\nshell"));
        assert!(doc.contains("## User Query\n\nwhat's in this repo?"));
    }

    #[test]
    fn context_document_lists_tools_sorted_as_given() {
        let doc = build_context_document(None, &["shell".into(), "read_file".into()], "hi");
        assert!(doc.contains("shell, read_file"));
    }

    #[test]
    fn compress_id_ranges_merges_consecutive_runs() {
        assert_eq!(compress_id_ranges(&[1, 2, 3, 5, 7, 8]), "1-3, 5, 7-8");
    }

    #[test]
    fn compress_id_ranges_handles_empty() {
        assert_eq!(compress_id_ranges(&[]), "");
    }

    #[test]
    fn compress_id_ranges_dedups_and_sorts() {
        assert_eq!(compress_id_ranges(&[3, 1, 1, 2]), "1-3");
    }

    #[test]
    fn context_document_includes_spelling_correction_note() {
        let aug = AugmentedContext {
            redacted_ids: vec![],
            spelling_correction: Some(("recieve".into(), "receive".into())),
        };
        let doc = build_context_document(Some(&aug), &[], "q");
        assert!(doc.contains("user said 'recieve' but means 'receive'"));
    }
}

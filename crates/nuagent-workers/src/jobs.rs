use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use nuagent_model::{CompletionRequest, EmbeddingProvider, Message, ModelProvider};
use nuagent_store::{query, CallerId, Store};

use crate::backoff::retry_with_backoff;
use crate::critical_section::CriticalSectionCounter;
use crate::llm::collect_text;
use crate::supervisor::{StatusHandle, WorkerJob};

fn render_transcript(messages: &[nuagent_store::Message]) -> String {
    messages
        .iter()
        .filter(|m| !m.redacted)
        .map(|m| format!("{}: {}", m.role.as_str(), m.content))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Periodically summarizes conversations with a NULL summary (excluding the
/// active one) into 2-3 sentences, written back under a critical section.
pub struct ConversationSummarizer {
    store: Arc<Store>,
    provider: Arc<dyn ModelProvider>,
    caller: CallerId,
    active_conversation_id: Arc<AtomicI64>,
}

impl ConversationSummarizer {
    pub fn new(
        store: Arc<Store>,
        provider: Arc<dyn ModelProvider>,
        caller: CallerId,
        active_conversation_id: Arc<AtomicI64>,
    ) -> Self {
        Self {
            store,
            provider,
            caller,
            active_conversation_id,
        }
    }
}

#[async_trait]
impl WorkerJob for ConversationSummarizer {
    fn name(&self) -> &'static str {
        "conversation_summarizer"
    }

    async fn run_once(
        &self,
        status: &StatusHandle,
        critical: &Arc<CriticalSectionCounter>,
        shutdown: &CancellationToken,
    ) -> anyhow::Result<()> {
        let caller = self.caller;
        let enabled = self
            .store
            .with_connection(caller, |conn| {
                Ok(query::get_bool_config(conn, "conversation_summarizer_enabled")?.unwrap_or(true))
            })
            .await?;
        if !enabled {
            return Ok(());
        }

        let exclude_id = self.active_conversation_id.load(Ordering::SeqCst);
        let conversations = self
            .store
            .with_connection(caller, move |conn| query::get_unsummarized_conversations(conn, exclude_id))
            .await?;

        for conv in conversations {
            if shutdown.is_cancelled() {
                return Ok(());
            }
            status.set_current_item(Some(format!("conversation:{}", conv.id)));
            status.record_attempt();

            let conv_id = conv.id;
            let msgs = self
                .store
                .with_connection(caller, move |conn| query::messages(conn, conv_id, None, false))
                .await?;
            let transcript = render_transcript(&msgs);
            if transcript.trim().is_empty() {
                status.record_completed();
                continue;
            }

            let req = CompletionRequest {
                messages: vec![
                    Message::system(
                        "Summarize this conversation in 2-3 sentences. Be concise and factual.",
                    ),
                    Message::user(transcript),
                ],
                ..Default::default()
            };

            let outcome = retry_with_backoff(3, Duration::from_secs(1), || {
                collect_text(self.provider.as_ref(), req.clone())
            })
            .await;

            match outcome {
                Ok(resp) => {
                    let cost = self.provider.calculate_cost(resp.input_tokens, resp.output_tokens);
                    let model = self.provider.model_name().to_string();
                    let summary = resp.text;
                    let _guard = critical.enter();
                    self.store
                        .with_connection(caller, move |conn| {
                            query::set_conversation_summary(conn, conv_id, &summary, &model, cost)
                        })
                        .await?;
                    status.add_spend(cost);
                    status.record_completed();
                }
                Err(e) => {
                    status.record_failed();
                    let err_msg = e.to_string();
                    let _ = self
                        .store
                        .with_connection(caller, move |conn| {
                            query::record_failed_job(
                                conn,
                                "conversation_summary",
                                Some(&conv_id.to_string()),
                                None,
                                &err_msg,
                            )
                        })
                        .await;
                }
            }
        }
        Ok(())
    }
}

/// Analogous to [`ConversationSummarizer`], one exchange at a time.
pub struct ExchangeSummarizer {
    store: Arc<Store>,
    provider: Arc<dyn ModelProvider>,
    caller: CallerId,
    active_conversation_id: Arc<AtomicI64>,
}

impl ExchangeSummarizer {
    pub fn new(
        store: Arc<Store>,
        provider: Arc<dyn ModelProvider>,
        caller: CallerId,
        active_conversation_id: Arc<AtomicI64>,
    ) -> Self {
        Self {
            store,
            provider,
            caller,
            active_conversation_id,
        }
    }
}

#[async_trait]
impl WorkerJob for ExchangeSummarizer {
    fn name(&self) -> &'static str {
        "exchange_summarizer"
    }

    async fn run_once(
        &self,
        status: &StatusHandle,
        critical: &Arc<CriticalSectionCounter>,
        shutdown: &CancellationToken,
    ) -> anyhow::Result<()> {
        let caller = self.caller;
        let enabled = self
            .store
            .with_connection(caller, |conn| {
                Ok(query::get_bool_config(conn, "exchange_summarizer_enabled")?.unwrap_or(true))
            })
            .await?;
        if !enabled {
            return Ok(());
        }

        let exclude_id = self.active_conversation_id.load(Ordering::SeqCst);
        let exchanges = self
            .store
            .with_connection(caller, move |conn| query::get_unsummarized_exchanges(conn, exclude_id))
            .await?;

        for exchange in exchanges {
            if shutdown.is_cancelled() {
                return Ok(());
            }
            status.set_current_item(Some(format!("exchange:{}", exchange.id)));
            status.record_attempt();

            let transcript = format!(
                "user: {}\nassistant: {}",
                exchange.user_message,
                exchange.assistant_message.clone().unwrap_or_default()
            );
            let req = CompletionRequest {
                messages: vec![
                    Message::system("Summarize this exchange in 2-3 sentences. Be concise and factual."),
                    Message::user(transcript),
                ],
                ..Default::default()
            };

            let exchange_id = exchange.id;
            let outcome = retry_with_backoff(3, Duration::from_secs(1), || {
                collect_text(self.provider.as_ref(), req.clone())
            })
            .await;

            match outcome {
                Ok(resp) => {
                    let model = self.provider.model_name().to_string();
                    let summary = resp.text;
                    let cost = self.provider.calculate_cost(resp.input_tokens, resp.output_tokens);
                    let _guard = critical.enter();
                    self.store
                        .with_connection(caller, move |conn| {
                            query::set_exchange_summary(conn, exchange_id, &summary, &model)
                        })
                        .await?;
                    status.add_spend(cost);
                    status.record_completed();
                }
                Err(e) => {
                    status.record_failed();
                    let err_msg = e.to_string();
                    let _ = self
                        .store
                        .with_connection(caller, move |conn| {
                            query::record_failed_job(
                                conn,
                                "exchange_summary",
                                Some(&exchange_id.to_string()),
                                None,
                                &err_msg,
                            )
                        })
                        .await;
                }
            }
        }
        Ok(())
    }
}

/// Polls for Conversation/Exchange rows with a summary but no embedding;
/// issues batched embedding calls and upserts by id.
pub struct EmbeddingGenerator {
    store: Arc<Store>,
    provider: Arc<dyn EmbeddingProvider>,
    caller: CallerId,
    active_conversation_id: Arc<AtomicI64>,
    batch_size: usize,
    rate_limit: Duration,
}

impl EmbeddingGenerator {
    pub fn new(
        store: Arc<Store>,
        provider: Arc<dyn EmbeddingProvider>,
        caller: CallerId,
        active_conversation_id: Arc<AtomicI64>,
    ) -> Self {
        Self {
            store,
            provider,
            caller,
            active_conversation_id,
            batch_size: 10,
            rate_limit: Duration::from_millis(100),
        }
    }

    pub fn with_batch_size(mut self, n: usize) -> Self {
        self.batch_size = n;
        self
    }
}

#[async_trait]
impl WorkerJob for EmbeddingGenerator {
    fn name(&self) -> &'static str {
        "embedding_generator"
    }

    async fn run_once(
        &self,
        status: &StatusHandle,
        critical: &Arc<CriticalSectionCounter>,
        shutdown: &CancellationToken,
    ) -> anyhow::Result<()> {
        let caller = self.caller;
        let enabled = self
            .store
            .with_connection(caller, |conn| {
                Ok(query::get_bool_config(conn, "embedding_generator_enabled")?.unwrap_or(true))
            })
            .await?;
        if !enabled {
            return Ok(());
        }

        let exclude_id = self.active_conversation_id.load(Ordering::SeqCst);
        let exchanges = self
            .store
            .with_connection(caller, move |conn| query::get_exchanges_needing_embeddings(conn, exclude_id))
            .await?;
        let conversations = self
            .store
            .with_connection(caller, move |conn| {
                query::get_conversations_needing_embeddings(conn, exclude_id)
            })
            .await?;

        for chunk in exchanges.chunks(self.batch_size) {
            if shutdown.is_cancelled() {
                return Ok(());
            }
            status.set_current_item(Some(format!("exchange batch ({})", chunk.len())));
            let texts: Vec<String> = chunk.iter().map(|e| e.summary.clone().unwrap_or_default()).collect();
            status.record_attempt();
            match self.provider.embed_batch(&texts).await {
                Ok(vectors) => {
                    let _guard = critical.enter();
                    for (exchange, vector) in chunk.iter().zip(vectors.into_iter()) {
                        let id = exchange.id;
                        let content = exchange.summary.clone().unwrap_or_default();
                        self.store
                            .with_connection(caller, move |conn| {
                                query::upsert_exchange_embedding(conn, id, &content, &vector)
                            })
                            .await?;
                    }
                    status.record_completed();
                }
                Err(e) => {
                    status.record_failed();
                    let err_msg = e.to_string();
                    let _ = self
                        .store
                        .with_connection(caller, move |conn| {
                            query::record_failed_job(conn, "exchange_embedding", None, None, &err_msg)
                        })
                        .await;
                }
            }
            tokio::time::sleep(self.rate_limit).await;
        }

        for chunk in conversations.chunks(self.batch_size) {
            if shutdown.is_cancelled() {
                return Ok(());
            }
            status.set_current_item(Some(format!("conversation batch ({})", chunk.len())));
            let texts: Vec<String> = chunk.iter().map(|c| c.summary.clone().unwrap_or_default()).collect();
            status.record_attempt();
            match self.provider.embed_batch(&texts).await {
                Ok(vectors) => {
                    let _guard = critical.enter();
                    for (conv, vector) in chunk.iter().zip(vectors.into_iter()) {
                        let id = conv.id;
                        let content = conv.summary.clone().unwrap_or_default();
                        self.store
                            .with_connection(caller, move |conn| {
                                query::upsert_conversation_embedding(conn, id, &content, &vector)
                            })
                            .await?;
                    }
                    status.record_completed();
                }
                Err(e) => {
                    status.record_failed();
                    let err_msg = e.to_string();
                    let _ = self
                        .store
                        .with_connection(caller, move |conn| {
                            query::record_failed_job(conn, "conversation_embedding", None, None, &err_msg)
                        })
                        .await;
                }
            }
            tokio::time::sleep(self.rate_limit).await;
        }

        Ok(())
    }
}

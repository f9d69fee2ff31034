use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    Active,
    Archived,
}

impl ConversationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Archived => "archived",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "archived" => Self::Archived,
            _ => Self::Active,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExchangeStatus {
    InProgress,
    Completed,
    Failed,
}

impl ExchangeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            _ => Self::InProgress,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    Tool,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
            Self::System => "system",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "assistant" => Self::Assistant,
            "tool" => Self::Tool,
            "system" => Self::System,
            _ => Self::User,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: i64,
    pub created_at: String,
    pub title: Option<String>,
    pub status: ConversationStatus,
    pub summary: Option<String>,
    pub summary_model: Option<String>,
    pub summary_cost: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exchange {
    pub id: i64,
    pub conversation_id: i64,
    pub exchange_number: i64,
    pub started_at: String,
    pub completed_at: Option<String>,
    pub status: ExchangeStatus,
    pub user_message: String,
    pub assistant_message: Option<String>,
    pub summary: Option<String>,
    pub summary_model: Option<String>,
    pub error: Option<String>,
    pub tokens_input: i64,
    pub tokens_output: i64,
    pub spend: f64,
    pub message_count: i64,
    pub tool_call_count: i64,
}

#[derive(Debug, Clone, Default)]
pub struct NewMessage {
    pub conversation_id: i64,
    pub exchange_id: i64,
    pub actor: Option<String>,
    pub role: Option<Role>,
    pub content: String,
    pub model: Option<String>,
    pub tokens_input: Option<i64>,
    pub tokens_output: Option<i64>,
    pub spend: Option<f64>,
    pub tool_calls: Option<serde_json::Value>,
    pub tool_call_id: Option<String>,
    pub tool_result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub redacted: bool,
    pub include_in_context: bool,
}

impl NewMessage {
    pub fn user(conversation_id: i64, exchange_id: i64, content: impl Into<String>) -> Self {
        Self {
            conversation_id,
            exchange_id,
            role: Some(Role::User),
            content: content.into(),
            redacted: false,
            include_in_context: true,
            ..Default::default()
        }
    }

    pub fn assistant(conversation_id: i64, exchange_id: i64, content: impl Into<String>) -> Self {
        Self {
            conversation_id,
            exchange_id,
            role: Some(Role::Assistant),
            content: content.into(),
            redacted: false,
            include_in_context: true,
            ..Default::default()
        }
    }

    pub fn redacted(mut self, redacted: bool) -> Self {
        self.redacted = redacted;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub conversation_id: i64,
    pub exchange_id: i64,
    pub actor: Option<String>,
    pub role: Role,
    pub content: String,
    pub model: Option<String>,
    pub tokens_input: Option<i64>,
    pub tokens_output: Option<i64>,
    pub spend: Option<f64>,
    pub tool_calls: Option<serde_json::Value>,
    pub tool_call_id: Option<String>,
    pub tool_result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub redacted: bool,
    pub include_in_context: bool,
    pub created_at: String,
}

#[derive(Debug, Clone, Default)]
pub struct ExchangeUpdate {
    pub status: Option<ExchangeStatus>,
    pub summary: Option<String>,
    pub summary_model: Option<String>,
    pub error: Option<String>,
    pub assistant_message: Option<String>,
    pub completed_at: Option<String>,
    pub tokens_input: Option<i64>,
    pub tokens_output: Option<i64>,
    pub spend: Option<f64>,
    pub message_count: Option<i64>,
    pub tool_call_count: Option<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct ExchangeMetrics {
    pub tokens_input: i64,
    pub tokens_output: i64,
    pub spend: f64,
    pub message_count: i64,
    pub tool_call_count: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionTokens {
    pub input: i64,
    pub output: i64,
    pub total: i64,
    pub spend: f64,
}

#[derive(Debug, Clone)]
pub struct EmbeddingRecord {
    pub kind: String,
    pub source: String,
    pub content: String,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedJob {
    pub id: i64,
    pub job_type: String,
    pub ref_id: Option<String>,
    pub payload: Option<String>,
    pub error: String,
    pub retry_count: i64,
    pub failed_at: String,
}

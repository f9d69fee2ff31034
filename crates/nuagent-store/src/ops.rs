use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{StoreError, StoreResult};
use crate::types::*;

fn now() -> String {
    Utc::now().to_rfc3339()
}

pub fn create_conversation(conn: &Connection) -> StoreResult<i64> {
    conn.execute(
        "INSERT INTO conversations (created_at, status) VALUES (?1, 'active')",
        params![now()],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn create_exchange(conn: &Connection, conv_id: i64, user_message: &str) -> StoreResult<i64> {
    let next_number: i64 = conn.query_row(
        "SELECT COALESCE(MAX(exchange_number), 0) + 1 FROM exchanges WHERE conversation_id = ?1",
        params![conv_id],
        |r| r.get(0),
    )?;
    conn.execute(
        "INSERT INTO exchanges (conversation_id, exchange_number, started_at, status, user_message)
         VALUES (?1, ?2, ?3, 'in_progress', ?4)",
        params![conv_id, next_number, now(), user_message],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn add_message(conn: &Connection, msg: &NewMessage) -> StoreResult<i64> {
    let role = msg.role.unwrap_or(Role::User);
    conn.execute(
        "INSERT INTO messages (
            conversation_id, exchange_id, actor, role, content, model,
            tokens_input, tokens_output, spend, tool_calls, tool_call_id,
            tool_result, error, redacted, include_in_context, created_at
         ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16)",
        params![
            msg.conversation_id,
            msg.exchange_id,
            msg.actor,
            role.as_str(),
            msg.content,
            msg.model,
            msg.tokens_input,
            msg.tokens_output,
            msg.spend,
            msg.tool_calls.as_ref().map(|v| v.to_string()),
            msg.tool_call_id,
            msg.tool_result.as_ref().map(|v| v.to_string()),
            msg.error,
            msg.redacted as i64,
            msg.include_in_context as i64,
            now(),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

fn row_to_message(row: &rusqlite::Row) -> rusqlite::Result<Message> {
    let tool_calls: Option<String> = row.get("tool_calls")?;
    let tool_result: Option<String> = row.get("tool_result")?;
    Ok(Message {
        id: row.get("id")?,
        conversation_id: row.get("conversation_id")?,
        exchange_id: row.get("exchange_id")?,
        actor: row.get("actor")?,
        role: Role::parse(&row.get::<_, String>("role")?),
        content: row.get("content")?,
        model: row.get("model")?,
        tokens_input: row.get("tokens_input")?,
        tokens_output: row.get("tokens_output")?,
        spend: row.get("spend")?,
        tool_calls: tool_calls.and_then(|s| serde_json::from_str(&s).ok()),
        tool_call_id: row.get("tool_call_id")?,
        tool_result: tool_result.and_then(|s| serde_json::from_str(&s).ok()),
        error: row.get("error")?,
        redacted: row.get::<_, i64>("redacted")? != 0,
        include_in_context: row.get::<_, i64>("include_in_context")? != 0,
        created_at: row.get("created_at")?,
    })
}

/// Ordered by `id` ascending. `since` filters on `created_at >=`;
/// `include_in_context_only` additionally requires `include_in_context = 1`.
pub fn messages(
    conn: &Connection,
    conv_id: i64,
    since: Option<&str>,
    include_in_context_only: bool,
) -> StoreResult<Vec<Message>> {
    let sql = format!(
        "SELECT * FROM messages WHERE conversation_id = ?1 {} {} ORDER BY id ASC",
        if since.is_some() { "AND created_at >= ?2" } else { "" },
        if include_in_context_only { "AND include_in_context = 1" } else { "" },
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = if let Some(s) = since {
        stmt.query_map(params![conv_id, s], row_to_message)?
    } else {
        stmt.query_map(params![conv_id], row_to_message)?
    };
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// Strictly greater `id`; used for incremental UI refresh.
pub fn messages_since(conn: &Connection, conv_id: i64, after_id: i64) -> StoreResult<Vec<Message>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM messages WHERE conversation_id = ?1 AND id > ?2 ORDER BY id ASC",
    )?;
    let rows = stmt.query_map(params![conv_id, after_id], row_to_message)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub fn update_exchange(conn: &Connection, exchange_id: i64, update: &ExchangeUpdate) -> StoreResult<()> {
    // Whitelisted field-by-field updates; each is a no-op if not set.
    macro_rules! set_if {
        ($field:expr, $col:literal) => {
            if let Some(v) = &$field {
                conn.execute(
                    concat!("UPDATE exchanges SET ", $col, " = ?1 WHERE id = ?2"),
                    params![v, exchange_id],
                )?;
            }
        };
    }
    if let Some(status) = update.status {
        conn.execute(
            "UPDATE exchanges SET status = ?1 WHERE id = ?2",
            params![status.as_str(), exchange_id],
        )?;
    }
    set_if!(update.summary, "summary");
    set_if!(update.summary_model, "summary_model");
    set_if!(update.error, "error");
    set_if!(update.assistant_message, "assistant_message");
    set_if!(update.completed_at, "completed_at");
    set_if!(update.tokens_input, "tokens_input");
    set_if!(update.tokens_output, "tokens_output");
    set_if!(update.spend, "spend");
    set_if!(update.message_count, "message_count");
    set_if!(update.tool_call_count, "tool_call_count");
    Ok(())
}

pub fn complete_exchange(
    conn: &Connection,
    exchange_id: i64,
    summary: Option<&str>,
    assistant_message: Option<&str>,
    metrics: &ExchangeMetrics,
) -> StoreResult<()> {
    conn.execute(
        "UPDATE exchanges SET
            status = 'completed',
            completed_at = ?1,
            summary = COALESCE(?2, summary),
            assistant_message = COALESCE(?3, assistant_message),
            tokens_input = ?4,
            tokens_output = ?5,
            spend = ?6,
            message_count = ?7,
            tool_call_count = ?8
         WHERE id = ?9",
        params![
            now(),
            summary,
            assistant_message,
            metrics.tokens_input,
            metrics.tokens_output,
            metrics.spend,
            metrics.message_count,
            metrics.tool_call_count,
            exchange_id,
        ],
    )?;
    Ok(())
}

/// Written only by the ExchangeSummarizer worker, on a completed exchange.
pub fn set_exchange_summary(conn: &Connection, exchange_id: i64, summary: &str, model: &str) -> StoreResult<()> {
    conn.execute(
        "UPDATE exchanges SET summary = ?1, summary_model = ?2 WHERE id = ?3",
        params![summary, model, exchange_id],
    )?;
    Ok(())
}

/// Written only by the ConversationSummarizer worker, on any conversation.
pub fn set_conversation_summary(conn: &Connection, conv_id: i64, summary: &str, model: &str, cost: f64) -> StoreResult<()> {
    conn.execute(
        "UPDATE conversations SET summary = ?1, summary_model = ?2, summary_cost = ?3 WHERE id = ?4",
        params![summary, model, cost, conv_id],
    )?;
    Ok(())
}

pub fn session_tokens(conn: &Connection, conv_id: i64, since: &str) -> StoreResult<SessionTokens> {
    conn.query_row(
        "SELECT COALESCE(MAX(tokens_input), 0), COALESCE(SUM(tokens_output), 0), COALESCE(SUM(spend), 0.0)
         FROM messages WHERE conversation_id = ?1 AND created_at >= ?2",
        params![conv_id, since],
        |row| {
            let input: i64 = row.get(0)?;
            let output: i64 = row.get(1)?;
            let spend: f64 = row.get(2)?;
            Ok(SessionTokens { input, output, total: input + output, spend })
        },
    )
    .map_err(StoreError::from)
}

const ACTIVE_WORKERS_KEY: &str = "active_workers";

pub fn increment_workers(conn: &Connection) -> StoreResult<i64> {
    let current = get_int_config(conn, ACTIVE_WORKERS_KEY)?.unwrap_or(0);
    let next = current + 1;
    set_config(conn, ACTIVE_WORKERS_KEY, &next.to_string())?;
    Ok(next)
}

pub fn decrement_workers(conn: &Connection) -> StoreResult<i64> {
    let current = get_int_config(conn, ACTIVE_WORKERS_KEY)?.unwrap_or(0);
    let next = (current - 1).max(0);
    set_config(conn, ACTIVE_WORKERS_KEY, &next.to_string())?;
    Ok(next)
}

pub fn workers_idle(conn: &Connection) -> StoreResult<bool> {
    Ok(get_int_config(conn, ACTIVE_WORKERS_KEY)?.unwrap_or(0) <= 0)
}

fn row_to_conversation(row: &rusqlite::Row) -> rusqlite::Result<Conversation> {
    Ok(Conversation {
        id: row.get("id")?,
        created_at: row.get("created_at")?,
        title: row.get("title")?,
        status: ConversationStatus::parse(&row.get::<_, String>("status")?),
        summary: row.get("summary")?,
        summary_model: row.get("summary_model")?,
        summary_cost: row.get("summary_cost")?,
    })
}

pub fn get_unsummarized_conversations(conn: &Connection, exclude_id: i64) -> StoreResult<Vec<Conversation>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM conversations WHERE summary IS NULL AND id != ?1 ORDER BY created_at DESC",
    )?;
    let rows = stmt.query_map(params![exclude_id], row_to_conversation)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub fn get_unsummarized_exchanges(conn: &Connection, exclude_conv_id: i64) -> StoreResult<Vec<Exchange>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM exchanges WHERE summary IS NULL AND status = 'completed' AND conversation_id != ?1 ORDER BY id ASC",
    )?;
    let rows = stmt.query_map(params![exclude_conv_id], row_to_exchange)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub fn get_exchanges_needing_embeddings(conn: &Connection, exclude_conv_id: i64) -> StoreResult<Vec<Exchange>> {
    let mut stmt = conn.prepare(
        "SELECT e.* FROM exchanges e
         WHERE e.summary IS NOT NULL AND e.conversation_id != ?1
           AND NOT EXISTS (SELECT 1 FROM embeddings em WHERE em.kind = 'exchange' AND em.source = CAST(e.id AS TEXT))
         ORDER BY e.id ASC",
    )?;
    let rows = stmt.query_map(params![exclude_conv_id], row_to_exchange)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub fn get_conversations_needing_embeddings(conn: &Connection, exclude_conv_id: i64) -> StoreResult<Vec<Conversation>> {
    let mut stmt = conn.prepare(
        "SELECT c.* FROM conversations c
         WHERE c.summary IS NOT NULL AND c.id != ?1
           AND NOT EXISTS (SELECT 1 FROM embeddings em WHERE em.kind = 'conversation' AND em.source = CAST(c.id AS TEXT))
         ORDER BY c.created_at DESC",
    )?;
    let rows = stmt.query_map(params![exclude_conv_id], row_to_conversation)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

fn row_to_exchange(row: &rusqlite::Row) -> rusqlite::Result<Exchange> {
    Ok(Exchange {
        id: row.get("id")?,
        conversation_id: row.get("conversation_id")?,
        exchange_number: row.get("exchange_number")?,
        started_at: row.get("started_at")?,
        completed_at: row.get("completed_at")?,
        status: ExchangeStatus::parse(&row.get::<_, String>("status")?),
        user_message: row.get("user_message")?,
        assistant_message: row.get("assistant_message")?,
        summary: row.get("summary")?,
        summary_model: row.get("summary_model")?,
        error: row.get("error")?,
        tokens_input: row.get("tokens_input")?,
        tokens_output: row.get("tokens_output")?,
        spend: row.get("spend")?,
        message_count: row.get("message_count")?,
        tool_call_count: row.get("tool_call_count")?,
    })
}

fn encode_embedding(v: &[f32]) -> String {
    serde_json::to_string(v).unwrap_or_default()
}

pub fn upsert_conversation_embedding(conn: &Connection, id: i64, content: &str, embedding: &[f32]) -> StoreResult<()> {
    store_embeddings(conn, "conversation", &[EmbeddingRecord {
        kind: "conversation".to_string(),
        source: id.to_string(),
        content: content.to_string(),
        embedding: embedding.to_vec(),
    }])
}

pub fn upsert_exchange_embedding(conn: &Connection, id: i64, content: &str, embedding: &[f32]) -> StoreResult<()> {
    store_embeddings(conn, "exchange", &[EmbeddingRecord {
        kind: "exchange".to_string(),
        source: id.to_string(),
        content: content.to_string(),
        embedding: embedding.to_vec(),
    }])
}

/// `ON CONFLICT(kind, source) DO NOTHING` — idempotent, see P R2.
pub fn store_embeddings(conn: &Connection, kind: &str, records: &[EmbeddingRecord]) -> StoreResult<()> {
    for r in records {
        conn.execute(
            "INSERT INTO embeddings (kind, source, content, embedding, indexed_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(kind, source) DO NOTHING",
            params![kind, r.source, r.content, encode_embedding(&r.embedding), now()],
        )?;
    }
    Ok(())
}

/// Legacy-artifact scan: any message whose `tool_calls` JSON contains an
/// argument object literally equal to `{"redacted":true}`.
pub fn find_corrupted_messages(conn: &Connection) -> StoreResult<Vec<Message>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM messages WHERE tool_calls IS NOT NULL AND tool_calls LIKE '%\"redacted\":true%' ORDER BY id ASC",
    )?;
    let rows = stmt.query_map([], row_to_message)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

const READONLY_VERBS: &[&str] = &["SELECT", "SHOW", "DESCRIBE", "EXPLAIN", "WITH"];
const READONLY_ROW_CAP: usize = 500;

/// The only SQL surfaced to tools. Rejects anything not starting with one of
/// [`READONLY_VERBS`]; caps results at [`READONLY_ROW_CAP`] rows.
pub fn execute_readonly_query(conn: &Connection, sql: &str) -> StoreResult<Vec<Vec<serde_json::Value>>> {
    let first_token = sql
        .trim_start()
        .split(|c: char| c.is_whitespace() || c == '(')
        .next()
        .unwrap_or("")
        .to_uppercase();
    if !READONLY_VERBS.contains(&first_token.as_str()) {
        return Err(StoreError::InvalidArgument(format!(
            "query must start with one of {:?}, got {:?}",
            READONLY_VERBS, first_token
        )));
    }

    let mut stmt = conn.prepare(sql)?;
    let col_count = stmt.column_count();
    let mut rows = stmt.query([])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        if out.len() >= READONLY_ROW_CAP {
            break;
        }
        let mut values = Vec::with_capacity(col_count);
        for i in 0..col_count {
            let v: rusqlite::types::Value = row.get(i)?;
            values.push(sql_value_to_json(v));
        }
        out.push(values);
    }
    Ok(out)
}

fn sql_value_to_json(v: rusqlite::types::Value) -> serde_json::Value {
    use rusqlite::types::Value;
    match v {
        Value::Null => serde_json::Value::Null,
        Value::Integer(i) => serde_json::Value::from(i),
        Value::Real(f) => serde_json::Number::from_f64(f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::Text(s) => serde_json::Value::String(s),
        Value::Blob(b) => serde_json::Value::String(hex::encode(b)),
    }
}

pub fn get_str_config(conn: &Connection, key: &str) -> StoreResult<Option<String>> {
    conn.query_row(
        "SELECT value FROM app_config WHERE key = ?1",
        params![key],
        |r| r.get(0),
    )
    .optional()
    .map_err(StoreError::from)
}

pub fn get_bool_config(conn: &Connection, key: &str) -> StoreResult<Option<bool>> {
    match get_str_config(conn, key)? {
        None => Ok(None),
        Some(s) => match s.to_ascii_lowercase().as_str() {
            "true" => Ok(Some(true)),
            "false" => Ok(Some(false)),
            other => Err(StoreError::InvalidArgument(format!(
                "config key {key:?} is not a bool: {other:?}"
            ))),
        },
    }
}

pub fn get_int_config(conn: &Connection, key: &str) -> StoreResult<Option<i64>> {
    match get_str_config(conn, key)? {
        None => Ok(None),
        Some(s) => s
            .parse()
            .map(Some)
            .map_err(|_| StoreError::InvalidArgument(format!("config key {key:?} is not an int: {s:?}"))),
    }
}

pub fn get_float_config(conn: &Connection, key: &str) -> StoreResult<Option<f64>> {
    match get_str_config(conn, key)? {
        None => Ok(None),
        Some(s) => s
            .parse()
            .map(Some)
            .map_err(|_| StoreError::InvalidArgument(format!("config key {key:?} is not a float: {s:?}"))),
    }
}

pub fn set_config(conn: &Connection, key: &str, value: &str) -> StoreResult<()> {
    conn.execute(
        "INSERT INTO app_config (key, value, updated_at) VALUES (?1, ?2, CURRENT_TIMESTAMP)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = CURRENT_TIMESTAMP",
        params![key, value],
    )?;
    Ok(())
}

pub fn record_failed_job(conn: &Connection, job_type: &str, ref_id: Option<&str>, payload: Option<&str>, error: &str) -> StoreResult<i64> {
    conn.execute(
        "INSERT INTO failed_jobs (job_type, ref_id, payload, error, retry_count, failed_at)
         VALUES (?1, ?2, ?3, ?4, 0, ?5)",
        params![job_type, ref_id, payload, error, now()],
    )?;
    Ok(conn.last_insert_rowid())
}

fn row_to_failed_job(row: &rusqlite::Row) -> rusqlite::Result<FailedJob> {
    Ok(FailedJob {
        id: row.get("id")?,
        job_type: row.get("job_type")?,
        ref_id: row.get("ref_id")?,
        payload: row.get("payload")?,
        error: row.get("error")?,
        retry_count: row.get("retry_count")?,
        failed_at: row.get("failed_at")?,
    })
}

/// List the most recent failed jobs, newest first.
pub fn list_failed_jobs(conn: &Connection, limit: usize) -> StoreResult<Vec<FailedJob>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM failed_jobs ORDER BY id DESC LIMIT ?1",
    )?;
    let rows = stmt.query_map(params![limit as i64], row_to_failed_job)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// Delete all recorded failed jobs. Returns the number of rows removed.
pub fn clear_failed_jobs(conn: &Connection) -> StoreResult<usize> {
    Ok(conn.execute("DELETE FROM failed_jobs", [])?)
}

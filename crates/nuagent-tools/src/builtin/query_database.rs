// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use nuagent_store::{CallerId, Store};

use crate::policy::ApprovalPolicy;
use crate::tool::{OperationType, OutputCategory, Scope, Tool, ToolCall, ToolOutput};

/// Read-only SQL access to the memory store, for ad-hoc questions the
/// purpose-built query helpers don't cover directly.
pub struct QueryDatabaseTool {
    store: Arc<Store>,
    caller: CallerId,
}

impl QueryDatabaseTool {
    pub fn new(store: Arc<Store>, caller: CallerId) -> Self {
        Self { store, caller }
    }
}

#[async_trait]
impl Tool for QueryDatabaseTool {
    fn name(&self) -> &str { "query_database" }

    fn description(&self) -> &str {
        "Run a read-only SQL query against the conversation memory database.\n\
         Only SELECT/PRAGMA/EXPLAIN statements are accepted; anything that could \
         mutate a row is rejected before it runs.\n\
         Use this to inspect conversations, exchanges, messages and embeddings \
         directly when the higher-level tools don't expose what you need."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "sql": {
                    "type": "string",
                    "description": "A single read-only SQL statement (SELECT/PRAGMA/EXPLAIN)"
                }
            },
            "required": ["sql"],
            "additionalProperties": false
        })
    }

    fn default_policy(&self) -> ApprovalPolicy { ApprovalPolicy::Auto }
    fn output_category(&self) -> OutputCategory { OutputCategory::MatchList }
    fn operation_type(&self) -> OperationType { OperationType::Read }
    fn scope(&self) -> Scope { Scope::Unconfined }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let sql = match call.args.get("sql").and_then(|v| v.as_str()) {
            Some(s) => s.to_string(),
            None => return ToolOutput::err(&call.id, "missing required parameter 'sql'"),
        };

        debug!(sql = %sql, "query_database tool");

        let result = self
            .store
            .with_connection(self.caller, move |conn| {
                nuagent_store::execute_readonly_query(conn, &sql)
            })
            .await;

        match result {
            Ok(rows) if rows.is_empty() => ToolOutput::ok(&call.id, "(no rows)"),
            Ok(rows) => {
                let text = rows
                    .iter()
                    .map(|row| {
                        row.iter()
                            .map(|v| v.to_string())
                            .collect::<Vec<_>>()
                            .join(" | ")
                    })
                    .collect::<Vec<_>>()
                    .join("\n");
                ToolOutput::ok(&call.id, text)
            }
            Err(e) => ToolOutput::err(&call.id, format!("query error: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::tool::ToolCall;

    fn call(args: serde_json::Value) -> ToolCall {
        ToolCall { id: "q1".into(), name: "query_database".into(), args }
    }

    fn tool() -> QueryDatabaseTool {
        let store = Arc::new(Store::open_in_memory().unwrap());
        QueryDatabaseTool::new(store, CallerId(1))
    }

    #[tokio::test]
    async fn runs_select() {
        let t = tool();
        let out = t.execute(&call(json!({"sql": "SELECT 1, 'ok'"}))).await;
        assert!(!out.is_error, "{}", out.content);
        assert!(out.content.contains("ok"));
    }

    #[tokio::test]
    async fn rejects_write_statements() {
        let t = tool();
        let out = t
            .execute(&call(json!({"sql": "DELETE FROM messages"})))
            .await;
        assert!(out.is_error);
    }

    #[tokio::test]
    async fn missing_sql_is_error() {
        let t = tool();
        let out = t.execute(&call(json!({}))).await;
        assert!(out.is_error);
        assert!(out.content.contains("missing required parameter 'sql'"));
    }

    #[test]
    fn classification_is_read_unconfined() {
        let t = tool();
        assert_eq!(t.operation_type(), OperationType::Read);
        assert_eq!(t.scope(), Scope::Unconfined);
    }
}

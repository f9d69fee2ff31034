//! Transactional conversation store: connection pooling, schema migration,
//! and the CRUD surface the orchestrator and workers use.

mod error;
mod ops;
mod types;

pub use error::{StoreError, StoreResult};
pub use ops::execute_readonly_query;
pub use types::*;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use tracing::debug;

const SCHEMA: &str = include_str!("schema.sql");

/// Identifies the caller that wants its own pooled connection — one per
/// concurrent thread/task. Never share a `Connection` across concurrent
/// writers; callers should derive a stable id from their task identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallerId(pub u64);

/// The store gateway. Holds a pool of per-caller SQLite connections keyed by
/// [`CallerId`], created on demand.
pub struct Store {
    db_path: PathBuf,
    conns: Mutex<HashMap<u64, Arc<Mutex<Connection>>>>,
}

impl Store {
    /// Open (creating if missing) the database at `db_path` and run migrations.
    pub fn open(db_path: impl Into<PathBuf>) -> StoreResult<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| StoreError::Other(e.to_string()))?;
            }
        }
        let conn = Connection::open(&db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", true)?;
        conn.execute_batch(SCHEMA)?;
        debug!(path = %db_path.display(), "store migrated");
        Ok(Self {
            db_path,
            conns: Mutex::new(HashMap::new()),
        })
    }

    /// In-memory store — for tests.
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::open(":memory:")
    }

    fn connection_for(&self, caller: CallerId) -> StoreResult<Arc<Mutex<Connection>>> {
        let mut conns = self.conns.lock().expect("connection pool poisoned");
        if let Some(existing) = conns.get(&caller.0) {
            return Ok(Arc::clone(existing));
        }
        let conn = Connection::open(&self.db_path)?;
        conn.pragma_update(None, "foreign_keys", true)?;
        let arc = Arc::new(Mutex::new(conn));
        conns.insert(caller.0, Arc::clone(&arc));
        Ok(arc)
    }

    /// Run `f` inside a transaction scoped to `caller`'s connection. Commits
    /// on `Ok`, rolls back on `Err`. One open transaction per connection —
    /// not nest-free-reentrant; callers must not call `transaction` again
    /// from within `f` on the same caller.
    pub async fn transaction<F, R>(&self, caller: CallerId, f: F) -> StoreResult<R>
    where
        F: FnOnce(&rusqlite::Transaction) -> StoreResult<R> + Send + 'static,
        R: Send + 'static,
    {
        let conn_arc = self.connection_for(caller)?;
        tokio::task::spawn_blocking(move || {
            let mut conn = conn_arc.lock().expect("connection poisoned");
            let tx = conn.transaction()?;
            match f(&tx) {
                Ok(r) => {
                    tx.commit()?;
                    Ok(r)
                }
                Err(e) => {
                    let _ = tx.rollback();
                    Err(e)
                }
            }
        })
        .await
        .map_err(|e| StoreError::Other(format!("transaction task panicked: {e}")))?
    }

    /// Run `f` against `caller`'s connection outside of any transaction
    /// (used for reads and worker writes that don't need atomicity with a
    /// concurrent orchestrator transaction).
    pub async fn with_connection<F, R>(&self, caller: CallerId, f: F) -> StoreResult<R>
    where
        F: FnOnce(&Connection) -> StoreResult<R> + Send + 'static,
        R: Send + 'static,
    {
        let conn_arc = self.connection_for(caller)?;
        tokio::task::spawn_blocking(move || {
            let conn = conn_arc.lock().expect("connection poisoned");
            f(&conn)
        })
        .await
        .map_err(|e| StoreError::Other(format!("store task panicked: {e}")))?
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }
}

/// Re-exported free functions operating on a live connection or transaction
/// (both implement `Deref<Target = Connection>`), for use inside
/// [`Store::transaction`]/[`Store::with_connection`] closures.
pub mod query {
    pub use crate::ops::*;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caller() -> CallerId {
        CallerId(1)
    }

    #[tokio::test]
    async fn create_conversation_and_exchange() {
        let store = Store::open_in_memory().unwrap();
        let conv_id = store
            .with_connection(caller(), |conn| query::create_conversation(conn))
            .await
            .unwrap();
        let exchange_id = store
            .with_connection(caller(), move |conn| query::create_exchange(conn, conv_id, "hello"))
            .await
            .unwrap();
        assert!(exchange_id > 0);
    }

    #[tokio::test]
    async fn exchange_numbers_are_gap_free_per_conversation() {
        let store = Store::open_in_memory().unwrap();
        let conv_id = store
            .with_connection(caller(), |conn| query::create_conversation(conn))
            .await
            .unwrap();
        for n in 1..=3i64 {
            let exchange_id = store
                .with_connection(caller(), move |conn| query::create_exchange(conn, conv_id, "x"))
                .await
                .unwrap();
            let number: i64 = store
                .with_connection(caller(), move |conn| {
                    conn.query_row(
                        "SELECT exchange_number FROM exchanges WHERE id = ?1",
                        [exchange_id],
                        |r| r.get(0),
                    )
                    .map_err(StoreError::from)
                })
                .await
                .unwrap();
            assert_eq!(number, n);
        }
    }

    #[tokio::test]
    async fn rollback_on_error_leaves_no_trace() {
        let store = Store::open_in_memory().unwrap();
        let result: StoreResult<()> = store
            .transaction(caller(), |tx| {
                let conv_id = query::create_conversation(tx)?;
                query::create_exchange(tx, conv_id, "doomed")?;
                Err(StoreError::Other("simulated failure".to_string()))
            })
            .await;
        assert!(result.is_err());

        let count: i64 = store
            .with_connection(caller(), |conn| {
                conn.query_row("SELECT COUNT(*) FROM exchanges", [], |r| r.get(0))
                    .map_err(StoreError::from)
            })
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn worker_counter_clamps_at_zero() {
        let store = Store::open_in_memory().unwrap();
        let v = store
            .with_connection(caller(), |conn| query::decrement_workers(conn))
            .await
            .unwrap();
        assert_eq!(v, 0);
        store
            .with_connection(caller(), |conn| query::increment_workers(conn))
            .await
            .unwrap();
        let v = store
            .with_connection(caller(), |conn| query::decrement_workers(conn))
            .await
            .unwrap();
        assert_eq!(v, 0);
    }

    #[tokio::test]
    async fn embedding_upsert_is_idempotent() {
        let store = Store::open_in_memory().unwrap();
        for _ in 0..2 {
            store
                .with_connection(caller(), |conn| {
                    query::store_embeddings(
                        conn,
                        "exchange",
                        &[EmbeddingRecord {
                            kind: "exchange".into(),
                            source: "42".into(),
                            content: "summary text".into(),
                            embedding: vec![0.1, 0.2, 0.3],
                        }],
                    )
                })
                .await
                .unwrap();
        }
        let count: i64 = store
            .with_connection(caller(), |conn| {
                conn.query_row(
                    "SELECT COUNT(*) FROM embeddings WHERE kind='exchange' AND source='42'",
                    [],
                    |r| r.get(0),
                )
                .map_err(StoreError::from)
            })
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn readonly_query_rejects_mutations() {
        let store = Store::open_in_memory().unwrap();
        let result = store
            .with_connection(caller(), |conn| {
                query::execute_readonly_query(conn, "DELETE FROM messages")
            })
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn readonly_query_allows_select() {
        let store = Store::open_in_memory().unwrap();
        let rows = store
            .with_connection(caller(), |conn| {
                query::execute_readonly_query(conn, "SELECT 1, 'ok'")
            })
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0][1], serde_json::Value::String("ok".to_string()));
    }

    #[tokio::test]
    async fn failed_jobs_recorded_listed_and_cleared() {
        let store = Store::open_in_memory().unwrap();
        store
            .with_connection(caller(), |conn| {
                query::record_failed_job(conn, "embedding_generator", Some("42"), None, "boom")
            })
            .await
            .unwrap();
        store
            .with_connection(caller(), |conn| {
                query::record_failed_job(conn, "exchange_summarizer", None, Some("{}"), "timeout")
            })
            .await
            .unwrap();

        let jobs = store
            .with_connection(caller(), |conn| query::list_failed_jobs(conn, 10))
            .await
            .unwrap();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].job_type, "exchange_summarizer"); // newest first

        let cleared = store
            .with_connection(caller(), query::clear_failed_jobs)
            .await
            .unwrap();
        assert_eq!(cleared, 2);

        let jobs = store
            .with_connection(caller(), |conn| query::list_failed_jobs(conn, 10))
            .await
            .unwrap();
        assert!(jobs.is_empty());
    }
}

//! The analytical store: one in-memory DuckDB connection per engine.
//!
//! The connection is not usable from several threads at once, so every
//! statement runs under [`Store::lock`]. Callers hold the guard for one
//! statement or one batch, never across file I/O.

use crate::error::StoreError;
use crate::executor::ResultEnvelope;
use crate::registry::CancelToken;
use crate::value::value_to_json;
use duckdb::types::Value;
use duckdb::Connection;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

const INTERRUPT_POLL: Duration = Duration::from_millis(20);

#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(|e| StoreError::Open(e.to_string()))?;
        tracing::debug!("in-memory analytical store opened");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// SQL text helpers
// ---------------------------------------------------------------------------

pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub fn quote_literal(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

/// Unique name for an internal staging relation.
pub fn staging_name(prefix: &str) -> String {
    format!("__datawise_{}_{}", prefix, uuid::Uuid::new_v4().simple())
}

// ---------------------------------------------------------------------------
// Queries shared by the executor and the format adapters
// ---------------------------------------------------------------------------

pub fn table_exists(conn: &Connection, schema: Option<&str>, name: &str) -> duckdb::Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT count(*) FROM information_schema.tables \
         WHERE lower(table_name) = lower(?) AND lower(table_schema) = lower(?)",
        [name, schema.unwrap_or("main")],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

pub fn drop_table_if_exists(conn: &Connection, name: &str) -> duckdb::Result<()> {
    conn.execute_batch(&format!("DROP TABLE IF EXISTS {}", quote_ident(name)))
}

/// Run a long statement that `cancel` can stop midway. A cancelled statement
/// fails with the store's interrupt error; callers check the token to tell the
/// two apart.
pub fn execute_interruptible(
    conn: &Connection,
    sql: &str,
    cancel: &CancelToken,
) -> duckdb::Result<()> {
    let handle = conn.interrupt_handle();
    let done = AtomicBool::new(false);
    std::thread::scope(|scope| {
        scope.spawn(|| {
            while !done.load(Ordering::Acquire) {
                if cancel.is_cancelled() {
                    handle.interrupt();
                    return;
                }
                std::thread::sleep(INTERRUPT_POLL);
            }
        });
        let result = conn.execute_batch(sql);
        done.store(true, Ordering::Release);
        result
    })
}

/// Run `sql`, counting every row and keeping the first `preview_rows` as JSON objects.
pub fn query_envelope(
    conn: &Connection,
    sql: &str,
    preview_rows: usize,
) -> duckdb::Result<ResultEnvelope> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query([])?;
    let columns: Vec<String> = rows.as_ref().map(|s| s.column_names()).unwrap_or_default();

    let mut row_count = 0u64;
    let mut preview = Vec::new();
    while let Some(row) = rows.next()? {
        if preview.len() < preview_rows {
            let mut obj = serde_json::Map::with_capacity(columns.len());
            for (idx, name) in columns.iter().enumerate() {
                let value: Value = row.get(idx)?;
                obj.insert(name.clone(), value_to_json(&value));
            }
            preview.push(serde_json::Value::Object(obj));
        }
        row_count += 1;
    }

    Ok(ResultEnvelope {
        row_count,
        column_count: columns.len() as u64,
        columns,
        preview,
    })
}

/// Counts and a bounded preview of an existing relation (quoted name or subquery).
pub fn relation_summary(
    conn: &Connection,
    relation: &str,
    preview_rows: usize,
) -> duckdb::Result<ResultEnvelope> {
    let row_count: i64 =
        conn.query_row(&format!("SELECT count(*) FROM {}", relation), [], |row| row.get(0))?;
    let mut envelope = query_envelope(
        conn,
        &format!("SELECT * FROM {} LIMIT {}", relation, preview_rows),
        preview_rows,
    )?;
    envelope.row_count = row_count.max(0) as u64;
    Ok(envelope)
}

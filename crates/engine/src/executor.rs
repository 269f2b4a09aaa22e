//! SQL executor – runs statements against the store and shapes the result.

use crate::error::ExecError;
use crate::registry::CancelToken;
use crate::store::{query_envelope, Store};
use serde::{Deserialize, Serialize};

/// Summary of a result set: full counts plus a bounded preview.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultEnvelope {
    pub row_count: u64,
    pub column_count: u64,
    pub columns: Vec<String>,
    pub preview: Vec<serde_json::Value>,
}

pub struct Executor {
    store: Store,
    preview_rows: usize,
}

impl Executor {
    pub fn new(store: Store, preview_rows: usize) -> Self {
        Self {
            store,
            preview_rows,
        }
    }

    /// Execute one statement. Cancellation is observed before and after the
    /// statement; a statement that has started always runs to completion.
    pub fn execute(&self, sql: &str, cancel: &CancelToken) -> Result<ResultEnvelope, ExecError> {
        if cancel.is_cancelled() {
            return Err(ExecError::Cancelled);
        }

        let envelope = {
            let conn = self.store.lock()?;
            query_envelope(&conn, sql, self.preview_rows)
                .map_err(|e| ExecError::SyntaxOrSemantic(e.to_string()))?
        };

        if cancel.is_cancelled() {
            return Err(ExecError::Cancelled);
        }
        tracing::debug!(
            rows = envelope.row_count,
            columns = envelope.column_count,
            "statement executed"
        );
        Ok(envelope)
    }
}

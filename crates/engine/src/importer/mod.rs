//! File import: stream a source file into a staging table, then swap it in
//! under the target name in one transaction.

pub mod csv;
pub mod json;
pub mod parquet;
pub mod schema;

use crate::config::EngineConfig;
use crate::error::ImportError;
use crate::progress::ProgressReporter;
use crate::protocol::FileFormat;
use crate::registry::CancelToken;
use crate::store::{
    drop_table_if_exists, quote_ident, relation_summary, staging_name, table_exists, Store,
};
use duckdb::types::Value;
use schema::{alter_table_sql, create_table_sql, ColumnSpec};
use std::path::Path;

/// A row-oriented reader the importer drains chunk by chunk.
pub(crate) trait RecordSource {
    /// Current schema. Reading a chunk may widen column types or append
    /// columns, never reorder or narrow them.
    fn columns(&self) -> &[ColumnSpec];
    /// Up to `max_rows` rows typed by the schema as it stands after the read;
    /// empty once the source is exhausted.
    fn next_chunk(&mut self, max_rows: usize) -> Result<Vec<Vec<Value>>, ImportError>;
    fn bytes_read(&self) -> u64;
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImportSummary {
    pub table_name: String,
    pub row_count: u64,
    pub column_count: u64,
    pub preview: Vec<serde_json::Value>,
}

pub struct Importer {
    store: Store,
    config: EngineConfig,
}

impl Importer {
    pub fn new(store: Store, config: EngineConfig) -> Self {
        Self { store, config }
    }

    pub fn import(
        &self,
        path: &Path,
        format: FileFormat,
        table_name: Option<&str>,
        overwrite: bool,
        cancel: &CancelToken,
        progress: &mut ProgressReporter,
    ) -> Result<ImportSummary, ImportError> {
        let table = resolve_table_name(path, table_name)?;
        let size = std::fs::metadata(path)?.len();
        progress.set_total_bytes(size);

        if !overwrite && table_exists(&*self.store.lock()?, None, &table)? {
            return Err(ImportError::TableExists(table));
        }

        let staging = staging_name("import");
        tracing::info!(path = %path.display(), %format, table = %table, bytes = size, "import started");

        let staged = self
            .stage(path, format, &staging, cancel, progress)
            .and_then(|rows| {
                if cancel.is_cancelled() {
                    return Err(ImportError::Cancelled);
                }
                progress.complete();
                self.finalize(&staging, &table, overwrite)?;
                Ok(rows)
            });

        let rows = match staged {
            Ok(rows) => rows,
            Err(e) => {
                self.discard(&staging);
                return Err(e);
            }
        };

        let envelope = relation_summary(
            &*self.store.lock()?,
            &quote_ident(&table),
            self.config.preview_rows,
        )?;
        tracing::info!(table = %table, rows, "import finished");
        Ok(ImportSummary {
            table_name: table,
            row_count: envelope.row_count,
            column_count: envelope.column_count,
            preview: envelope.preview,
        })
    }

    fn stage(
        &self,
        path: &Path,
        format: FileFormat,
        staging: &str,
        cancel: &CancelToken,
        progress: &mut ProgressReporter,
    ) -> Result<u64, ImportError> {
        match format {
            FileFormat::Csv => {
                let mut source = csv::CsvSource::open(
                    path,
                    self.config.sniff_lines,
                    self.config.infer_sample_rows,
                )?;
                self.stage_records(&mut source, staging, cancel, progress)
            }
            FileFormat::Json => {
                let mut source = json::JsonSource::open(path, self.config.infer_sample_rows)?;
                self.stage_records(&mut source, staging, cancel, progress)
            }
            FileFormat::Parquet => parquet::stage(&self.store, path, staging, cancel),
        }
    }

    /// Create the staging table from the inferred schema and append chunk by
    /// chunk, altering the table first whenever a chunk widened the schema.
    /// File reads happen outside the store lock.
    fn stage_records(
        &self,
        source: &mut dyn RecordSource,
        staging: &str,
        cancel: &CancelToken,
        progress: &mut ProgressReporter,
    ) -> Result<u64, ImportError> {
        let mut staged = source.columns().to_vec();
        self.store
            .lock()?
            .execute_batch(&create_table_sql(staging, &staged))?;

        let mut total = 0u64;
        loop {
            if cancel.is_cancelled() {
                return Err(ImportError::Cancelled);
            }
            let rows = source.next_chunk(self.config.chunk_rows)?;
            if rows.is_empty() {
                break;
            }
            {
                let conn = self.store.lock()?;
                let changes = alter_table_sql(staging, &staged, source.columns());
                if !changes.is_empty() {
                    tracing::debug!(statements = changes.len(), "staging schema altered");
                    conn.execute_batch(&changes.join(";\n"))?;
                    staged = source.columns().to_vec();
                }
                let mut appender = conn.appender(staging)?;
                for row in &rows {
                    appender.append_row(duckdb::appender_params_from_iter(row.iter()))?;
                }
                appender.flush()?;
            }
            total += rows.len() as u64;
            tracing::trace!(rows = total, "chunk appended");
            progress.report(source.bytes_read());
        }
        Ok(total)
    }

    /// Swap the staging table in under `table`. Runs in one transaction, so a
    /// failure leaves any previous table untouched.
    fn finalize(&self, staging: &str, table: &str, overwrite: bool) -> Result<(), ImportError> {
        let mut conn = self.store.lock()?;
        let tx = conn.transaction()?;
        if table_exists(&tx, None, table)? {
            if !overwrite {
                return Err(ImportError::TableExists(table.to_string()));
            }
            tx.execute_batch(&format!("DROP TABLE {}", quote_ident(table)))?;
        }
        tx.execute_batch(&format!(
            "ALTER TABLE {} RENAME TO {}",
            quote_ident(staging),
            quote_ident(table)
        ))?;
        tx.commit()?;
        Ok(())
    }

    fn discard(&self, staging: &str) {
        let result = self
            .store
            .lock()
            .map_err(ImportError::from)
            .and_then(|conn| drop_table_if_exists(&conn, staging).map_err(ImportError::from));
        if let Err(e) = result {
            tracing::warn!(staging, error = %e, "failed to drop staging table");
        }
    }
}

/// Explicit name, or the file's base name without its extension.
pub fn resolve_table_name(path: &Path, explicit: Option<&str>) -> Result<String, ImportError> {
    if let Some(name) = explicit.map(str::trim).filter(|n| !n.is_empty()) {
        return Ok(name.to_string());
    }
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            ImportError::Parse(format!("cannot derive a table name from {}", path.display()))
        })
}

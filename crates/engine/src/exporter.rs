//! Export a table or query result to a file.
//!
//! The source is materialised once into a temp table so the written file is a
//! consistent snapshot. The store renders every value itself through `COPY`:
//! text formats are copied out in `chunk_rows` batches and appended to one
//! file, Parquet in a single statement. Output goes to a hidden temp file
//! beside the destination and is renamed into place only after every row has
//! been written.

use crate::config::EngineConfig;
use crate::error::ExportError;
use crate::progress::ProgressReporter;
use crate::protocol::FileFormat;
use crate::registry::CancelToken;
use crate::store::{
    drop_table_if_exists, execute_interruptible, quote_ident, quote_literal, relation_summary,
    staging_name, table_exists, Store,
};
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq)]
pub struct ExportSummary {
    pub path: String,
    pub row_count: u64,
    pub column_count: u64,
    pub preview: Vec<serde_json::Value>,
}

/// What an export `source` string refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    Table { schema: Option<String>, name: String },
    Query(String),
}

impl Source {
    /// A lone identifier, optionally schema-qualified or double-quoted, names a
    /// table. Anything else is run as a query.
    pub fn classify(source: &str) -> Source {
        let trimmed = source.trim();
        match parse_qualified_ident(trimmed) {
            Some(mut parts) if parts.len() == 1 => Source::Table {
                schema: None,
                name: parts.remove(0),
            },
            Some(mut parts) if parts.len() == 2 => {
                let name = parts.remove(1);
                Source::Table {
                    schema: Some(parts.remove(0)),
                    name,
                }
            }
            _ => Source::Query(trimmed.trim_end_matches(';').trim_end().to_string()),
        }
    }
}

fn parse_qualified_ident(text: &str) -> Option<Vec<String>> {
    let mut parts = Vec::new();
    let mut chars = text.chars().peekable();
    loop {
        let mut part = String::new();
        match chars.peek().copied() {
            Some('"') => {
                chars.next();
                loop {
                    match chars.next()? {
                        '"' if chars.peek() == Some(&'"') => {
                            chars.next();
                            part.push('"');
                        }
                        '"' => break,
                        c => part.push(c),
                    }
                }
                if part.is_empty() {
                    return None;
                }
            }
            Some(c) if c.is_alphabetic() || c == '_' => {
                while let Some(&c) = chars.peek() {
                    if c.is_alphanumeric() || c == '_' || c == '$' {
                        part.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
            }
            _ => return None,
        }
        parts.push(part);
        match chars.next() {
            None => return Some(parts),
            Some('.') => continue,
            Some(_) => return None,
        }
    }
}

/// Counts bytes handed to the underlying file.
struct CountingWriter<W> {
    inner: W,
    count: u64,
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.count += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// `COPY` options for `format`. Only the `first` CSV chunk carries the header.
fn copy_options(format: FileFormat, first: bool) -> String {
    match format {
        FileFormat::Csv => format!("FORMAT CSV, HEADER {}", first),
        FileFormat::Json => "FORMAT JSON".to_string(),
        FileFormat::Parquet => "FORMAT PARQUET".to_string(),
    }
}

pub struct Exporter {
    store: Store,
    config: EngineConfig,
}

impl Exporter {
    pub fn new(store: Store, config: EngineConfig) -> Self {
        Self { store, config }
    }

    pub fn export(
        &self,
        source: &str,
        path: &Path,
        format: FileFormat,
        cancel: &CancelToken,
        progress: &mut ProgressReporter,
    ) -> Result<ExportSummary, ExportError> {
        if cancel.is_cancelled() {
            return Err(ExportError::Cancelled);
        }
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            if !dir.is_dir() {
                return Err(ExportError::Io(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("directory {} does not exist", dir.display()),
                )));
            }
        }
        let select = self.resolve(source)?;
        let snapshot = staging_name("export");
        tracing::info!(path = %path.display(), %format, "export started");

        let materialised = execute_interruptible(
            &*self.store.lock()?,
            &format!("CREATE TEMP TABLE {} AS {}", quote_ident(&snapshot), select),
            cancel,
        );
        match materialised {
            Err(_) if cancel.is_cancelled() => return Err(ExportError::Cancelled),
            Err(e) => return Err(e.into()),
            Ok(()) => {}
        }

        let result = self.write_snapshot(&snapshot, path, format, cancel, progress);

        let dropped = self
            .store
            .lock()
            .map_err(ExportError::from)
            .and_then(|conn| drop_table_if_exists(&conn, &snapshot).map_err(ExportError::from));
        if let Err(e) = dropped {
            tracing::warn!(snapshot = %snapshot, error = %e, "failed to drop export snapshot");
        }

        let summary = result?;
        tracing::info!(path = %summary.path, rows = summary.row_count, "export finished");
        Ok(summary)
    }

    /// The `SELECT` text that produces the rows of `source`.
    fn resolve(&self, source: &str) -> Result<String, ExportError> {
        match Source::classify(source) {
            Source::Table { schema, name } => {
                let exists = table_exists(&*self.store.lock()?, schema.as_deref(), &name)?;
                if !exists {
                    return Err(ExportError::SourceNotFound(source.trim().to_string()));
                }
                let relation = match schema {
                    Some(schema) => format!("{}.{}", quote_ident(&schema), quote_ident(&name)),
                    None => quote_ident(&name),
                };
                Ok(format!("SELECT * FROM {}", relation))
            }
            Source::Query(sql) => Ok(sql),
        }
    }

    fn write_snapshot(
        &self,
        snapshot: &str,
        path: &Path,
        format: FileFormat,
        cancel: &CancelToken,
        progress: &mut ProgressReporter,
    ) -> Result<ExportSummary, ExportError> {
        let envelope = relation_summary(
            &*self.store.lock()?,
            &quote_ident(snapshot),
            self.config.preview_rows,
        )?;
        let tmp_path = temp_path_for(path);

        let written = match format {
            FileFormat::Parquet => self.copy_parquet(snapshot, &tmp_path, cancel),
            _ => self.copy_chunks(
                snapshot,
                &tmp_path,
                format,
                envelope.row_count,
                cancel,
                progress,
            ),
        }
        .and_then(|bytes| {
            if cancel.is_cancelled() {
                return Err(ExportError::Cancelled);
            }
            std::fs::rename(&tmp_path, path)?;
            Ok(bytes)
        });

        let bytes = match written {
            Ok(bytes) => bytes,
            Err(e) => {
                if let Err(rm) = std::fs::remove_file(&tmp_path) {
                    if rm.kind() != io::ErrorKind::NotFound {
                        tracing::warn!(path = %tmp_path.display(), error = %rm, "failed to remove temp output");
                    }
                }
                return Err(e);
            }
        };
        progress.set_total_bytes(bytes);
        progress.complete();

        Ok(ExportSummary {
            path: path.to_string_lossy().into_owned(),
            row_count: envelope.row_count,
            column_count: envelope.column_count,
            preview: envelope.preview,
        })
    }

    fn copy_chunks(
        &self,
        snapshot: &str,
        tmp_path: &Path,
        format: FileFormat,
        total_rows: u64,
        cancel: &CancelToken,
        progress: &mut ProgressReporter,
    ) -> Result<u64, ExportError> {
        let mut out = CountingWriter {
            inner: File::create(tmp_path)?,
            count: 0,
        };
        let part = temp_path_for(tmp_path);
        let result = self.append_chunks(snapshot, &part, &mut out, format, total_rows, cancel, progress);
        if let Err(rm) = std::fs::remove_file(&part) {
            if rm.kind() != io::ErrorKind::NotFound {
                tracing::warn!(path = %part.display(), error = %rm, "failed to remove export chunk");
            }
        }
        result
    }

    /// Copy rows `[offset, offset + chunk_rows)` to `part` and append it to
    /// `out`, until every row is written. Runs once even for an empty snapshot
    /// so a CSV still gets its header.
    #[allow(clippy::too_many_arguments)]
    fn append_chunks(
        &self,
        snapshot: &str,
        part: &Path,
        out: &mut CountingWriter<File>,
        format: FileFormat,
        total_rows: u64,
        cancel: &CancelToken,
        progress: &mut ProgressReporter,
    ) -> Result<u64, ExportError> {
        let step = self.config.chunk_rows.max(1) as u64;
        let mut offset = 0u64;
        loop {
            if cancel.is_cancelled() {
                return Err(ExportError::Cancelled);
            }
            let end = (offset + step).min(total_rows);
            self.store.lock()?.execute_batch(&format!(
                "COPY (SELECT * FROM {} WHERE rowid >= {} AND rowid < {} ORDER BY rowid) TO {} ({})",
                quote_ident(snapshot),
                offset,
                end,
                quote_literal(&part.to_string_lossy()),
                copy_options(format, offset == 0)
            ))?;
            io::copy(&mut File::open(part)?, out)?;
            out.flush()?;
            offset = end;
            if offset >= total_rows {
                return Ok(out.count);
            }

            // The final size is unknown until the last row; extrapolate from the rate so far.
            progress.set_total_bytes((out.count as u128 * total_rows as u128 / offset as u128) as u64);
            progress.report(out.count);
        }
    }

    fn copy_parquet(
        &self,
        snapshot: &str,
        tmp_path: &Path,
        cancel: &CancelToken,
    ) -> Result<u64, ExportError> {
        if cancel.is_cancelled() {
            return Err(ExportError::Cancelled);
        }
        let copied = execute_interruptible(
            &*self.store.lock()?,
            &format!(
                "COPY {} TO {} ({})",
                quote_ident(snapshot),
                quote_literal(&tmp_path.to_string_lossy()),
                copy_options(FileFormat::Parquet, true)
            ),
            cancel,
        );
        match copied {
            Err(_) if cancel.is_cancelled() => Err(ExportError::Cancelled),
            Err(e) => Err(e.into()),
            Ok(()) => Ok(std::fs::metadata(tmp_path)?.len()),
        }
    }
}

/// `.<file>.<uuid>.tmp` in the destination's directory, so the final rename
/// stays on one filesystem.
fn temp_path_for(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "export".to_string());
    let tmp = format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4().simple());
    match path.parent() {
        Some(dir) => dir.join(tmp),
        None => PathBuf::from(tmp),
    }
}

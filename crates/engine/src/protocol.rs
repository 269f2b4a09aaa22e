//! Wire contract between front-ends and the engine.
//!
//! Everything here is plain data. Evolution is add-only: new variants and
//! optional fields may appear, existing ones are never renamed or removed.

use serde::{Deserialize, Serialize};
use std::path::Path;

// ---------------------------------------------------------------------------
// Commands – front-end → engine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// Caller-chosen id, unique among in-flight tasks.
    pub task_id: u64,
    pub payload: CommandPayload,
}

impl Command {
    pub fn new(task_id: u64, payload: CommandPayload) -> Self {
        Self { task_id, payload }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CommandPayload {
    ExecuteSql {
        sql: String,
    },
    ImportFile {
        path: String,
        format: FileFormat,
        #[serde(default)]
        table_name: Option<String>,
        #[serde(default)]
        overwrite: bool,
    },
    ExportFile {
        /// Table name or SQL query.
        source: String,
        path: String,
        format: FileFormat,
    },
    Cancel {
        task_id: u64,
    },
}

impl CommandPayload {
    /// Short name used in logs and reports.
    pub fn name(&self) -> &'static str {
        match self {
            CommandPayload::ExecuteSql { .. } => "execute_sql",
            CommandPayload::ImportFile { .. } => "import_file",
            CommandPayload::ExportFile { .. } => "export_file",
            CommandPayload::Cancel { .. } => "cancel",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileFormat {
    /// Delimited text; the delimiter is sniffed on import.
    #[serde(alias = "delimited-text")]
    Csv,
    /// Columnar binary, read and written natively by the store.
    #[serde(alias = "columnar-binary")]
    Parquet,
    /// One JSON object per line, or a single top-level array of objects.
    #[serde(alias = "line-delimited-structured")]
    Json,
}

impl FileFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "csv" | "tsv" | "txt" => Some(FileFormat::Csv),
            "parquet" | "pq" => Some(FileFormat::Parquet),
            "json" | "jsonl" | "ndjson" => Some(FileFormat::Json),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }

    pub fn extension(&self) -> &'static str {
        match self {
            FileFormat::Csv => "csv",
            FileFormat::Parquet => "parquet",
            FileFormat::Json => "json",
        }
    }
}

impl std::fmt::Display for FileFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

// ---------------------------------------------------------------------------
// Events – engine → every subscriber
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub task_id: u64,
    pub kind: EventKind,
}

impl Event {
    pub fn new(task_id: u64, kind: EventKind) -> Self {
        Self { task_id, kind }
    }

    pub fn is_terminal(&self) -> bool {
        self.kind.is_terminal()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    Started,
    Progress {
        /// 0..=100
        percent: u8,
        bytes_processed: u64,
        total_bytes: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        eta_seconds: Option<u64>,
    },
    Finished {
        row_count: u64,
        column_count: u64,
        /// At most `preview_rows` row objects, independent of the full result size.
        preview: Vec<serde_json::Value>,
        /// Table created by an import.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        table_name: Option<String>,
        /// File written by an export.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<String>,
    },
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<ErrorCode>,
    },
    /// Any variant this build does not know about.
    #[serde(other)]
    Unknown,
}

impl EventKind {
    pub fn is_terminal(&self) -> bool {
        matches!(self, EventKind::Finished { .. } | EventKind::Error { .. })
    }

    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        EventKind::Error {
            message: message.into(),
            code: Some(code),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidInput,
    DuplicateTask,
    TaskNotFound,
    SqlError,
    TableExists,
    UnsupportedFormat,
    ParseError,
    SourceNotFound,
    IoError,
    Cancelled,
    InternalError,
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(String::from))
            .unwrap_or_else(|| format!("{:?}", self));
        f.write_str(&s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_file_format_from_extension() {
        assert_eq!(FileFormat::from_extension("csv"), Some(FileFormat::Csv));
        assert_eq!(FileFormat::from_extension("CSV"), Some(FileFormat::Csv));
        assert_eq!(FileFormat::from_extension("pq"), Some(FileFormat::Parquet));
        assert_eq!(FileFormat::from_extension("ndjson"), Some(FileFormat::Json));
        assert_eq!(FileFormat::from_extension("xlsx"), None);
        assert_eq!(
            FileFormat::from_path(Path::new("/tmp/sales.parquet")),
            Some(FileFormat::Parquet)
        );
    }

    #[test]
    fn test_command_wire_shape() {
        let cmd: Command = serde_json::from_value(json!({
            "task_id": 7,
            "payload": {
                "type": "import_file",
                "path": "/data/sample.csv",
                "format": "delimited-text",
                "table_name": null,
            }
        }))
        .unwrap();
        assert_eq!(
            cmd.payload,
            CommandPayload::ImportFile {
                path: "/data/sample.csv".into(),
                format: FileFormat::Csv,
                table_name: None,
                overwrite: false,
            }
        );

        let v = serde_json::to_value(Command::new(1, CommandPayload::Cancel { task_id: 9 })).unwrap();
        assert_eq!(v["payload"]["type"], "cancel");
        assert_eq!(v["payload"]["task_id"], 9);
    }

    #[test]
    fn test_unknown_event_fields_and_variants_are_ignored() {
        let ev: Event = serde_json::from_value(json!({
            "task_id": 3,
            "kind": { "type": "started", "host": "future-field" }
        }))
        .unwrap();
        assert_eq!(ev.kind, EventKind::Started);

        let ev: Event = serde_json::from_value(json!({
            "task_id": 3,
            "kind": { "type": "paused" }
        }))
        .unwrap();
        assert_eq!(ev.kind, EventKind::Unknown);
        assert!(!ev.is_terminal());
    }

    #[test]
    fn test_error_code_display() {
        assert_eq!(ErrorCode::TaskNotFound.to_string(), "TASK_NOT_FOUND");
        let kind = EventKind::error(ErrorCode::Cancelled, "cancelled");
        let v = serde_json::to_value(&kind).unwrap();
        assert_eq!(v, json!({ "type": "error", "message": "cancelled", "code": "CANCELLED" }));
    }
}

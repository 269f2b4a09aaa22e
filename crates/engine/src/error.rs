//! Error taxonomy. Every error maps to a wire [`ErrorCode`].

use crate::protocol::ErrorCode;

/// Failures constructing an [`Engine`](crate::Engine).
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid engine configuration: {0}")]
    Config(String),
    #[error("no tokio runtime available to run tasks on")]
    NoRuntime,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Rejections reported synchronously by `Engine::handle`; no task is started.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("task {0} is already running")]
    DuplicateTask(u64),
    #[error("invalid command: {0}")]
    InvalidCommand(String),
}

impl DispatchError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            DispatchError::DuplicateTask(_) => ErrorCode::DuplicateTask,
            DispatchError::InvalidCommand(_) => ErrorCode::InvalidInput,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CancelError {
    #[error("task {0} not found")]
    TaskNotFound(u64),
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to open analytical store: {0}")]
    Open(String),
    #[error("analytical store connection poisoned by a panicked task")]
    Poisoned,
    #[error("{0}")]
    Engine(#[from] duckdb::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    /// The engine's diagnostic, verbatim.
    #[error("{0}")]
    SyntaxOrSemantic(String),
    #[error("cancelled")]
    Cancelled,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Failure class of a store diagnostic, read from its `<Class> Error:` prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// The file system: missing directories, permissions, unreadable files.
    Io,
    /// The data itself: conversions, malformed input files.
    Data,
    /// The statement: syntax, unknown tables or columns.
    Query,
    Internal,
}

impl FailureClass {
    pub fn of(message: &str) -> FailureClass {
        let class = message
            .split_once(" Error:")
            .map(|(class, _)| class.trim())
            .unwrap_or_default();
        match class {
            "IO" | "Permission" => FailureClass::Io,
            "Conversion" | "Invalid Input" | "Out of Range" => FailureClass::Data,
            "Parser" | "Syntax" | "Binder" | "Catalog" | "Constraint" | "Not implemented" => {
                FailureClass::Query
            }
            _ => FailureClass::Internal,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("table '{0}' already exists")]
    TableExists(String),
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("{0}")]
    Engine(String),
    #[error("cancelled")]
    Cancelled,
}

impl From<StoreError> for ImportError {
    fn from(e: StoreError) -> Self {
        ImportError::Engine(e.to_string())
    }
}

impl From<duckdb::Error> for ImportError {
    fn from(e: duckdb::Error) -> Self {
        ImportError::Engine(e.to_string())
    }
}

impl From<csv::Error> for ImportError {
    fn from(e: csv::Error) -> Self {
        if e.is_io_error() {
            match e.into_kind() {
                csv::ErrorKind::Io(io) => ImportError::Io(io),
                other => ImportError::Parse(format!("{:?}", other)),
            }
        } else {
            ImportError::Parse(e.to_string())
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("source not found: {0}")]
    SourceNotFound(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Engine(String),
    #[error("cancelled")]
    Cancelled,
}

impl From<StoreError> for ExportError {
    fn from(e: StoreError) -> Self {
        ExportError::Engine(e.to_string())
    }
}

impl From<duckdb::Error> for ExportError {
    fn from(e: duckdb::Error) -> Self {
        ExportError::Engine(e.to_string())
    }
}

/// Anything that ends a running task early; becomes its terminal `error` event.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error(transparent)]
    Exec(#[from] ExecError),
    #[error(transparent)]
    Import(#[from] ImportError),
    #[error(transparent)]
    Export(#[from] ExportError),
    #[error("task panicked: {0}")]
    Panicked(String),
}

impl TaskError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            TaskError::Exec(ExecError::SyntaxOrSemantic(_)) => ErrorCode::SqlError,
            TaskError::Exec(ExecError::Cancelled) => ErrorCode::Cancelled,
            TaskError::Exec(ExecError::Store(_)) => ErrorCode::InternalError,
            TaskError::Import(e) => match e {
                ImportError::TableExists(_) => ErrorCode::TableExists,
                ImportError::UnsupportedFormat(_) => ErrorCode::UnsupportedFormat,
                ImportError::Io(_) => ErrorCode::IoError,
                ImportError::Parse(_) => ErrorCode::ParseError,
                ImportError::Engine(msg) => match FailureClass::of(msg) {
                    FailureClass::Io => ErrorCode::IoError,
                    FailureClass::Data => ErrorCode::ParseError,
                    FailureClass::Query | FailureClass::Internal => ErrorCode::InternalError,
                },
                ImportError::Cancelled => ErrorCode::Cancelled,
            },
            TaskError::Export(e) => match e {
                ExportError::SourceNotFound(_) => ErrorCode::SourceNotFound,
                ExportError::Io(_) => ErrorCode::IoError,
                ExportError::Engine(msg) => match FailureClass::of(msg) {
                    FailureClass::Io => ErrorCode::IoError,
                    FailureClass::Data | FailureClass::Query => ErrorCode::SqlError,
                    FailureClass::Internal => ErrorCode::InternalError,
                },
                ExportError::Cancelled => ErrorCode::Cancelled,
            },
            TaskError::Panicked(_) => ErrorCode::InternalError,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.error_code() == ErrorCode::Cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancelled_message_is_stable() {
        let errs: Vec<TaskError> = vec![
            ExecError::Cancelled.into(),
            ImportError::Cancelled.into(),
            ExportError::Cancelled.into(),
        ];
        for e in errs {
            assert_eq!(e.to_string(), "cancelled");
            assert!(e.is_cancelled());
        }
    }

    #[test]
    fn test_error_codes() {
        let e: TaskError = ImportError::TableExists("sales".into()).into();
        assert_eq!(e.error_code(), ErrorCode::TableExists);
        assert_eq!(e.to_string(), "table 'sales' already exists");

        let e: TaskError = ExecError::SyntaxOrSemantic("Parser Error: syntax error".into()).into();
        assert_eq!(e.error_code(), ErrorCode::SqlError);
        assert_eq!(e.to_string(), "Parser Error: syntax error");

        assert_eq!(
            DispatchError::DuplicateTask(4).error_code(),
            ErrorCode::DuplicateTask
        );
    }

    #[test]
    fn test_store_failures_classified_by_cause() {
        let io: TaskError =
            ExportError::Engine("IO Error: Cannot open file \"/nope/out.csv\"".into()).into();
        assert_eq!(io.error_code(), ErrorCode::IoError);
        let query: TaskError =
            ExportError::Engine("Catalog Error: Table with name nope does not exist!".into()).into();
        assert_eq!(query.error_code(), ErrorCode::SqlError);

        let data: TaskError =
            ImportError::Engine("Invalid Input Error: No magic bytes found".into()).into();
        assert_eq!(data.error_code(), ErrorCode::ParseError);
        let io: TaskError =
            ImportError::Engine("IO Error: No files found that match the pattern".into()).into();
        assert_eq!(io.error_code(), ErrorCode::IoError);
        let store: TaskError = ImportError::from(StoreError::Poisoned).into();
        assert_eq!(store.error_code(), ErrorCode::InternalError);
    }
}

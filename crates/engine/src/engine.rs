//! The engine façade: accepts commands, runs each as its own task, and
//! reports every outcome on the event stream.

use crate::broadcast::{EventBroadcaster, EventStream};
use crate::config::EngineConfig;
use crate::error::{DispatchError, EngineError, TaskError};
use crate::executor::Executor;
use crate::exporter::Exporter;
use crate::importer::Importer;
use crate::progress::ProgressReporter;
use crate::protocol::{Command, CommandPayload, ErrorCode, Event, EventKind, FileFormat};
use crate::registry::{CancelToken, TaskRegistry};
use crate::store::Store;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::Instrument;

/// One engine instance: its own store, registry and event stream.
/// Cloning yields another handle to the same instance.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<Inner>,
    runtime: Handle,
}

struct Inner {
    registry: TaskRegistry,
    events: EventBroadcaster,
    executor: Executor,
    importer: Importer,
    exporter: Exporter,
}

/// A validated, runnable command.
#[derive(Debug)]
enum Work {
    Sql(String),
    Import {
        path: PathBuf,
        format: FileFormat,
        table_name: Option<String>,
        overwrite: bool,
    },
    Export {
        source: String,
        path: PathBuf,
        format: FileFormat,
    },
}

impl Work {
    fn from_payload(payload: CommandPayload) -> Result<Work, DispatchError> {
        fn required(field: &str, value: &str) -> Result<(), DispatchError> {
            if value.trim().is_empty() {
                return Err(DispatchError::InvalidCommand(format!("{} must not be empty", field)));
            }
            Ok(())
        }

        match payload {
            CommandPayload::ExecuteSql { sql } => {
                required("sql", &sql)?;
                Ok(Work::Sql(sql))
            }
            CommandPayload::ImportFile {
                path,
                format,
                table_name,
                overwrite,
            } => {
                required("path", &path)?;
                Ok(Work::Import {
                    path: PathBuf::from(path),
                    format,
                    table_name,
                    overwrite,
                })
            }
            CommandPayload::ExportFile {
                source,
                path,
                format,
            } => {
                required("source", &source)?;
                required("path", &path)?;
                Ok(Work::Export {
                    source,
                    path: PathBuf::from(path),
                    format,
                })
            }
            CommandPayload::Cancel { .. } => Err(DispatchError::InvalidCommand(
                "cancel does not start a task".into(),
            )),
        }
    }
}

impl Engine {
    /// Build an engine that runs its tasks on the current tokio runtime.
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        let runtime = Handle::try_current().map_err(|_| EngineError::NoRuntime)?;
        Self::with_runtime(config, runtime)
    }

    pub fn with_runtime(config: EngineConfig, runtime: Handle) -> Result<Self, EngineError> {
        config.validate().map_err(EngineError::Config)?;
        let store = Store::open_in_memory()?;
        let inner = Inner {
            registry: TaskRegistry::new(),
            events: EventBroadcaster::new(config.event_capacity),
            executor: Executor::new(store.clone(), config.preview_rows),
            importer: Importer::new(store.clone(), config.clone()),
            exporter: Exporter::new(store, config),
        };
        Ok(Self {
            inner: Arc::new(inner),
            runtime,
        })
    }

    /// Dispatch one command. Returns as soon as the task is registered; its
    /// outcome arrives on the event stream.
    pub fn handle(&self, command: Command) -> Result<(), DispatchError> {
        let Command { task_id, payload } = command;
        if let CommandPayload::Cancel { task_id: target } = payload {
            self.cancel(target);
            return Ok(());
        }

        let command = payload.name();
        let work = Work::from_payload(payload)?;
        let cancel = self.inner.registry.register(task_id)?;
        tracing::info!(task_id, command, "task dispatched");
        self.inner.events.emit(Event::new(task_id, EventKind::Started));

        let inner = Arc::clone(&self.inner);
        let span = tracing::info_span!("task", task_id);
        self.runtime.spawn(
            async move {
                let worker = {
                    let inner = Arc::clone(&inner);
                    let span = tracing::Span::current();
                    tokio::task::spawn_blocking(move || {
                        let _entered = span.enter();
                        inner.run(task_id, work, &cancel)
                    })
                };
                let outcome = match worker.await {
                    Ok(outcome) => outcome,
                    Err(join) => Err(TaskError::Panicked(panic_message(join))),
                };
                let kind = match outcome {
                    Ok(kind) => {
                        tracing::info!("task finished");
                        kind
                    }
                    Err(e) => {
                        if e.is_cancelled() {
                            tracing::info!("task cancelled");
                        } else {
                            tracing::warn!(error = %e, "task failed");
                        }
                        EventKind::error(e.error_code(), e.to_string())
                    }
                };
                inner.events.emit(Event::new(task_id, kind));
                inner.registry.complete(task_id);
            }
            .instrument(span),
        );
        Ok(())
    }

    /// Fire-and-forget dispatch. Rejections are logged, not returned.
    pub fn submit(&self, command: Command) {
        let task_id = command.task_id;
        if let Err(e) = self.handle(command) {
            tracing::warn!(task_id, error = %e, "command rejected");
        }
    }

    pub fn subscribe(&self) -> EventStream {
        self.inner.events.subscribe()
    }

    pub fn active_tasks(&self) -> Vec<u64> {
        self.inner.registry.active()
    }

    /// Signal every running task; each still ends with its own terminal event.
    pub fn cancel_all(&self) {
        for task_id in self.inner.registry.active() {
            self.cancel(task_id);
        }
    }

    fn cancel(&self, target: u64) {
        match self.inner.registry.cancel(target) {
            Ok(()) => tracing::info!(task_id = target, "cancellation requested"),
            Err(e) => {
                tracing::debug!(task_id = target, "cancel for unknown task");
                self.inner
                    .events
                    .emit(Event::new(target, EventKind::error(ErrorCode::TaskNotFound, e.to_string())));
            }
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("active_tasks", &self.inner.registry.active())
            .finish_non_exhaustive()
    }
}

impl Inner {
    fn run(&self, task_id: u64, work: Work, cancel: &CancelToken) -> Result<EventKind, TaskError> {
        match work {
            Work::Sql(sql) => {
                let envelope = self.executor.execute(&sql, cancel)?;
                Ok(EventKind::Finished {
                    row_count: envelope.row_count,
                    column_count: envelope.column_count,
                    preview: envelope.preview,
                    table_name: None,
                    path: None,
                })
            }
            Work::Import {
                path,
                format,
                table_name,
                overwrite,
            } => {
                let mut progress = ProgressReporter::new(task_id, 0, self.events.clone());
                let summary = self.importer.import(
                    &path,
                    format,
                    table_name.as_deref(),
                    overwrite,
                    cancel,
                    &mut progress,
                )?;
                Ok(EventKind::Finished {
                    row_count: summary.row_count,
                    column_count: summary.column_count,
                    preview: summary.preview,
                    table_name: Some(summary.table_name),
                    path: None,
                })
            }
            Work::Export {
                source,
                path,
                format,
            } => {
                let mut progress = ProgressReporter::new(task_id, 0, self.events.clone());
                let summary = self
                    .exporter
                    .export(&source, &path, format, cancel, &mut progress)?;
                Ok(EventKind::Finished {
                    row_count: summary.row_count,
                    column_count: summary.column_count,
                    preview: summary.preview,
                    table_name: None,
                    path: Some(summary.path),
                })
            }
        }
    }
}

fn panic_message(err: tokio::task::JoinError) -> String {
    if !err.is_panic() {
        return err.to_string();
    }
    let payload = err.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

//! Engine crate – command/event execution over an embedded analytical store.
//!
//! Front-ends submit [`Command`]s and observe [`Event`]s; they never touch
//! the store or file I/O directly. The crate has no UI or transport types,
//! so the CLI, the socket daemon and tests all drive the same [`Engine`].

pub mod broadcast;
pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod exporter;
pub mod importer;
pub mod progress;
pub mod protocol;
pub mod registry;
pub mod scenario;
pub mod store;
pub mod types;
pub mod value;

// Re-exports for convenience
pub use broadcast::EventStream;
pub use config::EngineConfig;
pub use engine::Engine;
pub use error::{DispatchError, EngineError};
pub use protocol::{Command, CommandPayload, ErrorCode, Event, EventKind, FileFormat};
pub use types::{DaemonResponse, ErrorInfo, Status};

//! Error types for the packvault scheduler

use std::path::PathBuf;

use packvault_engine::EngineError;

/// All errors that can occur while managing scheduled backup tasks
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// start() was called while the scheduler was already running
    #[error("Scheduler is already running")]
    AlreadyRunning,
    /// A filesystem watch could not be established for a realtime task
    #[error("Failed to watch {path}: {reason}")]
    WatchFailed {
        /// The source directory that could not be watched
        path: PathBuf,
        /// The watcher's own description of the failure
        reason: String,
    },
    /// The background runtime could not be built
    #[error("Runtime error: {0}")]
    Runtime(String),
    /// A trigger's backup pipeline failed
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),
    /// I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#![warn(missing_docs)]

//! Packvault scheduler: unattended backups on timers and filesystem
//! watches, with retention pruning and cooperative shutdown.
//!
//! The [`Scheduler`] owns its runtime and task registry; the engine crate
//! does the actual archiving. Foreground callers register tasks and tune
//! their per-task configuration; background drivers invoke the pipeline
//! and never outlive `stop()`.

pub mod error;
pub mod retention;
pub mod scheduler;
pub mod task;
mod watch;

pub use error::SchedulerError;
pub use retention::{generate_archive_name, parse_archive_timestamp, prune};
pub use scheduler::{Scheduler, SchedulerConfig};
pub use task::{TaskEngineConfig, TaskId, TaskKind, TaskSpec};

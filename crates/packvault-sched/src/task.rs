//! Task definitions: what to back up, where, and what triggers it.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use packvault_engine::{CompressionAlgorithm, FilterOptions};

/// Unique, monotonically assigned task identifier.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct TaskId(pub u64);

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// What fires a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskKind {
    /// Recurring timer
    Interval {
        /// Time between triggers
        interval: Duration,
    },
    /// Debounced filesystem watch on the source directory
    Realtime,
}

/// Immutable description of a task's source, destination, and retention.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Directory (or single file) to back up
    pub src: PathBuf,
    /// Directory that receives the timestamped archives
    pub dst: PathBuf,
    /// Archive file name prefix
    pub prefix: String,
    /// Archives to keep in `dst` for this prefix; 0 disables pruning
    pub keep_count: usize,
}

/// Per-task engine configuration. Mutable after registration; changes
/// apply to subsequent triggers only.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskEngineConfig {
    /// Payload compression algorithm
    pub algorithm: CompressionAlgorithm,
    /// Archive password; empty disables encryption
    pub password: String,
    /// File selection rules
    pub filter: FilterOptions,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_id_displays_with_prefix() {
        assert_eq!(TaskId(7).to_string(), "task-7");
    }

    #[test]
    fn spec_serde_round_trips() {
        let spec = TaskSpec {
            src: PathBuf::from("/data/projects"),
            dst: PathBuf::from("/backups"),
            prefix: "projects".to_string(),
            keep_count: 5,
        };
        let json = serde_json::to_string(&spec).unwrap();
        let back: TaskSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(spec, back);
    }
}

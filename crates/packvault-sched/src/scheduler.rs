//! The scheduler: a task registry plus per-task driver loops on an owned
//! tokio runtime.
//!
//! Interval tasks fire on a fixed cadence; realtime tasks fire on
//! debounced filesystem changes. Every trigger runs the engine on the
//! blocking pool under a per-(destination, prefix) mutex, then prunes old
//! archives. `stop()` cancels all drivers and joins them, so no
//! background work survives it; an in-flight backup always finishes
//! rather than being interrupted mid-write.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use parking_lot::{Mutex, RwLock};
use tokio::runtime::Runtime;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use packvault_engine::{BackupEngine, BackupSummary, CompressionAlgorithm, FilterOptions};

use crate::error::SchedulerError;
use crate::retention;
use crate::task::{TaskEngineConfig, TaskId, TaskKind, TaskSpec};
use crate::watch;

/// Tuning knobs for the scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Worker threads for the background runtime
    pub worker_threads: usize,
    /// Quiet period a realtime task waits after the last event before
    /// firing, coalescing bursts into one backup
    pub debounce_window: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_threads: 2,
            debounce_window: Duration::from_millis(500),
        }
    }
}

struct TaskState {
    id: TaskId,
    kind: TaskKind,
    spec: TaskSpec,
    config: Mutex<TaskEngineConfig>,
    /// Child token of the current run; cancelling it stops just this task.
    cancel: Mutex<Option<CancellationToken>>,
}

struct Shared {
    tasks: RwLock<HashMap<TaskId, Arc<TaskState>>>,
    /// One async mutex per (destination, prefix): writing and pruning the
    /// same archive family must never interleave across tasks.
    dest_locks: Mutex<HashMap<(PathBuf, String), Arc<tokio::sync::Mutex<()>>>>,
    debounce_window: Duration,
}

impl Shared {
    fn dest_lock(&self, dst: PathBuf, prefix: String) -> Arc<tokio::sync::Mutex<()>> {
        self.dest_locks
            .lock()
            .entry((dst, prefix))
            .or_default()
            .clone()
    }
}

/// Runs registered backup tasks on timers and filesystem watches.
///
/// The scheduler owns its runtime and registry; there is no process-wide
/// state. Dropping it stops everything.
pub struct Scheduler {
    runtime: Runtime,
    shared: Arc<Shared>,
    next_id: AtomicU64,
    running: AtomicBool,
    cancel: Mutex<CancellationToken>,
    drivers: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl Scheduler {
    /// Scheduler with default configuration.
    pub fn new() -> Result<Self, SchedulerError> {
        Self::with_config(SchedulerConfig::default())
    }

    /// Scheduler with explicit configuration.
    pub fn with_config(config: SchedulerConfig) -> Result<Self, SchedulerError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(config.worker_threads.max(1))
            .thread_name("packvault-sched")
            .enable_all()
            .build()
            .map_err(|e| SchedulerError::Runtime(e.to_string()))?;
        Ok(Self {
            runtime,
            shared: Arc::new(Shared {
                tasks: RwLock::new(HashMap::new()),
                dest_locks: Mutex::new(HashMap::new()),
                debounce_window: config.debounce_window,
            }),
            next_id: AtomicU64::new(1),
            running: AtomicBool::new(false),
            cancel: Mutex::new(CancellationToken::new()),
            drivers: Mutex::new(Vec::new()),
        })
    }

    /// Register a task that fires every `interval`.
    pub fn add_scheduled_task(&self, spec: TaskSpec, interval: Duration) -> TaskId {
        self.register(TaskKind::Interval { interval }, spec)
    }

    /// Register a task that fires on filesystem changes under its source.
    /// Fails if the watch cannot be established, rather than registering a
    /// task that would never fire.
    pub fn add_realtime_task(&self, spec: TaskSpec) -> Result<TaskId, SchedulerError> {
        let (probe_tx, _probe_rx) = mpsc::unbounded_channel();
        watch::watch_source(&spec.src, probe_tx)?;
        Ok(self.register(TaskKind::Realtime, spec))
    }

    /// Remove a task. Idempotent: removing an unknown id is a no-op.
    /// Returns whether a task was actually removed.
    pub fn remove_task(&self, id: TaskId) -> bool {
        let removed = self.shared.tasks.write().remove(&id);
        match removed {
            Some(task) => {
                if let Some(cancel) = task.cancel.lock().take() {
                    cancel.cancel();
                }
                info!(task = %id, "task removed");
                true
            }
            None => false,
        }
    }

    /// Set a task's archive password. Applies to subsequent triggers only.
    pub fn set_task_password(&self, id: TaskId, password: &str) -> bool {
        self.with_task(id, |task| task.config.lock().password = password.to_string())
    }

    /// Set a task's compression algorithm. Applies to subsequent triggers
    /// only.
    pub fn set_task_compression_algorithm(
        &self,
        id: TaskId,
        algorithm: CompressionAlgorithm,
    ) -> bool {
        self.with_task(id, |task| task.config.lock().algorithm = algorithm)
    }

    /// Set a task's file filter. Applies to subsequent triggers only.
    pub fn set_task_filter(&self, id: TaskId, filter: FilterOptions) -> bool {
        self.with_task(id, |task| task.config.lock().filter = filter)
    }

    /// Snapshot a task's current engine configuration.
    pub fn task_config(&self, id: TaskId) -> Option<TaskEngineConfig> {
        self.shared
            .tasks
            .read()
            .get(&id)
            .map(|task| task.config.lock().clone())
    }

    /// Number of registered tasks.
    pub fn task_count(&self) -> usize {
        self.shared.tasks.read().len()
    }

    /// Whether the scheduler is currently running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Bring up drivers for every registered task. Tasks added while
    /// running get their driver immediately.
    pub fn start(&self) -> Result<(), SchedulerError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(SchedulerError::AlreadyRunning);
        }
        *self.cancel.lock() = CancellationToken::new();
        let tasks: Vec<Arc<TaskState>> = self.shared.tasks.read().values().cloned().collect();
        let count = tasks.len();
        for task in tasks {
            self.spawn_driver(task);
        }
        info!(tasks = count, "scheduler started");
        Ok(())
    }

    /// Cancel all timers and watches, then wait for every in-flight
    /// trigger to finish. Idempotent; after it returns no background work
    /// remains.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.cancel.lock().cancel();
        let handles: Vec<_> = std::mem::take(&mut *self.drivers.lock());
        self.runtime.block_on(async {
            for handle in handles {
                if let Err(e) = handle.await {
                    error!(error = %e, "driver terminated abnormally");
                }
            }
        });
        info!("scheduler stopped");
    }

    fn register(&self, kind: TaskKind, spec: TaskSpec) -> TaskId {
        let id = TaskId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let task = Arc::new(TaskState {
            id,
            kind,
            spec,
            config: Mutex::new(TaskEngineConfig::default()),
            cancel: Mutex::new(None),
        });
        self.shared.tasks.write().insert(id, task.clone());
        info!(task = %id, src = %task.spec.src.display(), "task registered");
        if self.is_running() {
            self.spawn_driver(task);
        }
        id
    }

    fn spawn_driver(&self, task: Arc<TaskState>) {
        let token = self.cancel.lock().child_token();
        *task.cancel.lock() = Some(token.clone());
        let shared = self.shared.clone();
        let kind = task.kind.clone();
        let handle = self.runtime.handle().spawn(async move {
            match kind {
                TaskKind::Interval { interval } => {
                    run_interval(shared, task, token, interval).await
                }
                TaskKind::Realtime => run_realtime(shared, task, token).await,
            }
        });
        self.drivers.lock().push(handle);
    }

    fn with_task(&self, id: TaskId, f: impl FnOnce(&TaskState)) -> bool {
        match self.shared.tasks.read().get(&id) {
            Some(task) => {
                f(task);
                true
            }
            None => false,
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_interval(
    shared: Arc<Shared>,
    task: Arc<TaskState>,
    cancel: CancellationToken,
    interval: Duration,
) {
    debug!(task = %task.id, interval_secs = interval.as_secs(), "interval driver started");
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => run_trigger(&shared, &task).await,
        }
    }
    debug!(task = %task.id, "interval driver stopped");
}

async fn run_realtime(shared: Arc<Shared>, task: Arc<TaskState>, cancel: CancellationToken) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let _watch = match watch::watch_source(&task.spec.src, tx) {
        Ok(handle) => handle,
        Err(e) => {
            error!(task = %task.id, error = %e, "realtime task lost its watch; task is dormant until restart");
            return;
        }
    };
    debug!(task = %task.id, src = %task.spec.src.display(), "realtime driver watching");
    while watch::debounced_recv(&mut rx, shared.debounce_window, &cancel).await {
        debug!(task = %task.id, "change detected");
        run_trigger(&shared, &task).await;
    }
    debug!(task = %task.id, "realtime driver stopped");
}

/// One trigger: serialize on the destination, snapshot the task config,
/// and run backup + prune on the blocking pool.
async fn run_trigger(shared: &Arc<Shared>, task: &Arc<TaskState>) {
    let lock = shared.dest_lock(task.spec.dst.clone(), task.spec.prefix.clone());
    let _dst_guard = lock.lock().await;

    let config = task.config.lock().clone();
    let spec = task.spec.clone();
    let id = task.id;
    match tokio::task::spawn_blocking(move || execute_backup(id, &spec, &config)).await {
        Ok(Ok(summary)) => info!(
            task = %id,
            files = summary.files,
            archive_bytes = summary.archive_bytes,
            "trigger complete"
        ),
        Ok(Err(e)) => warn!(task = %id, error = %e, "trigger failed; next cadence unaffected"),
        Err(e) => error!(task = %id, error = %e, "trigger panicked"),
    }
}

fn execute_backup(
    id: TaskId,
    spec: &TaskSpec,
    config: &TaskEngineConfig,
) -> Result<BackupSummary, SchedulerError> {
    std::fs::create_dir_all(&spec.dst)?;
    let mut engine = BackupEngine::new();
    engine.set_compression_algorithm(config.algorithm);
    engine.set_password(&config.password);
    engine.set_filter(config.filter.clone());

    let name = retention::generate_archive_name(&spec.prefix, &Local::now());
    let dst_file = spec.dst.join(&name);
    debug!(task = %id, archive = %name, "running backup");
    let summary = engine.backup(&spec.src, &dst_file)?;
    retention::prune(&spec.dst, &spec.prefix, spec.keep_count)?;
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn spec(src: &Path, dst: &Path) -> TaskSpec {
        TaskSpec {
            src: src.to_path_buf(),
            dst: dst.to_path_buf(),
            prefix: "test".to_string(),
            keep_count: 3,
        }
    }

    #[test]
    fn new_scheduler_is_stopped() {
        let sched = Scheduler::new().unwrap();
        assert!(!sched.is_running());
        assert_eq!(sched.task_count(), 0);
    }

    #[test]
    fn start_twice_is_already_running() {
        let sched = Scheduler::new().unwrap();
        sched.start().unwrap();
        assert!(matches!(
            sched.start(),
            Err(SchedulerError::AlreadyRunning)
        ));
        sched.stop();
        // After a stop, starting again is fine.
        sched.start().unwrap();
        sched.stop();
    }

    #[test]
    fn stop_is_idempotent() {
        let sched = Scheduler::new().unwrap();
        sched.stop();
        sched.start().unwrap();
        sched.stop();
        sched.stop();
    }

    #[test]
    fn task_ids_are_monotonic_and_unique() {
        let dir = tempfile::tempdir().unwrap();
        let sched = Scheduler::new().unwrap();
        let a = sched.add_scheduled_task(
            spec(dir.path(), &dir.path().join("out")),
            Duration::from_secs(3600),
        );
        let b = sched.add_scheduled_task(
            spec(dir.path(), &dir.path().join("out")),
            Duration::from_secs(3600),
        );
        assert!(b > a);
        assert_eq!(sched.task_count(), 2);
    }

    #[test]
    fn remove_task_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let sched = Scheduler::new().unwrap();
        let id = sched.add_scheduled_task(
            spec(dir.path(), &dir.path().join("out")),
            Duration::from_secs(3600),
        );
        assert!(sched.remove_task(id));
        assert!(!sched.remove_task(id));
        assert_eq!(sched.task_count(), 0);
    }

    #[test]
    fn setters_mutate_stored_config() {
        let dir = tempfile::tempdir().unwrap();
        let sched = Scheduler::new().unwrap();
        let id = sched.add_scheduled_task(
            spec(dir.path(), &dir.path().join("out")),
            Duration::from_secs(3600),
        );
        assert!(sched.set_task_password(id, "hunter2"));
        assert!(sched.set_task_compression_algorithm(id, CompressionAlgorithm::Joined));
        let mut filter = FilterOptions {
            enabled: true,
            ..Default::default()
        };
        filter.add_suffix(".txt");
        assert!(sched.set_task_filter(id, filter.clone()));

        let config = sched.task_config(id).unwrap();
        assert_eq!(config.password, "hunter2");
        assert_eq!(config.algorithm, CompressionAlgorithm::Joined);
        assert_eq!(config.filter, filter);
    }

    #[test]
    fn setters_on_missing_task_return_false() {
        let sched = Scheduler::new().unwrap();
        let ghost = TaskId(999);
        assert!(!sched.set_task_password(ghost, "pw"));
        assert!(!sched.set_task_compression_algorithm(ghost, CompressionAlgorithm::Huffman));
        assert!(!sched.set_task_filter(ghost, FilterOptions::default()));
        assert!(sched.task_config(ghost).is_none());
    }

    #[test]
    fn realtime_task_on_missing_source_fails_registration() {
        let dir = tempfile::tempdir().unwrap();
        let sched = Scheduler::new().unwrap();
        let result = sched.add_realtime_task(spec(
            &dir.path().join("does-not-exist"),
            &dir.path().join("out"),
        ));
        assert!(matches!(result, Err(SchedulerError::WatchFailed { .. })));
        assert_eq!(sched.task_count(), 0);
    }
}

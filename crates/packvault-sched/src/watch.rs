//! Filesystem watching for realtime tasks.
//!
//! A notify watcher forwards relevant events into a tokio channel; the
//! driver coalesces bursts with a quiet-period debounce so an editor save
//! storm produces one backup, not fifty.

use std::path::Path;
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::SchedulerError;

/// Keeps the underlying watcher alive; dropping it closes the watch.
pub(crate) struct WatchHandle {
    _watcher: RecommendedWatcher,
}

fn is_relevant(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}

/// Watch `src` recursively, sending a unit event for every relevant
/// filesystem change. Fails if the watch cannot be established.
pub(crate) fn watch_source(
    src: &Path,
    tx: mpsc::UnboundedSender<()>,
) -> Result<WatchHandle, SchedulerError> {
    let mut watcher =
        notify::recommended_watcher(move |res: Result<Event, notify::Error>| match res {
            Ok(event) => {
                if is_relevant(&event.kind) {
                    let _ = tx.send(());
                }
            }
            Err(e) => warn!(error = %e, "filesystem watcher error"),
        })
        .map_err(|e| SchedulerError::WatchFailed {
            path: src.into(),
            reason: e.to_string(),
        })?;
    watcher
        .watch(src, RecursiveMode::Recursive)
        .map_err(|e| SchedulerError::WatchFailed {
            path: src.into(),
            reason: e.to_string(),
        })?;
    Ok(WatchHandle { _watcher: watcher })
}

/// Wait for a change, then keep absorbing further changes until `quiet`
/// elapses with none. Returns false when cancelled or the watcher is gone.
pub(crate) async fn debounced_recv(
    rx: &mut mpsc::UnboundedReceiver<()>,
    quiet: Duration,
    cancel: &CancellationToken,
) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => return false,
        first = rx.recv() => {
            if first.is_none() {
                return false;
            }
        }
    }
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return false,
            _ = tokio::time::sleep(quiet) => return true,
            more = rx.recv() => {
                if more.is_none() {
                    // Watcher went away mid-burst; still run the backup
                    // for the changes already seen.
                    return true;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn debounce_coalesces_bursts() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        for _ in 0..50 {
            tx.send(()).unwrap();
        }
        assert!(debounced_recv(&mut rx, Duration::from_millis(100), &cancel).await);
        // The burst is fully drained: nothing pending afterwards.
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_wins_over_waiting() {
        let (_tx, mut rx) = mpsc::unbounded_channel::<()>();
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(!debounced_recv(&mut rx, Duration::from_millis(100), &cancel).await);
    }

    #[tokio::test(start_paused = true)]
    async fn closed_channel_without_events_does_not_trigger() {
        let (tx, mut rx) = mpsc::unbounded_channel::<()>();
        drop(tx);
        let cancel = CancellationToken::new();
        assert!(!debounced_recv(&mut rx, Duration::from_millis(100), &cancel).await);
    }

    #[test]
    fn watch_of_missing_directory_fails_registration() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        let result = watch_source(&dir.path().join("does-not-exist"), tx);
        assert!(matches!(result, Err(SchedulerError::WatchFailed { .. })));
    }

    #[test]
    fn relevant_event_kinds() {
        use notify::event::{CreateKind, ModifyKind, RemoveKind};
        assert!(is_relevant(&EventKind::Create(CreateKind::File)));
        assert!(is_relevant(&EventKind::Modify(ModifyKind::Any)));
        assert!(is_relevant(&EventKind::Remove(RemoveKind::File)));
        assert!(!is_relevant(&EventKind::Access(
            notify::event::AccessKind::Any
        )));
    }
}

//! Retention: timestamped archive names and pruning of old copies.
//!
//! Archives are named `{prefix}_{%Y%m%d_%H%M%S}.pvk`. Pruning keeps the
//! `keep` newest by embedded timestamp; timestamp ties break by lexical
//! file name order so repeated runs agree on what survives.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, NaiveDateTime};
use tracing::{debug, info, warn};

use packvault_engine::ARCHIVE_SUFFIX;

use crate::error::SchedulerError;

const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Archive file name for `prefix` at the given instant.
pub fn generate_archive_name(prefix: &str, at: &DateTime<Local>) -> String {
    format!(
        "{prefix}_{}{ARCHIVE_SUFFIX}",
        at.format(TIMESTAMP_FORMAT)
    )
}

/// Extract the embedded timestamp from an archive file name, if the name
/// belongs to `prefix`.
pub fn parse_archive_timestamp(name: &str, prefix: &str) -> Option<NaiveDateTime> {
    let rest = name.strip_prefix(prefix)?.strip_prefix('_')?;
    let stamp = rest.strip_suffix(ARCHIVE_SUFFIX)?;
    NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT).ok()
}

/// Delete all but the `keep` newest archives for `prefix` in `dst`.
/// `keep == 0` disables pruning. Returns the deleted paths.
pub fn prune(dst: &Path, prefix: &str, keep: usize) -> Result<Vec<PathBuf>, SchedulerError> {
    if keep == 0 {
        return Ok(Vec::new());
    }

    let mut candidates: Vec<(NaiveDateTime, String, PathBuf)> = Vec::new();
    for entry in fs::read_dir(dst)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = match entry.file_name().into_string() {
            Ok(n) => n,
            Err(_) => continue,
        };
        if let Some(ts) = parse_archive_timestamp(&name, prefix) {
            candidates.push((ts, name, entry.path()));
        }
    }

    candidates.sort_by(retention_order);

    let mut removed = Vec::new();
    for (ts, name, path) in candidates.into_iter().skip(keep) {
        match fs::remove_file(&path) {
            Ok(()) => {
                info!(archive = %name, timestamp = %ts, "pruned old backup");
                removed.push(path);
            }
            Err(e) => warn!(archive = %name, error = %e, "failed to prune old backup"),
        }
    }
    debug!(prefix, keep, removed = removed.len(), "retention pass finished");
    Ok(removed)
}

/// Newest first; lexical name order decides timestamp ties.
fn retention_order(
    a: &(NaiveDateTime, String, PathBuf),
    b: &(NaiveDateTime, String, PathBuf),
) -> std::cmp::Ordering {
    b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn touch(dir: &Path, name: &str) {
        fs::write(dir.join(name), b"stub").unwrap();
    }

    #[test]
    fn name_generation_and_parsing_are_inverse() {
        let at = Local.with_ymd_and_hms(2026, 8, 6, 14, 30, 55).unwrap();
        let name = generate_archive_name("nightly", &at);
        assert_eq!(name, format!("nightly_20260806_143055{ARCHIVE_SUFFIX}"));
        let parsed = parse_archive_timestamp(&name, "nightly").unwrap();
        assert_eq!(parsed, at.naive_local());
    }

    #[test]
    fn foreign_names_do_not_parse() {
        assert!(parse_archive_timestamp("other_20260101_000000.pvk", "nightly").is_none());
        assert!(parse_archive_timestamp("nightly_garbage.pvk", "nightly").is_none());
        assert!(parse_archive_timestamp("nightly_20260101_000000.txt", "nightly").is_none());
        assert!(parse_archive_timestamp("nightly20260101_000000.pvk", "nightly").is_none());
    }

    #[test]
    fn prune_keeps_newest_by_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        for day in 1..=7 {
            touch(dir.path(), &format!("job_2026010{day}_120000.pvk"));
        }
        let removed = prune(dir.path(), "job", 3).unwrap();
        assert_eq!(removed.len(), 4);
        for day in 5..=7 {
            assert!(dir.path().join(format!("job_2026010{day}_120000.pvk")).exists());
        }
        for day in 1..=4 {
            assert!(!dir.path().join(format!("job_2026010{day}_120000.pvk")).exists());
        }
    }

    #[test]
    fn prune_ignores_other_prefixes_and_non_archives() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "job_20260101_120000.pvk");
        touch(dir.path(), "other_20260101_120000.pvk");
        touch(dir.path(), "job_notes.txt");
        let removed = prune(dir.path(), "job", 1).unwrap();
        assert!(removed.is_empty());
        assert!(dir.path().join("other_20260101_120000.pvk").exists());
        assert!(dir.path().join("job_notes.txt").exists());
    }

    #[test]
    fn keep_zero_disables_pruning() {
        let dir = tempfile::tempdir().unwrap();
        for day in 1..=5 {
            touch(dir.path(), &format!("job_2026010{day}_120000.pvk"));
        }
        let removed = prune(dir.path(), "job", 0).unwrap();
        assert!(removed.is_empty());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 5);
    }

    #[test]
    fn newest_archives_survive() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "job_20260101_120000.pvk");
        touch(dir.path(), "job_20260102_120000.pvk");
        let removed = prune(dir.path(), "job", 1).unwrap();
        assert_eq!(removed.len(), 1);
        assert!(dir.path().join("job_20260102_120000.pvk").exists());
    }

    #[test]
    fn timestamp_ties_break_lexically() {
        let ts = NaiveDateTime::parse_from_str("20260101_120000", TIMESTAMP_FORMAT).unwrap();
        let later = NaiveDateTime::parse_from_str("20260102_120000", TIMESTAMP_FORMAT).unwrap();
        let mut rows = vec![
            (ts, "b.pvk".to_string(), PathBuf::from("b.pvk")),
            (later, "z.pvk".to_string(), PathBuf::from("z.pvk")),
            (ts, "a.pvk".to_string(), PathBuf::from("a.pvk")),
        ];
        rows.sort_by(retention_order);
        let names: Vec<&str> = rows.iter().map(|r| r.1.as_str()).collect();
        assert_eq!(names, vec!["z.pvk", "a.pvk", "b.pvk"]);
    }

    #[test]
    fn prune_keep_larger_than_population_removes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "job_20260101_120000.pvk");
        let removed = prune(dir.path(), "job", 10).unwrap();
        assert!(removed.is_empty());
    }
}

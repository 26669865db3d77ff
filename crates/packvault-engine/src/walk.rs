//! Recursive source-tree walk producing root-relative POSIX paths.
//!
//! Entries come out in sorted directory order (parents before children) so
//! a given tree always yields the same manifest. Symlinks are recorded
//! with their targets, never followed.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use tracing::warn;

use crate::error::EngineError;

/// Kind of a walked node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalkKind {
    /// Regular file
    File,
    /// Directory
    Directory,
    /// Symbolic link with its target
    Symlink(String),
}

/// One filesystem node found during the walk.
#[derive(Debug, Clone)]
pub struct WalkedEntry {
    /// Absolute path on disk
    pub abs_path: PathBuf,
    /// POSIX-style path relative to the source root
    pub rel_path: String,
    /// Node kind
    pub kind: WalkKind,
    /// Size in bytes at stat time (files only; 0 otherwise)
    pub size: u64,
    /// Unix permission bits
    pub mode: u32,
    /// Modification time, seconds since the epoch
    pub mtime: i64,
}

fn mtime_secs(meta: &fs::Metadata) -> i64 {
    match meta.modified() {
        Ok(t) => match t.duration_since(UNIX_EPOCH) {
            Ok(d) => d.as_secs() as i64,
            Err(e) => -(e.duration().as_secs() as i64),
        },
        Err(_) => 0,
    }
}

fn entry_for(path: &Path, rel: String, meta: &fs::Metadata) -> Option<WalkedEntry> {
    let ft = meta.file_type();
    let kind = if ft.is_file() {
        WalkKind::File
    } else if ft.is_dir() {
        WalkKind::Directory
    } else if ft.is_symlink() {
        let target = match fs::read_link(path) {
            Ok(t) => t.to_string_lossy().into_owned(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "unreadable symlink skipped");
                return None;
            }
        };
        WalkKind::Symlink(target)
    } else {
        // Devices, FIFOs, and sockets have no archive representation.
        warn!(path = %path.display(), "special file skipped");
        return None;
    };
    let size = if ft.is_file() { meta.len() } else { 0 };
    Some(WalkedEntry {
        abs_path: path.to_path_buf(),
        rel_path: rel,
        kind,
        size,
        mode: meta.permissions().mode() & 0o7777,
        mtime: mtime_secs(meta),
    })
}

fn walk_dir(
    dir: &Path,
    rel_prefix: &str,
    out: &mut Vec<WalkedEntry>,
) -> Result<(), EngineError> {
    let mut children: Vec<fs::DirEntry> = fs::read_dir(dir)
        .map_err(|e| EngineError::from_io(e, dir))?
        .collect::<Result<_, _>>()
        .map_err(|e| EngineError::from_io(e, dir))?;
    children.sort_by_key(|e| e.file_name());

    for child in children {
        let name = match child.file_name().into_string() {
            Ok(n) => n,
            Err(raw) => {
                warn!(name = ?raw, dir = %dir.display(), "non-UTF-8 file name skipped");
                continue;
            }
        };
        let rel = if rel_prefix.is_empty() {
            name.clone()
        } else {
            format!("{rel_prefix}/{name}")
        };
        let path = child.path();
        let meta = fs::symlink_metadata(&path).map_err(|e| EngineError::from_io(e, &path))?;
        if let Some(entry) = entry_for(&path, rel.clone(), &meta) {
            let is_dir = entry.kind == WalkKind::Directory;
            out.push(entry);
            if is_dir {
                walk_dir(&path, &rel, out)?;
            }
        }
    }
    Ok(())
}

/// Walk `src`. A directory yields its full tree; a single file or symlink
/// yields a one-entry tree named after its final component.
pub fn walk(src: &Path) -> Result<Vec<WalkedEntry>, EngineError> {
    let meta = fs::symlink_metadata(src).map_err(|e| EngineError::from_io(e, src))?;
    if meta.file_type().is_dir() {
        let mut out = Vec::new();
        walk_dir(src, "", &mut out)?;
        return Ok(out);
    }

    let name = src
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| EngineError::InvalidPath {
            path: src.into(),
            reason: "source has no usable file name".to_string(),
        })?;
    match entry_for(src, name.to_string(), &meta) {
        Some(entry) => Ok(vec![entry]),
        None => Err(EngineError::InvalidPath {
            path: src.into(),
            reason: "source is not a file, directory, or symlink".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::symlink;

    #[test]
    fn walks_nested_tree_in_sorted_order() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("b.txt"), b"bb").unwrap();
        fs::write(dir.path().join("a.txt"), b"a").unwrap();
        fs::write(dir.path().join("sub/inner.txt"), b"inner").unwrap();

        let entries = walk(dir.path()).unwrap();
        let rels: Vec<&str> = entries.iter().map(|e| e.rel_path.as_str()).collect();
        assert_eq!(rels, vec!["a.txt", "b.txt", "sub", "sub/inner.txt"]);
        assert_eq!(entries[0].size, 1);
        assert_eq!(entries[2].kind, WalkKind::Directory);
    }

    #[test]
    fn symlinks_are_recorded_not_followed() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("real.txt"), b"data").unwrap();
        symlink("real.txt", dir.path().join("link")).unwrap();

        let entries = walk(dir.path()).unwrap();
        let link = entries.iter().find(|e| e.rel_path == "link").unwrap();
        assert_eq!(link.kind, WalkKind::Symlink("real.txt".to_string()));
        assert_eq!(link.size, 0);
    }

    #[test]
    fn dangling_symlink_is_still_recorded() {
        let dir = tempfile::tempdir().unwrap();
        symlink("nowhere", dir.path().join("dangling")).unwrap();
        let entries = walk(dir.path()).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(
            entries[0].kind,
            WalkKind::Symlink("nowhere".to_string())
        );
    }

    #[test]
    fn single_file_source_is_a_one_entry_tree() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("only.bin");
        fs::write(&file, b"12345").unwrap();
        let entries = walk(&file).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].rel_path, "only.bin");
        assert_eq!(entries[0].size, 5);
    }

    #[test]
    fn missing_source_is_invalid_path() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(matches!(
            walk(&missing),
            Err(EngineError::InvalidPath { .. })
        ));
    }

    #[test]
    fn mode_bits_are_captured() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("script.sh");
        fs::write(&file, b"#!/bin/sh\n").unwrap();
        fs::set_permissions(&file, fs::Permissions::from_mode(0o755)).unwrap();
        let entries = walk(&file).unwrap();
        assert_eq!(entries[0].mode, 0o755);
    }
}

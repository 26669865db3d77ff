//! Backup engine: walk → filter → concatenate → compress → seal → write,
//! and the inverse for restore and verify.

use std::fs;
use std::os::unix::fs::{symlink, PermissionsExt};
use std::path::{Path, PathBuf};
use std::time::{Duration, UNIX_EPOCH};

use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::codec::CompressionAlgorithm;
use crate::error::EngineError;
use crate::filter::{CompiledFilter, FilterOptions};
use crate::format::{self, Archive};
use crate::manifest::{EntryKind, ManifestEntry};
use crate::walk::{self, WalkKind};

/// Counters from a completed backup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackupSummary {
    /// Regular files archived
    pub files: u64,
    /// Directories recorded
    pub directories: u64,
    /// Symlinks recorded
    pub symlinks: u64,
    /// Files excluded by the filter
    pub filtered_out: u64,
    /// Total uncompressed payload bytes
    pub input_bytes: u64,
    /// Final archive size on disk
    pub archive_bytes: u64,
}

/// Counters from a completed restore.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RestoreSummary {
    /// Regular files written
    pub files: u64,
    /// Directories created
    pub directories: u64,
    /// Symlinks created
    pub symlinks: u64,
    /// Payload bytes written
    pub bytes_written: u64,
}

/// The backup engine. Holds the current algorithm, password, and filter;
/// each operation snapshots that configuration at entry, so reconfiguring
/// the engine never races an operation already underway.
#[derive(Debug, Clone, Default)]
pub struct BackupEngine {
    algorithm: CompressionAlgorithm,
    password: String,
    filter: FilterOptions,
}

impl BackupEngine {
    /// Engine with default algorithm (LZSS), no password, no filter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Select the payload compression algorithm for subsequent operations.
    pub fn set_compression_algorithm(&mut self, algorithm: CompressionAlgorithm) {
        self.algorithm = algorithm;
    }

    /// Set the archive password; empty disables encryption.
    pub fn set_password(&mut self, password: &str) {
        self.password = password.to_string();
    }

    /// Replace the file filter options.
    pub fn set_filter(&mut self, filter: FilterOptions) {
        self.filter = filter;
    }

    /// Back up `src` (a directory tree or a single file) into the archive
    /// file `dst`.
    pub fn backup(&self, src: &Path, dst: &Path) -> Result<BackupSummary, EngineError> {
        let filter = CompiledFilter::new(&self.filter)?;
        info!(src = %src.display(), dst = %dst.display(), algorithm = %self.algorithm, "backup started");

        let walked = walk::walk(src)?;
        if walked.is_empty() {
            return Err(EngineError::InvalidPath {
                path: src.into(),
                reason: "source tree is empty".to_string(),
            });
        }

        let mut summary = BackupSummary::default();
        let mut entries = Vec::with_capacity(walked.len());
        let mut payload = Vec::new();
        for node in walked {
            let kind = match node.kind {
                WalkKind::File => {
                    if !filter.matches(&node.rel_path, node.size) {
                        summary.filtered_out += 1;
                        continue;
                    }
                    let content = fs::read(&node.abs_path)
                        .map_err(|e| EngineError::from_io(e, &node.abs_path))?;
                    let checksum = *blake3::hash(&content).as_bytes();
                    summary.files += 1;
                    summary.input_bytes += content.len() as u64;
                    let size = content.len() as u64;
                    payload.extend_from_slice(&content);
                    entries.push(ManifestEntry {
                        path: node.rel_path,
                        size,
                        mode: node.mode,
                        mtime: node.mtime,
                        kind: EntryKind::File { checksum },
                    });
                    continue;
                }
                WalkKind::Directory => {
                    summary.directories += 1;
                    EntryKind::Directory
                }
                WalkKind::Symlink(target) => {
                    summary.symlinks += 1;
                    EntryKind::Symlink { target }
                }
            };
            entries.push(ManifestEntry {
                path: node.rel_path,
                size: 0,
                mode: node.mode,
                mtime: node.mtime,
                kind,
            });
        }

        if summary.files == 0 && summary.symlinks == 0 {
            return Err(EngineError::InvalidPath {
                path: src.into(),
                reason: "no files left to archive after filtering".to_string(),
            });
        }

        summary.archive_bytes =
            format::write_archive(dst, self.algorithm, &self.password, &entries, &payload)?;
        info!(
            files = summary.files,
            input_bytes = summary.input_bytes,
            archive_bytes = summary.archive_bytes,
            "backup finished"
        );
        Ok(summary)
    }

    /// Restore the archive `src` into the directory `dst`.
    ///
    /// The tree is materialized in a staging directory next to `dst` and
    /// committed by rename, so a failure never leaves a partial tree under
    /// `dst`. `dst` must not exist, or be an empty directory.
    pub fn restore(&self, src: &Path, dst: &Path) -> Result<RestoreSummary, EngineError> {
        let archive = format::read_archive(src, &self.password)?;
        info!(src = %src.display(), dst = %dst.display(), entries = archive.entries.len(), "restore started");

        let dst_state = match fs::metadata(dst) {
            Ok(meta) if !meta.is_dir() => {
                return Err(EngineError::InvalidPath {
                    path: dst.into(),
                    reason: "destination exists and is not a directory".to_string(),
                })
            }
            Ok(_) => {
                let mut iter = fs::read_dir(dst).map_err(|e| EngineError::from_io(e, dst))?;
                if iter.next().is_some() {
                    return Err(EngineError::InvalidPath {
                        path: dst.into(),
                        reason: "destination directory is not empty".to_string(),
                    });
                }
                DstState::EmptyDir
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => DstState::Missing,
            Err(e) => return Err(EngineError::from_io(e, dst)),
        };

        let staging = staging_sibling(dst)?;
        let mut guard = StagingGuard::new(staging.clone());
        fs::create_dir_all(&staging).map_err(|e| EngineError::from_io(e, &staging))?;

        let summary = materialize(&archive, &staging)?;

        match dst_state {
            DstState::EmptyDir => {
                fs::remove_dir(dst).map_err(|e| EngineError::from_io(e, dst))?
            }
            DstState::Missing => {
                if let Some(parent) = dst.parent() {
                    if !parent.as_os_str().is_empty() {
                        fs::create_dir_all(parent)
                            .map_err(|e| EngineError::from_io(e, parent))?;
                    }
                }
            }
        }
        fs::rename(&staging, dst).map_err(|e| EngineError::from_io(e, dst))?;
        guard.persist();

        info!(
            files = summary.files,
            bytes_written = summary.bytes_written,
            "restore finished"
        );
        Ok(summary)
    }

    /// Authenticate, decompress, and checksum-verify the archive `src`
    /// without writing anything to disk.
    pub fn verify(&self, src: &Path) -> Result<(), EngineError> {
        let archive = format::read_archive(src, &self.password)?;
        let mut offset = 0usize;
        for entry in &archive.entries {
            if let EntryKind::File { checksum } = &entry.kind {
                let end = offset
                    .checked_add(entry.size as usize)
                    .filter(|&e| e <= archive.payload.len())
                    .ok_or_else(|| {
                        EngineError::CorruptArchive(format!(
                            "payload too short for entry {}",
                            entry.path
                        ))
                    })?;
                let actual = blake3::hash(&archive.payload[offset..end]);
                if actual.as_bytes() != checksum {
                    return Err(EngineError::CorruptArchive(format!(
                        "checksum mismatch for entry {}",
                        entry.path
                    )));
                }
                offset = end;
            }
        }
        if offset != archive.payload.len() {
            return Err(EngineError::CorruptArchive(
                "payload longer than manifest accounts for".to_string(),
            ));
        }
        debug!(src = %src.display(), entries = archive.entries.len(), "archive verified");
        Ok(())
    }
}

enum DstState {
    Missing,
    EmptyDir,
}

/// Removes the staging tree on drop unless the restore committed.
struct StagingGuard {
    path: PathBuf,
    persisted: bool,
}

impl StagingGuard {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            persisted: false,
        }
    }

    fn persist(&mut self) {
        self.persisted = true;
    }
}

impl Drop for StagingGuard {
    fn drop(&mut self) {
        if !self.persisted && self.path.exists() {
            if let Err(e) = fs::remove_dir_all(&self.path) {
                warn!(path = %self.path.display(), error = %e, "failed to clean up staging directory");
            }
        }
    }
}

fn staging_sibling(dst: &Path) -> Result<PathBuf, EngineError> {
    let name = dst
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| EngineError::InvalidPath {
            path: dst.into(),
            reason: "destination has no usable file name".to_string(),
        })?;
    let nonce: u32 = rand::thread_rng().next_u32();
    Ok(dst.with_file_name(format!(".{name}.partial-{nonce:08x}")))
}

fn check_entry_path(path: &str) -> Result<(), EngineError> {
    let unsafe_path = path.is_empty()
        || path.starts_with('/')
        || path
            .split('/')
            .any(|c| c.is_empty() || c == "." || c == "..");
    if unsafe_path {
        return Err(EngineError::CorruptArchive(format!(
            "unsafe entry path {path:?}"
        )));
    }
    Ok(())
}

fn set_mtime(file: &fs::File, mtime: i64) {
    let time = if mtime >= 0 {
        UNIX_EPOCH.checked_add(Duration::from_secs(mtime as u64))
    } else {
        UNIX_EPOCH.checked_sub(Duration::from_secs(mtime.unsigned_abs()))
    };
    if let Some(t) = time {
        if let Err(e) = file.set_modified(t) {
            debug!(error = %e, "could not restore mtime");
        }
    }
}

fn materialize(archive: &Archive, root: &Path) -> Result<RestoreSummary, EngineError> {
    let mut summary = RestoreSummary::default();
    let mut offset = 0usize;
    for entry in &archive.entries {
        check_entry_path(&entry.path)?;
        let target = root.join(&entry.path);
        match &entry.kind {
            EntryKind::Directory => {
                fs::create_dir_all(&target).map_err(|e| EngineError::from_io(e, &target))?;
                fs::set_permissions(&target, fs::Permissions::from_mode(entry.mode))
                    .map_err(|e| EngineError::from_io(e, &target))?;
                summary.directories += 1;
            }
            EntryKind::File { .. } => {
                let end = offset
                    .checked_add(entry.size as usize)
                    .filter(|&e| e <= archive.payload.len())
                    .ok_or_else(|| {
                        EngineError::CorruptArchive(format!(
                            "payload too short for entry {}",
                            entry.path
                        ))
                    })?;
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent).map_err(|e| EngineError::from_io(e, parent))?;
                }
                let mut file = fs::File::create(&target)
                    .map_err(|e| EngineError::from_io(e, &target))?;
                std::io::Write::write_all(&mut file, &archive.payload[offset..end])?;
                file.set_permissions(fs::Permissions::from_mode(entry.mode))
                    .map_err(|e| EngineError::from_io(e, &target))?;
                set_mtime(&file, entry.mtime);
                offset = end;
                summary.files += 1;
                summary.bytes_written += entry.size;
            }
            EntryKind::Symlink { target: link } => {
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent).map_err(|e| EngineError::from_io(e, parent))?;
                }
                symlink(link, &target).map_err(|e| EngineError::from_io(e, &target))?;
                summary.symlinks += 1;
            }
        }
    }
    if offset != archive.payload.len() {
        return Err(EngineError::CorruptArchive(
            "payload longer than manifest accounts for".to_string(),
        ));
    }
    Ok(summary)
}

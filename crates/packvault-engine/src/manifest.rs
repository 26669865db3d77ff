//! Manifest: the ordered description of the archived tree, independent of
//! payload compression.
//!
//! Wire form is hand-rolled: LEB128 varints for lengths and scalars,
//! zigzag for the signed mtime. Reads are bounds-checked against sane
//! limits so a hostile length can never drive allocation.

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Longest accepted path or symlink target on read.
const MAX_PATH_LEN: u64 = 4096;
/// Most entries a manifest may declare.
const MAX_ENTRIES: u64 = 1_000_000;

/// What kind of tree node a manifest entry describes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryKind {
    /// Regular file; `checksum` is BLAKE3 of the content
    File {
        /// BLAKE3 hash of the file content
        checksum: [u8; 32],
    },
    /// Directory
    Directory,
    /// Symbolic link, recorded, never followed
    Symlink {
        /// Link target exactly as stored on disk
        target: String,
    },
}

/// One node of the archived tree, in directory-walk order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// POSIX-style path relative to the source root
    pub path: String,
    /// Content size in bytes; 0 for directories and symlinks
    pub size: u64,
    /// Unix permission bits
    pub mode: u32,
    /// Modification time, seconds since the epoch
    pub mtime: i64,
    /// Node kind plus kind-specific data
    pub kind: EntryKind,
}

const KIND_FILE: u8 = 0;
const KIND_DIRECTORY: u8 = 1;
const KIND_SYMLINK: u8 = 2;

/// Append a LEB128 varint.
pub fn write_varint(buf: &mut Vec<u8>, mut v: u64) {
    loop {
        let byte = (v & 0x7F) as u8;
        v >>= 7;
        if v == 0 {
            buf.push(byte);
            return;
        }
        buf.push(byte | 0x80);
    }
}

/// Read a LEB128 varint, advancing `pos`.
pub fn read_varint(input: &[u8], pos: &mut usize) -> Result<u64, EngineError> {
    let mut v = 0u64;
    let mut shift = 0u32;
    loop {
        let byte = *input.get(*pos).ok_or_else(|| {
            EngineError::CorruptArchive("truncated varint".to_string())
        })?;
        *pos += 1;
        if shift == 63 && byte > 1 {
            return Err(EngineError::CorruptArchive("varint overflow".to_string()));
        }
        v |= u64::from(byte & 0x7F) << shift;
        if byte & 0x80 == 0 {
            return Ok(v);
        }
        shift += 7;
        if shift > 63 {
            return Err(EngineError::CorruptArchive("varint overflow".to_string()));
        }
    }
}

fn zigzag(v: i64) -> u64 {
    ((v << 1) ^ (v >> 63)) as u64
}

fn unzigzag(v: u64) -> i64 {
    ((v >> 1) as i64) ^ -((v & 1) as i64)
}

fn read_string(input: &[u8], pos: &mut usize, what: &str) -> Result<String, EngineError> {
    let len = read_varint(input, pos)?;
    if len > MAX_PATH_LEN {
        return Err(EngineError::CorruptArchive(format!("{what} too long")));
    }
    let len = len as usize;
    let end = pos
        .checked_add(len)
        .filter(|&e| e <= input.len())
        .ok_or_else(|| EngineError::CorruptArchive(format!("truncated {what}")))?;
    let s = std::str::from_utf8(&input[*pos..end])
        .map_err(|_| EngineError::CorruptArchive(format!("{what} is not UTF-8")))?
        .to_string();
    *pos = end;
    Ok(s)
}

/// Encode a manifest: entry count, then each entry.
pub fn encode(entries: &[ManifestEntry]) -> Vec<u8> {
    let mut buf = Vec::new();
    write_varint(&mut buf, entries.len() as u64);
    for e in entries {
        write_varint(&mut buf, e.path.len() as u64);
        buf.extend_from_slice(e.path.as_bytes());
        write_varint(&mut buf, e.size);
        write_varint(&mut buf, u64::from(e.mode));
        write_varint(&mut buf, zigzag(e.mtime));
        match &e.kind {
            EntryKind::File { checksum } => {
                buf.push(KIND_FILE);
                buf.extend_from_slice(checksum);
            }
            EntryKind::Directory => buf.push(KIND_DIRECTORY),
            EntryKind::Symlink { target } => {
                buf.push(KIND_SYMLINK);
                write_varint(&mut buf, target.len() as u64);
                buf.extend_from_slice(target.as_bytes());
            }
        }
    }
    buf
}

/// Decode a manifest block. The whole slice must be consumed.
pub fn decode(input: &[u8]) -> Result<Vec<ManifestEntry>, EngineError> {
    let mut pos = 0usize;
    let count = read_varint(input, &mut pos)?;
    if count > MAX_ENTRIES {
        return Err(EngineError::CorruptArchive(
            "manifest entry count exceeds limit".to_string(),
        ));
    }
    let mut entries = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let path = read_string(input, &mut pos, "entry path")?;
        let size = read_varint(input, &mut pos)?;
        let mode = read_varint(input, &mut pos)?;
        if mode > u64::from(u32::MAX) {
            return Err(EngineError::CorruptArchive("mode out of range".to_string()));
        }
        let mtime = unzigzag(read_varint(input, &mut pos)?);
        let kind_byte = *input.get(pos).ok_or_else(|| {
            EngineError::CorruptArchive("truncated entry kind".to_string())
        })?;
        pos += 1;
        let kind = match kind_byte {
            KIND_FILE => {
                let end = pos
                    .checked_add(32)
                    .filter(|&e| e <= input.len())
                    .ok_or_else(|| {
                        EngineError::CorruptArchive("truncated checksum".to_string())
                    })?;
                let checksum: [u8; 32] =
                    input[pos..end].try_into().expect("32-byte slice");
                pos = end;
                EntryKind::File { checksum }
            }
            KIND_DIRECTORY => EntryKind::Directory,
            KIND_SYMLINK => EntryKind::Symlink {
                target: read_string(input, &mut pos, "symlink target")?,
            },
            other => {
                return Err(EngineError::CorruptArchive(format!(
                    "unknown entry kind {other}"
                )))
            }
        };
        entries.push(ManifestEntry {
            path,
            size,
            mode: mode as u32,
            mtime,
            kind,
        });
    }
    if pos != input.len() {
        return Err(EngineError::CorruptArchive(
            "trailing bytes after manifest".to_string(),
        ));
    }
    Ok(entries)
}

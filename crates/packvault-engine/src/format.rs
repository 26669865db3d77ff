//! Archive file layout: writer and reader.
//!
//! ```text
//! MAGIC "PVLT" | VERSION | ALGO | ENCRYPTED |
//! [SALT(16) | NONCE(12) if encrypted] |
//! MANIFEST_LEN varint | MANIFEST | PAYLOAD_LEN varint | PAYLOAD | TAG(16)
//! ```
//!
//! The payload is compressed, then (with a password) sealed with
//! AES-256-GCM using everything before it as associated data; the GCM tag
//! is the trailing TAG. Without a password the TAG is truncated BLAKE3
//! over the rest of the file. Either way the tag is validated before any
//! manifest or payload byte is trusted.
//!
//! Writes go to a sibling temporary file that is renamed into place on
//! success, so a crash never leaves a half-written archive under the
//! final name.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use rand::RngCore;
use tracing::{debug, warn};

use crate::codec::{self, CompressionAlgorithm};
use crate::crypto::{self, NONCE_LEN, SALT_LEN, TAG_LEN};
use crate::error::EngineError;
use crate::manifest::{self, read_varint, write_varint, ManifestEntry};

/// Archive magic bytes.
pub const MAGIC: [u8; 4] = *b"PVLT";
/// Current format revision.
pub const FORMAT_VERSION: u8 = 1;
/// File name suffix for archives.
pub const ARCHIVE_SUFFIX: &str = ".pvk";

/// Largest manifest block the reader accepts before authentication.
const MAX_MANIFEST_LEN: u64 = 256 * 1024 * 1024;

/// A parsed archive: the manifest plus the decompressed payload stream.
#[derive(Debug)]
pub struct Archive {
    /// Manifest entries in walk order
    pub entries: Vec<ManifestEntry>,
    /// Concatenated file contents in manifest order
    pub payload: Vec<u8>,
    /// Algorithm the payload was compressed with
    pub algorithm: CompressionAlgorithm,
    /// Whether the archive was password-sealed
    pub encrypted: bool,
}

/// Deletes its path on drop unless persisted; keeps aborted writes from
/// littering the destination directory.
struct TempFileGuard {
    path: PathBuf,
    persisted: bool,
}

impl TempFileGuard {
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

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        if !self.persisted && self.path.exists() {
            if let Err(e) = fs::remove_file(&self.path) {
                warn!(path = %self.path.display(), error = %e, "failed to clean up temp file");
            }
        }
    }
}

fn temp_sibling(dst: &Path) -> PathBuf {
    let name = dst
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "archive".to_string());
    let nonce: u32 = rand::thread_rng().next_u32();
    dst.with_file_name(format!(".{name}.tmp-{nonce:08x}"))
}

/// Serialize, seal, and atomically write an archive. Returns the total
/// bytes written.
pub fn write_archive(
    dst: &Path,
    algorithm: CompressionAlgorithm,
    password: &str,
    entries: &[ManifestEntry],
    payload: &[u8],
) -> Result<u64, EngineError> {
    let encrypted = !password.is_empty();
    let mut body = codec::encode(algorithm, payload)?;
    let manifest_bytes = manifest::encode(entries);

    let mut prefix = Vec::with_capacity(64 + manifest_bytes.len());
    prefix.extend_from_slice(&MAGIC);
    prefix.push(FORMAT_VERSION);
    prefix.push(algorithm.id());
    prefix.push(u8::from(encrypted));

    let tag = if encrypted {
        let salt = crypto::random_salt();
        let nonce = crypto::random_nonce();
        prefix.extend_from_slice(&salt);
        prefix.extend_from_slice(&nonce);
        write_varint(&mut prefix, manifest_bytes.len() as u64);
        prefix.extend_from_slice(&manifest_bytes);
        write_varint(&mut prefix, body.len() as u64);
        let key = crypto::derive_key(password, &salt)?;
        crypto::seal(&key, &nonce, &prefix, &mut body)?
    } else {
        write_varint(&mut prefix, manifest_bytes.len() as u64);
        prefix.extend_from_slice(&manifest_bytes);
        write_varint(&mut prefix, body.len() as u64);
        let mut hasher = blake3::Hasher::new();
        hasher.update(&prefix);
        hasher.update(&body);
        let digest = hasher.finalize();
        let mut tag = [0u8; TAG_LEN];
        tag.copy_from_slice(&digest.as_bytes()[..TAG_LEN]);
        tag
    };

    let tmp_path = temp_sibling(dst);
    let mut guard = TempFileGuard::new(tmp_path.clone());
    {
        let mut file =
            fs::File::create(&tmp_path).map_err(|e| EngineError::from_io(e, &tmp_path))?;
        file.write_all(&prefix)?;
        file.write_all(&body)?;
        file.write_all(&tag)?;
        file.sync_all()?;
    }
    fs::rename(&tmp_path, dst).map_err(|e| EngineError::from_io(e, dst))?;
    guard.persist();

    let total = (prefix.len() + body.len() + TAG_LEN) as u64;
    debug!(
        dst = %dst.display(),
        bytes = total,
        algorithm = %algorithm,
        encrypted,
        "archive written"
    );
    Ok(total)
}

/// Read, authenticate, unseal, and decompress an archive.
pub fn read_archive(src: &Path, password: &str) -> Result<Archive, EngineError> {
    let data = fs::read(src).map_err(|e| EngineError::from_io(e, src))?;

    if data.len() < 4 + 3 + TAG_LEN || data[..4] != MAGIC {
        return Err(EngineError::UnsupportedFormat);
    }
    if data[4] != FORMAT_VERSION {
        return Err(EngineError::UnsupportedFormat);
    }
    let algorithm = CompressionAlgorithm::from_id(data[5])?;
    let encrypted = match data[6] {
        0 => false,
        1 => true,
        _ => {
            return Err(EngineError::CorruptArchive(
                "invalid encrypted flag".to_string(),
            ))
        }
    };
    let mut pos = 7usize;

    let (salt, nonce) = if encrypted {
        if data.len() < pos + SALT_LEN + NONCE_LEN {
            return Err(EngineError::CorruptArchive(
                "truncated crypto parameters".to_string(),
            ));
        }
        let salt: [u8; SALT_LEN] = data[pos..pos + SALT_LEN].try_into().expect("salt slice");
        pos += SALT_LEN;
        let nonce: [u8; NONCE_LEN] = data[pos..pos + NONCE_LEN].try_into().expect("nonce slice");
        pos += NONCE_LEN;
        (Some(salt), Some(nonce))
    } else {
        (None, None)
    };

    let manifest_len = read_varint(&data, &mut pos)?;
    if manifest_len > MAX_MANIFEST_LEN {
        return Err(EngineError::CorruptArchive(
            "manifest length exceeds limit".to_string(),
        ));
    }
    let manifest_start = pos;
    let manifest_end = pos
        .checked_add(manifest_len as usize)
        .filter(|&e| e <= data.len())
        .ok_or_else(|| EngineError::CorruptArchive("truncated manifest".to_string()))?;
    pos = manifest_end;

    let payload_len = read_varint(&data, &mut pos)?;
    let payload_start = pos;
    let payload_end = pos
        .checked_add(payload_len as usize)
        .filter(|&e| e <= data.len())
        .ok_or_else(|| EngineError::CorruptArchive("truncated payload".to_string()))?;
    if data.len() - payload_end != TAG_LEN {
        return Err(EngineError::CorruptArchive(
            "trailing bytes after authentication tag".to_string(),
        ));
    }
    let tag: [u8; TAG_LEN] = data[payload_end..].try_into().expect("tag slice");

    // Authenticate before parsing manifest or touching payload contents.
    let mut body = data[payload_start..payload_end].to_vec();
    if encrypted {
        let key = crypto::derive_key(password, &salt.expect("encrypted"))?;
        crypto::open(
            &key,
            &nonce.expect("encrypted"),
            &data[..payload_start],
            &mut body,
            &tag,
        )?;
    } else {
        if !password.is_empty() {
            return Err(EngineError::AuthenticationFailed);
        }
        let mut hasher = blake3::Hasher::new();
        hasher.update(&data[..payload_end]);
        let digest = hasher.finalize();
        if digest.as_bytes()[..TAG_LEN] != tag {
            return Err(EngineError::AuthenticationFailed);
        }
    }

    let entries = manifest::decode(&data[manifest_start..manifest_end])?;
    let payload = codec::decode(algorithm, &body)?;
    debug!(
        src = %src.display(),
        entries = entries.len(),
        payload_bytes = payload.len(),
        "archive read"
    );
    Ok(Archive {
        entries,
        payload,
        algorithm,
        encrypted,
    })
}

//! Password-based sealing: Argon2id key derivation + AES-256-GCM with a
//! detached authentication tag.
//!
//! The archive's header and manifest ride along as associated data, so the
//! tag covers everything before it in the file, not just the payload.

use aes_gcm::aead::AeadInPlace;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce, Tag};
use argon2::Argon2;
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::EngineError;

/// Salt length for key derivation.
pub const SALT_LEN: usize = 16;
/// AEAD nonce length.
pub const NONCE_LEN: usize = 12;
/// Authentication tag length (GCM tag, or truncated BLAKE3 when unencrypted).
pub const TAG_LEN: usize = 16;

/// 256-bit key derived from the archive password. Zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SealKey(pub [u8; 32]);

impl std::fmt::Debug for SealKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SealKey([REDACTED])")
    }
}

/// Derive a key from a password and salt with Argon2id. Deliberately slow.
pub fn derive_key(password: &str, salt: &[u8; SALT_LEN]) -> Result<SealKey, EngineError> {
    let mut okm = [0u8; 32];
    Argon2::default()
        .hash_password_into(password.as_bytes(), salt, &mut okm)
        .map_err(|e| EngineError::Encryption(e.to_string()))?;
    Ok(SealKey(okm))
}

/// Generate a cryptographically random KDF salt.
pub fn random_salt() -> [u8; SALT_LEN] {
    let mut bytes = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

/// Generate a cryptographically random AEAD nonce.
pub fn random_nonce() -> [u8; NONCE_LEN] {
    let mut bytes = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

/// Encrypt `buf` in place and return the detached tag. `aad` is
/// authenticated but not encrypted.
pub fn seal(
    key: &SealKey,
    nonce: &[u8; NONCE_LEN],
    aad: &[u8],
    buf: &mut Vec<u8>,
) -> Result<[u8; TAG_LEN], EngineError> {
    let cipher = Aes256Gcm::new_from_slice(&key.0)
        .map_err(|e| EngineError::Encryption(e.to_string()))?;
    let tag = cipher
        .encrypt_in_place_detached(Nonce::from_slice(nonce), aad, buf)
        .map_err(|e| EngineError::Encryption(e.to_string()))?;
    let mut out = [0u8; TAG_LEN];
    out.copy_from_slice(&tag);
    Ok(out)
}

/// Decrypt `buf` in place, verifying the tag over `aad` + ciphertext.
/// Fails closed: on any mismatch `buf` contents are unspecified and the
/// caller must discard them.
pub fn open(
    key: &SealKey,
    nonce: &[u8; NONCE_LEN],
    aad: &[u8],
    buf: &mut Vec<u8>,
    tag: &[u8; TAG_LEN],
) -> Result<(), EngineError> {
    let cipher = Aes256Gcm::new_from_slice(&key.0)
        .map_err(|e| EngineError::Encryption(e.to_string()))?;
    cipher
        .decrypt_in_place_detached(Nonce::from_slice(nonce), aad, buf, Tag::from_slice(tag))
        .map_err(|_| EngineError::AuthenticationFailed)
}

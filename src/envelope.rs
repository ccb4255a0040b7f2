//! Authenticated encryption of structured payloads under the content key
//!
//! A value is serialized to compact JSON, sealed with AES-256-GCM under a
//! fresh random 96-bit nonce, and carried as an [`Envelope`] of base64
//! strings. Nonces are never derived or counted; every call draws a new one
//! from the OS random source.

use crate::codec;
use crate::error::{ErrorCategory, ErrorKind, JournalsealError, Result};
use crate::keys::{SYMMETRIC_KEY_LEN, SymmetricKey};
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::RngCore;
use rand::rngs::OsRng;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

/// Length of an AES-GCM nonce in bytes
pub const NONCE_LEN: usize = 12;

/// Wire and storage form of one encrypted payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Ciphertext with the 16-byte GCM tag appended, standard base64.
    pub ciphertext: String,
    /// 12-byte nonce, standard base64.
    pub nonce: String,
    /// Identifier of the key that sealed this envelope. Absent on
    /// envelopes written by older clients.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
}

/// Draws a fresh random nonce.
pub fn generate_nonce() -> Result<[u8; NONCE_LEN]> {
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.try_fill_bytes(&mut nonce).map_err(|e| {
        JournalsealError::with_kind_and_source(
            ErrorCategory::Internal,
            ErrorKind::KeyGeneration,
            format!("random source unavailable: {}", e),
            e,
        )
    })?;
    Ok(nonce)
}

/// Encrypt a structured value under `key` with a fresh nonce.
pub fn encrypt<T: Serialize + ?Sized>(key: &SymmetricKey, value: &T) -> Result<Envelope> {
    let nonce = generate_nonce()?;
    encrypt_deterministic(key, value, &nonce)
}

/// Encrypt a structured value under `key` using the provided nonce.
///
/// This function is ONLY for testing purposes to generate deterministic output.
/// NEVER use this in production - always use `encrypt()` which generates a random nonce.
pub fn encrypt_deterministic<T: Serialize + ?Sized>(
    key: &SymmetricKey,
    value: &T,
    nonce: &[u8; NONCE_LEN],
) -> Result<Envelope> {
    let plaintext = Zeroizing::new(serde_json::to_vec(value).map_err(|e| {
        JournalsealError::with_kind_and_source(
            ErrorCategory::User,
            ErrorKind::Serialization,
            format!("failed to serialize payload: {}", e),
            e,
        )
    })?);
    let ciphertext = seal_bytes(key.as_bytes(), nonce, &plaintext)?;

    Ok(Envelope {
        ciphertext: codec::to_base64(&ciphertext),
        nonce: codec::to_base64(nonce),
        kid: Some(key.key_id()),
    })
}

/// Decrypt and verify an envelope, then deserialize the payload.
pub fn decrypt<T: DeserializeOwned>(key: &SymmetricKey, envelope: &Envelope) -> Result<T> {
    if let Some(kid) = &envelope.kid {
        if *kid != key.key_id() {
            return Err(JournalsealError::with_kind(
                ErrorCategory::User,
                ErrorKind::AuthenticationFailed,
                "envelope was sealed under a different key",
            ));
        }
    }

    let nonce: [u8; NONCE_LEN] = codec::from_base64_array(&envelope.nonce, "nonce")?;
    let ciphertext = codec::from_base64(&envelope.ciphertext)?;
    let plaintext = open_bytes(key.as_bytes(), &nonce, &ciphertext)?;

    serde_json::from_slice(&plaintext).map_err(|e| {
        JournalsealError::with_kind_and_source(
            ErrorCategory::User,
            ErrorKind::Deserialization,
            format!("decrypted payload is not valid JSON for this type: {}", e),
            e,
        )
    })
}

/// Raw AES-256-GCM seal. The output carries the tag at the end.
pub(crate) fn seal_bytes(
    key: &[u8; SYMMETRIC_KEY_LEN],
    nonce: &[u8; NONCE_LEN],
    plaintext: &[u8],
) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    cipher
        .encrypt(Nonce::from_slice(nonce), plaintext)
        .map_err(|e| {
            JournalsealError::with_kind(
                ErrorCategory::Internal,
                ErrorKind::InternalInvariant,
                format!("encryption failed: {}", e),
            )
        })
}

/// Raw AES-256-GCM open. Fails closed: no plaintext without a valid tag.
pub(crate) fn open_bytes(
    key: &[u8; SYMMETRIC_KEY_LEN],
    nonce: &[u8; NONCE_LEN],
    ciphertext: &[u8],
) -> Result<Zeroizing<Vec<u8>>> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map(Zeroizing::new)
        .map_err(|_| {
            JournalsealError::with_kind(
                ErrorCategory::User,
                ErrorKind::AuthenticationFailed,
                "corrupt input, tampered-with data, or wrong key",
            )
        })
}

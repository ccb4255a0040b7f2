//! Password wrapping of exported key material using scrypt + AES-256-GCM
//!
//! The binary format, armored with `codec::armor`, is:
//! - log_n: 1 byte
//! - r: 4 bytes (big-endian u32)
//! - p: 4 bytes (big-endian u32)
//! - salt: 16 bytes
//! - nonce: 12 bytes
//! - sealed box: variable length (includes 16-byte GCM tag)

use crate::codec;
use crate::config::KdfParams;
use crate::envelope::{self, NONCE_LEN};
use crate::error::{ErrorCategory, ErrorKind, JournalsealError, Result};
use rand::RngCore;
use rand::rngs::OsRng;
use scrypt::{Params, scrypt};
use std::mem::size_of;
use zeroize::Zeroizing;

/// Length of salt in bytes
pub const SALT_LEN: usize = 16;

/// Length of derived key in bytes
const KEY_LEN: usize = 32;

/// Length of the parameter header in bytes
const HEADER_LEN: usize = 1 + 2 * size_of::<u32>();

/// Length of the AES-GCM authentication tag
const TAG_LEN: usize = 16;

/// Derive a 32-byte wrapping key from a password and salt using scrypt
fn derive_key(
    password: &[u8],
    salt: &[u8; SALT_LEN],
    params: &KdfParams,
) -> Result<Zeroizing<[u8; KEY_LEN]>> {
    params.validate()?;
    let scrypt_params = Params::new(params.log_n, params.r, params.p, KEY_LEN).map_err(|e| {
        JournalsealError::with_kind(
            ErrorCategory::User,
            ErrorKind::KeyDerivation,
            format!("failed to create scrypt params: {}", e),
        )
    })?;

    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    scrypt(password, salt, &scrypt_params, &mut key[..]).map_err(|e| {
        JournalsealError::with_kind(
            ErrorCategory::Internal,
            ErrorKind::KeyDerivation,
            format!("scrypt key derivation failed: {}", e),
        )
    })?;

    Ok(key)
}

/// Wrap key bytes under a password using random salt and nonce
pub fn wrap(password: &[u8], key_bytes: &[u8], params: &KdfParams) -> Result<String> {
    let mut salt = [0u8; SALT_LEN];
    OsRng.try_fill_bytes(&mut salt).map_err(|e| {
        JournalsealError::with_kind_and_source(
            ErrorCategory::Internal,
            ErrorKind::KeyGeneration,
            format!("random source unavailable: {}", e),
            e,
        )
    })?;
    let nonce = envelope::generate_nonce()?;

    wrap_deterministic(password, key_bytes, params, &salt, &nonce)
}

/// Wrap key bytes under a password using provided salt and nonce
///
/// This function is ONLY for testing purposes to generate deterministic output.
/// NEVER use this in production - always use `wrap()` which generates random salt/nonce.
pub fn wrap_deterministic(
    password: &[u8],
    key_bytes: &[u8],
    params: &KdfParams,
    salt: &[u8; SALT_LEN],
    nonce: &[u8; NONCE_LEN],
) -> Result<String> {
    let key = derive_key(password, salt, params)?;
    let sealed_box = envelope::seal_bytes(&key, nonce, key_bytes)?;

    let mut output = Vec::with_capacity(HEADER_LEN + SALT_LEN + NONCE_LEN + sealed_box.len());
    output.push(params.log_n);
    output.extend_from_slice(&params.r.to_be_bytes());
    output.extend_from_slice(&params.p.to_be_bytes());
    output.extend_from_slice(salt);
    output.extend_from_slice(nonce);
    output.extend_from_slice(&sealed_box);

    Ok(codec::armor(&output))
}

/// Unwrap an armored blob with a password, returning the key bytes
pub fn unwrap(password: &[u8], armored: &str) -> Result<Zeroizing<Vec<u8>>> {
    let blob = codec::unarmor(armored)?;
    let mut pos = 0;

    if blob.len() < pos + HEADER_LEN {
        return Err(format_error("input likely truncated while reading kdf parameters"));
    }
    let log_n = blob[pos];
    let r = read_u32(&blob[pos + 1..pos + 5]);
    let p = read_u32(&blob[pos + 5..pos + 9]);
    pos += HEADER_LEN;
    let params = KdfParams { log_n, r, p };
    params
        .validate()
        .map_err(|e| e.with_context("wrapped key carries unacceptable kdf parameters"))?;

    if blob.len() < pos + SALT_LEN {
        return Err(format_error("input likely truncated while reading salt"));
    }
    let salt: [u8; SALT_LEN] = blob[pos..pos + SALT_LEN]
        .try_into()
        .map_err(|_| format_error("failed to read salt"))?;
    pos += SALT_LEN;

    if blob.len() < pos + NONCE_LEN {
        return Err(format_error("input likely truncated while reading nonce"));
    }
    let nonce: [u8; NONCE_LEN] = blob[pos..pos + NONCE_LEN]
        .try_into()
        .map_err(|_| format_error("failed to read nonce"))?;
    pos += NONCE_LEN;

    if blob.len() < pos + TAG_LEN {
        return Err(format_error("input likely truncated while reading sealed box"));
    }
    let sealed_box = &blob[pos..];

    let key = derive_key(password, &salt, &params)?;
    envelope::open_bytes(&key, &nonce, sealed_box).map_err(|e| {
        JournalsealError::with_kind_and_source(
            ErrorCategory::User,
            ErrorKind::AuthenticationFailed,
            "corrupt key material, tampered-with data, or bad password",
            e,
        )
    })
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(bytes);
    u32::from_be_bytes(buf)
}

fn format_error(msg: &str) -> JournalsealError {
    JournalsealError::with_kind(ErrorCategory::User, ErrorKind::WrappedKeyFormat, msg)
}

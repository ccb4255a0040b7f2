//! Base64 helpers and versioned armoring
//!
//! Envelopes and exported keys travel as standard, padded base64 so they
//! stay byte-compatible with what browsers produce via `btoa`. Password
//! wrapped key blobs are armored with a version prefix instead:
//! - `jsealkey1:{base64url-no-padding}`
//! - free of whitespace and safe to keep in any string-valued storage

use crate::error::{ErrorCategory, ErrorKind, JournalsealError, Result};
use base64::{
    Engine,
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
};

/// Magic prefix shared by all wrapped key versions
const MAGIC_PREFIX: &str = "jsealkey";

/// Version 1 magic marker
const V1_MAGIC: &str = "jsealkey1:";

/// Encode bytes as standard base64 with padding.
pub fn to_base64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decode standard base64 with padding.
pub fn from_base64(encoded: &str) -> Result<Vec<u8>> {
    STANDARD.decode(encoded).map_err(|e| {
        JournalsealError::with_kind_and_source(
            ErrorCategory::User,
            ErrorKind::Decode,
            format!("base64 decoding failed: {}", e),
            e,
        )
    })
}

/// Decode standard base64 into a fixed-size array.
pub(crate) fn from_base64_array<const N: usize>(encoded: &str, what: &str) -> Result<[u8; N]> {
    let bytes = from_base64(encoded)?;
    let len = bytes.len();
    bytes.try_into().map_err(|_| {
        JournalsealError::with_kind(
            ErrorCategory::User,
            ErrorKind::Decode,
            format!("{} must be {} bytes, got {}", what, N, len),
        )
    })
}

/// URL-safe base64 without padding, used for short identifiers.
pub(crate) fn to_base64url(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Whether a stored string looks like armored (password wrapped) material.
pub fn is_armored(value: &str) -> bool {
    value.starts_with(MAGIC_PREFIX)
}

/// Wrap bytes in armor, returning the armored string
pub fn armor(body: &[u8]) -> String {
    format!("{}{}", V1_MAGIC, URL_SAFE_NO_PAD.encode(body))
}

/// Unwrap an armored string, returning the original bytes
pub fn unarmor(armored: &str) -> Result<Vec<u8>> {
    if armored.len() < V1_MAGIC.len() {
        return Err(JournalsealError::with_kind(
            ErrorCategory::User,
            ErrorKind::WrappedKeyFormat,
            "input size smaller than magic marker; likely truncated",
        ));
    }

    if let Some(encoded) = armored.strip_prefix(V1_MAGIC) {
        URL_SAFE_NO_PAD.decode(encoded).map_err(|e| {
            JournalsealError::with_kind_and_source(
                ErrorCategory::User,
                ErrorKind::Decode,
                format!("base64 decoding failed: {}", e),
                e,
            )
        })
    } else if armored.starts_with(MAGIC_PREFIX) {
        Err(JournalsealError::with_kind(
            ErrorCategory::User,
            ErrorKind::WrappedKeyFormat,
            "input claims to be a wrapped key, but not a version we support",
        ))
    } else {
        Err(JournalsealError::with_kind(
            ErrorCategory::User,
            ErrorKind::WrappedKeyFormat,
            "input unrecognized as wrapped key material",
        ))
    }
}

use std::error::Error as StdError;

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorCategory {
    /// Any failure that cannot be confidently attributed to any other error
    /// category in this enum.
    ///
    /// In particular this means that use of Internal is never a guarantee
    /// the error is not, for example, due to a user error - merely that it
    /// cannot be confidently determined by the code.
    Internal,

    /// The caller provided invalid input (bad password, malformed key
    /// material, tampered ciphertext) or requested something impossible.
    User,
}

/// Fine-grained condition flags for consumers that want to branch on error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum ErrorKind {
    /// The random source or the key generation primitive failed.
    KeyGeneration,
    /// Key material could not be serialized, or there was no key to export.
    Export,
    /// Key material is malformed or of an unsupported shape.
    Import,
    /// AEAD verification failed: wrong key, wrong password, corruption or
    /// tampering.
    AuthenticationFailed,
    /// Decrypted bytes are not the expected canonical encoding.
    Deserialization,
    /// A payload could not be serialized before encryption.
    Serialization,
    /// Base64 input is malformed, or a decoded value has the wrong length.
    Decode,
    /// The operation needs a key that is not loaded in the session.
    MissingKey,
    /// scrypt parameters were rejected or derivation failed.
    KeyDerivation,
    /// A password-wrapped key blob is malformed, truncated or from a
    /// version we do not support.
    WrappedKeyFormat,
    /// Password could not be obtained from the configured reader.
    PassphraseUnavailable,
    /// Interaction with the filesystem, stdin/stdout, or other I/O failed.
    Io,
    /// Unexpected state reached within journalseal logic.
    InternalInvariant,
}

#[derive(Debug, Error)]
#[error("{msg}")]
pub struct JournalsealError {
    /// Broad error category, always provided.
    pub category: ErrorCategory,
    /// Optional specific condition tag for consumers that need to
    /// branch their behavior. Any code consuming errors MUST handle
    /// the absence of a defined kind.
    pub kind: Option<ErrorKind>,
    #[source]
    source: Option<Box<dyn StdError + Send + Sync + 'static>>,
    msg: String,
}

impl JournalsealError {
    /// Creates a new error with a required category and display message.
    pub fn new(category: ErrorCategory, msg: impl Into<String>) -> Self {
        Self {
            category,
            kind: None,
            source: None,
            msg: msg.into(),
        }
    }

    /// Creates a new error that also tags the failure with a kind.
    pub fn with_kind(category: ErrorCategory, kind: ErrorKind, msg: impl Into<String>) -> Self {
        Self {
            category,
            kind: Some(kind),
            source: None,
            msg: msg.into(),
        }
    }

    /// Creates a new error that retains the originating source error.
    pub fn with_source(
        category: ErrorCategory,
        msg: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self {
            category,
            kind: None,
            source: Some(Box::new(source)),
            msg: msg.into(),
        }
    }

    /// Creates a new error that carries both a kind tag and the originating source error.
    pub fn with_kind_and_source(
        category: ErrorCategory,
        kind: ErrorKind,
        msg: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self {
            category,
            kind: Some(kind),
            source: Some(Box::new(source)),
            msg: msg.into(),
        }
    }

    /// The user-facing message carried by the error.
    pub fn message(&self) -> &str {
        &self.msg
    }

    /// Returns the preserved source error if present.
    pub fn source_error(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.source.as_deref()
    }

    /// Wraps the current error with a higher-level message while preserving the original as source.
    pub fn with_context(self, msg: impl Into<String>) -> Self {
        let category = self.category;
        let kind = self.kind;
        Self {
            category,
            kind,
            source: Some(Box::new(self)),
            msg: msg.into(),
        }
    }

    /// Whether the failure is confined to a single envelope.
    ///
    /// Record reads turn these into per-field sentinels; everything else
    /// (key lifecycle, storage, KDF) aborts the enclosing operation.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.kind,
            Some(ErrorKind::AuthenticationFailed | ErrorKind::Deserialization | ErrorKind::Decode)
        )
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, JournalsealError>;

//! Client configuration

use crate::error::{ErrorCategory, ErrorKind, JournalsealError, Result};
use crate::keystore::FileKeyStore;
use crate::session::KeySession;
use std::path::PathBuf;

/// Directory holding the persisted key entries, relative to the working
/// directory unless configured otherwise.
pub const DEFAULT_STORE_DIR: &str = ".journalseal";

/// scrypt cost parameters used to derive the key-wrapping key.
///
/// The parameters are recorded inside every wrapped blob, so changing the
/// defaults never breaks restoring previously stored keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    /// log2 of the scrypt N parameter (CPU/memory cost)
    pub log_n: u8,
    /// scrypt r parameter (block size)
    pub r: u32,
    /// scrypt p parameter (parallelization)
    pub p: u32,
}

impl KdfParams {
    pub const MIN_LOG_N: u8 = 10;
    pub const MAX_LOG_N: u8 = 20;
    pub const MAX_R: u32 = 32;
    pub const MAX_P: u32 = 16;
    /// Upper bound on the scrypt working set, `128 * r * N` bytes.
    pub const MAX_MEMORY: u64 = 1 << 30;

    fn memory_bytes(&self) -> u64 {
        (128 * u64::from(self.r)) << self.log_n
    }

    /// Rejects parameters that are too weak to be meaningful or too
    /// expensive to be accepted from stored blobs.
    pub fn validate(&self) -> Result<()> {
        if !(Self::MIN_LOG_N..=Self::MAX_LOG_N).contains(&self.log_n) {
            return Err(JournalsealError::with_kind(
                ErrorCategory::User,
                ErrorKind::KeyDerivation,
                format!(
                    "scrypt log_n must be between {} and {}, got {}",
                    Self::MIN_LOG_N,
                    Self::MAX_LOG_N,
                    self.log_n
                ),
            ));
        }
        if self.r == 0 || self.p == 0 {
            return Err(JournalsealError::with_kind(
                ErrorCategory::User,
                ErrorKind::KeyDerivation,
                "scrypt r and p must be non-zero",
            ));
        }
        if self.r > Self::MAX_R || self.p > Self::MAX_P {
            return Err(JournalsealError::with_kind(
                ErrorCategory::User,
                ErrorKind::KeyDerivation,
                format!(
                    "scrypt r must be at most {} and p at most {}, got r={} p={}",
                    Self::MAX_R,
                    Self::MAX_P,
                    self.r,
                    self.p
                ),
            ));
        }
        if self.memory_bytes() > Self::MAX_MEMORY {
            return Err(JournalsealError::with_kind(
                ErrorCategory::User,
                ErrorKind::KeyDerivation,
                format!(
                    "scrypt parameters need {} MiB, more than the {} MiB limit",
                    self.memory_bytes() >> 20,
                    Self::MAX_MEMORY >> 20
                ),
            ));
        }
        Ok(())
    }
}

impl Default for KdfParams {
    fn default() -> Self {
        // N = 32768
        Self {
            log_n: 15,
            r: 8,
            p: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub store_dir: PathBuf,
    pub kdf: KdfParams,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            store_dir: PathBuf::from(DEFAULT_STORE_DIR),
            kdf: KdfParams::default(),
        }
    }
}

impl ClientConfig {
    /// Opens an empty session backed by the configured key directory.
    ///
    /// No key material is loaded; call `restore_keys` or `login`.
    pub fn open_session(&self) -> Result<KeySession<FileKeyStore>> {
        self.kdf.validate()?;
        Ok(KeySession::with_kdf_params(
            FileKeyStore::new(&self.store_dir),
            self.kdf,
        ))
    }
}

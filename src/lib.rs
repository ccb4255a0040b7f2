//! Journalseal - client-side encryption core for tasks and diary entries
//!
//! All user-authored text is sealed with AES-256-GCM under a per-device
//! symmetric key before it leaves the client. Keys live in a [`KeySession`]
//! and are persisted password-wrapped (scrypt + AES-256-GCM) in a
//! [`KeyStore`].

#![forbid(unsafe_code)]

pub mod codec;
pub mod config;
pub mod envelope;
pub mod error;
pub mod keys;
pub mod keystore;
pub mod keywrap;
pub mod passphrase;
pub mod record;
pub mod session;

pub use envelope::Envelope;
pub use error::{ErrorCategory, ErrorKind, JournalsealError, Result};
pub use keys::{KeyPair, PublicKey, SymmetricKey};
pub use keystore::{FileKeyStore, KeyStore, MemoryKeyStore};
pub use record::{DecryptedRecord, EncryptedRecord, FieldStatus, RecordKind};
pub use session::{KeySession, LoginOutcome};

//! Key session: owns the key slots and their persisted form
//!
//! A `KeySession` is the explicit context every encrypt and decrypt call
//! goes through. It holds at most one identity keypair and one symmetric
//! content key. Operations that replace or drop keys take `&mut self`;
//! encryption and decryption borrow the key through `&self`, so a key can
//! never change underneath an in-flight batch of record decryptions.

use crate::codec;
use crate::config::KdfParams;
use crate::envelope::{self, Envelope};
use crate::error::{ErrorCategory, ErrorKind, JournalsealError, Result};
use crate::keys::{KeyPair, PublicKey, SymmetricKey};
use crate::keystore::{KeyStore, PRIVATE_KEY_ENTRY, SYMMETRIC_KEY_ENTRY};
use crate::keywrap;
use crate::record::{self, DecryptedRecord, EncryptedRecord, RecordKind};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use tracing::{debug, warn};
use zeroize::Zeroizing;

/// What `login` had to do to establish keys on this device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    /// Stored keys were unwrapped and loaded.
    Restored,
    /// Nothing was stored (first login on this device); fresh keys were
    /// generated and stored. The public key must be re-published.
    Provisioned { public_key: String },
}

pub struct KeySession<S> {
    store: S,
    kdf: KdfParams,
    key_pair: Option<KeyPair>,
    symmetric_key: Option<SymmetricKey>,
}

impl<S: KeyStore> KeySession<S> {
    /// Creates a session with no keys loaded and default KDF cost.
    pub fn new(store: S) -> Self {
        Self::with_kdf_params(store, KdfParams::default())
    }

    pub fn with_kdf_params(store: S, kdf: KdfParams) -> Self {
        Self {
            store,
            kdf,
            key_pair: None,
            symmetric_key: None,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn key_pair(&self) -> Option<&KeyPair> {
        self.key_pair.as_ref()
    }

    pub fn symmetric_key(&self) -> Option<&SymmetricKey> {
        self.symmetric_key.as_ref()
    }

    /// Generates a fresh RSA-OAEP keypair, replacing any loaded one.
    pub fn generate_key_pair(&mut self) -> Result<&KeyPair> {
        let pair = KeyPair::generate()?;
        debug!("generated identity keypair");
        Ok(&*self.key_pair.insert(pair))
    }

    /// Generates a fresh content key, replacing any loaded one.
    ///
    /// Envelopes sealed under the previous key become undecryptable in
    /// this session.
    pub fn generate_symmetric_key(&mut self) -> Result<&SymmetricKey> {
        let key = SymmetricKey::generate()?;
        debug!(kid = %key.key_id(), "generated symmetric key");
        Ok(&*self.symmetric_key.insert(key))
    }

    /// Serializes `key`, or the session's own public key, to base64 SPKI.
    pub fn export_public_key(&self, key: Option<&PublicKey>) -> Result<String> {
        let key = key
            .or_else(|| self.key_pair.as_ref().map(KeyPair::public_key))
            .ok_or_else(|| {
                JournalsealError::with_kind(
                    ErrorCategory::User,
                    ErrorKind::Export,
                    "no public key available to export",
                )
            })?;
        key.to_spki_base64()
    }

    /// Parses a base64 SPKI public key, e.g. one fetched from a profile.
    pub fn import_public_key(encoded: &str) -> Result<PublicKey> {
        PublicKey::from_spki_base64(encoded)
    }

    /// Wraps both keys under `password` and persists them.
    ///
    /// Returns the public key string for upload. If the second entry cannot
    /// be written, the first is put back to its previous value, so the store
    /// never holds a private key and a symmetric key from different pairs.
    pub fn store_keys(&mut self, password: &[u8]) -> Result<String> {
        let (Some(pair), Some(symmetric)) = (&self.key_pair, &self.symmetric_key) else {
            return Err(JournalsealError::with_kind(
                ErrorCategory::User,
                ErrorKind::MissingKey,
                "keys not generated",
            ));
        };

        let private_der = pair.to_pkcs8_der()?;
        let wrapped_private = keywrap::wrap(password, &private_der, &self.kdf)
            .map_err(|e| e.with_context("failed to wrap private key"))?;
        let wrapped_symmetric = keywrap::wrap(password, symmetric.as_bytes(), &self.kdf)
            .map_err(|e| e.with_context("failed to wrap symmetric key"))?;
        let public_key = pair.public_key().to_spki_base64()?;

        let previous_private = self.store.get(PRIVATE_KEY_ENTRY)?;
        self.store.set(PRIVATE_KEY_ENTRY, &wrapped_private)?;
        if let Err(e) = self.store.set(SYMMETRIC_KEY_ENTRY, &wrapped_symmetric) {
            let rollback = match &previous_private {
                Some(previous) => self.store.set(PRIVATE_KEY_ENTRY, previous),
                None => self.store.remove(PRIVATE_KEY_ENTRY),
            };
            if let Err(cleanup) = rollback {
                warn!(error = %cleanup, "failed to roll back private key entry");
            }
            return Err(e.with_context("failed to persist symmetric key"));
        }

        debug!(kid = %symmetric.key_id(), "stored wrapped keys");
        Ok(public_key)
    }

    /// Loads persisted keys into the session.
    ///
    /// Returns `Ok(false)` when either entry is absent; the session is then
    /// left with no keys loaded. Material that is present but cannot be
    /// unwrapped or imported is an error: the caller must not paper over it
    /// with fresh keys, or every existing envelope would be orphaned.
    pub fn restore_keys(&mut self, password: &[u8]) -> Result<bool> {
        let private_entry = self.store.get(PRIVATE_KEY_ENTRY)?;
        let symmetric_entry = self.store.get(SYMMETRIC_KEY_ENTRY)?;
        let (Some(private_entry), Some(symmetric_entry)) = (private_entry, symmetric_entry) else {
            debug!("no stored keys to restore");
            self.key_pair = None;
            self.symmetric_key = None;
            return Ok(false);
        };

        let private_der = open_entry(password, PRIVATE_KEY_ENTRY, &private_entry)?;
        let symmetric_raw = open_entry(password, SYMMETRIC_KEY_ENTRY, &symmetric_entry)?;

        let pair = KeyPair::from_pkcs8_der(&private_der)
            .map_err(|e| e.with_context("failed to import stored private key"))?;
        let symmetric = SymmetricKey::from_bytes(&symmetric_raw)
            .map_err(|e| e.with_context("failed to import stored symmetric key"))?;

        debug!(kid = %symmetric.key_id(), "restored keys");
        self.key_pair = Some(pair);
        self.symmetric_key = Some(symmetric);
        Ok(true)
    }

    /// Drops both keys from memory and from the store. Idempotent.
    ///
    /// Both removals are attempted; the first failure is returned.
    pub fn clear_keys(&mut self) -> Result<()> {
        self.key_pair = None;
        self.symmetric_key = None;
        let private = self.store.remove(PRIVATE_KEY_ENTRY);
        let symmetric = self.store.remove(SYMMETRIC_KEY_ENTRY);
        private.and(symmetric)?;
        debug!("cleared keys");
        Ok(())
    }

    /// Account creation: fresh keys, persisted, public key returned for upload.
    pub fn register(&mut self, password: &[u8]) -> Result<String> {
        self.generate_key_pair()?;
        self.generate_symmetric_key()?;
        self.store_keys(password)
    }

    /// Session start: restore, or provision keys on a device that has none.
    ///
    /// Keys are only provisioned when neither entry is stored. A lone entry
    /// may be the only copy of the content key and is never overwritten.
    pub fn login(&mut self, password: &[u8]) -> Result<LoginOutcome> {
        if self.restore_keys(password)? {
            return Ok(LoginOutcome::Restored);
        }
        for entry in [PRIVATE_KEY_ENTRY, SYMMETRIC_KEY_ENTRY] {
            if self.store.get(entry)?.is_some() {
                return Err(JournalsealError::with_kind(
                    ErrorCategory::User,
                    ErrorKind::MissingKey,
                    format!(
                        "stored keys are incomplete: only {} is present; refusing to replace it",
                        entry
                    ),
                ));
            }
        }
        let public_key = self.register(password)?;
        Ok(LoginOutcome::Provisioned { public_key })
    }

    pub fn logout(&mut self) -> Result<()> {
        self.clear_keys()
    }

    /// Encrypts under the session key, generating one first if none is
    /// loaded. A generated key is not persisted; call `store_keys`.
    pub fn encrypt<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<Envelope> {
        if self.symmetric_key.is_none() {
            self.generate_symmetric_key()?;
        }
        self.try_encrypt(value)
    }

    /// Encrypts under the session key; never generates one.
    pub fn try_encrypt<T: Serialize + ?Sized>(&self, value: &T) -> Result<Envelope> {
        envelope::encrypt(self.require_symmetric_key()?, value)
    }

    pub fn decrypt<T: DeserializeOwned>(&self, envelope: &Envelope) -> Result<T> {
        envelope::decrypt(self.require_symmetric_key()?, envelope)
    }

    pub fn encrypt_record(
        &self,
        kind: RecordKind,
        fields: &BTreeMap<String, String>,
    ) -> Result<EncryptedRecord> {
        record::encrypt_fields(self.require_symmetric_key()?, kind, fields)
    }

    /// Never fails; see [`record::decrypt_fields`].
    pub fn decrypt_record(&self, kind: RecordKind, stored: &EncryptedRecord) -> DecryptedRecord {
        record::decrypt_fields(self.symmetric_key.as_ref(), kind, stored)
    }

    pub fn decrypt_page(&self, kind: RecordKind, stored: &[EncryptedRecord]) -> Vec<DecryptedRecord> {
        record::decrypt_page(self.symmetric_key.as_ref(), kind, stored)
    }

    fn require_symmetric_key(&self) -> Result<&SymmetricKey> {
        self.symmetric_key.as_ref().ok_or_else(|| {
            JournalsealError::with_kind(
                ErrorCategory::User,
                ErrorKind::MissingKey,
                "no symmetric key loaded in this session",
            )
        })
    }
}

/// Unwraps one stored entry. Entries written by the browser client predate
/// password wrapping and hold the exported key as plain base64.
fn open_entry(password: &[u8], name: &str, entry: &str) -> Result<Zeroizing<Vec<u8>>> {
    if codec::is_armored(entry) {
        return keywrap::unwrap(password, entry)
            .map_err(|e| e.with_context(format!("failed to unwrap {}", name)));
    }

    warn!(entry = name, "stored key is not password-wrapped; store keys again to wrap it");
    codec::from_base64(entry.trim())
        .map(Zeroizing::new)
        .map_err(|e| {
            JournalsealError::with_kind_and_source(
                ErrorCategory::User,
                ErrorKind::Import,
                format!("stored {} is neither wrapped nor valid base64", name),
                e,
            )
        })
}

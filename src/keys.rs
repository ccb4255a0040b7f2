//! Key material: the RSA-OAEP identity keypair and the AES-256-GCM content key
//!
//! Portable forms:
//! - public key: DER SubjectPublicKeyInfo, base64
//! - private key: DER PKCS#8
//! - symmetric key: raw 32 bytes

use crate::codec;
use crate::error::{ErrorCategory, ErrorKind, JournalsealError, Result};
use rand::RngCore;
use rand::rngs::OsRng;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey};
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// RSA modulus length in bits
pub const RSA_MODULUS_BITS: usize = 2048;

/// Length of the symmetric content key in bytes
pub const SYMMETRIC_KEY_LEN: usize = 32;

/// Number of SHA-256 bytes kept for a key identifier
const KEY_ID_LEN: usize = 8;

/// Public half of the identity keypair.
///
/// Uploaded to the account profile; reserved for key exchange between
/// devices, nothing in the record flow encrypts to it yet.
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey(RsaPublicKey);

impl PublicKey {
    /// Serializes to base64 DER SubjectPublicKeyInfo.
    pub fn to_spki_base64(&self) -> Result<String> {
        let der = self.0.to_public_key_der().map_err(|e| {
            JournalsealError::with_kind(
                ErrorCategory::Internal,
                ErrorKind::Export,
                format!("failed to encode public key: {}", e),
            )
        })?;
        Ok(codec::to_base64(der.as_bytes()))
    }

    /// Parses base64 DER SubjectPublicKeyInfo.
    pub fn from_spki_base64(encoded: &str) -> Result<Self> {
        let der = codec::from_base64(encoded).map_err(|e| import_error(e, "public key"))?;
        let key = RsaPublicKey::from_public_key_der(&der).map_err(|e| {
            JournalsealError::with_kind(
                ErrorCategory::User,
                ErrorKind::Import,
                format!("public key is not an RSA SubjectPublicKeyInfo: {}", e),
            )
        })?;
        check_modulus(key.size())?;
        Ok(Self(key))
    }

    pub fn modulus_bits(&self) -> usize {
        self.0.size() * 8
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublicKey")
            .field("modulus_bits", &self.modulus_bits())
            .finish()
    }
}

/// RSA-OAEP (SHA-256) identity keypair.
#[derive(Clone)]
pub struct KeyPair {
    private: RsaPrivateKey,
    public: PublicKey,
}

impl KeyPair {
    pub fn generate() -> Result<Self> {
        let private = RsaPrivateKey::new(&mut OsRng, RSA_MODULUS_BITS).map_err(|e| {
            JournalsealError::with_kind_and_source(
                ErrorCategory::Internal,
                ErrorKind::KeyGeneration,
                format!("RSA key generation failed: {}", e),
                e,
            )
        })?;
        Ok(Self::from_private(private))
    }

    fn from_private(private: RsaPrivateKey) -> Self {
        let public = PublicKey(RsaPublicKey::from(&private));
        Self { private, public }
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    /// Exports the private key as DER PKCS#8.
    pub fn to_pkcs8_der(&self) -> Result<Zeroizing<Vec<u8>>> {
        let document = self.private.to_pkcs8_der().map_err(|e| {
            JournalsealError::with_kind(
                ErrorCategory::Internal,
                ErrorKind::Export,
                format!("failed to encode private key: {}", e),
            )
        })?;
        Ok(Zeroizing::new(document.as_bytes().to_vec()))
    }

    /// Rebuilds the keypair from DER PKCS#8; the public half is derived.
    pub fn from_pkcs8_der(der: &[u8]) -> Result<Self> {
        let private = RsaPrivateKey::from_pkcs8_der(der).map_err(|e| {
            JournalsealError::with_kind(
                ErrorCategory::User,
                ErrorKind::Import,
                format!("private key is not an RSA PKCS#8 document: {}", e),
            )
        })?;
        check_modulus(private.size())?;
        Ok(Self::from_private(private))
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &self.public)
            .finish_non_exhaustive()
    }
}

/// AES-256-GCM content key. Wiped from memory on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey {
    bytes: [u8; SYMMETRIC_KEY_LEN],
}

impl SymmetricKey {
    pub fn generate() -> Result<Self> {
        let mut bytes = [0u8; SYMMETRIC_KEY_LEN];
        OsRng.try_fill_bytes(&mut bytes).map_err(|e| {
            JournalsealError::with_kind_and_source(
                ErrorCategory::Internal,
                ErrorKind::KeyGeneration,
                format!("random source unavailable: {}", e),
                e,
            )
        })?;
        Ok(Self { bytes })
    }

    /// Imports a raw key.
    pub fn from_bytes(raw: &[u8]) -> Result<Self> {
        let bytes: [u8; SYMMETRIC_KEY_LEN] = raw.try_into().map_err(|_| {
            JournalsealError::with_kind(
                ErrorCategory::User,
                ErrorKind::Import,
                format!(
                    "symmetric key must be {} bytes, got {}",
                    SYMMETRIC_KEY_LEN,
                    raw.len()
                ),
            )
        })?;
        Ok(Self { bytes })
    }

    /// Raw key bytes, for export and for the cipher.
    pub fn as_bytes(&self) -> &[u8; SYMMETRIC_KEY_LEN] {
        &self.bytes
    }

    /// Short stable identifier: base64url of the first 8 bytes of SHA-256
    /// over the raw key. Reveals nothing useful about the key itself.
    pub fn key_id(&self) -> String {
        let digest = Sha256::digest(&self.bytes);
        codec::to_base64url(&digest[..KEY_ID_LEN])
    }
}

impl PartialEq for SymmetricKey {
    fn eq(&self, other: &Self) -> bool {
        self.bytes == other.bytes
    }
}

impl Eq for SymmetricKey {}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SymmetricKey")
            .field("kid", &self.key_id())
            .finish_non_exhaustive()
    }
}

fn check_modulus(size_bytes: usize) -> Result<()> {
    if size_bytes * 8 < RSA_MODULUS_BITS {
        return Err(JournalsealError::with_kind(
            ErrorCategory::User,
            ErrorKind::Import,
            format!(
                "RSA modulus of {} bits is below the required {}",
                size_bytes * 8,
                RSA_MODULUS_BITS
            ),
        ));
    }
    Ok(())
}

fn import_error(err: JournalsealError, what: &str) -> JournalsealError {
    JournalsealError::with_kind_and_source(
        ErrorCategory::User,
        ErrorKind::Import,
        format!("{} is not valid base64", what),
        err,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symmetric_key_from_bytes() {
        let key = SymmetricKey::from_bytes(&[7u8; 32]).unwrap();
        assert_eq!(key.as_bytes(), &[7u8; 32]);

        let err = SymmetricKey::from_bytes(&[7u8; 16]).expect_err("expected length error");
        assert_eq!(err.kind, Some(ErrorKind::Import));
        assert!(err.message().contains("must be 32 bytes, got 16"));
    }

    #[test]
    fn test_generated_symmetric_keys_differ() {
        let a = SymmetricKey::generate().unwrap();
        let b = SymmetricKey::generate().unwrap();
        assert_ne!(a, b);
        assert_ne!(a.key_id(), b.key_id());
    }

    #[test]
    fn test_key_id_known_value() {
        let key = SymmetricKey::from_bytes(&[0x42u8; 32]).unwrap();
        assert_eq!(key.key_id(), "Ql7U5KNrMOo");
    }

    #[test]
    fn test_debug_does_not_leak_key_bytes() {
        let key = SymmetricKey::from_bytes(&[0x42u8; 32]).unwrap();
        let rendered = format!("{:?}", key);
        assert!(rendered.contains("Ql7U5KNrMOo"));
        assert!(!rendered.contains("66"));
    }

    #[test]
    fn test_public_key_bad_base64() {
        let err = PublicKey::from_spki_base64("not base64!").expect_err("expected import error");
        assert_eq!(err.kind, Some(ErrorKind::Import));
    }

    #[test]
    fn test_public_key_not_spki() {
        let err = PublicKey::from_spki_base64(&codec::to_base64(b"definitely not DER"))
            .expect_err("expected import error");
        assert_eq!(err.kind, Some(ErrorKind::Import));
    }

    #[test]
    fn test_private_key_not_pkcs8() {
        let err = KeyPair::from_pkcs8_der(&[0x30, 0x03, 0x02, 0x01, 0x00])
            .expect_err("expected import error");
        assert_eq!(err.kind, Some(ErrorKind::Import));
    }

    #[test]
    fn test_keypair_export_import() {
        let pair = KeyPair::generate().unwrap();
        assert_eq!(pair.public_key().modulus_bits(), 2048);

        let der = pair.to_pkcs8_der().unwrap();
        let restored = KeyPair::from_pkcs8_der(&der).unwrap();
        assert_eq!(restored.public_key(), pair.public_key());

        let spki = pair.public_key().to_spki_base64().unwrap();
        let imported = PublicKey::from_spki_base64(&spki).unwrap();
        assert_eq!(&imported, pair.public_key());
    }
}

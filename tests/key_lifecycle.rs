//! Key session lifecycle: store, clear, restore, register, login, logout.

use journalseal::config::KdfParams;
use journalseal::envelope;
use journalseal::keystore::{PRIVATE_KEY_ENTRY, SYMMETRIC_KEY_ENTRY};
use journalseal::passphrase::{ConstantPasswordReader, PasswordReader};
use journalseal::{
    ErrorCategory, ErrorKind, FileKeyStore, JournalsealError, KeySession, KeyStore, LoginOutcome,
    MemoryKeyStore, Result, SymmetricKey, codec,
};
use serde_json::{Value, json};
use tempfile::TempDir;

const FAST: KdfParams = KdfParams {
    log_n: 10,
    r: 8,
    p: 1,
};

fn file_session(dir: &TempDir) -> KeySession<FileKeyStore> {
    KeySession::with_kdf_params(FileKeyStore::new(dir.path().join("keys")), FAST)
}

/// Memory store that fails writes or removals of one chosen entry
#[derive(Default)]
struct FailingStore {
    inner: MemoryKeyStore,
    fail_set: Option<&'static str>,
    fail_remove: Option<&'static str>,
}

impl FailingStore {
    fn injected(name: &str) -> JournalsealError {
        JournalsealError::with_kind(
            ErrorCategory::Internal,
            ErrorKind::Io,
            format!("injected failure on {}", name),
        )
    }
}

impl KeyStore for FailingStore {
    fn get(&self, name: &str) -> Result<Option<String>> {
        self.inner.get(name)
    }

    fn set(&mut self, name: &str, value: &str) -> Result<()> {
        if self.fail_set == Some(name) {
            return Err(Self::injected(name));
        }
        self.inner.set(name, value)
    }

    fn remove(&mut self, name: &str) -> Result<()> {
        if self.fail_remove == Some(name) {
            return Err(Self::injected(name));
        }
        self.inner.remove(name)
    }
}

#[test]
fn test_store_clear_restore() {
    let temp_dir = TempDir::new().unwrap();
    let mut session = file_session(&temp_dir);
    session.generate_key_pair().unwrap();
    session.generate_symmetric_key().unwrap();
    let original: SymmetricKey = session.symmetric_key().unwrap().clone();
    let public_key = session.store_keys(b"correct horse").unwrap();
    let sealed = session.try_encrypt(&json!({"content": "kept"})).unwrap();
    drop(session);

    // A fresh session on the same directory starts empty and restores
    let mut restored = file_session(&temp_dir);
    assert!(restored.symmetric_key().is_none());
    assert!(restored.restore_keys(b"correct horse").unwrap());
    assert_eq!(restored.symmetric_key(), Some(&original));
    assert_eq!(restored.export_public_key(None).unwrap(), public_key);

    let opened: Value = restored.decrypt(&sealed).unwrap();
    assert_eq!(opened, json!({"content": "kept"}));

    // Encrypting under the restored key decrypts under the captured original
    let fresh = restored.try_encrypt("after restore").unwrap();
    let opened: String = envelope::decrypt(&original, &fresh).unwrap();
    assert_eq!(opened, "after restore");

    // Clearing removes the stored entries too
    restored.clear_keys().unwrap();
    assert!(restored.symmetric_key().is_none());
    assert!(!file_session(&temp_dir).restore_keys(b"correct horse").unwrap());
}

#[test]
fn test_restore_without_store_returns_false() {
    let mut session = KeySession::with_kdf_params(MemoryKeyStore::new(), FAST);
    assert!(!session.restore_keys(b"anything").unwrap());
    assert!(session.symmetric_key().is_none());

    let err = session.try_encrypt("x").expect_err("no key may be active");
    assert_eq!(err.kind, Some(ErrorKind::MissingKey));
}

#[test]
fn test_restore_with_wrong_password() {
    let mut session = KeySession::with_kdf_params(MemoryKeyStore::new(), FAST);
    session.register(b"right").unwrap();
    let store = session.store().clone();

    let mut other = KeySession::with_kdf_params(store, FAST);
    let err = other
        .restore_keys(b"wrong")
        .expect_err("expected authentication failure");
    assert_eq!(err.kind, Some(ErrorKind::AuthenticationFailed));
    assert!(other.symmetric_key().is_none());
    assert!(other.key_pair().is_none());
}

#[test]
fn test_stored_entries_are_wrapped() {
    let mut session = KeySession::with_kdf_params(MemoryKeyStore::new(), FAST);
    session.register(b"pw").unwrap();

    for entry in [PRIVATE_KEY_ENTRY, SYMMETRIC_KEY_ENTRY] {
        let stored = session.store().get(entry).unwrap().unwrap();
        assert!(stored.starts_with("jsealkey1:"), "{} not wrapped", entry);
    }
}

#[test]
fn test_restore_legacy_plaintext_entries() {
    let mut writer = KeySession::with_kdf_params(MemoryKeyStore::new(), FAST);
    writer.generate_key_pair().unwrap();
    writer.generate_symmetric_key().unwrap();
    let pair = writer.key_pair().unwrap();
    let key = writer.symmetric_key().unwrap();

    // Entries as the browser client wrote them: unwrapped base64
    let mut store = MemoryKeyStore::new();
    store
        .set(
            PRIVATE_KEY_ENTRY,
            &codec::to_base64(&pair.to_pkcs8_der().unwrap()),
        )
        .unwrap();
    store
        .set(SYMMETRIC_KEY_ENTRY, &codec::to_base64(key.as_bytes()))
        .unwrap();

    let mut session = KeySession::with_kdf_params(store, FAST);
    assert!(session.restore_keys(b"unused").unwrap());
    assert_eq!(session.symmetric_key(), Some(key));

    // Storing again upgrades both entries to the wrapped form
    session.store_keys(b"now wrapped").unwrap();
    assert!(codec::is_armored(
        &session.store().get(SYMMETRIC_KEY_ENTRY).unwrap().unwrap()
    ));
}

#[test]
fn test_corrupt_entry_is_an_error_not_a_fresh_key() {
    let mut session = KeySession::with_kdf_params(MemoryKeyStore::new(), FAST);
    session.register(b"pw").unwrap();
    let mut store = session.store().clone();
    store.set(SYMMETRIC_KEY_ENTRY, "jsealkey1:AAAA").unwrap();

    let mut broken = KeySession::with_kdf_params(store, FAST);
    let err = broken.login(b"pw").expect_err("corrupt entry must surface");
    assert_eq!(err.kind, Some(ErrorKind::WrappedKeyFormat));
    assert!(broken.symmetric_key().is_none());
}

#[test]
fn test_register_login_logout() {
    let temp_dir = TempDir::new().unwrap();

    let mut password = ConstantPasswordReader::new(b"pw".to_vec());

    let mut device = file_session(&temp_dir);
    let published = device.register(&password.read_password().unwrap()).unwrap();
    let sealed = device.try_encrypt(&json!({"title": "Buy milk"})).unwrap();

    let mut next_start = file_session(&temp_dir);
    assert_eq!(
        next_start.login(&password.read_password().unwrap()).unwrap(),
        LoginOutcome::Restored
    );
    assert_eq!(next_start.export_public_key(None).unwrap(), published);
    let opened: Value = next_start.decrypt(&sealed).unwrap();
    assert_eq!(opened, json!({"title": "Buy milk"}));

    next_start.logout().unwrap();
    assert!(next_start.symmetric_key().is_none());
    assert!(next_start.key_pair().is_none());
    assert_eq!(next_start.store().get(PRIVATE_KEY_ENTRY).unwrap(), None);
    assert_eq!(next_start.store().get(SYMMETRIC_KEY_ENTRY).unwrap(), None);

    // Logging out twice is harmless
    next_start.logout().unwrap();
}

#[test]
fn test_login_on_new_device_provisions() {
    let temp_dir = TempDir::new().unwrap();
    let mut session = file_session(&temp_dir);

    let outcome = session.login(b"pw").unwrap();
    let LoginOutcome::Provisioned { public_key } = outcome else {
        panic!("expected provisioning on an empty store, got {:?}", outcome);
    };
    assert_eq!(session.export_public_key(None).unwrap(), public_key);
    assert!(session.symmetric_key().is_some());

    let mut again = file_session(&temp_dir);
    assert_eq!(again.login(b"pw").unwrap(), LoginOutcome::Restored);
}

#[test]
fn test_public_key_import_export() {
    let mut session = KeySession::with_kdf_params(MemoryKeyStore::new(), FAST);
    session.generate_key_pair().unwrap();
    let exported = session.export_public_key(None).unwrap();

    let imported = KeySession::<MemoryKeyStore>::import_public_key(&exported).unwrap();
    assert_eq!(session.export_public_key(Some(&imported)).unwrap(), exported);

    let err = KeySession::<MemoryKeyStore>::import_public_key("bm90IGEga2V5")
        .expect_err("expected import error");
    assert_eq!(err.kind, Some(ErrorKind::Import));
}

#[test]
fn test_regenerating_symmetric_key_orphans_old_envelopes() {
    let mut session = KeySession::with_kdf_params(MemoryKeyStore::new(), FAST);
    let sealed = session.encrypt("first key").unwrap();
    session.generate_symmetric_key().unwrap();

    let err = session
        .decrypt::<String>(&sealed)
        .expect_err("old envelope must not open under a new key");
    assert_eq!(err.kind, Some(ErrorKind::AuthenticationFailed));
}

#[test]
fn test_login_with_lone_symmetric_entry_keeps_it() {
    let legacy = SymmetricKey::generate().unwrap();
    let mut store = MemoryKeyStore::new();
    store
        .set(SYMMETRIC_KEY_ENTRY, &codec::to_base64(legacy.as_bytes()))
        .unwrap();

    let sealed = envelope::encrypt(&legacy, "written before the private key was lost").unwrap();

    let mut session = KeySession::with_kdf_params(store, FAST);
    let err = session.login(b"pw").expect_err("expected incomplete stored keys");
    assert_eq!(err.kind, Some(ErrorKind::MissingKey));
    assert!(session.symmetric_key().is_none());
    assert!(session.key_pair().is_none());

    // The lone entry is untouched and still opens old envelopes
    let stored = session.store().get(SYMMETRIC_KEY_ENTRY).unwrap().unwrap();
    assert_eq!(stored, codec::to_base64(legacy.as_bytes()));
    assert_eq!(session.store().get(PRIVATE_KEY_ENTRY).unwrap(), None);
    let key = SymmetricKey::from_bytes(&codec::from_base64(&stored).unwrap()).unwrap();
    let opened: String = envelope::decrypt(&key, &sealed).unwrap();
    assert_eq!(opened, "written before the private key was lost");
}

#[test]
fn test_login_with_lone_private_entry_is_an_error() {
    let mut source = KeySession::with_kdf_params(MemoryKeyStore::new(), FAST);
    source.register(b"pw").unwrap();
    let private_entry = source.store().get(PRIVATE_KEY_ENTRY).unwrap().unwrap();

    let mut store = MemoryKeyStore::new();
    store.set(PRIVATE_KEY_ENTRY, &private_entry).unwrap();
    let mut session = KeySession::with_kdf_params(store, FAST);

    let err = session.login(b"pw").expect_err("expected incomplete stored keys");
    assert_eq!(err.kind, Some(ErrorKind::MissingKey));
    assert_eq!(
        session.store().get(PRIVATE_KEY_ENTRY).unwrap(),
        Some(private_entry)
    );
    assert_eq!(session.store().get(SYMMETRIC_KEY_ENTRY).unwrap(), None);
}

#[test]
fn test_failed_overwrite_keeps_previous_pair() {
    let mut first = KeySession::with_kdf_params(MemoryKeyStore::new(), FAST);
    first.register(b"pw").unwrap();
    let original = first.symmetric_key().unwrap().clone();
    let sealed = first.try_encrypt(&json!({"content": "old"})).unwrap();
    let before = first.store().clone();

    let mut session = KeySession::with_kdf_params(
        FailingStore {
            inner: before.clone(),
            fail_set: Some(SYMMETRIC_KEY_ENTRY),
            fail_remove: None,
        },
        FAST,
    );
    session.generate_key_pair().unwrap();
    session.generate_symmetric_key().unwrap();
    let err = session.store_keys(b"pw").expect_err("expected injected failure");
    assert_eq!(err.kind, Some(ErrorKind::Io));

    // The private key entry was rolled back to the earlier pair
    for entry in [PRIVATE_KEY_ENTRY, SYMMETRIC_KEY_ENTRY] {
        assert_eq!(
            session.store().get(entry).unwrap(),
            before.get(entry).unwrap()
        );
    }

    let mut restored = KeySession::with_kdf_params(session.store().inner.clone(), FAST);
    assert!(restored.restore_keys(b"pw").unwrap());
    assert_eq!(restored.symmetric_key(), Some(&original));
    let opened: Value = restored.decrypt(&sealed).unwrap();
    assert_eq!(opened, json!({"content": "old"}));
}

#[test]
fn test_failed_first_store_leaves_nothing_behind() {
    let mut session = KeySession::with_kdf_params(
        FailingStore {
            fail_set: Some(SYMMETRIC_KEY_ENTRY),
            ..FailingStore::default()
        },
        FAST,
    );
    session.register(b"pw").expect_err("expected injected failure");
    assert!(session.store().inner.is_empty());
}

#[test]
fn test_clear_keys_attempts_both_removals() {
    let mut seeded = KeySession::with_kdf_params(MemoryKeyStore::new(), FAST);
    seeded.register(b"pw").unwrap();

    let mut session = KeySession::with_kdf_params(
        FailingStore {
            inner: seeded.store().clone(),
            fail_set: None,
            fail_remove: Some(PRIVATE_KEY_ENTRY),
        },
        FAST,
    );
    assert!(session.restore_keys(b"pw").unwrap());

    let err = session.clear_keys().expect_err("expected injected failure");
    assert_eq!(err.kind, Some(ErrorKind::Io));
    assert!(err.message().contains(PRIVATE_KEY_ENTRY));
    assert!(session.symmetric_key().is_none());
    assert!(session.key_pair().is_none());
    assert_eq!(session.store().get(SYMMETRIC_KEY_ENTRY).unwrap(), None);
    assert!(session.store().get(PRIVATE_KEY_ENTRY).unwrap().is_some());
}

#[test]
fn test_restore_on_empty_store_drops_generated_key() {
    let temp_dir = TempDir::new().unwrap();
    let mut session = file_session(&temp_dir);
    let sealed = session.encrypt("never stored").unwrap();
    assert!(session.symmetric_key().is_some());

    assert!(!session.restore_keys(b"pw").unwrap());
    assert!(session.symmetric_key().is_none());
    let err = session
        .decrypt::<String>(&sealed)
        .expect_err("expected missing key");
    assert_eq!(err.kind, Some(ErrorKind::MissingKey));
}

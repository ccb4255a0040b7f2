//! Field-level encryption of task and diary records
//!
//! Each non-empty field is sealed in its own envelope as `{"<field>": text}`.
//! The record carries one public nonce (`iv` on the wire): the nonce of the
//! first non-empty field in schema order. Other non-empty fields carry their
//! own nonce; empty fields hold an empty ciphertext and nothing is ever
//! encrypted under a shared nonce.
//!
//! Reads never fail as a whole. A field that cannot be opened is replaced by
//! a sentinel string and its failure is reported in [`DecryptedRecord::status`].

use crate::codec;
use crate::envelope::{self, Envelope};
use crate::error::{ErrorCategory, ErrorKind, JournalsealError, Result};
use crate::keys::SymmetricKey;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::warn;

/// Shown in place of a title that could not be decrypted
pub const TITLE_SENTINEL: &str = "[Decryption Error]";

/// Shown in place of a body (content, description) that could not be decrypted
pub const BODY_SENTINEL: &str = "[Unable to decrypt]";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Task,
    DiaryEntry,
}

impl RecordKind {
    pub const ALL: [RecordKind; 2] = [RecordKind::Task, RecordKind::DiaryEntry];

    /// Whether `name` is an encrypted field of any record kind.
    pub fn is_schema_field(name: &str) -> bool {
        Self::ALL
            .iter()
            .any(|kind| kind.fields().iter().any(|field| *field == name))
    }

    /// Encrypted fields in schema order. The first one is primary.
    pub fn fields(self) -> &'static [&'static str] {
        match self {
            RecordKind::Task => &["title", "description"],
            RecordKind::DiaryEntry => &["content", "title"],
        }
    }

    /// Placeholder text for a field that failed to decrypt.
    pub fn sentinel(field: &str) -> &'static str {
        if field == "title" {
            TITLE_SENTINEL
        } else {
            BODY_SENTINEL
        }
    }
}

/// One encrypted field as stored by the CRUD layer.
///
/// Older records store a field as a bare ciphertext string that uses the
/// record nonce; both forms are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "FieldRepr")]
pub struct EncryptedField {
    pub ciphertext: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum FieldRepr {
    Bare(String),
    Sealed {
        ciphertext: String,
        #[serde(default)]
        nonce: Option<String>,
    },
}

impl From<FieldRepr> for EncryptedField {
    fn from(repr: FieldRepr) -> Self {
        match repr {
            FieldRepr::Bare(ciphertext) => Self {
                ciphertext,
                nonce: None,
            },
            FieldRepr::Sealed { ciphertext, nonce } => Self { ciphertext, nonce },
        }
    }
}

/// Encrypted form of one task or diary entry.
///
/// Serialized flat: `{"iv": ..., "kid": ..., "<field>": ...}`. Only names
/// that are encrypted fields of some record kind are kept on parse; CRUD
/// metadata such as `_id` or `date` is dropped even when it is a string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawRecord")]
pub struct EncryptedRecord {
    #[serde(rename = "iv")]
    pub nonce: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    #[serde(flatten)]
    pub fields: BTreeMap<String, EncryptedField>,
}

#[derive(Deserialize)]
struct RawRecord {
    iv: String,
    #[serde(default)]
    kid: Option<String>,
    #[serde(flatten)]
    rest: BTreeMap<String, Value>,
}

impl From<RawRecord> for EncryptedRecord {
    fn from(raw: RawRecord) -> Self {
        let fields = raw
            .rest
            .into_iter()
            .filter(|(name, _)| RecordKind::is_schema_field(name))
            .filter_map(|(name, value)| {
                serde_json::from_value::<EncryptedField>(value)
                    .ok()
                    .map(|field| (name, field))
            })
            .collect();
        Self {
            nonce: raw.iv,
            kid: raw.kid,
            fields,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldStatus {
    Decrypted,
    Empty,
    Failed(ErrorKind),
}

/// Plaintext view of a record, with a status per schema field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecryptedRecord {
    pub fields: BTreeMap<String, String>,
    pub status: BTreeMap<String, FieldStatus>,
}

impl DecryptedRecord {
    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }

    /// True when no field failed.
    pub fn is_intact(&self) -> bool {
        !self
            .status
            .values()
            .any(|status| matches!(status, FieldStatus::Failed(_)))
    }
}

/// Encrypt any subset of a record's fields.
pub fn encrypt_fields(
    key: &SymmetricKey,
    kind: RecordKind,
    fields: &BTreeMap<String, String>,
) -> Result<EncryptedRecord> {
    if let Some(unknown) = fields
        .keys()
        .find(|name| !kind.fields().iter().any(|field| *field == name.as_str()))
    {
        return Err(JournalsealError::new(
            ErrorCategory::User,
            format!("{:?} records have no encrypted field {:?}", kind, unknown),
        ));
    }

    let mut record_nonce = None;
    let mut encrypted = BTreeMap::new();
    for &name in kind.fields() {
        let Some(plaintext) = fields.get(name) else {
            continue;
        };
        if plaintext.is_empty() {
            encrypted.insert(
                name.to_string(),
                EncryptedField {
                    ciphertext: String::new(),
                    nonce: None,
                },
            );
            continue;
        }

        let sealed = envelope::encrypt(key, &BTreeMap::from([(name, plaintext.as_str())]))?;
        let nonce = if record_nonce.is_none() {
            record_nonce = Some(sealed.nonce);
            None
        } else {
            Some(sealed.nonce)
        };
        encrypted.insert(
            name.to_string(),
            EncryptedField {
                ciphertext: sealed.ciphertext,
                nonce,
            },
        );
    }

    let nonce = match record_nonce {
        Some(nonce) => nonce,
        None => codec::to_base64(&envelope::generate_nonce()?),
    };

    Ok(EncryptedRecord {
        nonce,
        kid: Some(key.key_id()),
        fields: encrypted,
    })
}

/// Decrypt every schema field of a stored record. Never fails.
///
/// A missing key marks every non-empty field as failed with `MissingKey`.
pub fn decrypt_fields(
    key: Option<&SymmetricKey>,
    kind: RecordKind,
    stored: &EncryptedRecord,
) -> DecryptedRecord {
    let mut fields = BTreeMap::new();
    let mut status = BTreeMap::new();

    for &name in kind.fields() {
        let field = match stored.fields.get(name) {
            Some(field) if !field.ciphertext.is_empty() => field,
            _ => {
                fields.insert(name.to_string(), String::new());
                status.insert(name.to_string(), FieldStatus::Empty);
                continue;
            }
        };

        match open_field(key, name, field, stored) {
            Ok(plaintext) => {
                fields.insert(name.to_string(), plaintext);
                status.insert(name.to_string(), FieldStatus::Decrypted);
            }
            Err(e) => {
                let kind_tag = e.kind.unwrap_or(ErrorKind::InternalInvariant);
                warn!(field = name, kind = ?kind_tag, error = %e, "field could not be decrypted");
                fields.insert(name.to_string(), RecordKind::sentinel(name).to_string());
                status.insert(name.to_string(), FieldStatus::Failed(kind_tag));
            }
        }
    }

    DecryptedRecord { fields, status }
}

/// Decrypt a fetched page of records. One bad record never affects another.
pub fn decrypt_page(
    key: Option<&SymmetricKey>,
    kind: RecordKind,
    stored: &[EncryptedRecord],
) -> Vec<DecryptedRecord> {
    stored
        .iter()
        .map(|record| decrypt_fields(key, kind, record))
        .collect()
}

fn open_field(
    key: Option<&SymmetricKey>,
    name: &str,
    field: &EncryptedField,
    stored: &EncryptedRecord,
) -> Result<String> {
    let key = key.ok_or_else(|| {
        JournalsealError::with_kind(
            ErrorCategory::User,
            ErrorKind::MissingKey,
            "no symmetric key loaded in this session",
        )
    })?;
    let sealed = Envelope {
        ciphertext: field.ciphertext.clone(),
        nonce: field.nonce.clone().unwrap_or_else(|| stored.nonce.clone()),
        kid: stored.kid.clone(),
    };

    match envelope::decrypt::<Value>(key, &sealed)? {
        Value::String(text) => Ok(text),
        // Either the field's own `{name: text}` or an older grouped payload
        Value::Object(mut payload) => match payload.remove(name) {
            Some(Value::String(text)) => Ok(text),
            _ => Err(JournalsealError::with_kind(
                ErrorCategory::User,
                ErrorKind::Deserialization,
                format!("decrypted payload has no text for {:?}", name),
            )),
        },
        _ => Err(JournalsealError::with_kind(
            ErrorCategory::User,
            ErrorKind::Deserialization,
            format!("decrypted payload for {:?} is neither text nor an object", name),
        )),
    }
}

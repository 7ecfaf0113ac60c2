//! Encrypted field blobs

use crate::keys::KeyVersion;
use carevault_shared::{PatientId, PhiField};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// XChaCha20-Poly1305, AAD = scheme || key version || context digest
pub const SCHEME_XCHACHA20_POLY1305: u8 = 1;

/// Which record and field a blob belongs to
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FieldContext {
    pub record_id: PatientId,
    pub field: PhiField,
}

impl FieldContext {
    pub fn new(record_id: PatientId, field: PhiField) -> Self {
        Self { record_id, field }
    }

    /// SHA-256 over the length-prefixed record id and field code
    pub fn digest(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(b"carevault.field-context.v1");
        let record = self.record_id.as_str().as_bytes();
        hasher.update((record.len() as u64).to_be_bytes());
        hasher.update(record);
        let field = self.field.code().as_bytes();
        hasher.update((field.len() as u64).to_be_bytes());
        hasher.update(field);
        hasher.finalize().into()
    }
}

/// Stored form of one PHI value
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedField {
    pub scheme: u8,
    pub key_version: KeyVersion,
    /// Hex digest of the [`FieldContext`] the value was sealed for
    pub context_digest: String,
    /// Base64, 24 bytes
    pub nonce: String,
    /// Base64 ciphertext with the Poly1305 tag appended
    pub ciphertext: String,
}

impl fmt::Debug for EncryptedField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptedField")
            .field("scheme", &self.scheme)
            .field("key_version", &self.key_version)
            .field("ciphertext_len", &self.ciphertext.len())
            .finish()
    }
}

/// Keyed, non-reversible hash of a searchable field value
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LookupHash(pub String);

impl LookupHash {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Canonical form fed to the lookup hash
pub fn normalize_for_lookup(field: PhiField, value: &str) -> String {
    match field {
        PhiField::Ssn => value.chars().filter(|c| c.is_ascii_digit()).collect(),
        _ => value.trim().to_lowercase(),
    }
}

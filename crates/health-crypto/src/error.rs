use crate::keys::KeyVersion;
use carevault_shared::PhiField;
use thiserror::Error;

/// Encryption failures. Callers surface all of these to end users as a
/// generic "data unavailable"; the variants are for logs and alerting.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    /// The blob was sealed for a different record or field
    #[error("encrypted field bound to a different record or field")]
    IntegrityError,
    /// Authentication tag or key did not verify
    #[error("decryption failed")]
    DecryptionError,
    #[error("key version {0} unavailable")]
    KeyUnavailable(KeyVersion),
    /// No audit receipt covers this field of this record
    #[error("no audit receipt covers {field}")]
    NotAudited { field: PhiField },
    #[error("key provider timed out")]
    Timeout,
    #[error("unsupported encryption scheme {0}")]
    UnsupportedScheme(u8),
    #[error("malformed encrypted field: {0}")]
    Malformed(String),
    #[error("random source failed: {0}")]
    Random(String),
    #[error("key provider error: {0}")]
    Provider(String),
}

impl CryptoError {
    /// Failures that indicate tampering or a replayed blob
    pub fn is_integrity_failure(&self) -> bool {
        matches!(self, CryptoError::IntegrityError | CryptoError::DecryptionError)
    }
}

pub type CryptoResult<T> = Result<T, CryptoError>;

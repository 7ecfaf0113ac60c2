//! CareVault Field Encryption
//!
//! Every PHI value is sealed individually with XChaCha20-Poly1305. The
//! associated data binds the scheme, the record id, the field name and the
//! key version, so a blob copied into another record or field fails to open.
//!
//! Decryption requires an [`carevault_audit::AuditReceipt`] covering the
//! record and field: without a committed audit entry there is no plaintext.

pub mod error;
pub mod field;
pub mod keys;
pub mod service;

pub use error::{CryptoError, CryptoResult};
pub use field::{normalize_for_lookup, EncryptedField, FieldContext, LookupHash, SCHEME_XCHACHA20_POLY1305};
pub use keys::{should_rotate, DataKey, KeyMetadata, KeyProvider, KeyState, KeyVersion, LocalKeyRing};
pub use service::EncryptionService;

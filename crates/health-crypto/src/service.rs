//! Field-level encryption service

use crate::error::{CryptoError, CryptoResult};
use crate::field::{normalize_for_lookup, EncryptedField, FieldContext, LookupHash, SCHEME_XCHACHA20_POLY1305};
use crate::keys::{should_rotate, DataKey, KeyProvider, KeyVersion};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use carevault_audit::AuditReceipt;
use carevault_shared::{CryptoConfig, PhiField};
use chrono::{DateTime, Utc};
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

type HmacSha256 = Hmac<Sha256>;

const NONCE_LEN: usize = 24;

#[derive(Clone)]
pub struct EncryptionService {
    keys: Arc<dyn KeyProvider>,
    key_timeout: Duration,
    key_max_age: chrono::Duration,
    rotation_lead: chrono::Duration,
}

impl EncryptionService {
    pub fn new(keys: Arc<dyn KeyProvider>, config: &CryptoConfig) -> Self {
        Self {
            keys,
            key_timeout: config.key_timeout(),
            key_max_age: chrono::Duration::days(config.key_max_age_days),
            rotation_lead: chrono::Duration::days(config.rotation_lead_days),
        }
    }

    async fn bounded<T>(&self, call: impl Future<Output = CryptoResult<T>>) -> CryptoResult<T> {
        tokio::time::timeout(self.key_timeout, call)
            .await
            .map_err(|_| CryptoError::Timeout)?
    }

    pub async fn current_key_version(&self) -> CryptoResult<KeyVersion> {
        self.bounded(self.keys.current_key_version()).await
    }

    /// Ask the provider for a new current key version
    pub async fn rotate_key(&self) -> CryptoResult<KeyVersion> {
        self.bounded(self.keys.rotate()).await
    }

    /// Whether the current key is within the rotation lead of its maximum
    /// age at `now`. Keys without creation metadata are never flagged.
    pub async fn rotation_due(&self, now: DateTime<Utc>) -> CryptoResult<bool> {
        let version = self.current_key_version().await?;
        let due = self
            .bounded(self.keys.key_metadata(version))
            .await?
            .map(|meta| should_rotate(meta.created_at, now, self.key_max_age, self.rotation_lead))
            .unwrap_or(false);
        Ok(due)
    }

    /// Seal `plaintext` for `ctx` under the current key version
    pub async fn encrypt(&self, plaintext: &str, ctx: &FieldContext) -> CryptoResult<EncryptedField> {
        let version = self.current_key_version().await?;
        let key = self.bounded(self.keys.get_key(version)).await?;
        seal(&key, version, plaintext.as_bytes(), ctx)
    }

    /// Open a blob for `ctx`. The receipt must cover this record and field,
    /// which means the disclosure is already on the audit chain.
    pub async fn decrypt(
        &self,
        blob: &EncryptedField,
        ctx: &FieldContext,
        receipt: &AuditReceipt,
    ) -> CryptoResult<String> {
        if !receipt.covers(&ctx.record_id, ctx.field) {
            return Err(CryptoError::NotAudited { field: ctx.field });
        }
        let plaintext = self.open(blob, ctx).await?;
        String::from_utf8(plaintext).map_err(|_| CryptoError::Malformed("plaintext is not UTF-8".into()))
    }

    /// Re-encrypt a blob under the current key version without exposing
    /// the plaintext. Blobs already current are returned unchanged.
    pub async fn rewrap(
        &self,
        blob: &EncryptedField,
        ctx: &FieldContext,
        receipt: &AuditReceipt,
    ) -> CryptoResult<EncryptedField> {
        if !receipt.covers(&ctx.record_id, ctx.field) {
            return Err(CryptoError::NotAudited { field: ctx.field });
        }
        let current = self.current_key_version().await?;
        if blob.key_version == current {
            return Ok(blob.clone());
        }
        let plaintext = self.open(blob, ctx).await?;
        let key = self.bounded(self.keys.get_key(current)).await?;
        let rewrapped = seal(&key, current, &plaintext, ctx)?;
        debug!(field = %ctx.field, from = %blob.key_version, to = %current, "field rewrapped");
        Ok(rewrapped)
    }

    /// HMAC-SHA256 of the normalized value under the lookup key, hex encoded
    pub async fn lookup_hash(&self, field: PhiField, value: &str) -> CryptoResult<LookupHash> {
        let key = self.bounded(self.keys.lookup_key()).await?;
        let mut mac = <HmacSha256 as Mac>::new_from_slice(key.as_bytes())
            .map_err(|e| CryptoError::Provider(e.to_string()))?;
        mac.update(field.code().as_bytes());
        mac.update(&[0u8]);
        mac.update(normalize_for_lookup(field, value).as_bytes());
        Ok(LookupHash(hex::encode(mac.finalize().into_bytes())))
    }

    async fn open(&self, blob: &EncryptedField, ctx: &FieldContext) -> CryptoResult<Vec<u8>> {
        if blob.scheme != SCHEME_XCHACHA20_POLY1305 {
            return Err(CryptoError::UnsupportedScheme(blob.scheme));
        }
        let digest = ctx.digest();
        if blob.context_digest != hex::encode(digest) {
            warn!(field = %ctx.field, "encrypted field presented for the wrong context");
            return Err(CryptoError::IntegrityError);
        }

        let nonce = STANDARD
            .decode(&blob.nonce)
            .map_err(|e| CryptoError::Malformed(format!("nonce: {}", e)))?;
        if nonce.len() != NONCE_LEN {
            return Err(CryptoError::Malformed(format!("nonce must be {} bytes", NONCE_LEN)));
        }
        let ciphertext = STANDARD
            .decode(&blob.ciphertext)
            .map_err(|e| CryptoError::Malformed(format!("ciphertext: {}", e)))?;

        let key = self.bounded(self.keys.get_key(blob.key_version)).await?;
        let cipher = XChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
        let aad = associated_data(blob.scheme, blob.key_version, &digest);
        cipher
            .decrypt(
                XNonce::from_slice(&nonce),
                Payload {
                    msg: &ciphertext,
                    aad: &aad,
                },
            )
            .map_err(|_| CryptoError::DecryptionError)
    }
}

fn associated_data(scheme: u8, version: KeyVersion, digest: &[u8; 32]) -> Vec<u8> {
    let mut aad = Vec::with_capacity(1 + 4 + 32);
    aad.push(scheme);
    aad.extend_from_slice(&version.0.to_be_bytes());
    aad.extend_from_slice(digest);
    aad
}

fn seal(key: &DataKey, version: KeyVersion, plaintext: &[u8], ctx: &FieldContext) -> CryptoResult<EncryptedField> {
    let mut nonce = [0u8; NONCE_LEN];
    getrandom::fill(&mut nonce).map_err(|e| CryptoError::Random(e.to_string()))?;

    let digest = ctx.digest();
    let aad = associated_data(SCHEME_XCHACHA20_POLY1305, version, &digest);
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
    let ciphertext = cipher
        .encrypt(
            XNonce::from_slice(&nonce),
            Payload {
                msg: plaintext,
                aad: &aad,
            },
        )
        .map_err(|_| CryptoError::Malformed("encryption failed".into()))?;

    Ok(EncryptedField {
        scheme: SCHEME_XCHACHA20_POLY1305,
        key_version: version,
        context_digest: hex::encode(digest),
        nonce: STANDARD.encode(nonce),
        ciphertext: STANDARD.encode(ciphertext),
    })
}

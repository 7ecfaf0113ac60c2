//! Key versions and the key-provider seam
//!
//! Data keys are versioned. Exactly one version is current and used for new
//! ciphertext; older versions stay available for decryption until retired.
//! The lookup key used for searchable-field hashes is separate and never
//! rotates with data keys, so equality search keeps working across rotations.

use crate::error::{CryptoError, CryptoResult};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyVersion(pub u32);

impl KeyVersion {
    pub fn next(self) -> Self {
        KeyVersion(self.0 + 1)
    }
}

impl fmt::Display for KeyVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// 256-bit key material. Debug output never shows the bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct DataKey([u8; 32]);

impl DataKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        DataKey(bytes)
    }

    /// Fresh key from the OS random source
    pub fn generate() -> CryptoResult<Self> {
        let mut key = [0u8; 32];
        getrandom::fill(&mut key).map_err(|e| CryptoError::Random(e.to_string()))?;
        Ok(DataKey(key))
    }

    pub fn from_hex(s: &str) -> CryptoResult<Self> {
        let bytes = hex::decode(s.trim()).map_err(|e| CryptoError::Provider(format!("invalid key hex: {}", e)))?;
        let array: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CryptoError::Provider("key must be 32 bytes".into()))?;
        Ok(DataKey(array))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for DataKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DataKey(<redacted>)")
    }
}

/// Key-management seam; a KMS client implements this in production
#[async_trait]
pub trait KeyProvider: Send + Sync {
    /// Version used for new ciphertext
    async fn current_key_version(&self) -> CryptoResult<KeyVersion>;

    /// Material for `version`. Destroyed or unknown versions are
    /// `KeyUnavailable`.
    async fn get_key(&self, version: KeyVersion) -> CryptoResult<DataKey>;

    /// Non-rotating key for lookup hashes
    async fn lookup_key(&self) -> CryptoResult<DataKey>;

    /// Creation metadata for `version`. Providers that do not track it
    /// return `None`.
    async fn key_metadata(&self, _version: KeyVersion) -> CryptoResult<Option<KeyMetadata>> {
        Ok(None)
    }

    /// Make a new current version. Providers that rotate inside the KMS
    /// leave this unsupported.
    async fn rotate(&self) -> CryptoResult<KeyVersion> {
        Err(CryptoError::Provider("rotation is managed by the key service".into()))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyState {
    /// Current version: encrypts and decrypts
    Active,
    /// Superseded: decrypts only
    DecryptOnly,
    /// Material destroyed
    Destroyed,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct KeyMetadata {
    pub version: KeyVersion,
    pub state: KeyState,
    pub created_at: DateTime<Utc>,
}

/// Whether a key created at `created_at` is within `lead` of its maximum age
pub fn should_rotate(
    created_at: DateTime<Utc>,
    now: DateTime<Utc>,
    max_age: Duration,
    lead: Duration,
) -> bool {
    now >= created_at + max_age - lead
}

struct RingEntry {
    material: Option<DataKey>,
    state: KeyState,
    created_at: DateTime<Utc>,
}

struct RingState {
    versions: BTreeMap<KeyVersion, RingEntry>,
    current: KeyVersion,
    lookup: DataKey,
}

/// In-process key ring for development, tests and single-node deployments
pub struct LocalKeyRing {
    inner: RwLock<RingState>,
}

impl LocalKeyRing {
    /// Ring with a random lookup key and a random data key at version 1
    pub fn generate() -> CryptoResult<Self> {
        Self::from_keys(DataKey::generate()?, vec![(KeyVersion(1), DataKey::generate()?)])
    }

    /// Ring from existing material. The highest version becomes current.
    pub fn from_keys(lookup: DataKey, keys: Vec<(KeyVersion, DataKey)>) -> CryptoResult<Self> {
        let now = Utc::now();
        let current = keys
            .iter()
            .map(|(v, _)| *v)
            .max()
            .ok_or_else(|| CryptoError::Provider("key ring needs at least one data key".into()))?;

        let versions = keys
            .into_iter()
            .map(|(version, key)| {
                let state = if version == current {
                    KeyState::Active
                } else {
                    KeyState::DecryptOnly
                };
                (
                    version,
                    RingEntry {
                        material: Some(key),
                        state,
                        created_at: now,
                    },
                )
            })
            .collect();

        Ok(Self {
            inner: RwLock::new(RingState {
                versions,
                current,
                lookup,
            }),
        })
    }

    /// Ring from hex-encoded material, e.g. loaded from a secrets file
    pub fn from_hex_keys(lookup_hex: &str, keys: &[(u32, &str)]) -> CryptoResult<Self> {
        let keys = keys
            .iter()
            .map(|(v, hex)| Ok((KeyVersion(*v), DataKey::from_hex(hex)?)))
            .collect::<CryptoResult<Vec<_>>>()?;
        Self::from_keys(DataKey::from_hex(lookup_hex)?, keys)
    }

    /// Generate a new current version and demote the old one to decrypt-only
    pub fn rotate_now(&self) -> CryptoResult<KeyVersion> {
        let key = DataKey::generate()?;
        let mut ring = self.inner.write();
        let previous = ring.current;
        let next = ring
            .versions
            .keys()
            .next_back()
            .copied()
            .unwrap_or(previous)
            .next();

        if let Some(entry) = ring.versions.get_mut(&previous) {
            entry.state = KeyState::DecryptOnly;
        }
        ring.versions.insert(
            next,
            RingEntry {
                material: Some(key),
                state: KeyState::Active,
                created_at: Utc::now(),
            },
        );
        ring.current = next;
        info!(previous = %previous, current = %next, "data key rotated");
        Ok(next)
    }

    /// Destroy a non-current version. Ciphertext under it becomes
    /// permanently unreadable.
    pub fn retire(&self, version: KeyVersion) -> CryptoResult<()> {
        let mut ring = self.inner.write();
        if version == ring.current {
            return Err(CryptoError::Provider(format!(
                "cannot retire current key version {}",
                version
            )));
        }
        let entry = ring
            .versions
            .get_mut(&version)
            .ok_or(CryptoError::KeyUnavailable(version))?;
        entry.material = None;
        entry.state = KeyState::Destroyed;
        warn!(version = %version, "data key destroyed");
        Ok(())
    }

    pub fn state(&self, version: KeyVersion) -> Option<KeyState> {
        self.inner.read().versions.get(&version).map(|e| e.state)
    }

    pub fn metadata(&self, version: KeyVersion) -> Option<KeyMetadata> {
        self.inner.read().versions.get(&version).map(|entry| KeyMetadata {
            version,
            state: entry.state,
            created_at: entry.created_at,
        })
    }
}

#[async_trait]
impl KeyProvider for LocalKeyRing {
    async fn current_key_version(&self) -> CryptoResult<KeyVersion> {
        Ok(self.inner.read().current)
    }

    async fn get_key(&self, version: KeyVersion) -> CryptoResult<DataKey> {
        self.inner
            .read()
            .versions
            .get(&version)
            .and_then(|entry| entry.material.clone())
            .ok_or(CryptoError::KeyUnavailable(version))
    }

    async fn lookup_key(&self) -> CryptoResult<DataKey> {
        Ok(self.inner.read().lookup.clone())
    }

    async fn key_metadata(&self, version: KeyVersion) -> CryptoResult<Option<KeyMetadata>> {
        Ok(self.metadata(version))
    }

    async fn rotate(&self) -> CryptoResult<KeyVersion> {
        self.rotate_now()
    }
}

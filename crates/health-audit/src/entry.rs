//! Audit entries and the chain hash
//!
//! `current_hash = SHA-256(canonical(entry fields) || previous_hash)`.
//! The canonical encoding length-prefixes every variable-width field so two
//! different entries can never encode to the same byte string.

use carevault_shared::{ActorId, PatientId, PhiField, Purpose};
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;

/// What happened
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// PHI fields disclosed to an actor
    PhiRead,
    /// Request refused; `reason` holds the denial code
    AccessDenied,
    /// Disclosure was audited but decryption then failed
    DisclosureFailed,
    PatientCreated,
    PatientSoftDeleted,
    PatientSearch,
    ConsentGranted,
    ConsentRevoked,
    KeyRotated,
    KeyRewrap,
    /// An audited change did not reach its store; `reason` names the entry
    ChangeFailed,
}

impl AuditAction {
    pub fn code(&self) -> &'static str {
        match self {
            AuditAction::PhiRead => "phi_read",
            AuditAction::AccessDenied => "access_denied",
            AuditAction::DisclosureFailed => "disclosure_failed",
            AuditAction::PatientCreated => "patient_created",
            AuditAction::PatientSoftDeleted => "patient_soft_deleted",
            AuditAction::PatientSearch => "patient_search",
            AuditAction::ConsentGranted => "consent_granted",
            AuditAction::ConsentRevoked => "consent_revoked",
            AuditAction::KeyRotated => "key_rotated",
            AuditAction::KeyRewrap => "key_rewrap",
            AuditAction::ChangeFailed => "change_failed",
        }
    }

    /// Actions whose receipt authorizes decrypting the listed fields
    pub fn discloses_phi(&self) -> bool {
        matches!(self, AuditAction::PhiRead | AuditAction::KeyRewrap)
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// 32-byte SHA-256 chain link, serialized as lowercase hex
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChainHash([u8; 32]);

impl ChainHash {
    /// `previous_hash` of the first entry
    pub const GENESIS: ChainHash = ChainHash([0u8; 32]);

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        ChainHash(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, String> {
        let bytes = hex::decode(s).map_err(|e| format!("invalid chain hash hex: {}", e))?;
        let array: [u8; 32] = bytes
            .try_into()
            .map_err(|v: Vec<u8>| format!("chain hash must be 32 bytes, got {}", v.len()))?;
        Ok(ChainHash(array))
    }
}

impl fmt::Debug for ChainHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChainHash({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for ChainHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for ChainHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ChainHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        ChainHash::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Caller-supplied description of an event, before it is sequenced and chained
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuditEvent {
    pub actor_id: ActorId,
    pub subject_id: Option<PatientId>,
    pub action: AuditAction,
    pub purpose: Option<Purpose>,
    pub accessed_fields: Vec<PhiField>,
    /// Denial or failure code, free-form detail for administrative actions
    pub reason: Option<String>,
}

impl AuditEvent {
    pub fn new(actor_id: ActorId, action: AuditAction) -> Self {
        Self {
            actor_id,
            subject_id: None,
            action,
            purpose: None,
            accessed_fields: Vec::new(),
            reason: None,
        }
    }

    pub fn subject(mut self, subject_id: PatientId) -> Self {
        self.subject_id = Some(subject_id);
        self
    }

    pub fn purpose(mut self, purpose: Purpose) -> Self {
        self.purpose = Some(purpose);
        self
    }

    pub fn fields(mut self, fields: impl IntoIterator<Item = PhiField>) -> Self {
        self.accessed_fields = fields.into_iter().collect();
        self
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// Persisted, immutable audit entry
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub sequence_no: u64,
    pub timestamp: DateTime<Utc>,
    pub actor_id: ActorId,
    pub subject_id: Option<PatientId>,
    pub action: AuditAction,
    pub purpose: Option<Purpose>,
    pub accessed_fields: Vec<PhiField>,
    pub reason: Option<String>,
    pub previous_hash: ChainHash,
    pub current_hash: ChainHash,
}

impl AuditEntry {
    /// Sequence, timestamp and chain an event onto `previous_hash`.
    ///
    /// Timestamps are truncated to microseconds so the persisted form
    /// re-hashes to the same value after a JSON round trip.
    pub fn seal(
        sequence_no: u64,
        timestamp: DateTime<Utc>,
        event: AuditEvent,
        previous_hash: ChainHash,
    ) -> Self {
        let mut entry = AuditEntry {
            sequence_no,
            timestamp: timestamp.trunc_subsecs(6),
            actor_id: event.actor_id,
            subject_id: event.subject_id,
            action: event.action,
            purpose: event.purpose,
            accessed_fields: event.accessed_fields,
            reason: event.reason,
            previous_hash,
            current_hash: ChainHash::GENESIS,
        };
        entry.current_hash = entry.compute_hash();
        entry
    }

    /// Recompute this entry's hash from its fields and `previous_hash`
    pub fn compute_hash(&self) -> ChainHash {
        let mut hasher = Sha256::new();
        hasher.update(b"carevault.audit.v1");
        hasher.update(self.sequence_no.to_be_bytes());
        hasher.update(self.timestamp.timestamp_micros().to_be_bytes());
        update_str(&mut hasher, self.actor_id.as_str());
        update_opt_str(&mut hasher, self.subject_id.as_ref().map(PatientId::as_str));
        update_str(&mut hasher, self.action.code());
        update_opt_str(&mut hasher, self.purpose.as_ref().map(Purpose::code));
        hasher.update((self.accessed_fields.len() as u64).to_be_bytes());
        for field in &self.accessed_fields {
            update_str(&mut hasher, field.code());
        }
        update_opt_str(&mut hasher, self.reason.as_deref());
        hasher.update(self.previous_hash.as_bytes());
        ChainHash(hasher.finalize().into())
    }

    /// Whether the stored hash matches the stored fields
    pub fn hash_is_valid(&self) -> bool {
        self.compute_hash() == self.current_hash
    }
}

fn update_str(hasher: &mut Sha256, value: &str) {
    hasher.update((value.len() as u64).to_be_bytes());
    hasher.update(value.as_bytes());
}

fn update_opt_str(hasher: &mut Sha256, value: Option<&str>) {
    match value {
        Some(v) => {
            hasher.update([1u8]);
            update_str(hasher, v);
        }
        None => hasher.update([0u8]),
    }
}

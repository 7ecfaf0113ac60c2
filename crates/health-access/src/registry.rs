//! Patient intake, soft delete, SSN search and key migration

use crate::error::{AccessError, AccessResult};
use crate::patient::{PatientRecord, PatientStore};
use crate::roles::Actor;
use carevault_audit::{AuditAction, AuditError, AuditEvent, AuditLogger};
use carevault_crypto::{CryptoError, EncryptionService, FieldContext, KeyVersion};
use carevault_shared::telemetry::ALERT_TARGET;
use carevault_shared::{Clock, DenialReason, PatientId, PhiField, Purpose};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

/// Plaintext intake form. Consumed by `register_patient`; never stored.
#[derive(Clone, Default)]
pub struct PatientIntake {
    pub mrn: Option<String>,
    pub fields: BTreeMap<PhiField, String>,
}

impl PatientIntake {
    pub fn field(mut self, field: PhiField, value: impl Into<String>) -> Self {
        self.fields.insert(field, value.into());
        self
    }
}

impl std::fmt::Debug for PatientIntake {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PatientIntake")
            .field("mrn", &self.mrn)
            .field("fields", &self.fields.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[derive(Clone)]
pub struct PatientRegistry {
    patients: Arc<dyn PatientStore>,
    audit: AuditLogger,
    crypto: EncryptionService,
    clock: Arc<dyn Clock>,
}

fn audit_unavailable(err: AuditError) -> AccessError {
    error!(target: ALERT_TARGET, error = %err, "registry change not audited");
    AccessError::AuditUnavailable
}

fn crypto_failure(err: CryptoError) -> AccessError {
    match err {
        CryptoError::KeyUnavailable(version) => AccessError::KeyUnavailable(version),
        CryptoError::IntegrityError | CryptoError::DecryptionError => {
            error!(target: ALERT_TARGET, error = %err, "encrypted field failed integrity check");
            AccessError::Integrity(err.to_string())
        }
        other => AccessError::Storage(other.to_string()),
    }
}

impl PatientRegistry {
    pub fn new(
        patients: Arc<dyn PatientStore>,
        audit: AuditLogger,
        crypto: EncryptionService,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            patients,
            audit,
            crypto,
            clock,
        }
    }

    fn forbid(operation: &str) -> AccessError {
        AccessError::Forbidden {
            stage: crate::GateStage::Authenticated,
            reason: DenialReason::OperationNotPermitted {
                operation: operation.to_string(),
            },
        }
    }

    /// Encrypt and store a new patient. Searchable fields also get a lookup
    /// hash. The audit entry lists field names only.
    #[instrument(skip_all, fields(actor = %actor.id))]
    pub async fn register_patient(&self, actor: &Actor, intake: PatientIntake) -> AccessResult<PatientId> {
        if !actor.role.capability().can_register {
            warn!(role = %actor.role, "registration refused");
            return Err(Self::forbid("register_patient"));
        }
        if intake.fields.is_empty() {
            return Err(AccessError::Invalid("intake has no fields".into()));
        }

        let patient_id = PatientId::generate();
        let mut fields = BTreeMap::new();
        let mut lookup_hashes = BTreeMap::new();
        for (field, value) in &intake.fields {
            let ctx = FieldContext::new(patient_id.clone(), *field);
            let blob = self.crypto.encrypt(value, &ctx).await.map_err(crypto_failure)?;
            fields.insert(*field, blob);
            if field.is_searchable() {
                let hash = self.crypto.lookup_hash(*field, value).await.map_err(crypto_failure)?;
                lookup_hashes.insert(*field, hash);
            }
        }

        let record = PatientRecord {
            patient_id: patient_id.clone(),
            mrn: intake.mrn,
            created_at: self.clock.now(),
            deleted_at: None,
            fields,
            lookup_hashes,
        };

        // Creation is on the chain before the record is readable
        let receipt = self
            .audit
            .log_event(
                AuditEvent::new(actor.id.clone(), AuditAction::PatientCreated)
                    .subject(patient_id.clone())
                    .fields(record.fields.keys().copied()),
            )
            .await
            .map_err(audit_unavailable)?;
        if let Err(err) = self.patients.insert(&record).await {
            warn!(patient = %patient_id, error = %err, "audited patient not stored");
            let followup = AuditEvent::new(actor.id.clone(), AuditAction::ChangeFailed)
                .subject(patient_id.clone())
                .reason(format!("store_unavailable;entry_sequence={}", receipt.sequence_no()));
            if let Err(audit_err) = self.audit.log_event(followup).await {
                error!(target: ALERT_TARGET, error = %audit_err, "failed registration could not be audited");
            }
            return Err(AccessError::Storage(err.to_string()));
        }

        info!(patient = %patient_id, fields = record.fields.len(), "patient registered");
        Ok(patient_id)
    }

    /// Hide a patient from reads while keeping the record for legal hold
    #[instrument(skip_all, fields(actor = %actor.id, patient = %patient_id))]
    pub async fn soft_delete_patient(&self, actor: &Actor, patient_id: &PatientId, reason: &str) -> AccessResult<()> {
        if !actor.role.capability().can_soft_delete {
            return Err(Self::forbid("soft_delete_patient"));
        }
        match self.patients.get(patient_id).await {
            Ok(Some(record)) if !record.is_deleted() => {}
            Ok(_) => return Err(AccessError::PatientNotFound),
            Err(err) => return Err(AccessError::Storage(err.to_string())),
        }

        self.audit
            .log_event(
                AuditEvent::new(actor.id.clone(), AuditAction::PatientSoftDeleted)
                    .subject(patient_id.clone())
                    .reason(reason),
            )
            .await
            .map_err(audit_unavailable)?;
        self.patients
            .mark_deleted(patient_id, self.clock.now())
            .await
            .map_err(|e| AccessError::Storage(e.to_string()))?;

        info!("patient soft-deleted");
        Ok(())
    }

    /// Equality search on SSN through its lookup hash. The SSN is never
    /// compared or logged in the clear.
    #[instrument(skip_all, fields(actor = %actor.id, purpose = %purpose))]
    pub async fn find_by_ssn(&self, actor: &Actor, purpose: Purpose, ssn: &str) -> AccessResult<Vec<PatientId>> {
        let capability = actor.role.capability();
        let allowed = capability.allows_purpose(purpose)
            && capability.allows_field(PhiField::Ssn)
            && purpose.minimum_necessary().contains(&PhiField::Ssn);
        if !allowed {
            return Err(Self::forbid("find_by_ssn"));
        }

        let hash = self
            .crypto
            .lookup_hash(PhiField::Ssn, ssn)
            .await
            .map_err(crypto_failure)?;
        let matches: Vec<PatientId> = self
            .patients
            .find_by_lookup(PhiField::Ssn, &hash)
            .await
            .map_err(|e| AccessError::Storage(e.to_string()))?
            .into_iter()
            .filter(|r| !r.is_deleted())
            .map(|r| r.patient_id)
            .collect();

        self.audit
            .log_event(
                AuditEvent::new(actor.id.clone(), AuditAction::PatientSearch)
                    .purpose(purpose)
                    .fields([PhiField::Ssn])
                    .reason(format!("matches={}", matches.len())),
            )
            .await
            .map_err(audit_unavailable)?;

        Ok(matches)
    }

    /// Re-encrypt every field not under the current key version. Returns
    /// how many fields moved.
    #[instrument(skip_all, fields(actor = %actor.id, patient = %patient_id))]
    pub async fn rewrap_patient(&self, actor: &Actor, patient_id: &PatientId) -> AccessResult<usize> {
        if !actor.role.capability().can_manage_keys {
            return Err(Self::forbid("rewrap_patient"));
        }
        let record = self
            .patients
            .get(patient_id)
            .await
            .map_err(|e| AccessError::Storage(e.to_string()))?
            .ok_or(AccessError::PatientNotFound)?;

        let current = self.crypto.current_key_version().await.map_err(crypto_failure)?;
        let stale: Vec<PhiField> = record
            .fields
            .iter()
            .filter(|(_, blob)| blob.key_version != current)
            .map(|(field, _)| *field)
            .collect();
        if stale.is_empty() {
            return Ok(0);
        }

        let receipt = self
            .audit
            .log_event(
                AuditEvent::new(actor.id.clone(), AuditAction::KeyRewrap)
                    .subject(patient_id.clone())
                    .fields(stale.iter().copied())
                    .reason(format!("to={}", current)),
            )
            .await
            .map_err(audit_unavailable)?;

        let mut rewrapped = BTreeMap::new();
        for field in &stale {
            if let Some(blob) = record.fields.get(field) {
                let ctx = FieldContext::new(patient_id.clone(), *field);
                let blob = self.crypto.rewrap(blob, &ctx, &receipt).await.map_err(crypto_failure)?;
                rewrapped.insert(*field, blob);
            }
        }
        let count = rewrapped.len();
        self.patients
            .update_fields(patient_id, rewrapped)
            .await
            .map_err(|e| AccessError::Storage(e.to_string()))?;

        info!(fields = count, key_version = %current, "patient rewrapped");
        Ok(count)
    }

    /// Make a new current data key version. Existing ciphertext stays
    /// readable under its old version until rewrapped.
    #[instrument(skip_all, fields(actor = %actor.id))]
    pub async fn rotate_data_key(&self, actor: &Actor) -> AccessResult<KeyVersion> {
        if !actor.role.capability().can_manage_keys {
            return Err(Self::forbid("rotate_data_key"));
        }
        let previous = self.crypto.current_key_version().await.map_err(crypto_failure)?;
        self.audit
            .log_event(
                AuditEvent::new(actor.id.clone(), AuditAction::KeyRotated).reason(format!("from={}", previous)),
            )
            .await
            .map_err(audit_unavailable)?;
        let current = self.crypto.rotate_key().await.map_err(crypto_failure)?;
        info!(previous = %previous, current = %current, "data key rotated");
        Ok(current)
    }

    /// Whether the current data key has reached the rotation window set by
    /// `crypto.key_max_age_days` and `crypto.rotation_lead_days`
    pub async fn rotation_due(&self, actor: &Actor) -> AccessResult<bool> {
        if !actor.role.capability().can_manage_keys {
            return Err(Self::forbid("rotation_due"));
        }
        let due = self.crypto.rotation_due(self.clock.now()).await.map_err(crypto_failure)?;
        if due {
            warn!("current data key is due for rotation");
        }
        Ok(due)
    }

    /// Current data key version, for migration tooling
    pub async fn current_key_version(&self) -> AccessResult<KeyVersion> {
        self.crypto.current_key_version().await.map_err(crypto_failure)
    }
}

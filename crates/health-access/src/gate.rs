//! Access control gate
//!
//! Request flow: authenticate, check role and purpose, load the patient,
//! check consent, select fields, audit the disclosure, decrypt, respond.
//! Every refusal after authentication is written to the audit chain before
//! the error is returned. Responses are all-or-nothing.

use crate::error::{AccessError, AccessResult, GateStage};
use crate::patient::{PatientRecord, PatientStore};
use crate::roles::Actor;
use carevault_audit::{AuditAction, AuditEvent, AuditLogger, AuditReceipt};
use carevault_consent::{ConsentDecision, ConsentError, ConsentService};
use carevault_crypto::{CryptoError, CryptoResult, EncryptedField, EncryptionService, FieldContext};
use carevault_shared::telemetry::ALERT_TARGET;
use carevault_shared::{missing_from, AccessConfig, DenialReason, PatientId, PhiField, Purpose};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccessRequest {
    /// `None` when the session layer could not authenticate the caller
    pub actor: Option<Actor>,
    pub patient_id: PatientId,
    pub purpose: Purpose,
    pub fields: BTreeSet<PhiField>,
}

impl AccessRequest {
    pub fn new(actor: Actor, patient_id: PatientId, purpose: Purpose, fields: impl IntoIterator<Item = PhiField>) -> Self {
        Self {
            actor: Some(actor),
            patient_id,
            purpose,
            fields: fields.into_iter().collect(),
        }
    }
}

/// Decrypted fields for one authorized request. Debug output lists field
/// names only.
#[derive(Clone, PartialEq, Eq)]
pub struct PatientView {
    pub patient_id: PatientId,
    pub purpose: Purpose,
    pub fields: BTreeMap<PhiField, String>,
    /// Audit entry that recorded this disclosure
    pub audit_sequence: u64,
}

impl PatientView {
    pub fn get(&self, field: PhiField) -> Option<&str> {
        self.fields.get(&field).map(String::as_str)
    }
}

impl fmt::Debug for PatientView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PatientView")
            .field("patient_id", &self.patient_id)
            .field("purpose", &self.purpose)
            .field("fields", &self.fields.keys().collect::<Vec<_>>())
            .field("audit_sequence", &self.audit_sequence)
            .finish()
    }
}

/// Role, purpose and minimum-necessary rules for a request
pub fn check_role(actor: &Actor, purpose: Purpose, fields: &BTreeSet<PhiField>) -> Result<(), DenialReason> {
    if fields.is_empty() {
        return Err(DenialReason::NoFieldsRequested);
    }
    let capability = actor.role.capability();
    if !capability.allows_purpose(purpose) {
        return Err(DenialReason::PurposeNotPermitted { purpose });
    }
    let forbidden = missing_from(fields, capability.fields);
    if !forbidden.is_empty() {
        return Err(DenialReason::RoleFieldsNotPermitted { fields: forbidden });
    }
    let excess = purpose.excess_fields(fields);
    if !excess.is_empty() {
        return Err(DenialReason::MinimumNecessary { fields: excess });
    }
    Ok(())
}

#[derive(Clone)]
pub struct AccessControlGate {
    patients: Arc<dyn PatientStore>,
    consent: ConsentService,
    audit: AuditLogger,
    crypto: EncryptionService,
    decrypt_timeout: Duration,
}

impl AccessControlGate {
    pub fn new(
        patients: Arc<dyn PatientStore>,
        consent: ConsentService,
        audit: AuditLogger,
        crypto: EncryptionService,
        config: &AccessConfig,
    ) -> Self {
        Self {
            patients,
            consent,
            audit,
            crypto,
            decrypt_timeout: config.decrypt_timeout(),
        }
    }

    #[instrument(
        name = "gate.authorize_and_fetch",
        skip_all,
        fields(patient = %request.patient_id, purpose = %request.purpose)
    )]
    pub async fn authorize_and_fetch(&self, request: AccessRequest) -> AccessResult<PatientView> {
        let actor = match &request.actor {
            Some(actor) => actor.clone(),
            None => {
                warn!(stage = %GateStage::Unauthenticated, "unauthenticated PHI request refused");
                return Err(AccessError::Authentication);
            }
        };
        debug!(actor = %actor.id, role = %actor.role, "authenticated");

        if let Err(reason) = check_role(&actor, request.purpose, &request.fields) {
            return Err(self.deny(&actor, &request, GateStage::Authenticated, reason).await);
        }

        let record = match self.patients.get(&request.patient_id).await {
            Ok(Some(record)) if !record.is_deleted() => record,
            Ok(_) => {
                return Err(self
                    .deny(&actor, &request, GateStage::RoleChecked, DenialReason::PatientNotFound)
                    .await)
            }
            Err(err) => {
                warn!(error = %err, "patient store unavailable");
                return Err(self
                    .store_failure(&actor, &request, GateStage::RoleChecked, "patient_lookup", err.to_string())
                    .await);
            }
        };

        match self
            .consent
            .check_consent(&request.patient_id, request.purpose, &request.fields)
            .await
        {
            Ok(ConsentDecision::Allowed { .. }) => {}
            Ok(ConsentDecision::Denied(reason)) => {
                return Err(self.deny(&actor, &request, GateStage::RoleChecked, reason).await)
            }
            Err(ConsentError::Timeout) => {
                let reason = DenialReason::Timeout {
                    step: "consent_check".into(),
                };
                return Err(self.deny(&actor, &request, GateStage::RoleChecked, reason).await);
            }
            Err(err) => {
                warn!(error = %err, "consent store unavailable");
                return Err(self
                    .store_failure(&actor, &request, GateStage::RoleChecked, "consent_check", err.to_string())
                    .await);
            }
        }
        debug!(stage = %GateStage::ConsentChecked, "consent allows request");

        let selected = select_fields(&record, &request.fields);
        debug!(stage = %GateStage::FieldFiltered, selected = selected.len(), "fields selected");

        let event = AuditEvent::new(actor.id.clone(), AuditAction::PhiRead)
            .subject(request.patient_id.clone())
            .purpose(request.purpose)
            .fields(selected.iter().map(|(field, _)| *field));
        let receipt = self.audit.log_event(event).await.map_err(|err| {
            error!(target: ALERT_TARGET, error = %err, "disclosure not audited, refusing");
            AccessError::AuditUnavailable
        })?;

        let decrypted = tokio::time::timeout(
            self.decrypt_timeout,
            self.decrypt_all(&request.patient_id, &selected, &receipt),
        )
        .await;

        let fields = match decrypted {
            Ok(Ok(fields)) => fields,
            Ok(Err(err)) => return Err(self.disclosure_failed(&actor, &request, &receipt, err).await),
            Err(_) => {
                self.record_failure(&actor, &request, &receipt, "timeout").await;
                return Err(AccessError::Forbidden {
                    stage: GateStage::Audited,
                    reason: DenialReason::Timeout { step: "decrypt".into() },
                });
            }
        };

        info!(
            stage = %GateStage::Responded,
            actor = %actor.id,
            audit_sequence = receipt.sequence_no(),
            fields = fields.len(),
            "phi disclosed"
        );
        Ok(PatientView {
            patient_id: request.patient_id,
            purpose: request.purpose,
            fields,
            audit_sequence: receipt.sequence_no(),
        })
    }

    async fn decrypt_all(
        &self,
        patient_id: &PatientId,
        selected: &[(PhiField, EncryptedField)],
        receipt: &AuditReceipt,
    ) -> CryptoResult<BTreeMap<PhiField, String>> {
        let mut out = BTreeMap::new();
        for (field, blob) in selected {
            let ctx = FieldContext::new(patient_id.clone(), *field);
            let value = self.crypto.decrypt(blob, &ctx, receipt).await?;
            out.insert(*field, value);
        }
        Ok(out)
    }

    /// Write the `access_denied` entry for a refusal at `stage`
    async fn record_denial(
        &self,
        actor: &Actor,
        request: &AccessRequest,
        stage: GateStage,
        reason: &DenialReason,
    ) -> AccessResult<()> {
        let event = AuditEvent::new(actor.id.clone(), AuditAction::AccessDenied)
            .subject(request.patient_id.clone())
            .purpose(request.purpose)
            .fields(request.fields.iter().copied())
            .reason(reason.code());
        if let Err(err) = self.audit.log_event(event).await {
            error!(
                target: ALERT_TARGET,
                actor = %actor.id,
                reason = %reason,
                error = %err,
                "access denial could not be audited"
            );
            return Err(AccessError::AuditUnavailable);
        }

        info!(
            stage = %GateStage::Denied,
            last_stage = %stage,
            actor = %actor.id,
            role = %actor.role,
            reason = %reason,
            "access denied"
        );
        Ok(())
    }

    /// Audit a refusal and turn it into the caller-facing error
    async fn deny(
        &self,
        actor: &Actor,
        request: &AccessRequest,
        stage: GateStage,
        reason: DenialReason,
    ) -> AccessError {
        if let Err(err) = self.record_denial(actor, request, stage, &reason).await {
            return err;
        }
        match reason {
            DenialReason::PatientNotFound => AccessError::PatientNotFound,
            reason if reason.is_consent_reason() => AccessError::ConsentDenied { reason },
            reason => AccessError::Forbidden { stage, reason },
        }
    }

    /// A store failure is audited like any other denial, but the caller
    /// still gets the storage error
    async fn store_failure(
        &self,
        actor: &Actor,
        request: &AccessRequest,
        stage: GateStage,
        step: &str,
        detail: String,
    ) -> AccessError {
        let reason = DenialReason::StoreUnavailable { step: step.to_string() };
        match self.record_denial(actor, request, stage, &reason).await {
            Ok(()) => AccessError::Storage(detail),
            Err(err) => err,
        }
    }

    async fn disclosure_failed(
        &self,
        actor: &Actor,
        request: &AccessRequest,
        receipt: &AuditReceipt,
        err: CryptoError,
    ) -> AccessError {
        match err {
            CryptoError::KeyUnavailable(version) => {
                warn!(key_version = %version, "record key unavailable");
                self.record_failure(actor, request, receipt, "key_unavailable").await;
                AccessError::KeyUnavailable(version)
            }
            CryptoError::Timeout => {
                self.record_failure(actor, request, receipt, "timeout").await;
                AccessError::Forbidden {
                    stage: GateStage::Audited,
                    reason: DenialReason::Timeout {
                        step: "key_fetch".into(),
                    },
                }
            }
            other => {
                error!(
                    target: ALERT_TARGET,
                    patient = %request.patient_id,
                    actor = %actor.id,
                    error = %other,
                    "encrypted field failed integrity check"
                );
                self.record_failure(actor, request, receipt, "integrity_failure").await;
                AccessError::Integrity(other.to_string())
            }
        }
    }

    async fn record_failure(&self, actor: &Actor, request: &AccessRequest, receipt: &AuditReceipt, code: &str) {
        let event = AuditEvent::new(actor.id.clone(), AuditAction::DisclosureFailed)
            .subject(request.patient_id.clone())
            .purpose(request.purpose)
            .fields(receipt.fields().iter().copied())
            .reason(format!("{};read_sequence={}", code, receipt.sequence_no()));
        if let Err(err) = self.audit.log_event(event).await {
            error!(target: ALERT_TARGET, error = %err, "failed disclosure could not be audited");
        }
    }
}

fn select_fields(record: &PatientRecord, requested: &BTreeSet<PhiField>) -> Vec<(PhiField, EncryptedField)> {
    requested
        .iter()
        .filter_map(|field| record.fields.get(field).map(|blob| (*field, blob.clone())))
        .collect()
}

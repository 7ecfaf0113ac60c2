//! Consent service

use crate::error::{ConsentError, ConsentResult};
use crate::model::{evaluate, Consent, ConsentDecision, ConsentGrant};
use crate::store::ConsentStore;
use carevault_audit::{AuditAction, AuditEvent, AuditLogger};
use carevault_shared::{ActorId, Clock, ConsentConfig, ConsentId, PatientId, PhiField, Purpose};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

#[derive(Clone)]
pub struct ConsentService {
    store: Arc<dyn ConsentStore>,
    audit: AuditLogger,
    clock: Arc<dyn Clock>,
    config: ConsentConfig,
}

impl ConsentService {
    pub fn new(
        store: Arc<dyn ConsentStore>,
        audit: AuditLogger,
        clock: Arc<dyn Clock>,
        config: ConsentConfig,
    ) -> Self {
        Self {
            store,
            audit,
            clock,
            config,
        }
    }

    /// Record a new consent.
    ///
    /// The grant is audited before it is stored, so a consent that can
    /// authorize a disclosure is always on the chain. If the store then
    /// refuses it, a `change_failed` entry follows the grant entry.
    #[instrument(skip_all, fields(actor = %actor, patient = %grant.patient_id))]
    pub async fn grant_consent(&self, actor: &ActorId, grant: ConsentGrant) -> ConsentResult<ConsentId> {
        validate_grant(&grant)?;

        let consent = Consent {
            consent_id: ConsentId::generate(),
            patient_id: grant.patient_id,
            purposes: grant.purposes,
            scope: grant.scope,
            effective_start: grant.effective_start,
            effective_end: grant.effective_end,
            method: grant.method,
            granted_at: self.clock.now(),
            granted_by: actor.clone(),
            revoked_at: None,
            revocation_reason: None,
        };

        let event = AuditEvent::new(actor.clone(), AuditAction::ConsentGranted)
            .subject(consent.patient_id.clone())
            .fields(consent.scope.iter().copied())
            .reason(describe(&consent));
        let event = match single_purpose(&consent.purposes) {
            Some(purpose) => event.purpose(purpose),
            None => event,
        };
        let receipt = self.audit.log_event(event).await.map_err(|err| {
            warn!(consent_id = %consent.consent_id, error = %err, "consent grant not audited, refusing");
            ConsentError::AuditUnavailable(err)
        })?;

        if let Err(err) = self.store.insert(&consent).await {
            warn!(consent_id = %consent.consent_id, error = %err, "audited consent grant not stored");
            let followup = AuditEvent::new(actor.clone(), AuditAction::ChangeFailed)
                .subject(consent.patient_id.clone())
                .reason(format!("store_unavailable;entry_sequence={}", receipt.sequence_no()));
            if let Err(audit_err) = self.audit.log_event(followup).await {
                error!(
                    target: carevault_shared::telemetry::ALERT_TARGET,
                    consent_id = %consent.consent_id,
                    error = %audit_err,
                    "failed consent grant could not be audited"
                );
            }
            return Err(ConsentError::Store(err));
        }

        info!(consent_id = %consent.consent_id, "consent granted");
        Ok(consent.consent_id)
    }

    /// Revoke a consent. The record is kept; revoking twice is rejected.
    ///
    /// Revocation takes effect even when the audit append then fails; the
    /// error is still returned so the caller knows the change is unaudited.
    #[instrument(skip_all, fields(actor = %actor, consent_id = %consent_id))]
    pub async fn revoke_consent(
        &self,
        actor: &ActorId,
        consent_id: ConsentId,
        reason: &str,
    ) -> ConsentResult<Consent> {
        let existing = self
            .store
            .get(consent_id)
            .await?
            .ok_or(ConsentError::NotFound(consent_id))?;
        if existing.revoked_at.is_some() {
            return Err(ConsentError::AlreadyRevoked(consent_id));
        }

        let revoked = self.store.mark_revoked(consent_id, self.clock.now(), reason).await?;

        let event = AuditEvent::new(actor.clone(), AuditAction::ConsentRevoked)
            .subject(revoked.patient_id.clone())
            .fields(revoked.scope.iter().copied())
            .reason(format!("consent_id={};reason={}", consent_id, reason));
        self.audit.log_event(event).await?;

        info!("consent revoked");
        Ok(revoked)
    }

    /// Whether `requested` may be disclosed for `purpose` right now
    pub async fn check_consent(
        &self,
        patient_id: &PatientId,
        purpose: Purpose,
        requested: &BTreeSet<PhiField>,
    ) -> ConsentResult<ConsentDecision> {
        let consents = tokio::time::timeout(self.config.check_timeout(), self.store.for_patient(patient_id))
            .await
            .map_err(|_| ConsentError::Timeout)??;

        let decision = evaluate(
            &consents,
            purpose,
            requested,
            self.clock.now(),
            self.config.scope_resolution,
        );
        match &decision {
            ConsentDecision::Allowed { consent_ids, .. } => {
                debug!(patient = %patient_id, purpose = %purpose, consents = consent_ids.len(), "consent allows")
            }
            ConsentDecision::Denied(reason) => {
                debug!(patient = %patient_id, purpose = %purpose, reason = %reason, "consent denies")
            }
        }
        Ok(decision)
    }

    /// Consent history for a patient, revoked consents included
    pub async fn consents_for_patient(&self, patient_id: &PatientId) -> ConsentResult<Vec<Consent>> {
        Ok(self.store.for_patient(patient_id).await?)
    }

    pub async fn get_consent(&self, consent_id: ConsentId) -> ConsentResult<Consent> {
        self.store
            .get(consent_id)
            .await?
            .ok_or(ConsentError::NotFound(consent_id))
    }
}

fn validate_grant(grant: &ConsentGrant) -> ConsentResult<()> {
    if grant.purposes.is_empty() {
        return Err(ConsentError::Invalid("at least one purpose is required".into()));
    }
    if grant.scope.is_empty() {
        return Err(ConsentError::Invalid("scope must name at least one field".into()));
    }
    if let Some(end) = grant.effective_end {
        if end <= grant.effective_start {
            return Err(ConsentError::Invalid("effective_end must be after effective_start".into()));
        }
    }
    Ok(())
}

fn single_purpose(purposes: &BTreeSet<Purpose>) -> Option<Purpose> {
    match purposes.len() {
        1 => purposes.iter().next().copied(),
        _ => None,
    }
}

fn describe(consent: &Consent) -> String {
    let purposes: Vec<&str> = consent.purposes.iter().map(Purpose::code).collect();
    format!(
        "consent_id={};purposes={};method={:?}",
        consent.consent_id,
        purposes.join(","),
        consent.method
    )
    .to_lowercase()
}

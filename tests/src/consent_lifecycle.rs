//! Consent lifecycle over a manual clock

use crate::support::*;
use carevault_access::{AccessError, AccessRequest};
use carevault_consent::{ConsentError, ConsentGrant, ConsentStatus, GrantMethod};
use carevault_shared::{CareVaultConfig, Clock, DenialReason, PatientId, PhiField, Purpose, ScopeResolution};
use chrono::{DateTime, Duration, Utc};

async fn grant_window(
    fx: &Fixture,
    patient: &PatientId,
    scope: &[PhiField],
    start: DateTime<Utc>,
    end: Option<DateTime<Utc>>,
) {
    let grant = ConsentGrant {
        patient_id: patient.clone(),
        purposes: [Purpose::Treatment].into_iter().collect(),
        scope: scope.iter().copied().collect(),
        effective_start: start,
        effective_end: end,
        method: GrantMethod::Verbal,
    };
    fx.vault.consent().grant_consent(&portal(), grant).await.unwrap();
}

async fn nurse_reads(fx: &Fixture, patient: &PatientId, fields: &[PhiField]) -> Result<(), AccessError> {
    let request = AccessRequest::new(nurse(), patient.clone(), Purpose::Treatment, fields.iter().copied());
    fx.vault.authorize_and_fetch(request).await.map(|_| ())
}

fn consent_reason(result: Result<(), AccessError>) -> DenialReason {
    match result {
        Err(AccessError::ConsentDenied { reason }) => reason,
        other => panic!("expected a consent denial, got {:?}", other),
    }
}

#[tokio::test]
async fn test_consent_expires_at_window_end() {
    let fx = Fixture::new().await;
    let patient = fx.register().await;
    let now = fx.clock.now();
    grant_window(&fx, &patient, &[PhiField::Allergies], now, Some(now + Duration::days(1))).await;

    assert!(nurse_reads(&fx, &patient, &[PhiField::Allergies]).await.is_ok());

    // End is exclusive
    fx.clock.set(now + Duration::days(1));
    assert_eq!(
        consent_reason(nurse_reads(&fx, &patient, &[PhiField::Allergies]).await),
        DenialReason::ConsentExpired
    );
}

#[tokio::test]
async fn test_future_consent_is_pending_until_start() {
    let fx = Fixture::new().await;
    let patient = fx.register().await;
    let start = fx.clock.now() + Duration::hours(4);
    grant_window(&fx, &patient, &[PhiField::Medications], start, None).await;

    assert_eq!(
        consent_reason(nurse_reads(&fx, &patient, &[PhiField::Medications]).await),
        DenialReason::ConsentNotYetEffective
    );

    fx.clock.advance(Duration::hours(4));
    assert!(nurse_reads(&fx, &patient, &[PhiField::Medications]).await.is_ok());
}

#[tokio::test]
async fn test_revoked_consent_does_not_mask_an_active_one() {
    let fx = Fixture::new().await;
    let patient = fx.register().await;
    let old = fx.grant(&patient, &[Purpose::Treatment], &[PhiField::Allergies]).await;
    fx.grant(&patient, &[Purpose::Treatment], &[PhiField::Allergies, PhiField::Name])
        .await;

    fx.clock.advance(Duration::minutes(1));
    fx.vault
        .consent()
        .revoke_consent(&portal(), old, "superseded")
        .await
        .unwrap();

    assert!(nurse_reads(&fx, &patient, &[PhiField::Allergies]).await.is_ok());

    let history = fx.vault.consent().consents_for_patient(&patient).await.unwrap();
    assert_eq!(history.len(), 2);
    let revoked = history.iter().find(|c| c.consent_id == old).unwrap();
    assert_eq!(revoked.status_at(fx.clock.now()), ConsentStatus::Revoked);
    assert_eq!(revoked.revocation_reason.as_deref(), Some("superseded"));
}

#[tokio::test]
async fn test_revoking_twice_is_rejected() {
    let fx = Fixture::new().await;
    let patient = fx.register().await;
    let consent = fx.grant(&patient, &[Purpose::Treatment], &[PhiField::Allergies]).await;

    fx.vault
        .consent()
        .revoke_consent(&portal(), consent, "patient request")
        .await
        .unwrap();
    let err = fx
        .vault
        .consent()
        .revoke_consent(&portal(), consent, "again")
        .await
        .unwrap_err();
    assert!(matches!(err, ConsentError::AlreadyRevoked(id) if id == consent));
}

#[tokio::test]
async fn test_consent_for_another_purpose_is_no_consent() {
    let fx = Fixture::new().await;
    let patient = fx.register().await;
    fx.grant(&patient, &[Purpose::Treatment], &[PhiField::Dob, PhiField::Diagnoses])
        .await;

    let request = AccessRequest::new(researcher(), patient, Purpose::Research, [PhiField::Diagnoses]);
    let err = fx.vault.authorize_and_fetch(request).await.unwrap_err();
    assert!(matches!(
        err,
        AccessError::ConsentDenied {
            reason: DenialReason::NoConsent
        }
    ));
}

#[tokio::test]
async fn test_overlapping_scopes_follow_configured_resolution() {
    let union = Fixture::new().await;
    let mut config = CareVaultConfig::default();
    config.consent.scope_resolution = ScopeResolution::Intersection;
    let intersection = Fixture::with_config(config).await;

    for fx in [&union, &intersection] {
        let patient = fx.register().await;
        fx.grant(&patient, &[Purpose::Treatment], &[PhiField::Name, PhiField::Dob, PhiField::Allergies])
            .await;
        fx.grant(&patient, &[Purpose::Treatment], &[PhiField::Name, PhiField::Allergies])
            .await;

        assert!(nurse_reads(fx, &patient, &[PhiField::Name, PhiField::Allergies]).await.is_ok());
        let dob = nurse_reads(fx, &patient, &[PhiField::Dob]).await;
        if std::ptr::eq(fx, &union) {
            assert!(dob.is_ok());
        } else {
            assert_eq!(
                consent_reason(dob),
                DenialReason::FieldsOutOfScope {
                    fields: vec![PhiField::Dob]
                }
            );
        }
    }
}

#[tokio::test]
async fn test_invalid_grant_is_rejected_before_storage() {
    let fx = Fixture::new().await;
    let patient = fx.register().await;
    let now = fx.clock.now();
    let grant = ConsentGrant {
        patient_id: patient.clone(),
        purposes: [Purpose::Treatment].into_iter().collect(),
        scope: [PhiField::Name].into_iter().collect(),
        effective_start: now,
        effective_end: Some(now - Duration::days(1)),
        method: GrantMethod::Guardian,
    };
    let err = fx.vault.consent().grant_consent(&portal(), grant).await.unwrap_err();
    assert!(matches!(err, ConsentError::Invalid(_)));
    assert!(fx.vault.consent().consents_for_patient(&patient).await.unwrap().is_empty());
}

//! Fail-closed behavior
//!
//! Nothing is disclosed unless its audit entry committed first; a failure
//! after the audit is itself recorded.

use crate::support::*;
use carevault_access::{AccessError, AccessRequest, GateStage};
use carevault_audit::AuditAction;
use carevault_crypto::KeyVersion;
use carevault_shared::{CareVaultConfig, DenialReason, PhiField, Purpose};
use std::sync::Arc;
use std::time::Duration;

async fn consented_patient(fx: &Fixture) -> carevault_shared::PatientId {
    let patient = fx.register().await;
    fx.grant(&patient, &[Purpose::Treatment], &[PhiField::Name, PhiField::Allergies])
        .await;
    patient
}

#[tokio::test]
async fn test_unavailable_audit_store_blocks_disclosure() {
    let fx = Fixture::new().await;
    let patient = consented_patient(&fx).await;
    let vault = fx
        .with_audit_store(Arc::new(UnavailableAuditStore), CareVaultConfig::default())
        .await;

    let request = AccessRequest::new(nurse(), patient, Purpose::Treatment, [PhiField::Allergies]);
    let err = vault.authorize_and_fetch(request).await.unwrap_err();
    assert!(matches!(err, AccessError::AuditUnavailable));
    assert_eq!(err.status_code(), 503);
}

#[tokio::test]
async fn test_unavailable_audit_store_blocks_denials_too() {
    let fx = Fixture::new().await;
    let patient = consented_patient(&fx).await;
    let vault = fx
        .with_audit_store(Arc::new(UnavailableAuditStore), CareVaultConfig::default())
        .await;

    // Nurses never see SSN; the refusal itself cannot be recorded
    let request = AccessRequest::new(nurse(), patient, Purpose::Treatment, [PhiField::Ssn]);
    let err = vault.authorize_and_fetch(request).await.unwrap_err();
    assert!(matches!(err, AccessError::AuditUnavailable));
}

#[tokio::test]
async fn test_hanging_audit_store_times_out_closed() {
    let fx = Fixture::new().await;
    let patient = consented_patient(&fx).await;

    let mut config = CareVaultConfig::default();
    config.audit.write_timeout_ms = 50;
    let vault = fx.with_audit_store(Arc::new(HangingAuditStore), config).await;

    let request = AccessRequest::new(nurse(), patient, Purpose::Treatment, [PhiField::Allergies]);
    let result = tokio::time::timeout(Duration::from_secs(5), vault.authorize_and_fetch(request))
        .await
        .expect("gate must give up on its own");
    assert!(matches!(result, Err(AccessError::AuditUnavailable)));
}

#[tokio::test]
async fn test_registration_refused_when_audit_unavailable() {
    let fx = Fixture::new().await;
    let vault = fx
        .with_audit_store(Arc::new(UnavailableAuditStore), CareVaultConfig::default())
        .await;

    let err = vault
        .registry()
        .register_patient(&front_desk(), intake())
        .await
        .unwrap_err();
    assert!(matches!(err, AccessError::AuditUnavailable));
}

#[tokio::test]
async fn test_unauthenticated_request_is_refused_without_audit() {
    let fx = Fixture::new().await;
    let patient = consented_patient(&fx).await;
    let before = fx.entries().await.len();

    let mut request = AccessRequest::new(nurse(), patient, Purpose::Treatment, [PhiField::Allergies]);
    request.actor = None;
    let err = fx.vault.authorize_and_fetch(request).await.unwrap_err();
    assert!(matches!(err, AccessError::Authentication));
    assert_eq!(err.status_code(), 401);
    assert_eq!(fx.entries().await.len(), before);
}

#[tokio::test]
async fn test_destroyed_key_is_recorded_as_failed_disclosure() {
    let fx = Fixture::new().await;
    let patient = consented_patient(&fx).await;
    fx.vault.registry().rotate_data_key(&admin()).await.unwrap();
    fx.keys.retire(KeyVersion(1)).unwrap();

    let request = AccessRequest::new(nurse(), patient.clone(), Purpose::Treatment, [PhiField::Allergies]);
    let err = fx.vault.authorize_and_fetch(request).await.unwrap_err();
    assert!(matches!(err, AccessError::KeyUnavailable(KeyVersion(1))));
    assert!(!err.public_message().contains("v1"));

    let entries = fx.entries().await;
    let read = &entries[entries.len() - 2];
    let failed = &entries[entries.len() - 1];
    assert_eq!(read.action, AuditAction::PhiRead);
    assert_eq!(failed.action, AuditAction::DisclosureFailed);
    assert_eq!(
        failed.reason.as_deref(),
        Some(format!("key_unavailable;read_sequence={}", read.sequence_no).as_str())
    );
    assert_eq!(failed.subject_id.as_ref(), Some(&patient));
}

#[tokio::test]
async fn test_soft_deleted_patient_reads_as_not_found() {
    let fx = Fixture::new().await;
    let patient = consented_patient(&fx).await;
    fx.vault
        .registry()
        .soft_delete_patient(&admin(), &patient, "duplicate chart")
        .await
        .unwrap();

    let request = AccessRequest::new(nurse(), patient, Purpose::Treatment, [PhiField::Allergies]);
    let err = fx.vault.authorize_and_fetch(request).await.unwrap_err();
    assert!(matches!(err, AccessError::PatientNotFound));
    assert_eq!(fx.last_entry().await.reason.as_deref(), Some("patient_not_found"));
}

#[tokio::test]
async fn test_patient_store_failure_is_audited_as_denial() {
    let fx = Fixture::new().await;
    let patient = consented_patient(&fx).await;
    let vault = fx
        .builder(CareVaultConfig::default())
        .patient_store(Arc::new(UnavailablePatientStore))
        .build()
        .await
        .unwrap();
    let before = fx.entries().await.len();

    let request = AccessRequest::new(nurse(), patient.clone(), Purpose::Treatment, [PhiField::Allergies]);
    let err = vault.authorize_and_fetch(request).await.unwrap_err();
    assert!(matches!(err, AccessError::Storage(_)));

    let entries = fx.entries().await;
    assert_eq!(entries.len(), before + 1);
    let denied = entries.last().unwrap();
    assert_eq!(denied.action, AuditAction::AccessDenied);
    assert_eq!(denied.reason.as_deref(), Some("store_unavailable"));
    assert_eq!(denied.subject_id.as_ref(), Some(&patient));
    assert_eq!(denied.accessed_fields, vec![PhiField::Allergies]);
}

#[tokio::test]
async fn test_consent_store_failure_is_audited_as_denial() {
    let fx = Fixture::new().await;
    let patient = fx.register().await;
    let vault = fx
        .builder(CareVaultConfig::default())
        .consent_store(Arc::new(UnavailableConsentStore))
        .build()
        .await
        .unwrap();
    let before = fx.entries().await.len();

    let request = AccessRequest::new(nurse(), patient, Purpose::Treatment, [PhiField::Allergies]);
    let err = vault.authorize_and_fetch(request).await.unwrap_err();
    assert!(matches!(err, AccessError::Storage(_)));
    assert_eq!(fx.entries().await.len(), before + 1);
    assert_eq!(fx.last_entry().await.action, AuditAction::AccessDenied);
    assert_eq!(fx.last_entry().await.reason.as_deref(), Some("store_unavailable"));
    assert_eq!(fx.count(AuditAction::PhiRead).await, 0);
}

#[tokio::test]
async fn test_store_failure_without_audit_is_audit_unavailable() {
    let fx = Fixture::new().await;
    let patient = fx.register().await;
    let vault = fx
        .builder(CareVaultConfig::default())
        .consent_store(Arc::new(UnavailableConsentStore))
        .audit_store(Arc::new(UnavailableAuditStore))
        .build()
        .await
        .unwrap();

    let request = AccessRequest::new(nurse(), patient, Purpose::Treatment, [PhiField::Allergies]);
    let err = vault.authorize_and_fetch(request).await.unwrap_err();
    assert!(matches!(err, AccessError::AuditUnavailable));
}

#[tokio::test]
async fn test_consent_check_timeout_denies() {
    let fx = Fixture::new().await;
    let patient = fx.register().await;
    let mut config = CareVaultConfig::default();
    config.consent.check_timeout_ms = 30;
    let vault = fx
        .builder(config)
        .consent_store(Arc::new(HangingConsentStore))
        .build()
        .await
        .unwrap();

    let request = AccessRequest::new(nurse(), patient, Purpose::Treatment, [PhiField::Allergies]);
    let result = tokio::time::timeout(Duration::from_secs(5), vault.authorize_and_fetch(request))
        .await
        .expect("consent check must give up on its own");
    match result {
        Err(AccessError::Forbidden { stage, reason }) => {
            assert_eq!(stage, GateStage::RoleChecked);
            assert_eq!(
                reason,
                DenialReason::Timeout {
                    step: "consent_check".into()
                }
            );
        }
        other => panic!("expected a timeout denial, got {:?}", other),
    }

    let denied = fx.last_entry().await;
    assert_eq!(denied.action, AuditAction::AccessDenied);
    assert_eq!(denied.reason.as_deref(), Some("timeout"));
}

#[tokio::test]
async fn test_decrypt_timeout_is_recorded_as_failed_disclosure() {
    let fx = Fixture::new().await;
    let patient = consented_patient(&fx).await;
    let mut config = CareVaultConfig::default();
    config.access.decrypt_timeout_ms = 50;
    config.crypto.key_timeout_ms = 5_000;
    let vault = fx
        .builder(config)
        .key_provider(Arc::new(StallingKeyRing(fx.keys.clone())))
        .build()
        .await
        .unwrap();

    let request = AccessRequest::new(nurse(), patient.clone(), Purpose::Treatment, [PhiField::Allergies]);
    let result = tokio::time::timeout(Duration::from_secs(5), vault.authorize_and_fetch(request))
        .await
        .expect("decrypt must give up on its own");
    assert!(matches!(
        result,
        Err(AccessError::Forbidden {
            stage: GateStage::Audited,
            reason: DenialReason::Timeout { .. },
        })
    ));

    let entries = fx.entries().await;
    let read = &entries[entries.len() - 2];
    let failed = &entries[entries.len() - 1];
    assert_eq!(read.action, AuditAction::PhiRead);
    assert_eq!(failed.action, AuditAction::DisclosureFailed);
    assert_eq!(
        failed.reason.as_deref(),
        Some(format!("timeout;read_sequence={}", read.sequence_no).as_str())
    );
    assert_eq!(failed.subject_id.as_ref(), Some(&patient));
}

//! Property tests for field encryption and lookup hashing

use carevault_audit::{AuditAction, AuditEvent, AuditLogger, AuditReceipt, MemoryAuditStore};
use carevault_crypto::{CryptoError, EncryptionService, FieldContext, LocalKeyRing};
use carevault_shared::{ActorId, AuditConfig, CryptoConfig, PatientId, PhiField, SystemClock};
use proptest::prelude::*;
use proptest::sample::select;
use std::sync::Arc;
use tokio::runtime::Runtime;

struct Harness {
    rt: Runtime,
    crypto: EncryptionService,
    audit: AuditLogger,
}

impl Harness {
    fn new() -> Self {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let audit = rt
            .block_on(AuditLogger::spawn(
                Arc::new(MemoryAuditStore::new()),
                Arc::new(SystemClock),
                &AuditConfig::default(),
            ))
            .unwrap();
        let keys = Arc::new(LocalKeyRing::generate().unwrap());
        let crypto = EncryptionService::new(keys, &CryptoConfig::default());
        Self { rt, crypto, audit }
    }

    fn receipt(&self, patient: &PatientId, field: PhiField) -> AuditReceipt {
        let event = AuditEvent::new(ActorId::from("prop.runner"), AuditAction::PhiRead)
            .subject(patient.clone())
            .fields([field]);
        self.rt.block_on(self.audit.log_event(event)).unwrap()
    }
}

fn any_field() -> impl Strategy<Value = PhiField> {
    select(PhiField::ALL.to_vec())
}

fn any_record() -> impl Strategy<Value = PatientId> {
    "[A-Z0-9]{4,16}".prop_map(|s| PatientId::from(format!("PAT-{}", s).as_str()))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_decrypt_returns_what_was_sealed(value in "\\PC{0,128}", field in any_field(), record in any_record()) {
        let h = Harness::new();
        let ctx = FieldContext::new(record.clone(), field);
        let blob = h.rt.block_on(h.crypto.encrypt(&value, &ctx)).unwrap();
        let receipt = h.receipt(&record, field);
        let opened = h.rt.block_on(h.crypto.decrypt(&blob, &ctx, &receipt)).unwrap();
        prop_assert_eq!(opened, value);
    }

    #[test]
    fn prop_sealing_twice_never_repeats_nonce(value in "\\PC{1,64}", field in any_field(), record in any_record()) {
        let h = Harness::new();
        let ctx = FieldContext::new(record, field);
        let a = h.rt.block_on(h.crypto.encrypt(&value, &ctx)).unwrap();
        let b = h.rt.block_on(h.crypto.encrypt(&value, &ctx)).unwrap();
        prop_assert_ne!(a.nonce, b.nonce);
        prop_assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn prop_blob_is_bound_to_its_record(
        value in "\\PC{1,64}",
        field in any_field(),
        owner in any_record(),
        other in any_record(),
    ) {
        prop_assume!(owner != other);
        let h = Harness::new();
        let blob = h.rt.block_on(h.crypto.encrypt(&value, &FieldContext::new(owner, field))).unwrap();

        let ctx = FieldContext::new(other.clone(), field);
        let receipt = h.receipt(&other, field);
        let err = h.rt.block_on(h.crypto.decrypt(&blob, &ctx, &receipt)).unwrap_err();
        prop_assert_eq!(err, CryptoError::IntegrityError);
    }

    #[test]
    fn prop_receipt_for_another_field_does_not_open(value in "\\PC{1,64}", record in any_record()) {
        let h = Harness::new();
        let ctx = FieldContext::new(record.clone(), PhiField::Ssn);
        let blob = h.rt.block_on(h.crypto.encrypt(&value, &ctx)).unwrap();
        let receipt = h.receipt(&record, PhiField::Name);
        let err = h.rt.block_on(h.crypto.decrypt(&blob, &ctx, &receipt)).unwrap_err();
        prop_assert_eq!(err, CryptoError::NotAudited { field: PhiField::Ssn });
    }

    #[test]
    fn prop_ssn_lookup_ignores_formatting(digits in "[0-9]{9}", sep in select(vec!["", "-", " ", "."])) {
        let h = Harness::new();
        let formatted = format!("{}{}{}{}{}", &digits[..3], sep, &digits[3..5], sep, &digits[5..]);
        let plain = h.rt.block_on(h.crypto.lookup_hash(PhiField::Ssn, &digits)).unwrap();
        let pretty = h.rt.block_on(h.crypto.lookup_hash(PhiField::Ssn, &formatted)).unwrap();
        prop_assert_eq!(plain, pretty);
    }

    #[test]
    fn prop_distinct_ssns_hash_apart(a in "[0-9]{9}", b in "[0-9]{9}") {
        prop_assume!(a != b);
        let h = Harness::new();
        let ha = h.rt.block_on(h.crypto.lookup_hash(PhiField::Ssn, &a)).unwrap();
        let hb = h.rt.block_on(h.crypto.lookup_hash(PhiField::Ssn, &b)).unwrap();
        prop_assert_ne!(ha, hb);
    }
}

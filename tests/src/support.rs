//! Shared fixtures: an assembled vault over in-memory stores, a manual
//! clock, canned actors and stores that fail on purpose.

use async_trait::async_trait;
use carevault_access::{
    Actor, CareVault, CareVaultBuilder, MemoryPatientStore, PatientIntake, PatientRecord, PatientStore, Role,
};
use carevault_audit::{AuditAction, AuditEntry, AuditStore, ChainHead, MemoryAuditStore};
use carevault_consent::{Consent, ConsentGrant, ConsentStore, GrantMethod, MemoryConsentStore};
use carevault_crypto::{CryptoResult, DataKey, EncryptedField, KeyProvider, KeyVersion, LocalKeyRing, LookupHash};
use carevault_shared::{
    ActorId, CareVaultConfig, Clock, ConsentId, ManualClock, PatientId, PhiField, Purpose, StoreError, StoreResult,
};
use chrono::{DateTime, TimeZone, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
}

pub fn physician() -> Actor {
    Actor::new("dr.chen", Role::Physician)
}

pub fn nurse() -> Actor {
    Actor::new("nurse.okafor", Role::Nurse)
}

pub fn front_desk() -> Actor {
    Actor::new("desk.rivera", Role::FrontDesk)
}

pub fn billing() -> Actor {
    Actor::new("billing.patel", Role::Billing)
}

pub fn researcher() -> Actor {
    Actor::new("research.kim", Role::Researcher)
}

pub fn compliance() -> Actor {
    Actor::new("privacy.officer", Role::ComplianceOfficer)
}

pub fn admin() -> Actor {
    Actor::new("ops.admin", Role::Admin)
}

pub fn portal() -> ActorId {
    ActorId::from("patient.portal")
}

pub fn intake() -> PatientIntake {
    PatientIntake {
        mrn: Some("MRN-000417".into()),
        ..Default::default()
    }
    .field(PhiField::Name, "Ada Lovelace")
    .field(PhiField::Dob, "1815-12-10")
    .field(PhiField::Ssn, "123-45-6789")
    .field(PhiField::Address, "12 St James's Square, London")
    .field(PhiField::Phone, "+44 20 7946 0000")
    .field(PhiField::InsuranceId, "INS-55-0192")
    .field(PhiField::Allergies, "penicillin")
    .field(PhiField::Medications, "laudanum")
    .field(PhiField::Diagnoses, "chronic fatigue")
}

pub struct Fixture {
    pub vault: CareVault,
    pub clock: Arc<ManualClock>,
    pub keys: Arc<LocalKeyRing>,
    pub journal: Arc<MemoryAuditStore>,
    pub patients: Arc<MemoryPatientStore>,
    pub consents: Arc<MemoryConsentStore>,
}

impl Fixture {
    pub async fn new() -> Self {
        Self::with_config(CareVaultConfig::default()).await
    }

    pub async fn with_config(config: CareVaultConfig) -> Self {
        let clock = Arc::new(ManualClock::new(start_time()));
        let keys = Arc::new(LocalKeyRing::generate().unwrap());
        let journal = Arc::new(MemoryAuditStore::new());
        let patients = Arc::new(MemoryPatientStore::new());
        let consents = Arc::new(MemoryConsentStore::new());
        let vault = CareVault::builder()
            .config(config)
            .clock(clock.clone())
            .key_provider(keys.clone())
            .audit_store(journal.clone())
            .patient_store(patients.clone())
            .consent_store(consents.clone())
            .build()
            .await
            .unwrap();
        Self {
            vault,
            clock,
            keys,
            journal,
            patients,
            consents,
        }
    }

    /// Builder over this fixture's clock, keys and stores; override a part
    /// to get a second vault that differs only there
    pub fn builder(&self, config: CareVaultConfig) -> CareVaultBuilder {
        CareVault::builder()
            .config(config)
            .clock(self.clock.clone())
            .key_provider(self.keys.clone())
            .audit_store(self.journal.clone())
            .patient_store(self.patients.clone())
            .consent_store(self.consents.clone())
    }

    /// Second vault over the same patients, consents and keys but a
    /// different audit store
    pub async fn with_audit_store(&self, store: Arc<dyn AuditStore>, config: CareVaultConfig) -> CareVault {
        self.builder(config).audit_store(store).build().await.unwrap()
    }

    pub async fn register(&self) -> PatientId {
        self.vault
            .registry()
            .register_patient(&front_desk(), intake())
            .await
            .unwrap()
    }

    pub async fn grant(&self, patient_id: &PatientId, purposes: &[Purpose], scope: &[PhiField]) -> ConsentId {
        let grant = ConsentGrant {
            patient_id: patient_id.clone(),
            purposes: purposes.iter().copied().collect(),
            scope: scope.iter().copied().collect(),
            effective_start: self.clock.now(),
            effective_end: None,
            method: GrantMethod::Electronic,
        };
        self.vault.consent().grant_consent(&portal(), grant).await.unwrap()
    }

    pub async fn entries(&self) -> Vec<AuditEntry> {
        self.journal.range(1, u64::MAX).await.unwrap()
    }

    pub async fn last_entry(&self) -> AuditEntry {
        self.entries().await.pop().unwrap()
    }

    pub async fn count(&self, action: AuditAction) -> usize {
        self.entries()
            .await
            .iter()
            .filter(|e| e.action == action)
            .count()
    }
}

/// Persistence that refuses every write
#[derive(Debug, Default)]
pub struct UnavailableAuditStore;

#[async_trait]
impl AuditStore for UnavailableAuditStore {
    async fn append(&self, _entry: &AuditEntry) -> StoreResult<()> {
        Err(StoreError::Unavailable("journal volume offline".into()))
    }

    async fn head(&self) -> StoreResult<Option<ChainHead>> {
        Ok(None)
    }

    async fn range(&self, _from: u64, _to: u64) -> StoreResult<Vec<AuditEntry>> {
        Ok(Vec::new())
    }

    async fn for_subject(&self, _subject: &PatientId) -> StoreResult<Vec<AuditEntry>> {
        Ok(Vec::new())
    }
}

/// Persistence whose writes never complete
#[derive(Debug, Default)]
pub struct HangingAuditStore;

#[async_trait]
impl AuditStore for HangingAuditStore {
    async fn append(&self, _entry: &AuditEntry) -> StoreResult<()> {
        std::future::pending().await
    }

    async fn head(&self) -> StoreResult<Option<ChainHead>> {
        Ok(None)
    }

    async fn range(&self, _from: u64, _to: u64) -> StoreResult<Vec<AuditEntry>> {
        Ok(Vec::new())
    }

    async fn for_subject(&self, _subject: &PatientId) -> StoreResult<Vec<AuditEntry>> {
        Ok(Vec::new())
    }
}

/// Consent database that is down
#[derive(Debug, Default)]
pub struct UnavailableConsentStore;

#[async_trait]
impl ConsentStore for UnavailableConsentStore {
    async fn insert(&self, _consent: &Consent) -> StoreResult<()> {
        Err(StoreError::Unavailable("consent db down".into()))
    }

    async fn get(&self, _id: ConsentId) -> StoreResult<Option<Consent>> {
        Err(StoreError::Unavailable("consent db down".into()))
    }

    async fn for_patient(&self, _patient: &PatientId) -> StoreResult<Vec<Consent>> {
        Err(StoreError::Unavailable("consent db down".into()))
    }

    async fn mark_revoked(&self, _id: ConsentId, _at: DateTime<Utc>, _reason: &str) -> StoreResult<Consent> {
        Err(StoreError::Unavailable("consent db down".into()))
    }
}

/// Consent database whose lookups never return
#[derive(Debug, Default)]
pub struct HangingConsentStore;

#[async_trait]
impl ConsentStore for HangingConsentStore {
    async fn insert(&self, _consent: &Consent) -> StoreResult<()> {
        std::future::pending().await
    }

    async fn get(&self, _id: ConsentId) -> StoreResult<Option<Consent>> {
        std::future::pending().await
    }

    async fn for_patient(&self, _patient: &PatientId) -> StoreResult<Vec<Consent>> {
        std::future::pending().await
    }

    async fn mark_revoked(&self, _id: ConsentId, _at: DateTime<Utc>, _reason: &str) -> StoreResult<Consent> {
        std::future::pending().await
    }
}

/// Patient database that is down
#[derive(Debug, Default)]
pub struct UnavailablePatientStore;

#[async_trait]
impl PatientStore for UnavailablePatientStore {
    async fn insert(&self, _record: &PatientRecord) -> StoreResult<()> {
        Err(StoreError::Unavailable("patient db down".into()))
    }

    async fn get(&self, _id: &PatientId) -> StoreResult<Option<PatientRecord>> {
        Err(StoreError::Unavailable("patient db down".into()))
    }

    async fn find_by_lookup(&self, _field: PhiField, _hash: &LookupHash) -> StoreResult<Vec<PatientRecord>> {
        Err(StoreError::Unavailable("patient db down".into()))
    }

    async fn mark_deleted(&self, _id: &PatientId, _at: DateTime<Utc>) -> StoreResult<()> {
        Err(StoreError::Unavailable("patient db down".into()))
    }

    async fn update_fields(&self, _id: &PatientId, _fields: BTreeMap<PhiField, EncryptedField>) -> StoreResult<()> {
        Err(StoreError::Unavailable("patient db down".into()))
    }
}

/// Key ring whose data-key fetches never return; versions and the lookup
/// key still answer
pub struct StallingKeyRing(pub Arc<LocalKeyRing>);

#[async_trait]
impl KeyProvider for StallingKeyRing {
    async fn current_key_version(&self) -> CryptoResult<KeyVersion> {
        self.0.current_key_version().await
    }

    async fn get_key(&self, _version: KeyVersion) -> CryptoResult<DataKey> {
        std::future::pending().await
    }

    async fn lookup_key(&self) -> CryptoResult<DataKey> {
        self.0.lookup_key().await
    }
}

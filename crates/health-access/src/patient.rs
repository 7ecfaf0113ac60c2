//! Patient records and their store
//!
//! Records hold only ciphertext and lookup hashes. Patients are soft-deleted
//! and never removed, so consents and audit entries keep a subject.

use async_trait::async_trait;
use carevault_crypto::{EncryptedField, LookupHash};
use carevault_shared::{PatientId, PhiField, StoreError, StoreResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientRecord {
    pub patient_id: PatientId,
    /// Medical record number from the upstream EHR; not PHI here
    pub mrn: Option<String>,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub fields: BTreeMap<PhiField, EncryptedField>,
    pub lookup_hashes: BTreeMap<PhiField, LookupHash>,
}

impl PatientRecord {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

#[async_trait]
pub trait PatientStore: Send + Sync {
    async fn insert(&self, record: &PatientRecord) -> StoreResult<()>;

    /// Record by id, soft-deleted ones included
    async fn get(&self, id: &PatientId) -> StoreResult<Option<PatientRecord>>;

    /// Records whose lookup hash for `field` equals `hash`
    async fn find_by_lookup(&self, field: PhiField, hash: &LookupHash) -> StoreResult<Vec<PatientRecord>>;

    async fn mark_deleted(&self, id: &PatientId, at: DateTime<Utc>) -> StoreResult<()>;

    /// Swap in re-encrypted blobs for the given fields
    async fn update_fields(&self, id: &PatientId, fields: BTreeMap<PhiField, EncryptedField>) -> StoreResult<()>;
}

#[derive(Debug, Default)]
pub struct MemoryPatientStore {
    records: RwLock<HashMap<PatientId, PatientRecord>>,
}

impl MemoryPatientStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PatientStore for MemoryPatientStore {
    async fn insert(&self, record: &PatientRecord) -> StoreResult<()> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.patient_id) {
            return Err(StoreError::Conflict(format!("patient {} already exists", record.patient_id)));
        }
        records.insert(record.patient_id.clone(), record.clone());
        Ok(())
    }

    async fn get(&self, id: &PatientId) -> StoreResult<Option<PatientRecord>> {
        Ok(self.records.read().await.get(id).cloned())
    }

    async fn find_by_lookup(&self, field: PhiField, hash: &LookupHash) -> StoreResult<Vec<PatientRecord>> {
        let mut found: Vec<PatientRecord> = self
            .records
            .read()
            .await
            .values()
            .filter(|r| r.lookup_hashes.get(&field) == Some(hash))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.patient_id.cmp(&b.patient_id));
        Ok(found)
    }

    async fn mark_deleted(&self, id: &PatientId, at: DateTime<Utc>) -> StoreResult<()> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(id)
            .ok_or_else(|| StoreError::Conflict(format!("patient {} not found", id)))?;
        if record.deleted_at.is_none() {
            record.deleted_at = Some(at);
        }
        Ok(())
    }

    async fn update_fields(&self, id: &PatientId, fields: BTreeMap<PhiField, EncryptedField>) -> StoreResult<()> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(id)
            .ok_or_else(|| StoreError::Conflict(format!("patient {} not found", id)))?;
        record.fields.extend(fields);
        Ok(())
    }
}

//! Consent persistence seam
//!
//! Consents are never deleted. Revocation is recorded on the existing
//! record so the history stays available for disclosure accounting.

use crate::model::Consent;
use async_trait::async_trait;
use carevault_shared::{ConsentId, PatientId, StoreError, StoreResult};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

#[async_trait]
pub trait ConsentStore: Send + Sync {
    async fn insert(&self, consent: &Consent) -> StoreResult<()>;

    async fn get(&self, id: ConsentId) -> StoreResult<Option<Consent>>;

    /// Every consent for a patient, revoked ones included, oldest first
    async fn for_patient(&self, patient: &PatientId) -> StoreResult<Vec<Consent>>;

    /// Set `revoked_at` and the reason. Conflicts if the consent is unknown
    /// or already revoked.
    async fn mark_revoked(&self, id: ConsentId, at: DateTime<Utc>, reason: &str) -> StoreResult<Consent>;
}

#[derive(Debug, Default)]
pub struct MemoryConsentStore {
    consents: RwLock<HashMap<ConsentId, Consent>>,
}

impl MemoryConsentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConsentStore for MemoryConsentStore {
    async fn insert(&self, consent: &Consent) -> StoreResult<()> {
        let mut consents = self.consents.write().await;
        if consents.contains_key(&consent.consent_id) {
            return Err(StoreError::Conflict(format!("consent {} already exists", consent.consent_id)));
        }
        consents.insert(consent.consent_id, consent.clone());
        Ok(())
    }

    async fn get(&self, id: ConsentId) -> StoreResult<Option<Consent>> {
        Ok(self.consents.read().await.get(&id).cloned())
    }

    async fn for_patient(&self, patient: &PatientId) -> StoreResult<Vec<Consent>> {
        let mut found: Vec<Consent> = self
            .consents
            .read()
            .await
            .values()
            .filter(|c| &c.patient_id == patient)
            .cloned()
            .collect();
        found.sort_by_key(|c| (c.granted_at, c.consent_id));
        Ok(found)
    }

    async fn mark_revoked(&self, id: ConsentId, at: DateTime<Utc>, reason: &str) -> StoreResult<Consent> {
        let mut consents = self.consents.write().await;
        let consent = consents
            .get_mut(&id)
            .ok_or_else(|| StoreError::Conflict(format!("consent {} not found", id)))?;
        if consent.revoked_at.is_some() {
            return Err(StoreError::Conflict(format!("consent {} already revoked", id)));
        }
        consent.revoked_at = Some(at);
        consent.revocation_reason = Some(reason.to_string());
        Ok(consent.clone())
    }
}

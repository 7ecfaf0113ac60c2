//! Service assembly
//!
//! Wires one configuration, one audit chain, one key provider and the three
//! stores into the consent service, the gate and the registry.

use crate::error::{AccessError, AccessResult, GateStage};
use crate::gate::{AccessControlGate, AccessRequest, PatientView};
use crate::patient::{MemoryPatientStore, PatientStore};
use crate::registry::PatientRegistry;
use crate::roles::Actor;
use carevault_audit::{AuditError, AuditLogger, AuditStore, ChainBreak, DisclosureReport, JsonlAuditStore, MemoryAuditStore};
use carevault_consent::{ConsentService, ConsentStore, MemoryConsentStore};
use carevault_crypto::{CryptoError, EncryptionService, KeyProvider, LocalKeyRing};
use carevault_shared::{CareVaultConfig, Clock, ConfigError, DenialReason, PatientId, StoreError, SystemClock};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum VaultError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("audit chain: {0}")]
    Audit(#[from] AuditError),
    #[error("store: {0}")]
    Store(#[from] StoreError),
    #[error("key provider: {0}")]
    Crypto(#[from] CryptoError),
}

#[derive(Default)]
pub struct CareVaultBuilder {
    config: CareVaultConfig,
    keys: Option<Arc<dyn KeyProvider>>,
    clock: Option<Arc<dyn Clock>>,
    audit_store: Option<Arc<dyn AuditStore>>,
    consent_store: Option<Arc<dyn ConsentStore>>,
    patient_store: Option<Arc<dyn PatientStore>>,
}

impl CareVaultBuilder {
    pub fn config(mut self, config: CareVaultConfig) -> Self {
        self.config = config;
        self
    }

    pub fn key_provider(mut self, keys: Arc<dyn KeyProvider>) -> Self {
        self.keys = Some(keys);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Overrides `audit.journal_path`
    pub fn audit_store(mut self, store: Arc<dyn AuditStore>) -> Self {
        self.audit_store = Some(store);
        self
    }

    pub fn consent_store(mut self, store: Arc<dyn ConsentStore>) -> Self {
        self.consent_store = Some(store);
        self
    }

    pub fn patient_store(mut self, store: Arc<dyn PatientStore>) -> Self {
        self.patient_store = Some(store);
        self
    }

    /// Validate the configuration, open the audit store and start the
    /// chain writer. Must run inside a tokio runtime.
    pub async fn build(self) -> Result<CareVault, VaultError> {
        self.config.validate()?;

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let keys: Arc<dyn KeyProvider> = match self.keys {
            Some(keys) => keys,
            None => {
                warn!("no key provider configured, using an ephemeral in-memory key ring");
                Arc::new(LocalKeyRing::generate()?)
            }
        };
        let audit_store: Arc<dyn AuditStore> = match (self.audit_store, &self.config.audit.journal_path) {
            (Some(store), _) => store,
            (None, Some(path)) => Arc::new(JsonlAuditStore::open(path).await?),
            (None, None) => Arc::new(MemoryAuditStore::new()),
        };
        let consent_store = self
            .consent_store
            .unwrap_or_else(|| Arc::new(MemoryConsentStore::new()));
        let patient_store = self
            .patient_store
            .unwrap_or_else(|| Arc::new(MemoryPatientStore::new()));

        let audit = AuditLogger::spawn(audit_store, clock.clone(), &self.config.audit).await?;
        let crypto = EncryptionService::new(keys, &self.config.crypto);
        let consent = ConsentService::new(
            consent_store,
            audit.clone(),
            clock.clone(),
            self.config.consent.clone(),
        );
        let gate = AccessControlGate::new(
            patient_store.clone(),
            consent.clone(),
            audit.clone(),
            crypto.clone(),
            &self.config.access,
        );
        let registry = PatientRegistry::new(patient_store, audit.clone(), crypto, clock);

        info!(
            journal = ?self.config.audit.journal_path,
            scope_resolution = ?self.config.consent.scope_resolution,
            "carevault ready"
        );
        Ok(CareVault {
            config: self.config,
            audit,
            consent,
            gate,
            registry,
        })
    }
}

/// Assembled PHI data-access layer
#[derive(Clone)]
pub struct CareVault {
    config: CareVaultConfig,
    audit: AuditLogger,
    consent: ConsentService,
    gate: AccessControlGate,
    registry: PatientRegistry,
}

impl CareVault {
    pub fn builder() -> CareVaultBuilder {
        CareVaultBuilder::default()
    }

    pub fn config(&self) -> &CareVaultConfig {
        &self.config
    }

    pub fn audit(&self) -> &AuditLogger {
        &self.audit
    }

    pub fn consent(&self) -> &ConsentService {
        &self.consent
    }

    pub fn gate(&self) -> &AccessControlGate {
        &self.gate
    }

    pub fn registry(&self) -> &PatientRegistry {
        &self.registry
    }

    pub async fn authorize_and_fetch(&self, request: AccessRequest) -> AccessResult<PatientView> {
        self.gate.authorize_and_fetch(request).await
    }

    fn require_audit_review(actor: &Actor) -> AccessResult<()> {
        if actor.role.capability().can_review_audit {
            Ok(())
        } else {
            Err(AccessError::Forbidden {
                stage: GateStage::Authenticated,
                reason: DenialReason::OperationNotPermitted {
                    operation: "audit_review".into(),
                },
            })
        }
    }

    /// Accounting of disclosures for compliance review
    pub async fn disclosure_report(
        &self,
        actor: &Actor,
        patient_id: &PatientId,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> AccessResult<DisclosureReport> {
        Self::require_audit_review(actor)?;
        self.audit
            .disclosure_report(patient_id, period_start, period_end)
            .await
            .map_err(|e| AccessError::Storage(e.to_string()))
    }

    /// First break in the whole chain, if any
    pub async fn verify_audit_chain(&self, actor: &Actor) -> AccessResult<Option<ChainBreak>> {
        Self::require_audit_review(actor)?;
        let Some(head) = self.audit.head() else {
            return Ok(None);
        };
        self.audit
            .first_break(1, head.sequence_no)
            .await
            .map_err(|e| AccessError::Storage(e.to_string()))
    }
}

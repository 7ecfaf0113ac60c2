//! Consent records and their evaluation

use carevault_shared::{ActorId, ConsentId, DenialReason, PatientId, PhiField, Purpose, ScopeResolution};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// How the patient gave consent
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantMethod {
    Written,
    Electronic,
    Verbal,
    /// Given by a legal guardian or healthcare proxy
    Guardian,
}

/// Status of a consent at a point in time
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsentStatus {
    Active,
    Revoked,
    Expired,
    /// Effective start is still in the future
    Pending,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Consent {
    pub consent_id: ConsentId,
    pub patient_id: PatientId,
    pub purposes: BTreeSet<Purpose>,
    pub scope: BTreeSet<PhiField>,
    pub effective_start: DateTime<Utc>,
    /// Open-ended when `None`
    pub effective_end: Option<DateTime<Utc>>,
    pub method: GrantMethod,
    pub granted_at: DateTime<Utc>,
    pub granted_by: ActorId,
    pub revoked_at: Option<DateTime<Utc>>,
    pub revocation_reason: Option<String>,
}

impl Consent {
    /// Revocation wins over the time window; the window end is exclusive
    pub fn status_at(&self, now: DateTime<Utc>) -> ConsentStatus {
        if matches!(self.revoked_at, Some(revoked) if revoked <= now) {
            return ConsentStatus::Revoked;
        }
        if matches!(self.effective_end, Some(end) if end <= now) {
            return ConsentStatus::Expired;
        }
        if self.effective_start > now {
            return ConsentStatus::Pending;
        }
        ConsentStatus::Active
    }

    pub fn covers_purpose(&self, purpose: Purpose) -> bool {
        self.purposes.contains(&purpose)
    }
}

/// Input to `grant_consent`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentGrant {
    pub patient_id: PatientId,
    pub purposes: BTreeSet<Purpose>,
    pub scope: BTreeSet<PhiField>,
    pub effective_start: DateTime<Utc>,
    pub effective_end: Option<DateTime<Utc>>,
    pub method: GrantMethod,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConsentDecision {
    Allowed {
        /// Effective consents that contributed to the decision
        consent_ids: Vec<ConsentId>,
        /// Fields the combined scope permits
        permitted_fields: BTreeSet<PhiField>,
    },
    Denied(DenialReason),
}

impl ConsentDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, ConsentDecision::Allowed { .. })
    }
}

/// Decide whether `requested` may be disclosed for `purpose` at `now`.
///
/// Only consents covering `purpose` are considered. When none of them is
/// effective the reason is, in priority order, revoked, expired, not yet
/// effective, or no consent at all.
pub fn evaluate(
    consents: &[Consent],
    purpose: Purpose,
    requested: &BTreeSet<PhiField>,
    now: DateTime<Utc>,
    resolution: ScopeResolution,
) -> ConsentDecision {
    let covering: Vec<&Consent> = consents.iter().filter(|c| c.covers_purpose(purpose)).collect();
    let effective: Vec<&Consent> = covering
        .iter()
        .copied()
        .filter(|c| c.status_at(now) == ConsentStatus::Active)
        .collect();

    if effective.is_empty() {
        let has = |status: ConsentStatus| covering.iter().any(|c| c.status_at(now) == status);
        let reason = if has(ConsentStatus::Revoked) {
            DenialReason::ConsentRevoked
        } else if has(ConsentStatus::Expired) {
            DenialReason::ConsentExpired
        } else if has(ConsentStatus::Pending) {
            DenialReason::ConsentNotYetEffective
        } else {
            DenialReason::NoConsent
        };
        return ConsentDecision::Denied(reason);
    }

    let permitted = combine_scopes(&effective, resolution);
    let missing: Vec<PhiField> = requested.difference(&permitted).copied().collect();
    if !missing.is_empty() {
        return ConsentDecision::Denied(DenialReason::FieldsOutOfScope { fields: missing });
    }

    ConsentDecision::Allowed {
        consent_ids: effective.iter().map(|c| c.consent_id).collect(),
        permitted_fields: permitted,
    }
}

fn combine_scopes(effective: &[&Consent], resolution: ScopeResolution) -> BTreeSet<PhiField> {
    match resolution {
        ScopeResolution::Union => effective.iter().flat_map(|c| c.scope.iter().copied()).collect(),
        ScopeResolution::Intersection => {
            let mut scopes = effective.iter().map(|c| c.scope.clone());
            let first = scopes.next().unwrap_or_default();
            scopes.fold(first, |acc, scope| acc.intersection(&scope).copied().collect())
        }
    }
}

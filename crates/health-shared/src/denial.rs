//! Denial reasons
//!
//! Every denial carries a reason with a stable snake_case code. The code is
//! what lands in the audit chain, so it must never change once released.

use crate::vocab::{fields_display, PhiField, Purpose};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum DenialReason {
    /// Empty field list: a request must name what it needs
    NoFieldsRequested,
    /// The actor's role may not act under this purpose
    PurposeNotPermitted { purpose: Purpose },
    /// The actor's role may never see these fields
    RoleFieldsNotPermitted { fields: Vec<PhiField> },
    /// The purpose does not justify disclosing these fields
    MinimumNecessary { fields: Vec<PhiField> },
    /// The role lacks an administrative right (register, delete, key management)
    OperationNotPermitted { operation: String },
    PatientNotFound,
    /// No consent has ever covered the purpose
    NoConsent,
    ConsentRevoked,
    ConsentExpired,
    ConsentNotYetEffective,
    /// Effective consents exist but their scope does not cover these fields
    FieldsOutOfScope { fields: Vec<PhiField> },
    /// A bounded step did not finish in time
    Timeout { step: String },
    /// A backing store failed while the request was being evaluated
    StoreUnavailable { step: String },
}

impl DenialReason {
    /// Stable code written to the audit chain
    pub fn code(&self) -> &'static str {
        match self {
            DenialReason::NoFieldsRequested => "no_fields_requested",
            DenialReason::PurposeNotPermitted { .. } => "purpose_not_permitted",
            DenialReason::RoleFieldsNotPermitted { .. } => "role_fields_not_permitted",
            DenialReason::MinimumNecessary { .. } => "minimum_necessary",
            DenialReason::OperationNotPermitted { .. } => "operation_not_permitted",
            DenialReason::PatientNotFound => "patient_not_found",
            DenialReason::NoConsent => "no_consent",
            DenialReason::ConsentRevoked => "consent_revoked",
            DenialReason::ConsentExpired => "consent_expired",
            DenialReason::ConsentNotYetEffective => "consent_not_yet_effective",
            DenialReason::FieldsOutOfScope { .. } => "fields_out_of_scope",
            DenialReason::Timeout { .. } => "timeout",
            DenialReason::StoreUnavailable { .. } => "store_unavailable",
        }
    }

    /// Whether the reason came from consent evaluation
    pub fn is_consent_reason(&self) -> bool {
        matches!(
            self,
            DenialReason::NoConsent
                | DenialReason::ConsentRevoked
                | DenialReason::ConsentExpired
                | DenialReason::ConsentNotYetEffective
                | DenialReason::FieldsOutOfScope { .. }
        )
    }
}

impl fmt::Display for DenialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DenialReason::PurposeNotPermitted { purpose } => {
                write!(f, "{} ({})", self.code(), purpose)
            }
            DenialReason::RoleFieldsNotPermitted { fields }
            | DenialReason::MinimumNecessary { fields }
            | DenialReason::FieldsOutOfScope { fields } => {
                write!(f, "{} ({})", self.code(), fields_display(fields))
            }
            DenialReason::OperationNotPermitted { operation } => {
                write!(f, "{} ({})", self.code(), operation)
            }
            DenialReason::Timeout { step } | DenialReason::StoreUnavailable { step } => {
                write!(f, "{} ({})", self.code(), step)
            }
            _ => f.write_str(self.code()),
        }
    }
}

use carevault_crypto::KeyVersion;
use carevault_shared::DenialReason;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Where a request stood when it was refused
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GateStage {
    Unauthenticated,
    Authenticated,
    RoleChecked,
    ConsentChecked,
    FieldFiltered,
    Audited,
    Responded,
    Denied,
}

impl fmt::Display for GateStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GateStage::Unauthenticated => write!(f, "unauthenticated"),
            GateStage::Authenticated => write!(f, "authenticated"),
            GateStage::RoleChecked => write!(f, "role_checked"),
            GateStage::ConsentChecked => write!(f, "consent_checked"),
            GateStage::FieldFiltered => write!(f, "field_filtered"),
            GateStage::Audited => write!(f, "audited"),
            GateStage::Responded => write!(f, "responded"),
            GateStage::Denied => write!(f, "denied"),
        }
    }
}

#[derive(Debug, Error)]
pub enum AccessError {
    #[error("authentication required")]
    Authentication,
    /// Refused by the role or purpose rules; `stage` is the last stage passed
    #[error("forbidden after {stage}: {reason}")]
    Forbidden { stage: GateStage, reason: DenialReason },
    #[error("consent denied: {reason}")]
    ConsentDenied { reason: DenialReason },
    #[error("patient not found")]
    PatientNotFound,
    /// Tampered or replayed ciphertext, or a broken audit chain
    #[error("integrity failure: {0}")]
    Integrity(String),
    /// The audit chain could not record the event; nothing was disclosed
    #[error("audit log unavailable")]
    AuditUnavailable,
    #[error("key version {0} unavailable")]
    KeyUnavailable(KeyVersion),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("invalid request: {0}")]
    Invalid(String),
}

impl AccessError {
    /// HTTP status for the excluded handler layer
    pub fn status_code(&self) -> u16 {
        match self {
            AccessError::Authentication => 401,
            AccessError::Forbidden { .. } | AccessError::ConsentDenied { .. } => 403,
            AccessError::PatientNotFound => 404,
            AccessError::Invalid(_) => 400,
            AccessError::AuditUnavailable | AccessError::KeyUnavailable(_) => 503,
            AccessError::Integrity(_) | AccessError::Storage(_) => 500,
        }
    }

    /// Message safe to show an end user. Never includes crypto detail.
    pub fn public_message(&self) -> &'static str {
        match self {
            AccessError::Authentication => "Authentication required",
            AccessError::Forbidden { .. } => "You are not permitted to access this information",
            AccessError::ConsentDenied { .. } => "Patient consent does not permit this access",
            AccessError::PatientNotFound => "Patient not found",
            AccessError::Invalid(_) => "Invalid request",
            AccessError::Integrity(_)
            | AccessError::AuditUnavailable
            | AccessError::KeyUnavailable(_)
            | AccessError::Storage(_) => "Data unavailable",
        }
    }

    /// Failures an operator must look at, as opposed to ordinary denials
    pub fn is_security_incident(&self) -> bool {
        matches!(self, AccessError::Integrity(_) | AccessError::AuditUnavailable)
    }

    /// Denial reason, for denials that carry one
    pub fn denial_reason(&self) -> Option<&DenialReason> {
        match self {
            AccessError::Forbidden { reason, .. } | AccessError::ConsentDenied { reason } => Some(reason),
            _ => None,
        }
    }
}

pub type AccessResult<T> = Result<T, AccessError>;

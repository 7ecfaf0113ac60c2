use carevault_audit::AuditError;
use carevault_shared::{ConsentId, StoreError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConsentError {
    #[error("invalid consent: {0}")]
    Invalid(String),
    #[error("consent {0} not found")]
    NotFound(ConsentId),
    #[error("consent {0} is already revoked")]
    AlreadyRevoked(ConsentId),
    /// The change was not recorded on the audit chain
    #[error("consent change not audited: {0}")]
    AuditUnavailable(#[from] AuditError),
    #[error("consent store error: {0}")]
    Store(#[from] StoreError),
    #[error("consent lookup timed out")]
    Timeout,
}

pub type ConsentResult<T> = Result<T, ConsentError>;

use carevault_shared::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuditError {
    /// The entry was not committed. Callers must treat the guarded
    /// operation as failed.
    #[error("audit log unavailable: {0}")]
    Unavailable(String),
    /// The writer task has stopped and will accept no further entries
    #[error("audit writer stopped")]
    WriterStopped,
    #[error("audit store error: {0}")]
    Store(#[from] StoreError),
    #[error("invalid audit range: {from}..={to}")]
    InvalidRange { from: u64, to: u64 },
}

pub type AuditResult<T> = Result<T, AuditError>;

//! CareVault Audit Chain
//!
//! Append-only, hash-chained record of every PHI disclosure, denial and
//! administrative change. A single writer task owns the chain head;
//! [`AuditLogger`] handles are cheap to clone and hand events to it.
//!
//! A committed entry yields an [`AuditReceipt`], which the encryption layer
//! requires before it will decrypt a field.

pub mod entry;
pub mod error;
pub mod jsonl;
pub mod logger;
pub mod report;
pub mod store;
pub mod verify;

pub use entry::{AuditAction, AuditEntry, AuditEvent, ChainHash};
pub use error::{AuditError, AuditResult};
pub use jsonl::JsonlAuditStore;
pub use logger::{AuditLogger, AuditReceipt};
pub use report::{DisclosureRecord, DisclosureReport};
pub use store::{AuditStore, ChainHead, MemoryAuditStore};
pub use verify::{find_break, scan_store, ChainBreak};

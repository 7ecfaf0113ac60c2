//! Audit persistence seam
//!
//! Stores expose append and read operations only. There is deliberately no
//! update or delete method on the trait or on any implementation.

use crate::entry::{AuditEntry, ChainHash};
use async_trait::async_trait;
use carevault_shared::{PatientId, StoreError, StoreResult};
use tokio::sync::RwLock;

/// Last committed link in the chain
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChainHead {
    pub sequence_no: u64,
    pub hash: ChainHash,
}

#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Persist one sealed entry atomically. Must reject an entry that does
    /// not extend the current tail.
    async fn append(&self, entry: &AuditEntry) -> StoreResult<()>;

    /// Tail of the persisted chain, `None` when empty
    async fn head(&self) -> StoreResult<Option<ChainHead>>;

    /// Entries with `from <= sequence_no <= to`, in sequence order
    async fn range(&self, from: u64, to: u64) -> StoreResult<Vec<AuditEntry>>;

    /// Every entry about one patient, in sequence order
    async fn for_subject(&self, subject: &PatientId) -> StoreResult<Vec<AuditEntry>>;
}

/// Check that `entry` may follow `tail`
pub(crate) fn check_extends(tail: Option<ChainHead>, entry: &AuditEntry) -> StoreResult<()> {
    let (expected_seq, expected_prev) = match tail {
        Some(head) => (head.sequence_no + 1, head.hash),
        None => (1, ChainHash::GENESIS),
    };
    if entry.sequence_no != expected_seq {
        return Err(StoreError::Conflict(format!(
            "expected sequence {}, got {}",
            expected_seq, entry.sequence_no
        )));
    }
    if entry.previous_hash != expected_prev {
        return Err(StoreError::Conflict(format!(
            "entry {} does not link to the current tail",
            entry.sequence_no
        )));
    }
    Ok(())
}

/// In-process chain, for tests and single-node development
#[derive(Debug, Default)]
pub struct MemoryAuditStore {
    entries: RwLock<Vec<AuditEntry>>,
}

impl MemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl AuditStore for MemoryAuditStore {
    async fn append(&self, entry: &AuditEntry) -> StoreResult<()> {
        let mut entries = self.entries.write().await;
        let tail = entries.last().map(|e| ChainHead {
            sequence_no: e.sequence_no,
            hash: e.current_hash,
        });
        check_extends(tail, entry)?;
        entries.push(entry.clone());
        Ok(())
    }

    async fn head(&self) -> StoreResult<Option<ChainHead>> {
        Ok(self.entries.read().await.last().map(|e| ChainHead {
            sequence_no: e.sequence_no,
            hash: e.current_hash,
        }))
    }

    async fn range(&self, from: u64, to: u64) -> StoreResult<Vec<AuditEntry>> {
        Ok(self
            .entries
            .read()
            .await
            .iter()
            .filter(|e| e.sequence_no >= from && e.sequence_no <= to)
            .cloned()
            .collect())
    }

    async fn for_subject(&self, subject: &PatientId) -> StoreResult<Vec<AuditEntry>> {
        Ok(self
            .entries
            .read()
            .await
            .iter()
            .filter(|e| e.subject_id.as_ref() == Some(subject))
            .cloned()
            .collect())
    }
}

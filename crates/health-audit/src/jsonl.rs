//! JSON-lines journal
//!
//! One entry per line, appended with a single `write_all` followed by
//! `sync_data`. Reads go back to the file so out-of-band edits are visible
//! to verification; the tail is tracked in memory from open and appends.

use crate::entry::AuditEntry;
use crate::store::{check_extends, AuditStore, ChainHead};
use async_trait::async_trait;
use carevault_shared::{PatientId, StoreError, StoreResult};
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

pub struct JsonlAuditStore {
    path: PathBuf,
    state: Mutex<JournalState>,
}

struct JournalState {
    file: File,
    /// Byte length of the committed journal
    len: u64,
    head: Option<ChainHead>,
    /// Set when a failed append could not be rolled back
    poisoned: bool,
}

impl JsonlAuditStore {
    /// Open or create a journal. A torn trailing line left by a crash is
    /// truncated; any other undecodable line is reported as corrupt.
    pub async fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)
            .await?;

        let content = tokio::fs::read(&path).await?;
        let committed = match content.iter().rposition(|&b| b == b'\n') {
            Some(idx) => idx + 1,
            None => 0,
        };
        if committed < content.len() {
            warn!(
                path = %path.display(),
                torn_bytes = content.len() - committed,
                "truncating torn trailing audit line"
            );
            file.set_len(committed as u64).await?;
        }

        let entries = parse_journal(&content[..committed])?;
        let head = entries.last().map(|e| ChainHead {
            sequence_no: e.sequence_no,
            hash: e.current_hash,
        });
        info!(path = %path.display(), entries = entries.len(), "audit journal opened");

        Ok(Self {
            path,
            state: Mutex::new(JournalState {
                file,
                len: committed as u64,
                head,
                poisoned: false,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn is_poisoned(&self) -> bool {
        self.state.lock().await.poisoned
    }

    async fn read_all(&self) -> StoreResult<Vec<AuditEntry>> {
        let content = tokio::fs::read(&self.path).await?;
        let committed = match content.iter().rposition(|&b| b == b'\n') {
            Some(idx) => idx + 1,
            None => 0,
        };
        parse_journal(&content[..committed])
    }
}

fn parse_journal(bytes: &[u8]) -> StoreResult<Vec<AuditEntry>> {
    bytes
        .split(|&b| b == b'\n')
        .enumerate()
        .filter(|(_, line)| !line.is_empty())
        .map(|(idx, line)| {
            serde_json::from_slice::<AuditEntry>(line)
                .map_err(|e| StoreError::Corrupt(format!("journal line {}: {}", idx + 1, e)))
        })
        .collect()
}

async fn write_line(file: &mut File, line: &[u8]) -> std::io::Result<()> {
    file.write_all(line).await?;
    file.flush().await?;
    file.sync_data().await
}

#[async_trait]
impl AuditStore for JsonlAuditStore {
    async fn append(&self, entry: &AuditEntry) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        if state.poisoned {
            return Err(StoreError::Unavailable(format!(
                "journal {} is poisoned after a failed rollback",
                self.path.display()
            )));
        }
        check_extends(state.head, entry)?;

        let mut line = serde_json::to_vec(entry)
            .map_err(|e| StoreError::Corrupt(format!("cannot encode entry: {}", e)))?;
        line.push(b'\n');

        if let Err(err) = write_line(&mut state.file, &line).await {
            let committed = state.len;
            match state.file.set_len(committed).await {
                Ok(()) => warn!(
                    sequence_no = entry.sequence_no,
                    error = %err,
                    "audit append failed, journal rolled back"
                ),
                Err(rollback) => {
                    state.poisoned = true;
                    error!(
                        target: carevault_shared::telemetry::ALERT_TARGET,
                        sequence_no = entry.sequence_no,
                        error = %err,
                        rollback_error = %rollback,
                        "audit journal rollback failed, store poisoned"
                    );
                }
            }
            return Err(err.into());
        }

        state.len += line.len() as u64;
        state.head = Some(ChainHead {
            sequence_no: entry.sequence_no,
            hash: entry.current_hash,
        });
        Ok(())
    }

    async fn head(&self) -> StoreResult<Option<ChainHead>> {
        Ok(self.state.lock().await.head)
    }

    async fn range(&self, from: u64, to: u64) -> StoreResult<Vec<AuditEntry>> {
        Ok(self
            .read_all()
            .await?
            .into_iter()
            .filter(|e| e.sequence_no >= from && e.sequence_no <= to)
            .collect())
    }

    async fn for_subject(&self, subject: &PatientId) -> StoreResult<Vec<AuditEntry>> {
        Ok(self
            .read_all()
            .await?
            .into_iter()
            .filter(|e| e.subject_id.as_ref() == Some(subject))
            .collect())
    }
}

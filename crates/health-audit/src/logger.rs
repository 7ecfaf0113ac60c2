//! Single-writer audit chain
//!
//! One task owns the chain head and performs "read previous hash, seal,
//! persist" for every entry in queue order. Callers hand events over a
//! bounded channel and wait for the commit on a oneshot reply.

use crate::entry::{AuditAction, AuditEntry, AuditEvent, ChainHash};
use crate::error::{AuditError, AuditResult};
use crate::store::{AuditStore, ChainHead};
use carevault_shared::telemetry::ALERT_TARGET;
use carevault_shared::{AuditConfig, Clock, PatientId, PhiField};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, instrument, warn};

/// Proof that an entry was committed to the chain.
///
/// Only the audit writer can construct one. Decryption demands a receipt
/// covering the subject and field, so PHI cannot be decrypted before its
/// disclosure is on the chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuditReceipt {
    sequence_no: u64,
    hash: ChainHash,
    action: AuditAction,
    subject: Option<PatientId>,
    fields: Vec<PhiField>,
}

impl AuditReceipt {
    fn from_entry(entry: &AuditEntry) -> Self {
        Self {
            sequence_no: entry.sequence_no,
            hash: entry.current_hash,
            action: entry.action,
            subject: entry.subject_id.clone(),
            fields: entry.accessed_fields.clone(),
        }
    }

    /// Entry id of the committed event
    pub fn sequence_no(&self) -> u64 {
        self.sequence_no
    }

    pub fn hash(&self) -> ChainHash {
        self.hash
    }

    pub fn action(&self) -> AuditAction {
        self.action
    }

    pub fn subject(&self) -> Option<&PatientId> {
        self.subject.as_ref()
    }

    pub fn fields(&self) -> &[PhiField] {
        &self.fields
    }

    /// Whether this receipt authorizes decrypting `field` of `subject`
    pub fn covers(&self, subject: &PatientId, field: PhiField) -> bool {
        self.action.discloses_phi()
            && self.subject.as_ref() == Some(subject)
            && self.fields.contains(&field)
    }
}

struct AppendRequest {
    event: AuditEvent,
    reply: oneshot::Sender<AuditResult<AuditReceipt>>,
}

/// Cloneable handle to the audit chain
#[derive(Clone)]
pub struct AuditLogger {
    tx: mpsc::Sender<AppendRequest>,
    head: watch::Receiver<Option<ChainHead>>,
    store: Arc<dyn AuditStore>,
    write_timeout: Duration,
}

impl AuditLogger {
    /// Start the chain writer on the current tokio runtime.
    ///
    /// The head is loaded from the store, so a reopened journal continues
    /// its existing chain.
    pub async fn spawn(
        store: Arc<dyn AuditStore>,
        clock: Arc<dyn Clock>,
        config: &AuditConfig,
    ) -> AuditResult<Self> {
        let head = store.head().await?;
        let (tx, rx) = mpsc::channel(config.queue_depth.max(1));
        let (head_tx, head_rx) = watch::channel(head);

        let writer = ChainWriter {
            store: Arc::clone(&store),
            clock,
            head,
            head_tx,
        };
        tokio::spawn(writer.run(rx));

        info!(
            head_sequence = head.map(|h| h.sequence_no).unwrap_or(0),
            queue_depth = config.queue_depth,
            "audit writer started"
        );

        Ok(Self {
            tx,
            head: head_rx,
            store,
            write_timeout: config.write_timeout(),
        })
    }

    /// Append an event and wait for it to be committed.
    ///
    /// Any failure (store error, stopped writer, no reply within the write
    /// timeout) is an error; the caller must not proceed with the audited
    /// operation. An event already handed to the writer is still committed
    /// if the caller gives up waiting.
    #[instrument(
        name = "audit.log_event",
        skip_all,
        fields(action = %event.action, actor = %event.actor_id)
    )]
    pub async fn log_event(&self, event: AuditEvent) -> AuditResult<AuditReceipt> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let request = AppendRequest {
            event,
            reply: reply_tx,
        };

        let commit = async {
            self.tx
                .send(request)
                .await
                .map_err(|_| AuditError::WriterStopped)?;
            reply_rx.await.map_err(|_| AuditError::WriterStopped)?
        };

        match tokio::time::timeout(self.write_timeout, commit).await {
            Ok(Ok(receipt)) => {
                debug!(sequence_no = receipt.sequence_no, "audit entry committed");
                Ok(receipt)
            }
            Ok(Err(err)) => {
                warn!(error = %err, "audit append failed");
                Err(match err {
                    AuditError::Unavailable(_) => err,
                    other => AuditError::Unavailable(other.to_string()),
                })
            }
            Err(_) => {
                warn!(
                    timeout_ms = self.write_timeout.as_millis() as u64,
                    "audit append timed out"
                );
                Err(AuditError::Unavailable("timed out waiting for commit".into()))
            }
        }
    }

    /// Last committed link as seen by the writer
    pub fn head(&self) -> Option<ChainHead> {
        *self.head.borrow()
    }

    pub(crate) fn store(&self) -> &Arc<dyn AuditStore> {
        &self.store
    }
}

struct ChainWriter {
    store: Arc<dyn AuditStore>,
    clock: Arc<dyn Clock>,
    head: Option<ChainHead>,
    head_tx: watch::Sender<Option<ChainHead>>,
}

impl ChainWriter {
    async fn run(mut self, mut rx: mpsc::Receiver<AppendRequest>) {
        while let Some(request) = rx.recv().await {
            let result = self.commit(request.event).await;
            // Caller may have timed out; the entry stays committed either way
            let _ = request.reply.send(result);
        }
        debug!("audit writer stopped");
    }

    async fn commit(&mut self, event: AuditEvent) -> AuditResult<AuditReceipt> {
        let (sequence_no, previous_hash) = match self.head {
            Some(head) => (head.sequence_no + 1, head.hash),
            None => (1, ChainHash::GENESIS),
        };
        let entry = AuditEntry::seal(sequence_no, self.clock.now(), event, previous_hash);

        if let Err(err) = self.store.append(&entry).await {
            error!(
                target: ALERT_TARGET,
                sequence_no,
                action = %entry.action,
                error = %err,
                "audit store rejected append"
            );
            // The store may have committed before failing; follow its tail
            if let Ok(head) = self.store.head().await {
                if head != self.head {
                    warn!(stored = ?head, "audit head resynchronized from store");
                    self.head = head;
                    self.head_tx.send_replace(head);
                }
            }
            return Err(AuditError::Unavailable(err.to_string()));
        }

        let head = ChainHead {
            sequence_no,
            hash: entry.current_hash,
        };
        self.head = Some(head);
        self.head_tx.send_replace(Some(head));
        Ok(AuditReceipt::from_entry(&entry))
    }
}

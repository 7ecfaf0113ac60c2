//! Chain verification
//!
//! Detects field edits (hash recompute), re-linked or reordered entries
//! (previous-hash check), removed rows (sequence gaps) and a cut-off tail
//! (fewer entries than the live head, or a tail hash the head does not match).

use crate::entry::{AuditEntry, ChainHash};
use crate::error::{AuditError, AuditResult};
use crate::logger::AuditLogger;
use crate::store::{AuditStore, ChainHead};
use carevault_shared::telemetry::ALERT_TARGET;
use serde::Serialize;
use std::fmt;
use tracing::{error, info};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChainBreak {
    /// Stored hash does not match the stored fields
    HashMismatch { sequence_no: u64 },
    /// `previous_hash` does not match the preceding entry
    BrokenLink { sequence_no: u64 },
    /// A sequence number is missing or repeated
    SequenceGap { expected: u64, found: u64 },
    /// Entries end before the live head
    Truncated { expected_head: u64, last_found: u64 },
    /// The last entry does not hash to the live head
    HeadMismatch { sequence_no: u64 },
}

impl ChainBreak {
    pub fn sequence_no(&self) -> u64 {
        match self {
            ChainBreak::HashMismatch { sequence_no }
            | ChainBreak::BrokenLink { sequence_no }
            | ChainBreak::HeadMismatch { sequence_no } => *sequence_no,
            ChainBreak::SequenceGap { expected, .. } => *expected,
            ChainBreak::Truncated { last_found, .. } => last_found + 1,
        }
    }
}

impl fmt::Display for ChainBreak {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainBreak::HashMismatch { sequence_no } => {
                write!(f, "entry {} hash does not match its contents", sequence_no)
            }
            ChainBreak::BrokenLink { sequence_no } => {
                write!(f, "entry {} does not link to its predecessor", sequence_no)
            }
            ChainBreak::SequenceGap { expected, found } => {
                write!(f, "expected entry {}, found {}", expected, found)
            }
            ChainBreak::Truncated {
                expected_head,
                last_found,
            } => write!(f, "chain ends at {} but head is {}", last_found, expected_head),
            ChainBreak::HeadMismatch { sequence_no } => {
                write!(f, "entry {} does not match the recorded head", sequence_no)
            }
        }
    }
}

/// Find the first break in `entries` for the range `from..=to`.
///
/// `entries` must start at `max(from - 1, 1)` so the link into `from` can be
/// checked. `to` is clamped to `head`; with no head there is nothing to check.
pub fn find_break(
    entries: &[AuditEntry],
    from: u64,
    to: u64,
    head: Option<ChainHead>,
) -> Option<ChainBreak> {
    let head = head?;
    let from = from.max(1);
    let to = to.min(head.sequence_no);
    if from > to {
        return None;
    }

    let start = from.saturating_sub(1).max(1);
    let mut expected = start;
    let mut previous: Option<ChainHash> = None;

    for entry in entries {
        if entry.sequence_no > to {
            break;
        }
        if entry.sequence_no != expected {
            return Some(ChainBreak::SequenceGap {
                expected,
                found: entry.sequence_no,
            });
        }
        if entry.sequence_no >= from {
            if !entry.hash_is_valid() {
                return Some(ChainBreak::HashMismatch {
                    sequence_no: entry.sequence_no,
                });
            }
            let expected_prev = match previous {
                Some(hash) => hash,
                None if entry.sequence_no == 1 => ChainHash::GENESIS,
                None => entry.previous_hash,
            };
            if entry.previous_hash != expected_prev {
                return Some(ChainBreak::BrokenLink {
                    sequence_no: entry.sequence_no,
                });
            }
        }
        previous = Some(entry.current_hash);
        expected += 1;
    }

    if expected <= to {
        return Some(ChainBreak::Truncated {
            expected_head: to,
            last_found: expected - 1,
        });
    }
    if to == head.sequence_no && previous != Some(head.hash) {
        return Some(ChainBreak::HeadMismatch { sequence_no: to });
    }
    None
}

/// Read `from..=to` from `store` and check it against `head`
pub async fn scan_store(
    store: &dyn AuditStore,
    from: u64,
    to: u64,
    head: Option<ChainHead>,
) -> AuditResult<Option<ChainBreak>> {
    if from > to {
        return Err(AuditError::InvalidRange { from, to });
    }
    let start = from.saturating_sub(1).max(1);
    let entries = store.range(start, to).await?;
    Ok(find_break(&entries, from, to, head))
}

impl AuditLogger {
    /// First integrity break in `from..=to`, checked against the live head.
    /// A range starting past the head is `InvalidRange`.
    pub async fn first_break(&self, from: u64, to: u64) -> AuditResult<Option<ChainBreak>> {
        let head = self.head();
        let last = head.map(|h| h.sequence_no).unwrap_or(0);
        if from.max(1) > last {
            return Err(AuditError::InvalidRange { from, to });
        }
        let found = scan_store(self.store().as_ref(), from, to, head).await?;
        match &found {
            Some(chain_break) => error!(
                target: ALERT_TARGET,
                from,
                to,
                sequence_no = chain_break.sequence_no(),
                "audit chain integrity broken: {}",
                chain_break
            ),
            None => info!(from, to, "audit chain verified"),
        }
        Ok(found)
    }

    /// Whether `from..=to` verifies intact
    pub async fn verify_chain(&self, from: u64, to: u64) -> AuditResult<bool> {
        Ok(self.first_break(from, to).await?.is_none())
    }
}

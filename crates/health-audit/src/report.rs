//! Accounting of disclosures

use crate::entry::{AuditAction, AuditEntry};
use crate::error::AuditResult;
use crate::logger::AuditLogger;
use carevault_shared::{ActorId, PatientId, PhiField, Purpose};
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DisclosureReport {
    pub patient_id: PatientId,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub total_disclosures: usize,
    pub disclosures: Vec<DisclosureRecord>,
    /// Refused requests in the period, counted but not itemized
    pub denied_requests: usize,
    /// Audited attempts that failed during decryption
    pub failed_disclosures: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DisclosureRecord {
    pub sequence_no: u64,
    pub accessed_at: DateTime<Utc>,
    pub accessor: ActorId,
    pub purpose: Option<Purpose>,
    pub fields: Vec<PhiField>,
}

impl DisclosureReport {
    /// Build a report from a patient's entries, keeping those whose
    /// timestamp falls in `period_start..=period_end`
    pub fn from_entries(
        patient_id: PatientId,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
        entries: &[AuditEntry],
    ) -> Self {
        let in_period = entries
            .iter()
            .filter(|e| e.subject_id.as_ref() == Some(&patient_id))
            .filter(|e| e.timestamp >= period_start && e.timestamp <= period_end);

        let mut disclosures = Vec::new();
        let mut denied_requests = 0;
        let mut failed_disclosures = 0;
        for entry in in_period {
            match entry.action {
                AuditAction::PhiRead => disclosures.push(DisclosureRecord {
                    sequence_no: entry.sequence_no,
                    accessed_at: entry.timestamp,
                    accessor: entry.actor_id.clone(),
                    purpose: entry.purpose,
                    fields: entry.accessed_fields.clone(),
                }),
                AuditAction::AccessDenied => denied_requests += 1,
                AuditAction::DisclosureFailed => failed_disclosures += 1,
                _ => {}
            }
        }

        Self {
            patient_id,
            period_start,
            period_end,
            total_disclosures: disclosures.len(),
            disclosures,
            denied_requests,
            failed_disclosures,
        }
    }
}

impl AuditLogger {
    /// Every entry about `subject`, in chain order
    pub async fn entries_for_subject(&self, subject: &PatientId) -> AuditResult<Vec<AuditEntry>> {
        Ok(self.store().for_subject(subject).await?)
    }

    /// Who saw which of a patient's fields, and why, within a period
    pub async fn disclosure_report(
        &self,
        subject: &PatientId,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> AuditResult<DisclosureReport> {
        let entries = self.entries_for_subject(subject).await?;
        Ok(DisclosureReport::from_entries(
            subject.clone(),
            period_start,
            period_end,
            &entries,
        ))
    }
}

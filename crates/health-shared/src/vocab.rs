//! PHI field and purpose-of-use vocabularies
//!
//! Both vocabularies are closed: every table that maps roles or purposes to
//! fields matches on them exhaustively, so adding a field forces every policy
//! table to take a position on it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Patient attributes classified as PHI. Stored only as ciphertext.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhiField {
    Name,
    Dob,
    Ssn,
    Address,
    Phone,
    Email,
    InsuranceId,
    Diagnoses,
    Medications,
    Allergies,
    ClinicalNotes,
}

impl PhiField {
    pub const ALL: [PhiField; 11] = [
        PhiField::Name,
        PhiField::Dob,
        PhiField::Ssn,
        PhiField::Address,
        PhiField::Phone,
        PhiField::Email,
        PhiField::InsuranceId,
        PhiField::Diagnoses,
        PhiField::Medications,
        PhiField::Allergies,
        PhiField::ClinicalNotes,
    ];

    /// Stable code used in audit entries, associated data and config files
    pub fn code(&self) -> &'static str {
        match self {
            PhiField::Name => "name",
            PhiField::Dob => "dob",
            PhiField::Ssn => "ssn",
            PhiField::Address => "address",
            PhiField::Phone => "phone",
            PhiField::Email => "email",
            PhiField::InsuranceId => "insurance_id",
            PhiField::Diagnoses => "diagnoses",
            PhiField::Medications => "medications",
            PhiField::Allergies => "allergies",
            PhiField::ClinicalNotes => "clinical_notes",
        }
    }

    /// Fields that also carry a keyed lookup hash for equality search
    pub fn is_searchable(&self) -> bool {
        matches!(self, PhiField::Ssn)
    }
}

impl fmt::Display for PhiField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Unrecognized vocabulary code
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("unknown {kind} code: {code}")]
pub struct UnknownCode {
    pub kind: &'static str,
    pub code: String,
}

impl FromStr for PhiField {
    type Err = UnknownCode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PhiField::ALL
            .iter()
            .copied()
            .find(|field| field.code() == s)
            .ok_or_else(|| UnknownCode {
                kind: "field",
                code: s.to_string(),
            })
    }
}

/// Purpose of use (HIPAA treatment/payment/operations plus research and public health)
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Purpose {
    Treatment,
    Payment,
    HealthcareOperations,
    Research,
    PublicHealth,
}

impl Purpose {
    pub const ALL: [Purpose; 5] = [
        Purpose::Treatment,
        Purpose::Payment,
        Purpose::HealthcareOperations,
        Purpose::Research,
        Purpose::PublicHealth,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            Purpose::Treatment => "treatment",
            Purpose::Payment => "payment",
            Purpose::HealthcareOperations => "healthcare_operations",
            Purpose::Research => "research",
            Purpose::PublicHealth => "public_health",
        }
    }

    /// Minimum-necessary field set: the widest disclosure this purpose can ever justify
    pub fn minimum_necessary(&self) -> &'static [PhiField] {
        use PhiField::*;
        match self {
            Purpose::Treatment => &[
                Name,
                Dob,
                Ssn,
                Address,
                Phone,
                Allergies,
                Medications,
                Diagnoses,
                ClinicalNotes,
            ],
            Purpose::Payment => &[Name, Dob, Ssn, Address, InsuranceId],
            Purpose::HealthcareOperations => &[Name, Dob, Address, Phone, Email, InsuranceId],
            Purpose::Research => &[Dob, Diagnoses, Medications],
            Purpose::PublicHealth => &[Dob, Address, Diagnoses],
        }
    }

    /// Requested fields that exceed this purpose's minimum-necessary set
    pub fn excess_fields(&self, requested: &BTreeSet<PhiField>) -> Vec<PhiField> {
        missing_from(requested, self.minimum_necessary())
    }
}

impl fmt::Display for Purpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Purpose {
    type Err = UnknownCode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Purpose::ALL
            .iter()
            .copied()
            .find(|purpose| purpose.code() == s)
            .ok_or_else(|| UnknownCode {
                kind: "purpose",
                code: s.to_string(),
            })
    }
}

/// Render a field set as `name,dob,ssn` for log fields
pub fn fields_display<'a>(fields: impl IntoIterator<Item = &'a PhiField>) -> String {
    fields
        .into_iter()
        .map(PhiField::code)
        .collect::<Vec<_>>()
        .join(",")
}

/// Fields of `requested` that are missing from `allowed`
pub fn missing_from(requested: &BTreeSet<PhiField>, allowed: &[PhiField]) -> Vec<PhiField> {
    requested
        .iter()
        .filter(|field| !allowed.contains(field))
        .copied()
        .collect()
}

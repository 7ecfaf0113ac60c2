//! Roles and the capability table
//!
//! Every role's rights come from one exhaustive match. Adding a role means
//! adding a row here; the compiler points at every place that must decide.

use carevault_shared::{ActorId, PhiField, Purpose};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Physician,
    Nurse,
    FrontDesk,
    Billing,
    Researcher,
    ComplianceOfficer,
    Admin,
}

/// What a role may do
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Capability {
    pub purposes: &'static [Purpose],
    pub fields: &'static [PhiField],
    pub can_register: bool,
    pub can_soft_delete: bool,
    pub can_manage_keys: bool,
    pub can_review_audit: bool,
}

impl Role {
    pub const ALL: [Role; 7] = [
        Role::Physician,
        Role::Nurse,
        Role::FrontDesk,
        Role::Billing,
        Role::Researcher,
        Role::ComplianceOfficer,
        Role::Admin,
    ];

    pub fn capability(&self) -> Capability {
        use PhiField::*;
        match self {
            Role::Physician => Capability {
                purposes: &[Purpose::Treatment, Purpose::HealthcareOperations],
                fields: &[
                    Name,
                    Dob,
                    Ssn,
                    Address,
                    Phone,
                    Email,
                    Diagnoses,
                    Medications,
                    Allergies,
                    ClinicalNotes,
                ],
                can_register: true,
                can_soft_delete: false,
                can_manage_keys: false,
                can_review_audit: false,
            },
            Role::Nurse => Capability {
                purposes: &[Purpose::Treatment],
                fields: &[Name, Dob, Allergies, Medications, Diagnoses],
                can_register: false,
                can_soft_delete: false,
                can_manage_keys: false,
                can_review_audit: false,
            },
            Role::FrontDesk => Capability {
                purposes: &[Purpose::HealthcareOperations],
                fields: &[Name, Dob, Address, Phone, Email, InsuranceId],
                can_register: true,
                can_soft_delete: false,
                can_manage_keys: false,
                can_review_audit: false,
            },
            Role::Billing => Capability {
                purposes: &[Purpose::Payment],
                fields: &[Name, Dob, Ssn, Address, InsuranceId],
                can_register: false,
                can_soft_delete: false,
                can_manage_keys: false,
                can_review_audit: false,
            },
            Role::Researcher => Capability {
                purposes: &[Purpose::Research],
                fields: &[Dob, Diagnoses, Medications],
                can_register: false,
                can_soft_delete: false,
                can_manage_keys: false,
                can_review_audit: false,
            },
            Role::ComplianceOfficer => Capability {
                purposes: &[],
                fields: &[],
                can_register: false,
                can_soft_delete: false,
                can_manage_keys: false,
                can_review_audit: true,
            },
            Role::Admin => Capability {
                purposes: &[],
                fields: &[],
                can_register: false,
                can_soft_delete: true,
                can_manage_keys: true,
                can_review_audit: true,
            },
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Role::Physician => "physician",
            Role::Nurse => "nurse",
            Role::FrontDesk => "front_desk",
            Role::Billing => "billing",
            Role::Researcher => "researcher",
            Role::ComplianceOfficer => "compliance_officer",
            Role::Admin => "admin",
        }
    }
}

impl Capability {
    pub fn allows_purpose(&self, purpose: Purpose) -> bool {
        self.purposes.contains(&purpose)
    }

    pub fn allows_field(&self, field: PhiField) -> bool {
        self.fields.contains(&field)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Authenticated caller, as resolved by the excluded session layer
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: ActorId,
    pub role: Role,
}

impl Actor {
    pub fn new(id: impl Into<ActorId>, role: Role) -> Self {
        Self { id: id.into(), role }
    }
}

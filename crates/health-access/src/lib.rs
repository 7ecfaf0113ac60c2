//! CareVault Access Control
//!
//! This crate composes the audit chain, field encryption and consent into
//! the entry points the HTTP layer calls:
//! - [`AccessControlGate::authorize_and_fetch`] for PHI reads
//! - [`PatientRegistry`] for intake, soft delete, SSN search and key migration
//! - [`CareVault`] to assemble everything from one configuration
//!
//! Role rights come from [`Role::capability`], an exhaustive table.

pub mod error;
pub mod gate;
pub mod patient;
pub mod registry;
pub mod roles;
pub mod vault;

pub use error::{AccessError, AccessResult, GateStage};
pub use gate::{check_role, AccessControlGate, AccessRequest, PatientView};
pub use patient::{MemoryPatientStore, PatientRecord, PatientStore};
pub use registry::{PatientIntake, PatientRegistry};
pub use roles::{Actor, Capability, Role};
pub use vault::{CareVault, CareVaultBuilder, VaultError};

//! CareVault Consent
//!
//! A PHI read for a purpose needs a consent that covers that purpose, is
//! inside its effective window and is not revoked, and whose field scope
//! includes every requested field.

pub mod error;
pub mod model;
pub mod service;
pub mod store;

pub use error::{ConsentError, ConsentResult};
pub use model::{evaluate, Consent, ConsentDecision, ConsentGrant, ConsentStatus, GrantMethod};
pub use service::ConsentService;
pub use store::{ConsentStore, MemoryConsentStore};

//! CareVault Shared Vocabulary
//!
//! This crate provides the types every CareVault crate agrees on:
//! - Identifiers for patients, actors and consents
//! - The closed PHI field and purpose-of-use vocabularies
//! - Denial reasons with stable audit codes
//! - A clock seam so consent windows can be tested deterministically
//! - The storage error shared by every store trait
//! - Configuration loading and logging initialization

pub mod config;
pub mod denial;
pub mod telemetry;
pub mod vocab;

// Re-export commonly used items
pub use clock::*;
pub use config::*;
pub use denial::DenialReason;
pub use ids::*;
pub use store::*;
pub use vocab::{fields_display, missing_from, PhiField, Purpose, UnknownCode};

/// Identifier newtypes
pub mod ids {
    use derive_more::{Display, From};
    use serde::{Deserialize, Serialize};
    use uuid::Uuid;

    /// Internal patient identifier (never PHI)
    #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display, From)]
    #[serde(transparent)]
    pub struct PatientId(String);

    impl PatientId {
        /// Generate a fresh random patient identifier
        pub fn generate() -> Self {
            PatientId(format!("PAT-{}", Uuid::new_v4().simple()))
        }

        pub fn as_str(&self) -> &str {
            &self.0
        }
    }

    impl From<&str> for PatientId {
        fn from(value: &str) -> Self {
            PatientId(value.to_string())
        }
    }

    /// Authenticated caller identifier (user or service account)
    #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display, From)]
    #[serde(transparent)]
    pub struct ActorId(String);

    impl ActorId {
        pub fn as_str(&self) -> &str {
            &self.0
        }
    }

    impl From<&str> for ActorId {
        fn from(value: &str) -> Self {
            ActorId(value.to_string())
        }
    }

    /// Consent record identifier
    #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display, From)]
    #[serde(transparent)]
    pub struct ConsentId(Uuid);

    impl ConsentId {
        pub fn generate() -> Self {
            ConsentId(Uuid::new_v4())
        }

        pub fn as_uuid(&self) -> &Uuid {
            &self.0
        }
    }
}

/// Time source used for consent windows and audit timestamps
pub mod clock {
    use chrono::{DateTime, Duration, Utc};
    use parking_lot::Mutex;

    pub trait Clock: Send + Sync {
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall-clock time
    #[derive(Clone, Copy, Debug, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }

    /// Manually advanced clock for tests and replay tooling
    #[derive(Debug)]
    pub struct ManualClock {
        now: Mutex<DateTime<Utc>>,
    }

    impl ManualClock {
        pub fn new(start: DateTime<Utc>) -> Self {
            Self { now: Mutex::new(start) }
        }

        pub fn set(&self, to: DateTime<Utc>) {
            *self.now.lock() = to;
        }

        pub fn advance(&self, by: Duration) {
            let mut now = self.now.lock();
            *now += by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.now.lock()
        }
    }
}

/// Storage error shared by the patient, consent and audit store seams
pub mod store {
    use thiserror::Error;

    #[derive(Debug, Error)]
    pub enum StoreError {
        /// Backend cannot be reached (connection refused, pool exhausted, disk gone)
        #[error("store unavailable: {0}")]
        Unavailable(String),
        /// Write would violate a uniqueness or ordering constraint
        #[error("store conflict: {0}")]
        Conflict(String),
        /// Persisted data could not be decoded
        #[error("store data corrupt: {0}")]
        Corrupt(String),
        #[error("store i/o error: {0}")]
        Io(#[from] std::io::Error),
    }

    pub type StoreResult<T> = Result<T, StoreError>;
}

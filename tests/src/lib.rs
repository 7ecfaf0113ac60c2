//! CareVault Test Suite
//!
//! Cross-crate tests run against a fully assembled vault:
//! - End-to-end access scenarios (scope, revocation, concurrency, rotation)
//! - Fail-closed behavior when the audit chain or key provider is down
//! - Tamper detection on the JSON-lines journal
//! - Consent lifecycle over a manual clock
//! - Registry operations and compliance review
//! - Property tests for field encryption

#[cfg(test)]
mod support;

#[cfg(test)]
mod fail_closed;
#[cfg(test)]
mod consent_lifecycle;
#[cfg(test)]
mod encryption_props;

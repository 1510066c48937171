// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Connection-level attestation checks.
//!
//! The check itself belongs to an external [`AttestationVerifier`]; this
//! module gathers its inputs (the peer certificate, the expected PCR sets
//! and the cached attestation document) and turns every failure into an
//! [`AttestationError`]. It runs inside the synchronous TLS verification
//! hook, so it never awaits and never lets a verifier panic escape.

use std::panic::{catch_unwind, AssertUnwindSafe};

use tracing::{debug, warn};

use super::docs::AttestationDocCache;
use super::pcrs::{PcrManager, PcrSet};

/// Error returned by an [`AttestationVerifier`].
pub type VerifierError = Box<dyn std::error::Error + Send + Sync>;

/// Checks an attestation document against a TLS certificate.
pub trait AttestationVerifier: Send + Sync {
    /// `Ok(true)` when `attestation_doc` attests `cert_der` and matches one
    /// of `expected`.
    fn verify(
        &self,
        cert_der: &[u8],
        expected: &[PcrSet],
        attestation_doc: &[u8],
    ) -> Result<bool, VerifierError>;
}

/// A connection whose peer could not be attested.
#[derive(Debug, Clone, thiserror::Error)]
#[error("Attestation failed for {hostname}: {reason}")]
pub struct AttestationError {
    pub hostname: String,
    /// Peer certificate, DER
    pub cert: Vec<u8>,
    pub reason: String,
}

impl AttestationError {
    fn new(hostname: &str, cert: &[u8], reason: impl Into<String>) -> Self {
        Self {
            hostname: hostname.to_string(),
            cert: cert.to_vec(),
            reason: reason.into(),
        }
    }
}

/// Enclave service name from `name.app.base` or `nonce.attest.name.app.base`.
pub fn service_name_from_hostname(hostname: &str) -> Option<&str> {
    let labels: Vec<&str> = hostname.split('.').collect();
    let name = match labels.as_slice() {
        [_, "attest", name, ..] => *name,
        [name, ..] => *name,
        [] => return None,
    };
    (!name.is_empty()).then_some(name)
}

/// Verify the peer of a TLS connection to `hostname`.
pub fn verify_connection(
    hostname: &str,
    cert_der: &[u8],
    pcrs: &PcrManager,
    docs: &AttestationDocCache,
    verifier: &dyn AttestationVerifier,
) -> Result<(), AttestationError> {
    let result = check(hostname, cert_der, pcrs, docs, verifier);
    if let Err(e) = &result {
        warn!(hostname = %hostname, reason = %e.reason, "Attestation check failed");
    }
    result
}

fn check(
    hostname: &str,
    cert_der: &[u8],
    pcrs: &PcrManager,
    docs: &AttestationDocCache,
    verifier: &dyn AttestationVerifier,
) -> Result<(), AttestationError> {
    let fail = |reason: String| AttestationError::new(hostname, cert_der, reason);

    let name = service_name_from_hostname(hostname)
        .ok_or_else(|| fail("no service name in hostname".to_string()))?;
    let expected = pcrs.get(name);
    let doc = docs
        .get(name)
        .ok_or_else(|| fail(format!("no attestation document cached for {name}")))?;

    let outcome = catch_unwind(AssertUnwindSafe(|| {
        verifier.verify(cert_der, &expected, &doc)
    }));

    match outcome {
        Ok(Ok(true)) => {
            debug!(hostname = %hostname, name = %name, "Attestation verified");
            Ok(())
        }
        Ok(Ok(false)) => Err(fail("attestation document did not match".to_string())),
        Ok(Err(e)) => Err(fail(format!("verifier error: {e}"))),
        Err(_) => Err(fail("verifier panicked".to_string())),
    }
}

/// Like [`verify_connection`], but on failure reloads the document once and
/// retries once, for enclaves redeployed since the last poll.
pub async fn verify_with_reload(
    hostname: &str,
    cert_der: &[u8],
    pcrs: &PcrManager,
    docs: &AttestationDocCache,
    verifier: &dyn AttestationVerifier,
) -> Result<(), AttestationError> {
    let first = check(hostname, cert_der, pcrs, docs, verifier);
    if first.is_ok() {
        return first;
    }

    let Some(name) = service_name_from_hostname(hostname) else {
        return verify_connection(hostname, cert_der, pcrs, docs, verifier);
    };
    if let Err(e) = docs.reload(name).await {
        warn!(name = %name, error = %e, "Attestation document reload failed");
    }
    verify_connection(hostname, cert_der, pcrs, docs, verifier)
}

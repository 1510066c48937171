// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Enclave attestation.
//!
//! ## Components
//!
//! - `pcrs` - expected measurements per service, from static data or a
//!   provider polled with retries
//! - `docs` - attestation documents per service, polled without retries
//! - `verify` - the per-connection check delegating to an
//!   [`AttestationVerifier`]
//! - `tls` - rustls verifier running the check during the handshake
//!
//! The document format is opaque here; parsing and signature checks belong
//! to the verifier implementation.

pub mod docs;
pub mod pcrs;
pub mod tls;
pub mod verify;

pub use docs::{AttestationDocCache, AttestationDocSource};
pub use pcrs::{AttestationData, PcrManager, PcrProvider, PcrSet, ProviderError, ProviderFailure};
pub use tls::AttestedServerVerifier;
pub use verify::{
    service_name_from_hostname, verify_connection, verify_with_reload, AttestationError,
    AttestationVerifier, VerifierError,
};

// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Envelope Relay SDK - client-side envelope encryption and relay interception
//!
//! Values and files are encrypted locally under keys derived by ECDH against
//! a team public key, producing `ev:` envelopes and `%EVENC` containers that
//! only the remote decryption service can open. Outgoing HTTPS requests to
//! configured domains can be tunnelled through the relay, and connections to
//! enclave services are checked against attestation documents.
//!
//! ## Modules
//!
//! - `crypto` - ECDH key derivation, envelope and file formats
//! - `targets` - domain/path patterns for decryption domains
//! - `relay` - outbound routing, CONNECT tunnel and relay CA trust
//! - `attestation` - PCR and attestation document caches, TLS verification
//! - `api` - HTTP client for the key, relay config, CA and attestation endpoints
//! - `refresh` / `retry` - background polling and backoff
//! - `config` - environment-driven configuration
//! - `telemetry` - tracing subscriber setup

pub mod api;
pub mod attestation;
pub mod config;
pub mod crypto;
pub mod error;
pub mod refresh;
pub mod relay;
pub mod retry;
pub mod targets;
pub mod telemetry;

pub use config::SdkConfig;
pub use crypto::{Ciphertext, CurveName, EncryptOptions, EncryptionClient, Plaintext};
pub use error::SdkError;
pub use relay::{OutboundRelay, RequestTarget};

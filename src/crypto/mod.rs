// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Envelope encryption.
//!
//! ## Flow
//!
//! 1. Fetch the team public key ([`EncryptionClient`] caches it)
//! 2. Generate an ephemeral key pair for the current rotation window
//! 3. ECDH + SHA-256 KDF over the DER-encoded ephemeral key
//! 4. AES-256-GCM per leaf, emitted as `ev:` strings or a `%EVENC` file
//!
//! ## Modules
//!
//! - `curves` - per-curve constants and [`EncryptionConfig`]
//! - `der` - X9.62 SubjectPublicKeyInfo encoder
//! - `ecdh` - key agreement and KDF
//! - `envelope` - `ev:` string format
//! - `file` - `%EVENC` binary container
//! - `metadata` - data-role preamble
//! - `encrypt` / `decrypt` - the two directions
//! - `client` - stateful client with key caching and rotation

pub mod client;
pub mod curves;
pub mod decrypt;
pub mod der;
pub mod ecdh;
pub mod encrypt;
pub mod envelope;
pub mod error;
pub mod file;
pub mod metadata;

pub use client::{EncryptionClient, TeamKeySource};
pub use curves::{CurveName, EncryptionConfig};
pub use decrypt::{Decrypted, Decryptor};
pub use ecdh::{derive_shared_secret, DerivedKey, EphemeralKeyPair, TeamPublicKey, TeamSecretKey};
pub use encrypt::{encrypt, Ciphertext, EncryptOptions, EncryptionContext, Plaintext};
pub use envelope::{Datatype, Envelope};
pub use error::CryptoError;
pub use file::{crc32, decode_file, encode_file, DecodedFile};
pub use metadata::EncryptionMetadata;

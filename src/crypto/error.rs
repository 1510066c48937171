// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Envelope crypto errors.

use super::der::DerError;

/// Error type for key derivation, encryption and envelope decoding.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("Unsupported curve: {0}")]
    UnsupportedCurve(String),

    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("DER encoding failed: {0}")]
    Der(#[from] DerError),

    /// Nothing to encrypt. Raised before any key material is touched.
    #[error("Data to encrypt must not be undefined")]
    UndefinedData,

    #[error("Unsupported data type: {0}")]
    UnsupportedDataType(String),

    /// Binary payload above the configured maximum.
    #[error("File size of {size} bytes exceeds the maximum of {max} bytes")]
    ExceededMaxFileSize { size: usize, max: usize },

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("Malformed file container: {0}")]
    MalformedFile(String),

    #[error("Malformed metadata: {0}")]
    MalformedMetadata(String),
}

impl CryptoError {
    /// Whether this error is the size-limit condition callers may branch on.
    pub fn is_exceeded_max_file_size(&self) -> bool {
        matches!(self, CryptoError::ExceededMaxFileSize { .. })
    }
}

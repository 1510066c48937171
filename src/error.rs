// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Crate-level error.

use crate::api::ApiError;
use crate::attestation::{AttestationError, ProviderError};
use crate::config::ConfigError;
use crate::crypto::error::CryptoError;
use crate::relay::RelayError;

/// Any error surfaced by the SDK. Module errors convert with `?`.
#[derive(Debug, thiserror::Error)]
pub enum SdkError {
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Relay(#[from] RelayError),

    #[error(transparent)]
    Attestation(#[from] AttestationError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl SdkError {
    /// The API rejected the key.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, SdkError::Api(e) if e.is_unauthorized())
    }
}

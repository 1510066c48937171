// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Relay interception errors.

/// Failure routing or tunnelling an outbound connection.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Invalid request target: {0}")]
    InvalidTarget(String),

    #[error("Invalid relay address: {0}")]
    InvalidProxy(String),

    /// TCP connect to the relay failed. Not retried.
    #[error("Failed to connect to relay {address}: {source}")]
    ProxyConnect {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("CONNECT handshake failed: {0}")]
    Handshake(String),

    #[error("TLS error: {0}")]
    Tls(String),

    /// Neither the primary nor the fallback CA host produced a certificate.
    #[error("Relay CA certificate unavailable: {0}")]
    Certificate(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

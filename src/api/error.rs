// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Remote API errors.

use reqwest::StatusCode;

/// Failure talking to the remote API.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// 401 from any endpoint
    #[error("Unauthorized: the API key was rejected")]
    Unauthorized,

    /// 403 from any endpoint
    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    #[error("Request failed: {0}")]
    Request(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("API configuration missing: {0}")]
    MissingConfig(String),
}

impl ApiError {
    /// Map a non-success status into a typed error.
    pub fn from_status(status: StatusCode, url: &str) -> Self {
        match status {
            StatusCode::UNAUTHORIZED => ApiError::Unauthorized,
            StatusCode::FORBIDDEN => ApiError::Forbidden(url.to_string()),
            other => ApiError::Status {
                status: other.as_u16(),
                url: url.to_string(),
            },
        }
    }

    /// True for 401 and 403 responses.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::Unauthorized)
    }
}
